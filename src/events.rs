//! 结果回传通道
//!
//! 所有异步操作都在后台执行，完成后以 [`CoreEvent`] 的形式发送到
//! 唯一的接收端。接收端（TUI 或命令行）是状态的唯一写入者。

use crate::applier::{self, ApplyError, BatchReport};
use crate::backend::{appimage, BackendKind, Backends, Operation, OperationOutcome, PortableEntry, Selection, UpdateSet};
use crate::scanner::Scanner;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 通道容量
const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug)]
pub enum CoreEvent {
    /// 定时扫描开始
    ScanStarted,
    /// 一次扫描完成
    ScanFinished(Arc<UpdateSet>),
    /// 单项操作完成
    ActionFinished {
        kind: BackendKind,
        operation: Operation,
        target: String,
        outcome: OperationOutcome,
    },
    /// 批量应用完成
    BatchFinished(Result<BatchReport, ApplyError>),
    /// AppImage 目录清单读取完成
    InventoryLoaded(Result<Vec<PortableEntry>, String>),
    /// 单个目标的详情读取完成
    DetailsLoaded {
        target: String,
        result: Result<String, String>,
    },
}

pub fn channel() -> (mpsc::Sender<CoreEvent>, mpsc::Receiver<CoreEvent>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// 把操作派发到后台线程，并把结果送回通道
#[derive(Clone)]
pub struct Dispatcher {
    scanner: Scanner,
    tx: mpsc::Sender<CoreEvent>,
}

impl Dispatcher {
    pub fn new(scanner: Scanner, tx: mpsc::Sender<CoreEvent>) -> Self {
        Self { scanner, tx }
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn backends(&self) -> &Backends {
        self.scanner.backends()
    }

    pub fn sender(&self) -> mpsc::Sender<CoreEvent> {
        self.tx.clone()
    }

    /// 立即扫描一次
    pub fn spawn_scan(&self) {
        let scanner = self.scanner.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let set = scanner.scan().await;
            let _ = tx.send(CoreEvent::ScanFinished(Arc::new(set))).await;
        });
    }

    /// 对单个目标执行一次操作
    pub fn spawn_action(&self, kind: BackendKind, operation: Operation, target: String) {
        let backends = self.backends().clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let worker_target = target.clone();
            let outcome = tokio::task::spawn_blocking(move || backends.execute(kind, operation, &worker_target))
                .await
                .unwrap_or_else(|e| OperationOutcome::fail(format!("工作线程异常退出: {}", e)));
            let _ = tx
                .send(CoreEvent::ActionFinished {
                    kind,
                    operation,
                    target,
                    outcome,
                })
                .await;
        });
    }

    /// 批量应用选中的更新
    pub fn spawn_apply(&self, set: Arc<UpdateSet>, selection: Selection) {
        let backends = self.backends().clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let report = tokio::task::spawn_blocking(move || applier::apply(&backends, &set, &selection))
                .await
                .unwrap_or_else(|e| {
                    log::error!("批量应用任务异常退出: {}", e);
                    Ok(BatchReport {
                        failed: vec![format!("工作线程异常退出: {}", e)],
                        ..BatchReport::default()
                    })
                });
            let _ = tx.send(CoreEvent::BatchFinished(report)).await;
        });
    }

    /// 读取单个目标的详情
    pub fn spawn_details(&self, kind: BackendKind, target: String) {
        let backends = self.backends().clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let worker_target = target.clone();
            let result = tokio::task::spawn_blocking(move || backends.details(kind, &worker_target))
                .await
                .map_err(|e| e.to_string())
                .and_then(|details| details.map_err(|e| e.to_string()));
            let _ = tx.send(CoreEvent::DetailsLoaded { target, result }).await;
        });
    }

    /// 读取 AppImage 目录
    pub fn spawn_inventory(&self) {
        let dir = self.backends().paths().appimage_dir.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let entries = tokio::task::spawn_blocking(move || appimage::list_installed(&dir, ""))
                .await
                .map_err(|e| e.to_string())
                .and_then(|listed| listed.map_err(|e| e.to_string()));
            let _ = tx.send(CoreEvent::InventoryLoaded(entries)).await;
        });
    }
}
