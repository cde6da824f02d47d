//! 更新扫描：三个后端并发子扫描，合并为一个 UpdateSet；以及定时扫描器

use crate::backend::{dnf, flatpak, gearlever, BackendError, Backends, ScanFailure, UpdateGroup, UpdateSet};
use crate::events::CoreEvent;
use chrono::Local;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 定时扫描器检查停止信号的粒度
const STOP_CHECK_SLICE: Duration = Duration::from_millis(250);
/// 关闭时最多等待后台任务的时间，超过后放弃正在进行的扫描
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// 扫描器。克隆后共享同一个代数计数器
#[derive(Clone)]
pub struct Scanner {
    backends: Backends,
    generation: Arc<AtomicU64>,
}

impl Scanner {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// 执行一次完整扫描。子扫描互相隔离，失败的分组结果为空并记录原因
    pub async fn scan(&self) -> UpdateSet {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("开始第 {} 次扫描", generation);

        let (system, sandbox, portable) = tokio::join!(
            sub_scan(UpdateGroup::SystemPackage, self.backends.clone(), dnf::pending_upgrades),
            sub_scan(UpdateGroup::SandboxApp, self.backends.clone(), flatpak::pending_updates),
            sub_scan(UpdateGroup::Portable, self.backends.clone(), gearlever::pending_updates),
        );

        let mut set = UpdateSet::empty(generation);
        set.system = settle(system, &mut set.failures);
        set.sandbox = settle(sandbox, &mut set.failures);
        set.portable = settle(portable, &mut set.failures);
        set.scanned_at = Local::now();

        log::info!(
            "扫描完成: DNF {} / Flatpak {} / AppImage {}，共 {} 个待更新",
            set.system.len(),
            set.sandbox.len(),
            set.portable.len(),
            set.total()
        );
        set
    }
}

/// 在阻塞线程上跑一个子扫描，错误和 panic 都归一为 ScanFailure
async fn sub_scan<T, F>(group: UpdateGroup, backends: Backends, scan: F) -> Result<Vec<T>, ScanFailure>
where
    T: Send + 'static,
    F: FnOnce(&Backends) -> Result<Vec<T>, BackendError> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || scan(&backends)).await;
    let error = match joined {
        Ok(Ok(items)) => return Ok(items),
        Ok(Err(e)) => e,
        Err(e) => BackendError::Worker(e.to_string()),
    };
    Err(ScanFailure {
        group,
        message: error.to_string(),
    })
}

fn settle<T>(result: Result<Vec<T>, ScanFailure>, failures: &mut Vec<ScanFailure>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(failure) => {
            log::warn!("{} 扫描失败: {}", failure.group, failure.message);
            failures.push(failure);
            Vec::new()
        }
    }
}

/// 定时扫描：启动后立即扫描一次，之后按间隔重复
///
/// 每次扫描开始前发送 `ScanStarted`。停止信号在休眠期间以亚秒粒度检查；
/// 正在进行的扫描仍可能投递结果，但观察到停止信号后不再开始新的扫描。
pub struct PeriodicScanner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicScanner {
    pub fn start(scanner: Scanner, interval: Duration, tx: mpsc::Sender<CoreEvent>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                if tx.send(CoreEvent::ScanStarted).await.is_err() {
                    break;
                }
                let set = scanner.scan().await;
                if tx.send(CoreEvent::ScanFinished(Arc::new(set))).await.is_err() {
                    // 接收端已关闭
                    break;
                }
                if !sleep_unless_stopped(&flag, interval).await {
                    break;
                }
            }
            log::debug!("定时扫描已停止");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// 发出停止信号，不等待
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// 停止并短暂等待后台任务退出；扫描仍在进行时放弃等待，不阻塞调用方
    pub async fn shutdown(mut self) {
        self.stop();
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("定时扫描任务异常退出: {}", e),
            Err(_) => {
                log::debug!("扫描仍在进行，放弃等待");
                handle.abort();
            }
        }
    }
}

impl Drop for PeriodicScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 分片休眠；睡满返回 true，中途收到停止信号返回 false
async fn sleep_unless_stopped(stop: &AtomicBool, interval: Duration) -> bool {
    let mut remaining = interval;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let slice = remaining.min(STOP_CHECK_SLICE);
        tokio::time::sleep(slice).await;
        remaining -= slice;
    }
    !stop.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::runner::testing::ScriptedRunner;
    use crate::backend::test_support::backends;
    use crate::backend::PortableMode;
    use std::time::Instant;

    fn scripted() -> Arc<ScriptedRunner> {
        Arc::new(
            ScriptedRunner::new()
                .on(&["dnf", "check-update"], 100, "foo.x86_64   2.0-1   repo-main\n", "")
                .on(&["dnf", "list", "--installed"], 0, "Installed Packages\nfoo.x86_64  1.0-1  @updates\n", "")
                .on(&["flatpak", "list"], 0, "org.app\tApp\t1.0\tstable\n", "")
                .on(&["flatpak", "remote-ls"], 0, "org.app\t1.1\tstable\n", ""),
        )
    }

    #[tokio::test]
    async fn scan_merges_all_groups() {
        let dir = tempfile::tempdir().unwrap();
        let runner = scripted();
        let scanner = Scanner::new(backends(&runner, PortableMode::Manual, dir.path()));
        let set = scanner.scan().await;

        assert_eq!(set.system.len(), 1);
        assert_eq!(set.system[0].installed_version, "1.0-1");
        assert_eq!(set.sandbox.len(), 1);
        assert!(set.portable.is_empty());
        assert!(set.failures.is_empty());
        assert_eq!(set.total(), 2);
    }

    #[tokio::test]
    async fn failing_sub_scan_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_timeout(&["dnf", "check-update"])
                .on(&["flatpak", "list"], 0, "org.app\tApp\t1.0\tstable\n", "")
                .on(&["flatpak", "remote-ls"], 0, "org.app\t1.1\tstable\n", "")
                .on(&["flatpak", "run", gearlever::APP_ID, "--list-updates"], 0, "Krita: new\n", ""),
        );
        let scanner = Scanner::new(backends(&runner, PortableMode::Managed, dir.path()));
        let set = scanner.scan().await;

        assert!(set.system.is_empty());
        assert_eq!(set.failures.len(), 1);
        assert_eq!(set.failures[0].group, UpdateGroup::SystemPackage);
        assert_eq!(set.sandbox.len(), 1);
        assert_eq!(set.portable.len(), 1);
    }

    #[tokio::test]
    async fn generation_increases_per_scan() {
        let dir = tempfile::tempdir().unwrap();
        let runner = scripted();
        let scanner = Scanner::new(backends(&runner, PortableMode::Manual, dir.path()));
        let first = scanner.scan().await;
        let second = scanner.clone().scan().await;
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
    }

    #[tokio::test]
    async fn periodic_scanner_repeats_and_stops_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let runner = scripted();
        let scanner = Scanner::new(backends(&runner, PortableMode::Manual, dir.path()));
        let (tx, mut rx) = mpsc::channel(8);

        let periodic = PeriodicScanner::start(scanner, Duration::from_millis(20), tx);
        for expected in 1..=2 {
            assert!(matches!(rx.recv().await, Some(CoreEvent::ScanStarted)));
            match rx.recv().await {
                Some(CoreEvent::ScanFinished(set)) => assert_eq!(set.generation, expected),
                _ => panic!("expected a scan result"),
            }
        }
        periodic.shutdown().await;
    }

    #[tokio::test]
    async fn stop_interrupts_long_interval() {
        let dir = tempfile::tempdir().unwrap();
        let runner = scripted();
        let scanner = Scanner::new(backends(&runner, PortableMode::Manual, dir.path()));
        let (tx, mut rx) = mpsc::channel(8);

        let periodic = PeriodicScanner::start(scanner, Duration::from_secs(3600), tx);
        assert!(matches!(rx.recv().await, Some(CoreEvent::ScanStarted)));
        assert!(matches!(rx.recv().await, Some(CoreEvent::ScanFinished(_))));

        let started = Instant::now();
        periodic.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        // 停止后不再有新的扫描
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_for_slow_scan() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_slow(&["dnf", "check-update"], Duration::from_secs(3), 0, "")
                .on(&["flatpak", "list"], 0, "", ""),
        );
        let scanner = Scanner::new(backends(&runner, PortableMode::Manual, dir.path()));
        let (tx, mut rx) = mpsc::channel(8);

        let periodic = PeriodicScanner::start(scanner, Duration::from_secs(3600), tx);
        assert!(matches!(rx.recv().await, Some(CoreEvent::ScanStarted)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        periodic.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
