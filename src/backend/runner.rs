//! 外部命令执行：参数向量 + 可选超时
//!
//! 所有后端调用都走 [`CommandRunner`]，从不拼接 shell 字符串，
//! 目标标识符或文件路径里的特殊字符不会被解释。

use super::types::CommandOutput;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 单项详情查询
pub const DETAIL_TIMEOUT: Duration = Duration::from_secs(10);
/// 批量列表 / 搜索
pub const BULK_TIMEOUT: Duration = Duration::from_secs(60);
/// 非特权的修改类操作（flatpak、Gear Lever）
pub const MUTATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// 轮询子进程状态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("无法启动 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} 执行超时（超过 {} 秒）", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("等待 {program} 退出失败: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} 执行失败（exit={code:?}）: {message}")]
    Failed {
        program: String,
        code: Option<i32>,
        message: String,
    },
    #[error("读取 {path} 失败: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("工作线程异常退出: {0}")]
    Worker(String),
}

/// 一次外部命令调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn extend_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// program + args
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

/// 外部进程执行接口，测试中替换为脚本化实现
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BackendError>;
}

/// 基于 duct 的真实进程执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct DuctRunner;

impl CommandRunner for DuctRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BackendError> {
        let handle = duct::cmd(spec.program.as_str(), &spec.args)
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|source| BackendError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let wait_err = |source| BackendError::Wait {
            program: spec.program.clone(),
            source,
        };

        let Some(timeout) = spec.timeout else {
            let output = handle.wait().map_err(wait_err)?;
            return Ok(CommandOutput::from(output));
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(output) = handle.try_wait().map_err(wait_err)? {
                return Ok(CommandOutput::from(output));
            }
            if Instant::now() >= deadline {
                if let Err(e) = handle.kill() {
                    log::warn!("终止超时进程 {} 失败: {}", spec.program, e);
                }
                return Err(BackendError::Timeout {
                    program: spec.program.clone(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! 脚本化执行器：按参数前缀匹配返回预设输出，并记录每次调用

    use super::*;
    use std::sync::Mutex;

    enum Reply {
        Output(CommandOutput),
        Delayed(Duration, CommandOutput),
        Timeout,
        Missing,
    }

    struct Rule {
        prefix: Vec<String>,
        reply: Reply,
    }

    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Vec<Rule>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        fn rule(mut self, prefix: &[&str], reply: Reply) -> Self {
            self.rules.push(Rule {
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                reply,
            });
            self
        }

        /// 先注册的规则优先
        pub fn on(self, prefix: &[&str], code: i32, stdout: &str, stderr: &str) -> Self {
            self.rule(prefix, Reply::Output(CommandOutput::new(code, stdout, stderr)))
        }

        /// 阻塞 `delay` 后再返回输出
        pub fn on_slow(self, prefix: &[&str], delay: Duration, code: i32, stdout: &str) -> Self {
            self.rule(prefix, Reply::Delayed(delay, CommandOutput::new(code, stdout, "")))
        }

        pub fn on_timeout(self, prefix: &[&str]) -> Self {
            self.rule(prefix, Reply::Timeout)
        }

        pub fn on_missing(self, prefix: &[&str]) -> Self {
            self.rule(prefix, Reply::Missing)
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        /// 统计以给定前缀开头的调用次数
        pub fn count(&self, prefix: &[&str]) -> usize {
            self.calls()
                .iter()
                .filter(|argv| argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p))
                .count()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BackendError> {
            let argv = spec.argv();
            self.calls.lock().unwrap().push(argv.clone());

            let rule = self.rules.iter().find(|rule| {
                argv.len() >= rule.prefix.len() && argv.iter().zip(&rule.prefix).all(|(a, p)| a == p)
            });
            match rule.map(|r| &r.reply) {
                Some(Reply::Output(output)) => Ok(output.clone()),
                Some(Reply::Delayed(delay, output)) => {
                    std::thread::sleep(*delay);
                    Ok(output.clone())
                }
                Some(Reply::Timeout) => Err(BackendError::Timeout {
                    program: spec.program.clone(),
                    timeout: spec.timeout.unwrap_or_default(),
                }),
                Some(Reply::Missing) | None => Err(BackendError::Spawn {
                    program: spec.program.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "not scripted"),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builds_argv_in_order() {
        let spec = CommandSpec::new("dnf", ["install", "-y"])
            .arg("foo; rm -rf /")
            .timeout(DETAIL_TIMEOUT);
        assert_eq!(spec.argv(), vec!["dnf", "install", "-y", "foo; rm -rf /"]);
        assert_eq!(spec.timeout, Some(DETAIL_TIMEOUT));
    }

    #[test]
    fn duct_runner_captures_exit_code_and_streams() {
        let spec = CommandSpec::new("sh", ["-c", "echo out; echo err >&2; exit 3"]);
        let output = DuctRunner.run(&spec).unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn duct_runner_kills_on_timeout() {
        let spec = CommandSpec::new("sleep", ["5"]).timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = DuctRunner.run(&spec).unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn duct_runner_reports_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());
        assert!(matches!(DuctRunner.run(&spec), Err(BackendError::Spawn { .. })));
    }
}
