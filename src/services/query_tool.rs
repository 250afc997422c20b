use crate::metrics::Metrics;
use crate::models::query::SENTINEL_PROPERTY;
use crate::models::toolchain::{Environment, Toolchain, merged_environment};
use async_trait::async_trait;
use camino::Utf8Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Flag passed to the query tool.
pub const QUERY_FLAG: &str = "-query";

/// Errors that can occur while running the query tool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("{0} does not exist or is not executable")]
    NotExecutable(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process crashed: {0}")]
    ProcessCrashed(String),

    #[error("Process exited with code {code}: {stderr}")]
    ExitedWithError { code: i32, stderr: String },

    #[error("No usable environment found for {tool} after {attempts} attempt(s): {last_error}")]
    NoUsableEnvironment {
        tool: String,
        attempts: usize,
        last_error: String,
    },

    #[error("Process error: {0}")]
    Io(String),
}

/// Raw result of one child process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Abstraction for spawning the query tool, so tests can substitute canned output.
///
/// Implementations must return `Timeout` rather than hang, `ProcessCrashed` for
/// abnormal termination and `ExitedWithError` for a non-zero exit code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &Utf8Path,
        args: &[String],
        environment: &Environment,
        timeout_duration: Duration,
    ) -> Result<ProcessOutput, QueryError>;
}

/// Runs processes with `tokio::process`, killing them on timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &Utf8Path,
        args: &[String],
        environment: &Environment,
        timeout_duration: Duration,
    ) -> Result<ProcessOutput, QueryError> {
        let start = Instant::now();

        let mut cmd = Command::new(program.as_std_path());
        cmd.args(args)
            .envs(environment.iter())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| QueryError::Io(format!("Failed to spawn {program}: {e}")))?;

        let output = timeout(timeout_duration, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("{} timed out after {:?}", program, timeout_duration);
                QueryError::Timeout(timeout_duration)
            })?
            .map_err(|e| QueryError::Io(format!("Failed to wait for {program}: {e}")))?;

        tracing::debug!(
            "{} completed in {:.2}s with status {}",
            program,
            start.elapsed().as_secs_f32(),
            output.status
        );

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(ProcessOutput {
                stdout: output.stdout,
                stderr,
            }),
            Some(code) => Err(QueryError::ExitedWithError { code, stderr }),
            None => Err(QueryError::ProcessCrashed(format!(
                "{program} terminated abnormally ({})",
                output.status
            ))),
        }
    }
}

/// Whether `path` is an existing file the current user may execute.
pub fn is_executable_file(path: &Utf8Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Runs `<tool> -query`, retrying inside toolchain environments when the plain
/// run does not produce trustworthy output.
pub struct QueryToolInvoker {
    runner: Arc<dyn ProcessRunner>,
    toolchains: RwLock<Vec<Toolchain>>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl QueryToolInvoker {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            runner,
            toolchains: RwLock::new(Vec::new()),
            timeout,
            metrics,
        }
    }

    /// Replace the toolchain environments used for retries.
    pub fn set_toolchains(&self, toolchains: Vec<Toolchain>) {
        if let Ok(mut current) = self.toolchains.write() {
            *current = toolchains;
        }
    }

    pub fn toolchains(&self) -> Vec<Toolchain> {
        self.toolchains
            .read()
            .map(|toolchains| toolchains.clone())
            .unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Query the tool and return its raw stdout.
    ///
    /// Output counts as trustworthy only when it mentions the sentinel property;
    /// containers and emulators sometimes print their own errors on stdout. If the
    /// first run is not trustworthy, each registered toolchain environment is tried
    /// once and the first trustworthy run wins. Output that never becomes
    /// trustworthy is an error, never partial data.
    pub async fn query(
        &self,
        tool_path: &Utf8Path,
        environment: &Environment,
    ) -> Result<Vec<u8>, QueryError> {
        if !is_executable_file(tool_path) {
            return Err(QueryError::NotExecutable(tool_path.to_string()));
        }

        let toolchains = self.toolchains();
        let first = self.run_once(tool_path, environment).await;
        let first_error = match first {
            Ok(output) if is_trustworthy(&output.stdout) => return Ok(output.stdout),
            Ok(output) if toolchains.is_empty() => {
                return Err(QueryError::NoUsableEnvironment {
                    tool: tool_path.to_string(),
                    attempts: 1,
                    last_error: describe_untrustworthy(&output),
                });
            }
            Err(QueryError::Timeout(d)) => return Err(QueryError::Timeout(d)),
            Err(e) if toolchains.is_empty() => return Err(e),
            Ok(output) => describe_untrustworthy(&output),
            Err(e) => e.to_string(),
        };

        tracing::info!(
            "Query of {} was not conclusive ({}), retrying with {} toolchain environment(s)",
            tool_path,
            first_error,
            toolchains.len()
        );

        let mut last_error = first_error;
        for toolchain in &toolchains {
            let env = merged_environment(environment, &toolchain.environment);
            match self.run_once(tool_path, &env).await {
                Ok(output) if is_trustworthy(&output.stdout) => {
                    tracing::info!("Queried {} using the {} environment", tool_path, toolchain.name);
                    return Ok(output.stdout);
                }
                Ok(output) => last_error = describe_untrustworthy(&output),
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(QueryError::NoUsableEnvironment {
            tool: tool_path.to_string(),
            attempts: toolchains.len() + 1,
            last_error,
        })
    }

    async fn run_once(
        &self,
        tool_path: &Utf8Path,
        environment: &Environment,
    ) -> Result<ProcessOutput, QueryError> {
        self.metrics.record_query_invocation();
        let args = vec![QUERY_FLAG.to_string()];
        let result = self
            .runner
            .run(tool_path, &args, environment, self.timeout)
            .await;
        if result.is_err() {
            self.metrics.record_query_failure();
        }
        result
    }
}

fn is_trustworthy(stdout: &[u8]) -> bool {
    let needle = SENTINEL_PROPERTY.as_bytes();
    stdout.windows(needle.len()).any(|window| window == needle)
}

fn describe_untrustworthy(output: &ProcessOutput) -> String {
    if output.stderr.is_empty() {
        format!("output does not contain {SENTINEL_PROPERTY}")
    } else {
        output.stderr.clone()
    }
}
