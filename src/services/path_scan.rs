use crate::models::Environment;
use crate::services::query_tool::{ProcessRunner, is_executable_file};
use camino::{Utf8Path, Utf8PathBuf};
use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

/// Tool names looked up in each `PATH` directory, in order.
pub const TOOL_NAMES: &[&str] = &["qmake6", "qmake", "qmake-qt6", "qmake-qt5"];

const CHOOSER_NAME: &str = "qtchooser";

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Finds a query tool on `PATH` to seed an empty registry.
pub struct PathScanner {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
    search_path: Option<OsString>,
}

impl PathScanner {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            search_path: None,
        }
    }

    /// Search this `PATH`-style value instead of the process environment.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Scan the configured search path, or the process `PATH`.
    pub async fn find_tool(&self) -> Option<Utf8PathBuf> {
        let path_var = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"));
        self.find_tool_in(path_var).await
    }

    /// Scan an explicit `PATH` value. The first usable tool wins.
    pub async fn find_tool_in(&self, path_var: Option<OsString>) -> Option<Utf8PathBuf> {
        let path_var = path_var?;
        for dir in std::env::split_paths(&path_var) {
            let Ok(dir) = Utf8PathBuf::try_from(dir) else {
                continue;
            };
            for name in TOOL_NAMES {
                let candidate = dir.join(executable_name(name));
                if !is_executable_file(&candidate) {
                    continue;
                }
                if let Some(tool) = self.follow_chooser(&candidate).await {
                    tracing::info!("Found query tool on PATH: {}", tool);
                    return Some(tool);
                }
            }
        }
        tracing::debug!("No query tool found on PATH");
        None
    }

    /// Tools that are symlinks to `qtchooser` are resolved through
    /// `qtchooser -print-env`.
    async fn follow_chooser(&self, candidate: &Utf8Path) -> Option<Utf8PathBuf> {
        let resolved = candidate
            .canonicalize_utf8()
            .unwrap_or_else(|_| candidate.to_path_buf());
        if resolved.file_stem() != Some(CHOOSER_NAME) {
            return Some(candidate.to_path_buf());
        }

        let args = vec!["-print-env".to_string()];
        let output = match self
            .runner
            .run(&resolved, &args, &Environment::new(), self.timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!("{} -print-env failed: {}", resolved, e);
                return None;
            }
        };

        let tool = parse_chooser_tool_dir(&String::from_utf8_lossy(&output.stdout))?
            .join(executable_name("qmake"));
        is_executable_file(&tool).then_some(tool)
    }
}

/// `QTTOOLDIR="..."` from `qtchooser -print-env` output.
pub fn parse_chooser_tool_dir(output: &str) -> Option<Utf8PathBuf> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("QTTOOLDIR=")?;
        let value = value.trim_matches('"');
        (!value.is_empty()).then(|| Utf8PathBuf::from(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_tool::{MockProcessRunner, ProcessOutput};
    use tempfile::TempDir;

    fn executable(path: &Utf8Path) {
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn test_parse_chooser_output() {
        let output = "QT_SELECT=\"default\"\nQTTOOLDIR=\"/usr/lib/qt5/bin\"\nQTLIBDIR=\"/usr/lib\"\n";
        assert_eq!(parse_chooser_tool_dir(output), Some(Utf8PathBuf::from("/usr/lib/qt5/bin")));
        assert_eq!(parse_chooser_tool_dir("QTTOOLDIR=\"\"\n"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_directory_and_name_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let first_dir = Utf8PathBuf::try_from(first.path().to_path_buf()).unwrap();
        let second_dir = Utf8PathBuf::try_from(second.path().to_path_buf()).unwrap();
        executable(&first_dir.join("qmake-qt5"));
        executable(&second_dir.join("qmake6"));
        std::fs::write(first_dir.join("qmake"), "not executable").unwrap();

        let scanner = PathScanner::new(Arc::new(MockProcessRunner::new()), Duration::from_secs(1));
        let path_var = std::env::join_paths([first.path(), second.path()]).unwrap();
        let tool = scanner.find_tool_in(Some(path_var)).await;
        assert_eq!(tool, Some(first_dir.join("qmake-qt5")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_qtchooser_indirection() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let path_dir = root.join("bin");
        let tool_dir = root.join("qt5/bin");
        std::fs::create_dir_all(&path_dir).unwrap();
        std::fs::create_dir_all(&tool_dir).unwrap();
        executable(&root.join("qtchooser"));
        executable(&tool_dir.join("qmake"));
        std::os::unix::fs::symlink(root.join("qtchooser"), path_dir.join("qmake")).unwrap();

        let env_output = format!("QTTOOLDIR=\"{tool_dir}\"\n");
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _, _| program.as_str().ends_with("qtchooser") && args == ["-print-env"])
            .times(1)
            .returning(move |_, _, _, _| {
                Ok(ProcessOutput {
                    stdout: env_output.clone().into_bytes(),
                    stderr: String::new(),
                })
            });

        let scanner = PathScanner::new(Arc::new(runner), Duration::from_secs(1));
        let tool = scanner.find_tool_in(Some(path_dir.as_std_path().as_os_str().to_owned())).await;
        assert_eq!(tool, Some(tool_dir.join("qmake")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_configured_search_path() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        executable(&root.join("qmake"));

        let scanner = PathScanner::new(Arc::new(MockProcessRunner::new()), Duration::from_secs(1))
            .with_search_path(root.as_std_path().as_os_str());
        assert_eq!(scanner.find_tool().await, Some(root.join("qmake")));
    }

    #[tokio::test]
    async fn test_no_path_variable() {
        let scanner = PathScanner::new(Arc::new(MockProcessRunner::new()), Duration::from_secs(1));
        assert_eq!(scanner.find_tool_in(None).await, None);
    }
}
