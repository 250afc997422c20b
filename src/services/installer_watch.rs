//! Debounced watch on the installer-managed settings file.
//!
//! Installers tend to rewrite the file several times in a row, so events are
//! coalesced: one [`InstallerChanged`] is emitted once the file has been quiet
//! for the debounce delay.

use camino::{Utf8Path, Utf8PathBuf};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The installer settings file changed and should be merged again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallerChanged;

/// Keeps the OS watch and the debounce task alive. Dropping it stops both.
pub struct InstallerWatcher {
    path: Utf8PathBuf,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl InstallerWatcher {
    /// Watch `path` (through its parent directory, so the file may not exist yet)
    /// and send one [`InstallerChanged`] per burst of changes.
    pub fn spawn(
        path: Utf8PathBuf,
        debounce: Duration,
        changes: mpsc::Sender<InstallerChanged>,
    ) -> notify::Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>(32);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.blocking_send(res);
        })?;

        let watch_dir = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."))
            .to_path_buf();
        std::fs::create_dir_all(&watch_dir).map_err(notify::Error::io)?;
        watcher.watch(watch_dir.as_std_path(), RecursiveMode::NonRecursive)?;

        let target = path.clone();
        let file_events = filter_events(raw_rx, target);
        let task = tokio::spawn(forward_debounced(file_events, changes, debounce));

        tracing::info!("Watching installer settings {} (debounce {:?})", path, debounce);
        Ok(Self {
            path,
            _watcher: watcher,
            task,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for InstallerWatcher {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!("Stopped watching {}", self.path);
    }
}

/// Keep only create/modify/remove events touching `target`.
fn filter_events(
    mut raw: mpsc::Receiver<notify::Result<Event>>,
    target: Utf8PathBuf,
) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(32);
    let file_name = target.file_name().map(str::to_string);

    tokio::spawn(async move {
        while let Some(res) = raw.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Installer watch error: {}", e);
                    continue;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }
            let touches_target = event.paths.iter().any(|p| {
                p == target.as_std_path()
                    || p.file_name().and_then(|n| n.to_str()) == file_name.as_deref()
            });
            if touches_target && tx.send(()).await.is_err() {
                break;
            }
        }
    });

    rx
}

/// Forward one notification per burst: after the first event, wait until no
/// further event arrives for `delay`.
pub async fn forward_debounced<T: Send>(
    mut events: mpsc::Receiver<T>,
    out: mpsc::Sender<InstallerChanged>,
    delay: Duration,
) {
    while events.recv().await.is_some() {
        loop {
            match tokio::time::timeout(delay, events.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    let _ = out.send(InstallerChanged).await;
                    return;
                }
                Err(_) => break,
            }
        }
        tracing::debug!("Installer settings settled, requesting re-merge");
        if out.send(InstallerChanged).await.is_err() {
            return;
        }
    }
}
