//! Filesystem-event driver: debounced index/remove callbacks for dynamic
//! roots, with recursive subtree mounting (§4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::fileid::file_doc_id;
use crate::indexer::Indexer;

/// Case-insensitive extension match tolerating a leading dot on either side
/// (§4.6). An empty allow-list matches everything.
pub fn extension_allowed(path: &Path, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let ext = match path.extension() {
        Some(e) => e.to_string_lossy().to_lowercase(),
        None => return false,
    };
    allowed
        .iter()
        .any(|a| a.trim_start_matches('.').to_lowercase() == ext)
}

struct SharedState {
    notify_watcher: RecommendedWatcher,
    /// root -> every subdirectory actually mounted on the notifier for it
    /// (recursive walk result), so `remove_directory` can unmount precisely.
    mounted_roots: HashMap<PathBuf, Vec<PathBuf>>,
    /// per-path debounce cancellation handle; dropping the sender cancels
    /// the outstanding timer (§4.6, §5 ordering guarantee).
    pending: HashMap<PathBuf, oneshot::Sender<()>>,
    stopped: bool,
}

/// Debounced, dynamic-root filesystem watcher. One background task per
/// instance drains notify events; every potential-index event is gated by a
/// per-path debounce timer before the callback fires (§4.6, §5).
pub struct Watcher {
    indexer: Arc<Indexer>,
    allowed_extensions: Vec<String>,
    debounce: Duration,
    recursive: bool,
    state: Arc<SyncMutex<SharedState>>,
    event_loop: SyncMutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    pub fn new(
        indexer: Arc<Indexer>,
        allowed_extensions: Vec<String>,
        debounce_ms: u64,
        recursive: bool,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(1024);

        let notify_watcher = notify::recommended_watcher(move |res| {
            // Invoked from notify's own background thread, never inside the
            // tokio runtime, so a blocking send is safe here.
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| crate::error::Error::backend(format!("watcher init failed: {e}")))?;

        let state = Arc::new(SyncMutex::new(SharedState {
            notify_watcher,
            mounted_roots: HashMap::new(),
            pending: HashMap::new(),
            stopped: false,
        }));

        let watcher = Self {
            indexer,
            allowed_extensions,
            debounce: Duration::from_millis(debounce_ms),
            recursive,
            state: state.clone(),
            event_loop: SyncMutex::new(None),
        };

        let loop_indexer = watcher.indexer.clone();
        let loop_extensions = watcher.allowed_extensions.clone();
        let loop_debounce = watcher.debounce;
        let loop_recursive = watcher.recursive;
        let loop_state = state.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Ok(event) => {
                        handle_event(
                            &loop_indexer,
                            &loop_extensions,
                            loop_debounce,
                            loop_recursive,
                            &loop_state,
                            event,
                        );
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher notifier error");
                    }
                }
            }
        });
        *watcher.event_loop.lock() = Some(handle);

        Ok(watcher)
    }

    /// Mount `root` (and, if `recursive`, every subdirectory) onto the
    /// notifier, recording what was mounted so it can be unmounted later. If
    /// `sync` is true, existing files under `root` are indexed immediately.
    pub fn add_directory(&self, root: &Path, sync: bool) -> Result<()> {
        let root = root.canonicalize().map_err(crate::error::Error::from)?;
        let mut mounted = Vec::new();
        {
            let mut state = self.state.lock();
            mount_subtree(&mut state.notify_watcher, &root, self.recursive, &mut mounted)?;
            state.mounted_roots.insert(root.clone(), mounted.clone());
        }

        if sync {
            self.indexer.index_directory(&root, Some(&self.allowed_extensions))?;
        }
        Ok(())
    }

    /// Unmount every subdirectory previously recorded for `root`.
    pub fn remove_directory(&self, root: &Path) -> Result<()> {
        let root = root
            .canonicalize()
            .unwrap_or_else(|_| root.to_path_buf());
        let mut state = self.state.lock();
        if let Some(dirs) = state.mounted_roots.remove(&root) {
            for dir in dirs {
                let _ = state.notify_watcher.unwatch(&dir);
            }
        }
        Ok(())
    }

    pub fn list_directories(&self) -> Vec<PathBuf> {
        self.state.lock().mounted_roots.keys().cloned().collect()
    }

    /// Idempotent. Cancels every outstanding debounce timer before releasing
    /// the notifier (§4.6).
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.stopped {
            return Ok(());
        }
        state.stopped = true;
        for (_, cancel) in state.pending.drain() {
            let _ = cancel.send(());
        }
        for dirs in state.mounted_roots.values() {
            for dir in dirs {
                let _ = state.notify_watcher.unwatch(dir);
            }
        }
        state.mounted_roots.clear();
        drop(state);

        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Recursively walk `root`, watching every directory (non-recursively, since
/// mounted subdirectories are tracked explicitly for precise unmount) and
/// recording each in `mounted`.
fn mount_subtree(
    notify_watcher: &mut RecommendedWatcher,
    root: &Path,
    recursive: bool,
    mounted: &mut Vec<PathBuf>,
) -> Result<()> {
    notify_watcher
        .watch(root, RecursiveMode::NonRecursive)
        .map_err(|e| crate::error::Error::backend(format!("failed to watch {}: {e}", root.display())))?;
    mounted.push(root.to_path_buf());

    if !recursive {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            if notify_watcher
                .watch(entry.path(), RecursiveMode::NonRecursive)
                .is_ok()
            {
                mounted.push(entry.path().to_path_buf());
            }
        }
    }
    Ok(())
}

fn handle_event(
    indexer: &Arc<Indexer>,
    allowed_extensions: &[String],
    debounce: Duration,
    recursive: bool,
    state: &Arc<SyncMutex<SharedState>>,
    event: Event,
) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in event.paths {
                if path.is_dir() {
                    mount_new_directory(indexer, allowed_extensions, recursive, state, &path);
                    continue;
                }
                if extension_allowed(&path, allowed_extensions) {
                    schedule_index(indexer, debounce, state, path);
                }
            }
        }
        EventKind::Remove(_) => {
            for path in event.paths {
                cancel_pending(state, &path);
                if extension_allowed(&path, allowed_extensions) {
                    let doc_id = file_doc_id(&path);
                    if let Err(err) = indexer.delete_document(&doc_id) {
                        tracing::warn!(path = %path.display(), error = %err, "failed to remove document");
                    }
                }
            }
        }
        _ => {}
    }
}

/// A newly observed directory is mounted on the fly: subtree walked, each
/// subdirectory added to the notifier, and existing files sync-indexed
/// (§4.6).
fn mount_new_directory(
    indexer: &Arc<Indexer>,
    allowed_extensions: &[String],
    recursive: bool,
    state: &Arc<SyncMutex<SharedState>>,
    path: &Path,
) {
    let mut mounted = Vec::new();
    {
        let mut guard = state.lock();
        if guard.stopped {
            return;
        }
        if mount_subtree(&mut guard.notify_watcher, path, recursive, &mut mounted).is_err() {
            return;
        }
        guard.mounted_roots.entry(path.to_path_buf()).or_default().extend(mounted);
    }
    if let Err(err) = indexer.index_directory(path, Some(allowed_extensions)) {
        tracing::warn!(path = %path.display(), error = %err, "failed to sync-index new directory");
    }
}

fn cancel_pending(state: &Arc<SyncMutex<SharedState>>, path: &Path) {
    if let Some(cancel) = state.lock().pending.remove(path) {
        let _ = cancel.send(());
    }
}

/// Reset the per-path debounce timer; when it elapses uncancelled, fire the
/// index callback and discard the timer (§4.6, §5 at-most-one-in-flight).
fn schedule_index(indexer: &Arc<Indexer>, debounce: Duration, state: &Arc<SyncMutex<SharedState>>, path: PathBuf) {
    cancel_pending(state, &path);

    let (cancel_tx, cancel_rx) = oneshot::channel();
    {
        let mut guard = state.lock();
        if guard.stopped {
            return;
        }
        guard.pending.insert(path.clone(), cancel_tx);
    }

    let indexer = indexer.clone();
    let state = state.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(debounce) => {
                state.lock().pending.remove(&path);
                if let Err(err) = indexer.index_file(&path, None) {
                    tracing::warn!(path = %path.display(), error = %err, "failed to index file");
                }
            }
            _ = cancel_rx => {
                // superseded by a newer event, or the watcher stopped
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_allowed_is_case_insensitive_and_dot_tolerant() {
        assert!(extension_allowed(Path::new("report.TXT"), &["txt".to_string()]));
        assert!(extension_allowed(Path::new("report.txt"), &[".txt".to_string()]));
        assert!(!extension_allowed(Path::new("report.pdf"), &["txt".to_string()]));
    }

    #[test]
    fn empty_allow_list_matches_everything() {
        assert!(extension_allowed(Path::new("anything.bin"), &[]));
    }

    #[test]
    fn no_extension_is_rejected_by_nonempty_allow_list() {
        assert!(!extension_allowed(Path::new("Makefile"), &["txt".to_string()]));
    }

    #[tokio::test]
    async fn add_and_remove_directory_tracks_mounts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let storage = Arc::new(crate::storage::SqliteStorage::open_in_memory().unwrap());
        let vector_index = Arc::new(crate::vector_index::BruteForceIndex::new(8));
        let kw_dir = tempfile::tempdir().unwrap();
        let keyword_index = Arc::new(crate::keyword_index::TantivyKeywordIndex::open(kw_dir.path()).unwrap());
        let embedder = Arc::new(crate::embeddings::HashEmbedder::new(8));
        let extractor = Arc::new(crate::extract::PlainTextExtractor);
        let indexer = Arc::new(Indexer::new(
            storage,
            vector_index,
            keyword_index,
            embedder,
            extractor,
            200,
            50,
        ));

        let watcher = Watcher::new(indexer, vec!["txt".to_string()], 50, true).unwrap();
        watcher.add_directory(dir.path(), false).unwrap();
        assert_eq!(watcher.list_directories().len(), 1);

        watcher.remove_directory(dir.path()).unwrap();
        assert!(watcher.list_directories().is_empty());

        watcher.stop().unwrap();
        watcher.stop().unwrap(); // idempotent
    }
}
