//! Editor file I/O against the backend workspace.

use std::sync::Arc;

use agent_bridge::{AgentBackend, BackendError};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::store::{FileSource, NoticeLevel, StoreHandle};

/// Reads `path` from the backend into an already-open editor file.
///
/// Returns whether the content was applied; local edits survive unless `force`.
pub(crate) async fn load_file_into_store(
    store: &StoreHandle,
    backend: &dyn AgentBackend,
    path: &str,
    force: bool,
) -> Result<bool, BackendError> {
    let content = backend.read_workspace_file(path).await?;
    let applied = store.update(|store| store.editor_mut().set_loaded_content(path, content, force));
    if !applied {
        debug!(path, "loaded content not applied; file closed or locally modified");
    }
    Ok(applied)
}

pub struct EditorWorkspace {
    store: StoreHandle,
    backend: Arc<dyn AgentBackend>,
}

impl EditorWorkspace {
    #[must_use]
    pub fn new(store: StoreHandle, backend: Arc<dyn AgentBackend>) -> Self {
        Self { store, backend }
    }

    /// Opens `path` as a user file and loads it if it has no content yet.
    pub async fn open(&self, path: &str) -> Result<usize, SessionError> {
        let (index, needs_load) = self.store.update(|store| {
            let editor = store.editor_mut();
            let index = editor.open_file(path, FileSource::User);
            (index, editor.files()[index].content().is_none())
        });

        if needs_load {
            self.load(path, false).await?;
        }

        Ok(index)
    }

    pub async fn load(&self, path: &str, force: bool) -> Result<bool, SessionError> {
        match load_file_into_store(&self.store, self.backend.as_ref(), path, force).await {
            Ok(applied) => Ok(applied),
            Err(error) => {
                warn!(path, %error, "failed to read workspace file");
                self.store.update(|store| {
                    store.push_notice(
                        NoticeLevel::Error,
                        format!("Failed to open {path}: {}", error.message()),
                    );
                });
                Err(SessionError::backend("read_workspace_file", error))
            }
        }
    }

    /// Writes the file at `index` back to the workspace.
    ///
    /// Returns false when the file has no loaded content. The modified flag is
    /// only cleared if the content did not change while the write was in flight.
    pub async fn save(&self, index: usize) -> Result<bool, SessionError> {
        let file = self.store.read(|store| {
            store
                .editor()
                .files()
                .get(index)
                .map(|file| (file.path().to_string(), file.content().map(str::to_string)))
        });
        let Some((path, content)) = file else {
            return Err(SessionError::NoSuchFile(index));
        };
        let Some(content) = content else {
            debug!(%path, "nothing loaded; skipping save");
            return Ok(false);
        };

        if let Err(error) = self.backend.save_workspace_file(&path, &content).await {
            warn!(%path, %error, "failed to save workspace file");
            self.store.update(|store| {
                store.push_notice(
                    NoticeLevel::Error,
                    format!("Failed to save {path}: {}", error.message()),
                );
            });
            return Err(SessionError::backend("save_workspace_file", error));
        }

        self.store.update(|store| {
            let editor = store.editor_mut();
            let unchanged = editor
                .file(&path)
                .is_some_and(|file| file.content() == Some(content.as_str()));
            if let (true, Some(current)) = (unchanged, editor.find(&path)) {
                editor.mark_file_saved(current);
            }
        });

        Ok(true)
    }
}
