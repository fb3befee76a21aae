use agent_bridge::{ConnectionMode, DownloadProgress, DownloadState, GpuInfo};

/// Local asset provisioning status for offline mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetupStatus {
    #[default]
    Unset,
    NeedsSetup,
    DownloadingBinaries,
    DownloadingModel,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    mode: ConnectionMode,
    is_model_loaded: bool,
    model_load_progress: Option<u8>,
    setup_status: SetupStatus,
    download_progress: Option<DownloadProgress>,
    detected_gpu: Option<GpuInfo>,
}

impl ConnectionState {
    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    #[must_use]
    pub fn is_model_loaded(&self) -> bool {
        self.is_model_loaded
    }

    /// Percentage of an in-flight load or unload; `None` when nothing is loading.
    #[must_use]
    pub fn model_load_progress(&self) -> Option<u8> {
        self.model_load_progress
    }

    #[must_use]
    pub fn setup_status(&self) -> SetupStatus {
        self.setup_status
    }

    #[must_use]
    pub fn download_progress(&self) -> Option<&DownloadProgress> {
        self.download_progress.as_ref()
    }

    #[must_use]
    pub fn download_state(&self) -> Option<DownloadState> {
        self.download_progress.as_ref().map(|progress| progress.state)
    }

    #[must_use]
    pub fn detected_gpu(&self) -> Option<&GpuInfo> {
        self.detected_gpu.as_ref()
    }

    pub fn set_mode(&mut self, mode: ConnectionMode) {
        self.mode = mode;
    }

    pub fn set_model_loaded(&mut self, loaded: bool) {
        self.is_model_loaded = loaded;
    }

    pub fn set_model_load_progress(&mut self, progress: Option<u8>) {
        self.model_load_progress = progress.map(|percent| percent.min(100));
    }

    pub fn set_setup_status(&mut self, status: SetupStatus) {
        self.setup_status = status;
    }

    pub fn set_download_progress(&mut self, progress: Option<DownloadProgress>) {
        self.download_progress = progress;
    }

    /// Flips only the sub-state tag of the current download. Returns false
    /// when no download progress is tracked.
    pub fn set_download_state(&mut self, state: DownloadState) -> bool {
        match self.download_progress.as_mut() {
            Some(progress) => {
                progress.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_detected_gpu(&mut self, gpu: Option<GpuInfo>) {
        self.detected_gpu = gpu;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_state_flip_requires_tracked_progress() {
        let mut connection = ConnectionState::default();
        assert!(!connection.set_download_state(DownloadState::Paused));

        connection.set_download_progress(Some(DownloadProgress::starting("model")));
        assert!(connection.set_download_state(DownloadState::Paused));
        assert_eq!(connection.download_state(), Some(DownloadState::Paused));
        assert_eq!(
            connection.download_progress().map(|progress| progress.step.as_str()),
            Some("model")
        );
    }

    #[test]
    fn load_progress_is_clamped() {
        let mut connection = ConnectionState::default();
        connection.set_model_load_progress(Some(140));
        assert_eq!(connection.model_load_progress(), Some(100));
        connection.set_model_load_progress(None);
        assert_eq!(connection.model_load_progress(), None);
    }
}
