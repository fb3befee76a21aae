use agent_bridge::{UpdateError, UpdateInfo, UpdateProgress};

/// Where the application update flow stands, as shown in the update banner.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum UpdateStatus {
    #[default]
    Idle,
    Checking,
    UpToDate,
    Available(UpdateInfo),
    Downloading(Option<UpdateProgress>),
    ReadyToInstall,
    Installing,
    Failed(UpdateError),
}

impl UpdateStatus {
    /// A check, download or install is running.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Checking | Self::Downloading(_) | Self::Installing)
    }
}
