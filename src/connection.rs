//! Cloud/offline inference switch, including first-run asset downloads.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use agent_bridge::{
    AgentBackend, BackendError, BackendEvent, ConnectionMode, DownloadProgress, DownloadState,
    GpuInfo, ModelLoadOutcome, SetupCheck, SETUP_EVENTS,
};
use prefs_store::PrefsStore;
use tracing::{debug, info, warn};

use crate::channel::{EventChannel, TypedHandler};
use crate::error::SessionError;
use crate::lock_unpoisoned;
use crate::store::{NoticeLevel, SetupStatus, StoreHandle};
use crate::watchdog::DeadlineTimer;

/// Preferences shared between the session facade and the mode switch.
pub type SharedPrefs = Arc<Mutex<PrefsStore>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SwitchPhase {
    #[default]
    Idle,
    CheckingSetup,
    SetupRequired,
    ConfirmingSwitch,
    Switching,
    DownloadingBinaries,
    DownloadingModel,
    Complete,
}

impl SwitchPhase {
    /// Phases with a backend call or model load in flight. `dismiss` and new
    /// switch requests are refused while busy.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::CheckingSetup
                | Self::Switching
                | Self::DownloadingBinaries
                | Self::DownloadingModel
        )
    }

    #[must_use]
    pub fn is_downloading(self) -> bool {
        matches!(self, Self::DownloadingBinaries | Self::DownloadingModel)
    }
}

/// One step of the offline asset download sequence, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStep {
    Binaries,
    Model,
}

impl DownloadStep {
    /// Step name as reported in `download-progress` payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binaries => "binaries",
            Self::Model => "model",
        }
    }

    fn phase(self) -> SwitchPhase {
        match self {
            Self::Binaries => SwitchPhase::DownloadingBinaries,
            Self::Model => SwitchPhase::DownloadingModel,
        }
    }

    fn setup_status(self) -> SetupStatus {
        match self {
            Self::Binaries => SetupStatus::DownloadingBinaries,
            Self::Model => SetupStatus::DownloadingModel,
        }
    }

    fn next_missing(check: SetupCheck) -> Option<Self> {
        if !check.binaries_ok {
            Some(Self::Binaries)
        } else if !check.model_ok {
            Some(Self::Model)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct SwitchState {
    phase: SwitchPhase,
    target: Option<ConnectionMode>,
    previous_mode: ConnectionMode,
    missing: SetupCheck,
    parked: Option<DownloadStep>,
    pause_requested: bool,
    /// Bumped by `cancel_download`; download calls from an older epoch are ignored.
    epoch: u64,
}

impl Default for SwitchState {
    fn default() -> Self {
        Self {
            phase: SwitchPhase::Idle,
            target: None,
            previous_mode: ConnectionMode::default(),
            missing: SetupCheck {
                binaries_ok: true,
                model_ok: true,
            },
            parked: None,
            pause_requested: false,
            epoch: 0,
        }
    }
}

pub struct ConnectionSwitch {
    store: StoreHandle,
    backend: Arc<dyn AgentBackend>,
    channel: EventChannel,
    prefs: Option<SharedPrefs>,
    state: Mutex<SwitchState>,
    /// Bounds how long a confirmed switch may sit in [`SwitchPhase::Switching`].
    switch_timer: DeadlineTimer,
}

impl ConnectionSwitch {
    pub fn new(
        store: StoreHandle,
        backend: Arc<dyn AgentBackend>,
        channel: EventChannel,
        prefs: Option<SharedPrefs>,
        switch_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            channel,
            prefs,
            state: Mutex::new(SwitchState::default()),
            switch_timer: DeadlineTimer::new(switch_timeout),
        })
    }

    #[must_use]
    pub fn phase(&self) -> SwitchPhase {
        lock_unpoisoned(&self.state).phase
    }

    /// Mode requested by the switch in progress, if any.
    #[must_use]
    pub fn target(&self) -> Option<ConnectionMode> {
        lock_unpoisoned(&self.state).target
    }

    /// Download step waiting for `resume_download`.
    #[must_use]
    pub fn parked_step(&self) -> Option<DownloadStep> {
        lock_unpoisoned(&self.state).parked
    }

    pub async fn attach(self: &Arc<Self>) -> usize {
        let switch: Weak<Self> = Arc::downgrade(self);
        let handler: TypedHandler = Arc::new(move |event| {
            if let Some(switch) = switch.upgrade() {
                switch.apply(event);
            }
        });

        self.channel.subscribe_all(SETUP_EVENTS, handler).await
    }

    pub fn apply(&self, event: BackendEvent) {
        if !self.channel.is_alive() {
            debug!("mode switch torn down; dropping event");
            return;
        }

        match event {
            BackendEvent::ModelLoadProgress(percent) => {
                self.store.update(|store| {
                    store.connection_mut().set_model_load_progress(Some(percent));
                });
            }
            BackendEvent::ModelLoadComplete(outcome) => self.on_model_load_complete(outcome),
            BackendEvent::ModelLoadError(message) => self.on_model_load_error(&message),
            BackendEvent::ConnectionModeChanged(mode) => self.on_mode_changed(mode),
            BackendEvent::DownloadProgress(progress) => {
                if !self.phase().is_downloading() {
                    debug!(
                        step = %progress.step,
                        "download progress outside a download; ignoring"
                    );
                    return;
                }
                self.store.update(|store| {
                    store.connection_mut().set_download_progress(Some(progress));
                });
            }
            BackendEvent::SetupComplete => {
                self.store.update(|store| {
                    store.connection_mut().set_setup_status(SetupStatus::Complete);
                });
            }
            BackendEvent::AppReady => {
                info!("backend ready");
                self.store.update(|store| store.set_backend_ready(true));
            }
            other => debug!(event = ?other, "not a setup event; ignoring"),
        }
    }

    /// Starts a switch to `target` and returns the phase it settled in.
    ///
    /// Cloud goes straight to confirmation. Offline first checks local assets;
    /// when something is missing the GPU is detected and the phase becomes
    /// [`SwitchPhase::SetupRequired`]. Requests made while busy are ignored.
    pub async fn request_switch(
        &self,
        target: ConnectionMode,
    ) -> Result<SwitchPhase, SessionError> {
        let current = self.store.read(|store| store.connection().mode());
        {
            let mut state = lock_unpoisoned(&self.state);
            if state.phase.is_busy() {
                debug!(
                    phase = ?state.phase,
                    %target,
                    "switch already in progress; ignoring request"
                );
                return Ok(state.phase);
            }
            if target == current {
                state.phase = SwitchPhase::Idle;
                state.target = None;
                return Ok(SwitchPhase::Idle);
            }

            state.target = Some(target);
            state.previous_mode = current;
            state.parked = None;
            state.phase = match target {
                ConnectionMode::Cloud => SwitchPhase::ConfirmingSwitch,
                ConnectionMode::Offline => SwitchPhase::CheckingSetup,
            };
            if target == ConnectionMode::Cloud {
                return Ok(SwitchPhase::ConfirmingSwitch);
            }
        }

        let check = match self.backend.check_setup_status().await {
            Ok(check) => check,
            Err(error) => {
                warn!(%error, "setup status check failed");
                self.reset_to_idle();
                self.notify(
                    NoticeLevel::Error,
                    format!("Failed to check setup: {}", error.message()),
                );
                return Err(SessionError::backend("check_setup_status", error));
            }
        };

        if check.is_complete() {
            self.store.update(|store| {
                store.connection_mut().set_setup_status(SetupStatus::Complete);
            });
            return Ok(self.set_phase(SwitchPhase::ConfirmingSwitch));
        }

        info!(
            binaries_ok = check.binaries_ok,
            model_ok = check.model_ok,
            "offline setup required"
        );
        {
            let mut state = lock_unpoisoned(&self.state);
            state.missing = check;
            state.phase = SwitchPhase::SetupRequired;
        }
        self.store.update(|store| {
            store.connection_mut().set_setup_status(SetupStatus::NeedsSetup);
        });

        let gpu = match self.backend.detect_gpu().await {
            Ok(gpu) => gpu,
            Err(error) => {
                warn!(%error, "gpu detection failed; assuming cpu");
                GpuInfo::cpu_fallback()
            }
        };
        self.store.update(|store| store.connection_mut().set_detected_gpu(Some(gpu)));

        Ok(self.phase())
    }

    /// Performs the confirmed switch. Returns false when nothing was awaiting
    /// confirmation.
    ///
    /// Completion arrives later as `connection-mode-changed` for the target or
    /// `model-load-complete`. A rejected call reverts to idle, and a switch
    /// that hears nothing back within the switch timeout is abandoned.
    pub async fn confirm(self: &Arc<Self>) -> Result<bool, SessionError> {
        let target = {
            let mut state = lock_unpoisoned(&self.state);
            let (SwitchPhase::ConfirmingSwitch, Some(target)) = (state.phase, state.target) else {
                return Ok(false);
            };
            state.phase = SwitchPhase::Switching;
            target
        };

        info!(%target, "switching connection mode");
        self.store.update(|store| {
            store.connection_mut().set_model_load_progress(Some(0));
        });
        self.arm_switch_timer();

        if let Err(error) = self.backend.set_connection_mode(target).await {
            warn!(%target, %error, "connection mode switch rejected");
            let reverted = {
                let mut state = lock_unpoisoned(&self.state);
                let reverted = state.phase == SwitchPhase::Switching;
                if reverted {
                    state.phase = SwitchPhase::Idle;
                    state.target = None;
                    self.switch_timer.disarm();
                }
                reverted
            };
            self.store.update(|store| {
                store.connection_mut().set_model_load_progress(None);
                if reverted {
                    store.push_notice(
                        NoticeLevel::Error,
                        format!("Failed to switch to {target} mode: {}", error.message()),
                    );
                }
            });
            return Err(SessionError::backend("set_connection_mode", error));
        }

        Ok(true)
    }

    /// Downloads the missing offline assets in order, then confirms the switch.
    ///
    /// Returns true once the switch has been issued, false when nothing was
    /// awaiting setup or the sequence was paused or cancelled midway.
    pub async fn run_setup(self: &Arc<Self>) -> Result<bool, SessionError> {
        let epoch = {
            let state = lock_unpoisoned(&self.state);
            if state.phase != SwitchPhase::SetupRequired {
                return Ok(false);
            }
            state.epoch
        };

        self.drive_downloads(epoch).await
    }

    /// Asks the backend to pause the running download.
    pub async fn pause_download(&self) -> Result<bool, SessionError> {
        {
            let mut state = lock_unpoisoned(&self.state);
            if !state.phase.is_downloading() || state.parked.is_some() {
                return Ok(false);
            }
            state.pause_requested = true;
        }

        if let Err(error) = self.backend.pause_download().await {
            lock_unpoisoned(&self.state).pause_requested = false;
            warn!(%error, "pause download failed");
            self.notify(
                NoticeLevel::Error,
                format!("Failed to pause download: {}", error.message()),
            );
            return Err(SessionError::backend("pause_download", error));
        }

        self.store.update(|store| {
            store.connection_mut().set_download_state(DownloadState::Paused);
        });
        Ok(true)
    }

    /// Resumes a paused download and re-issues the parked step.
    pub async fn resume_download(self: &Arc<Self>) -> Result<bool, SessionError> {
        let (step, epoch) = {
            let state = lock_unpoisoned(&self.state);
            match state.parked {
                Some(step) => (step, state.epoch),
                None => return Ok(false),
            }
        };

        let downloaded = match self.backend.resume_download().await {
            Ok(downloaded) => downloaded,
            Err(error) => {
                warn!(%error, "resume download failed");
                self.notify(
                    NoticeLevel::Error,
                    format!("Failed to resume download: {}", error.message()),
                );
                return Err(SessionError::backend("resume_download", error));
            }
        };

        {
            let mut state = lock_unpoisoned(&self.state);
            if state.epoch != epoch {
                return Ok(false);
            }
            state.parked = None;
            state.pause_requested = false;
        }
        info!(step = step.as_str(), downloaded, "resuming download");
        self.store.update(|store| {
            store.connection_mut().set_download_state(DownloadState::Resuming);
        });

        self.drive_downloads(epoch).await
    }

    /// Abandons the download sequence and returns to [`SwitchPhase::SetupRequired`].
    pub async fn cancel_download(&self) -> Result<bool, SessionError> {
        {
            let mut state = lock_unpoisoned(&self.state);
            if !state.phase.is_downloading() {
                return Ok(false);
            }
            state.epoch += 1;
            state.parked = None;
            state.pause_requested = false;
            state.phase = SwitchPhase::SetupRequired;
        }
        self.store.update(|store| {
            let connection = store.connection_mut();
            connection.set_setup_status(SetupStatus::NeedsSetup);
            connection.set_download_progress(None);
        });

        if let Err(error) = self.backend.cancel_download().await {
            warn!(%error, "cancel download failed");
            self.notify(
                NoticeLevel::Error,
                format!("Failed to cancel download: {}", error.message()),
            );
            return Err(SessionError::backend("cancel_download", error));
        }

        Ok(true)
    }

    /// Leaves any non-busy phase without switching.
    pub fn dismiss(&self) -> bool {
        let mut state = lock_unpoisoned(&self.state);
        if state.phase.is_busy() {
            return false;
        }
        state.phase = SwitchPhase::Idle;
        state.target = None;
        state.parked = None;
        true
    }

    pub fn teardown(&self) -> usize {
        self.switch_timer.disarm();
        self.channel.close()
    }

    /// True while a confirmed switch is waiting on the backend under a deadline.
    #[must_use]
    pub fn switch_timer_armed(&self) -> bool {
        self.switch_timer.is_armed()
    }

    async fn drive_downloads(self: &Arc<Self>, epoch: u64) -> Result<bool, SessionError> {
        loop {
            let step = {
                let mut state = lock_unpoisoned(&self.state);
                if state.epoch != epoch {
                    return Ok(false);
                }
                let Some(step) = DownloadStep::next_missing(state.missing) else {
                    break;
                };
                state.phase = step.phase();
                state.pause_requested = false;
                step
            };

            let gpu_type = self.store.update(|store| {
                let connection = store.connection_mut();
                connection.set_setup_status(step.setup_status());
                let resuming = connection
                    .download_progress()
                    .is_some_and(|progress| progress.step == step.as_str());
                if !resuming {
                    let starting = DownloadProgress::starting(step.as_str());
                    connection.set_download_progress(Some(starting));
                }
                connection.detected_gpu().map_or_else(
                    || GpuInfo::cpu_fallback().gpu_type,
                    |gpu| gpu.gpu_type.clone(),
                )
            });

            info!(step = step.as_str(), "downloading offline assets");
            let result = match step {
                DownloadStep::Binaries => self.backend.download_binaries(&gpu_type).await,
                DownloadStep::Model => self.backend.download_model().await,
            };

            match result {
                Ok(()) => {
                    let mut state = lock_unpoisoned(&self.state);
                    if state.epoch != epoch {
                        return Ok(false);
                    }
                    match step {
                        DownloadStep::Binaries => state.missing.binaries_ok = true,
                        DownloadStep::Model => state.missing.model_ok = true,
                    }
                }
                Err(error) => return self.on_download_failed(step, epoch, error),
            }
        }

        {
            let mut state = lock_unpoisoned(&self.state);
            state.phase = SwitchPhase::ConfirmingSwitch;
        }
        self.store.update(|store| {
            let connection = store.connection_mut();
            connection.set_setup_status(SetupStatus::Complete);
            connection.set_download_progress(None);
        });
        info!("offline assets ready");

        self.confirm().await
    }

    fn on_download_failed(
        &self,
        step: DownloadStep,
        epoch: u64,
        error: BackendError,
    ) -> Result<bool, SessionError> {
        let paused_tag = self.store.read(|store| {
            store.connection().download_state() == Some(DownloadState::Paused)
        });
        {
            let mut state = lock_unpoisoned(&self.state);
            if state.epoch != epoch {
                debug!(
                    step = step.as_str(),
                    "download from a cancelled sequence returned; ignoring"
                );
                return Ok(false);
            }
            if state.pause_requested || paused_tag {
                info!(step = step.as_str(), "download paused; parking step");
                state.parked = Some(step);
                return Ok(false);
            }
            state.phase = SwitchPhase::SetupRequired;
            state.parked = None;
        }

        warn!(step = step.as_str(), %error, "download failed");
        self.store.update(|store| {
            let connection = store.connection_mut();
            connection.set_setup_status(SetupStatus::NeedsSetup);
            connection.set_download_progress(None);
            store.push_notice(
                NoticeLevel::Error,
                format!("Failed to download {}: {}", step.as_str(), error.message()),
            );
        });

        let operation = match step {
            DownloadStep::Binaries => "download_binaries",
            DownloadStep::Model => "download_model",
        };
        Err(SessionError::backend(operation, error))
    }

    /// Moves a pending switch to [`SwitchPhase::Complete`] and returns its
    /// target. With `reported` set, only a switch towards that mode finishes.
    fn finish_switch(&self, reported: Option<ConnectionMode>) -> Option<ConnectionMode> {
        let mut state = lock_unpoisoned(&self.state);
        if state.phase != SwitchPhase::Switching {
            return None;
        }
        if reported.is_some() && reported != state.target {
            return None;
        }

        state.phase = SwitchPhase::Complete;
        self.switch_timer.disarm();
        state.target.take()
    }

    fn on_mode_changed(&self, mode: ConnectionMode) {
        info!(%mode, "backend connection mode changed");
        let finished = self.finish_switch(Some(mode));

        self.store.update(|store| {
            store.connection_mut().set_mode(mode);
            if finished.is_some() {
                store.connection_mut().set_model_load_progress(None);
                store.push_notice(NoticeLevel::Info, format!("Switched to {mode} mode"));
            }
        });

        if finished.is_some() {
            info!(%mode, "connection mode switch complete");
            self.persist_default_mode(mode);
        }
    }

    fn on_model_load_complete(&self, outcome: ModelLoadOutcome) {
        let finished = self.finish_switch(None);

        self.store.update(|store| {
            let connection = store.connection_mut();
            connection.set_model_loaded(outcome == ModelLoadOutcome::Loaded);
            connection.set_model_load_progress(None);
            if let Some(mode) = finished {
                connection.set_mode(mode);
                store.push_notice(NoticeLevel::Info, format!("Switched to {mode} mode"));
            }
        });

        if let Some(mode) = finished {
            info!(%mode, "connection mode switch complete");
            self.persist_default_mode(mode);
        }
    }

    fn arm_switch_timer(self: &Arc<Self>) {
        let switch: Weak<Self> = Arc::downgrade(self);
        self.switch_timer.arm(move |generation| {
            if let Some(switch) = switch.upgrade() {
                switch.on_switch_timeout(generation);
            }
        });
    }

    fn on_switch_timeout(&self, generation: u64) {
        if !self.channel.is_alive() || !self.switch_timer.claim(generation) {
            return;
        }

        let abandoned = {
            let mut state = lock_unpoisoned(&self.state);
            if state.phase != SwitchPhase::Switching {
                return;
            }
            state.phase = SwitchPhase::Idle;
            state.target.take()
        };

        let Some(target) = abandoned else {
            return;
        };
        warn!(%target, "connection mode switch timed out");
        self.store.update(|store| {
            store.connection_mut().set_model_load_progress(None);
            store.push_notice(
                NoticeLevel::Warning,
                format!("Switching to {target} mode timed out"),
            );
        });
    }

    fn on_model_load_error(&self, message: &str) {
        let reverted = {
            let mut state = lock_unpoisoned(&self.state);
            if state.phase == SwitchPhase::Switching {
                state.phase = SwitchPhase::Idle;
                state.target = None;
                self.switch_timer.disarm();
                Some(state.previous_mode)
            } else {
                None
            }
        };

        warn!(error = message, reverted = reverted.is_some(), "model load failed");
        self.store.update(|store| {
            let connection = store.connection_mut();
            connection.set_model_loaded(false);
            connection.set_model_load_progress(None);
            if let Some(previous) = reverted {
                connection.set_mode(previous);
            }
            store.push_notice(NoticeLevel::Error, format!("Model failed to load: {message}"));
        });
    }

    fn persist_default_mode(&self, mode: ConnectionMode) {
        let Some(prefs) = &self.prefs else {
            return;
        };

        let mut prefs = lock_unpoisoned(prefs);
        prefs.set_default_connection_mode(mode);
        if let Err(error) = prefs.save() {
            warn!(%error, "failed to persist default connection mode");
            drop(prefs);
            self.notify(NoticeLevel::Warning, format!("Could not save mode preference: {error}"));
        }
    }

    fn set_phase(&self, phase: SwitchPhase) -> SwitchPhase {
        lock_unpoisoned(&self.state).phase = phase;
        phase
    }

    fn reset_to_idle(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.phase = SwitchPhase::Idle;
        state.target = None;
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        self.store.update(|store| store.push_notice(level, message));
    }
}
