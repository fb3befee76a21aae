use std::sync::Arc;
use std::time::Duration;

use agent_bridge::{names, ConnectionMode, DownloadState, GpuInfo};
use agent_bridge_mock::{BackendCall, CallKind};
use assert_matches::assert_matches;
use ide_session::{DownloadStep, NoticeLevel, SessionConfig, SessionError, SetupStatus, SwitchPhase};
use pretty_assertions::assert_eq;
use prefs_store::{prefs_file, PrefsStore};
use serde_json::json;

mod support;

use support::{settle, Harness};

fn mode(harness: &Harness) -> ConnectionMode {
    harness.store().read(|store| store.connection().mode())
}

fn setup_status(harness: &Harness) -> SetupStatus {
    harness.store().read(|store| store.connection().setup_status())
}

fn model_loaded(harness: &Harness) -> bool {
    harness
        .store()
        .read(|store| store.connection().is_model_loaded())
}

fn load_progress(harness: &Harness) -> Option<u8> {
    harness
        .store()
        .read(|store| store.connection().model_load_progress())
}

#[tokio::test]
async fn cloud_switch_skips_the_setup_check() {
    let harness = Harness::start().await;
    harness.store().update(|store| {
        store.connection_mut().set_mode(ConnectionMode::Offline);
        store.connection_mut().set_model_loaded(true);
    });
    let switch = harness.session.connection();

    let phase = switch
        .request_switch(ConnectionMode::Cloud)
        .await
        .expect("request succeeds");
    assert_eq!(phase, SwitchPhase::ConfirmingSwitch);
    assert_eq!(harness.backend.call_count(CallKind::CheckSetupStatus), 0);

    assert!(switch.confirm().await.expect("confirm succeeds"));

    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert_eq!(mode(&harness), ConnectionMode::Cloud);
    assert_eq!(load_progress(&harness), None);
    assert!(!model_loaded(&harness));
    assert_eq!(
        harness.backend.calls(),
        vec![BackendCall::SetConnectionMode {
            mode: ConnectionMode::Cloud
        }]
    );
    assert_matches!(
        harness.notices().last(),
        Some(notice) if notice.level == NoticeLevel::Info
            && notice.message == "Switched to cloud mode"
    );
}

#[tokio::test]
async fn offline_switch_with_assets_present_loads_the_model() {
    let harness =
        Harness::start_with(SessionConfig::default(), |backend| backend.with_instant_model_load())
            .await;
    let switch = harness.session.connection();

    let phase = switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    assert_eq!(phase, SwitchPhase::ConfirmingSwitch);
    assert_eq!(setup_status(&harness), SetupStatus::Complete);
    assert_eq!(harness.backend.call_count(CallKind::DetectGpu), 0);

    assert!(switch.confirm().await.expect("confirm succeeds"));

    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert_eq!(mode(&harness), ConnectionMode::Offline);
    assert!(model_loaded(&harness));
    assert_eq!(load_progress(&harness), None);
    assert_eq!(switch.target(), None);
}

#[tokio::test]
async fn model_load_progress_is_tracked_until_completion() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend.without_mode_change_event()
    })
    .await;
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");

    assert!(switch.confirm().await.expect("confirm succeeds"));
    assert_eq!(switch.phase(), SwitchPhase::Switching);
    assert_eq!(load_progress(&harness), Some(5));
    assert!(switch.switch_timer_armed());

    harness.emit(names::MODEL_LOAD_PROGRESS, json!(64.4));
    assert_eq!(load_progress(&harness), Some(64));

    harness.emit(names::MODEL_LOAD_COMPLETE, json!(true));
    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert_eq!(load_progress(&harness), None);
    assert_eq!(mode(&harness), ConnectionMode::Offline);
    assert!(!switch.switch_timer_armed());
}

#[tokio::test]
async fn mode_changed_event_completes_the_switch() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = SessionConfig {
        config_dir: Some(dir.path().to_path_buf()),
        ..SessionConfig::default()
    };
    let harness = Harness::start_with(config, |backend| backend).await;
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");

    assert!(switch.confirm().await.expect("confirm succeeds"));

    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert_eq!(switch.target(), None);
    assert!(!switch.switch_timer_armed());
    assert_eq!(mode(&harness), ConnectionMode::Offline);
    assert_eq!(load_progress(&harness), None);
    assert!(!model_loaded(&harness));
    assert_matches!(
        harness.notices().last(),
        Some(notice) if notice.level == NoticeLevel::Info
            && notice.message == "Switched to offline mode"
    );
    let saved = PrefsStore::open(&prefs_file(dir.path())).expect("prefs written");
    assert_eq!(saved.default_connection_mode(), ConnectionMode::Offline);

    harness.emit(names::MODEL_LOAD_COMPLETE, json!(true));
    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert!(model_loaded(&harness));
}

#[tokio::test]
async fn mode_changed_for_another_mode_keeps_switching() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend.without_mode_change_event()
    })
    .await;
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    switch.confirm().await.expect("confirm succeeds");

    harness.emit(names::CONNECTION_MODE_CHANGED, json!("cloud"));

    assert_eq!(switch.phase(), SwitchPhase::Switching);
    assert_eq!(switch.target(), Some(ConnectionMode::Offline));
    assert!(switch.switch_timer_armed());
}

#[tokio::test(start_paused = true)]
async fn silent_backend_switch_times_out() {
    let config = SessionConfig {
        switch_timeout: Duration::from_secs(30),
        ..SessionConfig::default()
    };
    let harness = Harness::start_with(config, |backend| {
        backend.without_mode_change_event()
    })
    .await;
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    switch.confirm().await.expect("confirm succeeds");
    assert_eq!(switch.phase(), SwitchPhase::Switching);

    tokio::time::sleep(Duration::from_secs(29)).await;
    settle().await;
    assert_eq!(switch.phase(), SwitchPhase::Switching);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(switch.phase(), SwitchPhase::Idle);
    assert_eq!(switch.target(), None);
    assert!(!switch.switch_timer_armed());
    assert_eq!(load_progress(&harness), None);
    assert_eq!(mode(&harness), ConnectionMode::Cloud);
    assert_matches!(
        harness.notices().last(),
        Some(notice) if notice.level == NoticeLevel::Warning
            && notice.message == "Switching to offline mode timed out"
    );

    let phase = switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    assert_eq!(phase, SwitchPhase::ConfirmingSwitch);
}

#[tokio::test]
async fn model_load_error_reverts_to_the_previous_mode() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend.without_mode_change_event()
    })
    .await;
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    switch.confirm().await.expect("confirm succeeds");

    harness.emit(names::MODEL_LOAD_ERROR, json!("CUDA out of memory"));

    assert_eq!(switch.phase(), SwitchPhase::Idle);
    assert!(!switch.switch_timer_armed());
    assert_eq!(mode(&harness), ConnectionMode::Cloud);
    assert_eq!(load_progress(&harness), None);
    assert_matches!(
        harness.notices().last(),
        Some(notice) if notice.level == NoticeLevel::Error
            && notice.message.contains("CUDA out of memory")
    );
}

#[tokio::test]
async fn rejected_switch_returns_to_idle() {
    let harness = Harness::start().await;
    harness
        .backend
        .fail(CallKind::SetConnectionMode, "inference server busy");
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");

    let error = switch.confirm().await.expect_err("switch rejected");

    assert_eq!(error.backend_message(), Some("inference server busy"));
    assert_eq!(switch.phase(), SwitchPhase::Idle);
    assert_eq!(load_progress(&harness), None);
    assert_eq!(mode(&harness), ConnectionMode::Cloud);
    assert_matches!(
        harness.notices().last(),
        Some(notice) if notice.level == NoticeLevel::Error
    );
}

#[tokio::test]
async fn same_mode_request_does_nothing() {
    let harness = Harness::start().await;
    let switch = harness.session.connection();

    let phase = switch
        .request_switch(ConnectionMode::Cloud)
        .await
        .expect("request succeeds");

    assert_eq!(phase, SwitchPhase::Idle);
    assert!(!switch.confirm().await.expect("nothing to confirm"));
    assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn missing_assets_are_downloaded_before_switching() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend
            .with_setup_status(false, false)
            .with_instant_model_load()
    })
    .await;
    let switch = harness.session.connection();

    let phase = switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    assert_eq!(phase, SwitchPhase::SetupRequired);
    assert_eq!(setup_status(&harness), SetupStatus::NeedsSetup);
    assert_eq!(
        harness
            .store()
            .read(|store| store.connection().detected_gpu().map(|gpu| gpu.gpu_type.clone())),
        Some("nvidia".to_string())
    );

    assert!(switch.run_setup().await.expect("setup succeeds"));

    assert_eq!(
        harness.backend.calls(),
        vec![
            BackendCall::CheckSetupStatus,
            BackendCall::DetectGpu,
            BackendCall::DownloadBinaries {
                gpu_type: "nvidia".to_string()
            },
            BackendCall::DownloadModel,
            BackendCall::SetConnectionMode {
                mode: ConnectionMode::Offline
            },
        ]
    );
    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert_eq!(setup_status(&harness), SetupStatus::Complete);
    assert_eq!(mode(&harness), ConnectionMode::Offline);
    assert!(harness
        .store()
        .read(|store| store.connection().download_progress().is_none()));
}

#[tokio::test]
async fn failed_gpu_detection_falls_back_to_cpu_binaries() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend
            .with_setup_status(false, true)
            .with_instant_model_load()
    })
    .await;
    harness.backend.fail(CallKind::DetectGpu, "nvidia-smi not found");
    let switch = harness.session.connection();

    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("detection failure is not fatal");
    assert_eq!(
        harness
            .store()
            .read(|store| store.connection().detected_gpu().cloned()),
        Some(GpuInfo::cpu_fallback())
    );

    switch.run_setup().await.expect("setup succeeds");
    assert!(harness.backend.calls().contains(&BackendCall::DownloadBinaries {
        gpu_type: "cpu".to_string()
    }));
    assert_eq!(harness.backend.call_count(CallKind::DownloadModel), 0);
}

#[tokio::test]
async fn failed_download_returns_to_setup_required() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend.with_setup_status(false, false)
    })
    .await;
    harness
        .backend
        .fail(CallKind::DownloadBinaries, "No space left on device");
    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");

    let error = switch.run_setup().await.expect_err("download fails");

    assert_matches!(error, SessionError::Backend { operation: "download_binaries", .. });
    assert_eq!(switch.phase(), SwitchPhase::SetupRequired);
    assert_eq!(setup_status(&harness), SetupStatus::NeedsSetup);
    assert_eq!(harness.backend.call_count(CallKind::DownloadModel), 0);
    assert_matches!(
        harness.notices().last(),
        Some(notice) if notice.level == NoticeLevel::Error
    );

    assert!(switch.dismiss());
    assert_eq!(switch.phase(), SwitchPhase::Idle);
}

#[tokio::test]
async fn paused_download_parks_and_resumes() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend
            .with_setup_status(true, false)
            .with_instant_model_load()
    })
    .await;
    let switch = Arc::clone(harness.session.connection());
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");

    harness.backend.hold(CallKind::DownloadModel);
    let setup = tokio::spawn({
        let switch = Arc::clone(&switch);
        async move { switch.run_setup().await }
    });
    settle().await;
    assert_eq!(switch.phase(), SwitchPhase::DownloadingModel);
    assert_eq!(setup_status(&harness), SetupStatus::DownloadingModel);
    assert!(!switch.dismiss());

    assert!(switch.pause_download().await.expect("pause succeeds"));
    assert_eq!(
        harness.store().read(|store| store.connection().download_state()),
        Some(DownloadState::Paused)
    );

    harness.backend.fail_once(CallKind::DownloadModel, "Download paused");
    harness.backend.release(CallKind::DownloadModel);
    let finished = setup.await.expect("setup task completes");
    assert!(!finished.expect("a pause is not an error"));
    assert_eq!(switch.parked_step(), Some(DownloadStep::Model));
    assert_eq!(switch.phase(), SwitchPhase::DownloadingModel);

    assert!(switch.resume_download().await.expect("resume succeeds"));

    assert_eq!(switch.parked_step(), None);
    assert_eq!(harness.backend.call_count(CallKind::ResumeDownload), 1);
    assert_eq!(harness.backend.call_count(CallKind::DownloadModel), 2);
    assert_eq!(switch.phase(), SwitchPhase::Complete);
    assert_eq!(mode(&harness), ConnectionMode::Offline);
}

#[tokio::test]
async fn cancelled_download_resets_setup_and_ignores_the_late_result() {
    let harness = Harness::start_with(SessionConfig::default(), |backend| {
        backend.with_setup_status(false, false)
    })
    .await;
    let switch = Arc::clone(harness.session.connection());
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");

    harness.backend.hold(CallKind::DownloadBinaries);
    let setup = tokio::spawn({
        let switch = Arc::clone(&switch);
        async move { switch.run_setup().await }
    });
    settle().await;
    assert_eq!(switch.phase(), SwitchPhase::DownloadingBinaries);

    assert!(switch.cancel_download().await.expect("cancel succeeds"));
    assert_eq!(switch.phase(), SwitchPhase::SetupRequired);
    assert_eq!(setup_status(&harness), SetupStatus::NeedsSetup);
    assert!(harness
        .store()
        .read(|store| store.connection().download_progress().is_none()));

    harness.backend.release(CallKind::DownloadBinaries);
    let finished = setup.await.expect("setup task completes");
    assert!(!finished.expect("stale download is ignored"));
    assert_eq!(switch.phase(), SwitchPhase::SetupRequired);
    assert_eq!(harness.backend.call_count(CallKind::DownloadModel), 0);
    assert_eq!(harness.backend.call_count(CallKind::SetConnectionMode), 0);
}

#[tokio::test]
async fn requests_during_a_busy_phase_are_ignored() {
    let harness = Harness::start().await;
    let switch = Arc::clone(harness.session.connection());
    harness.backend.hold(CallKind::CheckSetupStatus);

    let checking = tokio::spawn({
        let switch = Arc::clone(&switch);
        async move { switch.request_switch(ConnectionMode::Offline).await }
    });
    settle().await;
    assert_eq!(switch.phase(), SwitchPhase::CheckingSetup);

    let ignored = switch
        .request_switch(ConnectionMode::Cloud)
        .await
        .expect("request resolves");
    assert_eq!(ignored, SwitchPhase::CheckingSetup);
    assert!(!switch.dismiss());

    harness.backend.release(CallKind::CheckSetupStatus);
    let phase = checking
        .await
        .expect("check task completes")
        .expect("check succeeds");
    assert_eq!(phase, SwitchPhase::ConfirmingSwitch);
    assert_eq!(switch.target(), Some(ConnectionMode::Offline));
}

#[tokio::test]
async fn setup_side_events_update_the_store() {
    let harness = Harness::start().await;

    harness.emit(names::APP_READY, json!(null));
    harness.emit(
        names::DOWNLOAD_PROGRESS,
        json!({"step": "model", "percent": 40.0, "state": "downloading"}),
    );
    harness.emit(names::CONNECTION_MODE_CHANGED, json!("offline"));
    harness.emit(names::SETUP_COMPLETE, json!(null));

    harness.store().read(|store| {
        assert!(store.backend_ready());
        assert!(store.connection().download_progress().is_none());
        assert_eq!(store.connection().mode(), ConnectionMode::Offline);
        assert_eq!(store.connection().setup_status(), SetupStatus::Complete);
    });
}

#[tokio::test]
async fn completed_switch_persists_the_default_mode() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = SessionConfig {
        config_dir: Some(dir.path().to_path_buf()),
        ..SessionConfig::default()
    };
    let harness = Harness::start_with(config, |backend| backend.with_instant_model_load()).await;
    assert_eq!(
        harness.session.default_connection_mode().expect("prefs configured"),
        ConnectionMode::Cloud
    );
    assert!(!harness.session.onboarding_complete().expect("prefs configured"));

    let switch = harness.session.connection();
    switch
        .request_switch(ConnectionMode::Offline)
        .await
        .expect("request succeeds");
    switch.confirm().await.expect("confirm succeeds");
    harness
        .session
        .complete_onboarding()
        .expect("onboarding saved");

    let saved = PrefsStore::open(&prefs_file(dir.path())).expect("prefs written");
    assert_eq!(saved.default_connection_mode(), ConnectionMode::Offline);
    assert!(saved.onboarding_complete());
}

#[tokio::test]
async fn prefs_accessors_need_a_config_dir() {
    let harness = Harness::start().await;

    assert_matches!(
        harness.session.onboarding_complete(),
        Err(SessionError::PrefsUnavailable)
    );
    assert_matches!(
        harness
            .session
            .set_default_connection_mode(ConnectionMode::Offline),
        Err(SessionError::PrefsUnavailable)
    );
}
