use std::time::Duration;

use liverec::config::{StreamRecordingConfig, Toggle};

mod common;
use common::{config, eventually, harness};

fn stream(enabled: bool) -> StreamRecordingConfig {
    StreamRecordingConfig {
        enabled: Some(enabled).into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_only_enabled_streams_are_recorded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.recording.streams.insert("front".to_string(), stream(true));
    cfg.recording.streams.insert("back".to_string(), stream(false));
    let h = harness(cfg, &["front", "back", "side"]).await;

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.started, vec!["front"]);
    assert!(pass.failed.is_empty());

    let active = h.recorder.list_recordings().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].stream, "front");
    assert!(active[0].id.starts_with("auto_front_"));
    assert_eq!(h.spawner.live("back"), 0);
    assert_eq!(h.spawner.live("side"), 0);

    // converged, a second pass changes nothing
    let pass = h.recorder.reconcile().await;
    assert!(pass.started.is_empty());
    assert_eq!(pass.already_recording, vec!["front"]);
    assert_eq!(h.spawner.spawned_for("front"), 1);
    Ok(())
}

#[tokio::test]
async fn test_auto_start_records_every_known_stream() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.recording.auto_start = true;
    let h = harness(cfg, &["a", "b"]).await;

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.started, vec!["a", "b"]);

    let mut cfg = config(dir.path());
    cfg.recording.auto_start = false;
    let idle = harness(cfg, &["a", "b"]).await;
    assert_eq!(idle.recorder.reconcile().await, Default::default());
    Ok(())
}

#[tokio::test]
async fn test_external_encoder_counts_as_recording() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.recording.streams.insert("cam".to_string(), stream(true));
    let h = harness(cfg, &["cam"]).await;
    h.probe.set_running("cam");

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.already_recording, vec!["cam"]);
    assert_eq!(h.spawner.spawned_for("cam"), 0);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_and_failing_streams() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    for name in ["ok", "offline", "broken", "crashy"] {
        cfg.recording.streams.insert(name.to_string(), stream(true));
    }
    let h = harness(cfg, &["ok", "broken", "crashy"]).await;
    h.spawner.fail("broken");
    h.spawner.panic_on("crashy");

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.started, vec!["ok"]);
    assert_eq!(pass.unavailable, vec!["offline"]);
    assert_eq!(pass.failed, vec!["broken", "crashy"]);
    assert_eq!(h.spawner.live("ok"), 1);
    Ok(())
}

#[tokio::test]
async fn test_restart_on_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.recording.streams.insert("again".to_string(), stream(true));
    cfg.recording.streams.insert(
        "once".to_string(),
        StreamRecordingConfig {
            enabled: Toggle::On,
            restart_on_error: Toggle::Off,
            ..Default::default()
        },
    );
    let h = harness(cfg, &["again", "once"]).await;
    let recordings = h.recorder.recordings().clone();

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.started, vec!["again", "once"]);

    h.spawner.exit_all("again");
    h.spawner.exit_all("once");
    let exited = eventually(Duration::from_secs(4), || {
        let recordings = recordings.clone();
        async move { recordings.list().await.is_empty() }
    })
    .await;
    assert!(exited);

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.started, vec!["again"]);
    assert_eq!(pass.skipped, vec!["once"]);
    assert_eq!(h.spawner.live("once"), 0);
    Ok(())
}

#[tokio::test]
async fn test_segmented_auto_recordings_and_stop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(dir.path());
    cfg.recording.streams.insert(
        "seg".to_string(),
        StreamRecordingConfig {
            enabled: Toggle::On,
            enable_segments: Toggle::On,
            ..Default::default()
        },
    );
    cfg.recording.streams.insert("plain".to_string(), stream(true));
    let h = harness(cfg, &["seg", "plain", "other"]).await;
    h.recorder
        .start_recording("manual", "other", Default::default())
        .await?;

    let pass = h.recorder.reconcile().await;
    assert_eq!(pass.started, vec!["plain", "seg"]);
    let segmented = h.recorder.list_segmented().await;
    assert_eq!(segmented.len(), 1);
    assert_eq!(segmented[0].stream, "seg");
    assert_eq!(segmented[0].current_segment, 1);

    let stopped = h.recorder.autorecord().stop_auto_recordings().await;
    assert_eq!(stopped.len(), 2);
    assert_eq!(h.spawner.live("seg"), 0);
    assert_eq!(h.spawner.live("plain"), 0);
    // recordings started by hand are left alone
    assert!(h.recorder.recordings().is_active("manual").await);
    Ok(())
}
