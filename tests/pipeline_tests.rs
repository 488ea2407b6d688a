// End-to-end tests for the capture pipeline
//
// These run the full coordinator over the synthetic device provider:
// preview, repeated record/stop cycles, event ordering, export geometry
// resets, device controls, and camera swapping. Timing assertions use wide
// tolerances since the synthetic devices pace themselves in real time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use retake::capture::config::{CaptureConfig, ExportRegion, RectF};
use retake::capture::traits::FlashMode;
use retake::muxer::probe_duration;
use retake::{
    CameraPosition, CaptureCoordinator, CaptureError, CaptureEvent, RecordingState,
    SyntheticProvider, SyntheticSpec, WriterStateError,
};

fn coordinator(dir: &tempfile::TempDir) -> CaptureCoordinator {
    let config = CaptureConfig {
        output_dir: Some(dir.path().join("takes")),
        ..CaptureConfig::default()
    };
    CaptureCoordinator::new(
        Arc::new(SyntheticProvider::new(SyntheticSpec::default())),
        config,
    )
}

async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// The encoder inputs prepare lazily off the first observed samples, so a
/// start right after the preview comes up can be refused.
async fn start_recording_when_ready(c: &CaptureCoordinator) -> Result<()> {
    let started = wait_until(Duration::from_secs(5), || c.start_recording().is_ok()).await;
    anyhow::ensure!(started, "recording never became startable");
    Ok(())
}

async fn wait_for_finished_segment(
    events: &mut tokio::sync::broadcast::Receiver<CaptureEvent>,
) -> Result<retake::Segment> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
        if let CaptureEvent::SegmentFinished { segment } = event {
            return Ok(segment);
        }
    }
}

#[tokio::test]
async fn records_two_takes_into_playable_segments() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let c = coordinator(&dir);
    let mut events = c.subscribe();

    c.start_preview()?;

    start_recording_when_ready(&c).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    c.stop_recording();
    let first = wait_for_finished_segment(&mut events).await?;

    start_recording_when_ready(&c).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    c.stop_recording();
    let second = wait_for_finished_segment(&mut events).await?;

    assert_eq!(c.recording_state(), RecordingState::Idle);
    let segments = c.segments();
    assert_eq!(segments.len(), 2);
    assert!(segments.iter().all(|s| s.finished));
    assert_ne!(first.path, second.path);

    // Each segment is an independently readable container whose duration
    // roughly matches the time spent recording.
    for segment in &segments {
        assert!(segment.path.exists());
        let probed = probe_duration(&segment.path)?;
        assert!(
            probed >= Duration::from_millis(100) && probed <= Duration::from_millis(900),
            "segment duration {probed:?} out of range"
        );
    }

    let total = c.total_duration();
    let sum = segments
        .iter()
        .map(|s| s.duration.unwrap_or(Duration::ZERO))
        .sum::<Duration>();
    assert_eq!(total, sum);

    c.stop_preview();
    Ok(())
}

#[tokio::test]
async fn events_arrive_in_lifecycle_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let c = coordinator(&dir);
    let mut events = c.subscribe();

    c.start_preview()?;
    start_recording_when_ready(&c).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    c.stop_recording();

    // Collect the whole sequence for this take, ending at the finish.
    let mut order = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
        let done = matches!(event, CaptureEvent::SegmentFinished { .. });
        order.push(event);
        if done {
            break;
        }
    }

    let opened = order
        .iter()
        .position(|e| matches!(e, CaptureEvent::SegmentOpened { .. }))
        .expect("no SegmentOpened event");
    let first_write = order
        .iter()
        .position(|e| matches!(e, CaptureEvent::SampleWritten { .. }))
        .expect("no SampleWritten event");
    let writes = order
        .iter()
        .filter(|e| matches!(e, CaptureEvent::SampleWritten { .. }))
        .count();
    assert!(opened < first_write, "container opened after a sample write");
    assert!(writes >= 2, "expected several muxed samples, got {writes}");
    assert!(
        matches!(order.last(), Some(CaptureEvent::SegmentFinished { .. })),
        "finish must arrive after every write"
    );
    Ok(())
}

#[tokio::test]
async fn preview_publishes_frames_without_recording() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let c = coordinator(&dir);
    let mut preview = c.preview();

    c.start_preview()?;
    tokio::time::timeout(Duration::from_secs(5), preview.changed()).await??;
    let frame = preview.borrow().clone().expect("no preview frame");
    assert_eq!((frame.format.width, frame.format.height), (64, 48));

    // Nothing was recorded.
    assert_eq!(c.recording_state(), RecordingState::Idle);
    assert_eq!(c.segment_count(), 0);
    Ok(())
}

#[tokio::test]
async fn export_resets_segments_and_state() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let c = coordinator(&dir);
    let mut events = c.subscribe();

    c.start_preview()?;
    start_recording_when_ready(&c).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    c.stop_recording();
    wait_for_finished_segment(&mut events).await?;
    assert_eq!(c.segment_count(), 1);
    let directory = c.segment_directory();
    assert!(directory.exists());

    // New geometry invalidates everything recorded at the old one.
    c.export(Some(ExportRegion {
        rect: RectF {
            x: 0.0,
            y: 0.0,
            width: 32.0,
            height: 24.0,
        },
        dimensions: None,
    }));

    assert_eq!(c.recording_state(), RecordingState::Idle);
    assert_eq!(c.segment_count(), 0);
    assert!(!directory.exists());

    // The pipeline comes back: inputs re-resolve and a new take records.
    start_recording_when_ready(&c).await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    c.stop_recording();
    let segment = wait_for_finished_segment(&mut events).await?;
    assert!(segment.path.exists());
    assert_eq!(c.segment_count(), 1);
    Ok(())
}

#[tokio::test]
async fn camera_swap_and_device_controls_degrade_gracefully() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let c = coordinator(&dir);

    c.start_preview()?;
    assert_eq!(c.camera_position(), CameraPosition::Back);

    // Back camera supports zoom 1..4 and a torch.
    c.set_zoom(10.0);
    assert_eq!(c.zoom(), 4.0);
    c.set_flash(FlashMode::On);
    assert_eq!(c.flash(), Some(FlashMode::On));

    let position = c.swap_camera().await?;
    assert_eq!(position, CameraPosition::Front);

    // Front camera has neither; the controls no-op.
    c.set_zoom(3.0);
    assert_eq!(c.zoom(), 1.0);
    c.set_flash(FlashMode::On);
    assert_eq!(c.flash(), Some(FlashMode::Off));
    Ok(())
}

#[tokio::test]
async fn incapable_environment_refuses_recording_but_previews() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = CaptureConfig {
        output_dir: Some(dir.path().join("takes")),
        ..CaptureConfig::default()
    };
    let c = CaptureCoordinator::new(
        Arc::new(SyntheticProvider::incapable(SyntheticSpec::default())),
        config,
    );

    c.start_preview()?;
    let mut preview = c.preview();
    tokio::time::timeout(Duration::from_secs(5), preview.changed()).await??;

    assert_eq!(
        c.start_recording().unwrap_err(),
        CaptureError::WriterState(WriterStateError::NotCaptureCapable)
    );
    assert_eq!(c.recording_state(), RecordingState::Idle);
    Ok(())
}
