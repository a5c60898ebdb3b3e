use std::time::Duration;

use bytes::Bytes;
use edgecam::capture::PixelFormat;
use edgecam::processing::{ProcessingMode, QualityLevel};
use edgecam::telemetry::MonitorEvent;
use edgecam::{Config, NativeBridge, Pipeline, PipelineError, SyntheticCamera};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn config(width: u32, height: u32) -> Config {
    let mut config = Config::default();
    config.capture.width = width;
    config.capture.height = height;
    config.capture.format = PixelFormat::Yuv420;
    config.capture.queue_capacity = 8;
    config.pipeline.output_capacity = 128;
    config
}

#[test]
fn test_synthetic_stream_produces_edges() {
    let config = config(128, 96);
    let pipeline = Pipeline::start(&config).unwrap();
    let mut camera = SyntheticCamera::new(&config.capture).unwrap();
    let feed = pipeline.feed();
    let output = pipeline.output();

    for _ in 0..5 {
        feed.deliver_raw(camera.capture_frame()).unwrap();
        let processed = output.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(processed.mode, ProcessingMode::Edges);
        // the bar gives two vertical edges
        assert!(processed.frame.data.iter().any(|&v| v == 255));
        assert!(processed.frame.data.iter().all(|&v| v == 0 || v == 255));
    }

    let stats = pipeline.stats();
    assert_eq!(stats.processed_frames, 5);
    assert_eq!(stats.fps.total_frames, 5);
    assert!(stats.fps.current_fps > 29.0 && stats.fps.current_fps < 31.0);
    pipeline.shutdown();
}

#[test]
fn test_grayscale_mode_switch() {
    let config = config(64, 48);
    let pipeline = Pipeline::start(&config).unwrap();
    let mut camera = SyntheticCamera::new(&config.capture).unwrap();
    let output = pipeline.output();

    pipeline.set_mode(ProcessingMode::Grayscale);
    let raw = camera.capture_frame();
    let luma = raw.data.slice(..64 * 48);
    pipeline.feed().deliver_raw(raw).unwrap();

    let processed = output.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(processed.mode, ProcessingMode::Grayscale);
    assert_eq!(processed.frame.data, luma);
}

#[test]
fn test_output_follows_quality_tier() {
    let config = config(640, 480);
    let pipeline = Pipeline::start(&config).unwrap();
    pipeline.monitor().set_quality_level(QualityLevel::Low);
    let mut camera = SyntheticCamera::new(&config.capture).unwrap();
    let output = pipeline.output();

    pipeline.feed().deliver_raw(camera.capture_frame()).unwrap();
    let processed = output.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!((processed.frame.width(), processed.frame.height()), (160, 120));
    assert_eq!(processed.params.width, 160);
    assert_eq!(processed.frame.data.len(), 160 * 120);
}

#[test]
fn test_bad_frame_does_not_stop_pipeline() {
    let config = config(64, 48);
    let pipeline = Pipeline::start(&config).unwrap();
    let mut camera = SyntheticCamera::new(&config.capture).unwrap();
    let feed = pipeline.feed();
    let output = pipeline.output();

    let err = feed.deliver(Bytes::from_static(&[0u8; 7]), 64, 48, 0).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidFormat(_)));

    feed.deliver_raw(camera.capture_frame()).unwrap();
    assert!(output.recv_timeout(RECV_TIMEOUT).is_ok());
    assert_eq!(pipeline.monitor().stats().dropped_frames, 1);
}

#[test]
fn test_manual_quality_event() {
    let pipeline = Pipeline::start(&config(64, 48)).unwrap();
    let events = pipeline.monitor().events();
    pipeline.monitor().set_quality_level(QualityLevel::Medium);

    assert_eq!(
        events.try_recv().unwrap(),
        MonitorEvent::QualityChanged {
            from: QualityLevel::High,
            to: QualityLevel::Medium,
            manual: true,
        }
    );
    assert!(!pipeline.monitor().is_adaptive_enabled());
}

#[test]
fn test_shutdown_then_deliver() {
    let config = config(64, 48);
    let pipeline = Pipeline::start(&config).unwrap();
    let mut camera = SyntheticCamera::new(&config.capture).unwrap();
    let feed = pipeline.feed();
    pipeline.shutdown();

    assert!(matches!(
        feed.deliver_raw(camera.capture_frame()),
        Err(PipelineError::Closed)
    ));
    assert!(pipeline.performance_report().starts_with("Performance Report:"));
}

#[test]
fn test_bridge_matches_pipeline_surface() {
    let bridge = NativeBridge::default();
    let mut camera = SyntheticCamera::new(&config(64, 48).capture).unwrap();
    let raw = camera.capture_frame();

    assert!(bridge.initialize_processor(64, 48));
    let edges = bridge.process_frame_canny(&raw.data, 64, 48).unwrap();
    assert_eq!(edges.len(), 64 * 48);
    assert!(bridge.get_last_processing_time() >= 0.0);
    assert_eq!(bridge.get_processed_frame_count(), 1);

    bridge.cleanup();
    bridge.cleanup();
    assert_eq!(bridge.get_processed_frame_count(), 0);
}
