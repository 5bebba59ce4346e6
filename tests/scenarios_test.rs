//! End-to-end inspection scenarios on the codec-free media backend
//!
//! Run: cargo test --test scenarios_test

mod common;

use anyhow::Result;
use common::validators::validate_run_report;
use egg_inspect_annotator::{AnnotationStyle, FrameAnnotator};
use egg_inspect_common::{
    BoundingBox, Detection, Detector, ErrorKind, Frame, FrameRate, InferenceError,
};
use egg_inspect_pipeline::{
    MemoryBackend, MemoryVideo, ModelHandle, PipelineConfig, PipelineController, PipelineRun,
    RunStatus,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const INPUT: &str = "conveyor.mp4";

fn controller(video: MemoryVideo) -> PipelineController<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend.insert(INPUT, video);
    PipelineController::new(
        backend,
        FrameAnnotator::with_bitmap_font(AnnotationStyle::default()),
        PipelineConfig::default(),
    )
}

struct NoDefects;

impl Detector for NoDefects {
    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        Ok(Vec::new())
    }
}

/// Flags a cracked egg in the top-left corner of every odd frame
struct OddFrameCracks;

impl Detector for OddFrameCracks {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        if frame.index() % 2 == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            class_id: 0,
            class_name: "crack".to_string(),
            confidence: 0.91,
            bbox: BoundingBox::new(30.0, 40.0, 50.0, 40.0),
        }])
    }
}

#[test]
fn test_clean_video_completes_pixel_identical() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("conveyor_detected.mp4");
    let video = MemoryVideo::generated(10, 640, 480, FrameRate::from_fps(30));
    let controller = controller(video.clone());

    let run = PipelineRun::new();
    let mut model = ModelHandle::new(NoDefects);
    let report = controller.run(&run, Path::new(INPUT), &output, &mut model)?;

    assert_eq!(report.status, RunStatus::Completed);
    let (spec, frames) = MemoryBackend::read_file(&output)?;
    assert_eq!((spec.width, spec.height), (640, 480));
    assert_eq!(spec.frame_rate, FrameRate::from_fps(30));
    assert_eq!(frames, video.frames());

    let validation = validate_run_report(&serde_json::to_value(&report)?);
    assert!(validation.is_valid(), "{:?}", validation.errors);
    Ok(())
}

#[test]
fn test_annotated_frames_keep_input_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let video = MemoryVideo::generated(8, 320, 240, FrameRate::from_fps(25));
    let controller = controller(video.clone());

    let report = controller.run(
        &PipelineRun::new(),
        Path::new(INPUT),
        &output,
        &mut OddFrameCracks,
    )?;
    assert_eq!(report.frames_written, 8);
    assert_eq!(report.frames_with_detections, 4);
    assert_eq!(report.detections_by_class.get("crack"), Some(&4));

    let (_, written) = MemoryBackend::read_file(&output)?;
    let original = video.frames();
    for (i, (out, input)) in written.iter().zip(&original).enumerate() {
        assert_eq!(out.index(), i as u64);
        // Bottom-right corner is never annotated and identifies the frame
        assert_eq!(out.image().get_pixel(319, 239), input.image().get_pixel(319, 239));
        let touched = out.image().get_pixel(30, 60) != input.image().get_pixel(30, 60);
        assert_eq!(touched, i % 2 == 1, "frame {i}");
    }

    let validation = validate_run_report(&serde_json::to_value(&report)?);
    assert!(validation.is_valid(), "{:?}", validation.errors);
    Ok(())
}

#[test]
fn test_cancel_before_start_writes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let controller = controller(MemoryVideo::generated(10, 64, 48, FrameRate::from_fps(30)));

    let run = PipelineRun::new();
    run.handle().cancel();
    let report = controller.run(&run, Path::new(INPUT), &output, &mut OddFrameCracks)?;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    let validation = validate_run_report(&serde_json::to_value(&report)?);
    assert!(validation.is_valid(), "{:?}", validation.errors);
    Ok(())
}

#[test]
fn test_corrupt_frame_five_of_ten() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let video = MemoryVideo::generated(10, 64, 48, FrameRate::from_fps(30)).failing_at(5);
    let controller = controller(video.clone());

    let run = PipelineRun::new();
    let handle = run.handle();
    let err = controller
        .run(&run, Path::new(INPUT), &output, &mut OddFrameCracks)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert!(!output.exists());

    let status = serde_json::to_value(handle.status())?;
    assert_eq!(status["state"], "failed");
    assert_eq!(status["frame_index"], 5);

    let partial = handle.partial_output().expect("partial artifact");
    let (_, frames) = MemoryBackend::read_file(&partial)?;
    assert_eq!(frames.len(), 5);
    let indices: Vec<u64> = frames.iter().map(Frame::index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_progress_is_pollable_from_another_thread() -> Result<()> {
    /// Slow enough for the poller to observe intermediate counts
    struct Slow;
    impl Detector for Slow {
        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
            thread::sleep(Duration::from_millis(5));
            Ok(Vec::new())
        }
    }

    let dir = tempfile::tempdir()?;
    let output = dir.path().join("out.mp4");
    let controller = controller(MemoryVideo::generated(20, 32, 32, FrameRate::from_fps(30)));
    let run = PipelineRun::new();
    let handle = run.handle();

    let poller = {
        let handle = handle.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            while !handle.is_finished() {
                seen.push(handle.processed_count());
                thread::sleep(Duration::from_millis(1));
            }
            seen
        })
    };

    let report = controller.run(&run, Path::new(INPUT), &output, &mut Slow)?;
    let seen = poller.join().expect("poller thread");

    assert!(report.is_completed());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "counter went backwards");
    assert!(seen.iter().all(|&n| n <= 20));
    assert_eq!(handle.processed_count(), 20);
    assert_eq!(handle.fraction(), Some(1.0));
    Ok(())
}

#[test]
fn test_shared_model_serves_concurrent_runs() -> Result<()> {
    /// Counts overlapping calls
    struct Exclusive {
        active: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }
    impl Detector for Exclusive {
        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(1));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    let overlaps = Arc::new(AtomicUsize::new(0));
    let model = ModelHandle::new(Exclusive {
        active: Arc::new(AtomicUsize::new(0)),
        overlaps: Arc::clone(&overlaps),
    });
    let dir = tempfile::tempdir()?;

    let workers: Vec<_> = (0..2)
        .map(|i| {
            let mut model = model.clone();
            let output = dir.path().join(format!("out_{i}.mp4"));
            thread::spawn(move || {
                let controller =
                    controller(MemoryVideo::generated(10, 32, 32, FrameRate::from_fps(30)));
                controller.run(&PipelineRun::new(), Path::new(INPUT), &output, &mut model)
            })
        })
        .collect();

    for worker in workers {
        let report = worker.join().expect("worker thread")?;
        assert!(report.is_completed());
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    Ok(())
}
