// Pipeline orchestrator: runs one job from upload to output map
//
// Stages run sequentially on the calling thread. Tracking and team assignment
// always run; keypoints and homography only when a pitch product is requested.
// Any failure is recorded on the job once, after removing the files this run
// wrote.

use crate::error::PipelineError;
use crate::job::{output_rel_path, JobHandle, JobStatus, OutputMap};
use crate::pipeline::batch::run_batched;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::detection::DetectionService;
use crate::pipeline::homography::FrameHomography;
use crate::pipeline::keypoints::KeypointService;
use crate::pipeline::pitch::SoccerPitchConfiguration;
use crate::pipeline::render::{renderer_for, RenderContext};
use crate::pipeline::team::{assign_teams, CropEmbedder};
use crate::pipeline::tracker::{assign_possession, interpolate_ball, track_detections};
use crate::pipeline::types::{Frame, PossessionSequence, Product, TrackTable};
use crate::video::{read_all, FrameSource, VideoSinkFactory};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use opencv::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;

const PROGRESS_READ: u8 = 10;
const PROGRESS_TRACKED: u8 = 35;
const PROGRESS_TEAMS: u8 = 50;
const PROGRESS_POSSESSION: u8 = 55;
const PROGRESS_HOMOGRAPHY: u8 = 65;
const PROGRESS_RENDERED: u8 = 95;

/// The external collaborators one job talks to.
pub struct Backends {
    pub source: Arc<dyn FrameSource>,
    pub sinks: Box<dyn VideoSinkFactory>,
    pub detector: Box<dyn DetectionService>,
    pub keypoints: Box<dyn KeypointService>,
    pub embedder: Box<dyn CropEmbedder>,
}

/// Builds backends on the thread that will use them.
pub trait BackendFactory: Send + Sync {
    fn create(&self) -> Result<Backends>;

    /// Reader used to validate uploads before a job exists.
    fn frame_source(&self) -> Arc<dyn FrameSource>;
}

/// Per-job analysis shared by every renderer.
pub struct Analysis {
    pub tracks: TrackTable,
    pub possession: PossessionSequence,
    /// Empty unless a pitch product was requested
    pub homographies: Vec<FrameHomography>,
}

/// Run a job to completion and record the outcome on it.
///
/// On failure the job is marked failed with the error message, files written
/// by this run are removed, and the error is returned.
pub fn execute_job(
    job: &JobHandle,
    backends: &mut Backends,
    config: &PipelineConfig,
    media_root: &Path,
) -> Result<OutputMap> {
    job.start()?;
    let record = job.snapshot();
    tracing::info!("Job {}: processing {:?}", record.id, record.produce);

    let start = Instant::now();
    let mut written = Vec::new();
    match run_stages(job, backends, config, media_root, &mut written) {
        Ok(outputs) => {
            job.complete(outputs.clone())?;
            tracing::info!(
                "Job {}: done in {:.1}s, {} outputs",
                record.id,
                start.elapsed().as_secs_f64(),
                outputs.len()
            );
            Ok(outputs)
        }
        Err(e) => {
            remove_written(&written);
            if let Err(fail_err) = job.fail(format!("{:#}", e)) {
                tracing::warn!("Job {}: could not record failure: {}", record.id, fail_err);
            }
            Err(e)
        }
    }
}

fn run_stages(
    job: &JobHandle,
    backends: &mut Backends,
    config: &PipelineConfig,
    media_root: &Path,
    written: &mut Vec<PathBuf>,
) -> Result<OutputMap> {
    let record = job.snapshot();
    if record.produce.is_empty() {
        return Err(PipelineError::NoOutputs.into());
    }

    let mut reader = backends
        .source
        .open(&record.original)
        .with_context(|| format!("could not read video: {}", record.original.display()))?;
    let fps = reader.source_fps()?;
    let frames = read_all(reader.as_mut())?;
    if frames.is_empty() {
        return Err(PipelineError::EmptyClip.into());
    }
    tracing::info!("Job {}: read {} frames at {:.2} fps", record.id, frames.len(), fps);
    job.set_progress(PROGRESS_READ);

    let pitch = SoccerPitchConfiguration::default();
    let analysis = analyze(job, backends, config, &frames, &record.produce, &pitch)?;

    let ctx = RenderContext {
        frames: &frames,
        tracks: &analysis.tracks,
        possession: &analysis.possession,
        homographies: &analysis.homographies,
        pitch: &pitch,
        config: &config.render,
    };
    render_products(
        job,
        backends.sinks.as_ref(),
        &ctx,
        &record.produce,
        fps,
        media_root,
        written,
    )
}

/// Tracking, teams, possession and (when needed) homography.
pub fn analyze(
    job: &JobHandle,
    backends: &mut Backends,
    config: &PipelineConfig,
    frames: &[Frame],
    products: &BTreeSet<Product>,
    pitch: &SoccerPitchConfiguration,
) -> Result<Analysis> {
    let id = job.id();

    let detector = backends.detector.as_mut();
    let detections = run_batched(
        frames,
        config.tracking.detection_batch_size,
        "detection",
        |chunk| detector.detect_batch(chunk),
    )?;
    let tracks = track_detections(&detections, &config.tracking);
    tracing::info!("Job {}: tracking complete", id);
    job.set_progress(PROGRESS_TRACKED);

    let tracks = assign_teams(tracks, frames, backends.embedder.as_mut(), &config.team)?;
    job.set_progress(PROGRESS_TEAMS);

    let tracks = interpolate_ball(tracks, &config.tracking);
    let (tracks, possession) = assign_possession(tracks, &config.tracking);
    job.set_progress(PROGRESS_POSSESSION);

    let homographies = if products.iter().any(|p| p.needs_pitch()) {
        let service = backends.keypoints.as_mut();
        let keypoints = run_batched(
            frames,
            config.pitch.keypoint_batch_size,
            "keypoints",
            |chunk| service.detect_batch(chunk),
        )?;
        let vertices = pitch.vertices();
        let homographies: Vec<FrameHomography> = keypoints
            .iter()
            .map(|kp| FrameHomography::estimate(kp, &vertices, config.pitch.keypoint_threshold))
            .collect();
        let valid = homographies.iter().filter(|h| h.is_valid()).count();
        tracing::info!(
            "Job {}: homography valid on {}/{} frames",
            id,
            valid,
            homographies.len()
        );
        homographies
    } else {
        Vec::new()
    };
    job.set_progress(PROGRESS_HOMOGRAPHY);

    Ok(Analysis {
        tracks,
        possession,
        homographies,
    })
}

fn render_products(
    job: &JobHandle,
    sinks: &dyn VideoSinkFactory,
    ctx: &RenderContext<'_>,
    products: &BTreeSet<Product>,
    fps: f64,
    media_root: &Path,
    written: &mut Vec<PathBuf>,
) -> Result<OutputMap> {
    let id = job.id();
    let total = (products.len() * ctx.frames.len()).max(1);
    let span = (PROGRESS_RENDERED - PROGRESS_HOMOGRAPHY) as usize;
    let mut done = 0;
    let mut outputs = OutputMap::new();

    for product in products {
        let rel = output_rel_path(id, *product);
        let path = media_root.join(&rel);
        let mut renderer = renderer_for(*product, ctx)?;
        let mut sink = None;

        for frame in ctx.frames {
            let image = renderer.render(frame.index)?;
            if sink.is_none() {
                written.push(path.clone());
                sink = Some(sinks.create(&path, fps, image.size()?)?);
            }
            if let Some(sink) = sink.as_mut() {
                sink.write(&image)?;
            }

            done += 1;
            job.set_progress(PROGRESS_HOMOGRAPHY + (span * done / total) as u8);
        }

        if let Some(sink) = sink {
            sink.finish()?;
        }
        verify_output(&path)?;
        tracing::info!("Job {}: wrote {}", id, rel);
        outputs.insert(*product, rel);
    }

    Ok(outputs)
}

fn verify_output(path: &Path) -> Result<(), PipelineError> {
    match fs::metadata(path) {
        Err(_) => Err(PipelineError::OutputMissing {
            path: path.to_path_buf(),
        }),
        Ok(meta) if meta.len() == 0 => Err(PipelineError::OutputEmpty {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
    }
}

fn remove_written(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Run a job on the current thread with a terminal progress bar.
pub fn process_with_progress_bar(
    job: Arc<JobHandle>,
    factory: &dyn BackendFactory,
    config: &PipelineConfig,
    media_root: &Path,
) -> Result<OutputMap> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    let mut events = job.subscribe();
    let listener = {
        let pb = pb.clone();
        thread::spawn(move || loop {
            match events.blocking_recv() {
                Ok(update) => {
                    pb.set_position(update.progress as u64);
                    pb.set_message(update.status.to_string());
                    if update.status.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        })
    };

    let result = factory
        .create()
        .and_then(|mut backends| execute_job(&job, &mut backends, config, media_root));

    if job.snapshot().status == JobStatus::Pending {
        // Backends never came up; the job did not start
        let message = result
            .as_ref()
            .err()
            .map(|e| format!("{:#}", e))
            .unwrap_or_default();
        let _ = job.fail(message);
    }
    if listener.join().is_err() {
        tracing::warn!("Progress listener panicked");
    }

    match &result {
        Ok(_) => pb.finish_with_message("done"),
        Err(_) => pb.abandon_with_message("failed"),
    }
    result
}
