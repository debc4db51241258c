use super::VideoReader;
use anyhow::{anyhow, Result};
use opencv::{
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_HW_ACCELERATION,
        VIDEO_ACCELERATION_ANY,
    },
};
use std::path::Path;

const FALLBACK_FPS: f64 = 30.0;

pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: usize,
}

fn open_capture(path: &Path) -> Result<VideoCapture> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("Non UTF-8 video path: {}", path.display()))?;
    let capture = VideoCapture::from_file(path_str, CAP_ANY)?;
    if !capture.is_opened()? {
        return Err(anyhow!("Failed to open video file: {}", path.display()));
    }
    Ok(capture)
}

impl OpencvReader {
    pub fn new(path: &Path) -> Result<Self> {
        let mut capture = open_capture(path)?;

        // Try to enable hardware acceleration (VideoToolbox on macOS, VA-API on Linux, etc.)
        match capture.set(CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY as f64) {
            Ok(true) => tracing::debug!("OpencvReader: hardware acceleration enabled"),
            _ => tracing::debug!("OpencvReader: hardware acceleration not available"),
        }

        let mut fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!(
                "OpencvReader: Failed to get FPS from metadata, falling back to {}",
                FALLBACK_FPS
            );
            fps = FALLBACK_FPS;
        }
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, stream_frames={}",
            path.display(),
            raw_count as f64 / fps,
            fps,
            raw_count
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames: raw_count,
        })
    }
}

impl VideoReader for OpencvReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.total_frames)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.source_fps)
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

/// Duration from container metadata.
pub fn read_duration(path: &Path) -> Result<f64> {
    let capture = open_capture(path)?;
    let fps = capture.get(CAP_PROP_FPS)?;
    let frames = capture.get(CAP_PROP_FRAME_COUNT)?;
    if fps <= 0.0 || frames <= 0.0 {
        return Err(anyhow!("no frame count or frame rate in {}", path.display()));
    }
    Ok(frames / fps)
}
