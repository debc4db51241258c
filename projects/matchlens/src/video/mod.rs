pub mod opencv_reader;
pub mod opencv_writer;

use crate::pipeline::types::Frame;
use anyhow::Result;
use opencv::core::{Mat, Size};
use std::path::Path;

/// Sequential access to the frames of one opened clip.
pub trait VideoReader: Send {
    fn frame_count(&self) -> Result<usize>;
    fn source_fps(&self) -> Result<f64>;
    /// `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Mat>>;
}

/// Opens clips for reading.
pub trait FrameSource: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoReader>>;

    /// Clip duration in seconds, without decoding it.
    fn read_duration(&self, path: &Path) -> Result<f64>;
}

/// Encoder for one output clip.
pub trait VideoSink: Send {
    fn write(&mut self, frame: &Mat) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Creates output clips.
pub trait VideoSinkFactory: Send + Sync {
    fn create(&self, path: &Path, fps: f64, size: Size) -> Result<Box<dyn VideoSink>>;
}

/// Decode a whole clip into indexed frames.
pub fn read_all(reader: &mut dyn VideoReader) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(reader.frame_count().unwrap_or(0));
    while let Some(mat) = reader.next_frame()? {
        frames.push(Frame {
            index: frames.len(),
            mat,
        });
    }
    Ok(frames)
}

/// The OpenCV-backed implementation of both video traits.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpencvVideo;

impl FrameSource for OpencvVideo {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoReader>> {
        Ok(Box::new(opencv_reader::OpencvReader::new(path)?))
    }

    fn read_duration(&self, path: &Path) -> Result<f64> {
        opencv_reader::read_duration(path)
    }
}

impl VideoSinkFactory for OpencvVideo {
    fn create(&self, path: &Path, fps: f64, size: Size) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(opencv_writer::OpencvWriter::new(path, fps, size)?))
    }
}
