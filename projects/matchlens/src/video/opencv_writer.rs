use super::VideoSink;
use anyhow::{anyhow, Result};
use opencv::core::{Mat, Size};
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use std::path::Path;

/// XVID-encoded `.avi` writer.
pub struct OpencvWriter {
    writer: VideoWriter,
    size: Size,
}

impl OpencvWriter {
    pub fn new(path: &Path, fps: f64, size: Size) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Non UTF-8 output path: {}", path.display()))?;
        let fourcc = VideoWriter::fourcc('X', 'V', 'I', 'D')?;
        let writer = VideoWriter::new(path_str, fourcc, fps, size, true)?;
        if !writer.is_opened()? {
            return Err(anyhow!("Failed to open video writer: {}", path.display()));
        }
        Ok(Self { writer, size })
    }
}

impl VideoSink for OpencvWriter {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        let size = frame.size()?;
        if size != self.size {
            return Err(anyhow!(
                "frame size {}x{} does not match writer size {}x{}",
                size.width,
                size.height,
                self.size.width,
                self.size.height
            ));
        }
        self.writer.write(frame)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}
