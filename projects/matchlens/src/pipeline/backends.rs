use crate::cli::EngineArgs;
use crate::pipeline::clip::ClipEmbedder;
use crate::pipeline::config::{Device, TeamEmbedder};
use crate::pipeline::detection::UslsDetector;
use crate::pipeline::keypoints::HttpKeypointClient;
use crate::pipeline::orchestrator::{BackendFactory, Backends};
use crate::pipeline::team::{CropEmbedder, HsvHistogramEmbedder};
use crate::video::{FrameSource, OpencvVideo};
use anyhow::{Context, Result};
use std::sync::Arc;

/// RT-DETR detection, the HTTP keypoint service, the configured crop
/// embedder and OpenCV video I/O.
pub struct DefaultBackendFactory {
    detection_model: String,
    keypoint_url: String,
    device: Device,
    team_embedder: TeamEmbedder,
}

impl DefaultBackendFactory {
    pub fn new(engine: &EngineArgs) -> Self {
        Self {
            detection_model: engine.detection_model.clone(),
            keypoint_url: engine.keypoint_url.clone(),
            device: engine.device,
            team_embedder: engine.team_embedder,
        }
    }

    pub fn embedder(&self) -> Result<Box<dyn CropEmbedder>> {
        Ok(match self.team_embedder {
            TeamEmbedder::Clip => {
                tracing::info!("Loading CLIP image encoder on {:?}", self.device);
                Box::new(ClipEmbedder::new(self.device).context("Failed to load CLIP encoder")?)
            }
            TeamEmbedder::Hsv => Box::new(HsvHistogramEmbedder::default()),
        })
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self) -> Result<Backends> {
        tracing::info!(
            "Loading detection model {} on {:?}",
            self.detection_model,
            self.device
        );
        let detector = UslsDetector::new(&self.detection_model, self.device)
            .with_context(|| format!("Failed to load model {}", self.detection_model))?;
        let keypoints = HttpKeypointClient::new(&self.keypoint_url)?;

        Ok(Backends {
            source: Arc::new(OpencvVideo),
            sinks: Box::new(OpencvVideo),
            detector: Box::new(detector),
            keypoints: Box::new(keypoints),
            embedder: self.embedder()?,
        })
    }

    fn frame_source(&self) -> Arc<dyn FrameSource> {
        Arc::new(OpencvVideo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;
    use opencv::core::{Mat, Scalar, CV_8UC3};

    fn factory(extra: &[&str]) -> DefaultBackendFactory {
        let mut argv = vec!["matchlens", "--detection-model", "model.onnx"];
        argv.extend_from_slice(extra);
        argv.push("serve");
        DefaultBackendFactory::new(&Args::try_parse_from(argv).unwrap().engine)
    }

    #[test]
    fn test_clip_is_the_default_encoder() {
        assert_eq!(factory(&[]).team_embedder, TeamEmbedder::Clip);
    }

    #[test]
    fn test_configured_histogram_encoder_is_used() {
        let factory = factory(&["--team-embedder", "hsv"]);
        let mut embedder = factory.embedder().unwrap();

        let crop =
            Mat::new_rows_cols_with_default(40, 20, CV_8UC3, Scalar::new(0.0, 0.0, 255.0, 0.0))
                .unwrap();
        let features = embedder.embed(&[crop]).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].len(), HsvHistogramEmbedder::default().dimension());
    }
}
