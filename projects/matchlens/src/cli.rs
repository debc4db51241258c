use crate::pipeline::config::{Device, PipelineConfig, TeamEmbedder};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service that accepts clips and processes jobs in the background
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind to
        #[arg(long, default_value_t = 12206)]
        port: u16,

        /// Number of concurrent job workers
        #[arg(long, env = "MATCHLENS_WORKERS", default_value_t = 1)]
        workers: usize,
    },
    /// Process a single clip locally and print the output map
    Process {
        /// Path to the input clip
        #[arg(long)]
        input: PathBuf,

        /// Comma-separated products (detections,pitch_edges,tactical_board,voronoi)
        #[arg(long, default_value = "")]
        produce: String,
    },
}

/// Settings shared by every job, regardless of how it was submitted.
#[derive(ClapArgs, Debug, Clone)]
pub struct EngineArgs {
    /// Root directory for uploads and job outputs
    #[arg(long, env = "MATCHLENS_MEDIA_ROOT", default_value = "media")]
    pub media_root: PathBuf,

    /// RT-DETR model file for player/ball detection
    #[arg(long, env = "MATCHLENS_DETECTION_MODEL")]
    pub detection_model: String,

    /// Base URL of the pitch keypoint inference service
    #[arg(
        long,
        env = "MATCHLENS_KEYPOINT_URL",
        default_value = "http://localhost:8001"
    )]
    pub keypoint_url: String,

    /// Inference device
    #[arg(long, env = "MATCHLENS_DEVICE", value_enum, default_value_t = Device::Cpu)]
    pub device: Device,

    /// Crop encoder for team assignment
    #[arg(long, env = "MATCHLENS_TEAM_EMBEDDER", value_enum, default_value_t = TeamEmbedder::Clip)]
    pub team_embedder: TeamEmbedder,

    /// Initial detection batch size (halved on out-of-memory)
    #[arg(long, env = "MATCHLENS_DETECTION_BATCH", default_value_t = 24)]
    pub detection_batch: usize,

    /// Initial keypoint batch size (halved on out-of-memory)
    #[arg(long, env = "MATCHLENS_KEYPOINT_BATCH", default_value_t = 8)]
    pub keypoint_batch: usize,

    /// Keypoints must score strictly above this to be used for homography
    #[arg(long, env = "MATCHLENS_KEYPOINT_THRESHOLD", default_value_t = 0.5)]
    pub keypoint_threshold: f32,

    /// Longest accepted clip in seconds
    #[arg(long, env = "MATCHLENS_MAX_SECONDS", default_value_t = 30.0)]
    pub max_seconds: f64,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl EngineArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            device: self.device,
            ..PipelineConfig::default()
        };
        config.tracking.detection_batch_size = self.detection_batch.max(1);
        config.pitch.keypoint_batch_size = self.keypoint_batch.max(1);
        config.pitch.keypoint_threshold = self.keypoint_threshold;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_command() {
        let args = Args::try_parse_from([
            "matchlens",
            "--detection-model",
            "model.onnx",
            "--detection-batch",
            "0",
            "process",
            "--input",
            "clip.mp4",
            "--produce",
            "voronoi",
        ])
        .unwrap();

        match &args.command {
            Command::Process { input, produce } => {
                assert_eq!(input, &PathBuf::from("clip.mp4"));
                assert_eq!(produce, "voronoi");
            }
            other => panic!("unexpected command {:?}", other),
        }

        let config = args.engine.pipeline_config();
        assert_eq!(config.tracking.detection_batch_size, 1);
        assert_eq!(config.pitch.keypoint_batch_size, 8);
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(args.engine.team_embedder, TeamEmbedder::Clip);
    }

    #[test]
    fn test_parse_team_embedder() {
        let args = Args::try_parse_from([
            "matchlens",
            "--detection-model",
            "model.onnx",
            "--team-embedder",
            "hsv",
            "serve",
        ])
        .unwrap();
        assert_eq!(args.engine.team_embedder, TeamEmbedder::Hsv);
    }
}
