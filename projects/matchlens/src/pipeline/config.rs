use crate::pipeline::types::Bgr;
use serde::{Deserialize, Serialize};

/// Where inference runs.
#[derive(clap::ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    #[value(name = "coreml")]
    CoreMl,
}

/// Appearance features used to split players into teams.
#[derive(clap::ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TeamEmbedder {
    /// Pretrained CLIP ViT-B/32 image encoder
    #[default]
    Clip,
    /// HSV color histograms; needs no model
    Hsv,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub detection_batch_size: usize,
    /// Detections below this are dropped before tracking
    pub detection_min_conf: f32,
    /// Split between the first and second association passes
    pub high_conf: f32,
    /// Unmatched detections must reach this to start a track
    pub new_track_conf: f32,
    pub match_iou: f32,
    pub low_match_iou: f32,
    pub max_lost_frames: usize,
    pub ball_box_size: f32,
    pub max_player_ball_distance: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            detection_batch_size: 24,
            detection_min_conf: 0.2,
            high_conf: 0.25,
            new_track_conf: 0.35,
            match_iou: 0.2,
            low_match_iou: 0.5,
            max_lost_frames: 30,
            ball_box_size: 20.0,
            max_player_ball_distance: 70.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeamConfig {
    /// Sample player crops every N frames for fitting
    pub crop_stride: usize,
    pub components: usize,
    pub max_iterations: usize,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            crop_stride: 30,
            components: 3,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PitchSettings {
    pub keypoint_batch_size: usize,
    /// Keypoints must score strictly above this
    pub keypoint_threshold: f32,
}

impl Default for PitchSettings {
    fn default() -> Self {
        Self {
            keypoint_batch_size: 8,
            keypoint_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub board_padding: i32,
    pub board_scale: f32,
    pub line_thickness: i32,
    pub point_radius: i32,
    pub board_color: Bgr,
    pub line_color: Bgr,
    pub voronoi_opacity: f32,
    pub voronoi_steepness: f32,
    pub team_colors: [Bgr; 2],
    pub referee_color: Bgr,
    pub vertex_color: Bgr,
    pub edge_color: Bgr,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            board_padding: 50,
            board_scale: 0.1,
            line_thickness: 4,
            point_radius: 8,
            board_color: Bgr::from_rgb(34, 139, 34),
            line_color: Bgr::WHITE,
            voronoi_opacity: 0.5,
            voronoi_steepness: 15.0,
            team_colors: [Bgr::from_rgb(0x00, 0xBF, 0xFF), Bgr::from_rgb(0xFF, 0x14, 0x93)],
            referee_color: Bgr::from_rgb(0xFF, 0xD7, 0x00),
            vertex_color: Bgr::from_rgb(0xFF, 0x14, 0x93),
            edge_color: Bgr::from_rgb(0x00, 0x0F, 0xFF),
        }
    }
}

/// Everything a job needs to know besides its input and products.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub device: Device,
    pub tracking: TrackingConfig,
    pub team: TeamConfig,
    pub pitch: PitchSettings,
    pub render: RenderConfig,
}
