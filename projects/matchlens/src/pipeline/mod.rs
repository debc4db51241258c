// Match analysis pipeline: detection, tracking, teams, homography, rendering

pub mod backends;
pub mod batch;
pub mod clip;
pub mod cluster;
pub mod config;
pub mod crop;
pub mod detection;
pub mod homography;
pub mod keypoints;
pub mod orchestrator;
pub mod pitch;
pub mod render;
pub mod team;
pub mod tracker;
pub mod types;
pub mod worker;
