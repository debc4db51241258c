//! Unsupervised two-team split from player appearance.

use crate::error::InferenceError;
use crate::pipeline::cluster::{Pca, TwoMeans};
use crate::pipeline::config::TeamConfig;
use crate::pipeline::crop::{average_color, crop_bbox, jersey_region, mean_bgr};
use crate::pipeline::types::{Bgr, Frame, ObjectClass, Team, TrackRecord, TrackTable};
use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use std::collections::HashMap;
use tracing::{info, warn};

/// Turns image crops into fixed-size feature vectors.
pub trait CropEmbedder: Send {
    fn embed(&mut self, crops: &[Mat]) -> Result<Vec<Vec<f32>>, InferenceError>;
}

/// Concatenated hue, saturation and value histograms, L2-normalized.
pub struct HsvHistogramEmbedder {
    bins: usize,
}

impl HsvHistogramEmbedder {
    pub fn new(bins: usize) -> Self {
        Self { bins: bins.max(1) }
    }

    pub fn dimension(&self) -> usize {
        self.bins * 3
    }

    fn histogram(&self, crop: &Mat) -> opencv::Result<Vec<f32>> {
        let mut hsv = Mat::default();
        imgproc::cvt_color_def(crop, &mut hsv, imgproc::COLOR_BGR2HSV)?;

        let bins = self.bins;
        let mut hist = vec![0.0f32; bins * 3];
        for px in hsv.data_bytes()?.chunks_exact(3) {
            // 8-bit hue spans 0..180
            let h = (px[0] as usize * bins / 180).min(bins - 1);
            let s = px[1] as usize * bins / 256;
            let v = px[2] as usize * bins / 256;
            hist[h] += 1.0;
            hist[bins + s] += 1.0;
            hist[2 * bins + v] += 1.0;
        }

        let norm = hist.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            hist.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(hist)
    }
}

impl Default for HsvHistogramEmbedder {
    fn default() -> Self {
        Self::new(16)
    }
}

impl CropEmbedder for HsvHistogramEmbedder {
    fn embed(&mut self, crops: &[Mat]) -> Result<Vec<Vec<f32>>, InferenceError> {
        crops
            .iter()
            .map(|crop| {
                self.histogram(crop)
                    .map_err(|e| InferenceError::Backend(format!("hsv histogram: {}", e)))
            })
            .collect()
    }
}

/// Fitted appearance model: projection, clusters and per-cluster colors.
struct TeamModel {
    pca: Pca,
    clusters: TwoMeans,
    colors: [Option<Bgr>; 2],
}

impl TeamModel {
    fn predict(&self, embeddings: &[Vec<f32>]) -> Vec<usize> {
        let reduced = self.pca.transform(&to_matrix(embeddings));
        reduced
            .row_iter()
            .map(|row| self.clusters.predict(&DVector::from_iterator(row.len(), row.iter().copied())))
            .collect()
    }
}

fn to_matrix(embeddings: &[Vec<f32>]) -> DMatrix<f32> {
    let dim = embeddings.first().map(|e| e.len()).unwrap_or(0);
    DMatrix::from_fn(embeddings.len(), dim, |i, j| {
        embeddings[i].get(j).copied().unwrap_or(0.0)
    })
}

/// Crops of every team-eligible track in one frame.
fn member_crops(
    table: &TrackTable,
    frame: &Frame,
    classes: &[ObjectClass],
) -> Result<Vec<((ObjectClass, u32), Mat)>> {
    let mut crops = Vec::new();
    for (class, id, record) in table.team_members(frame.index) {
        if !classes.contains(&class) {
            continue;
        }
        if let Some(crop) = crop_bbox(&frame.mat, &record.bbox)? {
            crops.push(((class, id), crop));
        }
    }
    Ok(crops)
}

fn fit(
    table: &TrackTable,
    frames: &[Frame],
    embedder: &mut dyn CropEmbedder,
    config: &TeamConfig,
) -> Result<Option<TeamModel>> {
    let stride = config.crop_stride.max(1);
    let mut crops = Vec::new();
    for frame in frames.iter().filter(|f| f.index % stride == 0) {
        crops.extend(
            member_crops(table, frame, &[ObjectClass::Player])?
                .into_iter()
                .map(|(_, crop)| crop),
        );
    }

    if crops.is_empty() {
        return Ok(None);
    }

    let embeddings = embedder.embed(&crops)?;
    let matrix = to_matrix(&embeddings);
    let pca = Pca::fit(&matrix, config.components);
    let reduced = pca.transform(&matrix);
    let points: Vec<DVector<f32>> = reduced
        .row_iter()
        .map(|row| DVector::from_iterator(row.len(), row.iter().copied()))
        .collect();
    let Some(clusters) = TwoMeans::fit(&points, config.max_iterations) else {
        return Ok(None);
    };
    if clusters.is_degenerate() {
        warn!("team clustering is degenerate, every player gets team 0");
    }

    let mut means: [Vec<[f64; 3]>; 2] = [Vec::new(), Vec::new()];
    for (crop, point) in crops.iter().zip(&points) {
        if let Some(jersey) = jersey_region(crop)? {
            means[clusters.predict(point)].push(mean_bgr(&jersey)?);
        }
    }

    info!("fitted team model on {} crops", crops.len());
    Ok(Some(TeamModel {
        pca,
        clusters,
        colors: [average_color(&means[0]), average_color(&means[1])],
    }))
}

/// Label every player and goalkeeper track with a team and its color.
///
/// Labels are decided per track by majority vote over all its frames
/// (ties go to team 0), so a track never changes team. Without any player
/// crops to fit on the table is returned unchanged.
pub fn assign_teams(
    table: TrackTable,
    frames: &[Frame],
    embedder: &mut dyn CropEmbedder,
    config: &TeamConfig,
) -> Result<TrackTable> {
    let Some(model) = fit(&table, frames, embedder, config)? else {
        info!("no player crops found, skipping team assignment");
        return Ok(table);
    };

    let mut votes: HashMap<(ObjectClass, u32), [usize; 2]> = HashMap::new();
    for frame in frames {
        let crops = member_crops(
            &table,
            frame,
            &[ObjectClass::Player, ObjectClass::Goalkeeper],
        )?;
        if crops.is_empty() {
            continue;
        }
        let (keys, mats): (Vec<_>, Vec<_>) = crops.into_iter().unzip();
        let embeddings = embedder.embed(&mats)?;
        for (key, label) in keys.into_iter().zip(model.predict(&embeddings)) {
            votes.entry(key).or_default()[label] += 1;
        }
    }

    let labels: HashMap<(ObjectClass, u32), Team> = votes
        .into_iter()
        .map(|(key, [a, b])| (key, Team::from_index(usize::from(b > a))))
        .collect();

    let table = [ObjectClass::Player, ObjectClass::Goalkeeper]
        .into_iter()
        .fold(table, |table, class| {
            table.map_class(class, |_, id, record| match labels.get(&(class, id)) {
                Some(team) => TrackRecord {
                    team: Some(*team),
                    team_color: model.colors[team.index()],
                    ..record.clone()
                },
                None => record.clone(),
            })
        });

    Ok(table)
}
