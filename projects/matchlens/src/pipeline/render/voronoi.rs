//! Soft Voronoi control map between the two teams.

use crate::pipeline::config::RenderConfig;
use crate::pipeline::types::{Bgr, Point};
use anyhow::Result;
use opencv::core::{self, Mat, Size, CV_8UC3};
use opencv::imgproc;
use opencv::prelude::*;

/// Cell size used when downsampling a board of the given size.
pub fn grid_step(cols: i32, rows: i32) -> usize {
    if cols.max(rows) >= 800 {
        3
    } else {
        2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridKey {
    cols: i32,
    rows: i32,
    padding: i32,
    step: usize,
}

/// Cell coordinates in scaled pitch pixels (padding removed), reused across
/// frames while the board geometry is unchanged.
#[derive(Debug, Default)]
pub struct GridCache {
    key: Option<GridKey>,
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl GridCache {
    pub fn coordinates(&mut self, cols: i32, rows: i32, padding: i32) -> (&[f32], &[f32]) {
        let step = grid_step(cols, rows);
        let key = GridKey {
            cols,
            rows,
            padding,
            step,
        };
        if self.key != Some(key) {
            self.xs = (0..cols as usize)
                .step_by(step)
                .map(|x| (x as i32 - padding) as f32)
                .collect();
            self.ys = (0..rows as usize)
                .step_by(step)
                .map(|y| (y as i32 - padding) as f32)
                .collect();
            self.key = Some(key);
        }
        (&self.xs, &self.ys)
    }
}

fn nearest_d2(points: &[Point], x: f32, y: f32) -> f32 {
    points
        .iter()
        .map(|p| (p.x - x).powi(2) + (p.y - y).powi(2))
        .fold(f32::INFINITY, f32::min)
}

/// Blend factor per cell (row-major): 1 where team A dominates, 0 where team
/// B does. Player positions are in the same scaled units as the grid.
pub fn control_field(
    team_a: &[Point],
    team_b: &[Point],
    xs: &[f32],
    ys: &[f32],
    steepness: f32,
) -> Vec<f32> {
    let mut field = Vec::with_capacity(xs.len() * ys.len());
    for &y in ys {
        for &x in xs {
            let d2_a = nearest_d2(team_a, x, y);
            let d2_b = nearest_d2(team_b, x, y);
            let ratio = d2_b / (d2_a + d2_b).max(1e-5);
            field.push(((ratio - 0.5) * steepness).tanh() * 0.5 + 0.5);
        }
    }
    field
}

/// Composite the control map for the given pitch positions (centimeters) over
/// `background`. Points that did not project to finite coordinates are
/// ignored. With one team absent the overlay is that of the present team;
/// with both absent the background is returned unchanged.
pub fn draw_voronoi(
    background: &Mat,
    grid: &mut GridCache,
    team_a: &[Point],
    team_b: &[Point],
    config: &RenderConfig,
) -> Result<Mat> {
    let [color_a, color_b] = config.team_colors;
    let scale = config.board_scale;
    let to_scaled = |pts: &[Point]| -> Vec<Point> {
        pts.iter()
            .filter(|p| p.x.is_finite() && p.y.is_finite())
            .map(|p| Point::new(p.x * scale, p.y * scale))
            .collect()
    };
    let (a, b) = (to_scaled(team_a), to_scaled(team_b));

    let overlay = match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ok(background.try_clone()?),
        (false, true) => flat(background, color_a)?,
        (true, false) => flat(background, color_b)?,
        (false, false) => {
            let cols = background.cols();
            let rows = background.rows();
            let (xs, ys) = grid.coordinates(cols, rows, config.board_padding);
            let field = control_field(&a, &b, xs, ys, config.voronoi_steepness);

            let mut small = Mat::new_rows_cols_with_default(
                ys.len() as i32,
                xs.len() as i32,
                CV_8UC3,
                core::Scalar::all(0.0),
            )?;
            let bytes = small.data_bytes_mut()?;
            for (cell, blend) in bytes.chunks_exact_mut(3).zip(&field) {
                for c in 0..3 {
                    let v = blend * color_a.0[c] as f32 + (1.0 - blend) * color_b.0[c] as f32;
                    cell[c] = v.round().clamp(0.0, 255.0) as u8;
                }
            }

            let mut full = Mat::default();
            imgproc::resize(
                &small,
                &mut full,
                Size::new(cols, rows),
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )?;
            full
        }
    };

    let mut out = Mat::default();
    core::add_weighted(
        &overlay,
        config.voronoi_opacity as f64,
        background,
        1.0 - config.voronoi_opacity as f64,
        0.0,
        &mut out,
        -1,
    )?;
    Ok(out)
}

fn flat(like: &Mat, color: Bgr) -> Result<Mat> {
    Ok(Mat::new_rows_cols_with_default(
        like.rows(),
        like.cols(),
        CV_8UC3,
        color.to_scalar(),
    )?)
}
