//! Annotation primitives for the camera-view overlay.

use crate::pipeline::types::{BBox, Bgr, Team};
use anyhow::Result;
use opencv::core::{self, Mat, Point, Rect, Scalar, Size, Vector};
use opencv::imgproc::{self, FILLED, FONT_HERSHEY_SIMPLEX, LINE_4, LINE_8};
use opencv::prelude::*;

const ID_BOX_WIDTH: i32 = 40;
const ID_BOX_HEIGHT: i32 = 20;
const ID_BOX_OFFSET: i32 = 15;

/// Possession panel geometry, anchored to the bottom-right corner
/// (1350,850)-(1900,970) on a 1920x1080 frame.
const PANEL_RIGHT_MARGIN: i32 = 20;
const PANEL_BOTTOM_MARGIN: i32 = 110;
const PANEL_WIDTH: i32 = 550;
const PANEL_HEIGHT: i32 = 120;
const PANEL_ALPHA: f64 = 0.4;

/// Partial ellipse at the bbox foot, with an optional id tag below it.
pub fn draw_ellipse(frame: &mut Mat, bbox: &BBox, color: Bgr, track_id: Option<u32>) -> Result<()> {
    let y2 = bbox.y2 as i32;
    let x_center = bbox.center().x as i32;
    let width = bbox.width();

    imgproc::ellipse(
        frame,
        Point::new(x_center, y2),
        Size::new(width as i32, (0.35 * width) as i32),
        0.0,
        -45.0,
        235.0,
        color.to_scalar(),
        2,
        LINE_4,
        0,
    )?;

    let Some(track_id) = track_id else {
        return Ok(());
    };

    let x1_rect = x_center - ID_BOX_WIDTH / 2;
    let x2_rect = x_center + ID_BOX_WIDTH / 2;
    let y1_rect = y2 - ID_BOX_HEIGHT / 2 + ID_BOX_OFFSET;
    let y2_rect = y2 + ID_BOX_HEIGHT / 2 + ID_BOX_OFFSET;
    imgproc::rectangle_points(
        frame,
        Point::new(x1_rect, y1_rect),
        Point::new(x2_rect, y2_rect),
        color.to_scalar(),
        FILLED,
        LINE_8,
        0,
    )?;

    let mut x1_text = x1_rect + 6;
    if track_id > 99 {
        x1_text -= 10;
    }
    imgproc::put_text(
        frame,
        &track_id.to_string(),
        Point::new(x1_text, y1_rect + 15),
        FONT_HERSHEY_SIMPLEX,
        0.6,
        Bgr::BLACK.to_scalar(),
        2,
        LINE_8,
        false,
    )?;
    Ok(())
}

/// Downward-pointing marker above the bbox top edge.
pub fn draw_triangle(frame: &mut Mat, bbox: &BBox, color: Bgr) -> Result<()> {
    let y = bbox.y1 as i32;
    let x = bbox.center().x as i32;

    let mut triangle = Vector::<Point>::new();
    triangle.push(Point::new(x, y));
    triangle.push(Point::new(x - 10, y - 20));
    triangle.push(Point::new(x + 10, y - 20));
    let mut contours = Vector::<Vector<Point>>::new();
    contours.push(triangle);

    imgproc::fill_poly(
        frame,
        &contours,
        color.to_scalar(),
        LINE_8,
        0,
        Point::new(0, 0),
    )?;
    imgproc::polylines(frame, &contours, true, Bgr::BLACK.to_scalar(), 2, LINE_8, 0)?;
    Ok(())
}

/// Share of possessed frames per team over `possession`. Both are 0 when no
/// frame has possession.
pub fn control_shares(possession: &[Option<Team>]) -> (f64, f64) {
    let a = possession.iter().filter(|p| **p == Some(Team::A)).count();
    let b = possession.iter().filter(|p| **p == Some(Team::B)).count();
    let total = a + b;
    if total == 0 {
        return (0.0, 0.0);
    }
    (a as f64 / total as f64, b as f64 / total as f64)
}

/// Semi-transparent panel with cumulative ball control up to `frame_index`.
pub fn draw_possession_panel(
    frame: &mut Mat,
    possession: &[Option<Team>],
    frame_index: usize,
) -> Result<()> {
    let size = frame.size()?;
    let x1 = (size.width - PANEL_RIGHT_MARGIN - PANEL_WIDTH).max(0);
    let y1 = (size.height - PANEL_BOTTOM_MARGIN - PANEL_HEIGHT).max(0);

    let mut overlay = frame.try_clone()?;
    imgproc::rectangle(
        &mut overlay,
        Rect::new(x1, y1, PANEL_WIDTH, PANEL_HEIGHT),
        Scalar::all(255.0),
        FILLED,
        LINE_8,
        0,
    )?;
    let mut blended = Mat::default();
    core::add_weighted(&overlay, PANEL_ALPHA, &*frame, 1.0 - PANEL_ALPHA, 0.0, &mut blended, -1)?;
    *frame = blended;

    let upto = possession.len().min(frame_index + 1);
    let (team_a, team_b) = control_shares(&possession[..upto]);
    for (i, (team, share)) in [(Team::A, team_a), (Team::B, team_b)].iter().enumerate() {
        imgproc::put_text(
            frame,
            &format!("{} ball control: {:.2}%", team.label(), share * 100.0),
            Point::new(x1 + 50, y1 + 50 + 50 * i as i32),
            FONT_HERSHEY_SIMPLEX,
            1.0,
            Bgr::BLACK.to_scalar(),
            3,
            LINE_8,
            false,
        )?;
    }
    Ok(())
}
