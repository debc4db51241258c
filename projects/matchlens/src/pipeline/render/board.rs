//! Top-down pitch drawing.

use crate::pipeline::config::RenderConfig;
use crate::pipeline::pitch::SoccerPitchConfiguration;
use crate::pipeline::types::{Bgr, Point};
use anyhow::Result;
use opencv::core::{self, Mat, CV_8UC3};
use opencv::imgproc::{self, FILLED, LINE_8};

/// Board canvas size in pixels, (width, height).
pub fn board_size(pitch: &SoccerPitchConfiguration, config: &RenderConfig) -> (i32, i32) {
    let scaled_width = (pitch.width * config.board_scale) as i32;
    let scaled_length = (pitch.length * config.board_scale) as i32;
    (
        scaled_length + 2 * config.board_padding,
        scaled_width + 2 * config.board_padding,
    )
}

/// Pitch centimeters to board pixels.
pub fn to_board(p: Point, config: &RenderConfig) -> core::Point {
    core::Point::new(
        (p.x * config.board_scale) as i32 + config.board_padding,
        (p.y * config.board_scale) as i32 + config.board_padding,
    )
}

/// Green pitch with white markings, centre circle and penalty spots.
pub fn draw_pitch(pitch: &SoccerPitchConfiguration, config: &RenderConfig) -> Result<Mat> {
    let (cols, rows) = board_size(pitch, config);
    let mut image = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, config.board_color.to_scalar())?;
    let line = config.line_color.to_scalar();

    let vertices = pitch.vertices();
    for (start, end) in pitch.edges() {
        imgproc::line(
            &mut image,
            to_board(vertices[start], config),
            to_board(vertices[end], config),
            line,
            config.line_thickness,
            LINE_8,
            0,
        )?;
    }

    imgproc::circle(
        &mut image,
        to_board(pitch.centre_spot(), config),
        (pitch.centre_circle_radius * config.board_scale) as i32,
        line,
        config.line_thickness,
        LINE_8,
        0,
    )?;

    for spot in pitch.penalty_spots() {
        imgproc::circle(
            &mut image,
            to_board(spot, config),
            config.point_radius,
            line,
            FILLED,
            LINE_8,
            0,
        )?;
    }

    Ok(image)
}

/// Filled discs with an outline at pitch positions. Non-finite points are skipped.
pub fn draw_points(
    board: &mut Mat,
    points: &[Point],
    face: Bgr,
    edge: Bgr,
    radius: i32,
    config: &RenderConfig,
) -> Result<()> {
    for p in points.iter().filter(|p| p.x.is_finite() && p.y.is_finite()) {
        let center = to_board(*p, config);
        imgproc::circle(board, center, radius, face.to_scalar(), FILLED, LINE_8, 0)?;
        imgproc::circle(board, center, radius, edge.to_scalar(), 2, LINE_8, 0)?;
    }
    Ok(())
}
