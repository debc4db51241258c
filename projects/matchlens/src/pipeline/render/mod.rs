//! Per-product frame renderers over the shared job analysis.

pub mod board;
pub mod draw;
pub mod voronoi;

use crate::pipeline::config::RenderConfig;
use crate::pipeline::homography::FrameHomography;
use crate::pipeline::pitch::SoccerPitchConfiguration;
use crate::pipeline::types::{Bgr, Frame, ObjectClass, Point, Product, Team, TrackTable};
use anyhow::{anyhow, Result};
use opencv::core::{self, Mat};
use opencv::imgproc::{self, FILLED, LINE_8};
use opencv::prelude::*;

const BALL_RADIUS: i32 = 10;
const PERSON_RADIUS: i32 = 16;
const VERTEX_RADIUS: i32 = 6;
const EDGE_THICKNESS: i32 = 2;

/// Everything renderers read. Built once per job and shared by all products.
pub struct RenderContext<'a> {
    pub frames: &'a [Frame],
    pub tracks: &'a TrackTable,
    pub possession: &'a [Option<Team>],
    /// One entry per frame; empty when no pitch product was requested
    pub homographies: &'a [FrameHomography],
    pub pitch: &'a SoccerPitchConfiguration,
    pub config: &'a RenderConfig,
}

impl<'a> RenderContext<'a> {
    fn frame(&self, index: usize) -> Result<&'a Frame> {
        self.frames
            .get(index)
            .ok_or_else(|| anyhow!("frame {} out of range", index))
    }

    fn homography(&self, index: usize) -> Option<&'a FrameHomography> {
        self.homographies.get(index)
    }

    /// Positions of one class projected to pitch coordinates, paired with
    /// their records' team and color.
    fn projected(
        &self,
        index: usize,
        classes: &[ObjectClass],
    ) -> Vec<(Point, Option<Team>, Option<Bgr>)> {
        let Some(transform) = self.homography(index).and_then(|h| h.image_to_pitch()) else {
            return Vec::new();
        };
        classes
            .iter()
            .filter_map(|class| self.tracks.frame(*class, index))
            .flat_map(|tracks| tracks.values())
            .map(|r| (transform.apply_point(r.position), r.team, r.team_color))
            .collect()
    }
}

/// Produces the output image for one frame of one product.
pub trait FrameRenderer {
    fn render(&mut self, index: usize) -> Result<Mat>;
}

pub fn renderer_for<'a>(
    product: Product,
    ctx: &'a RenderContext<'a>,
) -> Result<Box<dyn FrameRenderer + 'a>> {
    Ok(match product {
        Product::Detections => Box::new(DetectionsRenderer { ctx }),
        Product::PitchEdges => Box::new(PitchEdgesRenderer {
            ctx,
            vertices: ctx.pitch.vertices(),
        }),
        Product::TacticalBoard => Box::new(TacticalBoardRenderer {
            ctx,
            background: board::draw_pitch(ctx.pitch, ctx.config)?,
        }),
        Product::Voronoi => Box::new(VoronoiRenderer {
            ctx,
            background: board::draw_pitch(ctx.pitch, ctx.config)?,
            grid: voronoi::GridCache::default(),
        }),
    })
}

/// Camera view with track markers and the possession panel.
pub struct DetectionsRenderer<'a> {
    ctx: &'a RenderContext<'a>,
}

impl FrameRenderer for DetectionsRenderer<'_> {
    fn render(&mut self, index: usize) -> Result<Mat> {
        let mut canvas = self.ctx.frame(index)?.mat.try_clone()?;
        let tracks = self.ctx.tracks;

        for (_, id, record) in tracks.team_members(index) {
            let color = record.team_color.unwrap_or(Bgr::RED);
            draw::draw_ellipse(&mut canvas, &record.bbox, color, Some(id))?;
            if record.has_ball {
                draw::draw_triangle(&mut canvas, &record.bbox, Bgr::RED)?;
            }
        }

        if let Some(referees) = tracks.frame(ObjectClass::Referee, index) {
            for record in referees.values() {
                draw::draw_ellipse(&mut canvas, &record.bbox, Bgr::YELLOW, None)?;
            }
        }

        if let Some(ball) = tracks.ball(index) {
            draw::draw_triangle(&mut canvas, &ball.bbox, Bgr::GREEN)?;
        }

        draw::draw_possession_panel(&mut canvas, self.ctx.possession, index)?;
        Ok(canvas)
    }
}

/// Camera view with the projected pitch schema. Degenerate frames pass through.
pub struct PitchEdgesRenderer<'a> {
    ctx: &'a RenderContext<'a>,
    vertices: Vec<Point>,
}

impl FrameRenderer for PitchEdgesRenderer<'_> {
    fn render(&mut self, index: usize) -> Result<Mat> {
        let mut canvas = self.ctx.frame(index)?.mat.try_clone()?;
        let Some(transform) = self.ctx.homography(index).and_then(|h| h.pitch_to_image()) else {
            return Ok(canvas);
        };

        let projected = transform.apply(&self.vertices);
        let to_pixel = |p: &Point| {
            (p.x.is_finite() && p.y.is_finite()).then(|| core::Point::new(p.x as i32, p.y as i32))
        };

        let edge = self.ctx.config.edge_color.to_scalar();
        for (a, b) in self.ctx.pitch.edges() {
            if let (Some(p1), Some(p2)) = (to_pixel(&projected[a]), to_pixel(&projected[b])) {
                imgproc::line(&mut canvas, p1, p2, edge, EDGE_THICKNESS, LINE_8, 0)?;
            }
        }

        let vertex = self.ctx.config.vertex_color.to_scalar();
        for p in projected.iter().filter_map(to_pixel) {
            imgproc::circle(&mut canvas, p, VERTEX_RADIUS, vertex, FILLED, LINE_8, 0)?;
        }
        Ok(canvas)
    }
}

/// Top-down board with ball, players and referees.
pub struct TacticalBoardRenderer<'a> {
    ctx: &'a RenderContext<'a>,
    background: Mat,
}

impl FrameRenderer for TacticalBoardRenderer<'_> {
    fn render(&mut self, index: usize) -> Result<Mat> {
        let mut canvas = self.background.try_clone()?;
        let ctx = self.ctx;
        let config = ctx.config;

        let ball: Vec<Point> = ctx
            .projected(index, &[ObjectClass::Ball])
            .into_iter()
            .map(|(p, _, _)| p)
            .collect();
        board::draw_points(&mut canvas, &ball, Bgr::WHITE, Bgr::BLACK, BALL_RADIUS, config)?;

        for (p, team, color) in ctx.projected(index, &[ObjectClass::Player, ObjectClass::Goalkeeper]) {
            let face = color
                .or_else(|| team.map(|t| config.team_colors[t.index()]))
                .unwrap_or(Bgr::RED);
            board::draw_points(&mut canvas, &[p], face, Bgr::BLACK, PERSON_RADIUS, config)?;
        }

        let referees: Vec<Point> = ctx
            .projected(index, &[ObjectClass::Referee])
            .into_iter()
            .map(|(p, _, _)| p)
            .collect();
        board::draw_points(
            &mut canvas,
            &referees,
            config.referee_color,
            Bgr::BLACK,
            PERSON_RADIUS,
            config,
        )?;

        Ok(canvas)
    }
}

/// Board overlaid with the soft control regions of each team.
pub struct VoronoiRenderer<'a> {
    ctx: &'a RenderContext<'a>,
    background: Mat,
    grid: voronoi::GridCache,
}

impl FrameRenderer for VoronoiRenderer<'_> {
    fn render(&mut self, index: usize) -> Result<Mat> {
        let mut team_a = Vec::new();
        let mut team_b = Vec::new();
        for (p, team, _) in self
            .ctx
            .projected(index, &[ObjectClass::Player, ObjectClass::Goalkeeper])
        {
            match team {
                Some(Team::A) => team_a.push(p),
                Some(Team::B) => team_b.push(p),
                None => {}
            }
        }

        voronoi::draw_voronoi(
            &self.background,
            &mut self.grid,
            &team_a,
            &team_b,
            self.ctx.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::keypoints::Keypoint;
    use crate::pipeline::types::{BBox, TrackRecord};
    use opencv::core::{Scalar, Vec3b, CV_8UC3};

    fn gray_frame(index: usize) -> Frame {
        Frame {
            index,
            mat: Mat::new_rows_cols_with_default(720, 1280, CV_8UC3, Scalar::all(90.0)).unwrap(),
        }
    }

    /// Keypoints from a simple scaling of the pitch into the image.
    fn valid_homography(pitch: &SoccerPitchConfiguration) -> FrameHomography {
        let vertices = pitch.vertices();
        let keypoints: Vec<Keypoint> = vertices
            .iter()
            .map(|v| Keypoint {
                x: v.x * 0.1 + 40.0,
                y: v.y * 0.1 + 10.0,
                confidence: 0.9,
            })
            .collect();
        FrameHomography::estimate(&keypoints, &vertices, 0.5)
    }

    #[test]
    fn test_degenerate_frames_pass_through() {
        let pitch = SoccerPitchConfiguration::default();
        let config = RenderConfig::default();
        let frames = vec![gray_frame(0)];
        let tracks = TrackTable::new(1);
        let homographies = vec![FrameHomography::Degenerate { pairs: 2 }];
        let ctx = RenderContext {
            frames: &frames,
            tracks: &tracks,
            possession: &[None],
            homographies: &homographies,
            pitch: &pitch,
            config: &config,
        };

        let edges = renderer_for(Product::PitchEdges, &ctx).unwrap().render(0).unwrap();
        assert_eq!(edges.at_2d::<Vec3b>(0, 0).unwrap().0, [90, 90, 90]);
        assert_eq!(edges.at_2d::<Vec3b>(10, 40).unwrap().0, [90, 90, 90]);

        let board = renderer_for(Product::TacticalBoard, &ctx).unwrap().render(0).unwrap();
        let background = board::draw_pitch(&pitch, &config).unwrap();
        assert_eq!(board.data_bytes().unwrap(), background.data_bytes().unwrap());
    }

    #[test]
    fn test_pitch_edges_draw_on_valid_frames() {
        let pitch = SoccerPitchConfiguration::default();
        let config = RenderConfig::default();
        let frames = vec![gray_frame(0)];
        let tracks = TrackTable::new(1);
        let homographies = vec![valid_homography(&pitch)];
        assert!(homographies[0].is_valid());
        let ctx = RenderContext {
            frames: &frames,
            tracks: &tracks,
            possession: &[None],
            homographies: &homographies,
            pitch: &pitch,
            config: &config,
        };

        let out = renderer_for(Product::PitchEdges, &ctx).unwrap().render(0).unwrap();
        // corner vertex (0, 0) lands on (40, 10)
        assert_eq!(out.at_2d::<Vec3b>(10, 40).unwrap().0, config.vertex_color.0);
    }

    #[test]
    fn test_tactical_board_places_players() {
        let pitch = SoccerPitchConfiguration::default();
        let config = RenderConfig::default();
        let frames = vec![gray_frame(0)];
        let mut tracks = TrackTable::new(1);
        // foot at image (340, 360) -> pitch (3000, 3500)
        let mut record =
            TrackRecord::new(ObjectClass::Player, BBox::new(330.0, 300.0, 350.0, 360.0), 0.9);
        record.team = Some(Team::B);
        record.team_color = Some(Bgr::from_rgb(200, 10, 10));
        tracks.insert(ObjectClass::Player, 0, 4, record);

        let homographies = vec![valid_homography(&pitch)];
        let ctx = RenderContext {
            frames: &frames,
            tracks: &tracks,
            possession: &[None],
            homographies: &homographies,
            pitch: &pitch,
            config: &config,
        };
        let out = renderer_for(Product::TacticalBoard, &ctx).unwrap().render(0).unwrap();
        assert_eq!(out.at_2d::<Vec3b>(400, 350).unwrap().0, [10, 10, 200]);
    }

    #[test]
    fn test_detections_overlay_marks_ball() {
        let pitch = SoccerPitchConfiguration::default();
        let config = RenderConfig::default();
        let frames = vec![gray_frame(0)];
        let mut tracks = TrackTable::new(1);
        tracks.insert(
            ObjectClass::Ball,
            0,
            crate::pipeline::types::BALL_ID,
            TrackRecord::new(ObjectClass::Ball, BBox::new(600.0, 400.0, 620.0, 420.0), 0.9),
        );
        let ctx = RenderContext {
            frames: &frames,
            tracks: &tracks,
            possession: &[None],
            homographies: &[],
            pitch: &pitch,
            config: &config,
        };
        let out = renderer_for(Product::Detections, &ctx).unwrap().render(0).unwrap();
        assert_eq!(out.at_2d::<Vec3b>(388, 610).unwrap().0, [0, 255, 0]);
        // source frame untouched
        assert_eq!(frames[0].mat.at_2d::<Vec3b>(388, 610).unwrap().0, [90, 90, 90]);
    }
}
