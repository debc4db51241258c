//! Tracking-by-detection, ball gap filling and possession.
//!
//! The association follows ByteTrack: high-confidence detections are matched
//! first against live and recently lost tracks, then the remaining live tracks
//! get a second chance against low-confidence detections. Matching is greedy
//! on IoU against a constant-velocity prediction.

use crate::pipeline::config::TrackingConfig;
use crate::pipeline::detection::Detection;
use crate::pipeline::types::{
    BBox, FrameTracks, ObjectClass, Point, PossessionSequence, Team, TrackRecord, TrackTable,
    BALL_ID,
};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    Tracked,
    Lost,
}

#[derive(Debug, Clone)]
struct Track {
    id: u32,
    class: ObjectClass,
    bbox: BBox,
    /// Center displacement per frame
    velocity: (f32, f32),
    state: TrackState,
    last_seen: usize,
}

impl Track {
    fn predicted(&self, frame: usize) -> BBox {
        let dt = frame.saturating_sub(self.last_seen) as f32;
        self.bbox
            .translated(self.velocity.0 * dt, self.velocity.1 * dt)
    }

    fn update(&mut self, frame: usize, bbox: BBox) {
        let dt = frame.saturating_sub(self.last_seen).max(1) as f32;
        let old = self.bbox.center();
        let new = bbox.center();
        self.velocity = ((new.x - old.x) / dt, (new.y - old.y) / dt);
        self.bbox = bbox;
        self.last_seen = frame;
        self.state = TrackState::Tracked;
    }
}

/// Multi-class tracker with one id space shared across classes.
pub struct ByteTracker {
    config: TrackingConfig,
    tracks: Vec<Track>,
    next_id: u32,
}

impl ByteTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            // id 1 belongs to the ball
            next_id: BALL_ID + 1,
        }
    }

    /// Feed one frame of detections and return the (class, id, detection)
    /// triples confirmed in this frame. Ball detections are ignored.
    pub fn update<'a>(
        &mut self,
        frame: usize,
        detections: &'a [Detection],
    ) -> Vec<(ObjectClass, u32, &'a Detection)> {
        let mut confirmed = Vec::new();

        for class in [
            ObjectClass::Player,
            ObjectClass::Goalkeeper,
            ObjectClass::Referee,
        ] {
            let (high, low): (Vec<&Detection>, Vec<&Detection>) = detections
                .iter()
                .filter(|d| d.class == class && d.confidence >= self.config.detection_min_conf)
                .partition(|d| d.confidence >= self.config.high_conf);

            let candidates: Vec<usize> = (0..self.tracks.len())
                .filter(|&i| self.tracks[i].class == class)
                .collect();

            // First pass: high-confidence detections against every track of the class
            let first = greedy_match(
                &self.tracks,
                &candidates,
                &high,
                frame,
                self.config.match_iou,
            );
            let mut matched_tracks: HashSet<usize> = HashSet::new();
            let mut matched_high: HashSet<usize> = HashSet::new();
            for (ti, di) in first {
                self.tracks[ti].update(frame, high[di].bbox);
                matched_tracks.insert(ti);
                matched_high.insert(di);
                confirmed.push((class, self.tracks[ti].id, high[di]));
            }

            // Second pass: remaining live tracks against low-confidence detections
            let live: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|i| !matched_tracks.contains(i) && self.tracks[*i].state == TrackState::Tracked)
                .collect();
            let second = greedy_match(
                &self.tracks,
                &live,
                &low,
                frame,
                self.config.low_match_iou,
            );
            for (ti, di) in second {
                self.tracks[ti].update(frame, low[di].bbox);
                matched_tracks.insert(ti);
                confirmed.push((class, self.tracks[ti].id, low[di]));
            }

            for &ti in &candidates {
                if !matched_tracks.contains(&ti) {
                    self.tracks[ti].state = TrackState::Lost;
                }
            }

            for (di, det) in high.iter().enumerate() {
                if matched_high.contains(&di) || det.confidence < self.config.new_track_conf {
                    continue;
                }
                let id = self.next_id;
                self.next_id += 1;
                self.tracks.push(Track {
                    id,
                    class,
                    bbox: det.bbox,
                    velocity: (0.0, 0.0),
                    state: TrackState::Tracked,
                    last_seen: frame,
                });
                confirmed.push((class, id, *det));
            }
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks
            .retain(|t| frame.saturating_sub(t.last_seen) <= max_lost);

        confirmed
    }
}

/// Greedy IoU assignment, best pairs first. Returns (track index, detection index).
fn greedy_match(
    tracks: &[Track],
    candidates: &[usize],
    detections: &[&Detection],
    frame: usize,
    min_iou: f32,
) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
    for &ti in candidates {
        let predicted = tracks[ti].predicted(frame);
        for (di, det) in detections.iter().enumerate() {
            let iou = predicted.iou(&det.bbox);
            if iou >= min_iou {
                pairs.push((iou, ti, di));
            }
        }
    }
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut used_tracks = HashSet::new();
    let mut used_dets = HashSet::new();
    let mut matches = Vec::new();
    for (_, ti, di) in pairs {
        if used_tracks.contains(&ti) || used_dets.contains(&di) {
            continue;
        }
        used_tracks.insert(ti);
        used_dets.insert(di);
        matches.push((ti, di));
    }
    matches
}

/// Build the raw TrackTable from per-frame detections.
pub fn track_detections(detections: &[Vec<Detection>], config: &TrackingConfig) -> TrackTable {
    let mut tracker = ByteTracker::new(config.clone());
    let mut table = TrackTable::new(detections.len());

    for (frame, dets) in detections.iter().enumerate() {
        for (class, id, det) in tracker.update(frame, dets) {
            table.insert(class, frame, id, TrackRecord::new(class, det.bbox, det.confidence));
        }

        let ball = dets
            .iter()
            .filter(|d| d.class == ObjectClass::Ball)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
        if let Some(ball) = ball {
            table.insert(
                ObjectClass::Ball,
                frame,
                BALL_ID,
                TrackRecord::new(ObjectClass::Ball, ball.bbox, ball.confidence),
            );
        }
    }

    debug!("tracked {} frames, {} ids issued", detections.len(), tracker.next_id - BALL_ID - 1);
    table
}

/// Fill ball gaps by linear interpolation between observed centers.
///
/// Frames outside the observed range take the nearest observation. With fewer
/// than two observations the table is returned unchanged.
pub fn interpolate_ball(table: TrackTable, config: &TrackingConfig) -> TrackTable {
    let observed: Vec<(usize, Point, f32)> = table
        .series(ObjectClass::Ball)
        .iter()
        .enumerate()
        .filter_map(|(i, tracks)| tracks.get(&BALL_ID).map(|r| (i, r.position, r.confidence)))
        .collect();

    if observed.len() < 2 {
        return table;
    }

    let size = config.ball_box_size;
    let series: Vec<FrameTracks> = (0..table.frame_count())
        .map(|frame| {
            let (center, confidence) = interpolate_at(&observed, frame);
            let bbox = BBox::around(center, size, size);
            FrameTracks::from([(BALL_ID, TrackRecord::new(ObjectClass::Ball, bbox, confidence))])
        })
        .collect();

    table.with_class(ObjectClass::Ball, series)
}

fn interpolate_at(observed: &[(usize, Point, f32)], frame: usize) -> (Point, f32) {
    let (first, last) = (observed[0], observed[observed.len() - 1]);
    if frame <= first.0 {
        return (first.1, if frame == first.0 { first.2 } else { 0.0 });
    }
    if frame >= last.0 {
        return (last.1, if frame == last.0 { last.2 } else { 0.0 });
    }

    // First observation at or after `frame`; it exists and is not the first one
    let next = observed.partition_point(|(i, _, _)| *i < frame);
    let (i1, p1, c1) = observed[next];
    if i1 == frame {
        return (p1, c1);
    }
    let (i0, p0, _) = observed[next - 1];
    let t = (frame - i0) as f32 / (i1 - i0) as f32;
    (
        Point::new(p0.x + (p1.x - p0.x) * t, p0.y + (p1.y - p0.y) * t),
        0.0,
    )
}

/// Credit each frame's ball to the nearest player or goalkeeper.
///
/// The nearest candidate within `max_player_ball_distance` (inclusive) gets
/// `has_ball`. Frames without a teamed candidate keep the previous label;
/// frame 0 starts at `None`.
pub fn assign_possession(
    table: TrackTable,
    config: &TrackingConfig,
) -> (TrackTable, PossessionSequence) {
    let mut possession: PossessionSequence = Vec::with_capacity(table.frame_count());
    let mut holders: HashSet<(usize, ObjectClass, u32)> = HashSet::new();

    for frame in 0..table.frame_count() {
        let holder = table.ball(frame).and_then(|ball| {
            table
                .team_members(frame)
                .map(|(class, id, record)| (class, id, record, record.position.distance(&ball.position)))
                .filter(|(_, _, _, d)| *d <= config.max_player_ball_distance)
                .fold(None, |best: Option<(ObjectClass, u32, &TrackRecord, f32)>, c| match best {
                    Some(b) if b.3 <= c.3 => Some(b),
                    _ => Some(c),
                })
        });

        let credited: Option<Team> = holder.and_then(|(class, id, record, _)| {
            let team = record.team?;
            holders.insert((frame, class, id));
            Some(team)
        });

        let label = match credited {
            Some(team) => Some(team),
            None => possession.last().copied().flatten(),
        };
        possession.push(label);
    }

    let table = [ObjectClass::Player, ObjectClass::Goalkeeper]
        .into_iter()
        .fold(table, |table, class| {
            table.map_class(class, |frame, id, record| TrackRecord {
                has_ball: holders.contains(&(frame, class, id)),
                ..record.clone()
            })
        });

    (table, possession)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: ObjectClass, x: f32, y: f32, conf: f32) -> Detection {
        Detection {
            bbox: BBox::new(x, y, x + 20.0, y + 40.0),
            confidence: conf,
            class,
        }
    }

    fn ball_at(x: f32, y: f32) -> Detection {
        Detection {
            bbox: BBox::around(Point::new(x, y), 10.0, 10.0),
            confidence: 0.9,
            class: ObjectClass::Ball,
        }
    }

    #[test]
    fn test_ids_are_stable_while_detections_persist() {
        let frames: Vec<Vec<Detection>> = (0..5)
            .map(|i| {
                vec![
                    det(ObjectClass::Player, 100.0 + i as f32 * 2.0, 100.0, 0.9),
                    det(ObjectClass::Player, 400.0 - i as f32 * 2.0, 100.0, 0.9),
                    det(ObjectClass::Referee, 250.0, 300.0, 0.8),
                ]
            })
            .collect();
        let table = track_detections(&frames, &TrackingConfig::default());

        let first: Vec<u32> = table.frame(ObjectClass::Player, 0).unwrap().keys().copied().collect();
        assert_eq!(first.len(), 2);
        for i in 1..5 {
            let ids: Vec<u32> = table.frame(ObjectClass::Player, i).unwrap().keys().copied().collect();
            assert_eq!(ids, first);
        }

        let referee: Vec<u32> = table.frame(ObjectClass::Referee, 0).unwrap().keys().copied().collect();
        assert_eq!(referee.len(), 1);
        assert!(!first.contains(&referee[0]));
        assert!(!first.contains(&BALL_ID));
    }

    #[test]
    fn test_lost_track_is_recovered_then_dropped() {
        let config = TrackingConfig {
            max_lost_frames: 2,
            ..TrackingConfig::default()
        };
        let player = det(ObjectClass::Player, 100.0, 100.0, 0.9);
        let frames = vec![
            vec![player.clone()],
            vec![],
            vec![player.clone()],
            vec![],
            vec![],
            vec![],
            vec![player.clone()],
        ];
        let table = track_detections(&frames, &config);
        let id_at = |i: usize| *table.frame(ObjectClass::Player, i).unwrap().keys().next().unwrap();

        assert_eq!(id_at(0), id_at(2));
        assert_ne!(id_at(2), id_at(6));
    }

    #[test]
    fn test_low_confidence_never_starts_a_track() {
        let frames = vec![vec![det(ObjectClass::Player, 10.0, 10.0, 0.22)]];
        let table = track_detections(&frames, &TrackingConfig::default());
        assert!(table.frame(ObjectClass::Player, 0).unwrap().is_empty());
    }

    #[test]
    fn test_best_ball_detection_wins() {
        let mut weak = ball_at(50.0, 50.0);
        weak.confidence = 0.3;
        let frames = vec![vec![weak, ball_at(200.0, 80.0)]];
        let table = track_detections(&frames, &TrackingConfig::default());
        assert_eq!(table.ball(0).unwrap().position, Point::new(200.0, 80.0));
    }

    #[test]
    fn test_ball_interpolates_on_a_straight_line() {
        let mut frames: Vec<Vec<Detection>> = vec![vec![]; 11];
        frames[0] = vec![ball_at(0.0, 0.0)];
        frames[10] = vec![ball_at(100.0, 50.0)];
        let config = TrackingConfig::default();
        let table = interpolate_ball(track_detections(&frames, &config), &config);

        for i in 0..=10 {
            let ball = table.ball(i).unwrap();
            let expected = Point::new(10.0 * i as f32, 5.0 * i as f32);
            assert!(ball.position.distance(&expected) < 1e-3, "frame {}", i);
            assert!((ball.bbox.width() - 20.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_ball_edges_clamp_to_nearest_observation() {
        let mut frames: Vec<Vec<Detection>> = vec![vec![]; 6];
        frames[2] = vec![ball_at(10.0, 10.0)];
        frames[3] = vec![ball_at(20.0, 10.0)];
        let config = TrackingConfig::default();
        let table = interpolate_ball(track_detections(&frames, &config), &config);

        assert_eq!(table.ball(0).unwrap().position, Point::new(10.0, 10.0));
        assert_eq!(table.ball(5).unwrap().position, Point::new(20.0, 10.0));
    }

    #[test]
    fn test_single_ball_observation_is_left_alone() {
        let mut frames: Vec<Vec<Detection>> = vec![vec![]; 4];
        frames[1] = vec![ball_at(10.0, 10.0)];
        let config = TrackingConfig::default();
        let raw = track_detections(&frames, &config);
        let table = interpolate_ball(raw.clone(), &config);
        assert_eq!(table, raw);
        assert!(table.ball(0).is_none());
    }

    fn teamed_table(frames: usize) -> TrackTable {
        let mut table = TrackTable::new(frames);
        for frame in 0..frames {
            let mut a = TrackRecord::new(ObjectClass::Player, BBox::new(0.0, 0.0, 20.0, 40.0), 0.9);
            a.team = Some(Team::A);
            let mut b =
                TrackRecord::new(ObjectClass::Player, BBox::new(500.0, 0.0, 520.0, 40.0), 0.9);
            b.team = Some(Team::B);
            table.insert(ObjectClass::Player, frame, 2, a);
            table.insert(ObjectClass::Player, frame, 3, b);
        }
        table
    }

    fn place_ball(table: &mut TrackTable, frame: usize, x: f32, y: f32) {
        table.insert(
            ObjectClass::Ball,
            frame,
            BALL_ID,
            TrackRecord::new(ObjectClass::Ball, BBox::around(Point::new(x, y), 20.0, 20.0), 0.9),
        );
    }

    #[test]
    fn test_possession_is_sticky_and_starts_empty() {
        let mut table = teamed_table(5);
        // frame 0: ball far from everyone
        place_ball(&mut table, 0, 250.0, 300.0);
        // frame 1: at team B's feet
        place_ball(&mut table, 1, 510.0, 40.0);
        // frames 2-3: in the middle
        place_ball(&mut table, 2, 250.0, 300.0);
        // frame 4: exactly 70 px from team A's foot (10, 40)
        place_ball(&mut table, 4, 80.0, 40.0);

        let (table, possession) = assign_possession(table, &TrackingConfig::default());
        assert_eq!(
            possession,
            vec![None, Some(Team::B), Some(Team::B), Some(Team::B), Some(Team::A)]
        );
        assert!(table.frame(ObjectClass::Player, 1).unwrap()[&3].has_ball);
        assert!(!table.frame(ObjectClass::Player, 2).unwrap()[&3].has_ball);
        assert!(table.frame(ObjectClass::Player, 4).unwrap()[&2].has_ball);
    }

    #[test]
    fn test_unteamed_holder_does_not_change_possession() {
        let mut table = teamed_table(2);
        place_ball(&mut table, 0, 10.0, 40.0);
        let keeper = TrackRecord::new(ObjectClass::Goalkeeper, BBox::new(290.0, 0.0, 310.0, 40.0), 0.9);
        table.insert(ObjectClass::Goalkeeper, 1, 9, keeper);
        place_ball(&mut table, 1, 300.0, 40.0);

        let (table, possession) = assign_possession(table, &TrackingConfig::default());
        assert_eq!(possession, vec![Some(Team::A), Some(Team::A)]);
        assert!(!table.frame(ObjectClass::Goalkeeper, 1).unwrap()[&9].has_ball);
    }
}
