use crate::pipeline::types::Point;

/// Football pitch model in centimeters, origin at a corner flag.
///
/// Vertex order matches the keypoint model output, so keypoint `i`
/// corresponds to `vertices()[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SoccerPitchConfiguration {
    pub width: f32,
    pub length: f32,
    pub penalty_box_width: f32,
    pub penalty_box_length: f32,
    pub goal_box_width: f32,
    pub goal_box_length: f32,
    pub centre_circle_radius: f32,
    pub penalty_spot_distance: f32,
}

impl Default for SoccerPitchConfiguration {
    fn default() -> Self {
        Self {
            width: 7000.0,
            length: 12000.0,
            penalty_box_width: 4100.0,
            penalty_box_length: 2015.0,
            goal_box_width: 1832.0,
            goal_box_length: 550.0,
            centre_circle_radius: 915.0,
            penalty_spot_distance: 1100.0,
        }
    }
}

/// Line segments between vertices, 1-based.
const EDGES: [(usize, usize); 33] = [
    (1, 2),
    (2, 3),
    (3, 4),
    (4, 5),
    (5, 6),
    (7, 8),
    (10, 11),
    (11, 12),
    (12, 13),
    (14, 15),
    (15, 16),
    (16, 17),
    (18, 19),
    (19, 20),
    (20, 21),
    (23, 24),
    (25, 26),
    (26, 27),
    (27, 28),
    (28, 29),
    (29, 30),
    (1, 14),
    (2, 10),
    (3, 7),
    (4, 8),
    (5, 13),
    (6, 17),
    (14, 25),
    (18, 26),
    (23, 27),
    (24, 28),
    (21, 29),
    (17, 30),
];

impl SoccerPitchConfiguration {
    pub fn vertices(&self) -> Vec<Point> {
        let w = self.width;
        let l = self.length;
        let pbw = self.penalty_box_width;
        let pbl = self.penalty_box_length;
        let gbw = self.goal_box_width;
        let gbl = self.goal_box_length;
        let ccr = self.centre_circle_radius;
        let psd = self.penalty_spot_distance;

        [
            (0.0, 0.0),
            (0.0, (w - pbw) / 2.0),
            (0.0, (w - gbw) / 2.0),
            (0.0, (w + gbw) / 2.0),
            (0.0, (w + pbw) / 2.0),
            (0.0, w),
            (gbl, (w - gbw) / 2.0),
            (gbl, (w + gbw) / 2.0),
            (psd, w / 2.0),
            (pbl, (w - pbw) / 2.0),
            (pbl, (w - gbw) / 2.0),
            (pbl, (w + gbw) / 2.0),
            (pbl, (w + pbw) / 2.0),
            (l / 2.0, 0.0),
            (l / 2.0, w / 2.0 - ccr),
            (l / 2.0, w / 2.0 + ccr),
            (l / 2.0, w),
            (l - pbl, (w - pbw) / 2.0),
            (l - pbl, (w - gbw) / 2.0),
            (l - pbl, (w + gbw) / 2.0),
            (l - pbl, (w + pbw) / 2.0),
            (l - psd, w / 2.0),
            (l - gbl, (w - gbw) / 2.0),
            (l - gbl, (w + gbw) / 2.0),
            (l, 0.0),
            (l, (w - pbw) / 2.0),
            (l, (w - gbw) / 2.0),
            (l, (w + gbw) / 2.0),
            (l, (w + pbw) / 2.0),
            (l, w),
            (l / 2.0 - ccr, w / 2.0),
            (l / 2.0 + ccr, w / 2.0),
        ]
        .into_iter()
        .map(|(x, y)| Point::new(x, y))
        .collect()
    }

    /// Edges as 0-based vertex index pairs.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> {
        EDGES.iter().map(|(a, b)| (a - 1, b - 1))
    }

    pub fn centre_spot(&self) -> Point {
        Point::new(self.length / 2.0, self.width / 2.0)
    }

    /// Both penalty spots, left then right.
    pub fn penalty_spots(&self) -> [Point; 2] {
        [
            Point::new(self.penalty_spot_distance, self.width / 2.0),
            Point::new(self.length - self.penalty_spot_distance, self.width / 2.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        let pitch = SoccerPitchConfiguration::default();
        let vertices = pitch.vertices();
        assert_eq!(vertices.len(), 32);
        assert_eq!(vertices[0], Point::new(0.0, 0.0));
        assert_eq!(vertices[29], Point::new(12000.0, 7000.0));
        assert_eq!(vertices[8], pitch.penalty_spots()[0]);
        assert_eq!(vertices[21], pitch.penalty_spots()[1]);
        assert!(pitch.edges().all(|(a, b)| a < 32 && b < 32 && a != b));
    }
}
