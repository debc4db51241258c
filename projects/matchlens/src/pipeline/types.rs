use crate::error::PipelineError;
use opencv::core::{Mat, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Reserved track id for the (single) ball.
pub const BALL_ID: u32 = 1;

/// A 2D point in pixel or pitch coordinates
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Corner-format bounding box (x1, y1, x2, y2) in image pixels
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box of the given size centered on `center`.
    pub fn around(center: Point, width: f32, height: f32) -> Self {
        Self {
            x1: center.x - width / 2.0,
            y1: center.y - height / 2.0,
            x2: center.x + width / 2.0,
            y2: center.y + height / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Bottom-center point, where a player touches the pitch.
    pub fn foot(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, self.y2)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Detector classes the pipeline cares about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    Player,
    Goalkeeper,
    Referee,
    Ball,
}

impl ObjectClass {
    pub const ALL: [ObjectClass; 4] = [
        ObjectClass::Player,
        ObjectClass::Goalkeeper,
        ObjectClass::Referee,
        ObjectClass::Ball,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "player" | "players" => Some(Self::Player),
            "goalkeeper" | "goalkeepers" => Some(Self::Goalkeeper),
            "referee" | "referees" => Some(Self::Referee),
            "ball" => Some(Self::Ball),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Goalkeeper => "goalkeeper",
            Self::Referee => "referee",
            Self::Ball => "ball",
        }
    }

    /// Players and goalkeepers belong to a team; referees and the ball do not.
    pub fn has_team(&self) -> bool {
        matches!(self, Self::Player | Self::Goalkeeper)
    }
}

/// Binary team label produced by the team classifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            Self::A
        } else {
            Self::B
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// Human-facing name, 1-based.
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "Team 1",
            Self::B => "Team 2",
        }
    }
}

/// Color triple in OpenCV channel order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bgr(pub [u8; 3]);

impl Bgr {
    pub const WHITE: Bgr = Bgr([255, 255, 255]);
    pub const BLACK: Bgr = Bgr([0, 0, 0]);
    pub const RED: Bgr = Bgr([0, 0, 255]);
    pub const GREEN: Bgr = Bgr([0, 255, 0]);
    pub const YELLOW: Bgr = Bgr([0, 255, 255]);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Bgr([b, g, r])
    }

    /// Parse an `RRGGBB` hex string (leading `#` optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::from_rgb(r, g, b))
    }

    pub fn to_scalar(self) -> Scalar {
        let [b, g, r] = self.0;
        Scalar::new(b as f64, g as f64, r as f64, 0.0)
    }
}

/// Per-frame attributes of one tracked entity
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub bbox: BBox,
    /// Foot point for people, center for the ball
    pub position: Point,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_color: Option<Bgr>,
    pub has_ball: bool,
}

impl TrackRecord {
    pub fn new(class: ObjectClass, bbox: BBox, confidence: f32) -> Self {
        let position = match class {
            ObjectClass::Ball => bbox.center(),
            _ => bbox.foot(),
        };
        Self {
            bbox,
            position,
            confidence,
            team: None,
            team_color: None,
            has_ball: false,
        }
    }
}

/// Track id -> record, for one class in one frame.
pub type FrameTracks = BTreeMap<u32, TrackRecord>;

/// Team (or nobody) credited with the ball, one entry per frame.
pub type PossessionSequence = Vec<Option<Team>>;

/// Class -> per-frame tracks for a whole clip.
///
/// Built once by the tracker; later stages derive new tables through
/// [`TrackTable::with_class`] instead of mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTable {
    frame_count: usize,
    classes: BTreeMap<ObjectClass, Vec<FrameTracks>>,
}

impl TrackTable {
    pub fn new(frame_count: usize) -> Self {
        let classes = ObjectClass::ALL
            .iter()
            .map(|class| (*class, vec![FrameTracks::new(); frame_count]))
            .collect();
        Self {
            frame_count,
            classes,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// All frames for one class.
    pub fn series(&self, class: ObjectClass) -> &[FrameTracks] {
        self.classes
            .get(&class)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    /// Tracks of one class in one frame (empty when out of range).
    pub fn frame(&self, class: ObjectClass, index: usize) -> Option<&FrameTracks> {
        self.series(class).get(index)
    }

    /// The ball record for a frame, if any.
    pub fn ball(&self, index: usize) -> Option<&TrackRecord> {
        self.frame(ObjectClass::Ball, index)
            .and_then(|tracks| tracks.get(&BALL_ID))
    }

    /// Players and goalkeepers in a frame, in class then id order.
    pub fn team_members(
        &self,
        index: usize,
    ) -> impl Iterator<Item = (ObjectClass, u32, &TrackRecord)> + '_ {
        [ObjectClass::Player, ObjectClass::Goalkeeper]
            .into_iter()
            .flat_map(move |class| {
                self.frame(class, index)
                    .into_iter()
                    .flat_map(move |tracks| tracks.iter().map(move |(id, r)| (class, *id, r)))
            })
    }

    pub(crate) fn insert(&mut self, class: ObjectClass, index: usize, id: u32, record: TrackRecord) {
        if let Some(frame) = self
            .classes
            .get_mut(&class)
            .and_then(|series| series.get_mut(index))
        {
            frame.insert(id, record);
        }
    }

    /// New table with one class series replaced. The series is resized to the
    /// table's frame count.
    pub fn with_class(mut self, class: ObjectClass, mut series: Vec<FrameTracks>) -> Self {
        series.resize(self.frame_count, FrameTracks::new());
        self.classes.insert(class, series);
        self
    }

    /// New table with `f` applied to every record of the given class.
    pub fn map_class<F>(self, class: ObjectClass, mut f: F) -> Self
    where
        F: FnMut(usize, u32, &TrackRecord) -> TrackRecord,
    {
        let series: Vec<FrameTracks> = self
            .series(class)
            .iter()
            .enumerate()
            .map(|(index, tracks)| {
                tracks
                    .iter()
                    .map(|(id, record)| (*id, f(index, *id, record)))
                    .collect()
            })
            .collect();
        self.with_class(class, series)
    }
}

/// A decoded frame of the input clip
pub struct Frame {
    pub index: usize,
    pub mat: Mat,
}

/// Visual products a job can be asked for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    Detections,
    PitchEdges,
    TacticalBoard,
    Voronoi,
}

impl Product {
    pub const ALL: [Product; 4] = [
        Product::Detections,
        Product::PitchEdges,
        Product::TacticalBoard,
        Product::Voronoi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detections => "detections",
            Self::PitchEdges => "pitch_edges",
            Self::TacticalBoard => "tactical_board",
            Self::Voronoi => "voronoi",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.avi", self.as_str())
    }

    /// Products drawn from the per-frame homography.
    pub fn needs_pitch(&self) -> bool {
        !matches!(self, Self::Detections)
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Product {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Product::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownProducts(vec![s.to_string()]))
    }
}

/// Parse a comma-separated product list. Unknown names are rejected together;
/// an empty list falls back to detections only.
pub fn parse_products(raw: &str) -> Result<BTreeSet<Product>, PipelineError> {
    let names: BTreeSet<&str> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if names.is_empty() {
        return Ok(BTreeSet::from([Product::Detections]));
    }

    let mut products = BTreeSet::new();
    let mut unknown = Vec::new();
    for name in names {
        match name.parse::<Product>() {
            Ok(product) => {
                products.insert(product);
            }
            Err(_) => unknown.push(name.to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(PipelineError::UnknownProducts(unknown));
    }
    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_follow_class() {
        let bbox = BBox::new(10.0, 20.0, 30.0, 60.0);
        let player = TrackRecord::new(ObjectClass::Player, bbox, 0.9);
        let ball = TrackRecord::new(ObjectClass::Ball, bbox, 0.9);
        assert_eq!(player.position, Point::new(20.0, 60.0));
        assert_eq!(ball.position, Point::new(20.0, 40.0));
    }

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_parse_products() {
        assert_eq!(
            parse_products("").unwrap(),
            BTreeSet::from([Product::Detections])
        );
        assert_eq!(
            parse_products(" voronoi , pitch_edges,voronoi").unwrap(),
            BTreeSet::from([Product::PitchEdges, Product::Voronoi])
        );
        match parse_products("voronoi,heatmap,zoom") {
            Err(PipelineError::UnknownProducts(names)) => {
                assert_eq!(names, vec!["heatmap".to_string(), "zoom".to_string()])
            }
            other => panic!("expected unknown products, got {:?}", other),
        }
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(Bgr::from_hex("#00BFFF"), Some(Bgr([255, 191, 0])));
        assert_eq!(Bgr::from_hex("FF1493"), Some(Bgr([147, 20, 255])));
        assert_eq!(Bgr::from_hex("12345"), None);
    }

    #[test]
    fn test_table_is_rebuilt_not_mutated() {
        let mut table = TrackTable::new(2);
        table.insert(
            ObjectClass::Player,
            1,
            7,
            TrackRecord::new(ObjectClass::Player, BBox::new(0.0, 0.0, 2.0, 2.0), 0.8),
        );
        let original = table.clone();
        let derived = table.map_class(ObjectClass::Player, |_, _, r| TrackRecord {
            team: Some(Team::B),
            ..r.clone()
        });

        assert_eq!(original.frame(ObjectClass::Player, 1).unwrap()[&7].team, None);
        assert_eq!(
            derived.frame(ObjectClass::Player, 1).unwrap()[&7].team,
            Some(Team::B)
        );
        assert_eq!(derived.team_members(1).count(), 1);
        assert_eq!(derived.team_members(0).count(), 0);
    }
}
