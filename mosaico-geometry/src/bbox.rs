//! Axis-aligned geographic bounding boxes

use mosaico_common::{Error, RegionBounds, Result};
use serde::{Deserialize, Serialize};

/// Box in decimal degrees, edges inclusive.
///
/// Dataset and tile boxes always have `north > south` and `east > west`.
/// Query regions may be degenerate (a single point or a line) and are built
/// with [`BoundingBox::region`] or [`BoundingBox::point`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegionBounds", into = "RegionBounds")]
pub struct BoundingBox {
    north: f64,
    south: f64,
    east: f64,
    west: f64,
}

impl BoundingBox {
    /// Strict constructor for dataset and tile extents.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        let bbox = Self::region(north, south, east, west)?;
        if north <= south || east <= west {
            return Err(Error::InvalidInput(format!(
                "bounding box must have positive extent, got N={north} S={south} E={east} W={west}"
            )));
        }
        Ok(bbox)
    }

    /// Query region constructor; zero width or height is allowed.
    pub fn region(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        if ![north, south, east, west].iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidInput(
                "bounding box coordinates must be finite".to_string(),
            ));
        }
        if north < south || east < west {
            return Err(Error::InvalidInput(format!(
                "bounding box must satisfy north >= south and east >= west, got N={north} S={south} E={east} W={west}"
            )));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Degenerate box covering exactly one coordinate.
    pub fn point(lat: f64, lon: f64) -> Result<Self> {
        Self::region(lat, lat, lon, lon)
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    /// East-west extent in degrees
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// North-south extent in degrees
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }

    /// Closed-interval test: boxes sharing only an edge or corner intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }

    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.west >= self.west
            && other.east <= self.east
            && other.south >= self.south
            && other.north <= self.north
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            north: self.north.max(other.north),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            west: self.west.min(other.west),
        }
    }

    /// Overlapping part of both boxes, if any.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            north: self.north.min(other.north),
            south: self.south.max(other.south),
            east: self.east.min(other.east),
            west: self.west.max(other.west),
        })
    }

    /// Union over an iterator of boxes; `None` when empty.
    pub fn union_all<'a, I>(boxes: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BoundingBox>, b| match acc {
                Some(a) => Some(a.union(b)),
                None => Some(*b),
            })
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.north + self.south) / 2.0,
            (self.east + self.west) / 2.0,
        )
    }

    pub(crate) fn from_parts_unchecked(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }
}

impl TryFrom<RegionBounds> for BoundingBox {
    type Error = Error;

    fn try_from(raw: RegionBounds) -> Result<Self> {
        BoundingBox::region(raw.north, raw.south, raw.east, raw.west)
    }
}

impl From<BoundingBox> for RegionBounds {
    fn from(b: BoundingBox) -> Self {
        RegionBounds {
            north: b.north,
            south: b.south,
            east: b.east,
            west: b.west,
        }
    }
}
