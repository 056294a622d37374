//! Structural checks applied to features before partitioning
//!
//! Invalid features are skipped by the partitioner with a warning; the
//! error value is what ends up in the report.

use geo::algorithm::line_intersection::line_intersection;
use geo::{Coord, Line};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use thiserror::Error;

use crate::feature::{Geometry, Position};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("feature has no geometry")]
    Missing,

    #[error("{0} has no positions")]
    Empty(&'static str),

    #[error("non-finite coordinate ({lon}, {lat})")]
    NonFinite { lon: f64, lat: f64 },

    #[error("coordinate ({lon}, {lat}) outside valid longitude/latitude range")]
    OutOfRange { lon: f64, lat: f64 },

    #[error("{kind} needs at least {min} distinct positions, found {found}")]
    TooFewPositions {
        kind: &'static str,
        min: usize,
        found: usize,
    },

    #[error("polygon ring is not closed")]
    UnclosedRing,

    #[error("polygon ring intersects itself near ({lon}, {lat})")]
    SelfIntersectingRing { lon: f64, lat: f64 },
}

impl From<GeometryError> for mosaico_common::Error {
    fn from(e: GeometryError) -> Self {
        mosaico_common::Error::InvalidGeometry(e.to_string())
    }
}

/// Check a feature geometry; `None` is the GeoJSON `null` geometry.
pub fn validate_geometry(geometry: Option<&Geometry>) -> Result<(), GeometryError> {
    let geometry = geometry.ok_or(GeometryError::Missing)?;

    for p in geometry.positions() {
        check_position(p)?;
    }

    match geometry {
        Geometry::Point(_) => Ok(()),
        Geometry::MultiPoint(ps) => {
            if ps.is_empty() {
                return Err(GeometryError::Empty("MultiPoint"));
            }
            Ok(())
        }
        Geometry::LineString(ps) => check_line(ps),
        Geometry::MultiLineString(lines) => {
            if lines.is_empty() {
                return Err(GeometryError::Empty("MultiLineString"));
            }
            lines.iter().try_for_each(|l| check_line(l))
        }
        Geometry::Polygon(rings) => check_polygon(rings),
        Geometry::MultiPolygon(polys) => {
            if polys.is_empty() {
                return Err(GeometryError::Empty("MultiPolygon"));
            }
            polys.iter().try_for_each(|p| check_polygon(p))
        }
    }
}

fn check_position(p: &Position) -> Result<(), GeometryError> {
    if !p.is_finite() {
        return Err(GeometryError::NonFinite {
            lon: p.lon,
            lat: p.lat,
        });
    }
    if !(-180.0..=180.0).contains(&p.lon) || !(-90.0..=90.0).contains(&p.lat) {
        return Err(GeometryError::OutOfRange {
            lon: p.lon,
            lat: p.lat,
        });
    }
    Ok(())
}

/// Positions with consecutive repeats collapsed.
fn distinct(ps: &[Position]) -> Vec<Position> {
    let mut out: Vec<Position> = Vec::with_capacity(ps.len());
    for p in ps {
        if out.last() != Some(p) {
            out.push(*p);
        }
    }
    out
}

fn check_line(ps: &[Position]) -> Result<(), GeometryError> {
    let found = distinct(ps).len();
    if found < 2 {
        return Err(GeometryError::TooFewPositions {
            kind: "LineString",
            min: 2,
            found,
        });
    }
    Ok(())
}

fn check_polygon(rings: &[Vec<Position>]) -> Result<(), GeometryError> {
    if rings.is_empty() {
        return Err(GeometryError::Empty("Polygon"));
    }
    for ring in rings {
        if ring.first() != ring.last() {
            return Err(GeometryError::UnclosedRing);
        }
        let ring = distinct(ring);
        // Closed ring: first == last, so a triangle has four positions
        if ring.len() < 4 {
            return Err(GeometryError::TooFewPositions {
                kind: "polygon ring",
                min: 4,
                found: ring.len(),
            });
        }
        check_ring_simple(&ring)?;
    }
    Ok(())
}

type SegmentEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Rejects rings where two non-adjacent edges touch or cross.
fn check_ring_simple(ring: &[Position]) -> Result<(), GeometryError> {
    let segments: Vec<Line<f64>> = ring
        .windows(2)
        .map(|w| Line::new(Coord::from(w[0]), Coord::from(w[1])))
        .collect();
    let n = segments.len();

    let entries: Vec<SegmentEntry> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| {
            GeomWithData::new(
                Rectangle::from_corners([s.start.x, s.start.y], [s.end.x, s.end.y]),
                i,
            )
        })
        .collect();
    let tree = RTree::bulk_load(entries);

    for (i, seg) in segments.iter().enumerate() {
        let envelope = AABB::from_corners([seg.start.x, seg.start.y], [seg.end.x, seg.end.y]);
        for other in tree.locate_in_envelope_intersecting(&envelope) {
            let j = other.data;
            // Each pair once; neighbours share a vertex by construction
            if j <= i || j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            if let Some(hit) = line_intersection(*seg, segments[j]) {
                let at = match hit {
                    geo::LineIntersection::SinglePoint { intersection, .. } => intersection,
                    geo::LineIntersection::Collinear { intersection } => intersection.start,
                };
                return Err(GeometryError::SelfIntersectingRing {
                    lon: at.x,
                    lat: at.y,
                });
            }
        }
    }
    Ok(())
}
