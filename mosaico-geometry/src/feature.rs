//! GeoJSON-compatible feature types
//!
//! Positions are `[lon, lat]` on the wire. Extra ordinates (altitude) are
//! accepted on input and dropped.

use std::fmt;

use geo::Intersects;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::bbox::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lon: f64,
    pub lat: f64,
}

impl Position {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

impl From<Position> for geo::Coord<f64> {
    fn from(p: Position) -> Self {
        geo::Coord { x: p.lon, y: p.lat }
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.lon)?;
        tup.serialize_element(&self.lat)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PositionVisitor;

        impl<'de> Visitor<'de> for PositionVisitor {
            type Value = Position;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [lon, lat] array of at least two numbers")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Position, A::Error> {
                let lon: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let lat: f64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                while seq.next_element::<de::IgnoredAny>()?.is_some() {}
                Ok(Position { lon, lat })
            }
        }

        deserializer.deserialize_seq(PositionVisitor)
    }
}

/// Geometry of a feature; variants and payloads mirror GeoJSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Every position, in document order.
    pub fn positions(&self) -> Box<dyn Iterator<Item = &Position> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => Box::new(ps.iter()),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                Box::new(lines.iter().flatten())
            }
            Geometry::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
        }
    }

    /// Bounding box of all positions; `None` for empty geometries or
    /// non-finite coordinates.
    pub fn bounds(&self) -> Option<BoundingBox> {
        let mut iter = self.positions();
        let first = iter.next()?;
        let (mut n, mut s, mut e, mut w) = (first.lat, first.lat, first.lon, first.lon);
        for p in iter {
            n = n.max(p.lat);
            s = s.min(p.lat);
            e = e.max(p.lon);
            w = w.min(p.lon);
        }
        BoundingBox::region(n, s, e, w).ok()
    }

    pub fn to_geo(&self) -> geo::Geometry<f64> {
        fn line(ps: &[Position]) -> geo::LineString<f64> {
            geo::LineString::new(ps.iter().map(|&p| p.into()).collect())
        }
        fn polygon(rings: &[Vec<Position>]) -> geo::Polygon<f64> {
            let mut rings = rings.iter().map(|r| line(r));
            let exterior = rings.next().unwrap_or_else(|| geo::LineString::new(vec![]));
            geo::Polygon::new(exterior, rings.collect())
        }

        match self {
            Geometry::Point(p) => geo::Geometry::Point(geo::Point::from(geo::Coord::from(*p))),
            Geometry::MultiPoint(ps) => geo::Geometry::MultiPoint(geo::MultiPoint::new(
                ps.iter()
                    .map(|&p| geo::Point::from(geo::Coord::from(p)))
                    .collect(),
            )),
            Geometry::LineString(ps) => geo::Geometry::LineString(line(ps)),
            Geometry::MultiLineString(lines) => geo::Geometry::MultiLineString(
                geo::MultiLineString::new(lines.iter().map(|l| line(l)).collect()),
            ),
            Geometry::Polygon(rings) => geo::Geometry::Polygon(polygon(rings)),
            Geometry::MultiPolygon(polys) => geo::Geometry::MultiPolygon(geo::MultiPolygon::new(
                polys.iter().map(|p| polygon(p)).collect(),
            )),
        }
    }
}

/// Geometry already converted for repeated box tests against many cells.
pub struct PreparedGeometry {
    geom: geo::Geometry<f64>,
    bounds: BoundingBox,
}

impl PreparedGeometry {
    pub fn new(geometry: &Geometry) -> Option<Self> {
        Some(Self {
            bounds: geometry.bounds()?,
            geom: geometry.to_geo(),
        })
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Exact test against a box, touching counts as intersecting.
    pub fn intersects_box(&self, bbox: &BoundingBox) -> bool {
        if !self.bounds.intersects(bbox) {
            return false;
        }
        if bbox.contains(&self.bounds) {
            return true;
        }
        let rect = geo::Rect::new(
            geo::coord! { x: bbox.west(), y: bbox.south() },
            geo::coord! { x: bbox.east(), y: bbox.north() },
        );
        self.geom.intersects(&rect)
    }
}

/// Stable identifier supplied by the source data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum FeatureTag {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
enum CollectionTag {
    #[default]
    FeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    tag: FeatureTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeatureId>,
    /// `None` for GeoJSON `"geometry": null`; rejected by validation
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(d)?.unwrap_or_default())
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            tag: FeatureTag::Feature,
            id: None,
            geometry: Some(geometry),
            properties: Map::new(),
        }
    }

    pub fn with_id(mut self, id: FeatureId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default)]
    tag: CollectionTag,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            tag: CollectionTag::FeatureCollection,
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Extend<Feature> for FeatureCollection {
    fn extend<T: IntoIterator<Item = Feature>>(&mut self, iter: T) {
        self.features.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(w: f64, s: f64, e: f64, n: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            Position::new(w, s),
            Position::new(e, s),
            Position::new(e, n),
            Position::new(w, n),
            Position::new(w, s),
        ]])
    }

    #[test]
    fn test_parse_geojson_feature() {
        let value = json!({
            "type": "Feature",
            "id": 17,
            "geometry": {"type": "LineString", "coordinates": [[-58.4, -34.6, 25.0], [-58.3, -34.5]]},
            "properties": {"nombre": "RN 3"}
        });
        let feature: Feature = serde_json::from_value(value).unwrap();
        assert_eq!(feature.id, Some(FeatureId::Number(17)));
        assert_eq!(feature.properties["nombre"], "RN 3");
        match feature.geometry.as_ref().unwrap() {
            Geometry::LineString(ps) => {
                assert_eq!(ps.len(), 2);
                assert_eq!(ps[0], Position::new(-58.4, -34.6));
            }
            other => panic!("unexpected geometry {other:?}"),
        }

        let out = serde_json::to_value(&feature).unwrap();
        assert_eq!(out["type"], "Feature");
        assert_eq!(out["geometry"]["coordinates"][0], json!([-58.4, -34.6]));
    }

    #[test]
    fn test_null_geometry_and_properties() {
        let value = json!({"type": "Feature", "geometry": null, "properties": null});
        let feature: Feature = serde_json::from_value(value).unwrap();
        assert!(feature.geometry.is_none());
        assert!(feature.properties.is_empty());
    }

    #[test]
    fn test_collection_serializes_type_tag() {
        let fc = FeatureCollection::new(vec![Feature::new(Geometry::Point(Position::new(1.0, 2.0)))]);
        let out = serde_json::to_value(&fc).unwrap();
        assert_eq!(out["type"], "FeatureCollection");
        assert_eq!(out["features"][0]["geometry"]["type"], "Point");
        assert_eq!(FeatureCollection::default().features.len(), 0);
    }

    #[test]
    fn test_bounds() {
        let g = Geometry::MultiPoint(vec![Position::new(1.0, 5.0), Position::new(-2.0, 3.0)]);
        let b = g.bounds().unwrap();
        assert_eq!((b.north(), b.south(), b.east(), b.west()), (5.0, 3.0, 1.0, -2.0));
        assert!(Geometry::LineString(vec![]).bounds().is_none());
        assert!(Geometry::Point(Position::new(f64::NAN, 0.0)).bounds().is_none());
    }

    #[test]
    fn test_intersects_box_exact() {
        let cell = BoundingBox::new(1.0, 0.0, 1.0, 0.0).unwrap();

        // Diagonal line whose bbox overlaps the cell but the line itself misses it
        let miss = Geometry::LineString(vec![Position::new(0.5, 2.0), Position::new(2.0, 0.5)]);
        let prepared = PreparedGeometry::new(&miss).unwrap();
        assert!(prepared.bounds().intersects(&cell));
        assert!(!prepared.intersects_box(&cell));

        let crossing = Geometry::LineString(vec![Position::new(-1.0, 0.5), Position::new(2.0, 0.5)]);
        assert!(PreparedGeometry::new(&crossing).unwrap().intersects_box(&cell));

        // Touching the east edge counts
        let touching = square(1.0, 0.2, 1.5, 0.8);
        assert!(PreparedGeometry::new(&touching).unwrap().intersects_box(&cell));

        // Polygon enclosing the cell entirely
        let around = square(-5.0, -5.0, 5.0, 5.0);
        assert!(PreparedGeometry::new(&around).unwrap().intersects_box(&cell));

        let point_on_corner = Geometry::Point(Position::new(1.0, 1.0));
        assert!(PreparedGeometry::new(&point_on_corner).unwrap().intersects_box(&cell));
    }
}
