use std::path::Path;

use mosaico_common::{LayerKind, Result};

use crate::raster::RasterHandle;
use crate::store::TileFormat;
use crate::vector::VectorTile;

/// Decoded content of one tile file
#[derive(Debug)]
pub enum TilePayload {
    Vector(VectorTile),
    Raster(RasterHandle),
}

impl TilePayload {
    /// Open a payload file according to its on-disk format.
    pub fn open(path: &Path, format: TileFormat) -> Result<Self> {
        match format {
            TileFormat::Json | TileFormat::JsonZstd => {
                Ok(TilePayload::Vector(VectorTile::read(path, format)?))
            }
            TileFormat::Mrt => Ok(TilePayload::Raster(RasterHandle::open(path)?)),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            TilePayload::Vector(_) => LayerKind::Vector,
            TilePayload::Raster(_) => LayerKind::Raster,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorTile> {
        match self {
            TilePayload::Vector(v) => Some(v),
            TilePayload::Raster(_) => None,
        }
    }

    pub fn as_raster(&self) -> Option<&RasterHandle> {
        match self {
            TilePayload::Raster(r) => Some(r),
            TilePayload::Vector(_) => None,
        }
    }

    pub fn is_raster(&self) -> bool {
        matches!(self, TilePayload::Raster(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterGrid;
    use mosaico_common::VectorCompression;
    use mosaico_geometry::{BoundingBox, FeatureCollection, GeoTransform, TileId};

    #[test]
    fn test_open_by_format() {
        let dir = tempfile::tempdir().unwrap();

        let vector_path = dir.path().join("c0000_r0000.json.zst");
        VectorTile::new(
            "rios",
            TileId::new(0, 0),
            BoundingBox::new(1.0, 0.0, 1.0, 0.0).unwrap(),
            FeatureCollection::default(),
        )
        .write(&vector_path, VectorCompression::Zstd)
        .unwrap();
        let payload = TilePayload::open(&vector_path, TileFormat::JsonZstd).unwrap();
        assert_eq!(payload.kind(), LayerKind::Vector);
        assert_eq!(payload.as_vector().unwrap().layer, "rios");
        assert!(payload.as_raster().is_none());

        let raster_path = dir.path().join("c0000_r0000.mrt");
        RasterGrid::new(1, 1, GeoTransform::north_up(0.0, 1.0, 1.0, 1.0), None, vec![42.0])
            .unwrap()
            .write(&raster_path)
            .unwrap();
        let payload = TilePayload::open(&raster_path, TileFormat::Mrt).unwrap();
        assert!(payload.is_raster());
        assert_eq!(payload.as_raster().unwrap().value_at(0, 0), Some(42.0));
    }
}
