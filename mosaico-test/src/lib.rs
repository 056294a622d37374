//! Synthetic datasets for mosaico tests
//!
//! Everything is generated from a seeded RNG so a given seed always yields
//! the same features, rasters and therefore the same tiles.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use mosaico_common::{MosaicoConfig, Result};
use mosaico_geometry::{BoundingBox, Feature, FeatureCollection, FeatureId, GeoTransform, Geometry, Position};
use mosaico_io::RasterGrid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

/// Region used by [`TestDataset`]: a 2x2 degree box around Buenos Aires.
pub fn test_region() -> BoundingBox {
    BoundingBox::new(-33.0, -35.0, -57.0, -59.0).expect("static test region is valid")
}

/// Smooth terrain used for synthetic rasters: always between 200 and 800.
pub fn smooth_elevation(lat: f64, lon: f64) -> f64 {
    500.0 + 200.0 * (lat * 3.0).sin() * (lon * 2.0).cos() + 100.0 * (lat * 7.0 + lon * 5.0).sin()
}

fn clamp_into(bounds: &BoundingBox, lon: f64, lat: f64) -> Position {
    Position::new(
        lon.clamp(bounds.west(), bounds.east()),
        lat.clamp(bounds.south(), bounds.north()),
    )
}

/// Road-like random walks with numeric ids.
pub fn roads(rng: &mut StdRng, bounds: &BoundingBox, count: usize) -> Vec<Feature> {
    (0..count)
        .map(|i| {
            let mut lon = rng.random_range(bounds.west()..bounds.east());
            let mut lat = rng.random_range(bounds.south()..bounds.north());
            let mut heading: f64 = rng.random_range(0.0..std::f64::consts::TAU);
            let steps = rng.random_range(4..12);
            let mut coords = vec![clamp_into(bounds, lon, lat)];
            for _ in 0..steps {
                heading += rng.random_range(-0.6..0.6);
                let step = rng.random_range(0.05..0.15);
                lon += step * heading.cos();
                lat += step * heading.sin();
                coords.push(clamp_into(bounds, lon, lat));
            }
            Feature::new(Geometry::LineString(coords))
                .with_id(FeatureId::Number(i as i64))
                .with_property("nombre", format!("RN {}", i + 1))
                .with_property("carriles", rng.random_range(1..5))
        })
        .collect()
}

/// River-like lines meandering from the northern edge southwards.
pub fn rivers(rng: &mut StdRng, bounds: &BoundingBox, count: usize) -> Vec<Feature> {
    (0..count)
        .map(|i| {
            let base_lon = rng.random_range(bounds.west()..bounds.east());
            let amplitude = rng.random_range(0.02..0.1);
            let phase = rng.random_range(0.0..std::f64::consts::TAU);
            let n = 40;
            let coords = (0..=n)
                .map(|k| {
                    let t = k as f64 / n as f64;
                    let lat = bounds.north() - t * bounds.height();
                    let lon = base_lon + amplitude * (t * 12.0 + phase).sin();
                    clamp_into(bounds, lon, lat)
                })
                .collect();
            Feature::new(Geometry::LineString(coords))
                .with_id(FeatureId::Text(format!("rio-{i}")))
                .with_property("nombre", format!("Arroyo {i}"))
        })
        .collect()
}

/// Urban areas as small regular polygons.
pub fn urban_areas(rng: &mut StdRng, bounds: &BoundingBox, count: usize) -> Vec<Feature> {
    (0..count)
        .map(|i| {
            let radius = rng.random_range(0.02..0.08);
            let lon = rng.random_range(bounds.west() + radius..bounds.east() - radius);
            let lat = rng.random_range(bounds.south() + radius..bounds.north() - radius);
            let sides = rng.random_range(5..10);
            let mut ring: Vec<Position> = (0..sides)
                .map(|k| {
                    let a = std::f64::consts::TAU * k as f64 / sides as f64;
                    Position::new(lon + radius * a.cos(), lat + radius * a.sin())
                })
                .collect();
            ring.push(ring[0]);
            Feature::new(Geometry::Polygon(vec![ring]))
                .with_id(FeatureId::Number(1000 + i as i64))
                .with_property("poblacion", rng.random_range(1_000..500_000))
        })
        .collect()
}

/// Raster over `bounds` sampled from [`smooth_elevation`] at pixel centers.
pub fn elevation_raster(bounds: &BoundingBox, pixel: f64) -> RasterGrid {
    let width = (bounds.width() / pixel).round() as usize;
    let height = (bounds.height() / pixel).round() as usize;
    let transform = GeoTransform::north_up(bounds.west(), bounds.north(), pixel, pixel);
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let (lat, lon) = transform.pixel_center(row, col);
            data.push(smooth_elevation(lat, lon) as f32);
        }
    }
    RasterGrid {
        width,
        height,
        transform,
        nodata: Some(-9999.0),
        data,
    }
}

pub fn write_feature_collection(path: &Path, features: Vec<Feature>) -> Result<()> {
    let collection = FeatureCollection::new(features);
    std::fs::write(path, serde_json::to_vec(&collection)?)?;
    Ok(())
}

/// Write a north-up raster with square pixels as an ESRI ASCII grid.
pub fn write_ascii_grid(path: &Path, raster: &RasterGrid) -> Result<()> {
    let t = raster.transform;
    let mut text = String::new();
    let _ = writeln!(text, "ncols {}", raster.width);
    let _ = writeln!(text, "nrows {}", raster.height);
    let _ = writeln!(text, "xllcorner {}", t.coefficients()[0]);
    let _ = writeln!(
        text,
        "yllcorner {}",
        t.coefficients()[3] - raster.height as f64 * t.pixel_height()
    );
    let _ = writeln!(text, "cellsize {}", t.pixel_width());
    if let Some(nodata) = raster.nodata {
        let _ = writeln!(text, "NODATA_value {nodata}");
    }
    for row in raster.data.chunks(raster.width) {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        let _ = writeln!(text, "{}", line.join(" "));
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// A complete dataset on disk: sources, config file and (empty) store.
pub struct TestDataset {
    dir: TempDir,
    pub config: MosaicoConfig,
}

impl TestDataset {
    pub const CELL_SIZE: f64 = 0.5;
    pub const PIXEL: f64 = 0.02;

    /// Generate sources for four layers and load the matching config.
    pub fn generate(seed: u64) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let data = root.join("data");
        std::fs::create_dir_all(&data)?;

        let region = test_region();
        let mut rng = StdRng::seed_from_u64(seed);
        write_feature_collection(&data.join("ruta_nacional.geojson"), roads(&mut rng, &region, 25))?;
        write_feature_collection(&data.join("hidrografia.geojson"), rivers(&mut rng, &region, 6))?;
        write_feature_collection(&data.join("areas_urbanas.geojson"), urban_areas(&mut rng, &region, 15))?;
        write_ascii_grid(&data.join("dem.asc"), &elevation_raster(&region, Self::PIXEL))?;

        let config_path = root.join("mosaico.toml");
        std::fs::write(&config_path, Self::config_toml(&region))?;
        let config = MosaicoConfig::load(&config_path)?;
        Ok(Self { dir, config })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> PathBuf {
        self.config.dataset.store.clone()
    }

    fn config_toml(region: &BoundingBox) -> String {
        format!(
            r#"[dataset]
store = "tiles"
cell_size = {cell:?}
bounds = {{ north = {n:?}, south = {s:?}, east = {e:?}, west = {w:?} }}

[[dataset.categories]]
name = "Transporte"
  [[dataset.categories.layers]]
  name = "ruta_nacional"
  kind = "vector"
  source = "data/ruta_nacional.geojson"

[[dataset.categories]]
name = "Hidrografia"
  [[dataset.categories.layers]]
  name = "hidrografia"
  kind = "vector"
  source = "data/hidrografia.geojson"

[[dataset.categories]]
name = "Urbano"
  [[dataset.categories.layers]]
  name = "areas_urbanas"
  kind = "vector"
  source = "data/areas_urbanas.geojson"

[[dataset.categories]]
name = "Relieve"
  [[dataset.categories.layers]]
  name = "elevacion"
  kind = "raster"
  source = "data/dem.asc"

[serve]
elevation_layer = "elevacion"
"#,
            cell = Self::CELL_SIZE,
            n = region.north(),
            s = region.south(),
            e = region.east(),
            w = region.west(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaico_geometry::validate_geometry;

    #[test]
    fn test_generators_are_deterministic_and_valid() {
        let region = test_region();
        let a = roads(&mut StdRng::seed_from_u64(7), &region, 10);
        let b = roads(&mut StdRng::seed_from_u64(7), &region, 10);
        assert_eq!(a, b);

        let mut rng = StdRng::seed_from_u64(7);
        for f in urban_areas(&mut rng, &region, 20).iter().chain(rivers(&mut rng, &region, 3).iter()) {
            assert_eq!(validate_geometry(f.geometry.as_ref()), Ok(()));
            assert!(region.contains(&f.geometry.as_ref().unwrap().bounds().unwrap()));
        }
    }

    #[test]
    fn test_elevation_raster_matches_function() {
        let region = test_region();
        let raster = elevation_raster(&region, 0.1);
        assert_eq!((raster.width, raster.height), (20, 20));
        let (lat, lon) = raster.transform.pixel_center(3, 4);
        let expected = smooth_elevation(lat, lon) as f32;
        assert_eq!(raster.value_at(3, 4), Some(expected));
        assert!(raster.data.iter().all(|&v| (200.0..=800.0).contains(&v)));
    }

    #[test]
    fn test_generate_dataset() {
        let ds = TestDataset::generate(1).unwrap();
        assert_eq!(ds.config.dataset.layer_names().len(), 4);
        assert!(ds.root().join("data/dem.asc").exists());
        assert_eq!(ds.store(), ds.root().join("tiles"));
    }
}
