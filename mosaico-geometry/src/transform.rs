//! Affine raster transform in GDAL coefficient order
//!
//! ```text
//! lon = c[0] + col * c[1] + row * c[2]
//! lat = c[3] + col * c[4] + row * c[5]
//! ```
//!
//! `(col, row)` are continuous pixel coordinates: the pixel `(0, 0)` spans
//! `[0, 1) x [0, 1)` and its center is at `(0.5, 0.5)`.

use mosaico_common::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Unrotated transform anchored at the north-west corner.
    pub fn north_up(west: f64, north: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform([west, pixel_width, 0.0, north, 0.0, -pixel_height])
    }

    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    pub fn pixel_width(&self) -> f64 {
        self.0[1]
    }

    /// Positive height of a pixel for north-up rasters.
    pub fn pixel_height(&self) -> f64 {
        -self.0[5]
    }

    fn determinant(&self) -> f64 {
        self.0[1] * self.0[5] - self.0[2] * self.0[4]
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidInput(
                "geotransform coefficients must be finite".to_string(),
            ));
        }
        if self.determinant() == 0.0 {
            return Err(Error::InvalidInput(
                "geotransform is not invertible".to_string(),
            ));
        }
        Ok(())
    }

    /// Continuous `(col, row)` for a coordinate; `None` if not invertible.
    pub fn geo_to_pixel_f64(&self, lat: f64, lon: f64) -> Option<(f64, f64)> {
        let [x0, a, b, y0, d, e] = self.0;
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = lon - x0;
        let dy = lat - y0;
        let col = (e * dx - b * dy) / det;
        let row = (a * dy - d * dx) / det;
        Some((col, row))
    }

    /// Integer `(row, col)` of the pixel containing the coordinate.
    ///
    /// May be negative or past the raster edge; bounds are checked by the
    /// raster handle before reading.
    pub fn geo_to_pixel(&self, lat: f64, lon: f64) -> Option<(i64, i64)> {
        let (col, row) = self.geo_to_pixel_f64(lat, lon)?;
        if !col.is_finite() || !row.is_finite() {
            return None;
        }
        Some((row.floor() as i64, col.floor() as i64))
    }

    /// `(lat, lon)` of a continuous pixel position.
    pub fn pixel_to_geo(&self, row: f64, col: f64) -> (f64, f64) {
        let [x0, a, b, y0, d, e] = self.0;
        let lon = x0 + col * a + row * b;
        let lat = y0 + col * d + row * e;
        (lat, lon)
    }

    /// Center of pixel `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_geo(row as f64 + 0.5, col as f64 + 0.5)
    }

    /// Transform for a sub-window starting at pixel `(row, col)`.
    pub fn window(&self, row: usize, col: usize) -> GeoTransform {
        let (lat, lon) = self.pixel_to_geo(row as f64, col as f64);
        let mut c = self.0;
        c[0] = lon;
        c[3] = lat;
        GeoTransform(c)
    }
}
