//! mrt raster format - elevation samples for one tile
//!
//! ```text
//! offset  size  field
//!      0     4  magic "MRT1" (0x3154524D, LE)
//!      4     2  version
//!      6     2  flags (bit0 = nodata present)
//!      8     4  width
//!     12     4  height
//!     16    48  affine transform, 6 x f64
//!     64     4  nodata (f32)
//!     68    24  padding
//!     92     4  CRC32 of bytes 0..92
//!     96  4*w*h samples, row-major f32
//!    end     4  CRC32 of the sample block
//! ```
//!
//! All values little-endian. Readers memory-map the file and decode samples
//! on access.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use mosaico_common::{Error, Result};
use mosaico_geometry::GeoTransform;

use crate::store::write_atomic;

const MAGIC: u32 = 0x3154524D; // "MRT1"
const VERSION: u16 = 1;
const HEADER_LEN: usize = 96;
const HEADER_CRC_OFFSET: usize = 92;
const FLAG_NODATA: u16 = 0b1;

/// In-memory raster, used when cutting source rasters into tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub nodata: Option<f32>,
    /// Row-major, `width * height` samples
    pub data: Vec<f32>,
}

impl RasterGrid {
    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: Option<f32>,
        data: Vec<f32>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput("raster must not be empty".to_string()));
        }
        if data.len() != width * height {
            return Err(Error::InvalidInput(format!(
                "raster of {width}x{height} needs {} samples, got {}",
                width * height,
                data.len()
            )));
        }
        transform.validate()?;
        Ok(Self {
            width,
            height,
            transform,
            nodata,
            data,
        })
    }

    pub fn value_at(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.data[row * self.width + col])
    }

    pub fn is_nodata(&self, value: f32) -> bool {
        is_nodata(self.nodata, value)
    }

    /// Copy of the `rows x cols` block starting at `(row0, col0)`, clipped
    /// to the raster, with its transform re-anchored.
    pub fn window(&self, row0: usize, col0: usize, rows: usize, cols: usize) -> Option<RasterGrid> {
        if row0 >= self.height || col0 >= self.width {
            return None;
        }
        let rows = rows.min(self.height - row0);
        let cols = cols.min(self.width - col0);
        if rows == 0 || cols == 0 {
            return None;
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in row0..row0 + rows {
            let start = r * self.width + col0;
            data.extend_from_slice(&self.data[start..start + cols]);
        }
        Some(RasterGrid {
            width: cols,
            height: rows,
            transform: self.transform.window(row0, col0),
            nodata: self.nodata,
            data,
        })
    }

    pub fn all_nodata(&self) -> bool {
        self.data.iter().all(|&v| self.is_nodata(v))
    }

    /// Encode in mrt layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + 4);
        let flags = if self.nodata.is_some() { FLAG_NODATA } else { 0 };

        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&(self.width as u32).to_le_bytes());
        buf.extend_from_slice(&(self.height as u32).to_le_bytes());
        for c in self.transform.coefficients() {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&self.nodata.unwrap_or(0.0).to_le_bytes());
        buf.resize(HEADER_CRC_OFFSET, 0);
        let header_crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&header_crc.to_le_bytes());

        let mut digest = crc32fast::Hasher::new();
        for v in &self.data {
            let bytes = v.to_le_bytes();
            buf.extend_from_slice(&bytes);
            digest.update(&bytes);
        }
        buf.extend_from_slice(&digest.finalize().to_le_bytes());
        buf
    }

    /// Write to `path`, returning the number of bytes on disk.
    pub fn write(&self, path: &Path) -> Result<u64> {
        let bytes = self.encode();
        write_atomic(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Read a whole mrt file into memory.
    pub fn read(path: &Path) -> Result<RasterGrid> {
        let handle = RasterHandle::open(path)?;
        let data = (0..handle.width * handle.height)
            .map(|i| handle.sample(i))
            .collect();
        Ok(RasterGrid {
            width: handle.width,
            height: handle.height,
            transform: handle.transform,
            nodata: handle.nodata,
            data,
        })
    }
}

fn is_nodata(nodata: Option<f32>, value: f32) -> bool {
    value.is_nan() || nodata.is_some_and(|nd| value == nd)
}

/// Read-only, memory-mapped view of one mrt tile.
///
/// The mapping is dropped with the handle; [`RasterHandle::close`] makes
/// the release explicit.
#[derive(Debug)]
pub struct RasterHandle {
    path: PathBuf,
    mmap: Mmap,
    width: usize,
    height: usize,
    transform: GeoTransform,
    nodata: Option<f32>,
}

fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn read_f64(b: &[u8], at: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    f64::from_le_bytes(raw)
}

impl RasterHandle {
    /// Map the file and verify header, size and both checksums.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // Tiles are written once via rename and never modified in place.
        let mmap = unsafe { Mmap::map(&file) }?;
        let b = &mmap[..];
        let corrupt = |reason: String| Error::corrupt(path, reason);

        if b.len() < HEADER_LEN + 4 {
            return Err(corrupt(format!("file too short ({} bytes)", b.len())));
        }
        let magic = read_u32(b, 0);
        if magic != MAGIC {
            return Err(corrupt(format!("bad magic 0x{magic:08X}")));
        }
        let version = read_u16(b, 4);
        if version > VERSION {
            return Err(Error::UnsupportedSchema {
                found: u32::from(version),
                supported: u32::from(VERSION),
            });
        }
        let stored_header_crc = read_u32(b, HEADER_CRC_OFFSET);
        if crc32fast::hash(&b[..HEADER_CRC_OFFSET]) != stored_header_crc {
            return Err(corrupt("header checksum mismatch".to_string()));
        }

        let flags = read_u16(b, 6);
        let width = read_u32(b, 8) as usize;
        let height = read_u32(b, 12) as usize;
        let mut coefficients = [0.0f64; 6];
        for (i, c) in coefficients.iter_mut().enumerate() {
            *c = read_f64(b, 16 + i * 8);
        }
        let transform = GeoTransform(coefficients);
        let nodata = (flags & FLAG_NODATA != 0).then(|| f32::from_bits(read_u32(b, 64)));

        if width == 0 || height == 0 {
            return Err(corrupt("empty raster".to_string()));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN + 4))
            .ok_or_else(|| corrupt(format!("dimensions {width}x{height} overflow")))?;
        if b.len() != expected {
            return Err(corrupt(format!(
                "expected {expected} bytes for {width}x{height}, found {}",
                b.len()
            )));
        }
        let data_end = expected - 4;
        if crc32fast::hash(&b[HEADER_LEN..data_end]) != read_u32(b, data_end) {
            return Err(corrupt("sample checksum mismatch".to_string()));
        }
        transform
            .validate()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            width,
            height,
            transform,
            nodata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    pub fn is_nodata(&self, value: f32) -> bool {
        is_nodata(self.nodata, value)
    }

    fn sample(&self, i: usize) -> f32 {
        f32::from_bits(read_u32(&self.mmap, HEADER_LEN + i * 4))
    }

    /// Raw sample at `(row, col)`; `None` outside the raster.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.sample(row * self.width + col))
    }

    /// Pixel `(row, col)` containing the coordinate, if inside the raster.
    pub fn geo_to_pixel(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        let (row, col) = self.transform.geo_to_pixel(lat, lon)?;
        if row < 0 || col < 0 || row as usize >= self.height || col as usize >= self.width {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Bilinear interpolation between the four pixel centers around the
    /// coordinate. `None` outside the center lattice or next to nodata.
    pub fn interpolate(&self, lat: f64, lon: f64) -> Option<f64> {
        let (col_f, row_f) = self.transform.geo_to_pixel_f64(lat, lon)?;
        // Pixel centers sit at half-integer positions
        let x = col_f - 0.5;
        let y = row_f - 0.5;
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let c0 = x.floor() as usize;
        let r0 = y.floor() as usize;
        if c0 >= self.width || r0 >= self.height {
            return None;
        }
        let c1 = (c0 + 1).min(self.width - 1);
        let r1 = (r0 + 1).min(self.height - 1);
        let dx = x - c0 as f64;
        let dy = y - r0 as f64;

        let corner = |r: usize, c: usize| -> Option<f64> {
            let v = self.value_at(r, c)?;
            (!self.is_nodata(v)).then_some(f64::from(v))
        };
        let v00 = corner(r0, c0)?;
        let v01 = corner(r0, c1)?;
        let v10 = corner(r1, c0)?;
        let v11 = corner(r1, c1)?;

        Some(
            v00 * (1.0 - dx) * (1.0 - dy)
                + v01 * dx * (1.0 - dy)
                + v10 * (1.0 - dx) * dy
                + v11 * dx * dy,
        )
    }

    /// Unmap explicitly.
    pub fn close(self) {
        drop(self);
    }
}
