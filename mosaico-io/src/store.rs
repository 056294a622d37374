//! On-disk layout of a tile store
//!
//! ```text
//! <root>/index.json                          master index
//! <root>/<category>/index.json               category index
//! <root>/<category>/<layer>/index.json       layer index
//! <root>/<category>/<layer>/<tile_id>.json   vector tile (.json.zst when compressed)
//! <root>/<category>/<layer>/<tile_id>.mrt    raster tile
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use mosaico_common::{Error, Result};
use mosaico_geometry::TileId;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

pub const INDEX_FILE: &str = "index.json";

/// Payload encoding of one tile file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileFormat {
    Json,
    JsonZstd,
    Mrt,
}

impl TileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TileFormat::Json => "json",
            TileFormat::JsonZstd => "json.zst",
            TileFormat::Mrt => "mrt",
        }
    }

    /// Split a file name into tile id and format; `None` for anything else
    /// (including `index.json`).
    pub fn parse_file_name(name: &str) -> Option<(TileId, TileFormat)> {
        let (stem, format) = if let Some(stem) = name.strip_suffix(".json.zst") {
            (stem, TileFormat::JsonZstd)
        } else if let Some(stem) = name.strip_suffix(".json") {
            (stem, TileFormat::Json)
        } else if let Some(stem) = name.strip_suffix(".mrt") {
            (stem, TileFormat::Mrt)
        } else {
            return None;
        };
        stem.parse::<TileId>().ok().map(|id| (id, format))
    }
}

/// A payload file found in a layer directory
#[derive(Debug, Clone, PartialEq)]
pub struct TileFile {
    pub tile_id: TileId,
    pub format: TileFormat,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
}

impl TileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Open an existing store; a missing root is a configuration error.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::IndexMissing(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master_index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    pub fn category_index_path(&self, category: &str) -> PathBuf {
        self.category_dir(category).join(INDEX_FILE)
    }

    pub fn layer_dir(&self, category: &str, layer: &str) -> PathBuf {
        self.category_dir(category).join(layer)
    }

    pub fn layer_index_path(&self, category: &str, layer: &str) -> PathBuf {
        self.layer_dir(category, layer).join(INDEX_FILE)
    }

    pub fn tile_path(&self, category: &str, layer: &str, tile_id: TileId, format: TileFormat) -> PathBuf {
        self.layer_dir(category, layer)
            .join(format!("{tile_id}.{}", format.extension()))
    }

    /// Remove everything previously written for a layer and recreate its
    /// directory empty.
    pub fn reset_layer_dir(&self, category: &str, layer: &str) -> Result<PathBuf> {
        let dir = self.layer_dir(category, layer);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Payload files of a layer sorted by tile id; `None` if the layer
    /// directory does not exist. Only index builds list directories.
    pub fn list_tiles(&self, category: &str, layer: &str) -> Result<Option<Vec<TileFile>>> {
        let dir = self.layer_dir(category, layer);
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((tile_id, format)) = TileFormat::parse_file_name(name) {
                files.push(TileFile {
                    tile_id,
                    format,
                    path: entry.path(),
                });
            }
        }
        files.sort_by(|a, b| a.tile_id.cmp(&b.tile_id).then(a.path.cmp(&b.path)));
        Ok(Some(files))
    }
}

/// Write a file through a uniquely named temporary sibling and rename it
/// into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Pretty JSON with a trailing newline, the encoding of every index file.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let store = TileStore::new("/data/tiles");
        let id = TileId::new(2, 7);
        assert_eq!(store.master_index_path(), PathBuf::from("/data/tiles/index.json"));
        assert_eq!(
            store.layer_index_path("Transporte", "ruta_nacional"),
            PathBuf::from("/data/tiles/Transporte/ruta_nacional/index.json")
        );
        assert_eq!(
            store.tile_path("Transporte", "ruta_nacional", id, TileFormat::JsonZstd),
            PathBuf::from("/data/tiles/Transporte/ruta_nacional/c0002_r0007.json.zst")
        );
        assert_eq!(
            store.tile_path("Relieve", "elevacion", id, TileFormat::Mrt),
            PathBuf::from("/data/tiles/Relieve/elevacion/c0002_r0007.mrt")
        );
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            TileFormat::parse_file_name("c0001_r0002.json"),
            Some((TileId::new(1, 2), TileFormat::Json))
        );
        assert_eq!(
            TileFormat::parse_file_name("c0001_r0002.json.zst"),
            Some((TileId::new(1, 2), TileFormat::JsonZstd))
        );
        assert_eq!(TileFormat::parse_file_name("index.json"), None);
        assert_eq!(TileFormat::parse_file_name("c0001_r0002.json.tmp"), None);
        assert_eq!(TileFormat::parse_file_name("notes.txt"), None);
    }

    #[test]
    fn test_reset_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = TileStore::new(dir.path());
        assert!(store.list_tiles("Transporte", "ruta").unwrap().is_none());

        let layer_dir = store.reset_layer_dir("Transporte", "ruta").unwrap();
        fs::write(layer_dir.join("c0001_r0000.json"), b"{}").unwrap();
        fs::write(layer_dir.join("c0000_r0003.json"), b"{}").unwrap();
        fs::write(layer_dir.join("index.json"), b"{}").unwrap();

        let listed = store.list_tiles("Transporte", "ruta").unwrap().unwrap();
        let ids: Vec<String> = listed.iter().map(|t| t.tile_id.to_string()).collect();
        assert_eq!(ids, vec!["c0000_r0003", "c0001_r0000"]);

        store.reset_layer_dir("Transporte", "ruta").unwrap();
        assert!(store.list_tiles("Transporte", "ruta").unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_open_missing_root() {
        assert!(matches!(
            TileStore::open("/nonexistent/mosaico-store"),
            Err(Error::IndexMissing(_))
        ));
    }

    #[test]
    fn test_write_json_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/index.json");
        write_json_file(&path, &serde_json::json!({"b": 1, "a": [1, 2]})).unwrap();
        let first = fs::read(&path).unwrap();
        write_json_file(&path, &serde_json::json!({"b": 1, "a": [1, 2]})).unwrap();
        assert_eq!(first, fs::read(&path).unwrap());
        assert!(first.ends_with(b"\n"));
        let names: Vec<_> = fs::read_dir(dir.path().join("a/b")).unwrap().collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c0000_r0000.json");
        std::thread::scope(|s| {
            for i in 0..8u8 {
                let path = &path;
                s.spawn(move || write_atomic(path, &[i; 4096]).unwrap());
            }
        });
        // One complete write wins; no temp files remain
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|b| *b == bytes[0]));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
