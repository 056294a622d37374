//! Error types and utilities for the mosaico tile engine
//!
//! Library crates return [`Result`] with the [`Error`] enum below. The query
//! path never surfaces these for a single bad tile or point; they are logged
//! and the item degrades to "no data". Only configuration problems (missing
//! index, missing tile store) are fatal, and only at startup.

use std::path::PathBuf;

use strsim::{jaro_winkler, normalized_levenshtein};

/// Main error type for mosaico operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid parameters supplied by a caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Feature geometry rejected at partition time
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Layer name is not part of the dataset
    #[error("Layer '{layer}' not found{}", suggestion_suffix(.suggestion))]
    LayerNotFound {
        layer: String,
        suggestion: Option<String>,
    },

    /// Tile id is not referenced by the index for its layer
    #[error("Tile '{tile_id}' not found in layer '{layer}'")]
    TileNotFound { layer: String, tile_id: String },

    /// Tile payload exists but could not be decoded
    #[error("Corrupt tile {}: {reason}", .path.display())]
    CorruptTile { path: PathBuf, reason: String },

    /// Master index or tile store absent
    #[error("Index not found at {}", .0.display())]
    IndexMissing(PathBuf),

    /// Payload or index written by a newer schema than this build understands
    #[error("Unsupported schema version {found} (max supported {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(", did you mean '{name}'?"),
        None => String::new(),
    }
}

impl Error {
    /// Build a [`Error::LayerNotFound`] with a fuzzy suggestion drawn from `known`.
    pub fn layer_not_found(layer: &str, known: &[String]) -> Self {
        Error::LayerNotFound {
            layer: layer.to_string(),
            suggestion: suggest_layer(layer, known),
        }
    }

    /// Build a [`Error::CorruptTile`] for the payload at `path`.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptTile {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience result type for mosaico operations
pub type Result<T> = std::result::Result<T, Error>;

/// Find the best fuzzy match using character-based scoring
///
/// Jaro-Winkler (70%) catches transpositions and shared prefixes, normalized
/// Levenshtein (30%) catches dropped or inserted letters. Layer names are
/// snake_case compounds (`ruta_nacional`), so a close match on one `_`
/// component earns a bonus.
fn find_best_fuzzy_match(input: &str, candidates: &[String]) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }

    let input_lower = input.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;

    let min_threshold = 0.7;

    for candidate in candidates {
        let candidate_lower = candidate.to_lowercase();

        let jw_score = jaro_winkler(&input_lower, &candidate_lower);
        let lev_score = normalized_levenshtein(&input_lower, &candidate_lower);
        let mut score = (jw_score * 0.7) + (lev_score * 0.3);

        if candidate_lower.contains('_') {
            let best_part = candidate_lower
                .split('_')
                .filter(|part| part.len() >= 4)
                .map(|part| jaro_winkler(&input_lower, part))
                .fold(0.0f64, f64::max);
            if best_part > 0.9 {
                score += 0.2 * best_part;
            }
        }

        if score >= min_threshold && score > best_score {
            best_score = score;
            best_match = Some(candidate.clone());
        }
    }

    best_match
}

/// Suggest a known layer name for a potentially misspelled one.
///
/// Returns `None` for an exact (case-insensitive) match or when nothing is close.
pub fn suggest_layer(layer: &str, known: &[String]) -> Option<String> {
    if known.iter().any(|k| k.eq_ignore_ascii_case(layer)) {
        return None;
    }
    find_best_fuzzy_match(layer, known)
}
