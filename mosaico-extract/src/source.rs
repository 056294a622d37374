//! Reading source datasets for partitioning

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use mosaico_common::{Error, Result};
use mosaico_geometry::Feature;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Features decoded from a source file plus the records that were not
#[derive(Debug, Default)]
pub struct SourceFeatures {
    pub features: Vec<Feature>,
    /// `"record N: reason"` for every record that failed to decode
    pub rejected: Vec<String>,
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: Option<String>,
    features: Vec<Value>,
}

/// Read a GeoJSON FeatureCollection (`.geojson`/`.json`, or the same
/// zstd-compressed with a `.zst` suffix).
///
/// The document as a whole must be valid JSON with a `features` array; each
/// record is then decoded on its own so a malformed one is reported and
/// skipped instead of failing the layer.
pub fn read_feature_source(path: &Path) -> Result<SourceFeatures> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("cannot open source {}: {e}", path.display())))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "zst") {
        Box::new(zstd::Decoder::new(file)?)
    } else {
        Box::new(file)
    };

    let raw: RawCollection = serde_json::from_reader(BufReader::new(reader)).map_err(|e| {
        Error::InvalidInput(format!("{} is not a FeatureCollection: {e}", path.display()))
    })?;
    if let Some(kind) = raw.kind.as_deref() {
        if kind != "FeatureCollection" {
            return Err(Error::InvalidInput(format!(
                "{} has type '{kind}', expected FeatureCollection",
                path.display()
            )));
        }
    }

    let mut out = SourceFeatures::default();
    for (i, record) in raw.features.into_iter().enumerate() {
        match serde_json::from_value::<Feature>(record) {
            Ok(feature) => out.features.push(feature),
            Err(e) => {
                warn!(source = %path.display(), record = i, error = %e, "Skipping unreadable feature");
                out.rejected.push(format!("record {i}: {e}"));
            }
        }
    }
    debug!(
        source = %path.display(),
        features = out.features.len(),
        rejected = out.rejected.len(),
        "Read feature source"
    );
    Ok(out)
}
