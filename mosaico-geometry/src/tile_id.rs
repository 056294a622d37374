//! Grid cell identifiers
//!
//! The string form `c{column:04}_r{row:04}` doubles as the payload file stem,
//! and the zero padding keeps lexicographic order equal to grid order for
//! grids up to 10 000 cells per side.

use std::fmt;
use std::str::FromStr;

use mosaico_common::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Column 0 is the westernmost column, row 0 the northernmost row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub column: u32,
    pub row: u32,
}

impl TileId {
    pub fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{:04}_r{:04}", self.column, self.row)
    }
}

impl FromStr for TileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidInput(format!("invalid tile id '{s}'"));

        let (col_part, row_part) = s.split_once('_').ok_or_else(invalid)?;
        let column = col_part
            .strip_prefix('c')
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let row = row_part
            .strip_prefix('r')
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        Ok(TileId { column, row })
    }
}

impl Serialize for TileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = TileId::new(3, 12);
        assert_eq!(id.to_string(), "c0003_r0012");
        assert_eq!("c0003_r0012".parse::<TileId>().unwrap(), id);
        assert_eq!("c12345_r0".parse::<TileId>().unwrap(), TileId::new(12345, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "c1", "x0001_r0002", "c0001_x0002", "c-1_r2", "index", "c1_r"] {
            assert!(bad.parse::<TileId>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_string_order_matches_grid_order() {
        let mut ids = vec![
            TileId::new(10, 2),
            TileId::new(2, 10),
            TileId::new(2, 3),
            TileId::new(0, 0),
        ];
        let mut strings: Vec<String> = ids.iter().map(|t| t.to_string()).collect();
        ids.sort();
        strings.sort();
        let sorted: Vec<String> = ids.iter().map(|t| t.to_string()).collect();
        assert_eq!(strings, sorted);
    }
}
