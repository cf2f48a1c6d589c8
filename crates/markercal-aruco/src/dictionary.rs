//! Dictionary metadata, packed marker codes and the built-in dictionary selector.

use crate::builtins;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fixed ArUco-style dictionary.
#[derive(Clone, Copy, Debug)]
pub struct Dictionary {
    /// Human-readable name (for debugging/logging).
    pub name: &'static str,
    /// Marker side length (number of inner bits per side).
    pub marker_size: usize,
    /// Maximum error-correcting Hamming distance supported by the dictionary.
    pub max_correction_bits: u8,
    /// One `u64` per marker id, encoding the inner `marker_size × marker_size` bits.
    ///
    /// Bits are stored in row-major order (`idx = y * marker_size + x`, LSB is
    /// the top-left cell) with **black = 1**.
    pub codes: &'static [u64],
}

impl Dictionary {
    /// Total number of inner bits per marker.
    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Code of `id`, if the id exists.
    pub fn code(&self, id: u32) -> Option<u64> {
        self.codes.get(id as usize).copied()
    }

    /// Whether inner cell `(x, y)` of marker `id` is black.
    pub fn is_black(&self, id: u32, x: usize, y: usize) -> Option<bool> {
        if x >= self.marker_size || y >= self.marker_size {
            return None;
        }
        let code = self.code(id)?;
        Some((code >> (y * self.marker_size + x)) & 1 == 1)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("unknown marker dictionary `{0}`")]
    Unknown(String),
}

/// Built-in dictionaries selectable from configuration.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DictionaryKind {
    /// Original ArUco 5×5 dictionary with 1024 ids.
    #[default]
    #[serde(rename = "aruco_original")]
    ArucoOriginal,
    /// OpenCV `DICT_4X4_50`.
    #[serde(rename = "aruco_4x4_50")]
    Aruco4x4_50,
}

impl DictionaryKind {
    pub const ALL: [DictionaryKind; 2] =
        [DictionaryKind::ArucoOriginal, DictionaryKind::Aruco4x4_50];

    pub fn dictionary(self) -> Dictionary {
        match self {
            DictionaryKind::ArucoOriginal => builtins::ARUCO_ORIGINAL,
            DictionaryKind::Aruco4x4_50 => builtins::DICT_4X4_50,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DictionaryKind::ArucoOriginal => "aruco_original",
            DictionaryKind::Aruco4x4_50 => "aruco_4x4_50",
        }
    }
}

impl fmt::Display for DictionaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DictionaryKind {
    type Err = DictionaryError;

    /// Accepts the config names as well as the OpenCV constant names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let key = key.strip_prefix("dict_").unwrap_or(&key);
        match key {
            "aruco_original" | "original" => Ok(DictionaryKind::ArucoOriginal),
            "aruco_4x4_50" | "4x4_50" => Ok(DictionaryKind::Aruco4x4_50),
            _ => Err(DictionaryError::Unknown(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_and_opencv_names() {
        let parse = |s: &str| s.parse::<DictionaryKind>();
        assert_eq!(parse("aruco_original"), Ok(DictionaryKind::ArucoOriginal));
        assert_eq!(parse("DICT_ARUCO_ORIGINAL"), Ok(DictionaryKind::ArucoOriginal));
        assert_eq!(parse("DICT_4X4_50"), Ok(DictionaryKind::Aruco4x4_50));
        assert!("DICT_6X6_250".parse::<DictionaryKind>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        for kind in DictionaryKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
            let back: DictionaryKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn cell_lookup_follows_bit_layout() {
        let dict = DictionaryKind::ArucoOriginal.dictionary();
        // Id 0 rows are all `10000`: the first column is white, the rest black.
        assert_eq!(dict.is_black(0, 0, 2), Some(false));
        assert_eq!(dict.is_black(0, 1, 2), Some(true));
        assert_eq!(dict.is_black(0, 5, 0), None);
        assert_eq!(dict.is_black(5000, 0, 0), None);
    }
}
