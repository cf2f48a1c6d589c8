//! Dictionary matching and rotation helpers.

use crate::{Dictionary, DictionaryKind};

/// A dictionary match for an observed marker code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    /// Marker id in the dictionary.
    pub id: u32,
    /// Rotation `0..=3` such that: `observed_code == rotate(dict_code, rotation)`.
    pub rotation: u8,
    /// Hamming distance between observed and dictionary code (after rotation).
    pub hamming: u8,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("marker_size {marker_size} implies {bits} bits > 64 (unsupported)")]
    TooManyBits { marker_size: usize, bits: usize },
}

/// Matcher for a fixed dictionary.
///
/// Brute-force search over all ids and rotations; dictionaries here hold at
/// most a few thousand codes.
#[derive(Clone, Debug)]
pub struct Matcher {
    dict: Dictionary,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// Build a matcher for the given dictionary and Hamming threshold.
    pub fn new(dict: Dictionary, max_hamming: u8) -> Result<Self, MatcherError> {
        let bits = dict.bit_count();
        if bits > 64 {
            return Err(MatcherError::TooManyBits {
                marker_size: dict.marker_size,
                bits,
            });
        }

        Ok(Self::build(dict, max_hamming))
    }

    /// Matcher for a built-in dictionary; those never exceed 64 bits.
    pub(crate) fn builtin(kind: DictionaryKind, max_hamming: u8) -> Self {
        Self::build(kind.dictionary(), max_hamming)
    }

    fn build(dict: Dictionary, max_hamming: u8) -> Self {
        let rotated = dict
            .codes
            .iter()
            .map(|&base| {
                [0u8, 1, 2, 3].map(|rot| rotate_code_u64(base, dict.marker_size, rot))
            })
            .collect();

        Self {
            dict,
            max_hamming,
            rotated,
        }
    }

    /// Dictionary used by this matcher.
    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dict
    }

    /// Maximum Hamming distance allowed for matches.
    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Find the best match within `max_hamming`.
    ///
    /// Ties keep the lowest id and rotation.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        self.rotated
            .iter()
            .enumerate()
            .flat_map(|(id, rots)| {
                (0u8..4).map(move |rotation| Match {
                    id: id as u32,
                    rotation,
                    hamming: (observed ^ rots[rotation as usize]).count_ones() as u8,
                })
            })
            .filter(|m| m.hamming <= self.max_hamming)
            .min_by_key(|m| m.hamming)
    }
}

/// Rotate a code stored in row-major bits (`idx = y * n + x`) by `rot`
/// quarter turns, each clockwise as seen in the image.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    (0..rot & 3).fold(code, |c, _| quarter_turn(c, n))
}

/// Cell `(x, y)` moves to `(n - 1 - y, x)`.
fn quarter_turn(code: u64, n: usize) -> u64 {
    let mut rest = code;
    let mut out = 0u64;
    while rest != 0 {
        let idx = rest.trailing_zeros() as usize;
        rest &= rest - 1;
        let (x, y) = (idx % n, idx / n);
        out |= 1 << (x * n + (n - 1 - y));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;

    #[test]
    fn rotate_four_times_is_identity() {
        let code = 0x0123_4567_89ab_cdef_u64;
        let n = 8;
        let r = rotate_code_u64(code, n, 1);
        let r = rotate_code_u64(r, n, 1);
        let r = rotate_code_u64(r, n, 1);
        let r = rotate_code_u64(r, n, 1);
        assert_eq!(code, r);
    }

    #[test]
    fn single_step_is_clockwise() {
        // Only the top-left cell set; a clockwise quarter turn moves it top-right.
        assert_eq!(rotate_code_u64(1, 3, 1), 1 << 2);
        assert_eq!(rotate_code_u64(1, 3, 2), 1 << 8);
        assert_eq!(rotate_code_u64(1, 3, 3), 1 << 6);
    }

    #[test]
    fn matcher_finds_rotated_code() {
        let dict = builtins::builtin_dictionary("DICT_4X4_50").expect("builtin dict");
        let matcher = Matcher::new(dict, 0).unwrap();

        let base = dict.codes[7];
        let observed = rotate_code_u64(base, dict.marker_size, 1);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!(m.id, 7);
        assert_eq!(m.rotation, 1);
        assert_eq!(m.hamming, 0);
    }

    #[test]
    fn matcher_corrects_single_bit_error() {
        let dict = builtins::DICT_4X4_50;
        let matcher = Matcher::new(dict, dict.max_correction_bits).unwrap();
        let observed = rotate_code_u64(dict.codes[23], 4, 3) ^ (1 << 5);
        let m = matcher.match_code(observed).expect("match");
        assert_eq!((m.id, m.rotation, m.hamming), (23, 3, 1));
    }

    #[test]
    fn aruco_original_rejects_flipped_bit() {
        let dict = builtins::ARUCO_ORIGINAL;
        let matcher = Matcher::new(dict, dict.max_correction_bits).unwrap();
        assert!(matcher.match_code(dict.codes[300] ^ 1).is_none());
        assert_eq!(matcher.match_code(dict.codes[300]).map(|m| m.id), Some(300));
    }

    #[test]
    fn oversized_dictionary_is_rejected() {
        let dict = Dictionary {
            name: "huge",
            marker_size: 9,
            max_correction_bits: 0,
            codes: &[],
        };
        assert!(matches!(
            Matcher::new(dict, 0),
            Err(MatcherError::TooManyBits { bits: 81, .. })
        ));
    }
}
