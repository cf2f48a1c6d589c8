//! Embedded built-in dictionaries.

#![allow(clippy::unreadable_literal)]

use crate::Dictionary;

/// Row words of the original ArUco scheme, MSB = leftmost cell, 1 = white.
const ARUCO_ORIGINAL_WORDS: [u64; 4] = [0x10, 0x17, 0x09, 0x0e];

/// Each of the five rows encodes two id bits (most significant first) as one
/// of four 5-cell words.
const fn aruco_original_codes() -> [u64; 1024] {
    let mut codes = [0u64; 1024];
    let mut id = 0;
    while id < 1024 {
        let mut code = 0u64;
        let mut y = 0;
        while y < 5 {
            let word = ARUCO_ORIGINAL_WORDS[(id >> (2 * (4 - y))) & 3];
            let mut x = 0;
            while x < 5 {
                if (word >> (4 - x)) & 1 == 0 {
                    code |= 1 << (y * 5 + x);
                }
                x += 1;
            }
            y += 1;
        }
        codes[id] = code;
        id += 1;
    }
    codes
}

const ARUCO_ORIGINAL_CODES: [u64; 1024] = aruco_original_codes();

const DICT_4X4_50_CODES: [u64; 50] = [
    0xb352, 0xa60f, 0x4b33, 0x9d66, 0x86d5, 0x4c61, 0x8b86, 0xb0dc,
    0xa480, 0x950c, 0x7660, 0x1a77, 0x128f, 0x0fab, 0x72db, 0x839b,
    0x599d, 0xff99, 0x85c9, 0x0a91, 0x2e9e, 0x2bf2, 0x54cc, 0xbe44,
    0x1d80, 0x71d6, 0xd8ca, 0xd55a, 0x3b7b, 0x09d3, 0x57dd, 0xb215,
    0x0c86, 0x2cf0, 0x8aef, 0x6b6f, 0x51e7, 0x00df, 0x904f, 0xa5c7,
    0xe717, 0xebab, 0xceb3, 0xb2e3, 0xe8db, 0x288b, 0x034b, 0xd92d,
    0x8bf5, 0x37f5,
];

pub const ARUCO_ORIGINAL: Dictionary = Dictionary {
    name: "ARUCO_ORIGINAL",
    marker_size: 5,
    max_correction_bits: 0,
    codes: &ARUCO_ORIGINAL_CODES,
};

pub const DICT_4X4_50: Dictionary = Dictionary {
    name: "DICT_4X4_50",
    marker_size: 4,
    max_correction_bits: 1,
    codes: &DICT_4X4_50_CODES,
};

/// Look up a built-in dictionary by its OpenCV-style name.
pub fn builtin_dictionary(name: &str) -> Option<Dictionary> {
    match name {
        "ARUCO_ORIGINAL" | "DICT_ARUCO_ORIGINAL" => Some(ARUCO_ORIGINAL),
        "DICT_4X4_50" => Some(DICT_4X4_50),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aruco_original_matches_reference_codes() {
        assert_eq!(ARUCO_ORIGINAL.codes.len(), 1024);
        assert_eq!(ARUCO_ORIGINAL.codes[0], 0x1ef7bde);
        assert_eq!(ARUCO_ORIGINAL.codes[1], 0x2f7bde);
    }

    #[test]
    fn codes_fit_marker_bits() {
        for dict in [ARUCO_ORIGINAL, DICT_4X4_50] {
            let mask = (1u64 << dict.bit_count()) - 1;
            assert!(dict.codes.iter().all(|&c| c & !mask == 0), "{}", dict.name);
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(builtin_dictionary("DICT_4X4_50").map(|d| d.len()), Some(50));
        assert!(builtin_dictionary("DICT_7X7_1000").is_none());
    }
}
