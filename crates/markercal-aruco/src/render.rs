//! Marker images for printing and synthetic scenes.

use crate::Dictionary;
use image::{GrayImage, Luma};

const BLACK: u8 = 0;
const WHITE: u8 = 255;

/// Render marker `id` with its one-cell black border, `cell_px` pixels per
/// cell. `None` for an unknown id or a zero cell size.
pub fn render_marker(dictionary: &Dictionary, id: u32, cell_px: u32) -> Option<GrayImage> {
    let code = dictionary.code(id)?;
    if cell_px == 0 {
        return None;
    }
    let n = dictionary.marker_size as u32;
    let cells = n + 2;
    Some(GrayImage::from_fn(cells * cell_px, cells * cell_px, |x, y| {
        let (cx, cy) = (x / cell_px, y / cell_px);
        let border = cx == 0 || cy == 0 || cx == cells - 1 || cy == cells - 1;
        let black = border || (code >> ((cy - 1) * n + (cx - 1))) & 1 == 1;
        Luma([if black { BLACK } else { WHITE }])
    }))
}

/// Object-plane texture of marker `id` for [`markercal_core::synthetic::render_plane`].
///
/// The marker (border included) covers `[-side/2, side/2]²` with object `y`
/// pointing up, so the printed top-left corner is `(-side/2, side/2)`. One
/// cell of white quiet zone surrounds it; further out the texture is empty.
pub fn marker_texture(
    dictionary: &Dictionary,
    id: u32,
    side: f64,
) -> Option<impl Fn(f64, f64) -> Option<u8>> {
    let code = dictionary.code(id)?;
    if !(side.is_finite() && side > 0.0) {
        return None;
    }
    let n = dictionary.marker_size as i64;
    let cells = n + 2;
    let cell = side / cells as f64;
    let half = side / 2.0;

    Some(move |x: f64, y: f64| {
        let col = ((x + half) / cell).floor() as i64;
        let row = ((half - y) / cell).floor() as i64;
        if col < -1 || row < -1 || col > cells || row > cells {
            return None;
        }
        let black = if col < 0 || row < 0 || col >= cells || row >= cells {
            false
        } else if col == 0 || row == 0 || col == cells - 1 || row == cells - 1 {
            true
        } else {
            (code >> ((row - 1) * n + (col - 1))) & 1 == 1
        };
        Some(if black { 20 } else { 235 })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::{ARUCO_ORIGINAL, DICT_4X4_50};

    #[test]
    fn printed_marker_layout() {
        let img = render_marker(&ARUCO_ORIGINAL, 0, 4).unwrap();
        assert_eq!(img.dimensions(), (28, 28));
        // Border.
        assert_eq!(img.get_pixel(1, 1)[0], BLACK);
        assert_eq!(img.get_pixel(26, 13)[0], BLACK);
        // Id 0: first inner column white, second black.
        assert_eq!(img.get_pixel(5, 5)[0], WHITE);
        assert_eq!(img.get_pixel(9, 5)[0], BLACK);
    }

    #[test]
    fn invalid_requests_render_nothing() {
        assert!(render_marker(&DICT_4X4_50, 50, 10).is_none());
        assert!(render_marker(&DICT_4X4_50, 0, 0).is_none());
        assert!(marker_texture(&DICT_4X4_50, 0, -1.0).is_none());
    }

    #[test]
    fn texture_matches_printed_marker() {
        let side = 6.0;
        let tex = marker_texture(&DICT_4X4_50, 17, side).unwrap();
        let printed = render_marker(&DICT_4X4_50, 17, 1).unwrap();
        for row in 0..6u32 {
            for col in 0..6u32 {
                let x = -3.0 + col as f64 + 0.5;
                let y = 3.0 - row as f64 - 0.5;
                let black = tex(x, y).unwrap() < 128;
                assert_eq!(black, printed.get_pixel(col, row)[0] == BLACK, "cell ({col}, {row})");
            }
        }
        assert_eq!(tex(-3.5, 0.0), Some(235));
        assert_eq!(tex(5.0, 0.0), None);
    }
}
