use crate::Marker;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use nalgebra::Point2;

const DETECTED: Rgb<u8> = Rgb([0, 255, 0]);
const FIRST_CORNER: Rgb<u8> = Rgb([255, 0, 0]);
const REJECTED: Rgb<u8> = Rgb([255, 0, 255]);

fn draw_outline(image: &mut RgbImage, corners: &[Point2<f32>; 4], color: Rgb<u8>) {
    for k in 0..4 {
        let (a, b) = (corners[k], corners[(k + 1) % 4]);
        draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), color);
    }
}

/// Outline each marker in green and box its first canonical corner in red.
pub fn draw_detected_markers(image: &mut RgbImage, markers: &[Marker]) {
    for m in markers {
        draw_outline(image, &m.corners, DETECTED);
        let c = m.corners[0];
        let rect = Rect::at(c.x.round() as i32 - 3, c.y.round() as i32 - 3).of_size(7, 7);
        draw_hollow_rect_mut(image, rect, FIRST_CORNER);
    }
}

/// Outline rejected candidates in magenta.
pub fn draw_rejected_candidates(image: &mut RgbImage, rejected: &[[Point2<f32>; 4]]) {
    for quad in rejected {
        draw_outline(image, quad, REJECTED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> [Point2<f32>; 4] {
        [
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 10.0),
            Point2::new(30.0, 30.0),
            Point2::new(10.0, 30.0),
        ]
    }

    #[test]
    fn detected_marker_is_green_with_red_corner() {
        let mut img = RgbImage::new(40, 40);
        draw_detected_markers(
            &mut img,
            &[Marker {
                id: 1,
                corners: square(),
            }],
        );
        assert_eq!(*img.get_pixel(20, 10), DETECTED);
        assert_eq!(*img.get_pixel(7, 7), FIRST_CORNER);
        assert_eq!(*img.get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn rejected_candidates_are_magenta() {
        let mut img = RgbImage::new(40, 40);
        draw_rejected_candidates(&mut img, &[square()]);
        assert_eq!(*img.get_pixel(30, 20), REJECTED);
        assert!(img.pixels().all(|p| *p != DETECTED));
    }
}
