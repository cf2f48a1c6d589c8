use crate::geometry::PatternGeometry;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use nalgebra::Point2;

const RADIUS: f32 = 4.0;

const ROW_COLORS: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 200, 200]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

fn draw_marker(image: &mut RgbImage, p: Point2<f32>, color: Rgb<u8>) {
    draw_line_segment_mut(
        image,
        (p.x - RADIUS, p.y - RADIUS),
        (p.x + RADIUS, p.y + RADIUS),
        color,
    );
    draw_line_segment_mut(
        image,
        (p.x - RADIUS, p.y + RADIUS),
        (p.x + RADIUS, p.y - RADIUS),
        color,
    );
    draw_hollow_circle_mut(
        image,
        (p.x.round() as i32, p.y.round() as i32),
        RADIUS as i32 + 1,
        color,
    );
}

/// Draw detected corners onto `image`.
///
/// A found pattern gets one color per row and a polyline through the corners
/// in order; otherwise every corner is drawn in red without connections.
pub fn draw_chessboard_corners(
    image: &mut RgbImage,
    geometry: PatternGeometry,
    corners: &[Point2<f32>],
    found: bool,
) {
    if !found || corners.len() != geometry.corner_count() {
        for &p in corners {
            draw_marker(image, p, ROW_COLORS[0]);
        }
        return;
    }

    let mut prev: Option<Point2<f32>> = None;
    for (k, &p) in corners.iter().enumerate() {
        let color = ROW_COLORS[(k / geometry.cols()) % ROW_COLORS.len()];
        if let Some(q) = prev {
            draw_line_segment_mut(image, (q.x, q.y), (p.x, p.y), color);
        }
        draw_marker(image, p, color);
        prev = Some(p);
    }
}
