use crate::candidates::{find_quad_candidates, CandidateParams};
use crate::scan::{decode_marker_in_quad, ScanDecodeConfig};
use crate::{DictionaryKind, Matcher};
use image::{DynamicImage, GrayImage, RgbImage};
use log::debug;
use markercal_core::{gray_view, refine_corners_subpix, SubpixParams};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

const MIN_IMAGE_SIDE: u32 = 8;

/// A decoded marker.
///
/// Corners follow the dictionary's canonical order: top-left, top-right,
/// bottom-right, bottom-left of the marker as printed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: u32,
    pub corners: [Point2<f32>; 4],
}

impl Marker {
    pub fn center(&self) -> Point2<f32> {
        let sum = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Point2::from(sum / 4.0)
    }
}

/// Result of one detection call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub markers: Vec<Marker>,
    /// Square candidates that did not decode, corners clockwise.
    pub rejected: Vec<[Point2<f32>; 4]>,
}

impl MarkerDetection {
    pub fn find(&self, id: u32) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerDetectorParams {
    pub candidates: CandidateParams,
    pub decode: ScanDecodeConfig,
    /// Accepted Hamming distance; `None` uses the dictionary's own
    /// correction capability.
    pub max_hamming: Option<u8>,
    /// Subpixel refinement of decoded marker corners.
    pub refine: Option<SubpixParams>,
}

impl Default for MarkerDetectorParams {
    fn default() -> Self {
        Self {
            candidates: CandidateParams::default(),
            decode: ScanDecodeConfig::default(),
            max_hamming: None,
            refine: Some(SubpixParams {
                half_window: 3,
                ..SubpixParams::default()
            }),
        }
    }
}

/// Square fiducial detector for one dictionary.
#[derive(Clone, Debug)]
pub struct MarkerDetector {
    kind: DictionaryKind,
    params: MarkerDetectorParams,
    matcher: Matcher,
}

impl MarkerDetector {
    pub fn new(kind: DictionaryKind, params: MarkerDetectorParams) -> Self {
        let dict = kind.dictionary();
        let max_hamming = params.max_hamming.unwrap_or(dict.max_correction_bits);
        Self {
            kind,
            params,
            matcher: Matcher::builtin(kind, max_hamming),
        }
    }

    pub fn dictionary(&self) -> DictionaryKind {
        self.kind
    }

    pub fn params(&self) -> &MarkerDetectorParams {
        &self.params
    }

    /// Detect markers in a grayscale image.
    ///
    /// Duplicate ids are reported as found; markers keep the candidate order
    /// (largest first).
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, img),
            fields(width = img.width(), height = img.height(), dictionary = %self.kind)
        )
    )]
    pub fn detect(&self, img: &GrayImage) -> MarkerDetection {
        let mut out = MarkerDetection::default();
        if img.width() < MIN_IMAGE_SIDE || img.height() < MIN_IMAGE_SIDE {
            return out;
        }

        let view = gray_view(img);
        for quad in find_quad_candidates(img, &self.params.candidates) {
            let Some(decoded) =
                decode_marker_in_quad(&view, &quad.corners, &self.params.decode, &self.matcher)
            else {
                out.rejected.push(quad.corners);
                continue;
            };

            let r = decoded.rotation as usize;
            let mut corners: [Point2<f32>; 4] = std::array::from_fn(|k| quad.corners[(k + r) % 4]);
            if let Some(refine) = &self.params.refine {
                refine_corners_subpix(&view, &mut corners, refine);
            }
            out.markers.push(Marker {
                id: decoded.id,
                corners,
            });
        }

        debug!(
            "{} markers decoded, {} candidates rejected",
            out.markers.len(),
            out.rejected.len()
        );
        out
    }

    pub fn detect_rgb(&self, img: &RgbImage) -> MarkerDetection {
        self.detect(&image::imageops::grayscale(img))
    }

    pub fn detect_dynamic(&self, img: &DynamicImage) -> MarkerDetection {
        self.detect(&img.to_luma8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_marker;
    use image::imageops;
    use image::Luma;

    /// Printed marker pasted on a white sheet with `margin` pixels on each side.
    fn sheet(kind: DictionaryKind, id: u32, cell_px: u32, margin: u32) -> GrayImage {
        let marker = render_marker(&kind.dictionary(), id, cell_px).expect("valid id");
        let side = marker.width() + 2 * margin;
        let mut img = GrayImage::from_pixel(side, side, Luma([255]));
        imageops::overlay(&mut img, &marker, margin as i64, margin as i64);
        img
    }

    fn near(p: Point2<f32>, x: f32, y: f32) -> bool {
        (p - Point2::new(x, y)).norm() < 1.0
    }

    #[test]
    fn detects_printed_marker() {
        let img = sheet(DictionaryKind::Aruco4x4_50, 9, 10, 30);
        let det = MarkerDetector::new(DictionaryKind::Aruco4x4_50, MarkerDetectorParams::default())
            .detect(&img);

        assert_eq!(det.markers.len(), 1);
        let m = det.markers[0];
        assert_eq!(m.id, 9);
        assert!(near(m.corners[0], 29.5, 29.5), "{:?}", m.corners);
        assert!(near(m.corners[1], 89.5, 29.5), "{:?}", m.corners);
        assert!(near(m.corners[2], 89.5, 89.5), "{:?}", m.corners);
        assert!(near(m.corners[3], 29.5, 89.5), "{:?}", m.corners);
        assert!(near(m.center(), 59.5, 59.5));
    }

    #[test]
    fn corners_follow_printed_orientation() {
        let img = sheet(DictionaryKind::ArucoOriginal, 300, 8, 24);
        // Clockwise quarter turn: the printed top-left ends up top-right.
        let turned = imageops::rotate90(&img);
        let det = MarkerDetector::new(DictionaryKind::ArucoOriginal, MarkerDetectorParams::default())
            .detect(&turned);

        let m = det.find(300).expect("marker 300");
        let (lo, hi) = (23.5, 23.5 + 56.0);
        assert!(near(m.corners[0], hi, lo), "{:?}", m.corners);
        assert!(near(m.corners[1], hi, hi), "{:?}", m.corners);
        assert!(near(m.corners[2], lo, hi), "{:?}", m.corners);
        assert!(near(m.corners[3], lo, lo), "{:?}", m.corners);
    }

    #[test]
    fn wrong_dictionary_rejects_candidate() {
        let img = sheet(DictionaryKind::Aruco4x4_50, 4, 10, 30);
        let det = MarkerDetector::new(DictionaryKind::ArucoOriginal, MarkerDetectorParams::default())
            .detect(&img);
        assert!(det.markers.is_empty());
        assert!(!det.rejected.is_empty());
    }

    #[test]
    fn blank_and_tiny_frames_yield_nothing() {
        let detector = MarkerDetector::new(DictionaryKind::default(), MarkerDetectorParams::default());
        let blank = GrayImage::from_pixel(64, 48, Luma([200]));
        assert_eq!(detector.detect(&blank), MarkerDetection::default());
        let tiny = GrayImage::from_pixel(4, 4, Luma([0]));
        assert_eq!(detector.detect(&tiny), MarkerDetection::default());
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let p: MarkerDetectorParams = serde_json::from_str(r#"{"max_hamming": 0}"#).unwrap();
        assert_eq!(p.max_hamming, Some(0));
        assert_eq!(p.candidates, CandidateParams::default());
        assert_eq!(p.refine.map(|r| r.half_window), Some(3));
    }
}
