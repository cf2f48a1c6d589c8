//! Marker bit decoding from image quads.

use crate::threshold::otsu_threshold_from_samples;
use crate::{Match, Matcher};
use markercal_core::{homography_from_4pt, GrayImageView, Homography};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Decoder configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDecodeConfig {
    /// Marker border width in cells (OpenCV typically uses 1).
    pub border_bits: usize,
    /// Fraction of the marker side to ignore near its outline.
    pub inset_frac: f32,
    /// Require border-black ratio >= this.
    pub min_border_score: f32,
    /// Also try white-on-black markers.
    pub allow_inverted: bool,
}

impl Default for ScanDecodeConfig {
    fn default() -> Self {
        Self {
            border_bits: 1,
            inset_frac: 0.0,
            min_border_score: 0.85,
            allow_inverted: false,
        }
    }
}

/// One decoded quad.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadDecode {
    pub id: u32,
    /// Rotation `0..=3`: the observed code is the dictionary code turned
    /// clockwise this many quarter turns.
    pub rotation: u8,
    pub hamming: u8,
    pub score: f32,
    pub border_score: f32,
    /// Observed inner bits (row-major, black=1).
    pub code: u64,
    pub inverted: bool,
}

/// Decode a single marker whose outer border is the quad `corners`.
///
/// Corners must be ordered clockwise in the image; the first corner is taken
/// as the top-left of the sampling grid.
pub fn decode_marker_in_quad(
    image: &GrayImageView<'_>,
    corners: &[Point2<f32>; 4],
    cfg: &ScanDecodeConfig,
    matcher: &Matcher,
) -> Option<QuadDecode> {
    let mut decoder = CellDecoder::new(cfg, matcher.dictionary().marker_size)?;
    let dst = corners.map(|p| Point2::new(p.x as f64, p.y as f64));
    let h = homography_from_4pt(&decoder.grid.rect_corners(), &dst)?;
    let obs = decoder.decode_warped(image, &h)?;
    build_detection(obs, matcher)
}

#[derive(Clone, Copy, Debug)]
struct MarkerObservation {
    code: u64,
    border_score: f32,
    inverted: bool,
}

/// Rectified pixels per marker cell.
const RECT_PX_PER_CELL: f32 = 8.0;

struct SampleGrid {
    cells: usize,
    side: f32,
    points: Vec<Point2<f32>>, // row-major: cy * cells + cx
    threshold_points: Vec<Point2<f32>>,
}

impl SampleGrid {
    fn new(cfg: &ScanDecodeConfig, bits: usize) -> Option<Self> {
        if bits == 0 || bits * bits > 64 {
            return None;
        }

        let cells = bits + 2 * cfg.border_bits;
        let side = cells as f32 * RECT_PX_PER_CELL;
        let inset = (cfg.inset_frac.clamp(0.0, 0.25) * side).max(0.0);
        let inner = side - 2.0 * inset;
        let step = inner / cells as f32;

        let mut points = Vec::with_capacity(cells * cells);
        for cy in 0..cells {
            for cx in 0..cells {
                points.push(Point2::new(
                    inset + (cx as f32 + 0.5) * step,
                    inset + (cy as f32 + 0.5) * step,
                ));
            }
        }

        Some(Self {
            cells,
            side,
            points,
            threshold_points: build_threshold_points(inset, inner, cells),
        })
    }

    fn rect_corners(&self) -> [Point2<f64>; 4] {
        let s = self.side as f64;
        [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ]
    }
}

struct CellDecoder<'a> {
    cfg: &'a ScanDecodeConfig,
    bits: usize,
    grid: SampleGrid,
    scratch_bits: Vec<u8>,
    scratch_thr: Vec<u8>,
}

impl<'a> CellDecoder<'a> {
    fn new(cfg: &'a ScanDecodeConfig, bits: usize) -> Option<Self> {
        let grid = SampleGrid::new(cfg, bits)?;
        let scratch_bits = Vec::with_capacity(grid.points.len());
        let scratch_thr = Vec::with_capacity(grid.threshold_points.len());
        Some(Self {
            cfg,
            bits,
            grid,
            scratch_bits,
            scratch_thr,
        })
    }

    fn decode_warped(
        &mut self,
        img: &GrayImageView<'_>,
        h: &Homography,
    ) -> Option<MarkerObservation> {
        self.scratch_bits.clear();
        for p in &self.grid.points {
            let q = h.apply_f32(*p);
            let v = sample_mean_3x3(img, q.x, q.y)?;
            self.scratch_bits.push(v);
        }

        self.scratch_thr.clear();
        for p in &self.grid.threshold_points {
            let q = h.apply_f32(*p);
            if let Some(v) = sample_mean_3x3(img, q.x, q.y) {
                self.scratch_thr.push(v);
            }
        }

        decode_samples(
            &self.scratch_bits,
            &self.scratch_thr,
            self.grid.cells,
            self.bits,
            self.cfg,
        )
    }
}

fn build_detection(obs: MarkerObservation, matcher: &Matcher) -> Option<QuadDecode> {
    let Match {
        id,
        rotation,
        hamming,
    } = matcher.match_code(obs.code)?;
    let bits = matcher.dictionary().bit_count().max(1) as f32;
    let ham_pen = 1.0 - (hamming as f32 / bits);
    Some(QuadDecode {
        id,
        rotation,
        hamming,
        score: (obs.border_score * ham_pen).clamp(0.0, 1.0),
        border_score: obs.border_score,
        code: obs.code,
        inverted: obs.inverted,
    })
}

fn decode_samples(
    samples: &[u8],
    thr_samples: &[u8],
    cells: usize,
    bits: usize,
    cfg: &ScanDecodeConfig,
) -> Option<MarkerObservation> {
    if samples.len() != cells * cells {
        return None;
    }

    let thr = if thr_samples.is_empty() {
        otsu_threshold_from_samples(samples)
    } else {
        otsu_threshold_from_samples(thr_samples)
    };

    let border = cfg.border_bits;
    let polarities: &[bool] = if cfg.allow_inverted {
        &[false, true]
    } else {
        &[false]
    };
    let mut best: Option<MarkerObservation> = None;

    for &inverted in polarities {
        let mut border_ok = 0u32;
        let mut border_total = 0u32;
        let mut code: u64 = 0;

        for cy in 0..cells {
            for cx in 0..cells {
                let is_black = (samples[cy * cells + cx] < thr) != inverted;
                let is_border = border > 0
                    && (cx < border || cy < border || cx + border >= cells || cy + border >= cells);
                if is_border {
                    border_total += 1;
                    if is_black {
                        border_ok += 1;
                    }
                } else if is_black {
                    code |= 1u64 << ((cy - border) * bits + (cx - border));
                }
            }
        }

        let border_score = if border > 0 {
            border_ok as f32 / border_total.max(1) as f32
        } else {
            1.0
        };
        if border_score < cfg.min_border_score {
            continue;
        }

        if best.is_none_or(|b| border_score > b.border_score) {
            best = Some(MarkerObservation {
                code,
                border_score,
                inverted,
            });
        }
    }

    best
}

fn build_threshold_points(start: f32, side: f32, cells: usize) -> Vec<Point2<f32>> {
    const THRESH_SUBDIV: usize = 3;
    let grid = cells * THRESH_SUBDIV;
    let step = side / grid as f32;
    let mut points = Vec::with_capacity(grid * grid);
    for ty in 0..grid {
        for tx in 0..grid {
            points.push(Point2::new(
                start + (tx as f32 + 0.5) * step,
                start + (ty as f32 + 0.5) * step,
            ));
        }
    }
    points
}

/// 3×3 mean around the pixel nearest to `(x, y)`; `None` near the border.
fn sample_mean_3x3(img: &GrayImageView<'_>, x: f32, y: f32) -> Option<u8> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let ix = x.round() as i32;
    let iy = y.round() as i32;
    if ix - 1 < 0 || iy - 1 < 0 || ix + 1 >= img.width as i32 || iy + 1 >= img.height as i32 {
        return None;
    }

    let mut sum = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            sum += img.get(ix + dx, iy + dy) as u32;
        }
    }
    Some((sum / 9) as u8)
}
