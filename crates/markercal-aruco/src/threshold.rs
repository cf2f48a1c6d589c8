//! Global and local thresholding.

use image::{GrayImage, Luma};

/// Otsu threshold of a set of intensities.
///
/// Degenerate inputs fall back to the midpoint of the observed range.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    let Some((&min_v, &max_v)) = samples.iter().min().zip(samples.iter().max()) else {
        return 127;
    };
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Summed-area table with a zero first row/column: `(w + 1) × (h + 1)`.
pub(crate) struct IntegralImage {
    width: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += raw[y * w + x] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { width: w, sums }
    }

    /// Sum over the half-open box `[x0, x1) × [y0, y1)`.
    #[inline]
    pub(crate) fn box_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.width + 1;
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0]
            - self.sums[y0 * s + x1]
            - self.sums[y1 * s + x0]
    }
}

/// Inverted local-mean threshold: foreground (255) where a pixel is darker
/// than the mean of its `window × window` neighborhood minus `offset`.
///
/// The window is clipped at the image border.
pub fn adaptive_threshold_inv(img: &GrayImage, window: u32, offset: f32) -> GrayImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut out = GrayImage::new(img.width(), img.height());
    if w == 0 || h == 0 {
        return out;
    }
    let integral = IntegralImage::new(img);
    let r = (window.max(3) / 2) as usize;
    let raw = img.as_raw();

    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(h));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(w));
            let area = ((x1 - x0) * (y1 - y0)) as f32;
            let mean = integral.box_sum(x0, y0, x1, y1) as f32 / area;
            if (raw[y * w + x] as f32) < mean - offset {
                out.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }
    out
}
