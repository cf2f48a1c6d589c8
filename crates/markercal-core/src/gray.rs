//! Borrowed grayscale views and bilinear sampling.

/// Row-major 8-bit grayscale view over a borrowed buffer.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl GrayImageView<'_> {
    /// Pixel value, or 0 outside the image.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.data[y as usize * self.width + x as usize]
    }

    /// Pixel value with coordinates clamped to the image border.
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> u8 {
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Central-difference intensity gradient at an integer pixel.
    #[inline]
    pub fn gradient(&self, x: i32, y: i32) -> (f32, f32) {
        let gx = self.get_clamped(x + 1, y) as f32 - self.get_clamped(x - 1, y) as f32;
        let gy = self.get_clamped(x, y + 1) as f32 - self.get_clamped(x, y - 1) as f32;
        (0.5 * gx, 0.5 * gy)
    }

    #[inline]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width - 1) as f32 && y <= (self.height - 1) as f32
    }
}

/// Borrow an `image::GrayImage` as a [`GrayImageView`].
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get(x0, y0) as f32;
    let p10 = src.get(x0 + 1, y0) as f32;
    let p01 = src.get(x0, y0 + 1) as f32;
    let p11 = src.get(x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let data = [0u8, 100, 200, 50];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(sample_bilinear(&view, 0.0, 0.0), 0.0);
        assert_eq!(sample_bilinear(&view, 0.5, 0.0), 50.0);
        assert_eq!(sample_bilinear(&view, 0.5, 0.5), 87.5);
    }

    #[test]
    fn out_of_bounds_reads_black() {
        let data = [255u8; 4];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(view.get(-1, 0), 0);
        assert_eq!(view.get(2, 1), 0);
        assert_eq!(view.get_clamped(5, 5), 255);
    }

    #[test]
    fn gradient_points_towards_brighter_side() {
        let img =
            ::image::GrayImage::from_fn(8, 8, |x, _| ::image::Luma([if x < 4 { 0 } else { 200 }]));
        let view = gray_view(&img);
        let (gx, gy) = view.gradient(4, 3);
        assert!(gx > 0.0);
        assert_eq!(gy, 0.0);
    }
}
