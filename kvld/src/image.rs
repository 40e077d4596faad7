use derive_more::{Deref, DerefMut};
use image::{DynamicImage, ImageBuffer, Luma};
use log::*;

type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The image type sampled by the virtual line scorer.
///
/// This is a thin wrapper around the image crate's float luminance buffer
/// with pixel values between 0 and 1. The image crate is still used for
/// loading; this type adds the sub-pixel access and the filters the
/// scorer needs.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    /// Create a unit float image from the image crate's DynamicImage type.
    pub fn from_dynamic(input_image: &DynamicImage) -> Self {
        let gray_image = input_image.to_luma8();
        info!(
            "Loaded a {} x {} image for line sampling",
            gray_image.width(),
            gray_image.height()
        );
        Self(ImageBuffer::from_fn(
            gray_image.width(),
            gray_image.height(),
            |x, y| Luma([f32::from(gray_image[(x, y)][0]) / 255f32]),
        ))
    }

    /// Create an image by evaluating `f` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([f(x as usize, y as usize)])
        }))
    }

    /// Wrap a row-major buffer of `width * height` pixels.
    ///
    /// Returns `None` if the buffer has the wrong length.
    pub fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Option<Self> {
        ImageBuffer::from_raw(width as u32, height as u32, data).map(Self)
    }

    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.get_pixel(x as u32, y as u32)[0]
    }

    pub fn put(&mut self, x: usize, y: usize, pixel_value: f32) {
        self.put_pixel(x as u32, y as u32, Luma([pixel_value]));
    }

    /// Pixel lookup with border replication.
    fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width() as isize - 1) as usize;
        let y = y.clamp(0, self.height() as isize - 1) as usize;
        self.get(x, y)
    }

    /// Bilinear intensity at a sub-pixel position.
    ///
    /// Pixel centers lie on integer coordinates. Positions outside the image
    /// read the replicated border.
    pub fn sample(&self, x: f64, y: f64) -> f32 {
        if self.width() == 0 || self.height() == 0 || !x.is_finite() || !y.is_finite() {
            return 0.0;
        }
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = (x - x0) as f32;
        let fy = (y - y0) as f32;
        let (x0, y0) = (x0 as isize, y0 as isize);
        let top = self.get_clamped(x0, y0) * (1.0 - fx) + self.get_clamped(x0 + 1, y0) * fx;
        let bottom =
            self.get_clamped(x0, y0 + 1) * (1.0 - fx) + self.get_clamped(x0 + 1, y0 + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Central-difference gradients `(d/dx, d/dy)` in intensity per pixel.
    pub fn gradients(&self) -> (Self, Self) {
        let (width, height) = self.dimensions();
        let mut dx = Self::new(width, height);
        let mut dy = Self::new(width, height);
        for y in 0..height as isize {
            for x in 0..width as isize {
                let gx = 0.5 * (self.get_clamped(x + 1, y) - self.get_clamped(x - 1, y));
                let gy = 0.5 * (self.get_clamped(x, y + 1) - self.get_clamped(x, y - 1));
                dx.put(x as usize, y as usize, gx);
                dy.put(x as usize, y as usize, gy);
            }
        }
        (dx, dy)
    }

    /// Averages 2x2 tiles into an image of half the size.
    ///
    /// An odd last row or column is averaged with itself.
    pub fn half_size(&self) -> Self {
        if self.width() == 0 || self.height() == 0 {
            return self.clone();
        }
        let width = (self.width() / 2).max(1);
        let height = (self.height() / 2).max(1);
        Self::from_fn(width, height, |x, y| {
            let (x, y) = (2 * x as isize, 2 * y as isize);
            0.25 * (self.get_clamped(x, y)
                + self.get_clamped(x + 1, y)
                + self.get_clamped(x, y + 1)
                + self.get_clamped(x + 1, y + 1))
        })
    }
}

/// The Gaussian function.
fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * std::f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Generate a normalized Gaussian kernel of odd `kernel_size`.
pub fn gaussian_kernel(r: f32, kernel_size: usize) -> Vec<f32> {
    debug_assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let half_width = (kernel_size / 2) as i32;
    let mut kernel: Vec<f32> = (-half_width..=half_width)
        .map(|i| gaussian(i as f32, r))
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

fn separable_filter(image: &GrayFloatImage, kernel: &[f32]) -> GrayFloatImage {
    let half = (kernel.len() / 2) as isize;
    let (width, height) = image.dimensions();
    let horizontal = GrayFloatImage::from_fn(width, height, |x, y| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &w)| w * image.get_clamped(x as isize + k as isize - half, y as isize))
            .sum()
    });
    GrayFloatImage::from_fn(width, height, |x, y| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &w)| w * horizontal.get_clamped(x as isize, y as isize + k as isize - half))
            .sum()
    })
}

/// Perform Gaussian blur with standard deviation `r` (pixels).
///
/// A non-positive `r` returns a copy of the image.
pub fn gaussian_blur(image: &GrayFloatImage, r: f32) -> GrayFloatImage {
    if r <= 0.0 {
        return image.clone();
    }
    let kernel_radius = (2.0 * r).ceil() as usize;
    let kernel = gaussian_kernel(r, kernel_radius * 2 + 1);
    separable_filter(image, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_kernel_correct() {
        // test against known correct kernel
        let kernel = gaussian_kernel(3.0, 7);
        let known_correct_kernel = [
            0.1062_8852,
            0.1403_2133,
            0.1657_7007,
            0.1752_4014,
            0.1657_7007,
            0.1403_2133,
            0.1062_8852,
        ];
        for (i, j) in kernel.iter().zip(known_correct_kernel.iter()) {
            assert!(f32::abs(*i - *j) < 0.0001);
        }
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let image = GrayFloatImage::from_fn(4, 4, |x, _| x as f32);
        assert!((image.sample(1.25, 2.0) - 1.25).abs() < 1e-6);
        assert!((image.sample(2.5, 0.7) - 2.5).abs() < 1e-6);
        // Border replication.
        assert!((image.sample(-3.0, 1.0) - 0.0).abs() < 1e-6);
        assert!((image.sample(10.0, 1.0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn gradients_of_ramp() {
        let image = GrayFloatImage::from_fn(8, 8, |x, y| 0.1 * x as f32 + 0.05 * y as f32);
        let (dx, dy) = image.gradients();
        assert!((dx.get(4, 4) - 0.1).abs() < 1e-6);
        assert!((dy.get(4, 4) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn half_size_averages_tiles() {
        let image = GrayFloatImage::from_fn(4, 2, |x, y| (x + 4 * y) as f32);
        let half = image.half_size();
        assert_eq!(half.dimensions(), (2, 1));
        assert!((half.get(0, 0) - 2.5).abs() < 1e-6);
        assert!((half.get(1, 0) - 4.5).abs() < 1e-6);
    }

    #[test]
    fn blur_preserves_constant() {
        let image = GrayFloatImage::from_fn(9, 9, |_, _| 0.3);
        let blurred = gaussian_blur(&image, 1.5);
        assert!((blurred.get(0, 0) - 0.3).abs() < 1e-5);
        assert!((blurred.get(4, 4) - 0.3).abs() < 1e-5);
    }
}
