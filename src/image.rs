use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create a zero-filled image of the given size
    pub fn zeros(width: usize, height: usize) -> Image {
        Image {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    /// Convert interleaved 8-bit RGB to grayscale with the usual luma weights
    pub fn from_rgb(rgb: &[u8], width: usize, height: usize) -> Image {
        let mut data = Vec::with_capacity(width * height);
        for i in 0..width * height {
            let r = rgb[3 * i] as f32;
            let g = rgb[3 * i + 1] as f32;
            let b = rgb[3 * i + 2] as f32;
            data.push((0.299 * r + 0.587 * g + 0.114 * b) as u8);
        }
        Image {
            data,
            width,
            height,
        }
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn value_i32(&self, x: i32, y: i32) -> u8 {
        self.data[y as usize * self.width + x as usize]
    }

    #[inline(always)]
    #[cfg(test)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Paste a patch with its top-left corner at (x, y), clipping the
    /// parts that fall outside the image.
    #[cfg(test)]
    pub fn set_sub_image_i32(&mut self, x: i32, y: i32, patch: &Image) {
        for py in 0..patch.height as i32 {
            for px in 0..patch.width as i32 {
                let tx = x + px;
                let ty = y + py;
                if tx >= 0 && ty >= 0 && (tx as usize) < self.width && (ty as usize) < self.height {
                    self.set_value(tx as usize, ty as usize, patch.value(px as usize, py as usize));
                }
            }
        }
    }
}

/// Bilinear interpolation at a sub-pixel point. Coordinate (0, 0) is the
/// center of the top-left pixel. The caller keeps the point within the
/// image borders.
#[inline]
pub fn bilinear(image: &Image, point: Vector2d) -> f64 {
    let x0 = point[0].floor();
    let y0 = point[1].floor();
    let tx = point[0] - x0;
    let ty = point[1] - y0;
    let x0 = x0 as usize;
    let y0 = y0 as usize;
    let x1 = usize::min(x0 + 1, image.width - 1);
    let y1 = usize::min(y0 + 1, image.height - 1);
    let v00 = image.value(x0, y0) as f64;
    let v10 = image.value(x1, y0) as f64;
    let v01 = image.value(x0, y1) as f64;
    let v11 = image.value(x1, y1) as f64;
    (1. - ty) * ((1. - tx) * v00 + tx * v10) + ty * ((1. - tx) * v01 + tx * v11)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear() {
        let image = Image {
            data: vec![10, 20, 30, 40],
            width: 2,
            height: 2,
        };
        assert_eq!(bilinear(&image, Vector2d::new(0., 0.)), 10.);
        assert_eq!(bilinear(&image, Vector2d::new(1., 0.)), 20.);
        assert_eq!(bilinear(&image, Vector2d::new(0.5, 0.)), 15.);
        assert_eq!(bilinear(&image, Vector2d::new(0., 0.5)), 20.);
        assert_eq!(bilinear(&image, Vector2d::new(0.5, 0.5)), 25.);
    }

    #[test]
    fn test_from_rgb() {
        let rgb = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 50, 100, 200];
        let image = Image::from_rgb(&rgb, 2, 2);
        assert_eq!(image.value(0, 0), 76);
        assert_eq!(image.value(1, 0), 149);
        assert_eq!(image.value(0, 1), 29);
        assert_eq!(image.value(1, 1), 96);
    }

    #[test]
    fn test_set_sub_image_clips() {
        let mut image = Image::zeros(4, 4);
        let patch = Image {
            data: vec![9; 4],
            width: 2,
            height: 2,
        };
        image.set_sub_image_i32(-1, 3, &patch);
        assert_eq!(image.value(0, 3), 9);
        assert_eq!(image.value(1, 3), 0);
    }
}
