use crate::image::Image;

/// Minimum width or height of a downscaled level.
const MIN_LEVEL_SIZE: usize = 10;

#[derive(Debug)]
pub struct Pyramid {
    /// Level 0 is the full-resolution source image.
    pub levels: Vec<Image>,
}

impl Pyramid {
    pub fn empty() -> Self {
        Self { levels: vec![] }
    }

    pub fn new(frame: &Image, level_count: usize) -> Self {
        let mut pyramid = Self::empty();
        pyramid.compute(frame, level_count);
        pyramid
    }

    /// Rebuild the pyramid in place, reusing level buffers. `level_count`
    /// is the number of downscale steps below the source; the chain stops
    /// early once the next level would shrink under MIN_LEVEL_SIZE pixels
    /// in either dimension.
    pub fn compute(&mut self, frame: &Image, level_count: usize) {
        while self.levels.len() < level_count + 1 {
            self.levels.push(Image::empty())
        }
        self.levels[0].data.clear();
        self.levels[0].data.extend_from_slice(&frame.data);
        self.levels[0].width = frame.width;
        self.levels[0].height = frame.height;

        let mut used = 1;
        for i in 0..level_count {
            let rest = &mut self.levels[i..];
            // split_first_mut Returns the first and all the rest of the elements of the slice, or None if it is empty
            if let Some((parent, rest)) = rest.split_first_mut() {
                if parent.width / 2 < MIN_LEVEL_SIZE || parent.height / 2 < MIN_LEVEL_SIZE {
                    break;
                }
                downscale(parent, &mut rest[0]);
                used += 1;
            }
        }
        self.levels.truncate(used);
    }
}

/// downscale the parent image by 2x2 block averaging and store the result
/// in child. Dimensions are floor-halved, odd remainder rows and columns
/// are dropped.
fn downscale(parent: &Image, child: &mut Image) {
    let w_half = parent.width / 2;
    let h_half = parent.height / 2;
    child.data.clear();
    child.width = w_half;
    child.height = h_half;

    for y in 0..h_half {
        let y2 = 2 * y;
        for x in 0..w_half {
            let x2 = 2 * x;
            let value = (parent.value(x2, y2) as u16
                + parent.value(x2 + 1, y2) as u16
                + parent.value(x2, y2 + 1) as u16
                + parent.value(x2 + 1, y2 + 1) as u16)
                / 4;
            child.data.push(value as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_sizes() {
        let frame = Image::zeros(640, 480);
        let pyramid = Pyramid::new(&frame, 3);
        assert_eq!(pyramid.levels.len(), 4);
        let dims: Vec<(usize, usize)> = pyramid
            .levels
            .iter()
            .map(|level| (level.width, level.height))
            .collect();
        assert_eq!(dims, vec![(640, 480), (320, 240), (160, 120), (80, 60)]);
    }

    #[test]
    fn test_min_size_stop() {
        let frame = Image::zeros(128, 128);
        let pyramid = Pyramid::new(&frame, 5);
        // 128 -> 64 -> 32 -> 16, the next halving would go under 10 px
        assert_eq!(pyramid.levels.len(), 4);
        for level in &pyramid.levels {
            assert!(level.width >= MIN_LEVEL_SIZE);
            assert!(level.height >= MIN_LEVEL_SIZE);
        }
    }

    #[test]
    fn test_odd_dimensions() {
        let frame = Image::zeros(25, 21);
        let pyramid = Pyramid::new(&frame, 3);
        assert_eq!(pyramid.levels.len(), 2);
        assert_eq!(pyramid.levels[1].width, 12);
        assert_eq!(pyramid.levels[1].height, 10);
    }

    #[test]
    fn test_block_average() {
        let mut frame = Image::zeros(20, 20);
        frame.set_value(0, 0, 10);
        frame.set_value(1, 0, 20);
        frame.set_value(0, 1, 30);
        frame.set_value(1, 1, 40);
        let pyramid = Pyramid::new(&frame, 1);
        assert_eq!(pyramid.levels[1].value(0, 0), 25);
        assert_eq!(pyramid.levels[1].value(1, 0), 0);
    }

    #[test]
    fn test_source_is_level_zero() {
        let mut frame = Image::zeros(32, 32);
        frame.set_value(5, 7, 123);
        let pyramid = Pyramid::new(&frame, 2);
        assert_eq!(pyramid.levels[0].data, frame.data);
    }

    #[test]
    fn test_recompute_reuses_and_truncates() {
        let mut pyramid = Pyramid::new(&Image::zeros(160, 160), 3);
        assert_eq!(pyramid.levels.len(), 4);
        pyramid.compute(&Image::zeros(20, 20), 3);
        assert_eq!(pyramid.levels.len(), 2);
        assert_eq!(pyramid.levels[1].width, 10);
    }
}
