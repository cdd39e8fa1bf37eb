use machine_vision_formats::{
    pixel_format::Mono8, ImageBuffer, ImageBufferRef, ImageData, ImageStride, Stride,
};

/// Owned grayscale image, tightly packed (stride == width).
#[derive(Debug, Clone)]
pub struct GrayMap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ImageData<Mono8> for GrayMap {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, Mono8> {
        ImageBufferRef::new(&self.data)
    }
    fn buffer(self) -> ImageBuffer<Mono8> {
        ImageBuffer::new(self.data)
    }
}

impl Stride for GrayMap {
    fn stride(&self) -> usize {
        self.width as usize
    }
}

fn _test_gray_map_is_image_stride() {
    fn implements<T: ImageStride<Mono8>>() {}
    implements::<GrayMap>();
}

impl GrayMap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// Copy out of any strided Mono8 image.
    pub fn copy_from<IM: ImageStride<Mono8>>(im: &IM) -> Self {
        let w = im.width() as usize;
        let h = im.height() as usize;
        let stride = im.stride();
        let src = im.image_data();
        let mut data = Vec::with_capacity(w * h);
        for row in 0..h {
            let start = row * stride;
            data.extend_from_slice(&src[start..start + w]);
        }
        Self {
            width: im.width(),
            height: im.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    /// Pixel value with coordinates clamped to the image bounds.
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> u8 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(x, y)
    }

    /// Bilinear sample at a fractional position, clamped at borders.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor() as i32;
        let y0 = y.floor() as i32;
        let ax = x - x0 as f32;
        let ay = y - y0 as f32;
        let p00 = self.get_clamped(x0, y0) as f32;
        let p10 = self.get_clamped(x0 + 1, y0) as f32;
        let p01 = self.get_clamped(x0, y0 + 1) as f32;
        let p11 = self.get_clamped(x0 + 1, y0 + 1) as f32;
        p00 * (1.0 - ax) * (1.0 - ay)
            + p10 * ax * (1.0 - ay)
            + p01 * (1.0 - ax) * ay
            + p11 * ax * ay
    }

    /// Bilinear resize to arbitrary dimensions.
    pub fn resize(&self, width: u32, height: u32) -> GrayMap {
        let width = width.max(1);
        let height = height.max(1);
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = self.sample((x as f32 + 0.5) * sx - 0.5, (y as f32 + 0.5) * sy - 0.5);
                data.push(v.round().clamp(0.0, 255.0) as u8);
            }
        }
        GrayMap::new(width, height, data)
    }

    /// Downsample by two with a 2x2 box filter.
    pub fn half(&self) -> GrayMap {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let sx = (x * 2).min(self.width - 1);
                let sy = (y * 2).min(self.height - 1);
                let sx1 = (sx + 1).min(self.width - 1);
                let sy1 = (sy + 1).min(self.height - 1);
                let sum = self.get(sx, sy) as u16
                    + self.get(sx1, sy) as u16
                    + self.get(sx, sy1) as u16
                    + self.get(sx1, sy1) as u16;
                data.push((sum / 4) as u8);
            }
        }
        GrayMap::new(w, h, data)
    }
}

/// Image pyramid, level 0 full resolution, each level half the previous.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<GrayMap>,
}

impl Pyramid {
    pub fn build<IM: ImageStride<Mono8>>(im: &IM, nlevels: usize) -> Self {
        Self::from_gray(GrayMap::copy_from(im), nlevels)
    }

    pub fn from_gray(base: GrayMap, nlevels: usize) -> Self {
        let mut levels = Vec::with_capacity(nlevels.max(1));
        levels.push(base);
        while levels.len() < nlevels.max(1) {
            let prev = levels.last().unwrap();
            if prev.width() < 16 || prev.height() < 16 {
                break;
            }
            levels.push(prev.half());
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, i: usize) -> &GrayMap {
        &self.levels[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn half_reduces_dimensions() {
        let g = GrayMap::new(8, 6, vec![100; 48]);
        let h = g.half();
        assert_eq!((h.width(), h.height()), (4, 3));
        assert!(h.data().iter().all(|&v| v == 100));
    }

    #[test]
    fn bilinear_sample_interpolates() {
        let g = GrayMap::new(2, 1, vec![0, 100]);
        assert_relative_eq!(g.sample(0.5, 0.0), 50.0, epsilon = 1e-3);
        // Clamped outside the image on both sides.
        assert_relative_eq!(g.sample(-1.0, 0.0), 0.0, epsilon = 1e-3);
        assert_relative_eq!(g.sample(2.0, 0.0), 100.0, epsilon = 1e-3);
    }

    #[test]
    fn pyramid_stops_at_small_levels() {
        let g = GrayMap::new(32, 32, vec![0; 1024]);
        let p = Pyramid::from_gray(g, 8);
        assert!(p.num_levels() <= 8);
        assert!(p.level(p.num_levels() - 1).width() >= 8);
    }
}
