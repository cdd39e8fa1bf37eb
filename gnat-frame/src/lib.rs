//! Decoded video frame with color and grayscale views.
//!
//! A [`VideoFrame`] owns the RGB pixels emitted by the decoder and a
//! grayscale copy derived from them once at construction. Both planes are
//! exposed as [`machine_vision_formats::ImageStride`] views so downstream
//! kernels are generic over the pixel container.

use machine_vision_formats::{
    pixel_format::{Mono8, RGB8},
    ImageBuffer, ImageBufferRef, ImageData, ImageStride, Stride,
};

/// A decoded frame. Single-owner; the pipeline moves it between stages.
#[derive(Clone)]
pub struct VideoFrame {
    index: u64,
    timestamp: f64,
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    mono: Vec<u8>,
}

fn _test_video_frame_is_send() {
    // Compile-time test to ensure VideoFrame implements Send trait.
    fn implements<T: Send>() {}
    implements::<VideoFrame>();
}

impl VideoFrame {
    /// Build a frame from tightly packed RGB8 data (stride = width*3).
    ///
    /// The grayscale plane is derived with integer BT.601 luma, so the same
    /// RGB input always yields the same grayscale bytes.
    pub fn from_rgb8(index: u64, timestamp: f64, width: u32, height: u32, rgb: Vec<u8>) -> Self {
        debug_assert_eq!(rgb.len(), width as usize * height as usize * 3);
        let mono = rgb_to_mono8(&rgb);
        Self {
            index,
            timestamp,
            width,
            height,
            rgb,
            mono,
        }
    }

    /// Monotonic frame index assigned by the decoder.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Capture timestamp, seconds since an arbitrary epoch.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb_view(&self) -> RgbView<'_> {
        RgbView {
            width: self.width,
            height: self.height,
            data: &self.rgb,
        }
    }

    pub fn mono_view(&self) -> MonoView<'_> {
        MonoView {
            width: self.width,
            height: self.height,
            data: &self.mono,
        }
    }

    pub fn rgb_data(&self) -> &[u8] {
        &self.rgb
    }

    pub fn mono_data(&self) -> &[u8] {
        &self.mono
    }
}

fn rgb_to_mono8(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let r = px[0] as u32;
            let g = px[1] as u32;
            let b = px[2] as u32;
            ((77 * r + 150 * g + 29 * b + 128) >> 8) as u8
        })
        .collect()
}

/// Borrowed RGB8 plane of a [`VideoFrame`].
pub struct RgbView<'a> {
    width: u32,
    height: u32,
    data: &'a [u8],
}

impl ImageData<RGB8> for RgbView<'_> {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, RGB8> {
        ImageBufferRef::new(self.data)
    }
    fn buffer(self) -> ImageBuffer<RGB8> {
        ImageBuffer::new(self.data.to_vec())
    }
}

impl Stride for RgbView<'_> {
    fn stride(&self) -> usize {
        self.width as usize * 3
    }
}

/// Borrowed Mono8 plane of a [`VideoFrame`].
pub struct MonoView<'a> {
    width: u32,
    height: u32,
    data: &'a [u8],
}

impl ImageData<Mono8> for MonoView<'_> {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, Mono8> {
        ImageBufferRef::new(self.data)
    }
    fn buffer(self) -> ImageBuffer<Mono8> {
        ImageBuffer::new(self.data.to_vec())
    }
}

impl Stride for MonoView<'_> {
    fn stride(&self) -> usize {
        self.width as usize
    }
}

fn _test_views_are_image_stride() {
    fn implements<T: ImageStride<F>, F>() {}
    implements::<RgbView<'_>, RGB8>();
    implements::<MonoView<'_>, Mono8>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_derivation_is_deterministic() {
        let rgb = vec![10u8, 200, 30, 255, 255, 255, 0, 0, 0];
        let a = VideoFrame::from_rgb8(0, 0.0, 3, 1, rgb.clone());
        let b = VideoFrame::from_rgb8(1, 1.0, 3, 1, rgb);
        assert_eq!(a.mono_data(), b.mono_data());
        // White maps to 255, black to 0 with the integer luma weights.
        assert_eq!(a.mono_data()[1], 255);
        assert_eq!(a.mono_data()[2], 0);
    }

    #[test]
    fn views_report_dimensions() {
        let f = VideoFrame::from_rgb8(7, 2.5, 4, 2, vec![0; 4 * 2 * 3]);
        assert_eq!(f.index(), 7);
        assert_eq!(f.rgb_view().stride(), 12);
        assert_eq!(f.mono_view().stride(), 4);
        assert_eq!(f.mono_data().len(), 8);
    }
}
