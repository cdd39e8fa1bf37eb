//! H.264 frame producer.
//!
//! Feeds compressed units from [`nal_demux`] to an OpenH264 decoder context
//! and drains whatever frames become ready. The codec context is created
//! lazily on the first unit and lives for the pipeline lifetime. Decode
//! errors are counted and swallowed; the stream recovers at the next
//! keyframe.

use gnat_frame::VideoFrame;
use h264_reader::nal::{Nal, RefNal};
use nal_demux::{CompressedUnit, UnitKind};
use openh264::formats::YUVSource;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not create H264 decoder: {0}")]
    DecoderInit(String),
}

/// Counters kept by the decoder driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeStats {
    pub units_in: u64,
    pub frames_out: u64,
    pub decode_errors: u64,
    pub keyframes: u64,
    pub parameter_sets: u64,
}

/// Decoder driver. One per pipeline; owns the codec context.
pub struct FrameDecoder {
    decoder: Option<openh264::decoder::Decoder>,
    next_index: u64,
    dims: Option<(u32, u32)>,
    stats: DecodeStats,
    // FPS over a one second window.
    fps: f64,
    fps_frame_count: u32,
    fps_window_start: Option<f64>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            next_index: 0,
            dims: None,
            stats: DecodeStats::default(),
            fps: 0.0,
            fps_frame_count: 0,
            fps_window_start: None,
        }
    }

    /// Feed one compressed unit; returns zero or more decoded frames.
    ///
    /// `now` is the wall-clock capture timestamp in seconds attached to any
    /// frame produced by this unit.
    pub fn push_unit(&mut self, unit: &CompressedUnit<'_>, now: f64) -> Result<Vec<VideoFrame>> {
        self.stats.units_in += 1;
        match unit.kind {
            UnitKind::KeySlice => self.stats.keyframes += 1,
            UnitKind::SeqParamSet => {
                self.stats.parameter_sets += 1;
                self.log_sps_dimensions(unit.payload);
            }
            UnitKind::PicParamSet => self.stats.parameter_sets += 1,
            _ => {}
        }

        if self.decoder.is_none() {
            let d = openh264::decoder::Decoder::new()
                .map_err(|e| Error::DecoderInit(format!("{e}")))?;
            tracing::info!("H264 decoder initialized");
            self.decoder = Some(d);
        }
        let decoder = match self.decoder.as_mut() {
            Some(d) => d,
            None => unreachable!("decoder initialized above"),
        };

        // OpenH264 wants Annex B framing.
        let mut annex_b = Vec::with_capacity(unit.payload.len() + 4);
        annex_b.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        annex_b.extend_from_slice(unit.payload);

        let mut frames = Vec::new();
        match decoder.decode(&annex_b) {
            Ok(Some(yuv)) => {
                let dim = yuv.dimensions();
                let stride = dim.0 * 3;
                let mut image_data = vec![0u8; stride * dim.1];
                yuv.write_rgb8(&mut image_data);

                let (width, height) = (dim.0 as u32, dim.1 as u32);
                match self.dims {
                    None => {
                        tracing::info!(width, height, "first frame decoded");
                        self.dims = Some((width, height));
                    }
                    Some(prev) if prev != (width, height) => {
                        tracing::warn!(?prev, width, height, "frame dimensions changed mid-stream");
                        self.dims = Some((width, height));
                    }
                    Some(_) => {}
                }

                let frame = VideoFrame::from_rgb8(self.next_index, now, width, height, image_data);
                self.next_index += 1;
                self.stats.frames_out += 1;
                self.update_fps(now);
                frames.push(frame);
            }
            Ok(None) => {
                // Parameter set or incomplete picture; nothing ready yet.
            }
            Err(e) => {
                // Common for fragments before the first keyframe.
                self.stats.decode_errors += 1;
                tracing::debug!(kind = ?unit.kind, "decode error: {e}");
            }
        }
        Ok(frames)
    }

    fn update_fps(&mut self, now: f64) {
        self.fps_frame_count += 1;
        let start = *self.fps_window_start.get_or_insert(now);
        let elapsed = now - start;
        if elapsed >= 1.0 {
            self.fps = self.fps_frame_count as f64 / elapsed;
            self.fps_frame_count = 0;
            self.fps_window_start = Some(now);
        }
    }

    fn log_sps_dimensions(&self, payload: &[u8]) {
        let nal = RefNal::new(payload, &[], true);
        match h264_reader::nal::sps::SeqParameterSet::from_bits(nal.rbsp_bits()) {
            Ok(sps) => {
                if let Ok((w, h)) = sps.pixel_dimensions() {
                    tracing::debug!(width = w, height = h, "sequence parameter set");
                }
            }
            Err(e) => {
                tracing::debug!("unparseable SPS: {e:?}");
            }
        }
    }

    /// Width and height of the stream, known after the first decoded frame.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dims
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decoded frames per second over the most recent window.
    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junk_units_are_swallowed() {
        let mut dec = FrameDecoder::new();
        let payload = [0x41u8, 0xde, 0xad, 0xbe, 0xef];
        let chunk = {
            let mut c = vec![0, 0, 0, 5];
            c.extend_from_slice(&payload);
            c
        };
        let unit = nal_demux::split_units(&chunk).next().unwrap();
        // Whatever the codec thinks of this, no frame comes out and the
        // driver does not fail.
        let frames = dec.push_unit(&unit, 0.0).unwrap();
        assert!(frames.is_empty());
        assert_eq!(dec.stats().units_in, 1);
        assert_eq!(dec.stats().frames_out, 0);
        assert!(dec.dimensions().is_none());
    }

    #[test]
    fn malformed_sps_does_not_panic() {
        let mut dec = FrameDecoder::new();
        let payload = [0x67u8, 0x00, 0x01];
        let chunk = {
            let mut c = vec![0, 0, 0, 3];
            c.extend_from_slice(&payload);
            c
        };
        let unit = nal_demux::split_units(&chunk).next().unwrap();
        let frames = dec.push_unit(&unit, 0.0).unwrap();
        assert!(frames.is_empty());
        assert_eq!(dec.stats().parameter_sets, 1);
    }
}
