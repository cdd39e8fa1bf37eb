//! Splitter for the drone's length-prefixed H.264 unit stream.
//!
//! Each transport message is a concatenation of units, each prefixed with a
//! 4-byte big-endian length. Malformed prefixes never fail the stream: when
//! the very first prefix of a chunk is unusable the entire chunk degrades to
//! a single unit, and a later bad prefix discards the remainder of that
//! chunk. The decoder downstream tolerates junk.

use byteorder::{BigEndian, ByteOrder};

/// Units longer than this are assumed to be a corrupt prefix.
pub const MAX_UNIT_LEN: usize = 100_000;

/// NAL unit classification from the low 5 bits of the first payload byte.
///
/// Carried through for logging and keyframe accounting only; the demuxer
/// never interprets payload contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Non-IDR coded slice (delta frame).
    DeltaSlice,
    /// IDR coded slice (keyframe).
    KeySlice,
    /// Supplemental enhancement information.
    Sei,
    /// Sequence parameter set.
    SeqParamSet,
    /// Picture parameter set.
    PicParamSet,
    /// Access unit delimiter.
    AccessUnitDelim,
    Other(u8),
}

impl UnitKind {
    pub fn from_first_byte(b: u8) -> Self {
        match b & 0x1f {
            1 => UnitKind::DeltaSlice,
            5 => UnitKind::KeySlice,
            6 => UnitKind::Sei,
            7 => UnitKind::SeqParamSet,
            8 => UnitKind::PicParamSet,
            9 => UnitKind::AccessUnitDelim,
            other => UnitKind::Other(other),
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, UnitKind::SeqParamSet | UnitKind::PicParamSet)
    }
}

/// One compressed unit borrowed from a transport chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedUnit<'a> {
    pub payload: &'a [u8],
    pub kind: UnitKind,
}

impl<'a> CompressedUnit<'a> {
    fn new(payload: &'a [u8]) -> Self {
        let kind = payload
            .first()
            .map(|b| UnitKind::from_first_byte(*b))
            .unwrap_or(UnitKind::Other(0));
        CompressedUnit { payload, kind }
    }
}

/// Lazy iterator over the units of one chunk. See [`split_units`].
pub struct UnitIter<'a> {
    chunk: &'a [u8],
    offset: usize,
    emitted: usize,
    discarded: usize,
    done: bool,
}

impl<'a> UnitIter<'a> {
    /// Prefix and payload bytes that were skipped rather than emitted.
    /// Meaningful once the iterator is exhausted.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Bytes emitted as unit payloads so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

impl<'a> Iterator for UnitIter<'a> {
    type Item = CompressedUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.offset + 4 < self.chunk.len() {
            let len = BigEndian::read_u32(&self.chunk[self.offset..self.offset + 4]) as usize;
            if len == 0 || len > MAX_UNIT_LEN || self.offset + 4 + len > self.chunk.len() {
                break;
            }
            let start = self.offset + 4;
            let payload = &self.chunk[start..start + len];
            self.offset = start + len;
            self.emitted += len;
            self.discarded += 4;
            return Some(CompressedUnit::new(payload));
        }
        self.done = true;
        if self.offset == 0 && !self.chunk.is_empty() {
            // Nothing parsed from this chunk. Degrade: the whole chunk is
            // one unit and the decoder sorts it out.
            tracing::trace!(
                len = self.chunk.len(),
                "malformed length prefix, passing chunk through"
            );
            self.emitted += self.chunk.len();
            return Some(CompressedUnit::new(self.chunk));
        }
        self.discarded += self.chunk.len() - self.offset;
        None
    }
}

/// Split one transport chunk into its compressed units.
///
/// For any input, `emitted() + discarded()` equals the chunk length after
/// exhaustion, and no emitted unit exceeds [`MAX_UNIT_LEN`] bytes unless the
/// whole chunk degraded to a single unit.
pub fn split_units(chunk: &[u8]) -> UnitIter<'_> {
    UnitIter {
        chunk,
        offset: 0,
        emitted: 0,
        discarded: 0,
        done: false,
    }
}

/// Running totals across many chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemuxStats {
    pub chunks: u64,
    pub units: u64,
    pub bytes_in: u64,
    pub bytes_emitted: u64,
    pub bytes_discarded: u64,
    pub fallback_chunks: u64,
}

/// Stateful wrapper keeping [`DemuxStats`] over a stream of chunks.
#[derive(Debug, Default)]
pub struct Demuxer {
    stats: DemuxStats,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `chunk`, updating the running statistics. The returned vector
    /// borrows from `chunk`.
    pub fn push_chunk<'a>(&mut self, chunk: &'a [u8]) -> Vec<CompressedUnit<'a>> {
        let mut iter = split_units(chunk);
        let units: Vec<_> = iter.by_ref().collect();
        self.stats.chunks += 1;
        self.stats.units += units.len() as u64;
        self.stats.bytes_in += chunk.len() as u64;
        self.stats.bytes_emitted += iter.emitted() as u64;
        self.stats.bytes_discarded += iter.discarded() as u64;
        if units.len() == 1 && units[0].payload.len() == chunk.len() && chunk.len() > 4 {
            self.stats.fallback_chunks += 1;
        }
        units
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        BigEndian::write_u32(&mut out, payload.len() as u32);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn splits_concatenated_units() {
        let mut chunk = frame(&[0x67, 1, 2]);
        chunk.extend(frame(&[0x68, 3]));
        chunk.extend(frame(&[0x65, 4, 5, 6]));

        let units: Vec<_> = split_units(&chunk).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].kind, UnitKind::SeqParamSet);
        assert_eq!(units[1].kind, UnitKind::PicParamSet);
        assert_eq!(units[2].kind, UnitKind::KeySlice);
        assert_eq!(units[2].payload, &[0x65, 4, 5, 6]);
    }

    #[test]
    fn zero_length_prefix_degrades_to_whole_chunk() {
        let chunk = [0u8, 0, 0, 0, 0x41, 9, 9];
        let units: Vec<_> = split_units(&chunk).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload, &chunk[..]);
    }

    #[test]
    fn oversize_prefix_degrades_to_whole_chunk() {
        let mut chunk = vec![0u8; 4];
        BigEndian::write_u32(&mut chunk, (MAX_UNIT_LEN + 1) as u32);
        chunk.extend_from_slice(&[1, 2, 3]);
        let units: Vec<_> = split_units(&chunk).collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload.len(), chunk.len());
    }

    #[test]
    fn truncated_second_unit_discards_remainder() {
        let mut chunk = frame(&[0x41, 1, 2]);
        // Claim 100 bytes but provide 2.
        let mut bad = vec![0u8; 4];
        BigEndian::write_u32(&mut bad, 100);
        bad.extend_from_slice(&[7, 7]);
        chunk.extend(bad);

        let mut iter = split_units(&chunk);
        let units: Vec<_> = iter.by_ref().collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].payload, &[0x41, 1, 2]);
        assert_eq!(iter.emitted() + iter.discarded(), chunk.len());
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        assert_eq!(split_units(&[]).count(), 0);
    }

    #[test]
    fn accounting_invariant_over_random_chunks() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let len: usize = rng.random_range(0..512);
            let chunk: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let mut iter = split_units(&chunk);
            let units: Vec<_> = iter.by_ref().collect();
            assert_eq!(
                iter.emitted() + iter.discarded(),
                chunk.len(),
                "accounting must cover every input byte"
            );
            for u in &units {
                assert!(u.payload.len() <= MAX_UNIT_LEN || u.payload.len() == chunk.len());
            }
        }
    }

    #[test]
    fn demuxer_counts_fallbacks() {
        let mut d = Demuxer::new();
        let good = frame(&[0x65, 0, 0]);
        let bad = vec![0xffu8; 32];
        d.push_chunk(&good);
        d.push_chunk(&bad);
        let stats = d.stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.units, 2);
        assert_eq!(stats.fallback_chunks, 1);
        assert_eq!(stats.bytes_in, stats.bytes_emitted + stats.bytes_discarded);
    }
}
