//! Fixed-size chunking of the inbound PCM stream.
//!
//! Bytes are appended as they arrive; whenever a full chunk's worth is
//! buffered it is cut from the front and tagged with the next sequence
//! number. Trailing bytes shorter than a chunk are never emitted here; they
//! only reach finalization through the full-session buffer.

use crate::config::AudioConfig;
use crate::streaming::frame::Chunk;

/// Slices an accumulating byte stream into [`Chunk`]s.
#[derive(Debug)]
pub struct AudioChunker {
    chunk_size: usize,
    /// Bytes not yet emitted.
    buffer: Vec<u8>,
    /// Next chunk sequence to assign.
    next_sequence: u64,
}

impl AudioChunker {
    /// Creates a chunker emitting chunks of exactly `chunk_size` bytes.
    ///
    /// A zero size is bumped to one byte so the chunker always makes progress.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            buffer: Vec::with_capacity(chunk_size),
            next_sequence: 0,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.chunk_size_bytes())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes waiting for the next full chunk.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Number of chunks emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_sequence
    }

    /// Appends bytes and returns every chunk that is now complete, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Chunk> {
        self.buffer.extend_from_slice(bytes);

        let ready = self.buffer.len() / self.chunk_size;
        if ready == 0 {
            return Vec::new();
        }

        let mut chunks = Vec::with_capacity(ready);
        let mut rest = self.buffer.split_off(ready * self.chunk_size);
        std::mem::swap(&mut rest, &mut self.buffer);
        // `rest` now holds the complete chunks, front first
        for slice in rest.chunks_exact(self.chunk_size) {
            chunks.push(Chunk::new(self.next_sequence, slice.to_vec()));
            self.next_sequence += 1;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(range: std::ops::Range<u32>) -> Vec<u8> {
        range.map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn no_chunk_until_full() {
        let mut chunker = AudioChunker::new(100);
        assert!(chunker.push(&[0u8; 99]).is_empty());
        assert_eq!(chunker.pending_bytes(), 99);

        let chunks = chunker.push(&[0u8; 1]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunker.pending_bytes(), 0);
    }

    #[test]
    fn large_push_emits_several_chunks_and_keeps_remainder() {
        let mut chunker = AudioChunker::new(100);
        let chunks = chunker.push(&bytes(0..350));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunker.pending_bytes(), 50);
        assert!(chunks.iter().all(|c| c.len() == 100));
    }

    #[test]
    fn sequences_are_contiguous_from_zero() {
        let mut chunker = AudioChunker::new(64);
        let mut sequences = Vec::new();
        // Irregular frame sizes, as a real client would send
        for size in [10usize, 200, 1, 63, 64, 129, 7, 300] {
            for chunk in chunker.push(&vec![0u8; size]) {
                sequences.push(chunk.sequence);
            }
        }
        let expected: Vec<u64> = (0..sequences.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert_eq!(chunker.emitted(), sequences.len() as u64);
    }

    #[test]
    fn byte_order_is_preserved_across_pushes() {
        let input = bytes(0..1000);
        let mut chunker = AudioChunker::new(128);
        let mut out = Vec::new();
        for piece in input.chunks(37) {
            for chunk in chunker.push(piece) {
                out.extend_from_slice(&chunk.bytes);
            }
        }
        // 7 full chunks, 104 bytes left over
        assert_eq!(out.len(), 7 * 128);
        assert_eq!(out, input[..out.len()]);
        assert_eq!(chunker.pending_bytes(), 1000 - 7 * 128);
    }

    #[test]
    fn default_config_uses_64000_byte_chunks() {
        let chunker = AudioChunker::from_config(&AudioConfig::default());
        assert_eq!(chunker.chunk_size(), 64_000);
    }

    #[test]
    fn zero_size_is_clamped() {
        let mut chunker = AudioChunker::new(0);
        assert_eq!(chunker.push(&[1, 2]).len(), 2);
    }
}
