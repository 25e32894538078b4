//! Real-time analysis of a live PCM stream.
//!
//! ```text
//! ┌─────────┐   ┌─────────┐   ┌───────────────┐   ┌───────────┐
//! │ client  │──▶│ Chunker │──▶│ ChunkAnalyzer │──▶│ Sequencer │──▶ client
//! │  bytes  │   │         │   │   (× N, pool) │   │ (ordered) │
//! └─────────┘   └─────────┘   └───────────────┘   └───────────┘
//! ```

pub mod analyzer;
pub mod chunker;
pub mod frame;
pub mod sequencer;

pub use analyzer::ChunkAnalyzer;
pub use chunker::AudioChunker;
pub use frame::{AnalysisResult, Chunk, ChunkOutcome};
pub use sequencer::{ResultSequencer, SequencerStats};
