//! In-order delivery of chunk results.
//!
//! Analysis tasks finish in any order and push `(sequence, outcome)` pairs
//! onto a channel. The sequencer buffers them by sequence number and releases
//! results strictly in order, skipping outcomes with nothing to deliver.
//! Head-of-line blocking is bounded because every outcome, including a
//! timeout, eventually arrives.

use crate::streaming::frame::{AnalysisResult, ChunkOutcome};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Counters reported when the sequencer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerStats {
    /// Results sent to the client.
    pub delivered: u64,
    /// Resolved outcomes with nothing to deliver.
    pub skipped: u64,
    /// Outcomes still buffered (or never resolved) when the loop stopped.
    pub discarded: u64,
}

/// Reorders chunk outcomes by sequence number.
#[derive(Debug, Default)]
pub struct ResultSequencer {
    /// Resolved outcomes waiting for earlier sequences.
    pending: BTreeMap<u64, ChunkOutcome>,
    /// Next sequence to emit.
    next_to_emit: u64,
    stats: SequencerStats,
}

impl ResultSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_to_emit(&self) -> u64 {
        self.next_to_emit
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> SequencerStats {
        self.stats
    }

    /// Records a resolved outcome and returns every result now releasable,
    /// in sequence order.
    ///
    /// Outcomes for sequences already emitted or already buffered are ignored.
    pub fn accept(&mut self, sequence: u64, outcome: ChunkOutcome) -> Vec<AnalysisResult> {
        if sequence < self.next_to_emit || self.pending.contains_key(&sequence) {
            warn!(seq = sequence, "duplicate chunk outcome ignored");
            return Vec::new();
        }
        self.pending.insert(sequence, outcome);

        let mut ready = Vec::new();
        while let Some(outcome) = self.pending.remove(&self.next_to_emit) {
            debug!(seq = self.next_to_emit, outcome = outcome.label(), "chunk resolved");
            match outcome.into_payload() {
                Some(result) => {
                    self.stats.delivered += 1;
                    ready.push(result);
                }
                None => self.stats.skipped += 1,
            }
            self.next_to_emit += 1;
        }
        ready
    }

    /// Runs the consumer loop until `stop` fires (or its sender is dropped),
    /// the outcome channel closes, or the output is gone.
    ///
    /// A send blocked on a full output still observes `stop`. Anything still
    /// buffered at that point is discarded; nothing is sent after this
    /// returns.
    pub async fn run<T: From<AnalysisResult>>(
        mut self,
        mut outcomes: mpsc::Receiver<(u64, ChunkOutcome)>,
        output: mpsc::Sender<T>,
        mut stop: oneshot::Receiver<()>,
    ) -> SequencerStats {
        let mut unsent = 0u64;
        'consume: loop {
            tokio::select! {
                biased;
                _ = &mut stop => break 'consume,
                received = outcomes.recv() => {
                    let Some((sequence, outcome)) = received else {
                        break 'consume;
                    };
                    let mut ready = self.accept(sequence, outcome).into_iter();
                    while let Some(result) = ready.next() {
                        let sent = tokio::select! {
                            biased;
                            _ = &mut stop => false,
                            sent = output.send(T::from(result)) => sent.is_ok(),
                        };
                        if !sent {
                            unsent = ready.len() as u64 + 1;
                            break 'consume;
                        }
                    }
                }
            }
        }

        self.stats.delivered -= unsent;
        self.stats.discarded = self.pending.len() as u64 + unsent;
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionAnalysis;

    fn payload(sequence: u64) -> ChunkOutcome {
        ChunkOutcome::Payload(Box::new(AnalysisResult {
            sequence,
            transcript: format!("chunk {}", sequence),
            emotion: EmotionAnalysis::neutral(),
            is_same: None,
            similarity: None,
        }))
    }

    fn sequences(results: &[AnalysisResult]) -> Vec<u64> {
        results.iter().map(|r| r.sequence).collect()
    }

    #[test]
    fn in_order_arrival_is_released_immediately() {
        let mut sequencer = ResultSequencer::new();
        assert_eq!(sequences(&sequencer.accept(0, payload(0))), vec![0]);
        assert_eq!(sequences(&sequencer.accept(1, payload(1))), vec![1]);
        assert_eq!(sequencer.next_to_emit(), 2);
    }

    #[test]
    fn later_results_wait_for_earlier_ones() {
        let mut sequencer = ResultSequencer::new();
        assert!(sequencer.accept(2, payload(2)).is_empty());
        assert!(sequencer.accept(1, payload(1)).is_empty());
        assert_eq!(sequencer.pending(), 2);

        assert_eq!(sequences(&sequencer.accept(0, payload(0))), vec![0, 1, 2]);
        assert_eq!(sequencer.pending(), 0);
    }

    #[test]
    fn undeliverable_outcomes_advance_without_output() {
        let mut sequencer = ResultSequencer::new();
        assert!(sequencer.accept(1, ChunkOutcome::TimedOut).is_empty());
        assert!(sequencer.accept(2, payload(2)).is_empty());
        assert_eq!(sequences(&sequencer.accept(0, ChunkOutcome::NoSpeech)), vec![2]);
        assert_eq!(
            sequencer.stats(),
            SequencerStats {
                delivered: 1,
                skipped: 2,
                discarded: 0
            }
        );
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut sequencer = ResultSequencer::new();
        sequencer.accept(0, payload(0));
        assert!(sequencer.accept(0, payload(0)).is_empty());

        sequencer.accept(2, payload(2));
        assert!(sequencer.accept(2, ChunkOutcome::NoSpeech).is_empty());
        assert_eq!(sequences(&sequencer.accept(1, payload(1))), vec![1, 2]);
    }

    #[test]
    fn any_permutation_is_delivered_in_order() {
        // Small LCG so the permutations are reproducible
        let mut state: u64 = 0x2545_f491;
        for _ in 0..50 {
            let n = 40u64;
            let mut order: Vec<u64> = (0..n).collect();
            for i in (1..order.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                order.swap(i, j);
            }

            let mut sequencer = ResultSequencer::new();
            let mut delivered = Vec::new();
            for seq in order {
                let outcome = if seq % 7 == 3 {
                    ChunkOutcome::TimedOut
                } else {
                    payload(seq)
                };
                delivered.extend(sequences(&sequencer.accept(seq, outcome)));
            }

            let expected: Vec<u64> = (0..n).filter(|s| s % 7 != 3).collect();
            assert_eq!(delivered, expected);
        }
    }

    #[tokio::test]
    async fn run_forwards_in_order_and_reports_stats() {
        let (outcome_tx, outcome_rx) = mpsc::channel(8);
        let (output_tx, mut output_rx) = mpsc::channel::<AnalysisResult>(8);
        let (_stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(ResultSequencer::new().run(outcome_rx, output_tx, stop_rx));

        outcome_tx.send((1, payload(1))).await.unwrap();
        outcome_tx.send((0, ChunkOutcome::NoSpeech)).await.unwrap();
        outcome_tx.send((2, payload(2))).await.unwrap();
        drop(outcome_tx);

        assert_eq!(output_rx.recv().await.unwrap().sequence, 1);
        assert_eq!(output_rx.recv().await.unwrap().sequence, 2);
        assert!(output_rx.recv().await.is_none());

        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn stop_discards_pending_and_sends_nothing_after() {
        let (outcome_tx, outcome_rx) = mpsc::channel(8);
        let (output_tx, mut output_rx) = mpsc::channel::<AnalysisResult>(8);
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(ResultSequencer::new().run(outcome_rx, output_tx, stop_rx));

        // Sequence 0 never resolves, so 1 stays buffered
        outcome_tx.send((1, payload(1))).await.unwrap();
        tokio::task::yield_now().await;
        stop_tx.send(()).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 0);
        assert!(stats.discarded <= 1);
        assert!(output_rx.recv().await.is_none(), "output closed with nothing sent");

        // Late outcomes go nowhere
        assert!(outcome_tx.send((0, payload(0))).await.is_err());
    }

    #[tokio::test]
    async fn stop_interrupts_a_blocked_send() {
        let (outcome_tx, outcome_rx) = mpsc::channel(8);
        // Capacity 1 and nobody reading: the second send blocks
        let (output_tx, mut output_rx) = mpsc::channel::<AnalysisResult>(1);
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(ResultSequencer::new().run(outcome_rx, output_tx, stop_rx));

        outcome_tx.send((1, payload(1))).await.unwrap();
        outcome_tx.send((2, payload(2))).await.unwrap();
        outcome_tx.send((0, payload(0))).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        stop_tx.send(()).unwrap();

        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("sequencer must not hang on a full output")
            .unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.discarded, 2);

        assert_eq!(output_rx.recv().await.unwrap().sequence, 0);
        assert!(output_rx.recv().await.is_none());
    }
}
