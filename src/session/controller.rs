//! Session state machine.
//!
//! ```text
//! AwaitingSetup ──▶ Streaming ──▶ Finalizing ──▶ Closed
//!       │               │              ▲
//!       │               └──▶ Error ────┘
//!       └──(rejected, 1008)──────────────────────▶ Closed
//! ```

use crate::defaults::{CHANNEL_CAPACITY, SETUP_REJECTED_CLOSE_CODE};
use crate::error::SetupError;
use crate::finalize::{FinalizeOutcome, FinalizeRequest};
use crate::session::SessionContext;
use crate::session::enrollment::EnrollOutcome;
use crate::session::protocol::{Inbound, Outbound, ServerMessage, SetupMessage};
use crate::session::registry::{SessionKind, SessionState, SessionTicket};
use crate::speaker::cache::Embedding;
use crate::streaming::{AudioChunker, ResultSequencer, SequencerStats};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// What happened during one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub kind: SessionKind,
    pub user_id: Option<String>,
    /// Set when the connection was closed during setup.
    pub rejected: Option<SetupError>,
    /// The stream ended through the `Error` state.
    pub errored: bool,
    pub bytes_received: u64,
    pub chunks_dispatched: u64,
    pub sequencer: SequencerStats,
    pub finalize: Option<FinalizeOutcome>,
    pub enrollment: Option<EnrollOutcome>,
}

impl SessionReport {
    fn new(session_id: &str, kind: SessionKind) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            user_id: None,
            rejected: None,
            errored: false,
            bytes_received: 0,
            chunks_dispatched: 0,
            sequencer: SequencerStats::default(),
            finalize: None,
            enrollment: None,
        }
    }
}

/// Why the receive loop stopped.
#[derive(Debug)]
enum StreamEnd {
    Disconnected,
    TransportError(String),
    UnexpectedText,
}

enum Frame {
    Audio(Vec<u8>),
    End(StreamEnd),
}

fn classify(frame: Option<Inbound>) -> Frame {
    match frame {
        Some(Inbound::Binary(bytes)) => Frame::Audio(bytes),
        Some(Inbound::Text(_)) => Frame::End(StreamEnd::UnexpectedText),
        Some(Inbound::Error(e)) => Frame::End(StreamEnd::TransportError(e)),
        Some(Inbound::Closed) | None => Frame::End(StreamEnd::Disconnected),
    }
}

/// Drives one connection from setup to persistence.
pub struct SessionController {
    ctx: SessionContext,
    kind: SessionKind,
    ticket: SessionTicket,
    state: SessionState,
}

impl SessionController {
    /// Register a new session. It shows up in the registry until `run`
    /// returns.
    pub fn new(ctx: SessionContext, kind: SessionKind) -> Self {
        let ticket = ctx.registry.register(kind);
        Self {
            ctx,
            kind,
            ticket,
            state: SessionState::AwaitingSetup,
        }
    }

    pub fn session_id(&self) -> &str {
        self.ticket.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Returns once finalization has finished. The outbound sender is
    /// dropped on return; the transport closes when its queue drains.
    pub async fn run(
        self,
        inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionReport {
        let span = info_span!("session", session_id = %self.session_id(), kind = ?self.kind);
        self.run_inner(inbound, outbound).instrument(span).await
    }

    async fn run_inner(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionReport {
        let mut report = SessionReport::new(self.session_id(), self.kind);

        let setup = match self.await_setup(&mut inbound).await {
            Ok(Some(setup)) => setup,
            Ok(None) => {
                debug!(session_id = %self.session_id(), "client left before setup");
                self.transition(SessionState::Closed);
                return report;
            }
            Err(e) => {
                warn!(session_id = %self.session_id(), error = %e, "setup rejected");
                let close = Outbound::Close {
                    code: SETUP_REJECTED_CLOSE_CODE,
                    reason: e.to_string(),
                };
                if outbound.send(close).await.is_err() {
                    debug!(session_id = %self.session_id(), "transport gone before close");
                }
                report.rejected = Some(e);
                self.transition(SessionState::Closed);
                return report;
            }
        };

        // parse() guarantees a non-empty id
        let user_id = setup.user_id().unwrap_or_default().to_string();
        self.ticket.set_user(&user_id);
        report.user_id = Some(user_id.clone());

        let ack = ServerMessage::ack(&setup, self.session_id());
        if outbound.send(ack.into()).await.is_err() {
            debug!(session_id = %self.session_id(), "transport gone before ack");
        }
        self.transition(SessionState::Streaming);
        info!(session_id = %self.session_id(), user_id = %user_id, event = setup.event(), "session started");

        match setup {
            SetupMessage::SendConversation { topic, .. } => {
                self.run_conversation(&user_id, topic, inbound, &outbound, &mut report)
                    .await
            }
            SetupMessage::RegisterVoice { .. } => {
                self.run_enrollment(&user_id, inbound, &outbound, &mut report)
                    .await
            }
        }

        self.transition(SessionState::Closed);
        info!(
            session_id = %self.session_id(),
            bytes = report.bytes_received,
            chunks = report.chunks_dispatched,
            delivered = report.sequencer.delivered,
            "session closed"
        );
        report
    }

    async fn await_setup(
        &self,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> Result<Option<SetupMessage>, SetupError> {
        let text = match inbound.recv().await {
            Some(Inbound::Text(text)) => text,
            Some(Inbound::Binary(_)) => return Err(SetupError::BinaryBeforeSetup),
            Some(Inbound::Error(e)) => {
                warn!(session_id = %self.session_id(), error = %e, "transport error before setup");
                return Ok(None);
            }
            Some(Inbound::Closed) | None => return Ok(None),
        };

        let setup = SetupMessage::parse(&text)?;
        let expected = self.kind.setup_event();
        if setup.event() != expected {
            return Err(SetupError::WrongEvent {
                expected,
                got: setup.event(),
            });
        }
        Ok(Some(setup))
    }

    async fn run_conversation(
        &mut self,
        user_id: &str,
        topic: Option<String>,
        mut inbound: mpsc::Receiver<Inbound>,
        outbound: &mpsc::Sender<Outbound>,
        report: &mut SessionReport,
    ) {
        let mut chunker = AudioChunker::from_config(&self.ctx.config.audio);
        let mut session_audio: Vec<u8> = Vec::new();
        // Outer None: not looked up yet
        let mut reference: Option<Option<Embedding>> = None;

        let (outcome_tx, outcome_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();
        let sequencer = tokio::spawn(
            ResultSequencer::new()
                .run(outcome_rx, outbound.clone(), stop_rx)
                .in_current_span(),
        );
        let mut tasks = JoinSet::new();

        let end = loop {
            let bytes = match classify(inbound.recv().await) {
                Frame::Audio(bytes) => bytes,
                Frame::End(end) => break end,
            };
            session_audio.extend_from_slice(&bytes);
            self.ticket.record_bytes(bytes.len());

            let chunks = chunker.push(&bytes);
            if chunks.is_empty() {
                continue;
            }
            if reference.is_none() {
                reference = Some(self.load_reference(user_id).await);
            }
            let chunk_reference = reference.clone().flatten();

            self.ticket.record_chunks(chunks.len());
            report.chunks_dispatched += chunks.len() as u64;
            for chunk in chunks {
                let analyzer = self.ctx.analyzer.clone();
                let outcomes = outcome_tx.clone();
                let reference = chunk_reference.clone();
                tasks.spawn(
                    async move {
                        let sequence = chunk.sequence;
                        let outcome = analyzer.analyze(chunk, reference).await;
                        if outcomes.send((sequence, outcome)).await.is_err() {
                            debug!(seq = sequence, "sequencer stopped, outcome discarded");
                        }
                    }
                    .in_current_span(),
                );
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(session_id = %self.session_id(), error = %e, "chunk task failed");
                }
            }
        };

        report.errored = self.enter_error_if_abnormal(&end);
        self.transition(SessionState::Finalizing);

        // Stop delivery before anything else so nothing reaches the client
        // after this point.
        if stop_tx.send(()).is_err() {
            debug!(session_id = %self.session_id(), "sequencer already stopped");
        }
        drop(outcome_tx);
        tasks.abort_all();
        match sequencer.await {
            Ok(stats) => report.sequencer = stats,
            Err(e) => error!(session_id = %self.session_id(), error = %e, "sequencer task failed"),
        }
        self.close_on_violation(&end, outbound).await;

        report.bytes_received = session_audio.len() as u64;
        if reference.is_none() && !session_audio.is_empty() {
            reference = Some(self.load_reference(user_id).await);
        }
        let request = FinalizeRequest {
            session_id: self.session_id().to_string(),
            user_id: Some(user_id.to_string()),
            topic,
            audio: session_audio,
            reference: reference.flatten(),
        };
        match self.ctx.finalizer.run(request).await {
            Ok(outcome) => {
                info!(session_id = %self.session_id(), outcome = ?outcome, "session finalized");
                report.finalize = Some(outcome);
            }
            Err(e) => {
                error!(session_id = %self.session_id(), error = %e, "finalization failed");
            }
        }
    }

    async fn run_enrollment(
        &mut self,
        user_id: &str,
        mut inbound: mpsc::Receiver<Inbound>,
        outbound: &mpsc::Sender<Outbound>,
        report: &mut SessionReport,
    ) {
        let mut audio: Vec<u8> = Vec::new();
        let end = loop {
            match classify(inbound.recv().await) {
                Frame::Audio(bytes) => {
                    self.ticket.record_bytes(bytes.len());
                    audio.extend_from_slice(&bytes);
                }
                Frame::End(end) => break end,
            }
        };

        report.errored = self.enter_error_if_abnormal(&end);
        self.transition(SessionState::Finalizing);
        self.close_on_violation(&end, outbound).await;

        report.bytes_received = audio.len() as u64;
        match self
            .ctx
            .enrollment
            .enroll(self.session_id(), user_id, audio)
            .await
        {
            Ok(outcome) => {
                info!(session_id = %self.session_id(), outcome = ?outcome, "enrollment finished");
                report.enrollment = Some(outcome);
            }
            Err(e) => {
                error!(session_id = %self.session_id(), error = %e, "enrollment failed");
            }
        }
    }

    /// Reference embedding for the session's user, through the shared cache.
    async fn load_reference(&self, user_id: &str) -> Option<Embedding> {
        if let Some(hit) = self.ctx.embeddings.get(user_id) {
            return Some(hit);
        }

        let store = self.ctx.store.clone();
        let cache = self.ctx.embeddings.clone();
        let user = user_id.to_string();
        let loaded = tokio::task::spawn_blocking(move || {
            cache.get_or_load(&user, || store.voice_embedding_for(&user))
        })
        .await;

        match loaded {
            Ok(Ok(reference)) => {
                debug!(user_id, found = reference.is_some(), "reference embedding looked up");
                reference
            }
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "reference embedding lookup failed");
                None
            }
            Err(e) => {
                error!(user_id, error = %e, "reference embedding task failed");
                None
            }
        }
    }

    /// Returns whether the session went through `Error`.
    fn enter_error_if_abnormal(&mut self, end: &StreamEnd) -> bool {
        match end {
            StreamEnd::Disconnected => {
                debug!(session_id = %self.session_id(), "client disconnected");
                return false;
            }
            StreamEnd::TransportError(e) => {
                warn!(session_id = %self.session_id(), error = %e, "transport error");
            }
            StreamEnd::UnexpectedText => {
                warn!(session_id = %self.session_id(), "text frame after setup");
            }
        }
        self.transition(SessionState::Error);
        true
    }

    async fn close_on_violation(&self, end: &StreamEnd, outbound: &mpsc::Sender<Outbound>) {
        if !matches!(end, StreamEnd::UnexpectedText) {
            return;
        }
        let close = Outbound::Close {
            code: SETUP_REJECTED_CLOSE_CODE,
            reason: "unexpected text frame after setup".to_string(),
        };
        if outbound.send(close).await.is_err() {
            debug!(session_id = %self.session_id(), "transport gone before close");
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.session_id(), from = ?self.state, to = ?next, "session state");
        self.state = next;
        self.ticket.set_state(next);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            debug!(session_id = %self.session_id(), state = ?self.state, "session dropped before close");
        }
    }
}
