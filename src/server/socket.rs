//! WebSocket bridge between axum and a [`SessionController`].

use crate::defaults::{CHANNEL_CAPACITY, NORMAL_CLOSE_CODE};
use crate::session::{Inbound, Outbound, SessionContext, SessionController, SessionKind};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Map a received WebSocket message to a controller frame.
///
/// Ping and pong are handled by axum and yield `None`.
pub fn inbound_from_message(message: Message) -> Option<Inbound> {
    match message {
        Message::Text(text) => Some(Inbound::Text(text.as_str().to_string())),
        Message::Binary(bytes) => Some(Inbound::Binary(bytes.to_vec())),
        Message::Close(_) => Some(Inbound::Closed),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

/// Map a controller frame to a WebSocket message.
pub fn message_from_outbound(frame: Outbound) -> Option<Message> {
    match frame {
        Outbound::Message(message) => match message.to_json() {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                warn!(error = %e, "failed to encode server message");
                None
            }
        },
        Outbound::Close { code, reason } => Some(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }))),
    }
}

/// Serve one upgraded connection until the session is finalized.
pub async fn serve_socket(socket: WebSocket, ctx: SessionContext, kind: SessionKind) {
    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);

    let controller = SessionController::new(ctx, kind);
    let session_id = controller.session_id().to_string();

    let reader = tokio::spawn(async move {
        while let Some(received) = stream.next().await {
            let frame = match received {
                Ok(message) => match inbound_from_message(message) {
                    Some(frame) => frame,
                    None => continue,
                },
                Err(e) => Inbound::Error(e.to_string()),
            };
            let last = matches!(frame, Inbound::Closed | Inbound::Error(_));
            if inbound_tx.send(frame).await.is_err() || last {
                return;
            }
        }
        // Stream ended without a close frame
        if inbound_tx.send(Inbound::Closed).await.is_err() {
            debug!("controller stopped reading");
        }
    });

    let writer = tokio::spawn(async move {
        let mut closed = false;
        while let Some(frame) = outbound_rx.recv().await {
            let is_close = matches!(frame, Outbound::Close { .. });
            let Some(message) = message_from_outbound(frame) else {
                continue;
            };
            if sink.send(message).await.is_err() {
                return;
            }
            if is_close {
                closed = true;
                break;
            }
        }
        if !closed {
            let close = Message::Close(Some(CloseFrame {
                code: NORMAL_CLOSE_CODE,
                reason: "".into(),
            }));
            if sink.send(close).await.is_err() {
                debug!("peer already gone");
            }
        }
    });

    let report = controller.run(inbound_rx, outbound_tx).await;
    reader.abort();
    if let Err(e) = writer.await {
        warn!(session_id = %session_id, error = %e, "socket writer failed");
    }
    debug!(session_id = %session_id, report = ?report, "connection finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionAnalysis;
    use crate::session::ServerMessage;
    use crate::streaming::AnalysisResult;

    #[test]
    fn inbound_mapping() {
        assert_eq!(
            inbound_from_message(Message::Text("hi".into())),
            Some(Inbound::Text("hi".into()))
        );
        assert_eq!(
            inbound_from_message(Message::Binary(vec![1u8, 2, 3].into())),
            Some(Inbound::Binary(vec![1, 2, 3]))
        );
        assert_eq!(inbound_from_message(Message::Close(None)), Some(Inbound::Closed));
        assert_eq!(inbound_from_message(Message::Ping(Vec::new().into())), None);
    }

    #[test]
    fn result_becomes_text_frame() {
        let frame = Outbound::Message(ServerMessage::EmotionAnalysis(AnalysisResult {
            sequence: 0,
            transcript: "hello".into(),
            emotion: EmotionAnalysis::neutral(),
            is_same: Some(true),
            similarity: Some(0.9),
        }));
        let Some(Message::Text(text)) = message_from_outbound(frame) else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["event"], "emotion_analysis");
        assert_eq!(json["is_same"], true);
    }

    #[test]
    fn close_carries_code_and_reason() {
        let frame = Outbound::Close {
            code: 1008,
            reason: "Unknown event: x".into(),
        };
        let Some(Message::Close(Some(close))) = message_from_outbound(frame) else {
            panic!("expected a close frame");
        };
        assert_eq!(close.code, 1008);
        assert_eq!(close.reason.as_str(), "Unknown event: x");
    }
}
