//! Streaming recognition over WebSocket.
//!
//! One frame in flight per connection: the next message is not read until the
//! result for the current one has been sent. Per-frame failures come back as
//! error-shaped results and never close the connection.

use crate::api::{decode_frame, AppState, ImageRequest};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use rollcall_core::FrameResult;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn ws_recognize(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    serve_stream(state, sender, receiver).await;
}

/// Receive → process → send until the peer goes away.
pub async fn serve_stream<S, R, E>(state: Arc<AppState>, mut sink: S, mut stream: R)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let conn = Uuid::new_v4();
    info!(%conn, "stream connected");
    let mut frames: u64 = 0;

    while let Some(message) = stream.next().await {
        let result = match message {
            Ok(Message::Text(text)) => process_message(&state, text.as_str()).await,
            Ok(Message::Binary(_)) => FrameResult::failure("expected a JSON text message"),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(%conn, error = %e, "stream receive failed");
                break;
            }
        };
        frames += 1;

        let body = match serde_json::to_string(&result) {
            Ok(body) => body,
            Err(e) => {
                warn!(%conn, error = %e, "failed to encode frame result");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(body.into())).await {
            warn!(%conn, error = %e, "stream send failed");
            break;
        }
    }

    info!(%conn, frames, "stream disconnected");
}

async fn process_message(state: &AppState, text: &str) -> FrameResult {
    let request: ImageRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => return FrameResult::failure(format!("invalid message: {e}")),
    };
    let Some(image) = request.image.filter(|s| !s.trim().is_empty()) else {
        return FrameResult::empty(0);
    };

    let session = state.roster.snapshot();
    if !session.active {
        return FrameResult::no_session();
    }

    let frame = match decode_frame(image).await {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "frame rejected");
            return FrameResult::failure(e.to_string());
        }
    };

    match state.engine.recognize(frame, session).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "frame processing failed");
            FrameResult::failure(e.to_string())
        }
    }
}
