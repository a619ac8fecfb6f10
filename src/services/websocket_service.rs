use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::Serialize;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        envelope::Envelope,
        ws::{InboundFrame, ReplyFrame},
    },
    error::ServiceError,
    services::intent_service,
    state::{ConnectionId, Outbound, SharedState},
};

/// Handle the full lifecycle of one client WebSocket connection.
///
/// Frames are answered one at a time, in arrival order.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (sender, mut receiver) = socket.split();
    let outbound_rx = state.hub().register(connection_id);
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps events flowing even while we await inbound frames.
    let mut writer_task = tokio::spawn(run_writer(sender, outbound_rx, control_rx));
    info!(connection_id = %connection_id, "client connected");

    intent_service::on_connect(&state, connection_id).await;

    let mut writer_done = false;
    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = &mut writer_task => {
                writer_done = true;
                break;
            }
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                handle_text(&state, connection_id, text.as_str()).await;
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = control_tx.send(Message::Pong(payload));
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(connection_id = %connection_id, "client sent close frame");
                let _ = control_tx.send(Message::Close(frame));
                break;
            }
            Some(Ok(Message::Binary(_))) => {
                debug!(connection_id = %connection_id, "ignoring binary frame");
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Err(err)) => {
                warn!(connection_id = %connection_id, error = %err, "websocket receive error");
                break;
            }
            None => break,
        }
    }

    state.hub().unregister(connection_id);
    intent_service::on_disconnect(&state, connection_id).await;
    info!(connection_id = %connection_id, "client disconnected");

    if !writer_done {
        finalize(writer_task, control_tx).await;
    }
}

async fn handle_text(state: &SharedState, connection_id: ConnectionId, text: &str) {
    let reply = match InboundFrame::from_json_str(text) {
        Ok(frame) => intent_service::handle_frame(state, connection_id, frame).await,
        Err(err) => {
            warn!(connection_id = %connection_id, error = %err, "failed to parse inbound frame");
            ReplyFrame {
                request_id: None,
                intent: String::new(),
                envelope: Envelope::failure(
                    ServiceError::InvalidInput(format!("malformed frame: {err}")).to_body(),
                ),
            }
        }
    };

    if !state.hub().send_to_one(connection_id, Outbound::Reply(reply)) {
        debug!(connection_id = %connection_id, "connection closed before reply was queued");
    }
}

async fn run_writer(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: UnboundedReceiver<Outbound>,
    mut control_rx: UnboundedReceiver<Message>,
) {
    loop {
        let message = tokio::select! {
            Some(control) = control_rx.recv() => Some(control),
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Event(frame)) => encode(&frame),
                Some(Outbound::Reply(frame)) => encode(&frame),
                Some(Outbound::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
        };
        let Some(message) = message else {
            continue;
        };

        let closing = matches!(message, Message::Close(_));
        if sender.send(message).await.is_err() || closing {
            break;
        }
    }
}

fn encode<T: Serialize>(frame: &T) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound frame");
            None
        }
    }
}

async fn finalize(writer_task: JoinHandle<()>, control_tx: UnboundedSender<Message>) {
    drop(control_tx);
    let _ = writer_task.await;
}
