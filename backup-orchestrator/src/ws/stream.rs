use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::log_broadcast::{ChannelSink, LogBroadcaster};

/// Streams one job's log lines to a WebSocket client until the job completes
/// or the client goes away. Mount it wherever the host application routes.
pub async fn log_stream_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(broadcaster): State<LogBroadcaster>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_job_logs(socket, broadcaster, job_id))
}

async fn stream_job_logs(socket: WebSocket, broadcaster: LogBroadcaster, job_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut lines) = ChannelSink::channel();
    let subscription = broadcaster.subscribe(&job_id, Arc::new(sink));

    // Forward log lines; the channel closes on `complete`.
    let mut send_task = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            if sender.send(Message::Text(line.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Clients only ever close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    broadcaster.unsubscribe(&job_id, subscription);
    tracing::debug!(job_id = %job_id, "Log stream socket closed");
}
