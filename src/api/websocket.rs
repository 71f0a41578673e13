//! WebSocket relay for trading events and streaming prices

use crate::market_feed::FeedEvent;
use crate::trading::TradingEvent;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// One outbound frame, tagged by source
#[derive(Debug, Serialize)]
#[serde(tag = "channel", content = "event", rename_all = "lowercase")]
enum Outbound {
    Trading(TradingEvent),
    Feed(FeedEvent),
    Pong,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut trading_rx = state.controller.subscribe();
    let mut feed_rx = state.feed.subscribe_events();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Outbound>(16);

    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if text.trim().eq_ignore_ascii_case("ping") || text.contains("\"ping\"") {
                        if reply_tx.send(Outbound::Pong).await.is_err() {
                            break;
                        }
                    } else {
                        debug!("Ignoring client message: {}", text);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        loop {
            let outbound = tokio::select! {
                event = trading_rx.recv() => match event {
                    Ok(event) => Outbound::Trading(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} trading events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = feed_rx.recv() => match event {
                    Ok(event) => Outbound::Feed(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WebSocket client lagged, skipped {} feed events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(reply) = reply_rx.recv() => reply,
            };

            let text = match serde_json::to_string(&outbound) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode WebSocket frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut receive_task => send_task.abort(),
        _ = &mut send_task => receive_task.abort(),
    }

    info!("WebSocket client disconnected");
}
