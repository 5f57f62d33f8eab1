use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lovechat_types::events::GatewayEvent;

use crate::routes::AppState;

/// Server sends a Ping every 15 seconds; two missed Pongs drop the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Push live snapshots, streak changes and notices to one client until it
/// goes away. The gateway is read-only: writes go through the HTTP routes.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let snapshot_tx = event_tx.clone();
    let notice_tx = event_tx;
    let subscription = state.synchronizer.subscribe(
        move |messages| {
            let _ = snapshot_tx.send(GatewayEvent::Snapshot { messages });
        },
        move |err| {
            let _ = notice_tx.send(GatewayEvent::Notice(err.notice()));
        },
    );

    info!("Gateway client connected ({} store listeners)", state.store.listeners());

    let mut streak_rx = state.streak.watch();
    let initial_streak = *streak_rx.borrow_and_update();
    if send_event(&mut sender, &GatewayEvent::Streak { days: initial_streak }).await.is_err() {
        subscription.cancel();
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                changed = streak_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let days = *streak_rx.borrow_and_update();
                    if send_event(&mut sender, &GatewayEvent::Streak { days }).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("Ignoring client text frame ({} bytes)", text.len());
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    subscription.cancel();
    info!("Gateway client disconnected");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use futures_util::Stream;
    use tokio_tungstenite::tungstenite;
    use tower::ServiceExt;

    use crate::routes::tests::{TestApp, json_request};

    async fn next_event<S>(ws: &mut S) -> GatewayEvent
    where
        S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("gateway went quiet")
                .expect("socket closed")
                .unwrap();
            if let tungstenite::Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn wait_for_listeners(state: &AppState, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.store.listeners() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("listener count never settled");
    }

    async fn serve(test_app: &TestApp) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = test_app.app.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}/gateway")
    }

    #[tokio::test]
    async fn pushes_streak_then_snapshots_and_unsubscribes_on_close() {
        let test_app = TestApp::new().await;
        let baseline = test_app.state.store.listeners();
        let url = serve(&test_app).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        assert!(matches!(next_event(&mut ws).await, GatewayEvent::Streak { days: 0 }));
        match next_event(&mut ws).await {
            GatewayEvent::Snapshot { messages } => assert!(messages.is_empty()),
            other => panic!("expected a snapshot, got {other:?}"),
        }
        assert_eq!(test_app.state.store.listeners(), baseline + 1);

        let res = test_app
            .app
            .clone()
            .oneshot(json_request("/messages", serde_json::json!({ "author": "user2", "text": "miss you" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        // A streak update may arrive first; the snapshot must follow
        let messages = loop {
            if let GatewayEvent::Snapshot { messages } = next_event(&mut ws).await {
                break messages;
            }
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.text(), "miss you");

        ws.close(None).await.unwrap();
        wait_for_listeners(&test_app.state, baseline).await;
    }

    #[tokio::test]
    async fn each_socket_holds_its_own_subscription() {
        let test_app = TestApp::new().await;
        let baseline = test_app.state.store.listeners();
        let url = serve(&test_app).await;

        let (mut first, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
        let (mut second, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        for ws in [&mut first, &mut second] {
            next_event(ws).await;
            next_event(ws).await;
        }
        assert_eq!(test_app.state.store.listeners(), baseline + 2);

        first.close(None).await.unwrap();
        wait_for_listeners(&test_app.state, baseline + 1).await;

        second.close(None).await.unwrap();
        wait_for_listeners(&test_app.state, baseline).await;
    }
}
