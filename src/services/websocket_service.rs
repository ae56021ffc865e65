//! Player WebSocket lifecycle: identification, the inbound/outbound pumps,
//! dispatch into the session coordinator, and change-set broadcasts.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        game::GameDelta,
        validation::validate_player_id,
        ws::{ClientFrame, ServerFrame},
    },
    error::ServiceError,
    services::session::{self, SessionUpdate},
    state::{PlayerConnection, SharedState},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle for an individual player WebSocket connection.
///
/// The socket is split into two independent pumps: a writer task draining the
/// per-connection queue, and this handler reading inbound frames. When either
/// pump stops, the connection is unregistered exactly once (guarded by the
/// socket id) and the writer is wound down.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let player_id = match ClientFrame::from_json_str(&initial_message) {
        Ok(ClientFrame::Identification { id }) if validate_player_id(&id).is_ok() => id,
        Ok(ClientFrame::Identification { id }) => {
            warn!(id = %id, "rejecting malformed player identity");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(_) => {
            warn!("first frame was not identification");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse identification frame");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let socket_id = Uuid::new_v4();
    state.register_player(PlayerConnection {
        player_id: player_id.clone(),
        socket_id,
        tx: outbound_tx.clone(),
    });
    info!(id = %player_id, "player connected");

    send_frame(
        &outbound_tx,
        &ServerFrame::Connected {
            id: player_id.clone(),
        },
    );

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientFrame::from_json_str(&text) {
                Ok(frame) => handle_frame(&state, &player_id, frame, &outbound_tx).await,
                Err(err) => {
                    warn!(id = %player_id, error = %err, "failed to parse client frame");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(id = %player_id, "player closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(id = %player_id, error = %err, "websocket error");
                break;
            }
        }
    }

    if state.unregister_player(&player_id, socket_id) {
        info!(id = %player_id, "player disconnected");
    }

    finalize(writer_task, outbound_tx).await;
}

/// Route one inbound frame into the session coordinator and deliver the
/// response: successes fan out to both participants, rejections go back to
/// the acting socket only.
async fn handle_frame(
    state: &SharedState,
    player_id: &str,
    frame: ClientFrame,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) {
    let (game_id, result) = match frame {
        ClientFrame::Move { game_id, notation } => (
            Some(game_id),
            session::apply_move(state, game_id, player_id, &notation)
                .await
                .map(Some),
        ),
        ClientFrame::OfferDraw { game_id } => (
            Some(game_id),
            session::offer_draw(state, game_id, player_id).await.map(Some),
        ),
        ClientFrame::DrawResponse { game_id, accept } => (
            Some(game_id),
            session::respond_draw(state, game_id, player_id, accept)
                .await
                .map(Some),
        ),
        ClientFrame::Resign { game_id } => (
            Some(game_id),
            session::resign(state, game_id, player_id).await.map(Some),
        ),
        ClientFrame::Identification { .. } => {
            warn!(id = %player_id, "ignoring duplicate identification frame");
            (None, Ok(None))
        }
        ClientFrame::Unknown => (
            None,
            Err(ServiceError::InvalidInput(
                "unsupported frame type".into(),
            )),
        ),
    };

    match result {
        Ok(Some(update)) => broadcast_update(state, &update),
        Ok(None) => {}
        Err(err) => {
            warn!(id = %player_id, code = err.code(), error = %err, "client action rejected");
            send_frame(
                outbound_tx,
                &ServerFrame::Rejection {
                    game_id,
                    code: err.code().to_owned(),
                    message: err.to_string(),
                    resync: err.requires_resync(),
                },
            );
        }
    }
}

/// Fan a change set out to the game's participants.
///
/// Enqueueing is non-blocking per connection; a participant without a live
/// socket is simply skipped and will resynchronize over REST on reconnect.
pub fn broadcast_update(state: &SharedState, update: &SessionUpdate) {
    let frame = ServerFrame::GameUpdate(GameDelta::from(update));
    for player_id in [update.white_id.as_str(), update.black_id.as_str()] {
        let Some(connection) = state.players().get(player_id) else {
            continue;
        };
        let socket_id = connection.socket_id;
        let tx = connection.tx.clone();
        drop(connection);
        if !send_frame(&tx, &frame) {
            // The writer is gone; drop the stale entry now rather than
            // waiting for the reader pump to notice the dead socket.
            warn!(id = %player_id, "send failed (writer closed), removing player connection");
            state
                .players()
                .remove_if(player_id, |_, existing| existing.socket_id == socket_id);
        }
    }
}

/// Serialize a frame and push it onto a connection's outbound queue.
///
/// Returns `false` when the queue is closed, meaning the writer task already
/// stopped. A serialization failure is permanent, logged, and reported as
/// delivered since retrying cannot help.
fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) -> bool {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize server frame `{frame:?}`");
            return true;
        }
    };

    tx.send(Message::Text(payload.into())).is_ok()
}

/// Ensure the writer task winds down before we return from the socket
/// handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::game_store::{GameStore, memory::MemoryGameStore},
        dao::models::GameEntity,
        services::{session::unix_millis_now, timer::TimerManager},
        state::AppState,
    };

    fn sample_game(id: Uuid) -> GameEntity {
        GameEntity {
            id,
            white_id: "alice".into(),
            black_id: "bob".into(),
            base_time_ms: 60_000,
            increment_ms: 0,
            white_time_ms: 60_000,
            black_time_ms: 60_000,
            turn_started_at_ms: unix_millis_now(),
            moves: Vec::new(),
            history: String::new(),
            result: None,
            method: None,
            white_draw_offered: false,
            black_draw_offered: false,
            version: 1,
            created_at: std::time::SystemTime::now(),
        }
    }

    fn register(state: &SharedState, player_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.register_player(PlayerConnection {
            player_id: player_id.into(),
            socket_id: Uuid::new_v4(),
            tx,
        });
        rx
    }

    fn received_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> String {
        match rx.try_recv().unwrap() {
            Message::Text(text) => text.to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepted_moves_are_broadcast_to_both_participants() {
        let game_id = Uuid::new_v4();
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        let store = MemoryGameStore::new();
        store.insert_game(sample_game(game_id)).await.unwrap();
        state.set_game_store(Arc::new(store)).await;

        let mut alice_rx = register(&state, "alice");
        let mut bob_rx = register(&state, "bob");
        let (own_tx, mut own_rx) = mpsc::unbounded_channel();

        handle_frame(
            &state,
            "alice",
            ClientFrame::Move {
                game_id,
                notation: "e2e4".into(),
            },
            &own_tx,
        )
        .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let text = received_text(rx);
            assert!(text.contains(r#""type":"game_update""#));
            assert!(text.contains(r#""version":2"#));
            assert!(text.contains("e2e4"));
        }
        // No rejection went back to the acting socket.
        assert!(own_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejections_reach_only_the_acting_socket() {
        let game_id = Uuid::new_v4();
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        let store = MemoryGameStore::new();
        store.insert_game(sample_game(game_id)).await.unwrap();
        state.set_game_store(Arc::new(store)).await;

        let mut bob_rx = register(&state, "bob");
        let (own_tx, mut own_rx) = mpsc::unbounded_channel();

        // Bob is not on the move.
        handle_frame(
            &state,
            "bob",
            ClientFrame::Move {
                game_id,
                notation: "e7e5".into(),
            },
            &own_tx,
        )
        .await;

        let text = received_text(&mut own_rx);
        assert!(text.contains(r#""type":"rejection""#));
        assert!(text.contains(r#""code":"invalid_player""#));
        assert!(text.contains(r#""resync":false"#));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_evicts_connections_with_dead_writers() {
        let game_id = Uuid::new_v4();
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        let store = MemoryGameStore::new();
        store.insert_game(sample_game(game_id)).await.unwrap();
        state.set_game_store(Arc::new(store)).await;

        let mut alice_rx = register(&state, "alice");
        let bob_rx = register(&state, "bob");
        drop(bob_rx);

        let update = session::apply_move(&state, game_id, "alice", "e2e4")
            .await
            .unwrap();
        broadcast_update(&state, &update);

        assert!(received_text(&mut alice_rx).contains("game_update"));
        assert!(!state.players().contains_key("bob"));
        assert!(state.players().contains_key("alice"));
    }

    #[tokio::test]
    async fn broadcast_skips_absent_participants() {
        let game_id = Uuid::new_v4();
        let (timers, _expiries) = TimerManager::new();
        let state = AppState::new(timers);
        let store = MemoryGameStore::new();
        store.insert_game(sample_game(game_id)).await.unwrap();
        state.set_game_store(Arc::new(store)).await;

        // Only alice is connected; the broadcast must still go through.
        let mut alice_rx = register(&state, "alice");
        let update = session::apply_move(&state, game_id, "alice", "e2e4")
            .await
            .unwrap();
        broadcast_update(&state, &update);

        assert!(received_text(&mut alice_rx).contains("game_update"));
    }
}
