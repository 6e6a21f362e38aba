//! `WebSocket` push channel.
//!
//! Displays connect to `GET /ws?role=<role>`. The first frame is always a
//! `resync` bundle; after that the connection receives every
//! [`RaceEvent`](raceway_types::RaceEvent) in publish order and may send
//! [`ClientCommand`]s. Each command gets exactly one `command-ok` or
//! `command-rejected` reply.
//!
//! A connection that falls more than the broadcast capacity behind is
//! closed rather than skipped ahead. The display reconnects and resyncs.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use raceway_core::runner::ControlHandle;
use raceway_types::{ClientCommand, ControlFrame, RejectionKind, ServerFrame, SubscriberRole};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::rejection_kind;
use crate::state::AppState;

/// Query parameters for `GET /ws`.
#[derive(Debug, serde::Deserialize)]
pub struct ConnectQuery {
    /// Display role. Defaults to `spectator`.
    #[serde(default)]
    pub role: SubscriberRole,
}

/// Upgrade an HTTP request to a push-channel connection.
///
/// # Route
///
/// `GET /ws?role=<observer|controller|spectator|driver-display>`
pub async fn ws_connect(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let control = state.control.clone();
    ws.on_upgrade(move |socket| handle_ws(socket, control, query.role))
}

async fn handle_ws(mut socket: WebSocket, control: ControlHandle, role: SubscriberRole) {
    let (bundle, mut rx) = match control.subscribe(role).await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Refusing push-channel connection");
            let _ = socket
                .send(close(close_code::AGAIN, "race control unavailable"))
                .await;
            return;
        }
    };
    info!(?role, "Push-channel client connected");

    if !send_frame(&mut socket, &ControlFrame::Resync(bundle).into()).await {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_frame(&mut socket, &ServerFrame::Event(event)).await {
                            debug!("Push-channel client disconnected (send failed)");
                            return;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(?role, missed, "Push-channel client lagged, disconnecting");
                        let _ = socket
                            .send(close(close_code::AGAIN, "lagged behind, reconnect to resync"))
                            .await;
                        return;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed, shutting down push channel");
                        let _ = socket.send(close(close_code::AWAY, "race control stopped")).await;
                        return;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_command(&control, role, text.as_str()).await;
                        if !send_frame(&mut socket, &reply.into()).await {
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("Push-channel client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(?role, "Push-channel client disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Parse a client frame and check the connection's role may issue it.
///
/// Returns the `command-rejected` frame to send back when it may not.
pub fn parse_command(role: SubscriberRole, text: &str) -> Result<ClientCommand, ControlFrame> {
    let command: ClientCommand =
        serde_json::from_str(text).map_err(|e| ControlFrame::CommandRejected {
            command: String::from("unknown"),
            kind: RejectionKind::Malformed,
            reason: e.to_string(),
        })?;

    if command.requires_control() && !role.can_control() {
        return Err(ControlFrame::CommandRejected {
            command: command.name().to_owned(),
            kind: RejectionKind::Forbidden,
            reason: format!("role {role:?} may not issue {}", command.name()),
        });
    }
    Ok(command)
}

/// Apply a command through the control loop and build its reply frame.
pub async fn execute(control: &ControlHandle, command: ClientCommand) -> ControlFrame {
    let name = command.name();
    let result = match command {
        ClientCommand::Start => control.start().await.map(drop),
        ClientCommand::SetMode { mode } => control.set_mode(mode).await.map(drop),
        ClientCommand::End => control.end().await.map(drop),
        ClientCommand::RecordLap {
            car_number,
            timestamp,
        } => control.record_lap(car_number, timestamp).await.map(drop),
    };

    match result {
        Ok(()) => ControlFrame::CommandOk {
            command: name.to_owned(),
        },
        Err(e) => {
            debug!(command = name, error = %e, "Command rejected");
            ControlFrame::CommandRejected {
                command: name.to_owned(),
                kind: rejection_kind(&e),
                reason: e.to_string(),
            }
        }
    }
}

async fn handle_command(control: &ControlHandle, role: SubscriberRole, text: &str) -> ControlFrame {
    match parse_command(role, text) {
        Ok(command) => execute(control, command).await,
        Err(rejected) => {
            debug!(?role, "Command refused before reaching race control");
            rejected
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize push-channel frame: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use raceway_core::broadcast::Broadcaster;
    use raceway_core::control::RaceControl;
    use raceway_core::queue::RaceQueue;
    use raceway_core::runner::spawn_control_loop;
    use raceway_core::sink::NoOpSink;
    use raceway_types::{DriverAssignment, SafetyMode};

    use super::*;

    fn control() -> ControlHandle {
        let control = RaceControl::new(
            RaceQueue::new(),
            600,
            Broadcaster::new(16),
            Box::new(NoOpSink),
        );
        spawn_control_loop(control, Duration::from_secs(1)).0
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let Err(ControlFrame::CommandRejected { command, kind, .. }) =
            parse_command(SubscriberRole::Controller, "{\"type\":\"launch\"}")
        else {
            panic!("expected a rejection");
        };
        assert_eq!(command, "unknown");
        assert_eq!(kind, RejectionKind::Malformed);
    }

    #[test]
    fn only_controllers_may_start() {
        let start = r#"{"type":"start"}"#;
        assert_eq!(
            parse_command(SubscriberRole::Controller, start),
            Ok(ClientCommand::Start)
        );
        for role in [
            SubscriberRole::Observer,
            SubscriberRole::Spectator,
            SubscriberRole::DriverDisplay,
        ] {
            assert!(matches!(
                parse_command(role, start),
                Err(ControlFrame::CommandRejected {
                    kind: RejectionKind::Forbidden,
                    ..
                })
            ));
        }
    }

    #[test]
    fn any_role_may_record_laps() {
        let lap = r#"{"type":"record-lap","car_number":2}"#;
        assert!(parse_command(SubscriberRole::Observer, lap).is_ok());
        assert!(parse_command(SubscriberRole::Spectator, lap).is_ok());
    }

    #[tokio::test]
    async fn execute_reports_rejections_with_kind() {
        let control = control();
        let frame = execute(&control, ClientCommand::Start).await;
        assert!(matches!(
            frame,
            ControlFrame::CommandRejected {
                kind: RejectionKind::NoQueuedRace,
                ..
            }
        ));

        let frame = execute(
            &control,
            ClientCommand::RecordLap {
                car_number: 1,
                timestamp: None,
            },
        )
        .await;
        assert!(matches!(
            frame,
            ControlFrame::CommandRejected {
                kind: RejectionKind::NotRunning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn execute_applies_commands() {
        let control = control();
        control
            .enqueue(
                "Heat 1".to_owned(),
                vec![DriverAssignment::new("Alice", 1)],
            )
            .await
            .unwrap();

        let frame = execute(&control, ClientCommand::Start).await;
        assert_eq!(
            frame,
            ControlFrame::CommandOk {
                command: "start".to_owned()
            }
        );

        let frame = execute(
            &control,
            ClientCommand::SetMode {
                mode: SafetyMode::Hazard,
            },
        )
        .await;
        assert!(matches!(frame, ControlFrame::CommandOk { .. }));
        assert_eq!(
            control.session().await.unwrap().status.mode,
            SafetyMode::Hazard
        );
    }

    #[tokio::test]
    async fn execute_on_stopped_loop_is_unavailable() {
        let control = control();
        control.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let frame = execute(&control, ClientCommand::End).await;
        assert!(matches!(
            frame,
            ControlFrame::CommandRejected {
                kind: RejectionKind::Unavailable,
                ..
            }
        ));
    }

    #[test]
    fn role_defaults_to_spectator() {
        let query: ConnectQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.role, SubscriberRole::Spectator);
    }
}
