//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Eingehende Text-Frames gehen an den `ActionDispatcher`,
//! ausgehende Pushes kommen aus der Send-Queue des `VerbindungsRegister`.
//!
//! ## Lebenszyklus
//! ```text
//! Upgrade -> registrieren -> "Connected!" -> Schleife -> abmelden -> Calls verlassen
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen WebSocket-Ping
//! - Kommt laenger als `verbindungs_timeout_sek` nichts vom Client, wird getrennt

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use callrelay_core::ConnectionId;
use callrelay_protocol::{ErrorCode, ServerAntwort, Willkommen};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::dispatcher::DispatcherContext;
use crate::server_state::SignalingState;

/// WebSocket-Close-Code "Going Away"
const CLOSE_GOING_AWAY: u16 = 1001;

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    connection_id: ConnectionId,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, connection_id: ConnectionId) -> Self {
        Self {
            state,
            connection_id,
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal eingeht.
    pub async fn verarbeiten(self, socket: WebSocket, mut shutdown_rx: watch::Receiver<bool>) {
        let connection_id = self.connection_id.clone();
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        let (mut sink, mut stream) = socket.split();

        // Ausgehende Pushes (Broadcaster -> Register -> Socket)
        let mut ausgang = self.state.register.client_registrieren(connection_id.clone());
        self.state.presence.verbunden(connection_id.clone());
        self.state.metriken.connected_clients.inc();

        let ctx = DispatcherContext {
            connection_id: connection_id.clone(),
        };

        match Willkommen::neu(connection_id.as_str()).zu_json() {
            Ok(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!(connection_id = %connection_id, fehler = %e, "Begruessung fehlgeschlagen");
                }
            }
            Err(e) => tracing::error!(fehler = %e, "Begruessung nicht serialisierbar"),
        }

        let mut letzter_empfang = Instant::now();
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + keepalive_intervall,
            keepalive_intervall,
        );

        loop {
            tokio::select! {
                // Eingehender Frame vom Client
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            letzter_empfang = Instant::now();
                            let antwort = self.state.dispatcher.dispatch_text(&text, &ctx).await;
                            if !antwort_senden(&mut sink, &antwort, &connection_id).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            letzter_empfang = Instant::now();
                            let antwort = ServerAntwort::fehler(
                                "error",
                                ErrorCode::InvalidRequest,
                                "Nur Text-Frames werden unterstuetzt",
                            );
                            if !antwort_senden(&mut sink, &antwort, &connection_id).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            letzter_empfang = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!(connection_id = %connection_id, "Verbindung vom Client getrennt");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                connection_id = %connection_id,
                                fehler = %e,
                                "WebSocket-Lesefehler"
                            );
                            break;
                        }
                    }
                }

                // Ausgehender Push aus dem Register
                Some(payload) = ausgang.recv() => {
                    let text = match String::from_utf8(payload.to_vec()) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(connection_id = %connection_id, fehler = %e, "Push ist kein UTF-8");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(
                            connection_id = %connection_id,
                            fehler = %e,
                            "Push-Senden fehlgeschlagen"
                        );
                        break;
                    }
                }

                // Keepalive-Ping und Timeout-Pruefung
                _ = keepalive.tick() => {
                    if letzter_empfang.elapsed() > timeout_dauer {
                        tracing::warn!(connection_id = %connection_id, "Verbindungs-Timeout");
                        break;
                    }
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        tracing::warn!(
                            connection_id = %connection_id,
                            fehler = %e,
                            "Ping-Senden fehlgeschlagen"
                        );
                        break;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(connection_id = %connection_id, "Shutdown-Signal – Verbindung wird getrennt");
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_GOING_AWAY,
                                reason: "Server wird heruntergefahren".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }

        // Cleanup beim Verbindungsende
        self.state.register.client_entfernen(&connection_id);
        self.state
            .dispatcher
            .verbindung_bereinigen(&connection_id)
            .await;
        self.state.metriken.connected_clients.dec();

        tracing::info!(connection_id = %connection_id, "Verbindungs-Task beendet");
    }
}

/// Serialisiert und sendet eine Antwort; `false` wenn die Verbindung tot ist
async fn antwort_senden<S>(sink: &mut S, antwort: &ServerAntwort, connection_id: &ConnectionId) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match antwort.zu_json() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(connection_id = %connection_id, fehler = %e, "Antwort nicht serialisierbar");
            return true;
        }
    };
    match sink.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                fehler = %e,
                "Senden fehlgeschlagen"
            );
            false
        }
    }
}
