//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Services und Zustands-Manager, die sicher zwischen
//! tokio-Tasks geteilt werden koennen.

use callrelay_observability::RelayMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::dispatcher::ActionDispatcher;
use crate::gateway::{VerbindungsRegister, SEND_QUEUE_GROESSE};
use crate::presence::PresenceManager;
use crate::session::CallSessionManager;

/// Konfiguration fuer die WebSocket-Seite des Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige Verbindungen
    pub max_clients: usize,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Groesse der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Maximale Groesse eines eingehenden Frames in Bytes
    pub max_frame_bytes: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 10_000,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            send_queue_groesse: SEND_QUEUE_GROESSE,
            max_frame_bytes: 128 * 1024,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    pub dispatcher: ActionDispatcher,
    pub presence: PresenceManager,
    pub register: VerbindungsRegister,
    pub metriken: RelayMetrics,
    /// Shutdown-Signal fuer alle Verbindungs-Tasks
    pub shutdown_rx: watch::Receiver<bool>,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    ///
    /// `register` muss dasselbe Register sein, ueber das der Broadcaster zustellt.
    pub fn neu(
        config: SignalingConfig,
        manager: Arc<CallSessionManager>,
        register: VerbindungsRegister,
        presence: PresenceManager,
        metriken: RelayMetrics,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let dispatcher = ActionDispatcher::neu(manager, presence.clone(), metriken.clone());
        Arc::new(Self {
            config: Arc::new(config),
            dispatcher,
            presence,
            register,
            metriken,
            shutdown_rx,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
