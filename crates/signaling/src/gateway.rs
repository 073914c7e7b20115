//! Connection-Gateway – Zustellung an adressierbare Live-Verbindungen
//!
//! Der Relay sendet nie direkt auf einen Socket. Alle Pushes laufen ueber
//! den `ConnectionGateway`-Trait, damit Broadcaster und Feed-Verarbeitung
//! unabhaengig vom Transport getestet werden koennen.
//!
//! Die Referenz-Implementierung `VerbindungsRegister` haelt pro WebSocket
//! eine begrenzte Send-Queue. Der Verbindungs-Task liest aus der Queue und
//! schreibt auf den Socket.

use async_trait::async_trait;
use bytes::Bytes;
use callrelay_core::ConnectionId;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standardgroesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Fehler bei der Zustellung an eine einzelne Verbindung
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Verbindung existiert nicht (mehr)
    #[error("Verbindung getrennt: {0}")]
    Getrennt(ConnectionId),

    /// Send-Queue der Verbindung ist voll
    #[error("Send-Queue voll: {0}")]
    QueueVoll(ConnectionId),

    /// Zustellung hat das Zeitlimit ueberschritten
    #[error("Zeitlimit bei Zustellung an {0}")]
    Zeitlimit(ConnectionId),

    /// Sonstiger Transportfehler
    #[error("Gateway-Fehler: {0}")]
    Transport(String),
}

/// Pusht Nutzdaten an eine adressierbare Verbindung
///
/// Bereits geschlossene Verbindungen sind kein Sonderfall, sondern liefern
/// `GatewayError::Getrennt`.
#[async_trait]
pub trait ConnectionGateway: Send + Sync + 'static {
    async fn senden(&self, connection_id: &ConnectionId, payload: Bytes) -> Result<(), GatewayError>;
}

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer verbundenen WebSocket-Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub connection_id: ConnectionId,
    pub tx: mpsc::Sender<Bytes>,
}

impl ClientSender {
    /// Reiht eine Nachricht nicht-blockierend in die Queue ein
    pub fn senden(&self, payload: Bytes) -> Result<(), GatewayError> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.connection_id, "Send-Queue voll – Nachricht verworfen");
                Err(GatewayError::QueueVoll(self.connection_id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.connection_id, "Send-Queue geschlossen (Client getrennt)");
                Err(GatewayError::Getrennt(self.connection_id.clone()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// VerbindungsRegister
// ---------------------------------------------------------------------------

/// Register aller Live-Verbindungen dieses Prozesses
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct VerbindungsRegister {
    inner: Arc<VerbindungsRegisterInner>,
}

struct VerbindungsRegisterInner {
    clients: DashMap<ConnectionId, ClientSender>,
    queue_groesse: usize,
}

impl VerbindungsRegister {
    /// Erstellt ein leeres Register mit Standard-Queue-Groesse
    pub fn neu() -> Self {
        Self::mit_queue_groesse(SEND_QUEUE_GROESSE)
    }

    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(VerbindungsRegisterInner {
                clients: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine Verbindung und gibt ihre Empfangs-Queue zurueck
    ///
    /// Der Verbindungs-Task liest aus dieser Queue und sendet via WebSocket.
    pub fn client_registrieren(&self, connection_id: ConnectionId) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let sender = ClientSender {
            connection_id: connection_id.clone(),
            tx,
        };
        self.inner.clients.insert(connection_id.clone(), sender);
        tracing::debug!(connection_id = %connection_id, "Verbindung registriert");
        rx
    }

    /// Entfernt eine Verbindung aus dem Register
    pub fn client_entfernen(&self, connection_id: &ConnectionId) {
        if self.inner.clients.remove(connection_id).is_some() {
            tracing::debug!(connection_id = %connection_id, "Verbindung aus Register entfernt");
        }
    }

    /// Gibt die Anzahl der registrierten Verbindungen zurueck
    pub fn client_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Prueft ob eine Verbindung registriert ist
    pub fn ist_registriert(&self, connection_id: &ConnectionId) -> bool {
        self.inner.clients.contains_key(connection_id)
    }
}

impl Default for VerbindungsRegister {
    fn default() -> Self {
        Self::neu()
    }
}

#[async_trait]
impl ConnectionGateway for VerbindungsRegister {
    async fn senden(&self, connection_id: &ConnectionId, payload: Bytes) -> Result<(), GatewayError> {
        // Sender klonen, damit kein Shard-Lock ueber den Sendeversuch gehalten wird
        let sender = match self.inner.clients.get(connection_id) {
            Some(s) => s.clone(),
            None => {
                tracing::debug!(connection_id = %connection_id, "Senden an unbekannte Verbindung");
                return Err(GatewayError::Getrennt(connection_id.clone()));
            }
        };
        sender.senden(payload)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
