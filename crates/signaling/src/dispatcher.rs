//! Action-Dispatcher – Routet Client-Aktionen an den CallSessionManager
//!
//! Der Dispatcher empfaengt einen Text-Frame einer Verbindung, dekodiert die
//! Aktion, ruft den Manager auf und baut die Antwort.
//!
//! ## Wiederholungsstrategie
//! - `Konflikt`: der komplette Read-Modify-Write wird genau einmal mit
//!   frischem Zustand wiederholt, danach geht der Konflikt an den Client
//! - `UnbekannterAusgang`: der Call wird neu gelesen; Beitritt gilt als
//!   erfolgreich wenn die Verbindung jetzt Teilnehmer ist, Austritt wenn sie
//!   es nicht mehr ist (oder der Call weg ist)

use callrelay_core::{CallId, ConnectionId, PeerRecord};
use callrelay_observability::RelayMetrics;
use callrelay_protocol::control::aktion_aus_rohtext;
use callrelay_protocol::{
    ClientAnfrage, ErrorCode, JoinCallRequest, LeaveCallRequest, ServerAntwort,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{SignalingError, SignalingResult};
use crate::presence::PresenceManager;
use crate::session::{CallSessionManager, VerlassenErgebnis};

/// Aktionsname fuer nicht lesbare Anfragen
const AKTION_UNBEKANNT: &str = "error";

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    /// Connection-ID der Verbindung ueber die die Anfrage kam
    pub connection_id: ConnectionId,
}

/// Zentraler Action-Dispatcher
///
/// Clone teilt Manager, Presence und Metriken.
#[derive(Clone)]
pub struct ActionDispatcher {
    manager: Arc<CallSessionManager>,
    presence: PresenceManager,
    metriken: RelayMetrics,
}

impl ActionDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(
        manager: Arc<CallSessionManager>,
        presence: PresenceManager,
        metriken: RelayMetrics,
    ) -> Self {
        Self {
            manager,
            presence,
            metriken,
        }
    }

    /// Verarbeitet einen rohen Text-Frame und gibt die Antwort zurueck
    pub async fn dispatch_text(&self, text: &str, ctx: &DispatcherContext) -> ServerAntwort {
        match ClientAnfrage::aus_json(text) {
            Ok(anfrage) => self.dispatch(anfrage, ctx).await,
            Err(e) => {
                let aktion =
                    aktion_aus_rohtext(text).unwrap_or_else(|| AKTION_UNBEKANNT.to_string());
                tracing::debug!(
                    connection_id = %ctx.connection_id,
                    aktion = %aktion,
                    fehler = %e,
                    "Ungueltige Anfrage"
                );
                ServerAntwort::fehler(
                    aktion,
                    ErrorCode::InvalidRequest,
                    format!("Ungueltige Anfrage: {e}"),
                )
            }
        }
    }

    /// Verarbeitet eine dekodierte Anfrage und gibt die Antwort zurueck
    pub async fn dispatch(&self, anfrage: ClientAnfrage, ctx: &DispatcherContext) -> ServerAntwort {
        let aktion = anfrage.aktion();

        let ergebnis = match anfrage {
            ClientAnfrage::CreateCall {} => self
                .erstellen()
                .await
                .map(|call_id| ServerAntwort::call_erstellt(call_id.as_str())),

            ClientAnfrage::JoinCall(req) => self
                .beitreten(req, ctx)
                .await
                .map(|connection_id| ServerAntwort::beigetreten(connection_id.as_str())),

            ClientAnfrage::LeaveCall(req) => self
                .verlassen(req, ctx)
                .await
                .map(|_| ServerAntwort::verlassen()),

            ClientAnfrage::ConnectionId {} => {
                Ok(ServerAntwort::connection_id(ctx.connection_id.as_str()))
            }

            ClientAnfrage::Ping { timestamp_ms } => {
                let server_ts = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                Ok(ServerAntwort::pong(timestamp_ms, server_ts))
            }
        };

        match ergebnis {
            Ok(antwort) => antwort,
            Err(e) => {
                if e.ist_client_fehler() {
                    tracing::debug!(connection_id = %ctx.connection_id, aktion, fehler = %e, "Aktion abgelehnt");
                } else {
                    tracing::warn!(connection_id = %ctx.connection_id, aktion, fehler = %e, "Aktion fehlgeschlagen");
                }
                ServerAntwort::fehler(aktion, e.code(), e.to_string())
            }
        }
    }

    /// Verlaesst alle Calls einer getrennten Verbindung
    pub async fn verbindung_bereinigen(&self, connection_id: &ConnectionId) {
        for call_id in self.presence.getrennt(connection_id) {
            match self.verlassen_mit_wiederholung(&call_id, connection_id).await {
                Ok(_) => {
                    tracing::debug!(connection_id = %connection_id, call_id = %call_id, "Call beim Trennen verlassen");
                }
                Err(SignalingError::NichtGefunden(_)) => {}
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        call_id = %call_id,
                        fehler = %e,
                        "Call konnte beim Trennen nicht verlassen werden"
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Aktionen
    // -----------------------------------------------------------------------

    async fn erstellen(&self) -> SignalingResult<CallId> {
        let call_id = self.manager.anruf_erstellen().await?;
        self.metriken.calls_created_total.inc();
        Ok(call_id)
    }

    async fn beitreten(
        &self,
        req: JoinCallRequest,
        ctx: &DispatcherContext,
    ) -> SignalingResult<ConnectionId> {
        let call_id = CallId::parse(req.call_id)?;
        let connection_id = connection_id_aufloesen(req.connection_id, ctx)?;
        let peer = PeerRecord::neu(connection_id.clone(), req.kind, req.payload)?;

        let ergebnis = match self.manager.anruf_beitreten(&call_id, peer.clone()).await {
            Err(SignalingError::Konflikt(_)) => {
                self.metriken.conflicts_total.inc();
                tracing::debug!(call_id = %call_id, connection_id = %connection_id, "Konflikt beim Beitritt – ein neuer Versuch");
                self.manager.anruf_beitreten(&call_id, peer).await
            }
            andere => andere,
        };

        match ergebnis {
            Ok(_) => {}
            Err(SignalingError::Konflikt(id)) => {
                self.metriken.conflicts_total.inc();
                return Err(SignalingError::Konflikt(id));
            }
            Err(SignalingError::UnbekannterAusgang(msg)) => {
                let angewendet = matches!(
                    self.manager.anruf_laden(&call_id).await,
                    Ok(ref call) if call.enthaelt(&connection_id)
                );
                if !angewendet {
                    return Err(SignalingError::UnbekannterAusgang(msg));
                }
                tracing::info!(call_id = %call_id, connection_id = %connection_id, "Beitritt nach Zeitlimit bestaetigt");
            }
            Err(e) => return Err(e),
        }

        self.presence.call_beigetreten(&connection_id, &call_id);
        self.metriken.calls_joined_total.inc();
        Ok(connection_id)
    }

    async fn verlassen(
        &self,
        req: LeaveCallRequest,
        ctx: &DispatcherContext,
    ) -> SignalingResult<VerlassenErgebnis> {
        let call_id = CallId::parse(req.call_id)?;
        let connection_id = connection_id_aufloesen(req.connection_id, ctx)?;

        let ergebnis = self.verlassen_mit_wiederholung(&call_id, &connection_id).await?;

        self.presence.call_verlassen(&connection_id, &call_id);
        if ergebnis != VerlassenErgebnis::KeinTeilnehmer {
            self.metriken.calls_left_total.inc();
        }
        Ok(ergebnis)
    }

    async fn verlassen_mit_wiederholung(
        &self,
        call_id: &CallId,
        connection_id: &ConnectionId,
    ) -> SignalingResult<VerlassenErgebnis> {
        let ergebnis = match self.manager.anruf_verlassen(call_id, connection_id).await {
            Err(SignalingError::Konflikt(_)) => {
                self.metriken.conflicts_total.inc();
                tracing::debug!(call_id = %call_id, connection_id = %connection_id, "Konflikt beim Verlassen – ein neuer Versuch");
                self.manager.anruf_verlassen(call_id, connection_id).await
            }
            andere => andere,
        };

        match ergebnis {
            Err(SignalingError::Konflikt(id)) => {
                self.metriken.conflicts_total.inc();
                Err(SignalingError::Konflikt(id))
            }
            Err(SignalingError::UnbekannterAusgang(msg)) => {
                match self.manager.anruf_laden(call_id).await {
                    Ok(call) if !call.enthaelt(connection_id) => Ok(VerlassenErgebnis::Entfernt {
                        verbleibend: call.teilnehmer_anzahl(),
                    }),
                    Err(SignalingError::NichtGefunden(_)) => Ok(VerlassenErgebnis::CallGeloescht),
                    _ => Err(SignalingError::UnbekannterAusgang(msg)),
                }
            }
            andere => andere,
        }
    }
}

/// Bestimmt die Connection-ID einer Anfrage
///
/// Fehlt sie, gilt die eigene Verbindung. Eine fremde ID wird abgelehnt.
fn connection_id_aufloesen(
    angegeben: Option<String>,
    ctx: &DispatcherContext,
) -> SignalingResult<ConnectionId> {
    match angegeben {
        None => Ok(ctx.connection_id.clone()),
        Some(id) => {
            let id = ConnectionId::parse(id)?;
            if id != ctx.connection_id {
                return Err(SignalingError::ungueltig(format!(
                    "connection_id {id} gehoert nicht zu dieser Verbindung"
                )));
            }
            Ok(id)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
