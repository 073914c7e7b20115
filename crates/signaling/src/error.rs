//! Fehlertypen fuer den Signaling-Service

use callrelay_core::{CallId, ConnectionId, CoreError};
use callrelay_protocol::ErrorCode;
use callrelay_store::StoreError;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Call existiert nicht (oder ist abgelaufen)
    #[error("Call nicht gefunden: {0}")]
    NichtGefunden(CallId),

    /// Bedingter Schreibzugriff verloren, der Call wurde parallel geaendert
    #[error("Call wurde gleichzeitig geaendert: {0}")]
    Konflikt(CallId),

    /// Verbindung ist bereits Teilnehmer des Calls
    #[error("Verbindung {connection_id} ist bereits Teilnehmer von {call_id}")]
    BereitsBeigetreten {
        call_id: CallId,
        connection_id: ConnectionId,
    },

    /// Keine freie Call-ID nach der maximalen Anzahl an Versuchen
    #[error("Keine freie Call-ID nach {versuche} Versuchen")]
    IdRaumErschoepft { versuche: u32 },

    /// Speicher nicht erreichbar (nach allen Wiederholungen)
    #[error("Speicher nicht verfuegbar: {0}")]
    StoreNichtVerfuegbar(String),

    /// Verbindungs-Gateway nicht erreichbar
    #[error("Gateway nicht verfuegbar: {0}")]
    GatewayNichtVerfuegbar(String),

    /// Fehlerhafte Client-Anfrage
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    /// Gespeicherter Datensatz passt nicht zum erwarteten Format
    #[error("Ungueltiger Datensatz: {0}")]
    UngueltigerDatensatz(String),

    /// Schreibvorgang ueberschritt das Zeitlimit, Ausgang unbekannt
    #[error("Ausgang unbekannt: {0}")]
    UnbekannterAusgang(String),

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Fehler fuer eine ungueltige Anfrage
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::UngueltigeAnfrage(msg.into())
    }

    /// Fehler-Code fuer die Antwort an den Client
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NichtGefunden(_) => ErrorCode::NotFound,
            Self::Konflikt(_) => ErrorCode::Conflict,
            Self::BereitsBeigetreten { .. } => ErrorCode::AlreadyJoined,
            Self::IdRaumErschoepft { .. } => ErrorCode::IdSpaceExhausted,
            Self::StoreNichtVerfuegbar(_) => ErrorCode::StoreUnavailable,
            Self::GatewayNichtVerfuegbar(_) => ErrorCode::GatewayUnavailable,
            Self::UngueltigeAnfrage(_) => ErrorCode::InvalidRequest,
            Self::UnbekannterAusgang(_) => ErrorCode::UnknownOutcome,
            Self::UngueltigerDatensatz(_) | Self::Intern(_) => ErrorCode::InternalError,
        }
    }

    /// Gibt true zurueck wenn der Fehler vom Client verursacht wurde
    pub fn ist_client_fehler(&self) -> bool {
        matches!(
            self,
            Self::NichtGefunden(_) | Self::BereitsBeigetreten { .. } | Self::UngueltigeAnfrage(_)
        )
    }
}

impl From<StoreError> for SignalingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NichtGefunden(id) => Self::NichtGefunden(id),
            StoreError::VersionKonflikt { call_id, .. } => Self::Konflikt(call_id),
            // Nur ueber `erstellen` erreichbar, dort wird es als Kollision behandelt
            StoreError::Existiert(id) => Self::Intern(format!("Call existiert bereits: {id}")),
            StoreError::NichtVerfuegbar(msg) => Self::StoreNichtVerfuegbar(msg),
            StoreError::Zeitlimit(msg) => Self::StoreNichtVerfuegbar(msg),
            StoreError::Datensatz(e) => Self::UngueltigerDatensatz(e.to_string()),
        }
    }
}

impl From<CoreError> for SignalingError {
    fn from(e: CoreError) -> Self {
        if e.ist_eingabefehler() {
            Self::UngueltigeAnfrage(e.to_string())
        } else {
            Self::UngueltigerDatensatz(e.to_string())
        }
    }
}

impl From<GatewayError> for SignalingError {
    fn from(e: GatewayError) -> Self {
        Self::GatewayNichtVerfuegbar(e.to_string())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
