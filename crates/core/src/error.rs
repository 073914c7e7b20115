//! Fehlertypen fuer das Core-Crate
//!
//! Validierungs- und Dekodierfehler des Datenmodells. Die Dienst-Crates
//! definieren eigene Fehler und konvertieren diese via `#[from]`.

use thiserror::Error;

/// Result-Alias fuer das Core-Crate
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Fehler beim Validieren oder Dekodieren des Datenmodells
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Ungueltige Call-ID: {0}")]
    UngueltigeCallId(String),

    #[error("Ungueltige Connection-ID: {0}")]
    UngueltigeConnectionId(String),

    #[error("Ungueltiger Teilnehmer-Eintrag: {0}")]
    UngueltigerTeilnehmer(String),

    #[error("Ungueltiger Datensatz: {0}")]
    UngueltigerDatensatz(String),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Erstellt einen Datensatz-Fehler aus einer beliebigen Nachricht
    pub fn datensatz(msg: impl Into<String>) -> Self {
        Self::UngueltigerDatensatz(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler auf eine fehlerhafte Client-Eingabe
    /// zurueckgeht (und nicht auf einen kaputten Speicher-Datensatz)
    pub fn ist_eingabefehler(&self) -> bool {
        matches!(
            self,
            Self::UngueltigeCallId(_) | Self::UngueltigeConnectionId(_) | Self::UngueltigerTeilnehmer(_)
        )
    }
}
