//! Fehlertypen fuer das Store-Crate

use callrelay_core::{CallId, CoreError};
use thiserror::Error;

use crate::repository::Version;

/// Speicher-Fehlertypen
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Datensatz nicht gefunden: {0}")]
    NichtGefunden(CallId),

    #[error("Datensatz existiert bereits: {0}")]
    Existiert(CallId),

    #[error("Versionskonflikt bei {call_id}: erwartet={erwartet}, aktuell={aktuell}")]
    VersionKonflikt {
        call_id: CallId,
        erwartet: Version,
        aktuell: Version,
    },

    #[error("Speicher nicht verfuegbar: {0}")]
    NichtVerfuegbar(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Ungueltiger Datensatz: {0}")]
    Datensatz(#[from] CoreError),
}

impl StoreError {
    pub fn nicht_verfuegbar(msg: impl Into<String>) -> Self {
        Self::NichtVerfuegbar(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Versuch sinnvoll sein koennte
    ///
    /// Zeitlimits zaehlen nicht dazu: ein abgelaufener Schreibvorgang hat
    /// einen unbekannten Ausgang und darf nicht blind wiederholt werden.
    pub fn ist_voruebergehend(&self) -> bool {
        matches!(self, Self::NichtVerfuegbar(_))
    }
}

/// Result-Typ fuer das Store-Crate
pub type StoreResult<T> = Result<T, StoreError>;
