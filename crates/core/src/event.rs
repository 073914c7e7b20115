//! Change-Feed-Ereignisse
//!
//! Der Speicher emittiert nach jeder erfolgreichen Mutation ein
//! `AenderungsEreignis` mit dem vollstaendigen Zustand des Datensatzes nach
//! der Mutation (kein Diff). Das Abbild bleibt bewusst ein untypisierter
//! JSON-Wert im Speicherformat; dekodiert wird erst beim Konsumenten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::CallId;

/// Art der Mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AenderungsArt {
    /// Datensatz wurde neu angelegt
    Eingefuegt,
    /// Bestehender Datensatz wurde geaendert
    Geaendert,
    /// Datensatz wurde geloescht (explizit oder per TTL)
    Entfernt,
}

/// Ein Eintrag im Change-Feed des Speichers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AenderungsEreignis {
    /// Monoton steigende Sequenznummer (pro Speicher)
    pub sequenz: u64,
    pub art: AenderungsArt,
    pub call_id: CallId,
    /// Zustand nach der Mutation; `None` bei `Entfernt`
    pub neues_abbild: Option<serde_json::Value>,
    pub zeitpunkt: DateTime<Utc>,
}

impl AenderungsEreignis {
    /// Gibt true zurueck wenn das Ereignis einen Broadcast ausloesen soll
    pub fn ist_aktualisierung(&self) -> bool {
        self.art == AenderungsArt::Geaendert
    }
}
