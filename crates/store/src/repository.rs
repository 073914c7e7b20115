//! Repository-Trait-Definitionen
//!
//! Alle schreibenden Operationen ausser `erstellen` sind an eine erwartete
//! Version gebunden (optimistische Nebenlaeufigkeit). Stimmt die Version
//! nicht mehr, schlaegt der Aufruf mit `StoreError::VersionKonflikt` fehl
//! statt still zu ueberschreiben.

use async_trait::async_trait;
use callrelay_core::{AenderungsEreignis, Call, CallId};
use tokio::sync::broadcast;

use crate::error::StoreResult;

/// Versionsmarke eines gespeicherten Datensatzes
pub type Version = u64;

/// Ein gelesener Call zusammen mit seiner Version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GespeicherterCall {
    pub call: Call,
    pub version: Version,
}

/// Schluesselbasierter Speicher fuer Call-Datensaetze
#[async_trait]
pub trait CallStore: Send + Sync + 'static {
    /// Laedt einen Call; `None` wenn nicht vorhanden oder abgelaufen
    async fn laden(&self, id: &CallId) -> StoreResult<Option<GespeicherterCall>>;

    /// Legt einen Call an, nur wenn unter der ID noch keiner existiert
    ///
    /// Schlaegt mit `StoreError::Existiert` fehl wenn die ID belegt ist.
    async fn erstellen(&self, call: &Call) -> StoreResult<Version>;

    /// Ueberschreibt einen Call, nur wenn die gespeicherte Version `erwartet` ist
    async fn bedingt_aktualisieren(&self, call: &Call, erwartet: Version) -> StoreResult<Version>;

    /// Loescht einen Call, nur wenn die gespeicherte Version `erwartet` ist
    async fn bedingt_loeschen(&self, id: &CallId, erwartet: Version) -> StoreResult<()>;
}

/// Quelle eines geordneten Change-Feeds
pub trait ChangeFeedQuelle: Send + Sync + 'static {
    /// Abonniert alle zukuenftigen Mutationen
    fn aenderungen_abonnieren(&self) -> broadcast::Receiver<AenderungsEreignis>;
}
