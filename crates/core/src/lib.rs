//! callrelay-core – Gemeinsame Typen, Datenmodell und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Call-Relay-Crates gemeinsam genutzt werden: Identifikatoren,
//! das `Call`/`PeerRecord`-Modell inklusive Speicherformat und die
//! Ereignistypen des Change-Feeds.

pub mod error;
pub mod event;
pub mod model;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{CoreError, CoreResult};
pub use event::{AenderungsArt, AenderungsEreignis};
pub use model::{Call, CallRecord, PeerRecord};
pub use types::{CallId, ConnectionId};
