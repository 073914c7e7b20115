//! callrelay-store – Call-Speicher
//!
//! Das Repository-Pattern entkoppelt die Session-Logik vom konkreten
//! Speicher. `CallStore` beschreibt die benoetigte Faehigkeit (Lesen,
//! bedingtes Schreiben, bedingtes Loeschen), `ChangeFeedQuelle` den
//! geordneten Strom der Mutationen.
//!
//! `MemoryCallStore` ist die mitgelieferte In-Memory-Implementierung mit
//! Versionszaehler pro Datensatz, TTL-Bereinigung und Change-Feed ueber
//! einen tokio-Broadcast-Kanal.

pub mod error;
pub mod memory;
pub mod repository;

// Bequeme Re-Exporte
pub use error::{StoreError, StoreResult};
pub use memory::MemoryCallStore;
pub use repository::{CallStore, ChangeFeedQuelle, GespeicherterCall, Version};
