//! Presence-Manager – Welche Verbindung ist in welchen Calls?
//!
//! Haelt den ephemeren Zustand aller Live-Verbindungen dieses Prozesses.
//! Beim Verbindungsabbau liefert er die Calls, die die Verbindung noch
//! verlassen muss.

use callrelay_core::{CallId, ConnectionId};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// PresenceManager
// ---------------------------------------------------------------------------

/// Verwaltet Verbindungen und ihre Call-Mitgliedschaften
///
/// Thread-safe via Arc + DashMap. Clone des Managers teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceManager {
    inner: Arc<PresenceManagerInner>,
}

struct PresenceManagerInner {
    /// Verbindung -> Calls in denen sie Teilnehmer ist
    verbindungen: DashMap<ConnectionId, BTreeSet<CallId>>,
}

impl PresenceManager {
    /// Erstellt einen neuen PresenceManager
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(PresenceManagerInner {
                verbindungen: DashMap::new(),
            }),
        }
    }

    /// Registriert eine neue Verbindung als online
    pub fn verbunden(&self, connection_id: ConnectionId) {
        self.inner
            .verbindungen
            .insert(connection_id.clone(), BTreeSet::new());

        tracing::info!(connection_id = %connection_id, "Verbindung online");
    }

    /// Entfernt eine Verbindung und gibt die Calls zurueck, in denen sie noch war
    pub fn getrennt(&self, connection_id: &ConnectionId) -> Vec<CallId> {
        let offene_calls: Vec<CallId> = match self.inner.verbindungen.remove(connection_id) {
            Some((_, calls)) => calls.into_iter().collect(),
            None => return Vec::new(),
        };

        tracing::info!(
            connection_id = %connection_id,
            offene_calls = offene_calls.len(),
            "Verbindung offline"
        );
        offene_calls
    }

    /// Merkt sich die Mitgliedschaft einer Verbindung in einem Call
    pub fn call_beigetreten(&self, connection_id: &ConnectionId, call_id: &CallId) {
        let neu = match self.inner.verbindungen.get_mut(connection_id) {
            Some(mut calls) => calls.insert(call_id.clone()),
            None => {
                tracing::warn!(connection_id = %connection_id, "Call-Beitritt fuer unbekannte Verbindung");
                return;
            }
        };

        if neu {
            tracing::debug!(connection_id = %connection_id, call_id = %call_id, "Mitgliedschaft gemerkt");
        }
    }

    /// Vergisst die Mitgliedschaft einer Verbindung in einem Call
    pub fn call_verlassen(&self, connection_id: &ConnectionId, call_id: &CallId) {
        let entfernt = self
            .inner
            .verbindungen
            .get_mut(connection_id)
            .map(|mut calls| calls.remove(call_id))
            .unwrap_or(false);

        if entfernt {
            tracing::debug!(connection_id = %connection_id, call_id = %call_id, "Mitgliedschaft vergessen");
        }
    }

    /// Gibt alle Calls einer Verbindung zurueck
    pub fn calls_von(&self, connection_id: &ConnectionId) -> Vec<CallId> {
        self.inner
            .verbindungen
            .get(connection_id)
            .map(|calls| calls.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Prueft ob eine Verbindung online ist
    pub fn ist_online(&self, connection_id: &ConnectionId) -> bool {
        self.inner.verbindungen.contains_key(connection_id)
    }

    /// Gibt die Anzahl der online Verbindungen zurueck
    pub fn online_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
