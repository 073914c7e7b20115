//! In-Memory-Implementierung des Call-Speichers
//!
//! Datensaetze liegen im Speicherformat (`CallRecord`) in einer `DashMap`.
//! Jeder Schluessel wird ueber den Shard-Lock der Map atomar gelesen und
//! geschrieben; unterschiedliche Calls teilen sich keinen Lock ausser dem
//! kurzen Sequenz-Lock fuer den Change-Feed.
//!
//! ## Change-Feed
//! Jede erfolgreiche Mutation vergibt unter dem Sequenz-Lock eine neue
//! Sequenznummer und sendet das Ereignis noch waehrend der Datensatz
//! gesperrt ist. Dadurch entspricht die Reihenfolge im Feed der Reihenfolge
//! der Mutationen pro Schluessel.

use async_trait::async_trait;
use callrelay_core::{AenderungsArt, AenderungsEreignis, Call, CallId, CallRecord};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};
use crate::repository::{CallStore, ChangeFeedQuelle, GespeicherterCall, Version};

/// Standardgroesse des Broadcast-Kanals fuer den Change-Feed
const FEED_KANAL_GROESSE: usize = 1024;

/// Gespeicherter Datensatz mit Versionsmarke
#[derive(Debug, Clone)]
struct Eintrag {
    record: CallRecord,
    version: Version,
}

impl Eintrag {
    fn ist_abgelaufen(&self, jetzt: DateTime<Utc>) -> bool {
        self.record.expires_at <= jetzt.timestamp()
    }
}

/// In-Memory Call-Speicher mit bedingten Updates und Change-Feed
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct MemoryCallStore {
    inner: Arc<MemoryCallStoreInner>,
}

struct MemoryCallStoreInner {
    calls: DashMap<CallId, Eintrag>,
    /// Letzte vergebene Sequenznummer
    sequenz: Mutex<u64>,
    feed_tx: broadcast::Sender<AenderungsEreignis>,
}

impl MemoryCallStore {
    /// Erstellt einen leeren Speicher mit Standard-Feed-Groesse
    pub fn neu() -> Self {
        Self::mit_feed_groesse(FEED_KANAL_GROESSE)
    }

    /// Erstellt einen leeren Speicher mit der angegebenen Feed-Kapazitaet
    pub fn mit_feed_groesse(groesse: usize) -> Self {
        let (feed_tx, _) = broadcast::channel(groesse.max(1));
        Self {
            inner: Arc::new(MemoryCallStoreInner {
                calls: DashMap::new(),
                sequenz: Mutex::new(0),
                feed_tx,
            }),
        }
    }

    /// Anzahl der gespeicherten Datensaetze (inklusive noch nicht bereinigter)
    pub fn anzahl(&self) -> usize {
        self.inner.calls.len()
    }

    /// Entfernt alle Calls deren `expires_at` erreicht ist
    ///
    /// Gibt die Anzahl der entfernten Datensaetze zurueck. Fuer jeden
    /// entfernten Datensatz wird ein `Entfernt`-Ereignis emittiert.
    pub fn abgelaufene_entfernen(&self, jetzt: DateTime<Utc>) -> usize {
        let mut entfernt = 0;
        self.inner.calls.retain(|call_id, eintrag| {
            if eintrag.ist_abgelaufen(jetzt) {
                self.emittieren(AenderungsArt::Entfernt, call_id, None);
                entfernt += 1;
                false
            } else {
                true
            }
        });
        if entfernt > 0 {
            tracing::debug!(anzahl = entfernt, "Abgelaufene Calls entfernt");
        }
        entfernt
    }

    /// Vergibt eine Sequenznummer und sendet das Ereignis in den Feed
    ///
    /// Muss aufgerufen werden solange der betroffene Datensatz gesperrt ist.
    fn emittieren(&self, art: AenderungsArt, call_id: &CallId, abbild: Option<serde_json::Value>) {
        let mut sequenz = self.inner.sequenz.lock();
        *sequenz += 1;
        let ereignis = AenderungsEreignis {
            sequenz: *sequenz,
            art,
            call_id: call_id.clone(),
            neues_abbild: abbild,
            zeitpunkt: Utc::now(),
        };
        // Fehler bedeutet nur: aktuell kein Abonnent
        let _ = self.inner.feed_tx.send(ereignis);
    }
}

impl Default for MemoryCallStore {
    fn default() -> Self {
        Self::neu()
    }
}

fn abbild_von(record: &CallRecord) -> Option<serde_json::Value> {
    serde_json::to_value(record).ok()
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn laden(&self, id: &CallId) -> StoreResult<Option<GespeicherterCall>> {
        let eintrag = match self.inner.calls.get(id) {
            Some(e) => e.clone(),
            None => return Ok(None),
        };

        if eintrag.ist_abgelaufen(Utc::now()) {
            return Ok(None);
        }

        let call = Call::try_from(eintrag.record)?;
        Ok(Some(GespeicherterCall {
            call,
            version: eintrag.version,
        }))
    }

    async fn erstellen(&self, call: &Call) -> StoreResult<Version> {
        let record = CallRecord::from(call);
        let jetzt = Utc::now();

        match self.inner.calls.entry(call.id.clone()) {
            Entry::Occupied(mut belegt) => {
                if !belegt.get().ist_abgelaufen(jetzt) {
                    return Err(StoreError::Existiert(call.id.clone()));
                }
                // Abgelaufener, noch nicht bereinigter Datensatz wird ersetzt.
                // Der Feed sieht erst das Entfernen, dann das Einfuegen.
                let version = belegt.get().version + 1;
                self.emittieren(AenderungsArt::Entfernt, &call.id, None);
                self.emittieren(AenderungsArt::Eingefuegt, &call.id, abbild_von(&record));
                belegt.insert(Eintrag { record, version });
                tracing::trace!(call_id = %call.id, version, "Abgelaufenen Call ersetzt");
                Ok(version)
            }
            Entry::Vacant(frei) => {
                self.emittieren(AenderungsArt::Eingefuegt, &call.id, abbild_von(&record));
                frei.insert(Eintrag { record, version: 1 });
                tracing::trace!(call_id = %call.id, "Call angelegt");
                Ok(1)
            }
        }
    }

    async fn bedingt_aktualisieren(&self, call: &Call, erwartet: Version) -> StoreResult<Version> {
        let jetzt = Utc::now();

        match self.inner.calls.entry(call.id.clone()) {
            Entry::Vacant(_) => Err(StoreError::NichtGefunden(call.id.clone())),
            Entry::Occupied(mut belegt) => {
                if belegt.get().ist_abgelaufen(jetzt) {
                    return Err(StoreError::NichtGefunden(call.id.clone()));
                }
                let aktuell = belegt.get().version;
                if aktuell != erwartet {
                    return Err(StoreError::VersionKonflikt {
                        call_id: call.id.clone(),
                        erwartet,
                        aktuell,
                    });
                }

                let record = CallRecord::from(call);
                let version = aktuell + 1;
                self.emittieren(AenderungsArt::Geaendert, &call.id, abbild_von(&record));
                belegt.insert(Eintrag { record, version });
                Ok(version)
            }
        }
    }

    async fn bedingt_loeschen(&self, id: &CallId, erwartet: Version) -> StoreResult<()> {
        match self.inner.calls.entry(id.clone()) {
            Entry::Vacant(_) => Err(StoreError::NichtGefunden(id.clone())),
            Entry::Occupied(belegt) => {
                let aktuell = belegt.get().version;
                if aktuell != erwartet {
                    return Err(StoreError::VersionKonflikt {
                        call_id: id.clone(),
                        erwartet,
                        aktuell,
                    });
                }
                self.emittieren(AenderungsArt::Entfernt, id, None);
                belegt.remove();
                Ok(())
            }
        }
    }
}

impl ChangeFeedQuelle for MemoryCallStore {
    fn aenderungen_abonnieren(&self) -> broadcast::Receiver<AenderungsEreignis> {
        self.inner.feed_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn call(id: &str, ablauf: DateTime<Utc>) -> Call {
        Call::neu(CallId::parse(id).unwrap(), ablauf)
    }

    #[tokio::test]
    async fn abgelaufener_call_ist_unsichtbar() {
        let store = MemoryCallStore::neu();
        let vergangen = Utc::now() - Duration::seconds(5);
        store.erstellen(&call("alt", vergangen)).await.unwrap();

        let geladen = store.laden(&CallId::parse("alt").unwrap()).await.unwrap();
        assert!(geladen.is_none(), "Abgelaufene Calls duerfen nicht geladen werden");
    }

    #[tokio::test]
    async fn abgelaufener_call_darf_ersetzt_werden() {
        let store = MemoryCallStore::neu();
        let vergangen = Utc::now() - Duration::seconds(5);
        store.erstellen(&call("abc", vergangen)).await.unwrap();

        let zukunft = Utc::now() + Duration::hours(1);
        let version = store.erstellen(&call("abc", zukunft)).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn ersetzen_eines_abgelaufenen_calls_meldet_erst_entfernt() {
        let store = MemoryCallStore::neu();
        let mut rx = store.aenderungen_abonnieren();

        store
            .erstellen(&call("abc", Utc::now() - Duration::seconds(5)))
            .await
            .unwrap();
        store
            .erstellen(&call("abc", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let mut arten = Vec::new();
        let mut sequenzen = Vec::new();
        while let Ok(ereignis) = rx.try_recv() {
            arten.push(ereignis.art);
            sequenzen.push(ereignis.sequenz);
        }
        assert_eq!(
            arten,
            [AenderungsArt::Eingefuegt, AenderungsArt::Entfernt, AenderungsArt::Eingefuegt]
        );
        assert!(sequenzen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn ttl_bereinigung_emittiert_entfernt() {
        let store = MemoryCallStore::neu();
        let mut rx = store.aenderungen_abonnieren();

        store
            .erstellen(&call("weg", Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .erstellen(&call("bleibt", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.abgelaufene_entfernen(Utc::now()), 1);
        assert_eq!(store.anzahl(), 1);

        let mut arten = Vec::new();
        while let Ok(e) = rx.try_recv() {
            arten.push((e.call_id.to_string(), e.art));
        }
        assert!(arten.contains(&("weg".to_string(), AenderungsArt::Entfernt)));
    }
}
