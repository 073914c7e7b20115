//! CallSessionManager – Zustandsuebergaenge von Calls
//!
//! Erstellen, Beitreten und Verlassen laufen als Read-Modify-Write gegen den
//! `CallStore`. Jeder Schreibzugriff ist an die gelesene Version gebunden;
//! verliert ein Aufrufer das Rennen, bekommt er `SignalingError::Konflikt`.
//! Der Manager wiederholt Konflikte nie selbst.
//!
//! ## Zeitlimits und Wiederholungen
//! - Jeder Store-Aufruf ist durch `store_zeitlimit` begrenzt
//! - Lese-Zeitlimit: `StoreNichtVerfuegbar`
//! - Schreib-Zeitlimit: `UnbekannterAusgang` (Schreibvorgang evtl. angewendet)
//! - `StoreError::NichtVerfuegbar` wird bis zu `store_wiederholungen` Mal mit
//!   verdoppeltem Backoff wiederholt
//! - Mit [`CallSessionManager::mit_health`] meldet jeder abgeschlossene
//!   Store-Aufruf die Erreichbarkeit des Speichers an den Health-Check
//!
//! Abgelaufene Calls, die der Speicher noch nicht bereinigt hat, gelten als
//! nicht vorhanden.

use callrelay_core::{Call, CallId, ConnectionId, PeerRecord};
use callrelay_observability::HealthState;
use callrelay_store::{CallStore, GespeicherterCall, StoreError, StoreResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{SignalingError, SignalingResult};

/// Laenge einer erzeugten Call-ID in Hex-Zeichen
pub const CALL_ID_LAENGE: usize = 6;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des CallSessionManagers
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lebensdauer eines Calls ab Erstellung
    pub call_ttl: Duration,
    /// Maximale ID-Kollisionen bei `anruf_erstellen`
    pub max_id_kollisionen: u32,
    /// Zeitlimit pro Store-Aufruf
    pub store_zeitlimit: Duration,
    /// Wiederholungen bei voruebergehenden Store-Fehlern
    pub store_wiederholungen: u32,
    /// Start-Backoff, verdoppelt sich pro Wiederholung
    pub backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_ttl: Duration::from_secs(24 * 60 * 60),
            max_id_kollisionen: 16,
            store_zeitlimit: Duration::from_secs(2),
            store_wiederholungen: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Ausgang von `anruf_verlassen`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerlassenErgebnis {
    /// Verbindung war kein Teilnehmer, nichts geaendert
    KeinTeilnehmer,
    /// Teilnehmer entfernt, der Call besteht weiter
    Entfernt { verbleibend: usize },
    /// Letzter Teilnehmer entfernt, der Call wurde geloescht
    CallGeloescht,
}

// ---------------------------------------------------------------------------
// Call-ID-Erzeugung
// ---------------------------------------------------------------------------

/// Erzeugt eine kurze Call-ID aus SHA-256(UUIDv4 || Nanosekunden)
pub fn call_id_erzeugen() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(nanos.to_be_bytes());
    let digest = hasher.finalize();

    digest
        .iter()
        .take(CALL_ID_LAENGE / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// CallSessionManager
// ---------------------------------------------------------------------------

/// Fuehrt Create/Join/Leave gegen den Call-Speicher aus
pub struct CallSessionManager {
    store: Arc<dyn CallStore>,
    config: SessionConfig,
    id_quelle: Box<dyn Fn() -> String + Send + Sync>,
    health: Option<HealthState>,
}

impl CallSessionManager {
    pub fn neu(store: Arc<dyn CallStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            id_quelle: Box::new(call_id_erzeugen),
            health: None,
        }
    }

    /// Meldet die Erreichbarkeit des Speichers an den Health-Check
    pub fn mit_health(mut self, health: HealthState) -> Self {
        self.health = Some(health);
        self
    }

    /// Ersetzt die ID-Quelle (fuer deterministische Kollisionen in Tests)
    pub fn mit_id_quelle(mut self, quelle: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_quelle = Box::new(quelle);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Legt einen neuen, leeren Call an und gibt seine ID zurueck
    pub async fn anruf_erstellen(&self) -> SignalingResult<CallId> {
        let max = self.config.max_id_kollisionen.max(1);

        for versuch in 1..=max {
            let call_id = CallId::parse((self.id_quelle)())
                .map_err(|e| SignalingError::intern(format!("ID-Quelle lieferte ungueltige ID: {e}")))?;

            if self.laden_gespeichert(&call_id).await?.is_some() {
                tracing::debug!(call_id = %call_id, versuch, "Call-ID-Kollision");
                continue;
            }

            let ablauf = Utc::now()
                + chrono::Duration::from_std(self.config.call_ttl)
                    .map_err(|e| SignalingError::intern(format!("Ungueltige Call-TTL: {e}")))?;
            let call = Call::neu(call_id.clone(), ablauf);
            let (store, neu) = (&self.store, &call);

            match self
                .mit_wiederholung("erstellen", move || store.erstellen(neu))
                .await
            {
                Ok(_) => {
                    tracing::info!(call_id = %call_id, "Call erstellt");
                    return Ok(call_id);
                }
                Err(StoreError::Existiert(_)) => {
                    // Rennen um dieselbe ID verloren
                    tracing::debug!(call_id = %call_id, versuch, "Call-ID beim Anlegen belegt");
                    continue;
                }
                Err(e) => return Err(schreibfehler(e)),
            }
        }

        tracing::error!(versuche = max, "Keine freie Call-ID gefunden");
        Err(SignalingError::IdRaumErschoepft { versuche: max })
    }

    /// Fuegt einen Teilnehmer hinzu und gibt den Call nach dem Beitritt zurueck
    pub async fn anruf_beitreten(&self, call_id: &CallId, peer: PeerRecord) -> SignalingResult<Call> {
        let GespeicherterCall { mut call, version } = self
            .laden_gespeichert(call_id)
            .await?
            .ok_or_else(|| SignalingError::NichtGefunden(call_id.clone()))?;

        let connection_id = peer.connection_id.clone();
        if !call.teilnehmer_hinzufuegen(peer) {
            return Err(SignalingError::BereitsBeigetreten {
                call_id: call_id.clone(),
                connection_id,
            });
        }

        let (store, neu) = (&self.store, &call);
        self.mit_wiederholung("aktualisieren", move || {
            store.bedingt_aktualisieren(neu, version)
        })
        .await
        .map_err(schreibfehler)?;

        tracing::info!(
            call_id = %call_id,
            connection_id = %connection_id,
            teilnehmer = call.teilnehmer_anzahl(),
            "Call beigetreten"
        );
        Ok(call)
    }

    /// Entfernt einen Teilnehmer; der letzte Austritt loescht den Call
    pub async fn anruf_verlassen(
        &self,
        call_id: &CallId,
        connection_id: &ConnectionId,
    ) -> SignalingResult<VerlassenErgebnis> {
        let GespeicherterCall { mut call, version } = self
            .laden_gespeichert(call_id)
            .await?
            .ok_or_else(|| SignalingError::NichtGefunden(call_id.clone()))?;

        if call.teilnehmer_entfernen(connection_id).is_none() {
            tracing::debug!(call_id = %call_id, connection_id = %connection_id, "Verlassen ohne Teilnahme");
            return Ok(VerlassenErgebnis::KeinTeilnehmer);
        }

        if call.ist_leer() {
            // Bedingt auf die gelesene Version: ein paralleler Beitritt fuehrt zum Konflikt
            let store = &self.store;
            self.mit_wiederholung("loeschen", move || store.bedingt_loeschen(call_id, version))
                .await
                .map_err(schreibfehler)?;
            tracing::info!(call_id = %call_id, connection_id = %connection_id, "Letzter Teilnehmer, Call geloescht");
            return Ok(VerlassenErgebnis::CallGeloescht);
        }

        let (store, neu) = (&self.store, &call);
        self.mit_wiederholung("aktualisieren", move || {
            store.bedingt_aktualisieren(neu, version)
        })
        .await
        .map_err(schreibfehler)?;

        tracing::info!(
            call_id = %call_id,
            connection_id = %connection_id,
            verbleibend = call.teilnehmer_anzahl(),
            "Call verlassen"
        );
        Ok(VerlassenErgebnis::Entfernt {
            verbleibend: call.teilnehmer_anzahl(),
        })
    }

    /// Liest einen Call
    pub async fn anruf_laden(&self, call_id: &CallId) -> SignalingResult<Call> {
        self.laden_gespeichert(call_id)
            .await?
            .map(|g| g.call)
            .ok_or_else(|| SignalingError::NichtGefunden(call_id.clone()))
    }

    // -----------------------------------------------------------------------
    // Store-Zugriff mit Zeitlimit und Wiederholung
    // -----------------------------------------------------------------------

    async fn laden_gespeichert(&self, call_id: &CallId) -> SignalingResult<Option<GespeicherterCall>> {
        let store = &self.store;
        let gespeichert = self
            .mit_wiederholung("laden", move || store.laden(call_id))
            .await?;

        Ok(gespeichert.filter(|g| {
            let abgelaufen = g.call.ist_abgelaufen(Utc::now());
            if abgelaufen {
                tracing::debug!(call_id = %call_id, "Abgelaufener Call noch im Speicher");
            }
            !abgelaufen
        }))
    }

    async fn mit_wiederholung<T, F, Fut>(&self, operation: &'static str, mut f: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut backoff = self.config.backoff;
        let mut wiederholung = 0;

        loop {
            let ergebnis = match tokio::time::timeout(self.config.store_zeitlimit, f()).await {
                Ok(r) => r,
                Err(_) => Err(StoreError::Zeitlimit(format!(
                    "{operation} nach {:?}",
                    self.config.store_zeitlimit
                ))),
            };

            match ergebnis {
                Err(e) if e.ist_voruebergehend() && wiederholung < self.config.store_wiederholungen => {
                    wiederholung += 1;
                    tracing::warn!(
                        operation,
                        wiederholung,
                        backoff_ms = backoff.as_millis() as u64,
                        fehler = %e,
                        "Store voruebergehend nicht verfuegbar – neuer Versuch"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                other => {
                    self.store_status_melden(&other);
                    return other;
                }
            }
        }
    }

    /// Nicht verfuegbar oder Zeitlimit nach allen Versuchen: Speicher gilt als unerreichbar
    fn store_status_melden<T>(&self, ergebnis: &StoreResult<T>) {
        let Some(health) = &self.health else {
            return;
        };
        let verfuegbar = !matches!(
            ergebnis,
            Err(StoreError::NichtVerfuegbar(_) | StoreError::Zeitlimit(_))
        );
        if health.store_verfuegbar() != verfuegbar {
            tracing::warn!(verfuegbar, "Store-Erreichbarkeit geaendert");
        }
        health.store_status_setzen(verfuegbar);
    }
}

/// Schreib-Zeitlimits haben einen unbekannten Ausgang
fn schreibfehler(e: StoreError) -> SignalingError {
    match e {
        StoreError::Zeitlimit(msg) => SignalingError::UnbekannterAusgang(msg),
        other => other.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
