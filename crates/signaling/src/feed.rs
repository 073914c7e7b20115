//! ChangeFeedProcessor – Vom Store-Feed zum Update-Push
//!
//! Konsumiert den Change-Feed des Call-Speichers und verteilt bei jeder
//! Aenderung eines Calls die aktuelle Teilnehmerliste an alle Teilnehmer.
//!
//! ## Ablauf pro Ereignis
//! ```text
//! AenderungsEreignis
//!     |  nur Geaendert
//!     v
//! eigener Task ---> Abbild typisiert dekodieren (Fehler: loggen, zaehlen, ueberspringen)
//!     |
//!     v
//! Sendesperre des Calls nehmen, Wasserstand pruefen (aelter als zuletzt gesendet: verwerfen)
//!     |
//!     v
//! Broadcaster::einzeln_senden an alle Connection-IDs des Calls
//! ```
//!
//! Pro Call laeuft hoechstens ein Fan-out gleichzeitig. Ein aelteres Update
//! kann daher nie nach einem neueren ankommen.
//!
//! `Entfernt` hinterlaesst einen Grabstein mit seiner Sequenznummer, damit
//! spaeter laufende Tasks aelterer Ereignisse den Call nicht neu anlegen.
//! Grabsteine werden nach `GRABSTEIN_HALTEZEIT` mit
//! [`ChangeFeedProcessor::grabsteine_bereinigen`] entfernt.

use bytes::Bytes;
use callrelay_core::{AenderungsArt, AenderungsEreignis, Call, CallId, ConnectionId, PeerRecord};
use callrelay_observability::RelayMetrics;
use callrelay_protocol::{SignalEintrag, UpdateNachricht};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::broadcast::{Broadcaster, ZustellBericht};
use crate::error::{SignalingError, SignalingResult};

/// Konfiguration der Feed-Verarbeitung
#[derive(Debug, Clone, Default)]
pub struct FeedConfig {
    /// Empfaenger bekommen auch ihren eigenen Eintrag zurueck
    pub eigenen_eintrag_senden: bool,
}

/// Ergebnis der Verarbeitung eines einzelnen Ereignisses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedErgebnis {
    /// Update wurde an die Teilnehmer verteilt
    Verteilt(ZustellBericht),
    /// Ein neueres Ereignis desselben Calls wurde bereits verteilt
    Veraltet,
}

/// Mindestalter eines Grabsteins bevor er bereinigt werden darf
pub const GRABSTEIN_HALTEZEIT: Duration = Duration::from_secs(60);

/// Hoechste gesehene Sequenznummer eines Calls
#[derive(Debug, Clone, Copy)]
struct Wasserstand {
    sequenz: u64,
    /// Gesetzt wenn der Call geloescht wurde (Grabstein)
    entfernt_seit: Option<Instant>,
}

/// Feed-Zustand eines einzelnen Calls
struct CallZustand {
    stand: Mutex<Wasserstand>,
    /// Serialisiert die Fan-outs dieses Calls
    senden: tokio::sync::Mutex<()>,
}

impl CallZustand {
    fn neu() -> Self {
        Self {
            stand: Mutex::new(Wasserstand {
                sequenz: 0,
                entfernt_seit: None,
            }),
            senden: tokio::sync::Mutex::new(()),
        }
    }
}

/// Verarbeitet den Change-Feed und stoesst Broadcasts an
///
/// Clone teilt Broadcaster und Wasserstaende.
#[derive(Clone)]
pub struct ChangeFeedProcessor {
    inner: Arc<ChangeFeedProcessorInner>,
}

struct ChangeFeedProcessorInner {
    broadcaster: Broadcaster,
    config: FeedConfig,
    metriken: RelayMetrics,
    /// Wasserstand und Sendesperre pro Call
    calls: DashMap<CallId, Arc<CallZustand>>,
}

impl ChangeFeedProcessor {
    pub fn neu(broadcaster: Broadcaster, config: FeedConfig, metriken: RelayMetrics) -> Self {
        Self {
            inner: Arc::new(ChangeFeedProcessorInner {
                broadcaster,
                config,
                metriken,
                calls: DashMap::new(),
            }),
        }
    }

    /// Startet die Empfangsschleife in einem eigenen Task
    ///
    /// Laeuft bis der Feed geschlossen wird oder `shutdown_rx` ein
    /// `true`-Signal empfaengt.
    pub fn starten(
        self,
        mut feed_rx: broadcast::Receiver<AenderungsEreignis>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Change-Feed-Verarbeitung gestartet");
            loop {
                tokio::select! {
                    empfangen = feed_rx.recv() => {
                        match empfangen {
                            Ok(ereignis) => {
                                self.ereignis_annehmen(ereignis);
                            }
                            Err(broadcast::error::RecvError::Lagged(verpasst)) => {
                                tracing::warn!(verpasst, "Change-Feed ueberholt – Ereignisse verloren");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                tracing::info!("Change-Feed geschlossen");
                                break;
                            }
                        }
                    }

                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Change-Feed-Verarbeitung: Shutdown-Signal empfangen");
                            break;
                        }
                    }
                }
            }
            tracing::info!("Change-Feed-Verarbeitung gestoppt");
        })
    }

    /// Nimmt ein Ereignis an und startet bei Aenderungen einen eigenen Task
    ///
    /// Gibt den Handle des Verarbeitungs-Tasks zurueck, falls einer gestartet wurde.
    pub fn ereignis_annehmen(
        &self,
        ereignis: AenderungsEreignis,
    ) -> Option<JoinHandle<SignalingResult<FeedErgebnis>>> {
        self.inner
            .metriken
            .feed_events_total
            .with_label_values(&[art_label(ereignis.art)])
            .inc();

        match ereignis.art {
            AenderungsArt::Eingefuegt => {
                self.inner.metriken.calls_active.inc();
                None
            }
            AenderungsArt::Entfernt => {
                self.inner.metriken.calls_active.dec();
                self.grabstein_setzen(&ereignis.call_id, ereignis.sequenz);
                None
            }
            AenderungsArt::Geaendert => {
                let verarbeiter = self.clone();
                Some(tokio::spawn(async move {
                    let ergebnis = verarbeiter.verarbeiten(&ereignis).await;
                    if let Err(ref e) = ergebnis {
                        tracing::warn!(
                            call_id = %ereignis.call_id,
                            sequenz = ereignis.sequenz,
                            fehler = %e,
                            "Feed-Ereignis uebersprungen"
                        );
                    }
                    ergebnis
                }))
            }
        }
    }

    /// Verarbeitet ein `Geaendert`-Ereignis vollstaendig
    ///
    /// Die Sendesperre des Calls wird bis zum Ende des Fan-outs gehalten.
    pub async fn verarbeiten(&self, ereignis: &AenderungsEreignis) -> SignalingResult<FeedErgebnis> {
        if !ereignis.ist_aktualisierung() {
            return Err(SignalingError::intern(format!(
                "Ereignis {} ist keine Aenderung",
                ereignis.sequenz
            )));
        }

        let call = match self.abbild_dekodieren(ereignis) {
            Ok(call) => call,
            Err(e) => {
                self.inner.metriken.invalid_records_total.inc();
                return Err(e);
            }
        };

        let zustand = self.zustand(&call.id);
        let _sperre = zustand.senden.lock().await;

        if !wasserstand_anheben(&zustand, ereignis.sequenz) {
            tracing::debug!(
                call_id = %call.id,
                sequenz = ereignis.sequenz,
                "Veraltetes Ereignis verworfen"
            );
            return Ok(FeedErgebnis::Veraltet);
        }

        let sendungen = self.nachrichten_bauen(&call)?;
        tracing::debug!(
            call_id = %call.id,
            sequenz = ereignis.sequenz,
            empfaenger = sendungen.len(),
            "Update wird verteilt"
        );

        let bericht = self.inner.broadcaster.einzeln_senden(sendungen).await;
        Ok(FeedErgebnis::Verteilt(bericht))
    }

    /// Baut pro Teilnehmer die Update-Nachricht
    pub fn nachrichten_bauen(&self, call: &Call) -> SignalingResult<Vec<(ConnectionId, Bytes)>> {
        if self.inner.config.eigenen_eintrag_senden {
            let payload = update_kodieren(call.participants.iter())?;
            return Ok(call
                .connection_ids()
                .into_iter()
                .map(|id| (id, payload.clone()))
                .collect());
        }

        call.participants
            .iter()
            .map(|empfaenger| {
                let andere = call
                    .participants
                    .iter()
                    .filter(|p| p.connection_id != empfaenger.connection_id);
                Ok((empfaenger.connection_id.clone(), update_kodieren(andere)?))
            })
            .collect()
    }

    /// Anzahl der lebenden Calls mit gespeichertem Wasserstand
    pub fn verfolgte_calls(&self) -> usize {
        self.inner
            .calls
            .iter()
            .filter(|eintrag| eintrag.stand.lock().entfernt_seit.is_none())
            .count()
    }

    /// Anzahl der Grabsteine geloeschter Calls
    pub fn grabstein_anzahl(&self) -> usize {
        self.inner.calls.len().saturating_sub(self.verfolgte_calls())
    }

    /// Entfernt Grabsteine die aelter als `mindestalter` sind
    pub fn grabsteine_bereinigen(&self, mindestalter: Duration) -> usize {
        let vorher = self.inner.calls.len();
        self.inner.calls.retain(|_, zustand| {
            !matches!(
                zustand.stand.lock().entfernt_seit,
                Some(seit) if seit.elapsed() >= mindestalter
            )
        });
        let entfernt = vorher.saturating_sub(self.inner.calls.len());
        if entfernt > 0 {
            tracing::debug!(entfernt, "Feed-Grabsteine bereinigt");
        }
        entfernt
    }

    fn zustand(&self, call_id: &CallId) -> Arc<CallZustand> {
        self.inner
            .calls
            .entry(call_id.clone())
            .or_insert_with(|| Arc::new(CallZustand::neu()))
            .clone()
    }

    /// Markiert einen Call als geloescht, aeltere Ereignisse gelten danach als veraltet
    fn grabstein_setzen(&self, call_id: &CallId, sequenz: u64) {
        let zustand = self.zustand(call_id);
        let mut stand = zustand.stand.lock();
        stand.sequenz = stand.sequenz.max(sequenz);
        stand.entfernt_seit = Some(Instant::now());
    }

    fn abbild_dekodieren(&self, ereignis: &AenderungsEreignis) -> SignalingResult<Call> {
        let abbild = ereignis.neues_abbild.as_ref().ok_or_else(|| {
            SignalingError::UngueltigerDatensatz(format!(
                "Ereignis {} ohne Abbild",
                ereignis.sequenz
            ))
        })?;
        let call = Call::aus_abbild(abbild)
            .map_err(|e| SignalingError::UngueltigerDatensatz(e.to_string()))?;
        if call.id != ereignis.call_id {
            return Err(SignalingError::UngueltigerDatensatz(format!(
                "Abbild gehoert zu {}, Ereignis zu {}",
                call.id, ereignis.call_id
            )));
        }
        Ok(call)
    }
}

/// Setzt den Wasserstand auf `sequenz`, falls diese neuer ist
///
/// Gibt `false` zurueck wenn bereits ein neueres Ereignis verteilt oder der
/// Call danach geloescht wurde. Ein neueres Ereignis nach einem Grabstein
/// gehoert zu einem neu angelegten Call mit derselben ID.
fn wasserstand_anheben(zustand: &CallZustand, sequenz: u64) -> bool {
    let mut stand = zustand.stand.lock();
    if stand.sequenz >= sequenz {
        return false;
    }
    stand.sequenz = sequenz;
    stand.entfernt_seit = None;
    true
}

fn update_kodieren<'a>(eintraege: impl Iterator<Item = &'a PeerRecord>) -> SignalingResult<Bytes> {
    let nachricht = UpdateNachricht::neu(eintraege.map(SignalEintrag::from).collect());
    let json = nachricht
        .zu_json()
        .map_err(|e| SignalingError::intern(format!("Update-Serialisierung: {e}")))?;
    Ok(Bytes::from(json))
}

fn art_label(art: AenderungsArt) -> &'static str {
    match art {
        AenderungsArt::Eingefuegt => "eingefuegt",
        AenderungsArt::Geaendert => "geaendert",
        AenderungsArt::Entfernt => "entfernt",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
