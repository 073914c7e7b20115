//! Integration-Tests: Zustandsuebergaenge von Calls und Fan-out

mod common;

use bytes::Bytes;
use async_trait::async_trait;
use callrelay_core::{Call, CallId, PeerRecord};
use callrelay_observability::RelayMetrics;
use callrelay_protocol::ErrorCode;
use callrelay_signaling::{
    ActionDispatcher, Broadcaster, CallSessionManager, DispatcherContext, PresenceManager,
    SessionConfig, SignalingError, VerlassenErgebnis,
};
use callrelay_store::{CallStore, GespeicherterCall, MemoryCallStore, StoreResult, Version};
use common::{cid, AufzeichnendesGateway};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn manager(store: &MemoryCallStore) -> CallSessionManager {
    CallSessionManager::neu(Arc::new(store.clone()), SessionConfig::default())
}

fn peer(id: &str, kind: &str) -> PeerRecord {
    PeerRecord::neu(cid(id), kind, format!("sdp-{id}")).unwrap()
}

fn teilnehmer(call: &callrelay_core::Call) -> Vec<String> {
    call.connection_ids()
        .iter()
        .map(|c| c.as_str().to_string())
        .collect()
}

#[tokio::test]
async fn erstellte_ids_kollidieren_nie_mit_lebenden_calls() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);

    let mut ids = HashSet::new();
    for _ in 0..200 {
        let id = m.anruf_erstellen().await.unwrap();
        assert!(ids.insert(id));
    }
    assert_eq!(store.anzahl(), 200);
}

#[tokio::test]
async fn kollidierende_id_wird_neu_gezogen() {
    let store = MemoryCallStore::neu();
    let zaehler = Arc::new(AtomicUsize::new(0));
    let z = zaehler.clone();
    // Die ersten drei Ziehungen liefern dieselbe ID
    let m = manager(&store).mit_id_quelle(move || {
        let n = z.fetch_add(1, Ordering::SeqCst);
        if n < 3 {
            "aaaaaa".to_string()
        } else {
            format!("b{n:05}")
        }
    });

    let erste = m.anruf_erstellen().await.unwrap();
    assert_eq!(erste.as_str(), "aaaaaa");

    let zweite = m.anruf_erstellen().await.unwrap();
    assert_ne!(zweite, erste);
    assert_eq!(zweite.as_str(), "b00003");
    assert_eq!(store.anzahl(), 2);
}

#[tokio::test]
async fn erschoepfter_id_raum_wird_gemeldet() {
    let store = MemoryCallStore::neu();
    let m = manager(&store).mit_id_quelle(|| "aaaaaa".to_string());

    m.anruf_erstellen().await.unwrap();
    let fehler = m.anruf_erstellen().await.unwrap_err();
    assert!(matches!(fehler, SignalingError::IdRaumErschoepft { .. }));
}

#[tokio::test]
async fn beitritt_haengt_an_und_erhaelt_reihenfolge() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);
    let id = m.anruf_erstellen().await.unwrap();

    let namen = ["c1", "c2", "c3", "c4"];
    for (n, name) in namen.iter().enumerate() {
        let vorher = m.anruf_laden(&id).await.unwrap();
        assert_eq!(vorher.teilnehmer_anzahl(), n);

        let nachher = m.anruf_beitreten(&id, peer(name, "offer")).await.unwrap();
        assert_eq!(nachher.teilnehmer_anzahl(), n + 1);
        assert_eq!(teilnehmer(&nachher), namen[..=n]);
        assert_eq!(teilnehmer(&nachher)[..n], teilnehmer(&vorher)[..]);
    }
}

#[tokio::test]
async fn doppelter_beitritt_aendert_nichts() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);
    let id = m.anruf_erstellen().await.unwrap();
    m.anruf_beitreten(&id, peer("c1", "offer")).await.unwrap();
    let vorher = store.laden(&id).await.unwrap().unwrap();

    let fehler = m
        .anruf_beitreten(&id, peer("c1", "answer"))
        .await
        .unwrap_err();
    assert!(matches!(fehler, SignalingError::BereitsBeigetreten { .. }));
    assert_eq!(fehler.code(), ErrorCode::AlreadyJoined);

    let nachher = store.laden(&id).await.unwrap().unwrap();
    assert_eq!(nachher, vorher);
    assert_eq!(nachher.call.participants[0].kind, "offer");
}

#[tokio::test]
async fn letzter_austritt_loescht_den_call() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);
    let id = m.anruf_erstellen().await.unwrap();
    m.anruf_beitreten(&id, peer("c1", "offer")).await.unwrap();

    let ergebnis = m.anruf_verlassen(&id, &cid("c1")).await.unwrap();
    assert_eq!(ergebnis, VerlassenErgebnis::CallGeloescht);

    let fehler = m.anruf_laden(&id).await.unwrap_err();
    assert!(matches!(fehler, SignalingError::NichtGefunden(_)));
    assert_eq!(store.anzahl(), 0);
}

#[tokio::test]
async fn verlassen_ohne_teilnahme_ist_idempotent() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);
    let id = m.anruf_erstellen().await.unwrap();
    m.anruf_beitreten(&id, peer("c1", "offer")).await.unwrap();
    let vorher = store.laden(&id).await.unwrap().unwrap();

    for _ in 0..3 {
        let ergebnis = m.anruf_verlassen(&id, &cid("fremd")).await.unwrap();
        assert_eq!(ergebnis, VerlassenErgebnis::KeinTeilnehmer);
    }

    // Keine Schreiboperation: auch die Version ist unveraendert
    let nachher = store.laden(&id).await.unwrap().unwrap();
    assert_eq!(nachher, vorher);
}

#[tokio::test]
async fn leerer_call_bleibt_bis_zum_ablauf_bestehen() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);
    let id = m.anruf_erstellen().await.unwrap();

    let ergebnis = m.anruf_verlassen(&id, &cid("c1")).await.unwrap();
    assert_eq!(ergebnis, VerlassenErgebnis::KeinTeilnehmer);
    assert!(m.anruf_laden(&id).await.unwrap().ist_leer());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallele_beitritte_enden_mit_beiden_teilnehmern() {
    for _ in 0..50 {
        let store = MemoryCallStore::neu();
        let m = Arc::new(manager(&store));
        let dispatcher = Arc::new(ActionDispatcher::neu(
            m.clone(),
            PresenceManager::neu(),
            RelayMetrics::neu().unwrap(),
        ));
        let id = m.anruf_erstellen().await.unwrap();

        let beitreten = |conn: &'static str| {
            let d = dispatcher.clone();
            let text = format!(
                r#"{{"action":"joinCall","call_id":"{}","kind":"offer","payload":"sdp-{conn}"}}"#,
                id.as_str()
            );
            tokio::spawn(async move {
                let ctx = DispatcherContext {
                    connection_id: cid(conn),
                };
                d.dispatch_text(&text, &ctx).await
            })
        };

        let (a, b) = tokio::join!(beitreten("c1"), beitreten("c2"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(!a.ist_fehler(), "{a:?}");
        assert!(!b.ist_fehler(), "{b:?}");

        let call = m.anruf_laden(&id).await.unwrap();
        let mut ids = teilnehmer(&call);
        ids.sort();
        assert_eq!(ids, ["c1", "c2"]);
    }
}

#[tokio::test]
async fn konkurrierende_schreibvorgaenge_ohne_wiederholung_melden_konflikt() {
    let store = MemoryCallStore::neu();
    let m = manager(&store);
    let id = m.anruf_erstellen().await.unwrap();

    // Zwei Leser mit derselben Version, nur einer gewinnt
    let gelesen = store.laden(&id).await.unwrap().unwrap();
    let mut erster = gelesen.call.clone();
    erster.teilnehmer_hinzufuegen(peer("c1", "offer"));
    let mut zweiter = gelesen.call.clone();
    zweiter.teilnehmer_hinzufuegen(peer("c2", "offer"));

    store
        .bedingt_aktualisieren(&erster, gelesen.version)
        .await
        .unwrap();
    let fehler = store
        .bedingt_aktualisieren(&zweiter, gelesen.version)
        .await
        .unwrap_err();
    assert_eq!(SignalingError::from(fehler).code(), ErrorCode::Conflict);
    assert_eq!(teilnehmer(&m.anruf_laden(&id).await.unwrap()), ["c1"]);
}

/// Store der zwischen Lesen und bedingtem Loeschen einen Beitritt von `c2` festschreibt
struct EinmischenderStore {
    inner: MemoryCallStore,
    eingemischt: AtomicBool,
}

#[async_trait]
impl CallStore for EinmischenderStore {
    async fn laden(&self, id: &CallId) -> StoreResult<Option<GespeicherterCall>> {
        self.inner.laden(id).await
    }
    async fn erstellen(&self, call: &Call) -> StoreResult<Version> {
        self.inner.erstellen(call).await
    }
    async fn bedingt_aktualisieren(&self, call: &Call, erwartet: Version) -> StoreResult<Version> {
        self.inner.bedingt_aktualisieren(call, erwartet).await
    }
    async fn bedingt_loeschen(&self, id: &CallId, erwartet: Version) -> StoreResult<()> {
        if !self.eingemischt.swap(true, Ordering::SeqCst) {
            if let Some(GespeicherterCall { mut call, version }) = self.inner.laden(id).await? {
                call.teilnehmer_hinzufuegen(peer("c2", "answer"));
                self.inner.bedingt_aktualisieren(&call, version).await?;
            }
        }
        self.inner.bedingt_loeschen(id, erwartet).await
    }
}

/// Call mit `c1` als einzigem Teilnehmer hinter einem einmischenden Store
async fn call_mit_einmischung() -> (Arc<EinmischenderStore>, CallId) {
    let inner = MemoryCallStore::neu();
    let m = manager(&inner);
    let id = m.anruf_erstellen().await.unwrap();
    m.anruf_beitreten(&id, peer("c1", "offer")).await.unwrap();

    let store = Arc::new(EinmischenderStore {
        inner,
        eingemischt: AtomicBool::new(false),
    });
    (store, id)
}

#[tokio::test]
async fn letzter_austritt_verliert_gegen_parallelen_beitritt() {
    let (store, id) = call_mit_einmischung().await;
    let m = CallSessionManager::neu(store.clone(), SessionConfig::default());

    let fehler = m.anruf_verlassen(&id, &cid("c1")).await.unwrap_err();
    assert!(matches!(fehler, SignalingError::Konflikt(_)));
    // Der Call wurde nicht geloescht, der neue Teilnehmer bleibt
    assert_eq!(teilnehmer(&m.anruf_laden(&id).await.unwrap()), ["c1", "c2"]);

    let ergebnis = m.anruf_verlassen(&id, &cid("c1")).await.unwrap();
    assert_eq!(ergebnis, VerlassenErgebnis::Entfernt { verbleibend: 1 });
    assert_eq!(teilnehmer(&m.anruf_laden(&id).await.unwrap()), ["c2"]);
}

#[tokio::test]
async fn leave_call_wiederholt_nach_verlorenem_loeschrennen() {
    let (store, id) = call_mit_einmischung().await;
    let m = Arc::new(CallSessionManager::neu(store.clone(), SessionConfig::default()));
    let metriken = RelayMetrics::neu().unwrap();
    let dispatcher = ActionDispatcher::neu(m.clone(), PresenceManager::neu(), metriken.clone());

    let ctx = DispatcherContext {
        connection_id: cid("c1"),
    };
    let text = format!(r#"{{"action":"leaveCall","call_id":"{}"}}"#, id.as_str());
    let antwort = dispatcher.dispatch_text(&text, &ctx).await;

    assert!(!antwort.ist_fehler(), "{antwort:?}");
    assert!(store.eingemischt.load(Ordering::SeqCst));
    assert_eq!(metriken.conflicts_total.get(), 1);
    assert_eq!(teilnehmer(&m.anruf_laden(&id).await.unwrap()), ["c2"]);
}

#[tokio::test]
async fn fehlgeschlagene_empfaenger_blockieren_die_anderen_nicht() {
    let gateway = Arc::new(AufzeichnendesGateway::default());
    gateway.scheitern_lassen("c2");
    gateway.scheitern_lassen("c4");
    let broadcaster = Broadcaster::neu(gateway.clone(), RelayMetrics::neu().unwrap());

    let empfaenger: Vec<_> = ["c1", "c2", "c3", "c4", "c5"].iter().map(|s| cid(s)).collect();
    let bericht = broadcaster
        .senden(&empfaenger, Bytes::from_static(b"{\"action\":\"update\",\"data\":[]}"))
        .await;

    assert_eq!(bericht.versuche(), 5);
    assert!(!bericht.alle_zugestellt());

    let mut zugestellt: Vec<_> = bericht.zugestellt.iter().map(|c| c.as_str()).collect();
    zugestellt.sort();
    assert_eq!(zugestellt, ["c1", "c3", "c5"]);

    let mut fehlgeschlagen: Vec<_> = bericht
        .fehlgeschlagen
        .iter()
        .map(|(c, _)| c.as_str())
        .collect();
    fehlgeschlagen.sort();
    assert_eq!(fehlgeschlagen, ["c2", "c4"]);

    assert_eq!(gateway.updates_entnehmen().len(), 3);
}

#[tokio::test]
async fn ungueltige_call_id_wird_abgelehnt() {
    assert!(CallId::parse("").is_err());
    let store = MemoryCallStore::neu();
    let m = manager(&store).mit_id_quelle(|| "kein gueltiger wert!".to_string());
    let fehler = m.anruf_erstellen().await.unwrap_err();
    assert!(matches!(fehler, SignalingError::Intern(_)));
    assert_eq!(store.anzahl(), 0);
}
