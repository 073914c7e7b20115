//! Gemeinsame Test-Hilfen fuer die Signaling-Integrationstests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use callrelay_core::ConnectionId;
use callrelay_observability::RelayMetrics;
use callrelay_protocol::{SignalEintrag, UpdateNachricht};
use callrelay_signaling::{
    Broadcaster, CallSessionManager, ChangeFeedProcessor, ConnectionGateway, FeedConfig,
    GatewayError, SessionConfig,
};
use callrelay_store::{ChangeFeedQuelle, MemoryCallStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn cid(s: &str) -> ConnectionId {
    ConnectionId::parse(s).unwrap()
}

/// Gateway das alle Zustellungen aufzeichnet und ausgewaehlte Verbindungen scheitern laesst
#[derive(Default)]
pub struct AufzeichnendesGateway {
    pub scheitert: Mutex<HashSet<ConnectionId>>,
    pub empfangen: Mutex<Vec<(ConnectionId, Bytes)>>,
}

impl AufzeichnendesGateway {
    pub fn scheitern_lassen(&self, id: &str) {
        self.scheitert.lock().unwrap().insert(cid(id));
    }

    /// Entnimmt alle bisher aufgezeichneten Updates
    pub fn updates_entnehmen(&self) -> Vec<(ConnectionId, Vec<SignalEintrag>)> {
        self.empfangen
            .lock()
            .unwrap()
            .drain(..)
            .map(|(id, payload)| {
                let nachricht: UpdateNachricht = serde_json::from_slice(&payload).unwrap();
                assert_eq!(nachricht.action, "update");
                (id, nachricht.data)
            })
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.empfangen.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionGateway for AufzeichnendesGateway {
    async fn senden(&self, connection_id: &ConnectionId, payload: Bytes) -> Result<(), GatewayError> {
        if self.scheitert.lock().unwrap().contains(connection_id) {
            return Err(GatewayError::Getrennt(connection_id.clone()));
        }
        self.empfangen
            .lock()
            .unwrap()
            .push((connection_id.clone(), payload));
        Ok(())
    }
}

/// Komplett verdrahtete Pipeline: Store -> Feed -> Broadcaster -> Gateway
pub struct Pipeline {
    pub store: MemoryCallStore,
    pub manager: Arc<CallSessionManager>,
    pub gateway: Arc<AufzeichnendesGateway>,
    pub metriken: RelayMetrics,
    pub feed: ChangeFeedProcessor,
    shutdown_tx: watch::Sender<bool>,
    feed_task: JoinHandle<()>,
}

impl Pipeline {
    pub fn starten(feed_config: FeedConfig) -> Self {
        let store = MemoryCallStore::neu();
        let metriken = RelayMetrics::neu().unwrap();
        let gateway = Arc::new(AufzeichnendesGateway::default());
        let manager = Arc::new(CallSessionManager::neu(
            Arc::new(store.clone()),
            SessionConfig::default(),
        ));

        let broadcaster = Broadcaster::neu(gateway.clone(), metriken.clone());
        let processor = ChangeFeedProcessor::neu(broadcaster, feed_config, metriken.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let feed_task = processor
            .clone()
            .starten(store.aenderungen_abonnieren(), shutdown_rx);

        Self {
            store,
            manager,
            gateway,
            metriken,
            feed: processor,
            shutdown_tx,
            feed_task,
        }
    }

    /// Wartet bis mindestens `anzahl` Zustellungen aufgezeichnet sind
    pub async fn auf_zustellungen_warten(&self, anzahl: usize) {
        let ergebnis = tokio::time::timeout(Duration::from_secs(5), async {
            while self.gateway.anzahl() < anzahl {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            ergebnis.is_ok(),
            "Erwartete {anzahl} Zustellungen, erhalten: {}",
            self.gateway.anzahl()
        );
    }

    pub async fn stoppen(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.feed_task.await;
    }
}
