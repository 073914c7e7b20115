//! Broadcaster – Fan-out von Nutzdaten an viele Verbindungen
//!
//! Jede Zustellung ist ein einzelner Versuch ueber das `ConnectionGateway`.
//! Fehler einzelner Empfaenger werden geloggt und im `ZustellBericht`
//! gesammelt, brechen aber die uebrigen Zustellungen nie ab. Es gibt keine
//! Wiederholungen.
//!
//! ## Nebenlaeufigkeit
//! - Hoechstens `max_parallel` Zustellungen gleichzeitig (`buffer_unordered`)
//! - Jede Zustellung ist durch `zeitlimit` begrenzt
//! - Keine Reihenfolge-Garantie zwischen Empfaengern

use bytes::Bytes;
use callrelay_core::ConnectionId;
use callrelay_observability::RelayMetrics;
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::gateway::{ConnectionGateway, GatewayError};

/// Standardwert fuer gleichzeitige Zustellungen
pub const MAX_PARALLEL: usize = 32;

/// Standard-Zeitlimit pro Zustellung
pub const GATEWAY_ZEITLIMIT: Duration = Duration::from_secs(2);

/// Ergebnis eines Fan-outs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ZustellBericht {
    pub zugestellt: Vec<ConnectionId>,
    pub fehlgeschlagen: Vec<(ConnectionId, GatewayError)>,
}

impl ZustellBericht {
    pub fn versuche(&self) -> usize {
        self.zugestellt.len() + self.fehlgeschlagen.len()
    }

    pub fn alle_zugestellt(&self) -> bool {
        self.fehlgeschlagen.is_empty()
    }
}

/// Verteilt Nutzdaten ueber ein `ConnectionGateway`
///
/// Clone teilt das Gateway.
#[derive(Clone)]
pub struct Broadcaster {
    gateway: Arc<dyn ConnectionGateway>,
    max_parallel: usize,
    zeitlimit: Duration,
    metriken: RelayMetrics,
}

impl Broadcaster {
    /// Erstellt einen Broadcaster mit Standardlimits
    pub fn neu(gateway: Arc<dyn ConnectionGateway>, metriken: RelayMetrics) -> Self {
        Self::mit_limits(gateway, metriken, MAX_PARALLEL, GATEWAY_ZEITLIMIT)
    }

    pub fn mit_limits(
        gateway: Arc<dyn ConnectionGateway>,
        metriken: RelayMetrics,
        max_parallel: usize,
        zeitlimit: Duration,
    ) -> Self {
        Self {
            gateway,
            max_parallel: max_parallel.max(1),
            zeitlimit,
            metriken,
        }
    }

    /// Sendet dieselben Nutzdaten an alle angegebenen Verbindungen
    pub async fn senden(&self, connection_ids: &[ConnectionId], payload: Bytes) -> ZustellBericht {
        let sendungen = connection_ids
            .iter()
            .map(|id| (id.clone(), payload.clone()))
            .collect();
        self.einzeln_senden(sendungen).await
    }

    /// Sendet pro Empfaenger eigene Nutzdaten
    pub async fn einzeln_senden(&self, sendungen: Vec<(ConnectionId, Bytes)>) -> ZustellBericht {
        let start = Instant::now();
        let zeitlimit = self.zeitlimit;

        let ergebnisse: Vec<(ConnectionId, Result<(), GatewayError>)> = stream::iter(sendungen)
            .map(|(connection_id, payload)| {
                let gateway = Arc::clone(&self.gateway);
                async move {
                    let ergebnis =
                        match tokio::time::timeout(zeitlimit, gateway.senden(&connection_id, payload))
                            .await
                        {
                            Ok(r) => r,
                            Err(_) => Err(GatewayError::Zeitlimit(connection_id.clone())),
                        };
                    (connection_id, ergebnis)
                }
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        let mut bericht = ZustellBericht::default();
        for (connection_id, ergebnis) in ergebnisse {
            self.metriken.zustellung_zaehlen(ergebnis.is_ok());
            match ergebnis {
                Ok(()) => bericht.zugestellt.push(connection_id),
                Err(fehler) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        fehler = %fehler,
                        "Zustellung fehlgeschlagen"
                    );
                    bericht.fehlgeschlagen.push((connection_id, fehler));
                }
            }
        }

        self.metriken
            .fanout_duration_seconds
            .observe(start.elapsed().as_secs_f64());
        tracing::debug!(
            zugestellt = bericht.zugestellt.len(),
            fehlgeschlagen = bericht.fehlgeschlagen.len(),
            "Fan-out abgeschlossen"
        );
        bericht
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
