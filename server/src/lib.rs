//! callrelay-server – Bibliotheks-Root
//!
//! Verdrahtet Speicher, Change-Feed, Broadcaster und WebSocket-Seite zu
//! einem lauffaehigen Server und stellt den Einstiegspunkt fuer Tests bereit.

pub mod config;

use anyhow::Result;
use axum::http::{HeaderValue, Method};
use axum::Router;
use callrelay_observability::{
    observability_router, request_timing_layer, timing_middleware, HealthState, RelayMetrics,
};
use callrelay_signaling::{
    ws_router, Broadcaster, CallSessionManager, ChangeFeedProcessor, PresenceManager,
    SignalingState, VerbindungsRegister, GRABSTEIN_HALTEZEIT,
};
use callrelay_store::{ChangeFeedQuelle, MemoryCallStore};
use config::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

/// Alle zur Laufzeit geteilten Dienste
pub struct Dienste {
    pub store: MemoryCallStore,
    pub register: VerbindungsRegister,
    pub metriken: RelayMetrics,
    pub health: HealthState,
    pub state: Arc<SignalingState>,
    feed: ChangeFeedProcessor,
}

impl Dienste {
    /// Baut alle Dienste aus der Konfiguration auf
    ///
    /// Der Broadcaster stellt ueber dasselbe `VerbindungsRegister` zu, in
    /// dem sich die WebSocket-Verbindungen registrieren.
    pub fn aufbauen(config: &ServerConfig, shutdown_rx: watch::Receiver<bool>) -> Result<Self> {
        let metriken = RelayMetrics::neu()?;
        let health = HealthState::neu();
        let store = MemoryCallStore::mit_feed_groesse(config.feed.puffer_groesse);
        let register = VerbindungsRegister::mit_queue_groesse(config.netzwerk.send_queue_groesse);

        // Bis zum ersten Store-Aufruf gilt der Speicher als erreichbar
        health.store_status_setzen(true);
        let manager = Arc::new(
            CallSessionManager::neu(Arc::new(store.clone()), config.session_config())
                .mit_health(health.clone()),
        );

        let broadcaster = Broadcaster::mit_limits(
            Arc::new(register.clone()),
            metriken.clone(),
            config.broadcast.max_parallel,
            Duration::from_millis(config.broadcast.gateway_zeitlimit_ms),
        );
        let feed = ChangeFeedProcessor::neu(broadcaster, config.feed_config(), metriken.clone());

        let state = SignalingState::neu(
            config.signaling_config(),
            manager,
            register.clone(),
            PresenceManager::neu(),
            metriken.clone(),
            shutdown_rx,
        );

        Ok(Self {
            store,
            register,
            metriken,
            health,
            state,
            feed,
        })
    }

    /// Startet die Change-Feed-Verarbeitung und haelt den Health-Status aktuell
    pub fn feed_starten(&self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let feed_rx = self.store.aenderungen_abonnieren();
        let verarbeitung = self.feed.clone().starten(feed_rx, shutdown_rx);
        let health = self.health.clone();
        health.feed_status_setzen(true);

        tokio::spawn(async move {
            if let Err(e) = verarbeitung.await {
                tracing::error!(fehler = %e, "Change-Feed-Task abgebrochen");
            }
            health.feed_status_setzen(false);
        })
    }

    /// Entfernt regelmaessig abgelaufene Calls aus dem Speicher und alte
    /// Grabsteine aus dem Change-Feed
    pub fn ttl_sweep_starten(
        &self,
        intervall: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let feed = self.feed.clone();
        tokio::spawn(async move {
            let mut takt = tokio::time::interval(intervall);
            takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = takt.tick() => {
                        let entfernt = store.abgelaufene_entfernen(chrono::Utc::now());
                        if entfernt > 0 {
                            tracing::info!(entfernt, "Abgelaufene Calls entfernt");
                        }
                        feed.grabsteine_bereinigen(GRABSTEIN_HALTEZEIT);
                    }
                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("TTL-Sweep gestoppt");
        })
    }

    /// Router fuer WebSocket mit Timing-, Trace- und CORS-Layern
    pub fn http_router(&self, config: &ServerConfig) -> Router {
        ws_router(self.state.clone(), &config.netzwerk.ws_pfad)
            .layer(axum::middleware::from_fn_with_state(
                self.metriken.clone(),
                timing_middleware,
            ))
            .layer(request_timing_layer())
            .layer(cors_layer(&config.netzwerk.cors_origins))
    }

    /// Router fuer `/metrics` und `/health`
    pub fn observability_router(&self) -> Router {
        observability_router(self.metriken.clone(), self.health.clone())
    }
}

/// CORS konfigurieren: entweder spezifische Origins oder Any
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

/// Wartet bis das Shutdown-Signal gesetzt oder der Sender verschwunden ist
async fn shutdown_abwarten(mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Signal-Handler fehlgeschlagen"),
            }
            let _ = shutdown_tx.send(true);
        });

        self.laufen(shutdown_rx).await
    }

    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt
    ///
    /// Reihenfolge:
    /// 1. Dienste aufbauen
    /// 2. Change-Feed-Verarbeitung und TTL-Sweep starten
    /// 3. Observability-Server starten (falls aktiviert)
    /// 4. HTTP/WebSocket-Server bis zum Shutdown betreiben
    pub async fn laufen(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            http = %self.config.http_bind_adresse(),
            ws_pfad = %self.config.netzwerk.ws_pfad,
            "Server startet"
        );

        let dienste = Dienste::aufbauen(&self.config, shutdown_rx.clone())?;
        let feed_task = dienste.feed_starten(shutdown_rx.clone());

        let sweep_task = match self.config.speicher.ttl_sweep_intervall_sek {
            0 => None,
            sek => Some(dienste.ttl_sweep_starten(Duration::from_secs(sek), shutdown_rx.clone())),
        };

        let observability_task = if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse();
            let listener = tokio::net::TcpListener::bind(&adresse).await?;
            tracing::info!(addr = %adresse, "Observability-Server gestartet");
            let app = dienste.observability_router();
            let stopp = shutdown_abwarten(shutdown_rx.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(stopp)
                    .await
                {
                    tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
                }
            }))
        } else {
            None
        };

        let adresse = self.config.http_bind_adresse();
        let listener = tokio::net::TcpListener::bind(&adresse).await?;
        tracing::info!(addr = %adresse, "HTTP/WebSocket-Server gestartet");

        axum::serve(listener, dienste.http_router(&self.config))
            .with_graceful_shutdown(shutdown_abwarten(shutdown_rx))
            .await?;

        let _ = feed_task.await;
        if let Some(task) = sweep_task {
            let _ = task.await;
        }
        if let Some(task) = observability_task {
            let _ = task.await;
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn dienste() -> (Dienste, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Dienste::aufbauen(&ServerConfig::default(), rx).unwrap(), tx)
    }

    #[tokio::test]
    async fn health_ist_degraded_ohne_feed() {
        let (d, _tx) = dienste();
        let antwort = d
            .observability_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::OK);
        assert_eq!(d.health.status(), callrelay_observability::HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn store_aufrufe_aktualisieren_den_health_status() {
        use callrelay_core::ConnectionId;
        use callrelay_signaling::DispatcherContext;

        let (d, _tx) = dienste();
        d.health.store_status_setzen(false);

        let ctx = DispatcherContext {
            connection_id: ConnectionId::parse("c1").unwrap(),
        };
        d.state
            .dispatcher
            .dispatch_text(r#"{"action":"createCall"}"#, &ctx)
            .await;
        assert!(d.health.store_verfuegbar());
    }

    #[tokio::test]
    async fn feed_task_meldet_sich_beim_health_check() {
        let (d, tx) = dienste();
        let task = d.feed_starten(tx.subscribe());
        assert!(d.health.feed_laeuft());

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(!d.health.feed_laeuft());
    }

    #[tokio::test]
    async fn ws_route_liegt_unter_dem_konfigurierten_pfad() {
        let (d, _tx) = dienste();
        let mut config = ServerConfig::default();
        config.netzwerk.ws_pfad = "/signal".into();

        let app = d.http_router(&config);
        let antwort = app
            .clone()
            .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::NOT_FOUND);

        // Ohne Upgrade-Header wird abgelehnt, die Route existiert aber
        let antwort = app
            .oneshot(Request::get("/signal").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(antwort.status().is_client_error());
        assert_ne!(antwort.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_sweep_entfernt_abgelaufene_calls() {
        use callrelay_core::{Call, CallId};
        use callrelay_store::CallStore;

        let (d, tx) = dienste();
        let abgelaufen = Call::neu(
            CallId::parse("alt001").unwrap(),
            chrono::Utc::now() - chrono::Duration::minutes(1),
        );
        d.store.erstellen(&abgelaufen).await.unwrap();
        assert_eq!(d.store.anzahl(), 1);

        let task = d.ttl_sweep_starten(Duration::from_secs(60), tx.subscribe());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(d.store.anzahl(), 0);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_sweep_bereinigt_alte_grabsteine() {
        use callrelay_core::{AenderungsArt, AenderungsEreignis, CallId};

        let (d, tx) = dienste();
        d.feed.ereignis_annehmen(AenderungsEreignis {
            sequenz: 1,
            art: AenderungsArt::Entfernt,
            call_id: CallId::parse("weg001").unwrap(),
            neues_abbild: None,
            zeitpunkt: chrono::Utc::now(),
        });
        assert_eq!(d.feed.grabstein_anzahl(), 1);

        let task = d.ttl_sweep_starten(Duration::from_secs(60), tx.subscribe());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(d.feed.grabstein_anzahl(), 1);

        tokio::time::sleep(GRABSTEIN_HALTEZEIT).await;
        assert_eq!(d.feed.grabstein_anzahl(), 0);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[test]
    fn cors_mit_und_ohne_origins() {
        let _ = cors_layer(&[]);
        let _ = cors_layer(&["https://example.org".to_string()]);
    }
}
