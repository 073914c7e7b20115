//! Prometheus-kompatible Metriken fuer den Call-Relay
//!
//! Registrierte Metriken:
//! - `callrelay_connected_clients` – Gauge: Aktuell verbundene WebSocket-Clients
//! - `callrelay_calls_created_total` – Counter: Angelegte Calls
//! - `callrelay_calls_joined_total` – Counter: Erfolgreiche Beitritte
//! - `callrelay_calls_left_total` – Counter: Erfolgreiche Austritte
//! - `callrelay_calls_active` – Gauge: Gespeicherte Calls laut Change-Feed
//! - `callrelay_conflicts_total` – Counter: Versionskonflikte beim Schreiben
//! - `callrelay_feed_events_total` – Counter: Feed-Ereignisse (art)
//! - `callrelay_invalid_records_total` – Counter: Nicht dekodierbare Feed-Abbilder
//! - `callrelay_deliveries_total` – Counter: Zustellversuche (ergebnis)
//! - `callrelay_fanout_duration_seconds` – Histogram: Dauer eines Fan-outs
//! - `callrelay_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `callrelay_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Call-Relay-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Metrik-Handles.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    // Verbindungen und Calls
    pub connected_clients: IntGauge,
    pub calls_created_total: IntCounter,
    pub calls_joined_total: IntCounter,
    pub calls_left_total: IntCounter,
    pub calls_active: IntGauge,
    pub conflicts_total: IntCounter,

    // Change-Feed und Fan-out
    pub feed_events_total: IntCounterVec,
    pub invalid_records_total: IntCounter,
    pub deliveries_total: IntCounterVec,
    pub fanout_duration_seconds: Histogram,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Verbindungen und Calls ---
        let connected_clients = IntGauge::with_opts(Opts::new(
            "callrelay_connected_clients",
            "Anzahl aktuell verbundener WebSocket-Clients",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let calls_created_total = IntCounter::with_opts(Opts::new(
            "callrelay_calls_created_total",
            "Gesamtanzahl angelegter Calls",
        ))?;
        registry.register(Box::new(calls_created_total.clone()))?;

        let calls_joined_total = IntCounter::with_opts(Opts::new(
            "callrelay_calls_joined_total",
            "Gesamtanzahl erfolgreicher Call-Beitritte",
        ))?;
        registry.register(Box::new(calls_joined_total.clone()))?;

        let calls_left_total = IntCounter::with_opts(Opts::new(
            "callrelay_calls_left_total",
            "Gesamtanzahl erfolgreicher Call-Austritte",
        ))?;
        registry.register(Box::new(calls_left_total.clone()))?;

        let calls_active = IntGauge::with_opts(Opts::new(
            "callrelay_calls_active",
            "Anzahl gespeicherter Calls laut Change-Feed",
        ))?;
        registry.register(Box::new(calls_active.clone()))?;

        let conflicts_total = IntCounter::with_opts(Opts::new(
            "callrelay_conflicts_total",
            "Versionskonflikte bei bedingten Schreibzugriffen",
        ))?;
        registry.register(Box::new(conflicts_total.clone()))?;

        // --- Change-Feed und Fan-out ---
        let feed_events_total = IntCounterVec::new(
            Opts::new(
                "callrelay_feed_events_total",
                "Vom Change-Feed empfangene Ereignisse",
            ),
            &["art"],
        )?;
        registry.register(Box::new(feed_events_total.clone()))?;

        let invalid_records_total = IntCounter::with_opts(Opts::new(
            "callrelay_invalid_records_total",
            "Feed-Abbilder die nicht dekodiert werden konnten",
        ))?;
        registry.register(Box::new(invalid_records_total.clone()))?;

        let deliveries_total = IntCounterVec::new(
            Opts::new(
                "callrelay_deliveries_total",
                "Zustellversuche an Verbindungen",
            ),
            &["ergebnis"],
        )?;
        registry.register(Box::new(deliveries_total.clone()))?;

        let fanout_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "callrelay_fanout_duration_seconds",
                "Dauer eines Fan-outs an alle Empfaenger in Sekunden",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )?;
        registry.register(Box::new(fanout_duration_seconds.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new("callrelay_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "callrelay_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            calls_created_total,
            calls_joined_total,
            calls_left_total,
            calls_active,
            conflicts_total,
            feed_events_total,
            invalid_records_total,
            deliveries_total,
            fanout_duration_seconds,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Zaehlt einen Zustellversuch (`ok` oder `fehler`)
    pub fn zustellung_zaehlen(&self, erfolgreich: bool) {
        let ergebnis = if erfolgreich { "ok" } else { "fehler" };
        self.deliveries_total.with_label_values(&[ergebnis]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RelayMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
