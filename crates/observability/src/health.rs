//! Health-Check-Endpunkt fuer den Call-Relay
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Store-/Feed-Zustand

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub store_available: bool,
    pub feed_running: bool,
    pub timestamp: DateTime<Utc>,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    store_available: Arc<AtomicBool>,
    feed_running: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            store_available: Arc::new(AtomicBool::new(true)),
            feed_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn store_verfuegbar(&self) -> bool {
        self.store_available.load(Ordering::Relaxed)
    }

    pub fn store_status_setzen(&self, verfuegbar: bool) {
        self.store_available.store(verfuegbar, Ordering::Relaxed);
    }

    pub fn feed_laeuft(&self) -> bool {
        self.feed_running.load(Ordering::Relaxed)
    }

    pub fn feed_status_setzen(&self, laeuft: bool) {
        self.feed_running.store(laeuft, Ordering::Relaxed);
    }

    /// Leitet den Gesamtstatus aus den Einzelzustaenden ab
    pub fn status(&self) -> HealthStatus {
        match (self.store_verfuegbar(), self.feed_laeuft()) {
            (true, true) => HealthStatus::Healthy,
            (false, _) => HealthStatus::Unhealthy,
            // Ohne Feed funktionieren Aktionen, aber keine Updates
            (true, false) => HealthStatus::Degraded,
        }
    }

    /// Baut die aktuelle Health-Antwort
    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: self.status(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            store_available: self.store_verfuegbar(),
            feed_running: self.feed_laeuft(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();

    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // 200 auch bei degraded (Probe soll nicht failen)
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn health_state_uptime_frisch() {
        let state = HealthState::neu();
        assert!(state.uptime_seconds() < 5);
    }

    #[test]
    fn status_ableitung() {
        let state = HealthState::neu();
        assert_eq!(state.status(), HealthStatus::Degraded);

        state.feed_status_setzen(true);
        assert_eq!(state.status(), HealthStatus::Healthy);

        state.store_status_setzen(false);
        assert_eq!(state.status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn health_response_serialisierung() {
        let state = HealthState::neu();
        state.feed_status_setzen(true);

        let json = serde_json::to_string(&state.antwort()).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"store_available\":true"));
        assert!(json.contains("\"feed_running\":true"));
    }

    #[tokio::test]
    async fn health_endpunkt_unhealthy_ist_503() {
        let state = HealthState::neu();
        state.store_status_setzen(false);

        let antwort = health_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_endpunkt_ok() {
        let state = HealthState::neu();
        state.feed_status_setzen(true);

        let antwort = health_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::OK);
    }
}
