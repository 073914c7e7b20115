//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use callrelay_signaling::{FeedConfig, SessionConfig, SignalingConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen (HTTP/WebSocket)
    pub netzwerk: NetzwerkEinstellungen,
    /// Lebensdauer und Store-Zugriff von Calls
    pub anrufe: AnrufEinstellungen,
    /// Fan-out an die Teilnehmer
    pub broadcast: BroadcastEinstellungen,
    /// Change-Feed-Verarbeitung
    pub feed: FeedEinstellungen,
    /// In-Memory-Speicher
    pub speicher: SpeicherEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers (nur fuer Logs)
    pub name: String,
    /// Maximale Anzahl gleichzeitiger WebSocket-Verbindungen
    pub max_clients: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Call-Relay".into(),
            max_clients: 10_000,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer HTTP und WebSocket
    pub bind_adresse: String,
    /// Port fuer HTTP und WebSocket
    pub port: u16,
    /// Pfad des WebSocket-Endpunkts
    pub ws_pfad: String,
    /// Keepalive-Ping-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Verbindungen ohne Lebenszeichen werden nach dieser Zeit getrennt
    pub verbindungs_timeout_sek: u64,
    /// Maximale Groesse eines eingehenden Frames
    pub max_frame_bytes: usize,
    /// Groesse der ausgehenden Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// CORS-Origins (leer = alle erlaubt)
    pub cors_origins: Vec<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        let signaling = SignalingConfig::default();
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8080,
            ws_pfad: callrelay_signaling::WS_PFAD.into(),
            keepalive_sek: signaling.keepalive_sek,
            verbindungs_timeout_sek: signaling.verbindungs_timeout_sek,
            max_frame_bytes: signaling.max_frame_bytes,
            send_queue_groesse: signaling.send_queue_groesse,
            cors_origins: vec![],
        }
    }
}

/// Lebensdauer und Store-Zugriff von Calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnrufEinstellungen {
    /// Lebensdauer eines Calls ab Erstellung in Stunden
    pub ttl_stunden: u64,
    /// Maximale Anzahl ID-Kollisionen bevor `createCall` aufgibt
    pub max_id_kollisionen: u32,
    /// Zeitlimit pro Store-Aufruf in Millisekunden
    pub store_zeitlimit_ms: u64,
    /// Zusaetzliche Versuche bei voruebergehenden Store-Fehlern
    pub store_wiederholungen: u32,
    /// Basis-Wartezeit zwischen Versuchen in Millisekunden
    pub backoff_ms: u64,
}

impl Default for AnrufEinstellungen {
    fn default() -> Self {
        Self {
            ttl_stunden: 24,
            max_id_kollisionen: 16,
            store_zeitlimit_ms: 2_000,
            store_wiederholungen: 3,
            backoff_ms: 25,
        }
    }
}

/// Fan-out an die Teilnehmer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastEinstellungen {
    /// Maximale gleichzeitige Zustellungen pro Update
    pub max_parallel: usize,
    /// Zeitlimit pro Zustellung in Millisekunden
    pub gateway_zeitlimit_ms: u64,
}

impl Default for BroadcastEinstellungen {
    fn default() -> Self {
        Self {
            max_parallel: callrelay_signaling::broadcast::MAX_PARALLEL,
            gateway_zeitlimit_ms: callrelay_signaling::broadcast::GATEWAY_ZEITLIMIT.as_millis()
                as u64,
        }
    }
}

/// Change-Feed-Verarbeitung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedEinstellungen {
    /// Empfaenger bekommen auch ihren eigenen Eintrag
    pub eigenen_eintrag_senden: bool,
    /// Puffergroesse des Change-Feeds (Ereignisse)
    pub puffer_groesse: usize,
}

impl Default for FeedEinstellungen {
    fn default() -> Self {
        Self {
            eigenen_eintrag_senden: false,
            puffer_groesse: 1024,
        }
    }
}

/// In-Memory-Speicher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeicherEinstellungen {
    /// Intervall fuer das Entfernen abgelaufener Calls in Sekunden (0 = aus)
    pub ttl_sweep_intervall_sek: u64,
}

impl Default for SpeicherEinstellungen {
    fn default() -> Self {
        Self {
            ttl_sweep_intervall_sek: 60,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die Bind-Adresse fuer HTTP/WebSocket zurueck
    pub fn http_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            call_ttl: Duration::from_secs(self.anrufe.ttl_stunden * 3600),
            max_id_kollisionen: self.anrufe.max_id_kollisionen,
            store_zeitlimit: Duration::from_millis(self.anrufe.store_zeitlimit_ms),
            store_wiederholungen: self.anrufe.store_wiederholungen,
            backoff: Duration::from_millis(self.anrufe.backoff_ms),
        }
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            max_clients: self.server.max_clients,
            keepalive_sek: self.netzwerk.keepalive_sek,
            verbindungs_timeout_sek: self.netzwerk.verbindungs_timeout_sek,
            send_queue_groesse: self.netzwerk.send_queue_groesse,
            max_frame_bytes: self.netzwerk.max_frame_bytes,
        }
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            eigenen_eintrag_senden: self.feed.eigenen_eintrag_senden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_clients, 10_000);
        assert_eq!(cfg.netzwerk.port, 8080);
        assert_eq!(cfg.netzwerk.ws_pfad, "/ws");
        assert_eq!(cfg.anrufe.ttl_stunden, 24);
        assert!(!cfg.feed.eigenen_eintrag_senden);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_bind_adresse(), "0.0.0.0:8080");
        assert_eq!(cfg.observability_bind_adresse(), "0.0.0.0:9300");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            max_clients = 100

            [netzwerk]
            port = 9000

            [anrufe]
            ttl_stunden = 2
            store_wiederholungen = 0

            [feed]
            eigenen_eintrag_senden = true
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.max_clients, 100);
        assert_eq!(cfg.netzwerk.port, 9000);
        assert!(cfg.feed.eigenen_eintrag_senden);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.ws_pfad, "/ws");
        assert_eq!(cfg.anrufe.max_id_kollisionen, 16);

        let session = cfg.session_config();
        assert_eq!(session.call_ttl, Duration::from_secs(7200));
        assert_eq!(session.store_wiederholungen, 0);
        assert!(cfg.feed_config().eigenen_eintrag_senden);
        assert_eq!(cfg.signaling_config().max_clients, 100);
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ServerConfig::laden("/gibt/es/nicht/callrelay.toml").unwrap();
        assert_eq!(cfg.netzwerk.port, 8080);
    }

    #[test]
    fn kaputte_datei_ist_ein_fehler() {
        let pfad = std::env::temp_dir().join(format!("callrelay-test-{}.toml", std::process::id()));
        std::fs::write(&pfad, "[netzwerk\nport = ").unwrap();
        let ergebnis = ServerConfig::laden(pfad.to_str().unwrap());
        let _ = std::fs::remove_file(&pfad);
        assert!(ergebnis.is_err());
    }
}
