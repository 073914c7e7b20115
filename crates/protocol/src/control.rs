//! Control-Protokoll (WebSocket, JSON)
//!
//! Definiert alle Nachrichten die ueber die WebSocket-Verbindung zwischen
//! Client und Relay ausgetauscht werden.
//!
//! ## Design
//! - Request/Response Pattern: jede Anfrage bekommt genau eine Antwort mit
//!   demselben `action`-Namen (Ausnahme: `ping` -> `pong`)
//! - Server-Pushes (`update`) kommen ohne vorherige Anfrage
//! - Tagged Enums fuer typsichere Nachrichtentypen

use callrelay_core::PeerRecord;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Aktionsnamen
// ---------------------------------------------------------------------------

pub const AKTION_CREATE_CALL: &str = "createCall";
pub const AKTION_JOIN_CALL: &str = "joinCall";
pub const AKTION_LEAVE_CALL: &str = "leaveCall";
pub const AKTION_CONNECTION_ID: &str = "connectionId";
pub const AKTION_PING: &str = "ping";
pub const AKTION_PONG: &str = "pong";
pub const AKTION_UPDATE: &str = "update";
/// Aktionsname fuer Fehler bei nicht lesbaren Anfragen
pub const AKTION_FEHLER: &str = "error";

/// Antworttext nach erfolgreichem Verlassen
pub const TEXT_VERLASSEN: &str = "Successfully Left Call";

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Client-verursacht
    InvalidRequest,
    NotFound,
    AlreadyJoined,
    // Nebenlaeufigkeit
    Conflict,
    UnknownOutcome,
    // Kollaborateure
    IdSpaceExhausted,
    StoreUnavailable,
    GatewayUnavailable,
    // Allgemein
    InternalError,
}

/// Fehlerdetails einer Error-Response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FehlerInfo {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Einem Call beitreten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCallRequest {
    pub call_id: String,
    /// Fehlt die ID, gilt die Verbindung ueber die die Anfrage kam
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(alias = "sdp")]
    pub payload: String,
}

/// Einen Call verlassen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveCallRequest {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// Alle Aktionen die ein Client senden kann
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientAnfrage {
    #[serde(rename = "createCall")]
    CreateCall {},
    #[serde(rename = "joinCall")]
    JoinCall(JoinCallRequest),
    #[serde(rename = "leaveCall")]
    LeaveCall(LeaveCallRequest),
    /// Eigene Connection-ID abfragen
    #[serde(rename = "connectionId")]
    ConnectionId {},
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp_ms: Option<u64>,
    },
}

impl ClientAnfrage {
    /// Parst einen eingehenden Text-Frame
    pub fn aus_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Aktionsname dieser Anfrage
    pub fn aktion(&self) -> &'static str {
        match self {
            Self::CreateCall {} => AKTION_CREATE_CALL,
            Self::JoinCall(_) => AKTION_JOIN_CALL,
            Self::LeaveCall(_) => AKTION_LEAVE_CALL,
            Self::ConnectionId {} => AKTION_CONNECTION_ID,
            Self::Ping { .. } => AKTION_PING,
        }
    }
}

/// Liest nur das `action`-Feld aus einem (evtl. ungueltigen) Frame
///
/// Wird fuer Fehlerantworten genutzt, damit der Client die Antwort seiner
/// Anfrage zuordnen kann.
pub fn aktion_aus_rohtext(text: &str) -> Option<String> {
    let wert: serde_json::Value = serde_json::from_str(text).ok()?;
    wert.get("action")?.as_str().map(str::to_string)
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Antwort-Umschlag fuer alle Anfragen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAntwort {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FehlerInfo>,
}

impl ServerAntwort {
    /// Erfolgreiche Antwort mit Nutzdaten
    pub fn ok(action: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            data: Some(data),
            error: None,
        }
    }

    /// Fehlerantwort
    pub fn fehler(action: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: None,
            error: Some(FehlerInfo {
                code,
                message: message.into(),
            }),
        }
    }

    /// `{action: "createCall", data: {call_id}}`
    pub fn call_erstellt(call_id: &str) -> Self {
        Self::ok(AKTION_CREATE_CALL, serde_json::json!({ "call_id": call_id }))
    }

    /// `{action: "joinCall", data: "Joined Call <connection_id>"}`
    pub fn beigetreten(connection_id: &str) -> Self {
        Self::ok(
            AKTION_JOIN_CALL,
            serde_json::Value::String(format!("Joined Call {connection_id}")),
        )
    }

    /// `{action: "leaveCall", data: "Successfully Left Call"}`
    pub fn verlassen() -> Self {
        Self::ok(
            AKTION_LEAVE_CALL,
            serde_json::Value::String(TEXT_VERLASSEN.to_string()),
        )
    }

    /// `{action: "connectionId", data: {connection_id}}`
    pub fn connection_id(connection_id: &str) -> Self {
        Self::ok(
            AKTION_CONNECTION_ID,
            serde_json::json!({ "connection_id": connection_id }),
        )
    }

    /// `{action: "pong", data: {timestamp_ms, server_ts_ms}}`
    pub fn pong(client_ts_ms: Option<u64>, server_ts_ms: u64) -> Self {
        Self::ok(
            AKTION_PONG,
            serde_json::json!({ "timestamp_ms": client_ts_ms, "server_ts_ms": server_ts_ms }),
        )
    }

    pub fn ist_fehler(&self) -> bool {
        self.error.is_some()
    }

    pub fn zu_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Signaling-Eintrag eines Peers im Update-Push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEintrag {
    pub kind: String,
    pub payload: String,
}

impl From<&PeerRecord> for SignalEintrag {
    fn from(peer: &PeerRecord) -> Self {
        Self {
            kind: peer.kind.clone(),
            payload: peer.payload.clone(),
        }
    }
}

/// Server-Push bei jeder Aenderung der Teilnehmerliste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNachricht {
    pub action: String,
    pub data: Vec<SignalEintrag>,
}

impl UpdateNachricht {
    pub fn neu(data: Vec<SignalEintrag>) -> Self {
        Self {
            action: AKTION_UPDATE.to_string(),
            data,
        }
    }

    pub fn zu_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Begruessung direkt nach dem Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Willkommen {
    pub message: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

impl Willkommen {
    pub fn neu(connection_id: &str) -> Self {
        Self {
            message: "Connected!".to_string(),
            connection_id: connection_id.to_string(),
        }
    }

    pub fn zu_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_call_parsen() {
        let anfrage = ClientAnfrage::aus_json(r#"{"action":"createCall"}"#).unwrap();
        assert_eq!(anfrage, ClientAnfrage::CreateCall {});
        assert_eq!(anfrage.aktion(), "createCall");
    }

    #[test]
    fn join_call_mit_aliasen() {
        let anfrage = ClientAnfrage::aus_json(
            r#"{"action":"joinCall","call_id":"a1b2c3","connection_id":"c1","type":"offer","sdp":"v=0"}"#,
        )
        .unwrap();
        match anfrage {
            ClientAnfrage::JoinCall(req) => {
                assert_eq!(req.call_id, "a1b2c3");
                assert_eq!(req.connection_id.as_deref(), Some("c1"));
                assert_eq!(req.kind, "offer");
                assert_eq!(req.payload, "v=0");
            }
            andere => panic!("Falscher Typ: {andere:?}"),
        }
    }

    #[test]
    fn join_call_ohne_connection_id() {
        let anfrage = ClientAnfrage::aus_json(
            r#"{"action":"joinCall","call_id":"abc","kind":"answer","payload":"x"}"#,
        )
        .unwrap();
        assert!(matches!(
            anfrage,
            ClientAnfrage::JoinCall(JoinCallRequest { connection_id: None, .. })
        ));
    }

    #[test]
    fn unbekannte_aktion_ist_fehler() {
        assert!(ClientAnfrage::aus_json(r#"{"action":"sendMessage"}"#).is_err());
        assert!(ClientAnfrage::aus_json(r#"{"call_id":"abc"}"#).is_err());
        assert!(ClientAnfrage::aus_json("kein json").is_err());
    }

    #[test]
    fn aktion_aus_rohtext_lesen() {
        assert_eq!(
            aktion_aus_rohtext(r#"{"action":"joinCall","call_id":5}"#).as_deref(),
            Some("joinCall")
        );
        assert_eq!(aktion_aus_rohtext("{kaputt"), None);
    }

    #[test]
    fn antwort_umschlaege() {
        let json = ServerAntwort::call_erstellt("a1b2c3").zu_json().unwrap();
        assert_eq!(json, r#"{"action":"createCall","data":{"call_id":"a1b2c3"}}"#);

        let json = ServerAntwort::verlassen().zu_json().unwrap();
        assert_eq!(json, r#"{"action":"leaveCall","data":"Successfully Left Call"}"#);

        let json = ServerAntwort::beigetreten("c1").zu_json().unwrap();
        assert_eq!(json, r#"{"action":"joinCall","data":"Joined Call c1"}"#);
    }

    #[test]
    fn fehler_umschlag() {
        let antwort = ServerAntwort::fehler("joinCall", ErrorCode::AlreadyJoined, "schon drin");
        assert!(antwort.ist_fehler());
        let wert: serde_json::Value = serde_json::from_str(&antwort.zu_json().unwrap()).unwrap();
        assert_eq!(wert["error"]["code"], "ALREADY_JOINED");
        assert!(wert.get("data").is_none());
    }

    #[test]
    fn update_push_format() {
        let nachricht = UpdateNachricht::neu(vec![SignalEintrag {
            kind: "offer".into(),
            payload: "sdp-A".into(),
        }]);
        assert_eq!(
            nachricht.zu_json().unwrap(),
            r#"{"action":"update","data":[{"kind":"offer","payload":"sdp-A"}]}"#
        );
    }

    #[test]
    fn willkommen_format() {
        let json = Willkommen::neu("c1").zu_json().unwrap();
        assert_eq!(json, r#"{"message":"Connected!","connectionId":"c1"}"#);
    }
}
