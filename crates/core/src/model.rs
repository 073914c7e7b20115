//! Datenmodell: Call und PeerRecord
//!
//! `Call` ist die Aggregat-Wurzel einer Signaling-Session. Das Speicherformat
//! (`CallRecord`) ist bewusst von der Domaene getrennt: es verwendet rohe
//! Strings und Epoch-Sekunden und wird beim Dekodieren validiert.
//!
//! ## Speicherformat
//! ```json
//! {"call_id": "a1b2c3",
//!  "participants": [{"connection_id": "...", "kind": "offer", "payload": "..."}],
//!  "expires_at": 1700000000}
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{CallId, ConnectionId};

/// Maximale Laenge des Signaling-Typs (`kind`)
pub const MAX_KIND_LAENGE: usize = 32;

/// Maximale Groesse einer Session-Description in Bytes
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// PeerRecord
// ---------------------------------------------------------------------------

/// Signaling-Zustand eines verbundenen Peers innerhalb eines Calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub connection_id: ConnectionId,
    /// Rolle der Signaling-Nachricht ("offer", "answer", "candidate", ...)
    pub kind: String,
    /// Opake Session-Description, nur fuer Clients bedeutsam
    pub payload: String,
}

impl PeerRecord {
    /// Erstellt einen validierten PeerRecord
    pub fn neu(
        connection_id: ConnectionId,
        kind: impl Into<String>,
        payload: impl Into<String>,
    ) -> CoreResult<Self> {
        let kind = kind.into();
        let payload = payload.into();

        if kind.trim().is_empty() || kind.len() > MAX_KIND_LAENGE {
            return Err(CoreError::UngueltigerTeilnehmer(format!(
                "kind muss 1..={MAX_KIND_LAENGE} Zeichen lang sein"
            )));
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(CoreError::UngueltigerTeilnehmer(format!(
                "payload zu gross: {} Bytes (Maximum: {MAX_PAYLOAD_BYTES})",
                payload.len()
            )));
        }

        Ok(Self {
            connection_id,
            kind,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Eine Signaling-Session mit geordneter Teilnehmerliste
///
/// Die Reihenfolge der Teilnehmer entspricht der Beitrittsreihenfolge.
/// Eintraege werden nur angehaengt oder entfernt, nie umsortiert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub id: CallId,
    pub participants: Vec<PeerRecord>,
    pub expires_at: DateTime<Utc>,
}

impl Call {
    /// Erstellt einen leeren Call
    pub fn neu(id: CallId, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            participants: Vec::new(),
            expires_at,
        }
    }

    /// Anzahl der Teilnehmer
    pub fn teilnehmer_anzahl(&self) -> usize {
        self.participants.len()
    }

    pub fn ist_leer(&self) -> bool {
        self.participants.is_empty()
    }

    /// Prueft ob eine Verbindung bereits Teilnehmer ist
    pub fn enthaelt(&self, connection_id: &ConnectionId) -> bool {
        self.participants
            .iter()
            .any(|p| &p.connection_id == connection_id)
    }

    /// Alle Connection-IDs in Beitrittsreihenfolge
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .map(|p| p.connection_id.clone())
            .collect()
    }

    /// Haengt einen Teilnehmer an
    ///
    /// Gibt `false` zurueck (und aendert nichts) wenn die Connection-ID
    /// bereits enthalten ist.
    pub fn teilnehmer_hinzufuegen(&mut self, peer: PeerRecord) -> bool {
        if self.enthaelt(&peer.connection_id) {
            return false;
        }
        self.participants.push(peer);
        true
    }

    /// Entfernt einen Teilnehmer, die Reihenfolge der uebrigen bleibt erhalten
    pub fn teilnehmer_entfernen(&mut self, connection_id: &ConnectionId) -> Option<PeerRecord> {
        let index = self
            .participants
            .iter()
            .position(|p| &p.connection_id == connection_id)?;
        Some(self.participants.remove(index))
    }

    /// Prueft ob der Call zum Zeitpunkt `jetzt` abgelaufen ist
    pub fn ist_abgelaufen(&self, jetzt: DateTime<Utc>) -> bool {
        self.expires_at <= jetzt
    }

    /// Serialisiert den Call in das Speicherformat (JSON-Abbild)
    pub fn abbild(&self) -> serde_json::Value {
        // CallRecord enthaelt nur Strings und Zahlen, Serialisierung kann nicht fehlschlagen
        serde_json::to_value(CallRecord::from(self)).unwrap_or(serde_json::Value::Null)
    }

    /// Dekodiert ein JSON-Abbild statisch typisiert in einen Call
    pub fn aus_abbild(abbild: &serde_json::Value) -> CoreResult<Self> {
        let record: CallRecord = serde_json::from_value(abbild.clone())?;
        Self::try_from(record)
    }
}

// ---------------------------------------------------------------------------
// CallRecord (Speicherformat)
// ---------------------------------------------------------------------------

/// Teilnehmer-Eintrag im Speicherformat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEintrag {
    pub connection_id: String,
    pub kind: String,
    pub payload: String,
}

/// Logisches Speicherformat eines Calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Primaerschluessel
    pub call_id: String,
    #[serde(default)]
    pub participants: Vec<PeerEintrag>,
    /// TTL-Attribut in Epoch-Sekunden
    pub expires_at: i64,
}

impl From<&Call> for CallRecord {
    fn from(call: &Call) -> Self {
        Self {
            call_id: call.id.as_str().to_string(),
            participants: call
                .participants
                .iter()
                .map(|p| PeerEintrag {
                    connection_id: p.connection_id.as_str().to_string(),
                    kind: p.kind.clone(),
                    payload: p.payload.clone(),
                })
                .collect(),
            expires_at: call.expires_at.timestamp(),
        }
    }
}

impl TryFrom<CallRecord> for Call {
    type Error = CoreError;

    fn try_from(record: CallRecord) -> CoreResult<Self> {
        let id = CallId::parse(record.call_id)
            .map_err(|e| CoreError::datensatz(format!("call_id: {e}")))?;

        let expires_at = Utc
            .timestamp_opt(record.expires_at, 0)
            .single()
            .ok_or_else(|| {
                CoreError::datensatz(format!("expires_at ausserhalb: {}", record.expires_at))
            })?;

        let mut call = Call::neu(id, expires_at);
        for eintrag in record.participants {
            let connection_id = ConnectionId::parse(eintrag.connection_id)
                .map_err(|e| CoreError::datensatz(format!("connection_id: {e}")))?;
            let peer = PeerRecord {
                connection_id,
                kind: eintrag.kind,
                payload: eintrag.payload,
            };
            if !call.teilnehmer_hinzufuegen(peer) {
                return Err(CoreError::datensatz("doppelte connection_id im Datensatz"));
            }
        }
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerRecord {
        PeerRecord::neu(ConnectionId::parse(id).unwrap(), "offer", "sdp").unwrap()
    }

    fn leerer_call() -> Call {
        Call::neu(
            CallId::parse("a1b2c3").unwrap(),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    #[test]
    fn hinzufuegen_bewahrt_reihenfolge() {
        let mut call = leerer_call();
        assert!(call.teilnehmer_hinzufuegen(peer("c1")));
        assert!(call.teilnehmer_hinzufuegen(peer("c2")));
        assert!(call.teilnehmer_hinzufuegen(peer("c3")));

        call.teilnehmer_entfernen(&ConnectionId::parse("c2").unwrap());
        let ids: Vec<String> = call.connection_ids().iter().map(|c| c.to_string()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[test]
    fn doppelter_teilnehmer_abgelehnt() {
        let mut call = leerer_call();
        assert!(call.teilnehmer_hinzufuegen(peer("c1")));
        assert!(!call.teilnehmer_hinzufuegen(peer("c1")));
        assert_eq!(call.teilnehmer_anzahl(), 1);
    }

    #[test]
    fn peer_validierung() {
        let cid = ConnectionId::parse("c1").unwrap();
        assert!(PeerRecord::neu(cid.clone(), "", "x").is_err());
        assert!(PeerRecord::neu(cid.clone(), "offer", "x".repeat(MAX_PAYLOAD_BYTES + 1)).is_err());
        assert!(PeerRecord::neu(cid, "answer", "").is_ok());
    }

    #[test]
    fn abbild_hat_speicherformat() {
        let mut call = leerer_call();
        call.teilnehmer_hinzufuegen(peer("c1"));

        let abbild = call.abbild();
        assert_eq!(abbild["call_id"], "a1b2c3");
        assert_eq!(abbild["expires_at"], 1_700_000_000);
        assert_eq!(abbild["participants"][0]["connection_id"], "c1");
        assert_eq!(abbild["participants"][0]["kind"], "offer");

        let zurueck = Call::aus_abbild(&abbild).unwrap();
        assert_eq!(zurueck, call);
    }

    #[test]
    fn kaputtes_abbild_wird_abgelehnt() {
        let ohne_id = serde_json::json!({"participants": [], "expires_at": 1});
        assert!(Call::aus_abbild(&ohne_id).is_err());

        let falscher_typ = serde_json::json!({"call_id": "abc", "participants": "nope", "expires_at": 1});
        assert!(Call::aus_abbild(&falscher_typ).is_err());

        let doppelt = serde_json::json!({
            "call_id": "abc",
            "participants": [
                {"connection_id": "c1", "kind": "offer", "payload": ""},
                {"connection_id": "c1", "kind": "offer", "payload": ""}
            ],
            "expires_at": 1
        });
        assert!(Call::aus_abbild(&doppelt).is_err());
    }

    #[test]
    fn ablauf_pruefung() {
        let call = leerer_call();
        assert!(call.ist_abgelaufen(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        assert!(!call.ist_abgelaufen(Utc.timestamp_opt(1_699_999_999, 0).unwrap()));
    }
}
