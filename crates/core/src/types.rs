//! Identifikationstypen fuer den Call-Relay
//!
//! Beide IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Call- und Connection-IDs zur Compilezeit auszuschliessen. Die Inhalte
//! sind opake Strings, werden aber beim Parsen validiert.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Maximale Laenge einer Call-ID
pub const MAX_CALL_ID_LAENGE: usize = 64;

/// Maximale Laenge einer Connection-ID
pub const MAX_CONNECTION_ID_LAENGE: usize = 128;

/// Kurze, teilbare Call-ID (Join-Code)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Parst und validiert eine Call-ID
    ///
    /// Erlaubt sind 1 bis 64 Zeichen aus `[0-9a-zA-Z_-]`.
    pub fn parse(wert: impl Into<String>) -> CoreResult<Self> {
        let wert = wert.into();
        if wert.is_empty() || wert.len() > MAX_CALL_ID_LAENGE {
            return Err(CoreError::UngueltigeCallId(format!(
                "Laenge {} ausserhalb 1..={MAX_CALL_ID_LAENGE}",
                wert.len()
            )));
        }
        if !wert
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(CoreError::UngueltigeCallId(format!(
                "unerlaubte Zeichen in '{wert}'"
            )));
        }
        Ok(Self(wert))
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Adressierbare Live-Verbindung eines Peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId (UUID v4)
    pub fn neu() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parst und validiert eine Connection-ID (nicht leer, max. 128 Zeichen)
    pub fn parse(wert: impl Into<String>) -> CoreResult<Self> {
        let wert = wert.into();
        if wert.trim().is_empty() {
            return Err(CoreError::UngueltigeConnectionId(
                "Connection-ID darf nicht leer sein".into(),
            ));
        }
        if wert.len() > MAX_CONNECTION_ID_LAENGE {
            return Err(CoreError::UngueltigeConnectionId(format!(
                "Laenge {} ueberschreitet {MAX_CONNECTION_ID_LAENGE}",
                wert.len()
            )));
        }
        Ok(Self(wert))
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
