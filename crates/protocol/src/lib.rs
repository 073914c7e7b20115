//! callrelay-protocol – Client-Protokoll des Call-Relays
//!
//! Jede Client-Aktion ist ein JSON-Objekt mit einem `action`-Feld, das die
//! Route bestimmt. Antworten und Server-Pushes verwenden denselben Umschlag
//! `{action, data}` bzw. `{action, error}`.

pub mod control;

pub use control::{
    ClientAnfrage, ErrorCode, FehlerInfo, JoinCallRequest, LeaveCallRequest, ServerAntwort,
    SignalEintrag, UpdateNachricht, Willkommen,
};
