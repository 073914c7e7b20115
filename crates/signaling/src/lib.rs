//! callrelay-signaling – Call-Sessions und Update-Verteilung
//!
//! Dieser Crate implementiert den Kern des Call-Relays: Zustandsuebergaenge
//! von Calls gegen den Call-Speicher, die Verarbeitung des Change-Feeds und
//! den Fan-out von Updates an alle Teilnehmer, dazu die WebSocket-Seite.
//!
//! ## Architektur
//!
//! ```text
//! WebSocket (/ws)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |
//!     v
//! ActionDispatcher ---> CallSessionManager ---> CallStore
//!                                                   |
//!                                              Change-Feed
//!                                                   |
//!                                                   v
//!                                          ChangeFeedProcessor
//!                                                   |
//!                                                   v
//!                                Broadcaster ---> ConnectionGateway ---> Verbindungen
//!
//! PresenceManager – Welche Verbindung ist in welchen Calls
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod presence;
pub mod server_state;
pub mod session;
pub mod ws;

// Bequeme Re-Exporte
pub use broadcast::{Broadcaster, ZustellBericht};
pub use connection::ClientConnection;
pub use dispatcher::{ActionDispatcher, DispatcherContext};
pub use error::{SignalingError, SignalingResult};
pub use feed::{ChangeFeedProcessor, FeedConfig, FeedErgebnis, GRABSTEIN_HALTEZEIT};
pub use gateway::{ConnectionGateway, GatewayError, VerbindungsRegister};
pub use presence::PresenceManager;
pub use server_state::{SignalingConfig, SignalingState};
pub use session::{CallSessionManager, SessionConfig, VerlassenErgebnis};
pub use ws::{ws_router, WS_PFAD};
