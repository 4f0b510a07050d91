//! Helio VCS Sync Library
//!
//! Synchronization of a local revision history with the remote project store:
//! - Transport abstraction and the HTTP implementation
//! - Session context injected from settings
//! - Background sync worker (fetch, sync, clone, delete)
//! - Owner-side service that applies worker results to the history

pub mod error;
pub mod session;
pub mod transport;
pub mod events;
pub mod worker;
pub mod service;

pub use error::{SyncError, TransportError};
pub use session::SessionContext;
pub use transport::{API_V1_MEDIA_TYPE, HttpTransport, Method, Response, Transport, routes};
pub use events::{RemoteProjectInfo, SyncEvent, SyncListener, SyncPhase};
pub use worker::{SessionKind, SessionRequest};
pub use service::SyncService;
