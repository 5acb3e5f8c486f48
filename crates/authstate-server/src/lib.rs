//! authstate-server: external authorization state
//!
//! This crate wires the document store to the authorization domain:
//! - `ExternalState` facade consumed by the authorization manager
//! - Update lock strategies serializing writers per tenant
//! - Op observer hook for writes applied on the storage tier
//! - Configuration loading and logging initialisation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 authstate-server                 │
//! ├──────────────────────────────────────────────────┤
//! │  external_state.rs - ExternalState, topologies   │
//! │  lock.rs           - Local and store-held locks  │
//! │  observer.rs       - Write observation hook      │
//! │  adapters.rs       - Store → domain reader       │
//! │  config.rs         - Configuration loading       │
//! │  logging.rs        - Subscriber setup            │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod external_state;
pub mod lock;
pub mod logging;
pub mod observer;

pub use adapters::StorePrincipalReader;
pub use config::{ConfigLoadError, ServerConfig};
pub use error::{ExternalStateError, ExternalStateResult};
pub use external_state::{with_update_lock, AuthzExternalState, ExternalState, Topology};
pub use lock::{LocalUpdateLock, StoreUpdateLock, UpdateLock};
pub use observer::{NoopOpObserver, OpEntry, OpKind, OpObserver};
