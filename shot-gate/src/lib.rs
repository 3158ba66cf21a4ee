//! # shot-gate
//!
//! `shot-gate` caps how many operations a single caller identity (a user id, an API key,
//! a tenant) may have in flight at once.
//!
//! ## Core Philosophy
//!
//! Each identity gets its own bounded counting permit, created lazily the first time the
//! identity is seen. Acquiring waits for a free permit up to a configured timeout and then
//! gives up with [`GateError::LimitExceeded`]. Releasing hands the permit back and stamps
//! the identity's last-release time.
//!
//! ## Key Concepts
//!
//! * **Per-Identity Isolation**: Identities never contend on each other's permits.
//! * **Shared Hot Path**: Acquire, release and the reclaimer's scan only take a shared
//!   lock over the permit table. The exclusive lock is taken to create an entry for a new
//!   identity, or when an idle entry is about to be evicted.
//! * **Background Reclamation**: A reclaimer task periodically removes identities that
//!   hold no permits and have been idle longer than the expiry window, so memory stays
//!   bounded by the set of recently active callers.
//!
//! ## Example
//!
//! ```rust
//! use shot_gate::Gate;
//! use shot_gate::GateConfig;
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), shot_gate::GateError> {
//! let limit = NonZeroUsize::new(20).unwrap();
//! let config = GateConfig::new(limit).with_acquire_timeout(Duration::from_millis(500));
//! let gate: Gate = Gate::new(config)?;
//!
//! gate.acquire("micky").await?;
//! // ... protected work ...
//! gate.release("micky")?;
//!
//! gate.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use std::fmt::Display;
use std::hash::Hash;

mod config;
mod error;
mod gate;
mod metrics;
mod reclaimer;
mod table;


pub use config::ENV_PREFIX;
pub use config::GateConfig;
pub use error::GateError;
pub use gate::Gate;
pub use gate::PermitGuard;

/// Anything that can name a caller for quota purposes.
///
/// Implemented for every type with the required bounds, so `String`, `u64`
/// or a newtype deriving the usual traits all work.
pub trait Identity: Eq + Hash + Clone + Display + Send + Sync + 'static {}

impl<T> Identity for T where T: Eq + Hash + Clone + Display + Send + Sync + 'static {}
