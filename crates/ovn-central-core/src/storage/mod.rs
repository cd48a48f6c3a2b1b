//! Persistence of reconciler state between passes.
//!
//! This module provides:
//! - [`CentralState`] - Confirmed cross-pass state
//! - [`StateStore`] - sled-backed storage for it

pub mod state;

pub use state::{CentralState, ClusterProgress, StateStore};
