//! # fanout-core
//!
//! Shared vocabulary for the fanout relay crates:
//!
//! - **Envelope**: the tagged JSON unit exchanged over every socket
//! - **Ids**: [`ConnectionId`] newtype and generated channel names
//! - **Errors**: [`RelayError`] taxonomy via `thiserror`
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::Envelope;
pub use errors::{RelayError, Result};
pub use ids::{ConnectionId, generate_channel_name};
