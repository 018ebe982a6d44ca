//! # Courier Transport
//!
//! The [`Channel`] trait is the only thing the worker runtime knows about the
//! wire. How the underlying stream is established is up to the caller.
//!
//! - [`MemoryChannel`]: connected in-process pair for tests and embedding
//! - [`JsonLinesChannel`]: one JSON envelope per line over any tokio stream

mod channel;
mod json_lines;
mod memory;

pub use channel::Channel;
pub use json_lines::JsonLinesChannel;
pub use memory::MemoryChannel;

pub use courier_core::{TransportError, TransportResult};
