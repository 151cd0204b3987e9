//! portico-core — wire message types, codec, response codes, and configuration.
//! All other Portico crates depend on this one.

pub mod codec;
pub mod codes;
pub mod config;
pub mod message;

pub use message::{now_ms, Event, Message, Operation, OrderedMap, Request, Response};
