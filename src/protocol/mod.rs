//! Wire protocol: tagged JSON envelopes and typed payloads

pub mod messages;

pub use messages::*;
