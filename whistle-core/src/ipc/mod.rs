//! Event types published by the engine.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON.

pub mod events;
