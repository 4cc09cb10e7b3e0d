//! HTTP request handlers for the bridge API

pub mod states;
pub mod status;
pub mod structure;
pub mod sync;
