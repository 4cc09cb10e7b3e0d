//! Shared data models for the host store

mod object;
mod state;

pub use object::*;
pub use state::*;
