//! Infrastructure adapters.

pub mod cache;
