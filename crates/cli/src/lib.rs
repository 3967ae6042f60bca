//! Command line front-end for the execution engine.

pub mod commands;
pub mod primitive;
pub mod render;

pub use primitive::{ProcessPrimitive, CONTEXT_ENV};
