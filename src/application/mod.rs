//! Application layer: render orchestration and error presentation.

pub mod error;
pub mod render;
