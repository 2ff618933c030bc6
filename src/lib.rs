//! chartd: a chart rendering service.
//!
//! Declarative chart specs go in; cached image bytes or durable URLs come out.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
