//! facegated — HTTP daemon for the facegate face matching pipeline.
//!
//! Exposes detect/register/recognize endpoints over JSON. Inference runs
//! on a dedicated engine thread behind an [`engine::EngineHandle`];
//! handlers stay thin and translate pipeline failures into the stable
//! `{error, message?}` wire shape.

pub mod config;
pub mod engine;
pub mod http;

pub use config::Config;
pub use engine::{spawn_engine, EngineHandle};
