//! Configuration models for the engine and its timeout policy.

pub mod engine;

pub use engine::EngineConfig;
