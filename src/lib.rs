//! # Raster Dispatch
//!
//! A job scheduling and context-lifecycle engine for a single shared 2D
//! raster/vector acceleration core.
//!
//! This library arbitrates one hardware pipeline between many concurrent
//! client processes. Each client opens a *context* (a registry handle),
//! configures it with one or more opaque register-program batches, and
//! commits. The engine queues one job per batch, dispatches exactly one job
//! at a time to the hardware, detects completion or timeout, and notifies
//! the client either synchronously (block until done) or asynchronously
//! (resolve a fence the client can wait on or chain into other work).
//!
//! ## Core Problem Solved
//!
//! A raster engine is a single-owner resource with fundamentally different
//! constraints than a thread pool:
//!
//! - **Mutual Exclusion**: the register file belongs to at most one job at a
//!   time; two writers corrupt each other silently
//! - **Priority Without Starvation**: high-priority clients must overtake the
//!   queue, but overtaken work has to keep making progress
//! - **In-Flight Cancellation**: a client can die or cancel while its job is
//!   on the hardware; the engine must reset and move on without leaking
//! - **Bounded Waits**: hardware that never raises its interrupt must not
//!   wedge the queue or the waiting client
//!
//! ## Key Features
//!
//! - **Generation-Checked Handles**: a freed context handle can never alias a
//!   live one
//! - **Priority Inflation**: jobs overtaken by higher-priority arrivals are
//!   bumped toward the head over time, bounding worst-case latency
//! - **Exactly-One Finalization**: completion, timeout, and cancellation race
//!   safely; whichever path claims the running slot finalizes the job
//! - **Fence Primitive**: one completion object serves blocking waits, async
//!   waits, and input-dependency chaining
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use raster_dispatch::config::EngineConfig;
//! use raster_dispatch::core::{ClientId, SyncMode};
//! use raster_dispatch::hw::sim::SimulatedCore;
//! use raster_dispatch::runtime::{spawn_interrupt_pump, ConfigureRequest, EngineService};
//!
//! let config = EngineConfig::default();
//! let (hw, interrupts) = SimulatedCore::with_latency_ms(5);
//! let service = Arc::new(EngineService::new(config, Arc::new(hw))?);
//! let _pump = spawn_interrupt_pump(interrupts, service.lifecycle().clone());
//!
//! let handle = service.start_context(ClientId::new(1))?;
//! service.configure(ConfigureRequest::new(handle, batches).with_sync_mode(SyncMode::Sync))?;
//! service.commit(handle)?; // blocks until the hardware finishes
//! service.cancel(handle)?;
//! ```
//!
//! For complete examples, see the integration tests under `tests/`.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling types: contexts, jobs, the registry, and the scheduler.
pub mod core;
/// Configuration models for the engine and its timeout policy.
pub mod config;
/// Completion-object (fence) primitive and coordinator.
pub mod fence;
/// Hardware collaborator interface, status bits, and the simulated core.
pub mod hw;
/// Runtime pieces: command surface, interrupt pump, timeout watchdog.
pub mod runtime;
/// Shared utilities.
pub mod util;
