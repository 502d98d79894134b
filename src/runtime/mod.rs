//! Runtime pieces: command surface, interrupt pump, timeout watchdog.

/// Command surface and top-level engine object.
pub mod service;
/// Periodic timeout watchdog thread.
pub mod watchdog;

pub use service::{CommitOutput, ConfigureRequest, EngineService};
pub use watchdog::Watchdog;

use std::thread::{self, JoinHandle};

use crate::core::JobLifecycle;
use crate::hw::InterruptLine;

/// Spawn the interrupt pump: a dedicated thread draining the interrupt line
/// into the lifecycle's finish path.
///
/// The interrupt side is an ordinary concurrent caller of `finish`, not a
/// privileged execution context. The pump exits once every
/// [`crate::hw::InterruptSender`] has been dropped.
pub fn spawn_interrupt_pump(line: InterruptLine, lifecycle: JobLifecycle) -> JoinHandle<()> {
    let rx = line.into_receiver();
    thread::Builder::new()
        .name("rd-irq".into())
        .spawn(move || {
            tracing::debug!("interrupt pump started");
            while let Ok(flags) = rx.recv() {
                lifecycle.on_interrupt(flags);
            }
            tracing::debug!("interrupt line closed, pump exiting");
        })
        .expect("failed to spawn interrupt pump thread")
}
