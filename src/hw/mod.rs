//! Hardware collaborator interface: register programming, soft reset, status
//! readback, and the interrupt line.
//!
//! The scheduler treats the engine as three operations and one event source.
//! Register semantics stay on the other side of [`HardwareOps`]; the only
//! contract that matters here is single ownership — `program_and_start` is
//! called exclusively by whoever holds the running slot.

/// Simulated engine backend for tests and benchmarks.
pub mod sim;

use bitflags::bitflags;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::core::{DispatchError, Job};

bitflags! {
    /// Work-status word reported by the engine and carried on the interrupt
    /// line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u32 {
        /// The running job completed.
        const FRAME_DONE = 0b001;
        /// Bus error while the engine fetched or wrote memory.
        const BUS_ERROR = 0b010;
        /// The engine's internal watchdog expired.
        const TIMEOUT_ERROR = 0b100;
    }
}

impl StatusBits {
    /// Whether the status word carries an error condition.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.intersects(Self::BUS_ERROR.union(Self::TIMEOUT_ERROR))
    }
}

/// Register-level operations consumed by the scheduler.
///
/// Implementations must be callable from any thread; the scheduler guarantees
/// at most one outstanding `program_and_start` at a time.
pub trait HardwareOps: Send + Sync {
    /// Program the register file from the job's payload and start the engine.
    ///
    /// Returns without waiting for completion; completion arrives later on
    /// the interrupt line.
    ///
    /// # Errors
    ///
    /// [`DispatchError::HardwareFault`] if programming fails before the
    /// engine starts. The scheduler clears the running slot and advances.
    fn program_and_start(&self, job: &Job) -> Result<(), DispatchError>;

    /// Soft-reset the engine, discarding whatever it was running.
    fn reset(&self);

    /// Read the current work-status word.
    fn read_status(&self) -> StatusBits;
}

/// Producer half of the interrupt line, held by the hardware side.
#[derive(Debug, Clone)]
pub struct InterruptSender {
    tx: Sender<StatusBits>,
}

impl InterruptSender {
    /// Deliver a completion/error status word.
    ///
    /// Non-blocking: a full line drops the interrupt with a warning rather
    /// than stalling the caller (the timeout watchdog recovers the job).
    pub fn raise(&self, flags: StatusBits) {
        match self.tx.try_send(flags) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(?flags, "interrupt line full, status dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(?flags, "interrupt line closed, status dropped");
            }
        }
    }
}

/// Bounded channel carrying status words from the hardware side to the
/// interrupt pump.
#[derive(Debug)]
pub struct InterruptLine {
    tx: Sender<StatusBits>,
    rx: Receiver<StatusBits>,
}

impl InterruptLine {
    /// Create a line with the given depth.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = bounded(depth);
        Self { tx, rx }
    }

    /// Producer handle for the hardware side.
    #[must_use]
    pub fn sender(&self) -> InterruptSender {
        InterruptSender { tx: self.tx.clone() }
    }

    /// Consume the line, returning the receiving end for the pump.
    ///
    /// Dropping every [`InterruptSender`] closes the line and ends the pump.
    #[must_use]
    pub fn into_receiver(self) -> Receiver<StatusBits> {
        self.rx
    }
}

impl Default for InterruptLine {
    fn default() -> Self {
        Self::new(16)
    }
}
