//! Simulated engine backend.
//!
//! Stands in for the real register file in tests and benchmarks: completes
//! jobs after a configurable latency, can reject programming, report error
//! status bits, or go silent (never raise the interrupt) so timeout paths
//! can be exercised.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{ContextHandle, DispatchError, Job};
use crate::hw::{HardwareOps, InterruptLine, InterruptSender, StatusBits};

/// Simulated raster core.
///
/// `program_and_start` spawns a detached timer thread that raises the
/// completion interrupt after the configured latency, mimicking hardware that
/// runs independently of the dispatching thread.
#[derive(Debug)]
pub struct SimulatedCore {
    latency: Duration,
    irq: InterruptSender,
    fail_next_program: AtomicBool,
    error_next_completion: AtomicBool,
    silent: AtomicBool,
    programs_started: AtomicU64,
    resets: AtomicU64,
    status: Mutex<StatusBits>,
    programmed_log: Mutex<Vec<(ContextHandle, usize)>>,
}

impl SimulatedCore {
    /// Build a core completing jobs after `latency`, plus its interrupt line.
    #[must_use]
    pub fn new(latency: Duration) -> (Self, InterruptLine) {
        let line = InterruptLine::default();
        let core = Self {
            latency,
            irq: line.sender(),
            fail_next_program: AtomicBool::new(false),
            error_next_completion: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            programs_started: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            status: Mutex::new(StatusBits::empty()),
            programmed_log: Mutex::new(Vec::new()),
        };
        (core, line)
    }

    /// Convenience constructor taking the latency in milliseconds.
    #[must_use]
    pub fn with_latency_ms(ms: u64) -> (Self, InterruptLine) {
        Self::new(Duration::from_millis(ms))
    }

    /// Reject the next `program_and_start` call.
    pub fn fail_next_program(&self) {
        self.fail_next_program.store(true, Ordering::SeqCst);
    }

    /// Report a bus error on the next completion interrupt.
    pub fn error_next_completion(&self) {
        self.error_next_completion.store(true, Ordering::SeqCst);
    }

    /// Stop raising completion interrupts (timeout testing).
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Number of jobs the engine accepted and started.
    #[must_use]
    pub fn programs_started(&self) -> u64 {
        self.programs_started.load(Ordering::SeqCst)
    }

    /// Number of soft resets performed.
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Order in which jobs reached the hardware, as (handle, batch index).
    #[must_use]
    pub fn programmed_log(&self) -> Vec<(ContextHandle, usize)> {
        self.programmed_log.lock().clone()
    }
}

impl HardwareOps for SimulatedCore {
    fn program_and_start(&self, job: &Job) -> Result<(), DispatchError> {
        if self.fail_next_program.swap(false, Ordering::SeqCst) {
            return Err(DispatchError::HardwareFault(
                "register programming rejected".into(),
            ));
        }

        self.programs_started.fetch_add(1, Ordering::SeqCst);
        self.programmed_log
            .lock()
            .push((job.handle(), job.batch_index()));
        tracing::trace!(
            handle = %job.handle(),
            batch = job.batch_index(),
            words = job.program().word_count(),
            "simulated core programmed"
        );

        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }

        let flags = if self.error_next_completion.swap(false, Ordering::SeqCst) {
            StatusBits::FRAME_DONE | StatusBits::BUS_ERROR
        } else {
            StatusBits::FRAME_DONE
        };
        *self.status.lock() = flags;

        let irq = self.irq.clone();
        let latency = self.latency;
        thread::spawn(move || {
            thread::sleep(latency);
            irq.raise(flags);
        });
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        *self.status.lock() = StatusBits::empty();
        tracing::debug!("simulated core reset");
    }

    fn read_status(&self) -> StatusBits {
        *self.status.lock()
    }
}
