//! Integration tests for commit modes, completion accounting, timeouts, and
//! error surfacing, with the interrupt pump running.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use raster_dispatch::config::EngineConfig;
use raster_dispatch::core::{ClientId, DispatchError, Priority, RegisterProgram, SyncMode};
use raster_dispatch::fence::FenceStatus;
use raster_dispatch::hw::sim::SimulatedCore;
use raster_dispatch::hw::HardwareOps;
use raster_dispatch::runtime::{spawn_interrupt_pump, ConfigureRequest, EngineService};

struct Harness {
    service: Arc<EngineService>,
    core: Arc<SimulatedCore>,
    _pump: JoinHandle<()>,
}

fn harness(latency_ms: u64, config: EngineConfig) -> Harness {
    raster_dispatch::util::init_tracing();
    let (core, line) = SimulatedCore::with_latency_ms(latency_ms);
    let core = Arc::new(core);
    let hw: Arc<dyn HardwareOps> = Arc::clone(&core) as Arc<dyn HardwareOps>;
    let service = Arc::new(EngineService::new(config, hw).unwrap());
    let pump = spawn_interrupt_pump(line, service.lifecycle().clone());
    Harness {
        service,
        core,
        _pump: pump,
    }
}

fn configure(
    h: &Harness,
    batches: usize,
    mode: SyncMode,
) -> raster_dispatch::core::ContextHandle {
    let handle = h.service.start_context(ClientId::new(1)).unwrap();
    let programs = (0..batches)
        .map(|i| RegisterProgram::new(vec![i as u32, 0xffff]))
        .collect();
    h.service
        .configure(ConfigureRequest::new(handle, programs).with_sync_mode(mode))
        .unwrap();
    handle
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn sync_commit_blocks_until_hardware_completes() {
    let h = harness(5, EngineConfig::default());
    let handle = configure(&h, 1, SyncMode::Sync);

    let started = Instant::now();
    let output = h.service.commit(handle).unwrap();
    let elapsed = started.elapsed();

    assert!(output.fence.is_none());
    assert!(elapsed >= Duration::from_millis(5), "returned after {elapsed:?}");
    assert_eq!(h.service.stats().completed_jobs, 1);
    assert!(!h.service.stats().busy);
    // The registry keeps its reference until the client cancels.
    assert_eq!(h.service.registry().len(), 1);
}

#[test]
fn async_commit_returns_fence_that_signals_on_completion() {
    let h = harness(2, EngineConfig::default());
    let handle = configure(&h, 3, SyncMode::Async);

    let output = h.service.commit(handle).unwrap();
    let fence = output.fence.unwrap();
    fence.wait(Duration::from_secs(2)).unwrap();

    assert_eq!(fence.status(), FenceStatus::Signaled);
    let stats = h.service.stats();
    assert_eq!(stats.completed_jobs, 3);
    assert_eq!(stats.total_interrupts, 3);
    assert!(!stats.busy);
}

#[test]
fn async_timeout_finalizes_job_and_progresses_queue() {
    let config = EngineConfig {
        async_timeout_ms: 50,
        watchdog_interval_ms: 10,
        ..EngineConfig::default()
    };
    let h = harness(1, config);
    h.core.set_silent(true);

    let first = configure(&h, 1, SyncMode::Async);
    let second = configure(&h, 1, SyncMode::Async);

    let fence1 = h.service.commit(first).unwrap().fence.unwrap();
    let fence2 = h.service.commit(second).unwrap().fence.unwrap();

    // The silent engine never interrupts; the watchdog reaps the first job
    // after ~50ms, resets once, and the queue moves on to the second.
    assert_eq!(
        fence1.wait(Duration::from_secs(2)).unwrap_err(),
        DispatchError::Timeout
    );
    assert!(wait_until(Duration::from_secs(1), || {
        h.core.programmed_log().len() == 2
    }));
    assert_eq!(
        fence2.wait(Duration::from_secs(2)).unwrap_err(),
        DispatchError::Timeout
    );
    assert_eq!(h.service.stats().timed_out_jobs, 2);
    assert_eq!(h.core.resets(), 2);
}

#[test]
fn sync_commit_times_out_against_silent_hardware() {
    let config = EngineConfig {
        sync_timeout_ms: 50,
        watchdog_interval_ms: 0,
        ..EngineConfig::default()
    };
    let h = harness(1, config);
    h.core.set_silent(true);

    let handle = configure(&h, 1, SyncMode::Sync);
    let started = Instant::now();
    let err = h.service.commit(handle).unwrap_err();

    assert_eq!(err, DispatchError::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(h.core.resets(), 1);
    assert!(!h.service.stats().busy);
}

#[test]
fn commit_with_no_batches_resolves_immediately() {
    let h = harness(1, EngineConfig::default());

    let sync_handle = configure(&h, 0, SyncMode::Sync);
    assert!(h.service.commit(sync_handle).unwrap().fence.is_none());

    let async_handle = configure(&h, 0, SyncMode::Async);
    let fence = h.service.commit(async_handle).unwrap().fence.unwrap();
    assert_eq!(fence.status(), FenceStatus::Signaled);

    assert_eq!(h.core.programs_started(), 0);
}

#[test]
fn configure_unknown_handle_is_invalid() {
    let h = harness(1, EngineConfig::default());
    let bogus = raster_dispatch::core::ContextHandle {
        index: 42,
        generation: 1,
    };
    let err = h
        .service
        .configure(ConfigureRequest::new(bogus, vec![]))
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidHandle(_)));
}

#[test]
fn configure_while_running_is_rejected() {
    let h = harness(1, EngineConfig::default());
    h.core.set_silent(true);

    let handle = configure(&h, 1, SyncMode::Async);
    h.service.commit(handle).unwrap();

    let err = h
        .service
        .configure(ConfigureRequest::new(handle, vec![RegisterProgram::new(vec![1])]))
        .unwrap_err();
    assert!(matches!(err, DispatchError::AlreadyRunning(_)));

    let err = h.service.commit(handle).unwrap_err();
    assert!(matches!(err, DispatchError::AlreadyRunning(_)));
}

#[test]
fn sync_commit_surfaces_programming_failure_directly() {
    let h = harness(1, EngineConfig::default());
    h.core.fail_next_program();

    let handle = configure(&h, 1, SyncMode::Sync);
    let err = h.service.commit(handle).unwrap_err();
    assert!(matches!(err, DispatchError::HardwareFault(_)));
    assert!(!h.service.stats().busy);
}

#[test]
fn async_commit_surfaces_errors_only_through_the_fence() {
    let h = harness(1, EngineConfig::default());
    h.core.fail_next_program();

    let handle = configure(&h, 1, SyncMode::Async);
    // The commit call itself succeeds.
    let fence = h.service.commit(handle).unwrap().fence.unwrap();
    assert!(matches!(
        fence.status(),
        FenceStatus::Failed(DispatchError::HardwareFault(_))
    ));
}

#[test]
fn engine_error_bits_fail_the_fence_and_reset() {
    let h = harness(2, EngineConfig::default());
    h.core.error_next_completion();

    let handle = configure(&h, 1, SyncMode::Async);
    let fence = h.service.commit(handle).unwrap().fence.unwrap();

    let err = fence.wait(Duration::from_secs(2)).unwrap_err();
    assert!(matches!(err, DispatchError::HardwareFault(_)));
    assert!(wait_until(Duration::from_secs(1), || h.core.resets() == 1));
}

#[test]
fn priorities_are_clamped_to_the_maximum() {
    let h = harness(1, EngineConfig::default());
    let handle = h.service.start_context(ClientId::new(1)).unwrap();
    h.service
        .configure(
            ConfigureRequest::new(handle, vec![RegisterProgram::new(vec![1])])
                .with_priority(Priority::new(250))
                .with_sync_mode(SyncMode::Sync),
        )
        .unwrap();
    h.service.commit(handle).unwrap();
    assert_eq!(h.service.stats().completed_jobs, 1);
}

#[test]
fn output_fence_chains_into_another_commit() {
    let h = harness(2, EngineConfig::default());

    let upstream = configure(&h, 1, SyncMode::Async);
    let fence_up = h.service.commit(upstream).unwrap().fence.unwrap();

    // The downstream context only reaches the hardware once the upstream
    // fence resolves.
    let downstream = h.service.start_context(ClientId::new(2)).unwrap();
    h.service
        .configure(
            ConfigureRequest::new(downstream, vec![RegisterProgram::new(vec![7])])
                .with_sync_mode(SyncMode::Async)
                .with_input_fence(fence_up),
        )
        .unwrap();
    let fence_down = h.service.commit(downstream).unwrap().fence.unwrap();

    fence_down.wait(Duration::from_secs(2)).unwrap();
    assert_eq!(h.service.stats().completed_jobs, 2);
}

#[cfg(feature = "tokio-runtime")]
#[tokio::test]
async fn fence_can_be_awaited_from_async_clients() {
    let h = harness(2, EngineConfig::default());
    let handle = configure(&h, 2, SyncMode::Async);

    let fence = h.service.commit(handle).unwrap().fence.unwrap();
    fence.wait_async(Duration::from_secs(2)).await.unwrap();
    assert_eq!(h.service.stats().completed_jobs, 2);
}
