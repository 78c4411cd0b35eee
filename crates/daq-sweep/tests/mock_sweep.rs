//! Full sweeps against the simulated Red Pitaya and TSL.

use daq_core::DaqError;
use daq_driver_red_pitaya::{AcquisitionConfig, MockRedPitaya, RedPitayaAcquisition};
use daq_driver_santec::{MockTsl, SweepParameters, SweepStatus, TslDriver, TslModel};
use daq_sweep::{
    CancelHandle, EngineConfig, LoopOptions, RunnerStatus, SweepEngine, SweepRunner, SweepState,
};
use std::sync::Arc;
use std::time::Duration;

struct MockRig {
    rp: Arc<MockRedPitaya>,
    tsl: Arc<MockTsl>,
    engine: Arc<SweepEngine>,
}

fn mock_rig(polls_to_trigger: u32) -> MockRig {
    let rp = Arc::new(
        MockRedPitaya::new()
            .with_samples_per_poll(1024)
            .with_polls_to_trigger(polls_to_trigger),
    );
    let tsl = Arc::new(MockTsl::new(TslModel::Tsl770));
    let engine = Arc::new(SweepEngine::new(
        Arc::new(RedPitayaAcquisition::new(rp.clone())),
        Arc::new(TslDriver::new(tsl.clone(), TslModel::Tsl770)),
        EngineConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
    ));
    MockRig { rp, tsl, engine }
}

fn fast_sweep() -> SweepParameters {
    SweepParameters {
        start_wavelength: 1500.0,
        stop_wavelength: 1600.0,
        speed: 200.0,
        power: 1.0,
    }
}

#[tokio::test(start_paused = true)]
async fn sweep_drains_every_written_sample_across_a_wrap() {
    let rig = mock_rig(20);

    let outcome = rig
        .engine
        .sweep(
            &fast_sweep(),
            &AcquisitionConfig::default(),
            &CancelHandle::new(),
        )
        .await
        .unwrap();

    // 19 waiting polls of 1024 samples; the pointer wraps exactly onto 0
    assert_eq!(outcome.sample_count, 19 * 1024);
    assert!(rig.rp.samples_written() > 16384);

    // Acquisition (~0.19 s) is shorter than the 0.5 s ramp, so nothing is trimmed
    assert_eq!(outcome.spectrum.len(), outcome.sample_count);
    let last = outcome.spectrum.points().last().unwrap();
    assert_eq!(last.wavelength, 1600.0);

    let laser = rig.tsl.state();
    assert_eq!(laser.sweep_status, SweepStatus::Stopped);
    assert_eq!(laser.software_triggers, 1);
    assert_eq!(laser.speed_nm_per_s, 200.0);
    assert!(!rig.rp.state().logging);
    assert_eq!(rig.engine.state(), SweepState::Idle);
}

#[tokio::test(start_paused = true)]
async fn sweep_rejects_bad_parameters_before_touching_instruments() {
    let rig = mock_rig(5);
    let params = SweepParameters {
        power: 20.0,
        ..fast_sweep()
    };

    let err = rig
        .engine
        .sweep(&params, &AcquisitionConfig::default(), &CancelHandle::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::InvalidParameter { field: "power", .. }));
    assert_eq!(rig.tsl.state().power_mw, 1.0);
    assert_eq!(rig.rp.state().decimation, 1);
}

#[tokio::test(start_paused = true)]
async fn runner_publishes_finished_outcome() {
    let rig = mock_rig(5);
    let runner = SweepRunner::new(rig.engine.clone());
    let mut status = runner.subscribe();

    runner
        .start(fast_sweep(), AcquisitionConfig::default())
        .unwrap();

    status.changed().await.unwrap();
    assert!(status.borrow().is_running());

    match runner.wait().await {
        RunnerStatus::Finished(outcome) => assert_eq!(outcome.sample_count, 4 * 1024),
        other => panic!("expected Finished, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn runner_rejects_second_start_while_running() {
    let rig = mock_rig(5);
    let runner = SweepRunner::new(rig.engine.clone());

    runner
        .start(fast_sweep(), AcquisitionConfig::default())
        .unwrap();
    let err = runner
        .start(fast_sweep(), AcquisitionConfig::default())
        .unwrap_err();
    assert!(matches!(err, DaqError::Busy));

    runner.wait().await;
    // Free again once the first sweep is done
    runner
        .start(fast_sweep(), AcquisitionConfig::default())
        .unwrap();
    runner.wait().await;
}

#[tokio::test(start_paused = true)]
async fn runner_loops_requested_number_of_sweeps() {
    let rig = mock_rig(3);
    let runner = SweepRunner::new(rig.engine.clone());

    runner
        .start_loop(
            fast_sweep(),
            AcquisitionConfig::default(),
            LoopOptions {
                pause: Duration::from_secs(1),
                count: Some(3),
            },
        )
        .unwrap();

    assert!(matches!(runner.wait().await, RunnerStatus::Finished(_)));
    assert_eq!(rig.tsl.state().software_triggers, 3);
}

#[tokio::test(start_paused = true)]
async fn runner_cancel_stops_loop_and_instruments() {
    let rig = mock_rig(1_000_000);
    let runner = SweepRunner::new(rig.engine.clone());

    runner
        .start_loop(
            fast_sweep(),
            AcquisitionConfig::default(),
            LoopOptions::default(),
        )
        .unwrap();

    // Let the first sweep get into its poll loop
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.engine.state(), SweepState::Draining);

    runner.cancel();
    match runner.wait().await {
        RunnerStatus::Failed(message) => assert!(message.contains("cancelled")),
        other => panic!("expected cancellation failure, got {:?}", other),
    }
    assert_eq!(rig.tsl.state().sweep_status, SweepStatus::Stopped);
    assert!(!rig.rp.state().logging);
}

#[tokio::test(start_paused = true)]
async fn runner_delivers_every_outcome_without_pause() {
    let rig = mock_rig(3);
    let runner = SweepRunner::new(rig.engine.clone());
    let mut outcomes = runner.outcomes();

    runner
        .start_loop(
            fast_sweep(),
            AcquisitionConfig::default(),
            LoopOptions {
                pause: Duration::ZERO,
                count: Some(3),
            },
        )
        .unwrap();
    runner.wait().await;

    let mut received = Vec::new();
    while let Ok(outcome) = outcomes.try_recv() {
        received.push(outcome);
    }
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|o| o.sample_count == 2 * 1024));
    assert_eq!(rig.tsl.state().software_triggers, 3);
}

#[tokio::test(start_paused = true)]
async fn runner_cancel_during_pause_reports_cancelled() {
    let rig = mock_rig(3);
    let runner = SweepRunner::new(rig.engine.clone());

    runner
        .start_loop(
            fast_sweep(),
            AcquisitionConfig::default(),
            LoopOptions {
                pause: Duration::from_secs(60),
                count: None,
            },
        )
        .unwrap();

    // Still inside the first pause
    tokio::time::sleep(Duration::from_secs(1)).await;
    runner.cancel();

    match runner.wait().await {
        RunnerStatus::Failed(message) => assert!(message.contains("cancelled")),
        other => panic!("expected cancellation failure, got {:?}", other),
    }
    assert_eq!(rig.tsl.state().software_triggers, 0);
}
