//! Client-against-simulator integration tests. Each test binds its own
//! simulator on ephemeral ports and drives it through the `Detector`
//! client, end to end over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use sls_detector::client::{AcquisitionEvent, Detector};
use sls_detector::network::protocol::RunStatus;
use sls_detector::simulator::{synth_counts, DetectorState, Simulator};
use sls_detector::SimulatorSettings;

async fn spawn_simulator(
    settings: SimulatorSettings,
) -> (SocketAddr, SocketAddr, Arc<Mutex<DetectorState>>) {
    let simulator = Simulator::bind(&settings).await.unwrap();
    let ctrl = simulator.ctrl_addr().unwrap();
    let stop = simulator.stop_addr().unwrap();
    let state = simulator.state();
    tokio::spawn(simulator.run());
    (ctrl, stop, state)
}

fn test_settings() -> SimulatorSettings {
    SimulatorSettings {
        ctrl_port: 0,
        stop_port: 0,
        ..SimulatorSettings::default()
    }
}

#[tokio::test]
async fn timer_round_trip_within_a_nanosecond() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    let set = detector.set_exposure_time(1.234_567_891).await.unwrap();
    assert!((set - 1.234_567_891).abs() < 1e-9);
    let read = detector.exposure_time().await.unwrap();
    assert!((read - 1.234_567_891).abs() < 1e-9);

    detector.set_frame_period(0.5).await.unwrap();
    assert!((detector.frame_period().await.unwrap() - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn get_sentinel_never_mutates() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    assert_eq!(detector.set_nb_frames(5).await.unwrap(), 5);
    assert_eq!(detector.set_nb_cycles(3).await.unwrap(), 3);
    // repeated gets observe the same values
    for _ in 0..3 {
        assert_eq!(detector.nb_frames().await.unwrap(), 5);
        assert_eq!(detector.nb_cycles().await.unwrap(), 3);
    }
}

#[tokio::test]
async fn stale_client_is_resynced_transparently() {
    let (ctrl, stop, state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.update_client().await.unwrap();
    detector.set_nb_frames(4).await.unwrap();

    // another client registered since our last update
    state.lock().await.last_client_ip = "10.9.8.7".to_owned();

    // the call succeeds anyway, and the resync re-registers us
    assert_eq!(detector.nb_frames().await.unwrap(), 4);
    assert_eq!(state.lock().await.last_client_ip, "127.0.0.1");
    assert_eq!(detector.snapshot().unwrap().nb_frames, 4);
    assert_eq!(detector.last_client_ip().await.unwrap(), "127.0.0.1");
}

#[tokio::test]
async fn acquisition_delivers_every_frame_then_finishes() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.set_exposure_time(0.002).await.unwrap();
    detector.set_frame_period(0.0).await.unwrap();
    detector.set_nb_frames(3).await.unwrap();
    detector.set_nb_cycles(2).await.unwrap();

    let mut acquisition = detector.acquire(None).await.unwrap();
    let mut frames = 0;
    while let Some(event) = acquisition.next_event().await.unwrap() {
        match event {
            AcquisitionEvent::Frame(frame) => {
                assert_eq!(frame.counts.len(), 7680);
                frames += 1;
            }
            AcquisitionEvent::Progress(_) => panic!("no progress interval configured"),
        }
    }
    assert_eq!(frames, 6);
    assert!(!acquisition.is_active());
    assert!(acquisition
        .finished_message()
        .unwrap()
        .contains("successfully finished"));
    drop(acquisition);

    assert_eq!(detector.run_status().await.unwrap(), RunStatus::Idle);
}

#[tokio::test]
async fn frames_match_the_seeded_generator_byte_for_byte() {
    let mut settings = test_settings();
    settings.seed = 42;
    let (ctrl, stop, _state) = spawn_simulator(settings).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.set_exposure_time(0.001).await.unwrap();
    detector.set_nb_frames(2).await.unwrap();
    detector.set_nb_cycles(1).await.unwrap();
    assert_eq!(detector.set_dynamic_range(16).await.unwrap(), 16);

    let mut acquisition = detector.acquire(None).await.unwrap();
    let mut index = 0u64;
    while let Some(event) = acquisition.next_event().await.unwrap() {
        if let AcquisitionEvent::Frame(frame) = event {
            assert_eq!(frame.counts, synth_counts(42, index, 7680, 16));
            index += 1;
        }
    }
    assert_eq!(index, 2);
}

#[tokio::test]
async fn dynamic_range_24_survives_the_wire_and_sizes_frames() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    assert_eq!(detector.set_dynamic_range(24).await.unwrap(), 24);
    assert_eq!(detector.dynamic_range().await.unwrap(), 24);

    let snapshot = detector.update_client().await.unwrap();
    assert_eq!(snapshot.dynamic_range, 24);
    assert_eq!(snapshot.data_bytes, 7680 * 4);

    assert_eq!(detector.set_dynamic_range(8).await.unwrap(), 8);
    let snapshot = detector.update_client().await.unwrap();
    assert_eq!(snapshot.data_bytes, 7680);
}

#[tokio::test]
async fn stop_cancels_a_long_acquisition_promptly() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.set_exposure_time(30.0).await.unwrap();
    detector.set_nb_frames(1).await.unwrap();
    detector.set_nb_cycles(1).await.unwrap();

    let mut acquisition = detector.acquire(None).await.unwrap();

    // out-of-band stop from a second client over the stop port
    let mut stopper = Detector::new(ctrl, stop);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop_acquisition().await.unwrap();
    });

    let event = timeout(Duration::from_secs(5), acquisition.next_event())
        .await
        .expect("stream must end long before the 30s exposure")
        .unwrap();
    assert!(event.is_none());
    assert_eq!(acquisition.finished_message(), Some("acquisition stopped"));
    drop(acquisition);

    assert_eq!(detector.run_status().await.unwrap(), RunStatus::Idle);
}

#[tokio::test]
async fn progress_reports_interleave_and_stay_consistent() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.set_exposure_time(0.3).await.unwrap();
    detector.set_nb_frames(2).await.unwrap();
    detector.set_nb_cycles(1).await.unwrap();

    let mut acquisition = detector
        .acquire(Some(Duration::from_millis(50)))
        .await
        .unwrap();
    let mut frames = 0i64;
    let mut reports = 0;
    let mut last_finished = 0i64;
    while let Some(event) = acquisition.next_event().await.unwrap() {
        match event {
            AcquisitionEvent::Frame(_) => frames += 1,
            AcquisitionEvent::Progress(progress) => {
                reports += 1;
                assert!(progress.exposure_time_left >= 0.0);
                assert!((0..=2).contains(&progress.frames_finished));
                assert!((0..=1).contains(&progress.cycles_finished));
                assert!(progress.frames_finished >= last_finished);
                last_finished = progress.frames_finished;
            }
        }
    }
    assert_eq!(frames, 2);
    assert!(reports > 0, "a 300ms exposure must yield 50ms progress ticks");
}

#[tokio::test]
async fn abandoned_session_still_stops_the_detector() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.set_exposure_time(30.0).await.unwrap();
    detector.set_nb_frames(1).await.unwrap();

    let mut acquisition = detector.acquire(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(detector_status(ctrl, stop).await, RunStatus::Running);

    // bail out without reading a single frame
    acquisition.close().await.unwrap();
    assert!(!acquisition.is_active());
    drop(acquisition);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(detector.run_status().await.unwrap(), RunStatus::Idle);
}

async fn detector_status(ctrl: SocketAddr, stop: SocketAddr) -> RunStatus {
    Detector::new(ctrl, stop).run_status().await.unwrap()
}

#[tokio::test]
async fn a_faulting_connection_never_poisons_the_server() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;

    // raw connection sending an unknown command code
    let mut raw = TcpStream::connect(ctrl).await.unwrap();
    raw.write_all(&99i32.to_le_bytes()).await.unwrap();
    let mut result = [0u8; 4];
    raw.read_exact(&mut result).await.unwrap();
    assert_eq!(i32::from_le_bytes(result), 1); // FAIL
    let mut message = vec![0u8; 1024];
    let n = raw.read(&mut message).await.unwrap();
    let text = String::from_utf8_lossy(&message[..n]).into_owned();
    assert!(text.contains("unknown command code 99"), "got: {text}");
    // the server closes the faulted connection
    assert_eq!(raw.read(&mut message).await.unwrap(), 0);

    // other clients are unaffected
    let mut detector = Detector::new(ctrl, stop);
    assert_eq!(detector.set_nb_frames(7).await.unwrap(), 7);
    assert_eq!(detector.run_status().await.unwrap(), RunStatus::Idle);
}

#[tokio::test]
async fn detector_fail_replies_surface_as_errors() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    // read-only timer rejects sets, with the server's message verbatim
    let err = detector
        .set_nb_frames(-5)
        .await
        .expect_err("negative frame count must be rejected");
    assert!(err.to_string().contains("cannot be set to -5"));

    // stop when idle is still fine
    detector.stop_acquisition().await.unwrap();
}

#[tokio::test]
async fn time_left_counters_move_during_a_run() {
    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    detector.set_exposure_time(0.5).await.unwrap();
    detector.set_nb_frames(2).await.unwrap();
    detector.set_nb_cycles(1).await.unwrap();

    detector.start_acquisition().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(detector.run_status().await.unwrap(), RunStatus::Running);
    assert!(detector.exposure_time_left().await.unwrap() > 0.0);
    assert_eq!(detector.nb_frames_left().await.unwrap(), 2);
    assert_eq!(detector.nb_cycles_left().await.unwrap(), 1);
    assert!(detector.progress().await.unwrap() < 100);

    detector.stop_acquisition().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(detector.run_status().await.unwrap(), RunStatus::Idle);
}

#[tokio::test]
async fn timing_mode_and_module_count_round_trip() {
    use sls_detector::network::protocol::{Dimension, TimingMode};

    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    assert_eq!(detector.timing_mode().await.unwrap(), TimingMode::Auto);
    assert_eq!(
        detector
            .set_timing_mode(TimingMode::TriggerExposure)
            .await
            .unwrap(),
        TimingMode::TriggerExposure
    );
    assert_eq!(
        detector.timing_mode().await.unwrap(),
        TimingMode::TriggerExposure
    );

    assert_eq!(detector.nb_modules(Dimension::X).await.unwrap(), 6);
    assert_eq!(detector.nb_modules(Dimension::Y).await.unwrap(), 1);
    assert_eq!(detector.set_nb_modules(Dimension::X, 2).await.unwrap(), 2);

    // geometry follows the module count
    let snapshot = detector.update_client().await.unwrap();
    assert_eq!(snapshot.nb_modules, 2);
    assert_eq!(snapshot.data_bytes, 2 * 10 * 128 * 4);

    let err = detector
        .set_nb_modules(Dimension::X, 0)
        .await
        .expect_err("zero modules must be rejected");
    assert!(err.to_string().contains("cannot install"));
}

#[tokio::test]
async fn stale_peer_gets_force_update_on_streamed_frames() {
    let (ctrl, _stop, state) = spawn_simulator(test_settings()).await;
    {
        let mut state = state.lock().await;
        state.last_client_ip = "10.9.8.7".to_owned();
        state.acq_time = 1_000_000; // 1 ms
        state.nb_frames = 1;
        state.nb_cycles = 1;
    }

    // stream directly, without registering first
    let mut raw = TcpStream::connect(ctrl).await.unwrap();
    raw.write_all(&34i32.to_le_bytes()).await.unwrap();

    let mut result = [0u8; 4];
    raw.read_exact(&mut result).await.unwrap();
    assert_eq!(i32::from_le_bytes(result), 3); // FORCE_UPDATE, payload unchanged
    let mut frame = vec![0u8; 7680 * 4];
    raw.read_exact(&mut frame).await.unwrap();

    raw.read_exact(&mut result).await.unwrap();
    assert_eq!(i32::from_le_bytes(result), 2); // FINISHED
}

#[tokio::test]
async fn stream_error_is_not_masked_by_a_failing_stop() {
    use sls_detector::network::protocol::{DetectorSettings, DetectorSnapshot};
    use sls_detector::SlsError;
    use tokio::net::TcpListener;

    let ctrl_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ctrl = ctrl_listener.local_addr().unwrap();
    // a stop address nothing listens on, so the stop request itself fails
    let stop = {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        unused.local_addr().unwrap()
    };

    tokio::spawn(async move {
        // first connection: the UPDATE_CLIENT issued by acquire()
        let (mut conn, _) = ctrl_listener.accept().await.unwrap();
        let mut cmd = [0u8; 4];
        conn.read_exact(&mut cmd).await.unwrap();
        let snapshot = DetectorSnapshot {
            last_client_ip: String::new(),
            nb_modules: 1,
            nb_modules_y: 1,
            dynamic_range: 16,
            data_bytes: 8,
            settings: DetectorSettings::Standard,
            energy_threshold: 0,
            nb_frames: 1,
            acq_time: 0,
            frame_period: 0,
            delay_after_trigger: 0,
            nb_gates: 0,
            nb_probes: 0,
            nb_cycles: 1,
        };
        let mut reply = 0i32.to_le_bytes().to_vec();
        reply.extend(snapshot.encode());
        conn.write_all(&reply).await.unwrap();
        // second connection: START_AND_READ_ALL, cut without replying
        let (mut stream_conn, _) = ctrl_listener.accept().await.unwrap();
        stream_conn.read_exact(&mut cmd).await.unwrap();
    });

    let mut detector = Detector::new(ctrl, stop);
    let mut acquisition = detector.acquire(None).await.unwrap();
    let err = acquisition
        .next_event()
        .await
        .expect_err("the cut stream must surface an error");
    assert!(
        matches!(err, SlsError::ConnectionClosed),
        "stream error was replaced: {err}"
    );
    assert!(!acquisition.is_active());
}

#[tokio::test]
async fn configuration_accessors_round_trip() {
    use sls_detector::network::protocol::{
        DetectorSettings, DetectorType, IdParam, MasterMode, ReadoutFlags, Roi, SpeedType,
        SynchronizationMode,
    };

    let (ctrl, stop, _state) = spawn_simulator(test_settings()).await;
    let mut detector = Detector::new(ctrl, stop);

    assert_eq!(detector.detector_type().await.unwrap(), DetectorType::Mythen);

    assert_eq!(
        detector
            .set_settings(DetectorSettings::HighGain)
            .await
            .unwrap(),
        DetectorSettings::HighGain
    );
    assert_eq!(detector.settings().await.unwrap(), DetectorSettings::HighGain);

    assert_eq!(detector.set_energy_threshold(6500).await.unwrap(), 6500);
    assert_eq!(detector.energy_threshold().await.unwrap(), 6500);

    let flags = ReadoutFlags::STORE_IN_RAM | ReadoutFlags::TOT_MODE;
    assert_eq!(detector.set_readout_flags(flags).await.unwrap(), flags);
    assert_eq!(detector.readout_flags().await.unwrap(), flags);

    assert_eq!(
        detector
            .set_synchronization_mode(SynchronizationMode::MasterGates)
            .await
            .unwrap(),
        SynchronizationMode::MasterGates
    );
    assert_eq!(
        detector
            .set_master_mode(MasterMode::IsMaster)
            .await
            .unwrap(),
        MasterMode::IsMaster
    );

    assert_eq!(
        detector.set_speed(SpeedType::ClockDivider, 4).await.unwrap(),
        4
    );
    assert_eq!(detector.speed(SpeedType::ClockDivider).await.unwrap(), 4);

    assert!(detector.lock_server(true).await.unwrap());
    assert!(detector.server_locked().await.unwrap());
    assert!(!detector.lock_server(false).await.unwrap());

    let rois = [Roi {
        xmin: 0,
        xmax: 1279,
        ymin: 0,
        ymax: 0,
    }];
    assert_eq!(detector.set_rois(&rois).await.unwrap(), rois.to_vec());
    assert_eq!(detector.rois().await.unwrap(), rois.to_vec());

    assert!(detector
        .get_id(IdParam::DetectorSerialNumber)
        .await
        .unwrap()
        > 0);
}
