//! Protocol-compatible detector simulator.
//!
//! Listens on the same two ports a real detector server does: the
//! control port serves configuration and frame readout, the stop port
//! stays responsive during acquisitions for STOP_ACQUISITION,
//! GET_RUN_STATUS and GET_TIME_LEFT. Every accepted connection runs in
//! its own task; all mutable state lives in one [`DetectorState`]
//! behind a single mutex.
//!
//! Dispatch is an explicit match over [`CommandCode`]. A handler fault
//! becomes a FAIL reply carrying the error's display text, then the
//! connection closes; the listeners keep serving.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, Instant};

use crate::config::SimulatorSettings;
use crate::error::{SlsError, SlsResult};
use crate::network::connection::Connection;
use crate::network::protocol::{
    self, bytes_per_count, max_count, CommandCode, DetectorSettings, DetectorSnapshot,
    DetectorType, Dimension, Frame, IdParam, MasterMode, ReadoutFlags, ResultType, Roi, RunStatus,
    SpeedType, SynchronizationMode, TimerType, TimingMode, GET_CODE, MAX_ROIS,
};

/// Deterministic synthetic counts for one frame.
///
/// Each frame draws from its own rng seeded with `seed + frame_index`,
/// so frame content depends only on the configured seed and the frame's
/// position in the stream, never on timing.
pub fn synth_counts(seed: u64, frame_index: u64, nb_channels: usize, dynamic_range: i32) -> Vec<i32> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(frame_index));
    let ceiling = max_count(dynamic_range);
    (0..nb_channels).map(|_| rng.gen_range(0..=ceiling)).collect()
}

/// All mutable simulator state. One instance per simulator, one mutex.
#[derive(Debug)]
pub struct DetectorState {
    pub nb_modules: i32,
    pub nb_modules_y: i32,
    pub nb_chips: i32,
    pub nb_channels: i32,
    /// Logical dynamic range (24, never 32, for the 24-bit mode).
    pub dynamic_range: i32,
    pub settings: DetectorSettings,
    pub energy_threshold: i32,
    pub nb_frames: i64,
    /// Exposure per frame, nanoseconds.
    pub acq_time: i64,
    /// Frame start to frame start, nanoseconds.
    pub frame_period: i64,
    pub delay_after_trigger: i64,
    pub nb_gates: i64,
    pub nb_probes: i64,
    pub nb_cycles: i64,
    pub readout_flags: ReadoutFlags,
    pub timing_mode: TimingMode,
    pub master_mode: MasterMode,
    pub synchronization_mode: SynchronizationMode,
    pub speeds: [i32; 5],
    pub rois: Vec<Roi>,
    pub locked: bool,
    /// IP of the client registered by the last UPDATE_CLIENT; empty
    /// until a client registered.
    pub last_client_ip: String,
    pub run_status: RunStatus,
    pub seed: u64,
    // live acquisition counters, authoritative for GET_TIME_LEFT
    frames_left: i64,
    cycles_left: i64,
    units_total: i64,
    units_done: i64,
    exposure_deadline: Option<Instant>,
    run_started: Option<Instant>,
}

impl DetectorState {
    fn new(settings: &SimulatorSettings) -> Self {
        DetectorState {
            nb_modules: settings.nb_modules,
            nb_modules_y: 1,
            nb_chips: settings.nb_chips,
            nb_channels: settings.nb_channels,
            dynamic_range: 24,
            settings: DetectorSettings::Standard,
            energy_threshold: 8000,
            nb_frames: 1,
            acq_time: 1_000_000_000,
            frame_period: 0,
            delay_after_trigger: 0,
            nb_gates: 0,
            nb_probes: 0,
            nb_cycles: 1,
            readout_flags: ReadoutFlags::NORMAL,
            timing_mode: TimingMode::Auto,
            master_mode: MasterMode::NoMaster,
            synchronization_mode: SynchronizationMode::None,
            speeds: [1, 0, 1, 0, 0],
            rois: Vec::new(),
            locked: false,
            last_client_ip: String::new(),
            run_status: RunStatus::Idle,
            seed: settings.seed,
            frames_left: 0,
            cycles_left: 0,
            units_total: 0,
            units_done: 0,
            exposure_deadline: None,
            run_started: None,
        }
    }

    pub fn channels_total(&self) -> usize {
        self.nb_modules as usize * self.nb_chips as usize * self.nb_channels as usize
    }

    pub fn data_bytes(&self) -> i32 {
        (self.channels_total() * bytes_per_count(self.dynamic_range)) as i32
    }

    fn snapshot(&self) -> DetectorSnapshot {
        DetectorSnapshot {
            last_client_ip: self.last_client_ip.clone(),
            nb_modules: self.nb_modules,
            nb_modules_y: self.nb_modules_y,
            dynamic_range: self.dynamic_range,
            data_bytes: self.data_bytes(),
            settings: self.settings,
            energy_threshold: self.energy_threshold,
            nb_frames: self.nb_frames,
            acq_time: self.acq_time,
            frame_period: self.frame_period,
            delay_after_trigger: self.delay_after_trigger,
            nb_gates: self.nb_gates,
            nb_probes: self.nb_probes,
            nb_cycles: self.nb_cycles,
        }
    }

    fn timer_value(&self, timer: TimerType) -> i64 {
        match timer {
            TimerType::NbFrames => self.nb_frames,
            TimerType::AcquisitionTime => self.acq_time,
            TimerType::FramePeriod => self.frame_period,
            TimerType::DelayAfterTrigger => self.delay_after_trigger,
            TimerType::NbGates => self.nb_gates,
            TimerType::NbProbes => self.nb_probes,
            TimerType::NbCycles => self.nb_cycles,
            TimerType::ActualTime | TimerType::MeasurementTime => self
                .run_started
                .map(|t| t.elapsed().as_nanos() as i64)
                .unwrap_or(0),
            TimerType::Progress => self.progress_percent(),
            TimerType::MeasurementsNumber => self.units_done,
        }
    }

    fn set_timer_value(&mut self, timer: TimerType, value: i64) -> SlsResult<()> {
        if timer.is_read_only() {
            return Err(SlsError::Detector(format!("timer {timer:?} is read-only")));
        }
        if value < 0 {
            return Err(SlsError::Detector(format!(
                "timer {timer:?} cannot be set to {value}"
            )));
        }
        match timer {
            TimerType::NbFrames => self.nb_frames = value,
            TimerType::AcquisitionTime => self.acq_time = value,
            TimerType::FramePeriod => self.frame_period = value,
            TimerType::DelayAfterTrigger => self.delay_after_trigger = value,
            TimerType::NbGates => self.nb_gates = value,
            TimerType::NbProbes => self.nb_probes = value,
            TimerType::NbCycles => self.nb_cycles = value,
            TimerType::ActualTime
            | TimerType::MeasurementsNumber
            | TimerType::MeasurementTime
            | TimerType::Progress => {
                return Err(SlsError::Detector(format!("timer {timer:?} cannot be set")))
            }
        }
        Ok(())
    }

    fn progress_percent(&self) -> i64 {
        if self.units_total == 0 {
            return 0;
        }
        self.units_done * 100 / self.units_total
    }

    fn time_left(&self, timer: TimerType) -> SlsResult<i64> {
        match timer {
            TimerType::AcquisitionTime => Ok(self
                .exposure_deadline
                .map(|deadline| {
                    deadline
                        .saturating_duration_since(Instant::now())
                        .as_nanos() as i64
                })
                .unwrap_or(0)),
            TimerType::NbFrames => Ok(self.frames_left),
            TimerType::NbCycles => Ok(self.cycles_left),
            TimerType::Progress => Ok(self.progress_percent()),
            TimerType::MeasurementsNumber => Ok(self.units_done),
            TimerType::ActualTime | TimerType::MeasurementTime => Ok(self
                .run_started
                .map(|t| t.elapsed().as_nanos() as i64)
                .unwrap_or(0)),
            _ => Err(SlsError::Detector(format!(
                "no time-left counter for timer {timer:?}"
            ))),
        }
    }

    fn begin_run(&mut self, now: Instant) {
        self.run_status = RunStatus::Running;
        self.frames_left = self.nb_frames;
        self.cycles_left = self.nb_cycles;
        self.units_total = self.nb_frames * self.nb_cycles;
        self.units_done = 0;
        self.run_started = Some(now);
        self.exposure_deadline = None;
    }

    fn end_run(&mut self, status: RunStatus) {
        self.run_status = status;
        self.frames_left = 0;
        self.cycles_left = 0;
        self.exposure_deadline = None;
    }
}

/// Cancellation flag raced by the frame loop between sleeps.
///
/// The `Notify` future is created before the flag check, so a trigger
/// landing between check and await still wakes the sleeper.
#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless stopped first; returns whether the
    /// full duration elapsed.
    async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = sleep(duration) => !self.is_stopped(),
            _ = &mut notified => false,
        }
    }
}

#[derive(Clone, Copy)]
enum Port {
    Ctrl,
    Stop,
}

/// The simulator server. Bind, read the ephemeral addresses if needed,
/// then [`Simulator::run`] it (usually inside `tokio::spawn`).
pub struct Simulator {
    state: Arc<Mutex<DetectorState>>,
    stop_signal: Arc<StopSignal>,
    ctrl_listener: TcpListener,
    stop_listener: TcpListener,
}

impl Simulator {
    pub async fn bind(settings: &SimulatorSettings) -> SlsResult<Self> {
        let ctrl_listener =
            TcpListener::bind((settings.host.as_str(), settings.ctrl_port)).await?;
        let stop_listener =
            TcpListener::bind((settings.host.as_str(), settings.stop_port)).await?;
        info!(
            "simulator listening on {} (ctrl) / {} (stop)",
            ctrl_listener.local_addr()?,
            stop_listener.local_addr()?
        );
        Ok(Simulator {
            state: Arc::new(Mutex::new(DetectorState::new(settings))),
            stop_signal: Arc::new(StopSignal::default()),
            ctrl_listener,
            stop_listener,
        })
    }

    pub fn ctrl_addr(&self) -> SlsResult<SocketAddr> {
        Ok(self.ctrl_listener.local_addr()?)
    }

    pub fn stop_addr(&self) -> SlsResult<SocketAddr> {
        Ok(self.stop_listener.local_addr()?)
    }

    /// Shared handle to the detector state, for inspection and test
    /// setup (e.g. pre-seeding a registered client).
    pub fn state(&self) -> Arc<Mutex<DetectorState>> {
        Arc::clone(&self.state)
    }

    /// Serves both listeners until the task is cancelled.
    pub async fn run(self) -> SlsResult<()> {
        let ctrl = accept_loop(
            self.ctrl_listener,
            Port::Ctrl,
            Arc::clone(&self.state),
            Arc::clone(&self.stop_signal),
        );
        let stop = accept_loop(
            self.stop_listener,
            Port::Stop,
            self.state,
            self.stop_signal,
        );
        tokio::try_join!(ctrl, stop)?;
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    port: Port,
    state: Arc<Mutex<DetectorState>>,
    stop_signal: Arc<StopSignal>,
) -> SlsResult<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("accepted {peer}");
        let state = Arc::clone(&state);
        let stop_signal = Arc::clone(&stop_signal);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, peer, port, state, stop_signal).await {
                match e {
                    SlsError::ConnectionClosed => debug!("{peer} disconnected"),
                    other => warn!("connection to {peer} ended with error: {other}"),
                }
            }
        });
    }
}

/// One request/reply at a time until the peer closes. A handler fault
/// is answered with FAIL plus the error text, then the connection is
/// closed.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    port: Port,
    state: Arc<Mutex<DetectorState>>,
    stop_signal: Arc<StopSignal>,
) -> SlsResult<()> {
    let mut conn = Connection::from_stream(stream, peer)?;
    loop {
        let raw = match conn.read_i32().await {
            Ok(raw) => raw,
            Err(SlsError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let code = match CommandCode::from_i32(raw) {
            Some(code) => code,
            None => {
                let fault = SlsError::Protocol(format!("unknown command code {raw}"));
                reply_fail(&mut conn, &fault).await?;
                return Ok(());
            }
        };
        debug!("{peer} -> {code:?}");
        let outcome = match port {
            Port::Ctrl => {
                handle_ctrl_command(&mut conn, peer, code, &state, &stop_signal).await
            }
            Port::Stop => handle_stop_command(&mut conn, code, &state, &stop_signal).await,
        };
        match outcome {
            Ok(()) => {}
            Err(SlsError::ConnectionClosed) => return Ok(()),
            Err(SlsError::Io(e)) => return Err(SlsError::Io(e)),
            Err(fault) => {
                debug!("{peer} {code:?} failed: {fault}");
                reply_fail(&mut conn, &fault).await?;
                return Ok(());
            }
        }
    }
}

async fn reply(conn: &mut Connection, result: ResultType, payload: &[u8]) -> SlsResult<()> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    protocol::put_i32(&mut buf, result as i32);
    buf.extend_from_slice(payload);
    conn.write_all(&buf).await
}

async fn reply_i32(conn: &mut Connection, result: ResultType, value: i32) -> SlsResult<()> {
    reply(conn, result, &value.to_le_bytes()).await
}

async fn reply_i64(conn: &mut Connection, result: ResultType, value: i64) -> SlsResult<()> {
    reply(conn, result, &value.to_le_bytes()).await
}

async fn reply_fail(conn: &mut Connection, fault: &SlsError) -> SlsResult<()> {
    reply(conn, ResultType::Fail, fault.to_string().as_bytes()).await
}

/// Success result for a control command from `peer`: OK when the peer
/// is the registered client (or none is registered), FORCE_UPDATE when
/// another client registered since. The payload is the same either way.
fn success_result(state: &DetectorState, peer: SocketAddr) -> ResultType {
    if state.last_client_ip.is_empty() || state.last_client_ip == peer.ip().to_string() {
        ResultType::Ok
    } else {
        ResultType::ForceUpdate
    }
}

async fn handle_ctrl_command(
    conn: &mut Connection,
    peer: SocketAddr,
    code: CommandCode,
    state: &Arc<Mutex<DetectorState>>,
    stop_signal: &Arc<StopSignal>,
) -> SlsResult<()> {
    match code {
        CommandCode::UpdateClient => {
            let payload = {
                let mut state = state.lock().await;
                // the snapshot reports the previously registered client
                let payload = state.snapshot().encode();
                state.last_client_ip = peer.ip().to_string();
                payload
            };
            reply(conn, ResultType::Ok, &payload).await
        }
        CommandCode::Timer => {
            let raw_timer = conn.read_i32().await?;
            let value = conn.read_i64().await?;
            let timer = TimerType::from_i32(raw_timer)
                .ok_or_else(|| SlsError::Protocol(format!("unknown timer type {raw_timer}")))?;
            let mut state = state.lock().await;
            if value != GET_CODE {
                state.set_timer_value(timer, value)?;
            }
            let result = success_result(&state, peer);
            let current = state.timer_value(timer);
            drop(state);
            reply_i64(conn, result, current).await
        }
        CommandCode::GetEnergyThreshold => {
            let _mod_nb = conn.read_i32().await?;
            let state = state.lock().await;
            let result = success_result(&state, peer);
            let threshold = state.energy_threshold;
            drop(state);
            reply_i32(conn, result, threshold).await
        }
        CommandCode::SetEnergyThreshold => {
            let energy = conn.read_i32().await?;
            let _mod_nb = conn.read_i32().await?;
            let _settings = conn.read_i32().await?;
            if energy < 0 {
                return Err(SlsError::Detector(format!(
                    "energy threshold {energy} is out of range"
                )));
            }
            let mut state = state.lock().await;
            state.energy_threshold = energy;
            let result = success_result(&state, peer);
            drop(state);
            reply_i32(conn, result, energy).await
        }
        CommandCode::SetSettings => {
            let value = conn.read_i32().await?;
            let _mod_nb = conn.read_i32().await?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                state.settings = DetectorSettings::from_i32(value).ok_or_else(|| {
                    SlsError::Detector(format!("unknown settings value {value}"))
                })?;
            }
            let result = success_result(&state, peer);
            let current = state.settings as i32;
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetDynamicRange => {
            let wire = conn.read_i32().await?;
            let mut state = state.lock().await;
            if wire != GET_CODE as i32 {
                // 24-bit mode arrives as 32 on the wire
                if !matches!(wire, 8 | 16 | 32) {
                    return Err(SlsError::Detector(format!(
                        "unsupported dynamic range {wire}"
                    )));
                }
                state.dynamic_range = protocol::dynamic_range_from_wire(wire);
            }
            let result = success_result(&state, peer);
            let current = protocol::dynamic_range_to_wire(state.dynamic_range);
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetReadoutFlags => {
            let bits = conn.read_i32().await?;
            let mut state = state.lock().await;
            if bits != GET_CODE as i32 {
                state.readout_flags = ReadoutFlags::from_bits(bits).ok_or_else(|| {
                    SlsError::Detector(format!("unknown readout flag bits {bits:#x}"))
                })?;
            }
            let result = success_result(&state, peer);
            let current = state.readout_flags.bits();
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetSpeed => {
            let raw_speed = conn.read_i32().await?;
            let value = conn.read_i32().await?;
            let speed = SpeedType::from_i32(raw_speed)
                .ok_or_else(|| SlsError::Protocol(format!("unknown speed type {raw_speed}")))?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                state.speeds[speed as usize] = value;
            }
            let result = success_result(&state, peer);
            let current = state.speeds[speed as usize];
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetExternalCommunicationMode => {
            let value = conn.read_i32().await?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                state.timing_mode = TimingMode::from_i32(value)
                    .ok_or_else(|| SlsError::Detector(format!("unknown timing mode {value}")))?;
            }
            let result = success_result(&state, peer);
            let current = state.timing_mode as i32;
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetNumberOfModules => {
            let raw_dimension = conn.read_i32().await?;
            let value = conn.read_i32().await?;
            let dimension = Dimension::from_i32(raw_dimension)
                .ok_or_else(|| SlsError::Protocol(format!("unknown dimension {raw_dimension}")))?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                if value < 1 {
                    return Err(SlsError::Detector(format!(
                        "cannot install {value} modules"
                    )));
                }
                match dimension {
                    Dimension::X => state.nb_modules = value,
                    Dimension::Y => state.nb_modules_y = value,
                }
            }
            let result = success_result(&state, peer);
            let current = match dimension {
                Dimension::X => state.nb_modules,
                Dimension::Y => state.nb_modules_y,
            };
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetMaster => {
            let value = conn.read_i32().await?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                state.master_mode = MasterMode::from_i32(value)
                    .ok_or_else(|| SlsError::Detector(format!("unknown master mode {value}")))?;
            }
            let result = success_result(&state, peer);
            let current = state.master_mode as i32;
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::SetSynchronizationMode => {
            let value = conn.read_i32().await?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                state.synchronization_mode =
                    SynchronizationMode::from_i32(value).ok_or_else(|| {
                        SlsError::Detector(format!("unknown synchronization mode {value}"))
                    })?;
            }
            let result = success_result(&state, peer);
            let current = state.synchronization_mode as i32;
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::LockServer => {
            let value = conn.read_i32().await?;
            let mut state = state.lock().await;
            if value != GET_CODE as i32 {
                state.locked = value != 0;
            }
            let result = success_result(&state, peer);
            let current = i32::from(state.locked);
            drop(state);
            reply_i32(conn, result, current).await
        }
        CommandCode::GetLastClientIp => {
            let state = state.lock().await;
            let result = success_result(&state, peer);
            let mut payload = Vec::with_capacity(protocol::INET_ADDRSTRLEN);
            protocol::put_ip(&mut payload, &state.last_client_ip);
            drop(state);
            reply(conn, result, &payload).await
        }
        CommandCode::GetDetectorType => {
            let state = state.lock().await;
            let result = success_result(&state, peer);
            drop(state);
            reply_i32(conn, result, DetectorType::Mythen as i32).await
        }
        CommandCode::GetId => {
            let raw_param = conn.read_i32().await?;
            let param = IdParam::from_i32(raw_param)
                .ok_or_else(|| SlsError::Protocol(format!("unknown id parameter {raw_param}")))?;
            let id: i64 = match param {
                IdParam::ModuleSerialNumber => 0x1b_0001,
                IdParam::ModuleFirmwareVersion => 0x0302,
                IdParam::DetectorSerialNumber => 0xdead_0001,
                IdParam::DetectorFirmwareVersion => 0x0401,
                IdParam::DetectorSoftwareVersion => 0x0100,
                IdParam::ReceiverVersion => 0,
            };
            let state = state.lock().await;
            let result = success_result(&state, peer);
            drop(state);
            reply_i64(conn, result, id).await
        }
        CommandCode::SetRoi => {
            let count = conn.read_i32().await?;
            let mut state = state.lock().await;
            if count != GET_CODE as i32 {
                if !(0..=MAX_ROIS).contains(&count) {
                    return Err(SlsError::Detector(format!("implausible roi count {count}")));
                }
                let mut rois = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    rois.push(Roi {
                        xmin: conn.read_i32().await?,
                        xmax: conn.read_i32().await?,
                        ymin: conn.read_i32().await?,
                        ymax: conn.read_i32().await?,
                    });
                }
                state.rois = rois;
            }
            let result = success_result(&state, peer);
            let mut payload = Vec::with_capacity(4 + state.rois.len() * 16);
            protocol::put_i32(&mut payload, state.rois.len() as i32);
            for roi in &state.rois {
                protocol::put_i32(&mut payload, roi.xmin);
                protocol::put_i32(&mut payload, roi.xmax);
                protocol::put_i32(&mut payload, roi.ymin);
                protocol::put_i32(&mut payload, roi.ymax);
            }
            drop(state);
            reply(conn, result, &payload).await
        }
        CommandCode::StartAcquisition => {
            let result = {
                let mut state_guard = state.lock().await;
                if state_guard.run_status != RunStatus::Idle
                    && state_guard.run_status != RunStatus::Error
                {
                    return Err(SlsError::Detector("acquisition already running".into()));
                }
                stop_signal.reset();
                state_guard.begin_run(Instant::now());
                success_result(&state_guard, peer)
            };
            tokio::spawn(background_acquisition(
                Arc::clone(state),
                Arc::clone(stop_signal),
            ));
            reply(conn, result, &[]).await
        }
        CommandCode::StartAndReadAll => {
            stream_acquisition(conn, peer, state, stop_signal).await
        }
        CommandCode::StopAcquisition => {
            stop_signal.trigger();
            let state = state.lock().await;
            let result = success_result(&state, peer);
            drop(state);
            reply(conn, result, &[]).await
        }
        other => Err(SlsError::Detector(format!(
            "command {other:?} is not implemented"
        ))),
    }
}

/// The stop port serves only the out-of-band commands and is exempt
/// from the stale-client rule.
async fn handle_stop_command(
    conn: &mut Connection,
    code: CommandCode,
    state: &Arc<Mutex<DetectorState>>,
    stop_signal: &Arc<StopSignal>,
) -> SlsResult<()> {
    match code {
        CommandCode::StopAcquisition => {
            stop_signal.trigger();
            debug!("stop requested");
            reply(conn, ResultType::Ok, &[]).await
        }
        CommandCode::GetRunStatus => {
            let status = state.lock().await.run_status;
            reply_i32(conn, ResultType::Ok, status as i32).await
        }
        CommandCode::GetTimeLeft => {
            let raw_timer = conn.read_i32().await?;
            let timer = TimerType::from_i32(raw_timer)
                .ok_or_else(|| SlsError::Protocol(format!("unknown timer type {raw_timer}")))?;
            let value = state.lock().await.time_left(timer)?;
            reply_i64(conn, ResultType::Ok, value).await
        }
        other => Err(SlsError::Detector(format!(
            "command {other:?} is not served on the stop connection"
        ))),
    }
}

/// Acquisition plan captured under the lock at start, so the frame loop
/// runs against one consistent configuration even if a concurrent
/// client mutates timers mid-run.
struct AcquisitionPlan {
    nb_frames: i64,
    nb_cycles: i64,
    acq_time: Duration,
    dead_time: Duration,
    delay: Duration,
    dynamic_range: i32,
    channels: usize,
    seed: u64,
}

impl AcquisitionPlan {
    fn capture(state: &DetectorState) -> Self {
        let dead_ns = (state.frame_period - state.acq_time).max(0);
        AcquisitionPlan {
            nb_frames: state.nb_frames.max(0),
            nb_cycles: state.nb_cycles.max(0),
            acq_time: Duration::from_nanos(state.acq_time.max(0) as u64),
            dead_time: Duration::from_nanos(dead_ns as u64),
            delay: Duration::from_nanos(state.delay_after_trigger.max(0) as u64),
            dynamic_range: state.dynamic_range,
            channels: state.channels_total(),
            seed: state.seed,
        }
    }
}

/// START_AND_READ_ALL: runs the full acquisition on this connection,
/// streaming one frame per exposure and trailing FINISHED. Frame
/// replies from a stale client carry FORCE_UPDATE instead of OK, same
/// payload. The stop signal is observed at every sleep; on cancellation
/// the stream ends with FINISHED and no further frames.
async fn stream_acquisition(
    conn: &mut Connection,
    peer: SocketAddr,
    state: &Arc<Mutex<DetectorState>>,
    stop_signal: &Arc<StopSignal>,
) -> SlsResult<()> {
    let (plan, frame_result) = {
        let mut state_guard = state.lock().await;
        if state_guard.run_status != RunStatus::Idle && state_guard.run_status != RunStatus::Error {
            return Err(SlsError::Detector("acquisition already running".into()));
        }
        stop_signal.reset();
        state_guard.begin_run(Instant::now());
        (
            AcquisitionPlan::capture(&state_guard),
            success_result(&state_guard, peer),
        )
    };
    info!(
        "streaming acquisition: {} frames x {} cycles",
        plan.nb_frames, plan.nb_cycles
    );

    let mut stopped = !stop_signal.sleep_unless_stopped(plan.delay).await;
    let mut frame_index: u64 = 0;
    'cycles: for cycle in 0..plan.nb_cycles {
        if stopped {
            break;
        }
        for frame in 0..plan.nb_frames {
            {
                let mut state_guard = state.lock().await;
                state_guard.run_status = RunStatus::Running;
                state_guard.cycles_left = plan.nb_cycles - cycle;
                state_guard.frames_left = plan.nb_frames - frame;
                state_guard.exposure_deadline = Some(Instant::now() + plan.acq_time);
            }
            if !stop_signal.sleep_unless_stopped(plan.acq_time).await {
                stopped = true;
                break 'cycles;
            }
            let frame = Frame {
                counts: synth_counts(plan.seed, frame_index, plan.channels, plan.dynamic_range),
            };
            frame_index += 1;
            {
                let mut state_guard = state.lock().await;
                state_guard.run_status = RunStatus::Transmitting;
                state_guard.exposure_deadline = None;
                state_guard.units_done += 1;
            }
            if let Err(e) = reply(conn, frame_result, &frame.encode(plan.dynamic_range)).await {
                error!("frame write failed mid acquisition: {e}");
                state.lock().await.end_run(RunStatus::Error);
                return Err(e);
            }
            if !stop_signal.sleep_unless_stopped(plan.dead_time).await {
                stopped = true;
                break 'cycles;
            }
        }
    }

    let message = if stopped {
        "acquisition stopped".to_owned()
    } else {
        format!(
            "acquisition successfully finished: {} frames x {} cycles",
            plan.nb_frames, plan.nb_cycles
        )
    };
    state.lock().await.end_run(RunStatus::Idle);
    reply(conn, ResultType::Finished, message.as_bytes()).await
}

/// START_ACQUISITION: same timing as the streaming run but no readout;
/// only the status and the time-left counters move.
async fn background_acquisition(state: Arc<Mutex<DetectorState>>, stop_signal: Arc<StopSignal>) {
    let plan = AcquisitionPlan::capture(&*state.lock().await);
    let mut stopped = !stop_signal.sleep_unless_stopped(plan.delay).await;
    'cycles: for cycle in 0..plan.nb_cycles {
        if stopped {
            break;
        }
        for frame in 0..plan.nb_frames {
            {
                let mut state_guard = state.lock().await;
                state_guard.run_status = RunStatus::Running;
                state_guard.cycles_left = plan.nb_cycles - cycle;
                state_guard.frames_left = plan.nb_frames - frame;
                state_guard.exposure_deadline = Some(Instant::now() + plan.acq_time);
            }
            if !stop_signal.sleep_unless_stopped(plan.acq_time).await {
                stopped = true;
                break 'cycles;
            }
            {
                let mut state_guard = state.lock().await;
                state_guard.exposure_deadline = None;
                state_guard.units_done += 1;
            }
            if !stop_signal.sleep_unless_stopped(plan.dead_time).await {
                stopped = true;
                break 'cycles;
            }
        }
    }
    if stopped {
        debug!("background acquisition stopped early");
    }
    state.lock().await.end_run(RunStatus::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synth_counts_are_deterministic_and_in_range() {
        let a = synth_counts(42, 0, 128, 16);
        let b = synth_counts(42, 0, 128, 16);
        assert_eq!(a, b);
        assert!(a.iter().all(|&c| (0..=i16::MAX as i32).contains(&c)));

        let other_frame = synth_counts(42, 1, 128, 16);
        assert_ne!(a, other_frame);
    }

    #[test]
    fn data_bytes_tracks_dynamic_range() {
        let settings = SimulatorSettings::default();
        let mut state = DetectorState::new(&settings);
        let channels = state.channels_total() as i32;
        state.dynamic_range = 24;
        assert_eq!(state.data_bytes(), channels * 4);
        state.dynamic_range = 16;
        assert_eq!(state.data_bytes(), channels * 2);
        state.dynamic_range = 8;
        assert_eq!(state.data_bytes(), channels);
    }

    #[test]
    fn read_only_timers_reject_sets() {
        let settings = SimulatorSettings::default();
        let mut state = DetectorState::new(&settings);
        let err = state.set_timer_value(TimerType::Progress, 5);
        assert!(matches!(err, Err(SlsError::Detector(_))));
        let err = state.set_timer_value(TimerType::MeasurementTime, 5);
        assert!(matches!(err, Err(SlsError::Detector(_))));
        assert!(state.set_timer_value(TimerType::NbFrames, 5).is_ok());
        assert_eq!(state.timer_value(TimerType::NbFrames), 5);
    }

    #[tokio::test]
    async fn stop_signal_wakes_a_sleeper() {
        let signal = Arc::new(StopSignal::default());
        let waiter = Arc::clone(&signal);
        let task =
            tokio::spawn(async move { waiter.sleep_unless_stopped(Duration::from_secs(30)).await });
        tokio::task::yield_now().await;
        signal.trigger();
        let completed = task.await.expect("join");
        assert!(!completed);
    }

    #[tokio::test]
    async fn stop_signal_trigger_before_sleep_is_not_lost() {
        let signal = StopSignal::default();
        signal.trigger();
        assert!(!signal.sleep_unless_stopped(Duration::from_secs(30)).await);
        signal.reset();
        assert!(signal.sleep_unless_stopped(Duration::from_millis(1)).await);
    }
}
