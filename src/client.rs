//! Detector client: the `Detector` orchestrator and the `Acquisition`
//! streaming session.
//!
//! The detector listens on two ports: a control port for configuration
//! and data readout, and a stop port that stays responsive while an
//! acquisition occupies the control socket. Every request opens a fresh
//! connection, performs one exchange, and releases it; the one exception
//! is [`Detector::acquire`], whose control connection stays open for the
//! whole frame stream.
//!
//! Stale-state resync is transparent: when a control reply carries
//! `FORCE_UPDATE` instead of `OK`, the payload is read normally and
//! [`Detector::update_client`] runs before the call returns, so the
//! cached [`DetectorSnapshot`] is never silently out of date.

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::timeout;

use crate::error::{SlsError, SlsResult};
use crate::network::connection::Connection;
use crate::network::protocol::{
    self, get_ip, DetectorSettings, DetectorSnapshot, DetectorType, Dimension, Frame, IdParam,
    MasterMode, ReadoutFlags, ResultType, Roi, RunStatus, SpeedType, SynchronizationMode,
    TimingMode, GET_CODE, INET_ADDRSTRLEN, SNAPSHOT_LEN,
};

/// Client handle for one detector.
///
/// Holds no open sockets between calls; only the addresses and the last
/// snapshot fetched by [`Detector::update_client`].
pub struct Detector {
    ctrl_addr: SocketAddr,
    stop_addr: SocketAddr,
    snapshot: Option<DetectorSnapshot>,
}

impl Detector {
    pub fn new(ctrl_addr: SocketAddr, stop_addr: SocketAddr) -> Self {
        Detector {
            ctrl_addr,
            stop_addr,
            snapshot: None,
        }
    }

    /// Last snapshot fetched by [`Detector::update_client`], if any.
    pub fn snapshot(&self) -> Option<&DetectorSnapshot> {
        self.snapshot.as_ref()
    }

    // -------------------------------------------------------------------
    // Exchange plumbing
    // -------------------------------------------------------------------

    /// Opens a control connection, sends one request and consumes the
    /// result code. `FAIL` becomes `SlsError::Detector` with the
    /// server's message; on `OK`/`FORCE_UPDATE` the caller reads the
    /// payload from the returned connection.
    async fn ctrl_exchange(&self, request: &[u8]) -> SlsResult<(ResultType, Connection)> {
        let mut conn = Connection::connect(self.ctrl_addr).await?;
        conn.write_all(request).await?;
        let result = conn.read_result().await?;
        if result == ResultType::Fail {
            let message = conn.read_message().await?;
            return Err(SlsError::Detector(message));
        }
        Ok((result, conn))
    }

    /// Funnel for every fixed-payload control command: exchange, read
    /// `payload_len` bytes, release the connection, resync if stale.
    async fn ctrl_request(&mut self, request: &[u8], payload_len: usize) -> SlsResult<Vec<u8>> {
        let (result, mut conn) = self.ctrl_exchange(request).await?;
        let payload = if payload_len > 0 {
            conn.read_exact(payload_len).await?
        } else {
            Vec::new()
        };
        drop(conn);
        self.resync_if_stale(result).await?;
        Ok(payload)
    }

    async fn ctrl_i32(&mut self, request: &[u8]) -> SlsResult<i32> {
        let payload = self.ctrl_request(request, 4).await?;
        let mut cursor = 0;
        protocol::get_i32(&payload, &mut cursor)
    }

    async fn ctrl_i64(&mut self, request: &[u8]) -> SlsResult<i64> {
        let payload = self.ctrl_request(request, 8).await?;
        let mut cursor = 0;
        protocol::get_i64(&payload, &mut cursor)
    }

    async fn resync_if_stale(&mut self, result: ResultType) -> SlsResult<()> {
        if result == ResultType::ForceUpdate {
            debug!("server reports stale client state, refreshing snapshot");
            self.update_client().await?;
        }
        Ok(())
    }

    /// One exchange over the stop connection. Stop-port commands are not
    /// subject to the stale-client rule.
    async fn stop_request(&mut self, request: &[u8], payload_len: usize) -> SlsResult<Vec<u8>> {
        let mut conn = Connection::connect(self.stop_addr).await?;
        conn.write_all(request).await?;
        let result = conn.read_result().await?;
        if result == ResultType::Fail {
            let message = conn.read_message().await?;
            return Err(SlsError::Detector(message));
        }
        if payload_len > 0 {
            conn.read_exact(payload_len).await
        } else {
            Ok(Vec::new())
        }
    }

    // -------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------

    /// Fetches the full detector state and replaces the cached snapshot.
    /// Also registers this client as the detector's current client.
    pub async fn update_client(&mut self) -> SlsResult<DetectorSnapshot> {
        let mut conn = Connection::connect(self.ctrl_addr).await?;
        conn.write_all(&protocol::update_client_request()).await?;
        let result = conn.read_result().await?;
        if result == ResultType::Fail {
            let message = conn.read_message().await?;
            return Err(SlsError::Detector(message));
        }
        let payload = conn.read_exact(SNAPSHOT_LEN).await?;
        let snapshot = DetectorSnapshot::decode(&payload)?;
        debug!(
            "snapshot refreshed: {} modules, dynamic range {}, {} frames x {} cycles",
            snapshot.nb_modules, snapshot.dynamic_range, snapshot.nb_frames, snapshot.nb_cycles
        );
        self.snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    // -------------------------------------------------------------------
    // Timers (get-or-set; time-valued members are seconds at this API)
    // -------------------------------------------------------------------

    async fn timer(&mut self, timer: protocol::TimerType, value: i64) -> SlsResult<i64> {
        self.ctrl_i64(&protocol::timer_request(timer, value)).await
    }

    pub async fn exposure_time(&mut self) -> SlsResult<f64> {
        let ns = self
            .timer(protocol::TimerType::AcquisitionTime, GET_CODE)
            .await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn set_exposure_time(&mut self, seconds: f64) -> SlsResult<f64> {
        let ns = self
            .timer(
                protocol::TimerType::AcquisitionTime,
                protocol::seconds_to_ns(seconds),
            )
            .await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn frame_period(&mut self) -> SlsResult<f64> {
        let ns = self.timer(protocol::TimerType::FramePeriod, GET_CODE).await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn set_frame_period(&mut self, seconds: f64) -> SlsResult<f64> {
        let ns = self
            .timer(
                protocol::TimerType::FramePeriod,
                protocol::seconds_to_ns(seconds),
            )
            .await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn delay_after_trigger(&mut self) -> SlsResult<f64> {
        let ns = self
            .timer(protocol::TimerType::DelayAfterTrigger, GET_CODE)
            .await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn set_delay_after_trigger(&mut self, seconds: f64) -> SlsResult<f64> {
        let ns = self
            .timer(
                protocol::TimerType::DelayAfterTrigger,
                protocol::seconds_to_ns(seconds),
            )
            .await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn nb_frames(&mut self) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbFrames, GET_CODE).await
    }

    pub async fn set_nb_frames(&mut self, value: i64) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbFrames, value).await
    }

    pub async fn nb_cycles(&mut self) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbCycles, GET_CODE).await
    }

    pub async fn set_nb_cycles(&mut self, value: i64) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbCycles, value).await
    }

    pub async fn nb_gates(&mut self) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbGates, GET_CODE).await
    }

    pub async fn set_nb_gates(&mut self, value: i64) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbGates, value).await
    }

    pub async fn nb_probes(&mut self) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbProbes, GET_CODE).await
    }

    pub async fn set_nb_probes(&mut self, value: i64) -> SlsResult<i64> {
        self.timer(protocol::TimerType::NbProbes, value).await
    }

    pub async fn measurement_time(&mut self) -> SlsResult<f64> {
        let ns = self
            .timer(protocol::TimerType::MeasurementTime, GET_CODE)
            .await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    // -------------------------------------------------------------------
    // Configuration accessors
    // -------------------------------------------------------------------

    pub async fn energy_threshold(&mut self) -> SlsResult<i32> {
        self.ctrl_i32(&protocol::get_energy_threshold_request(-1))
            .await
    }

    pub async fn set_energy_threshold(&mut self, energy_ev: i32) -> SlsResult<i32> {
        let settings = self.settings().await?;
        self.ctrl_i32(&protocol::set_energy_threshold_request(
            energy_ev,
            -1,
            settings as i32,
        ))
        .await
    }

    pub async fn settings(&mut self) -> SlsResult<DetectorSettings> {
        let raw = self
            .ctrl_i32(&protocol::settings_request(GET_CODE as i32, -1))
            .await?;
        DetectorSettings::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown detector settings value {raw}")))
    }

    pub async fn set_settings(&mut self, settings: DetectorSettings) -> SlsResult<DetectorSettings> {
        let raw = self
            .ctrl_i32(&protocol::settings_request(settings as i32, -1))
            .await?;
        DetectorSettings::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown detector settings value {raw}")))
    }

    /// Logical dynamic range (8, 16, 24 or 32). The 24-bit range is 32
    /// on the wire; the translation is invisible here.
    pub async fn dynamic_range(&mut self) -> SlsResult<i32> {
        let wire = self
            .ctrl_i32(&protocol::dynamic_range_request(GET_CODE as i32))
            .await?;
        Ok(protocol::dynamic_range_from_wire(wire))
    }

    pub async fn set_dynamic_range(&mut self, dynamic_range: i32) -> SlsResult<i32> {
        let wire = self
            .ctrl_i32(&protocol::dynamic_range_request(
                protocol::dynamic_range_to_wire(dynamic_range),
            ))
            .await?;
        Ok(protocol::dynamic_range_from_wire(wire))
    }

    pub async fn readout_flags(&mut self) -> SlsResult<ReadoutFlags> {
        let raw = self
            .ctrl_i32(&protocol::readout_flags_request(GET_CODE as i32))
            .await?;
        ReadoutFlags::from_bits(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown readout flag bits {raw:#x}")))
    }

    pub async fn set_readout_flags(&mut self, flags: ReadoutFlags) -> SlsResult<ReadoutFlags> {
        let raw = self
            .ctrl_i32(&protocol::readout_flags_request(flags.bits()))
            .await?;
        ReadoutFlags::from_bits(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown readout flag bits {raw:#x}")))
    }

    pub async fn synchronization_mode(&mut self) -> SlsResult<SynchronizationMode> {
        let raw = self
            .ctrl_i32(&protocol::synchronization_mode_request(GET_CODE as i32))
            .await?;
        SynchronizationMode::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown synchronization mode {raw}")))
    }

    pub async fn set_synchronization_mode(
        &mut self,
        mode: SynchronizationMode,
    ) -> SlsResult<SynchronizationMode> {
        let raw = self
            .ctrl_i32(&protocol::synchronization_mode_request(mode as i32))
            .await?;
        SynchronizationMode::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown synchronization mode {raw}")))
    }

    pub async fn timing_mode(&mut self) -> SlsResult<TimingMode> {
        let raw = self
            .ctrl_i32(&protocol::timing_mode_request(GET_CODE as i32))
            .await?;
        TimingMode::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown timing mode {raw}")))
    }

    pub async fn set_timing_mode(&mut self, mode: TimingMode) -> SlsResult<TimingMode> {
        let raw = self.ctrl_i32(&protocol::timing_mode_request(mode as i32)).await?;
        TimingMode::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown timing mode {raw}")))
    }

    pub async fn nb_modules(&mut self, dimension: Dimension) -> SlsResult<i32> {
        self.ctrl_i32(&protocol::nb_modules_request(dimension, GET_CODE as i32))
            .await
    }

    pub async fn set_nb_modules(&mut self, dimension: Dimension, n: i32) -> SlsResult<i32> {
        self.ctrl_i32(&protocol::nb_modules_request(dimension, n))
            .await
    }

    pub async fn master_mode(&mut self) -> SlsResult<MasterMode> {
        let raw = self
            .ctrl_i32(&protocol::master_mode_request(GET_CODE as i32))
            .await?;
        MasterMode::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown master mode {raw}")))
    }

    pub async fn set_master_mode(&mut self, mode: MasterMode) -> SlsResult<MasterMode> {
        let raw = self.ctrl_i32(&protocol::master_mode_request(mode as i32)).await?;
        MasterMode::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown master mode {raw}")))
    }

    pub async fn speed(&mut self, speed: SpeedType) -> SlsResult<i32> {
        self.ctrl_i32(&protocol::speed_request(speed, GET_CODE as i32))
            .await
    }

    pub async fn set_speed(&mut self, speed: SpeedType, value: i32) -> SlsResult<i32> {
        self.ctrl_i32(&protocol::speed_request(speed, value)).await
    }

    pub async fn server_locked(&mut self) -> SlsResult<bool> {
        let raw = self
            .ctrl_i32(&protocol::lock_server_request(GET_CODE as i32))
            .await?;
        Ok(raw != 0)
    }

    pub async fn lock_server(&mut self, locked: bool) -> SlsResult<bool> {
        let raw = self
            .ctrl_i32(&protocol::lock_server_request(i32::from(locked)))
            .await?;
        Ok(raw != 0)
    }

    pub async fn last_client_ip(&mut self) -> SlsResult<String> {
        let payload = self
            .ctrl_request(&protocol::get_last_client_ip_request(), INET_ADDRSTRLEN)
            .await?;
        let mut cursor = 0;
        get_ip(&payload, &mut cursor)
    }

    pub async fn detector_type(&mut self) -> SlsResult<DetectorType> {
        let raw = self.ctrl_i32(&protocol::get_detector_type_request()).await?;
        DetectorType::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown detector type {raw}")))
    }

    pub async fn get_id(&mut self, param: IdParam) -> SlsResult<i64> {
        self.ctrl_i64(&protocol::get_id_request(param)).await
    }

    pub async fn rois(&mut self) -> SlsResult<Vec<Roi>> {
        let (result, mut conn) = self.ctrl_exchange(&protocol::get_rois_request()).await?;
        let rois = Self::read_roi_list(&mut conn).await?;
        drop(conn);
        self.resync_if_stale(result).await?;
        Ok(rois)
    }

    pub async fn set_rois(&mut self, rois: &[Roi]) -> SlsResult<Vec<Roi>> {
        let (result, mut conn) = self.ctrl_exchange(&protocol::set_rois_request(rois)).await?;
        let rois = Self::read_roi_list(&mut conn).await?;
        drop(conn);
        self.resync_if_stale(result).await?;
        Ok(rois)
    }

    async fn read_roi_list(conn: &mut Connection) -> SlsResult<Vec<Roi>> {
        let count = conn.read_i32().await?;
        if !(0..=protocol::MAX_ROIS).contains(&count) {
            return Err(SlsError::Protocol(format!("implausible roi count {count}")));
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
        Ok(rois)
    }

    // -------------------------------------------------------------------
    // Acquisition control
    // -------------------------------------------------------------------

    pub async fn start_acquisition(&mut self) -> SlsResult<()> {
        self.ctrl_request(&protocol::start_acquisition_request(), 0)
            .await?;
        Ok(())
    }

    /// Stops a running acquisition over the stop connection. The peer
    /// closing the socket mid-exchange counts as success: the detector
    /// is no longer acquiring either way.
    pub async fn stop_acquisition(&mut self) -> SlsResult<()> {
        match self
            .stop_request(&protocol::stop_acquisition_request(), 0)
            .await
        {
            Ok(_) => Ok(()),
            Err(SlsError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn run_status(&mut self) -> SlsResult<RunStatus> {
        let payload = self
            .stop_request(&protocol::get_run_status_request(), 4)
            .await?;
        let mut cursor = 0;
        let raw = protocol::get_i32(&payload, &mut cursor)?;
        RunStatus::from_i32(raw)
            .ok_or_else(|| SlsError::Protocol(format!("unknown run status {raw}")))
    }

    async fn time_left(&mut self, timer: protocol::TimerType) -> SlsResult<i64> {
        let payload = self
            .stop_request(&protocol::get_time_left_request(timer), 8)
            .await?;
        let mut cursor = 0;
        protocol::get_i64(&payload, &mut cursor)
    }

    pub async fn exposure_time_left(&mut self) -> SlsResult<f64> {
        let ns = self.time_left(protocol::TimerType::AcquisitionTime).await?;
        Ok(protocol::ns_to_seconds(ns))
    }

    pub async fn nb_frames_left(&mut self) -> SlsResult<i64> {
        self.time_left(protocol::TimerType::NbFrames).await
    }

    pub async fn nb_cycles_left(&mut self) -> SlsResult<i64> {
        self.time_left(protocol::TimerType::NbCycles).await
    }

    /// Percentage of the acquisition completed, 0..=100.
    pub async fn progress(&mut self) -> SlsResult<i64> {
        self.time_left(protocol::TimerType::Progress).await
    }

    /// Starts a streamed acquisition and returns the session driving it.
    ///
    /// With `progress_interval` set, [`Acquisition::next_event`]
    /// interleaves [`AcquisitionEvent::Progress`] reports whenever no
    /// frame arrives within the interval.
    pub async fn acquire(
        &mut self,
        progress_interval: Option<Duration>,
    ) -> SlsResult<Acquisition<'_>> {
        let snapshot = self.update_client().await?;
        let mut conn = Connection::connect(self.ctrl_addr).await?;
        conn.write_all(&protocol::start_and_read_all_request())
            .await?;
        info!(
            "acquisition started: {} frames x {} cycles, {} bytes per frame",
            snapshot.nb_frames, snapshot.nb_cycles, snapshot.data_bytes
        );
        Ok(Acquisition {
            detector: self,
            conn: Some(conn),
            frame_bytes: snapshot.data_bytes as usize,
            dynamic_range: snapshot.dynamic_range,
            nb_frames: snapshot.nb_frames,
            nb_cycles: snapshot.nb_cycles,
            progress_interval,
            finished_message: None,
            stale_seen: false,
        })
    }
}

/// One event of a streamed acquisition.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    Frame(Frame),
    Progress(AcquisitionProgress),
}

/// Progress report derived from the stop-connection counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionProgress {
    /// Exposure time left in the current frame, seconds.
    pub exposure_time_left: f64,
    pub frames_finished: i64,
    pub cycles_finished: i64,
}

/// Live acquisition session holding the streaming control connection.
///
/// Terminal paths of [`Acquisition::next_event`] call
/// [`Acquisition::close`] internally; callers abandoning the stream
/// early must call it themselves. `close` issues a stop request exactly
/// once, while the control connection is still held, so the detector is
/// never left acquiring into a dead socket.
pub struct Acquisition<'a> {
    detector: &'a mut Detector,
    conn: Option<Connection>,
    frame_bytes: usize,
    dynamic_range: i32,
    nb_frames: i64,
    nb_cycles: i64,
    progress_interval: Option<Duration>,
    finished_message: Option<String>,
    stale_seen: bool,
}

impl Acquisition<'_> {
    /// Next frame or progress report; `Ok(None)` once the stream ended.
    pub async fn next_event(&mut self) -> SlsResult<Option<AcquisitionEvent>> {
        if self.conn.is_none() {
            return Ok(None);
        }
        if let Some(interval) = self.progress_interval {
            if let Some(progress) = self.wait_readable_or_report(interval).await? {
                return Ok(Some(AcquisitionEvent::Progress(progress)));
            }
        }
        match self.read_stream_event().await {
            Ok(event) => {
                if self.stale_seen {
                    self.stale_seen = false;
                    self.detector.update_client().await?;
                }
                Ok(event)
            }
            Err(e) => {
                // best-effort stop; the stream error is the one to report
                if let Err(stop_err) = self.close().await {
                    warn!("stop after stream failure also failed: {stop_err}");
                }
                Err(e)
            }
        }
    }

    /// Races socket readability against the progress interval. Readiness
    /// is probed without consuming bytes, so a frame straddling the
    /// deadline is never half-read.
    async fn wait_readable_or_report(
        &mut self,
        interval: Duration,
    ) -> SlsResult<Option<AcquisitionProgress>> {
        let readable = match &self.conn {
            Some(conn) => timeout(interval, conn.readable()).await,
            None => return Ok(None),
        };
        match readable {
            Ok(ready) => {
                ready?;
                Ok(None)
            }
            Err(_elapsed) => {
                let exposure_time_left = self.detector.exposure_time_left().await?;
                let frames_left = self.detector.nb_frames_left().await?;
                let cycles_left = self.detector.nb_cycles_left().await?;
                Ok(Some(AcquisitionProgress {
                    exposure_time_left,
                    frames_finished: self.nb_frames - frames_left,
                    cycles_finished: self.nb_cycles - cycles_left,
                }))
            }
        }
    }

    async fn read_stream_event(&mut self) -> SlsResult<Option<AcquisitionEvent>> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Ok(None),
        };
        match conn.read_result().await? {
            result @ (ResultType::Ok | ResultType::ForceUpdate) => {
                let payload = conn.read_exact(self.frame_bytes).await?;
                let frame = Frame::decode(&payload, self.dynamic_range)?;
                // resync happens after the stream exchange completes
                self.stale_seen |= result == ResultType::ForceUpdate;
                Ok(Some(AcquisitionEvent::Frame(frame)))
            }
            ResultType::Finished => {
                let message = conn.read_message().await?;
                info!("acquisition finished: {message}");
                self.finished_message = Some(message);
                self.close().await?;
                Ok(None)
            }
            ResultType::Fail => {
                let message = conn.read_message().await?;
                Err(SlsError::Detector(message))
            }
        }
    }

    /// Completion message carried by the trailing FINISHED reply, once
    /// the stream has ended.
    pub fn finished_message(&self) -> Option<&str> {
        self.finished_message.as_deref()
    }

    /// Whether the streaming connection is still open.
    pub fn is_active(&self) -> bool {
        self.conn.is_some()
    }

    /// Stops the acquisition and releases the streaming connection.
    /// Idempotent; the stop request goes out before the control
    /// connection is dropped.
    pub async fn close(&mut self) -> SlsResult<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        let stopped = self.detector.stop_acquisition().await;
        self.conn = None;
        stopped
    }
}

impl Drop for Acquisition<'_> {
    fn drop(&mut self) {
        // Async teardown cannot run here; the stop request needs close().
        if self.conn.is_some() {
            warn!("acquisition session dropped without close(); detector may still be acquiring");
        }
    }
}
