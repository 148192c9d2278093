//! Binary wire codec for the SLS detector control protocol.
//!
//! Every request is a 4-byte little-endian command code followed by
//! command-specific fixed-width fields (i32, i64, fixed-width NUL-padded
//! ASCII). There are no length prefixes; each command has a statically
//! known shape. Every reply starts with a 4-byte little-endian
//! [`ResultType`]:
//!
//! ```text
//! +-----------+---------------------------+
//! | ResultType| payload                   |
//! | (i32 LE)  | (command-specific, fixed) |
//! +-----------+---------------------------+
//! ```
//!
//! On `FAIL` the payload is replaced by a variable-length ASCII error
//! message; `FINISHED` trails the last frame of an acquisition stream
//! with a completion message.
//!
//! The pervasive get-or-set convention: sending [`GET_CODE`] (-1) as the
//! value field means "read, do not mutate"; any other value sets and the
//! reply echoes the resulting (possibly clamped) value.

use crate::error::{SlsError, SlsResult};

/// Default TCP port of the control connection.
pub const DEFAULT_CTRL_PORT: u16 = 1952;
/// Default TCP port of the out-of-band stop connection.
pub const DEFAULT_STOP_PORT: u16 = 1953;

/// Sentinel value meaning "read the current value, do not mutate".
pub const GET_CODE: i64 = -1;

/// Width of the fixed NUL-padded ASCII IP address field.
pub const INET_ADDRSTRLEN: usize = 16;

/// Wire size of a [`DetectorSnapshot`] reply.
pub const SNAPSHOT_LEN: usize = INET_ADDRSTRLEN + 6 * 4 + 7 * 8;

/// Upper bound on FAIL/FINISHED message length.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Upper bound on the number of regions of interest per detector.
pub const MAX_ROIS: i32 = 256;

// =============================================================================
// Wire enumerations
// =============================================================================

/// Closed enumeration of operation identifiers.
///
/// Discriminants are the authoritative wire values; the simulator answers
/// codes it does not implement with a FAIL reply, but the codec names the
/// whole command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CommandCode {
    ExecCommand = 0,
    GetError = 1,
    GetDetectorType = 2,
    SetNumberOfModules = 3,
    GetMaxNumberOfModules = 4,
    SetExternalSignalFlag = 5,
    SetExternalCommunicationMode = 6,
    GetId = 7,
    DigitalTest = 8,
    AnalogTest = 9,
    EnableAnalogOut = 10,
    CalibrationPulse = 11,
    SetDac = 12,
    GetAdc = 13,
    WriteRegister = 14,
    ReadRegister = 15,
    WriteMemory = 16,
    ReadMemory = 17,
    SetChannel = 18,
    GetChannel = 19,
    SetAllChannels = 20,
    SetChip = 21,
    GetChip = 22,
    SetAllChips = 23,
    SetModule = 24,
    GetModule = 25,
    SetAllModules = 26,
    SetSettings = 27,
    GetEnergyThreshold = 28,
    SetEnergyThreshold = 29,
    StartAcquisition = 30,
    StopAcquisition = 31,
    StartReadout = 32,
    GetRunStatus = 33,
    StartAndReadAll = 34,
    ReadFrame = 35,
    ReadAll = 36,
    Timer = 37,
    GetTimeLeft = 38,
    SetDynamicRange = 39,
    SetReadoutFlags = 40,
    SetRoi = 41,
    SetSpeed = 42,
    ExecuteTrimming = 43,
    ExitServer = 44,
    LockServer = 45,
    GetLastClientIp = 46,
    SetPort = 47,
    UpdateClient = 48,
    ConfigureMac = 49,
    LoadImage = 50,
    SetMaster = 51,
    SetSynchronizationMode = 52,
    ReadCounterBlock = 53,
    ResetCounterBlock = 54,
}

impl CommandCode {
    pub fn from_i32(value: i32) -> Option<Self> {
        use CommandCode::*;
        let code = match value {
            0 => ExecCommand,
            1 => GetError,
            2 => GetDetectorType,
            3 => SetNumberOfModules,
            4 => GetMaxNumberOfModules,
            5 => SetExternalSignalFlag,
            6 => SetExternalCommunicationMode,
            7 => GetId,
            8 => DigitalTest,
            9 => AnalogTest,
            10 => EnableAnalogOut,
            11 => CalibrationPulse,
            12 => SetDac,
            13 => GetAdc,
            14 => WriteRegister,
            15 => ReadRegister,
            16 => WriteMemory,
            17 => ReadMemory,
            18 => SetChannel,
            19 => GetChannel,
            20 => SetAllChannels,
            21 => SetChip,
            22 => GetChip,
            23 => SetAllChips,
            24 => SetModule,
            25 => GetModule,
            26 => SetAllModules,
            27 => SetSettings,
            28 => GetEnergyThreshold,
            29 => SetEnergyThreshold,
            30 => StartAcquisition,
            31 => StopAcquisition,
            32 => StartReadout,
            33 => GetRunStatus,
            34 => StartAndReadAll,
            35 => ReadFrame,
            36 => ReadAll,
            37 => Timer,
            38 => GetTimeLeft,
            39 => SetDynamicRange,
            40 => SetReadoutFlags,
            41 => SetRoi,
            42 => SetSpeed,
            43 => ExecuteTrimming,
            44 => ExitServer,
            45 => LockServer,
            46 => GetLastClientIp,
            47 => SetPort,
            48 => UpdateClient,
            49 => ConfigureMac,
            50 => LoadImage,
            51 => SetMaster,
            52 => SetSynchronizationMode,
            53 => ReadCounterBlock,
            54 => ResetCounterBlock,
            _ => return None,
        };
        Some(code)
    }
}

/// Result code prefixed to every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultType {
    Ok = 0,
    Fail = 1,
    Finished = 2,
    ForceUpdate = 3,
}

impl ResultType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ResultType::Ok),
            1 => Some(ResultType::Fail),
            2 => Some(ResultType::Finished),
            3 => Some(ResultType::ForceUpdate),
            _ => None,
        }
    }
}

/// Orthogonal numeric detector parameters addressed by the TIMER and
/// GET_TIME_LEFT commands.
///
/// Time-valued members travel as integer nanoseconds on the wire and are
/// presented as floating-point seconds at the client API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TimerType {
    NbFrames = 0,
    AcquisitionTime = 1,
    FramePeriod = 2,
    DelayAfterTrigger = 3,
    NbGates = 4,
    NbProbes = 5,
    NbCycles = 6,
    ActualTime = 7,
    MeasurementTime = 8,
    Progress = 9,
    MeasurementsNumber = 10,
}

impl TimerType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TimerType::NbFrames),
            1 => Some(TimerType::AcquisitionTime),
            2 => Some(TimerType::FramePeriod),
            3 => Some(TimerType::DelayAfterTrigger),
            4 => Some(TimerType::NbGates),
            5 => Some(TimerType::NbProbes),
            6 => Some(TimerType::NbCycles),
            7 => Some(TimerType::ActualTime),
            8 => Some(TimerType::MeasurementTime),
            9 => Some(TimerType::Progress),
            10 => Some(TimerType::MeasurementsNumber),
            _ => None,
        }
    }

    /// Wire value is nanoseconds, API value is seconds.
    pub fn is_time_valued(self) -> bool {
        matches!(
            self,
            TimerType::AcquisitionTime | TimerType::FramePeriod | TimerType::DelayAfterTrigger
        )
    }

    /// Members that can only be queried, never set.
    pub fn is_read_only(self) -> bool {
        matches!(self, TimerType::MeasurementTime | TimerType::Progress)
    }
}

/// Detector-side run state, queried over the stop connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RunStatus {
    /// Ready to start, no data in memory.
    Idle = 0,
    /// Internal fault, normally a full fifo.
    Error = 1,
    /// Waiting for a trigger or gate signal.
    Waiting = 2,
    /// Acquisition done but data still in memory.
    RunFinished = 3,
    /// Acquisition running, data being sent out.
    Transmitting = 4,
    /// Acquisition running, no data in memory yet.
    Running = 5,
}

impl RunStatus {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(RunStatus::Idle),
            1 => Some(RunStatus::Error),
            2 => Some(RunStatus::Waiting),
            3 => Some(RunStatus::RunFinished),
            4 => Some(RunStatus::Transmitting),
            5 => Some(RunStatus::Running),
            _ => None,
        }
    }
}

/// Detector gain/threshold operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DetectorSettings {
    Standard = 0,
    Fast = 1,
    HighGain = 2,
    DynamicGain = 3,
    LowGain = 4,
    MediumGain = 5,
    VeryHighGain = 6,
    Undefined = 7,
    Uninitialized = 8,
}

impl DetectorSettings {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DetectorSettings::Standard),
            1 => Some(DetectorSettings::Fast),
            2 => Some(DetectorSettings::HighGain),
            3 => Some(DetectorSettings::DynamicGain),
            4 => Some(DetectorSettings::LowGain),
            5 => Some(DetectorSettings::MediumGain),
            6 => Some(DetectorSettings::VeryHighGain),
            7 => Some(DetectorSettings::Undefined),
            8 => Some(DetectorSettings::Uninitialized),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DetectorType {
    Generic = 0,
    Mythen = 1,
    Pilatus = 2,
    Eiger = 3,
    Gotthard = 4,
    Picasso = 5,
    Agipd = 6,
    Moench = 7,
}

impl DetectorType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DetectorType::Generic),
            1 => Some(DetectorType::Mythen),
            2 => Some(DetectorType::Pilatus),
            3 => Some(DetectorType::Eiger),
            4 => Some(DetectorType::Gotthard),
            5 => Some(DetectorType::Picasso),
            6 => Some(DetectorType::Agipd),
            7 => Some(DetectorType::Moench),
            _ => None,
        }
    }
}

/// Identification parameters addressed by GET_ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum IdParam {
    ModuleSerialNumber = 0,
    ModuleFirmwareVersion = 1,
    DetectorSerialNumber = 2,
    DetectorFirmwareVersion = 3,
    DetectorSoftwareVersion = 4,
    ReceiverVersion = 5,
}

impl IdParam {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(IdParam::ModuleSerialNumber),
            1 => Some(IdParam::ModuleFirmwareVersion),
            2 => Some(IdParam::DetectorSerialNumber),
            3 => Some(IdParam::DetectorFirmwareVersion),
            4 => Some(IdParam::DetectorSoftwareVersion),
            5 => Some(IdParam::ReceiverVersion),
            _ => None,
        }
    }
}

/// Module layout axis addressed by SET_NUMBER_OF_MODULES.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Dimension {
    X = 0,
    Y = 1,
}

impl Dimension {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Dimension::X),
            1 => Some(Dimension::Y),
            _ => None,
        }
    }
}

/// Timing mode, carried by SET_EXTERNAL_COMMUNICATION_MODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TimingMode {
    Auto = 0,
    TriggerExposure = 1,
    TriggerReadout = 2,
    GateFixNumber = 3,
    GateWithStartTrigger = 4,
}

impl TimingMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TimingMode::Auto),
            1 => Some(TimingMode::TriggerExposure),
            2 => Some(TimingMode::TriggerReadout),
            3 => Some(TimingMode::GateFixNumber),
            4 => Some(TimingMode::GateWithStartTrigger),
            _ => None,
        }
    }
}

/// Role of the detector in a multi-detector setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MasterMode {
    NoMaster = 0,
    IsMaster = 1,
    IsSlave = 2,
}

impl MasterMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(MasterMode::NoMaster),
            1 => Some(MasterMode::IsMaster),
            2 => Some(MasterMode::IsSlave),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SynchronizationMode {
    None = 0,
    MasterGates = 1,
    MasterTriggers = 2,
    SlaveStartsWhenMasterStops = 3,
}

impl SynchronizationMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(SynchronizationMode::None),
            1 => Some(SynchronizationMode::MasterGates),
            2 => Some(SynchronizationMode::MasterTriggers),
            3 => Some(SynchronizationMode::SlaveStartsWhenMasterStops),
            _ => None,
        }
    }
}

/// Readout speed parameters addressed by SET_SPEED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SpeedType {
    ClockDivider = 0,
    WaitStates = 1,
    TotClockDivider = 2,
    TotDutyCycle = 3,
    SignalLength = 4,
}

impl SpeedType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(SpeedType::ClockDivider),
            1 => Some(SpeedType::WaitStates),
            2 => Some(SpeedType::TotClockDivider),
            3 => Some(SpeedType::TotDutyCycle),
            4 => Some(SpeedType::SignalLength),
            _ => None,
        }
    }
}

/// Readout flag bit set carried by SET_READOUT_FLAGS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadoutFlags(i32);

impl ReadoutFlags {
    pub const NORMAL: ReadoutFlags = ReadoutFlags(0x0);
    pub const STORE_IN_RAM: ReadoutFlags = ReadoutFlags(0x1);
    pub const READ_HITS: ReadoutFlags = ReadoutFlags(0x2);
    pub const ZERO_COMPRESSION: ReadoutFlags = ReadoutFlags(0x4);
    pub const PUMP_PROBE: ReadoutFlags = ReadoutFlags(0x8);
    pub const BACKGROUND_CORRECTIONS: ReadoutFlags = ReadoutFlags(0x1000);
    pub const TOT_MODE: ReadoutFlags = ReadoutFlags(0x2000);
    pub const CONTINUOUS_RO: ReadoutFlags = ReadoutFlags(0x4000);

    const MASK: i32 = 0x1 | 0x2 | 0x4 | 0x8 | 0x1000 | 0x2000 | 0x4000;

    /// Validates that only known flag bits are set.
    pub fn from_bits(bits: i32) -> Option<Self> {
        if bits & !Self::MASK == 0 {
            Some(ReadoutFlags(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: ReadoutFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ReadoutFlags {
    type Output = ReadoutFlags;

    fn bitor(self, rhs: ReadoutFlags) -> ReadoutFlags {
        ReadoutFlags(self.0 | rhs.0)
    }
}

// =============================================================================
// Unit and boundary translations
// =============================================================================

/// Converts an API value in seconds to the wire representation in ns.
pub fn seconds_to_ns(seconds: f64) -> i64 {
    (seconds * 1e9).round() as i64
}

/// Converts a wire value in nanoseconds to API seconds.
pub fn ns_to_seconds(ns: i64) -> f64 {
    ns as f64 * 1e-9
}

/// The detector stores the 24-bit dynamic range as 32 on the wire; the
/// API always presents 24. Applied when *sending* a dynamic range.
pub fn dynamic_range_to_wire(dynamic_range: i32) -> i32 {
    if dynamic_range == 24 {
        32
    } else {
        dynamic_range
    }
}

/// Inverse of [`dynamic_range_to_wire`], applied when *receiving*.
pub fn dynamic_range_from_wire(wire: i32) -> i32 {
    if wire == 32 {
        24
    } else {
        wire
    }
}

/// Bytes per channel count for a logical dynamic range.
pub fn bytes_per_count(dynamic_range: i32) -> usize {
    match dynamic_range {
        8 => 1,
        16 => 2,
        // 24-bit counts are transmitted as full 32-bit words
        _ => 4,
    }
}

/// Largest channel count representable at a logical dynamic range.
pub fn max_count(dynamic_range: i32) -> i32 {
    match dynamic_range {
        8 => i8::MAX as i32,
        16 => i16::MAX as i32,
        24 => (1 << 23) - 1,
        _ => i32::MAX,
    }
}

// =============================================================================
// Field encoding helpers
// =============================================================================

pub fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Appends a NUL-padded fixed-width ASCII address field.
pub fn put_ip(buf: &mut Vec<u8>, ip: &str) {
    let mut field = [0u8; INET_ADDRSTRLEN];
    let bytes = ip.as_bytes();
    let n = bytes.len().min(INET_ADDRSTRLEN);
    field[..n].copy_from_slice(&bytes[..n]);
    buf.extend_from_slice(&field);
}

/// Reads a little-endian i32 at the cursor, advancing it.
pub fn get_i32(data: &[u8], cursor: &mut usize) -> SlsResult<i32> {
    let bytes = data
        .get(*cursor..*cursor + 4)
        .ok_or_else(|| SlsError::Protocol("undersized reply: missing i32 field".into()))?;
    *cursor += 4;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(raw))
}

/// Reads a little-endian i64 at the cursor, advancing it.
pub fn get_i64(data: &[u8], cursor: &mut usize) -> SlsResult<i64> {
    let bytes = data
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| SlsError::Protocol("undersized reply: missing i64 field".into()))?;
    *cursor += 8;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(raw))
}

/// Reads a fixed-width NUL-padded ASCII address field at the cursor.
pub fn get_ip(data: &[u8], cursor: &mut usize) -> SlsResult<String> {
    let bytes = data
        .get(*cursor..*cursor + INET_ADDRSTRLEN)
        .ok_or_else(|| SlsError::Protocol("undersized reply: missing address field".into()))?;
    *cursor += INET_ADDRSTRLEN;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(str::to_owned)
        .map_err(|_| SlsError::Protocol("address field is not ASCII".into()))
}

// =============================================================================
// Request builders
// =============================================================================

fn request(code: CommandCode) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    put_i32(&mut buf, code as i32);
    buf
}

pub fn update_client_request() -> Vec<u8> {
    request(CommandCode::UpdateClient)
}

pub fn get_detector_type_request() -> Vec<u8> {
    request(CommandCode::GetDetectorType)
}

pub fn get_id_request(param: IdParam) -> Vec<u8> {
    let mut buf = request(CommandCode::GetId);
    put_i32(&mut buf, param as i32);
    buf
}

/// TIMER is a get-or-set: `value` is the raw wire value (ns for
/// time-valued members) or [`GET_CODE`] to read.
pub fn timer_request(timer: TimerType, value: i64) -> Vec<u8> {
    let mut buf = request(CommandCode::Timer);
    put_i32(&mut buf, timer as i32);
    put_i64(&mut buf, value);
    buf
}

pub fn get_time_left_request(timer: TimerType) -> Vec<u8> {
    let mut buf = request(CommandCode::GetTimeLeft);
    put_i32(&mut buf, timer as i32);
    buf
}

pub fn get_energy_threshold_request(mod_nb: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::GetEnergyThreshold);
    put_i32(&mut buf, mod_nb);
    buf
}

pub fn set_energy_threshold_request(energy: i32, mod_nb: i32, settings: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetEnergyThreshold);
    put_i32(&mut buf, energy);
    put_i32(&mut buf, mod_nb);
    put_i32(&mut buf, settings);
    buf
}

pub fn settings_request(value: i32, mod_nb: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetSettings);
    put_i32(&mut buf, value);
    put_i32(&mut buf, mod_nb);
    buf
}

/// `value` must already be wire-encoded (logical 24 sent as 32).
pub fn dynamic_range_request(value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetDynamicRange);
    put_i32(&mut buf, value);
    buf
}

pub fn readout_flags_request(value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetReadoutFlags);
    put_i32(&mut buf, value);
    buf
}

pub fn speed_request(speed: SpeedType, value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetSpeed);
    put_i32(&mut buf, speed as i32);
    put_i32(&mut buf, value);
    buf
}

pub fn nb_modules_request(dimension: Dimension, value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetNumberOfModules);
    put_i32(&mut buf, dimension as i32);
    put_i32(&mut buf, value);
    buf
}

pub fn timing_mode_request(value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetExternalCommunicationMode);
    put_i32(&mut buf, value);
    buf
}

pub fn master_mode_request(value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetMaster);
    put_i32(&mut buf, value);
    buf
}

pub fn synchronization_mode_request(value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::SetSynchronizationMode);
    put_i32(&mut buf, value);
    buf
}

pub fn lock_server_request(value: i32) -> Vec<u8> {
    let mut buf = request(CommandCode::LockServer);
    put_i32(&mut buf, value);
    buf
}

pub fn get_last_client_ip_request() -> Vec<u8> {
    request(CommandCode::GetLastClientIp)
}

pub fn get_run_status_request() -> Vec<u8> {
    request(CommandCode::GetRunStatus)
}

pub fn start_acquisition_request() -> Vec<u8> {
    request(CommandCode::StartAcquisition)
}

pub fn stop_acquisition_request() -> Vec<u8> {
    request(CommandCode::StopAcquisition)
}

pub fn start_and_read_all_request() -> Vec<u8> {
    request(CommandCode::StartAndReadAll)
}

/// SET_ROI get form: sentinel count, no quadruples.
pub fn get_rois_request() -> Vec<u8> {
    let mut buf = request(CommandCode::SetRoi);
    put_i32(&mut buf, GET_CODE as i32);
    buf
}

/// SET_ROI set form: count followed by xmin/xmax/ymin/ymax quadruples.
pub fn set_rois_request(rois: &[Roi]) -> Vec<u8> {
    let mut buf = request(CommandCode::SetRoi);
    put_i32(&mut buf, rois.len() as i32);
    for roi in rois {
        put_i32(&mut buf, roi.xmin);
        put_i32(&mut buf, roi.xmax);
        put_i32(&mut buf, roi.ymin);
        put_i32(&mut buf, roi.ymax);
    }
    buf
}

// =============================================================================
// Structured payloads
// =============================================================================

/// Region of interest carried by SET_ROI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub xmin: i32,
    pub xmax: i32,
    pub ymin: i32,
    pub ymax: i32,
}

/// Full detector state as reported by UPDATE_CLIENT.
///
/// The wire layout is a 16-byte NUL-padded address, six i32 fields and
/// seven i64 fields ([`SNAPSHOT_LEN`] bytes total). `dynamic_range`
/// holds the *logical* value; the 24<->32 wire translation happens in
/// [`DetectorSnapshot::decode`] / [`DetectorSnapshot::encode`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSnapshot {
    pub last_client_ip: String,
    pub nb_modules: i32,
    pub nb_modules_y: i32,
    pub dynamic_range: i32,
    pub data_bytes: i32,
    pub settings: DetectorSettings,
    pub energy_threshold: i32,
    pub nb_frames: i64,
    /// Exposure time per frame, wire nanoseconds.
    pub acq_time: i64,
    /// Period between frame starts, wire nanoseconds.
    pub frame_period: i64,
    pub delay_after_trigger: i64,
    pub nb_gates: i64,
    pub nb_probes: i64,
    pub nb_cycles: i64,
}

impl DetectorSnapshot {
    pub fn decode(data: &[u8]) -> SlsResult<Self> {
        if data.len() < SNAPSHOT_LEN {
            return Err(SlsError::Protocol(format!(
                "undersized snapshot: expected {} bytes, got {}",
                SNAPSHOT_LEN,
                data.len()
            )));
        }
        let mut cursor = 0;
        let last_client_ip = get_ip(data, &mut cursor)?;
        let nb_modules = get_i32(data, &mut cursor)?;
        let nb_modules_y = get_i32(data, &mut cursor)?;
        let dynamic_range = dynamic_range_from_wire(get_i32(data, &mut cursor)?);
        let data_bytes = get_i32(data, &mut cursor)?;
        let settings_raw = get_i32(data, &mut cursor)?;
        let settings = DetectorSettings::from_i32(settings_raw).ok_or_else(|| {
            SlsError::Protocol(format!("unknown detector settings value {settings_raw}"))
        })?;
        let energy_threshold = get_i32(data, &mut cursor)?;
        Ok(DetectorSnapshot {
            last_client_ip,
            nb_modules,
            nb_modules_y,
            dynamic_range,
            data_bytes,
            settings,
            energy_threshold,
            nb_frames: get_i64(data, &mut cursor)?,
            acq_time: get_i64(data, &mut cursor)?,
            frame_period: get_i64(data, &mut cursor)?,
            delay_after_trigger: get_i64(data, &mut cursor)?,
            nb_gates: get_i64(data, &mut cursor)?,
            nb_probes: get_i64(data, &mut cursor)?,
            nb_cycles: get_i64(data, &mut cursor)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SNAPSHOT_LEN);
        put_ip(&mut buf, &self.last_client_ip);
        put_i32(&mut buf, self.nb_modules);
        put_i32(&mut buf, self.nb_modules_y);
        put_i32(&mut buf, dynamic_range_to_wire(self.dynamic_range));
        put_i32(&mut buf, self.data_bytes);
        put_i32(&mut buf, self.settings as i32);
        put_i32(&mut buf, self.energy_threshold);
        put_i64(&mut buf, self.nb_frames);
        put_i64(&mut buf, self.acq_time);
        put_i64(&mut buf, self.frame_period);
        put_i64(&mut buf, self.delay_after_trigger);
        put_i64(&mut buf, self.nb_gates);
        put_i64(&mut buf, self.nb_probes);
        put_i64(&mut buf, self.nb_cycles);
        buf
    }
}

/// One acquisition frame: one count per detector channel across all
/// modules and chips.
///
/// Counts travel packed at `bytes_per_count(dynamic_range)` width and
/// are widened to i32 on decode regardless of range.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub counts: Vec<i32>,
}

impl Frame {
    pub fn decode(data: &[u8], dynamic_range: i32) -> SlsResult<Self> {
        let width = bytes_per_count(dynamic_range);
        if data.len() % width != 0 {
            return Err(SlsError::Protocol(format!(
                "frame of {} bytes is not a multiple of the {}-byte count width",
                data.len(),
                width
            )));
        }
        let counts = match width {
            1 => data.iter().map(|&b| i32::from(b as i8)).collect(),
            2 => data
                .chunks_exact(2)
                .map(|c| i32::from(i16::from_le_bytes([c[0], c[1]])))
                .collect(),
            _ => data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        };
        Ok(Frame { counts })
    }

    pub fn encode(&self, dynamic_range: i32) -> Vec<u8> {
        let width = bytes_per_count(dynamic_range);
        let mut buf = Vec::with_capacity(self.counts.len() * width);
        for &count in &self.counts {
            match width {
                1 => buf.push(count as i8 as u8),
                2 => buf.extend_from_slice(&(count as i16).to_le_bytes()),
                _ => buf.extend_from_slice(&count.to_le_bytes()),
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes_carry_original_wire_values() {
        assert_eq!(CommandCode::GetDetectorType as i32, 2);
        assert_eq!(CommandCode::StartAcquisition as i32, 30);
        assert_eq!(CommandCode::StopAcquisition as i32, 31);
        assert_eq!(CommandCode::StartAndReadAll as i32, 34);
        assert_eq!(CommandCode::Timer as i32, 37);
        assert_eq!(CommandCode::UpdateClient as i32, 48);
        assert_eq!(CommandCode::ResetCounterBlock as i32, 54);
        assert_eq!(CommandCode::from_i32(48), Some(CommandCode::UpdateClient));
        assert_eq!(CommandCode::from_i32(55), None);
        assert_eq!(CommandCode::from_i32(-1), None);
    }

    #[test]
    fn timer_request_layout() {
        let buf = timer_request(TimerType::AcquisitionTime, 1_500_000_000);
        assert_eq!(buf.len(), 4 + 4 + 8);
        assert_eq!(&buf[0..4], &(CommandCode::Timer as i32).to_le_bytes());
        assert_eq!(&buf[4..8], &1i32.to_le_bytes());
        assert_eq!(&buf[8..16], &1_500_000_000i64.to_le_bytes());
    }

    #[test]
    fn get_sentinel_is_minus_one_on_the_wire() {
        let buf = timer_request(TimerType::NbFrames, GET_CODE);
        assert_eq!(&buf[8..16], &(-1i64).to_le_bytes());

        let buf = dynamic_range_request(GET_CODE as i32);
        assert_eq!(&buf[4..8], &(-1i32).to_le_bytes());
    }

    #[test]
    fn seconds_ns_round_trip_within_1ns() {
        for &secs in &[0.0, 0.25, 1.0, 2.5, 123.456_789] {
            let ns = seconds_to_ns(secs);
            assert!((ns_to_seconds(ns) - secs).abs() < 1e-9);
        }
    }

    #[test]
    fn dynamic_range_24_is_32_on_the_wire() {
        assert_eq!(dynamic_range_to_wire(24), 32);
        assert_eq!(dynamic_range_from_wire(32), 24);
        assert_eq!(dynamic_range_to_wire(16), 16);
        assert_eq!(dynamic_range_from_wire(8), 8);
    }

    #[test]
    fn snapshot_round_trip() {
        let snapshot = DetectorSnapshot {
            last_client_ip: "192.168.0.12".into(),
            nb_modules: 6,
            nb_modules_y: 1,
            dynamic_range: 24,
            data_bytes: 6 * 10 * 128 * 4,
            settings: DetectorSettings::Standard,
            energy_threshold: 8000,
            nb_frames: 10,
            acq_time: 1_000_000_000,
            frame_period: 1_100_000_000,
            delay_after_trigger: 0,
            nb_gates: 0,
            nb_probes: 0,
            nb_cycles: 2,
        };
        let encoded = snapshot.encode();
        assert_eq!(encoded.len(), SNAPSHOT_LEN);
        // wire carries 32 for the logical 24
        assert_eq!(&encoded[24..28], &32i32.to_le_bytes());
        let decoded = DetectorSnapshot::decode(&encoded).expect("decode");
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn undersized_snapshot_is_a_protocol_fault() {
        let err = DetectorSnapshot::decode(&[0u8; 10]);
        assert!(matches!(err, Err(SlsError::Protocol(_))));
    }

    #[test]
    fn frame_packing_by_dynamic_range() {
        let frame = Frame {
            counts: vec![-2, -1, 0, 1, 100],
        };
        assert_eq!(frame.encode(8).len(), 5);
        assert_eq!(frame.encode(16).len(), 10);
        assert_eq!(frame.encode(24).len(), 20);
        assert_eq!(frame.encode(32).len(), 20);

        for &dr in &[8, 16, 24, 32] {
            let decoded = Frame::decode(&frame.encode(dr), dr).expect("decode");
            assert_eq!(decoded, frame, "dynamic range {dr}");
        }
    }

    #[test]
    fn truncated_frame_is_a_protocol_fault() {
        let err = Frame::decode(&[1, 2, 3], 16);
        assert!(matches!(err, Err(SlsError::Protocol(_))));
    }

    #[test]
    fn readout_flags_reject_unknown_bits() {
        let flags = ReadoutFlags::STORE_IN_RAM | ReadoutFlags::TOT_MODE;
        assert_eq!(flags.bits(), 0x2001);
        assert!(flags.contains(ReadoutFlags::STORE_IN_RAM));
        assert_eq!(ReadoutFlags::from_bits(0x2001), Some(flags));
        assert_eq!(ReadoutFlags::from_bits(0x40), None);
    }

    #[test]
    fn ip_field_is_nul_padded_ascii() {
        let mut buf = Vec::new();
        put_ip(&mut buf, "10.0.0.1");
        assert_eq!(buf.len(), INET_ADDRSTRLEN);
        assert_eq!(&buf[..8], b"10.0.0.1");
        assert!(buf[8..].iter().all(|&b| b == 0));
        let mut cursor = 0;
        assert_eq!(get_ip(&buf, &mut cursor).expect("decode"), "10.0.0.1");
    }
}
