pub mod connection;
pub mod protocol;

pub use connection::Connection;
pub use protocol::{
    CommandCode, DetectorSnapshot, Frame, ResultType, RunStatus, TimerType, GET_CODE,
};
