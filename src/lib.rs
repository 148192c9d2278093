//! # SLS Detector Client & Simulator
//!
//! Client library and protocol-compatible simulator for SLS strip
//! detectors (Mythen family). The detector speaks a binary
//! request/reply protocol over two TCP ports: a control port
//! (configuration and frame readout) and a stop port that stays
//! responsive while an acquisition occupies the control socket.
//!
//! ## Crate Structure
//!
//! - **`network::protocol`**: the wire codec — command and result
//!   enumerations with their authoritative wire values, request
//!   builders, and the [`DetectorSnapshot`](network::DetectorSnapshot)
//!   and [`Frame`](network::Frame) codecs.
//! - **`network::connection`**: full-read TCP wrapper; the protocol has
//!   no length prefixes, so reads either accumulate a statically known
//!   size or fetch one bounded message.
//! - **`client`**: the [`Detector`](client::Detector) orchestrator
//!   (get/set accessors, transparent stale-state resync) and the
//!   [`Acquisition`](client::Acquisition) streaming session.
//! - **`simulator`**: a protocol-compatible stand-in for the hardware,
//!   usable in-process for tests or as the `sls-simulator` binary.
//! - **`config`**: simulator settings, TOML-loadable.
//! - **`error`**: the [`SlsError`](error::SlsError) taxonomy shared by
//!   client and simulator.

pub mod client;
pub mod config;
pub mod error;
pub mod network;
pub mod simulator;

pub use client::{Acquisition, AcquisitionEvent, Detector};
pub use config::SimulatorSettings;
pub use error::{SlsError, SlsResult};
pub use simulator::Simulator;
