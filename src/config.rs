//! Configuration management.
use crate::error::SlsError;
use config::Config;
use serde::Deserialize;
use std::path::Path;

use crate::network::protocol::{DEFAULT_CTRL_PORT, DEFAULT_STOP_PORT};

/// Simulator settings, loadable from TOML. Geometry defaults match a
/// six-module Mythen: 6 modules x 10 chips x 128 channels.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorSettings {
    pub host: String,
    pub ctrl_port: u16,
    pub stop_port: u16,
    pub nb_modules: i32,
    pub nb_chips: i32,
    pub nb_channels: i32,
    /// Seed for synthetic frame generation.
    pub seed: u64,
    pub log_level: String,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        SimulatorSettings {
            host: "127.0.0.1".to_owned(),
            ctrl_port: DEFAULT_CTRL_PORT,
            stop_port: DEFAULT_STOP_PORT,
            nb_modules: 6,
            nb_chips: 10,
            nb_channels: 128,
            seed: 0,
            log_level: "info".to_owned(),
        }
    }
}

impl SimulatorSettings {
    pub fn from_file(path: &Path) -> Result<Self, SlsError> {
        let s = Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(SlsError::Config)?;

        s.try_deserialize().map_err(SlsError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_a_six_module_mythen() {
        let settings = SimulatorSettings::default();
        assert_eq!(settings.ctrl_port, DEFAULT_CTRL_PORT);
        assert_eq!(settings.stop_port, DEFAULT_STOP_PORT);
        assert_eq!(
            settings.nb_modules * settings.nb_chips * settings.nb_channels,
            7680
        );
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "ctrl_port = 3100\nstop_port = 3101\nseed = 7").unwrap();

        let settings = SimulatorSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.ctrl_port, 3100);
        assert_eq!(settings.stop_port, 3101);
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.nb_modules, 6);
        assert_eq!(settings.host, "127.0.0.1");
    }
}
