use confique::Config;
use serde::Deserialize;
use simplelog::LevelFilter;
use std::path::PathBuf;

use crate::machine::RunMode;
use crate::signals::{ChargeUnits, EnergyUnits};
use crate::source::Waveform;

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub source: SourceSettings,
    #[config(nested)]
    pub trigger: TriggerSettings,
    #[config(nested)]
    pub units: UnitSettings,
    #[config(nested)]
    pub recording: RecordingSettings,
    #[config(nested)]
    pub log: LogSettings,
}

#[derive(Config, Debug, Clone)]
pub struct SourceSettings {
    #[config(default = 100000.0)]
    pub sampling_frequency: f64,
    #[config(default = 1000)]
    pub block_size: usize,
    /// Pace blocks at the sampling rate instead of as fast as possible.
    #[config(default = true)]
    pub realtime: bool,
    #[config(default = 1)]
    pub seed: u64,
    #[config(default = 0.0001)]
    pub base_current: f64,
    #[config(default = 0.25)]
    pub pulse_current: f64,
    #[config(default = 1.0)]
    pub pulse_period: f64,
    #[config(default = 0.3)]
    pub pulse_width: f64,
    #[config(default = 3.3)]
    pub voltage: f64,
    #[config(default = 0.000001)]
    pub noise: f64,
}

impl SourceSettings {
    pub fn waveform(&self) -> Waveform {
        Waveform {
            base_current: self.base_current,
            pulse_current: self.pulse_current,
            pulse_period: self.pulse_period,
            pulse_width: self.pulse_width,
            voltage: self.voltage,
            noise: self.noise,
        }
    }
}

#[derive(Config, Debug, Clone)]
pub struct TriggerSettings {
    #[config(default = "single")]
    pub run_mode: RunMode,
    /// Trigger sequence document loaded at startup.
    pub sequence_file: Option<PathBuf>,
    #[config(default = "js220/trigger")]
    pub topic: String,
    #[config(default = "js220/001")]
    pub device: String,
}

#[derive(Config, Debug, Clone)]
pub struct UnitSettings {
    #[config(default = "J")]
    pub energy: EnergyUnits,
    #[config(default = "C")]
    pub charge: ChargeUnits,
}

#[derive(Config, Debug, Clone)]
pub struct RecordingSettings {
    #[config(default = "captures")]
    pub output_dir: PathBuf,
    /// Rows buffered before a capture file is written.
    #[config(default = 1024)]
    pub buffer_capacity: usize,
    /// Sample limit of one RAM capture.
    #[config(default = 10000000)]
    pub ram_capacity: usize,
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    #[config(default = "jstrigger.log")]
    pub file: PathBuf,
    #[config(default = "info")]
    pub level: LogLevel,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
