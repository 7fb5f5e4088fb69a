pub mod actions;
pub mod bus;
pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod gpo;
pub mod machine;
pub mod runner;
pub mod sequence;
pub mod signals;
pub mod source;
pub mod tui;
pub mod units;
pub mod utils;
pub mod writer;

pub use actions::{
    ActionContext, ActionExecutor, CaptureTarget, Gpio, Gpo, Marker, Recorder, StartActions,
    StopActions,
};
pub use bus::{RetainedBus, SettingsBus, SubscribeFlags};
pub use condition::{
    Condition, ConditionEvaluator, ConditionKind, ConditionSlot, EdgeCondition, MatchResult,
    Operation, Threshold, TimeValue, WaitCondition, WindowCondition,
};
pub use config::Conf;
pub use error::{ActuatorFailure, EvaluationAnomaly, UnitError, ValidationError};
pub use event::{Sample, SampleBlock, SignalInfo};
pub use machine::{Command, RunMode, Status, TriggerEvent, TriggerMachine, TriggerStats};
pub use runner::{spawn_runner, Runner, Snapshot};
pub use sequence::{validate, DurationBuffer, TriggerSequence, ValidatedSequence};
pub use signals::{Catalog, ChargeUnits, EnergyUnits, SignalDescriptor, SignalKind};
pub use source::{spawn_source, SignalSource, SimulatedSource, Waveform};
pub use units::UnitResolver;
