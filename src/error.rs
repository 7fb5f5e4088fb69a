use std::result;

use thiserror::Error;

/// Rejected trigger configuration. Raised by validation only, the running
/// state machine never sees a configuration that produced one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field}: unknown signal `{signal}`")]
    UnknownSignal { field: String, signal: String },

    #[error("{field}: unit `{unit}` is not valid for signal `{signal}`")]
    InvalidUnit {
        field: String,
        signal: String,
        unit: String,
    },

    #[error("{field}: value {value} is not finite")]
    NonFinite { field: String, value: f64 },

    #[error("{field}: value {value} outside [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field}: value {value} is not a multiple of {step} from {min}")]
    OffStep {
        field: String,
        value: f64,
        min: f64,
        step: f64,
    },

    #[error("{field}: operator `{operation}` is not allowed on digital signal `{signal}`")]
    IncompatibleOperator {
        field: String,
        signal: String,
        operation: String,
    },

    #[error("{field}: signal `{signal}` cannot be used here, expected {expected}")]
    IncompatibleSignal {
        field: String,
        signal: String,
        expected: &'static str,
    },

    #[error("{field}: {kind} condition is not allowed here")]
    ConditionNotAllowed { field: String, kind: String },

    #[error("{field}: unknown output `{channel}`")]
    UnknownOutput { field: String, channel: String },

    #[error("{field}: output value must be 0 or 1, got {value}")]
    InvalidOutputValue { field: String, value: u8 },
}

pub type ValidationResult<T> = result::Result<T, ValidationError>;

/// Unit conversion failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("unknown signal `{0}`")]
    UnknownSignal(String),

    #[error("unit `{unit}` is not valid for signal `{signal}`")]
    InvalidUnit { signal: String, unit: String },

    #[error("unit `{0}` needs a sampling frequency")]
    MissingSamplingFrequency(String),
}

/// Runtime problems with a single sample. The offending sample is dropped and
/// processing continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationAnomaly {
    #[error("out-of-order sample on `{signal}`: {timestamp} after {previous}")]
    OutOfOrder {
        signal: String,
        timestamp: f64,
        previous: f64,
    },

    #[error("non-finite sample on `{signal}` at {timestamp}")]
    NonFinite { signal: String, timestamp: f64 },

    #[error("missing sampling frequency for `{0}`")]
    MissingSamplingFrequency(String),
}

/// A recording or output request failed. Best effort: logged, never
/// propagated into a state transition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorFailure {
    #[error("recorder: {0}")]
    Recorder(String),

    #[error("output `{channel}`: {reason}")]
    Output { channel: String, reason: String },
}

pub type ActuatorResult<T> = result::Result<T, ActuatorFailure>;
