use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::actions::{ActionContext, ActionExecutor, Gpio, Recorder, StopActions};
use crate::bus::SettingsBus;
use crate::condition::{ConditionEvaluator, MatchResult};
use crate::error::{EvaluationAnomaly, ValidationError, ValidationResult};
use crate::event::{Sample, SampleBlock};
use crate::sequence::{validate, TriggerSequence, ValidatedSequence};
use crate::signals::Catalog;
use crate::units::UnitResolver;

const JOURNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Single,
    Continuous,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Single => "single",
            RunMode::Continuous => "continuous",
        })
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(RunMode::Single),
            "continuous" => Ok(RunMode::Continuous),
            _ => Err(format!("unknown run mode `{s}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Inactive,
    Searching,
    Active,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Inactive => "inactive",
            Status::Searching => "searching",
            Status::Active => "active",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Arm,
    Halt,
    /// Arm when inactive, halt otherwise.
    Toggle,
    SetRunMode(RunMode),
    SetConfig(TriggerSequence),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    Armed,
    StartMatched { timestamp: f64 },
    StopMatched { timestamp: f64 },
    Halted,
    ConfigApplied,
    ConfigRejected(ValidationError),
    Anomaly(EvaluationAnomaly),
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Armed => write!(f, "armed"),
            TriggerEvent::StartMatched { timestamp } => write!(f, "start at {timestamp:.6} s"),
            TriggerEvent::StopMatched { timestamp } => write!(f, "stop at {timestamp:.6} s"),
            TriggerEvent::Halted => write!(f, "halted"),
            TriggerEvent::ConfigApplied => write!(f, "configuration applied"),
            TriggerEvent::ConfigRejected(e) => write!(f, "configuration rejected: {e}"),
            TriggerEvent::Anomaly(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerStats {
    pub samples: u64,
    pub arms: u64,
    pub start_matches: u64,
    pub stop_matches: u64,
    pub halts: u64,
    pub anomalies: u64,
}

/// Run-mode state machine.
///
/// `inactive -> searching -> active -> inactive` in single mode; continuous
/// mode returns from active to searching. A stop with a post-roll stays
/// active until the post-roll has elapsed in sample time; halt cuts it short.
/// The configuration is validated on `set_config` and snapshotted on every
/// arm, so edits never reach a running evaluator.
pub struct TriggerMachine<R, G, B> {
    catalog: Arc<Catalog>,
    topic: String,
    config: ValidatedSequence,
    armed: Option<ValidatedSequence>,
    run_mode: RunMode,
    status: Status,
    evaluator: Option<ConditionEvaluator>,
    executor: ActionExecutor,
    recorder: R,
    gpio: G,
    bus: B,
    last_timestamp: HashMap<String, f64>,
    clock: Option<f64>,
    sampling_frequency: Option<f64>,
    journal: VecDeque<TriggerEvent>,
    stats: TriggerStats,
}

impl<R: Recorder, G: Gpio, B: SettingsBus> TriggerMachine<R, G, B> {
    pub fn new(catalog: Arc<Catalog>, topic: &str, recorder: R, gpio: G, bus: B) -> Self {
        let machine = Self {
            catalog,
            topic: topic.trim_end_matches('/').to_string(),
            config: ValidatedSequence::default(),
            armed: None,
            run_mode: RunMode::default(),
            status: Status::default(),
            evaluator: None,
            executor: ActionExecutor::new(),
            recorder,
            gpio,
            bus,
            last_timestamp: HashMap::new(),
            clock: None,
            sampling_frequency: None,
            journal: VecDeque::with_capacity(JOURNAL_CAPACITY),
            stats: TriggerStats::default(),
        };
        machine.publish_status();
        machine.publish_mode();
        machine
    }

    pub fn status_topic(&self) -> String {
        format!("{}/settings/status", self.topic)
    }

    pub fn mode_topic(&self) -> String {
        format!("{}/settings/mode", self.topic)
    }

    pub fn config_topic(&self) -> String {
        format!("{}/settings/config", self.topic)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn stats(&self) -> TriggerStats {
        self.stats
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut R {
        &mut self.recorder
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    /// Latest sample timestamp seen on any signal.
    pub fn clock(&self) -> Option<f64> {
        self.clock
    }

    pub fn get_config(&self) -> &TriggerSequence {
        self.config.sequence()
    }

    /// The configuration the current run is using.
    pub fn armed_config(&self) -> Option<&TriggerSequence> {
        self.armed.as_ref().map(ValidatedSequence::sequence)
    }

    pub fn last_event(&self) -> Option<&TriggerEvent> {
        self.journal.back()
    }

    pub fn drain_events(&mut self) -> Vec<TriggerEvent> {
        self.journal.drain(..).collect()
    }

    pub fn set_sampling_frequency(&mut self, fs: f64) {
        self.sampling_frequency = Some(fs);
    }

    pub fn resolver(&self) -> UnitResolver<'_> {
        UnitResolver::new(&self.catalog, self.sampling_frequency)
    }

    /// Validate and install `seq`. On failure the previous configuration is
    /// kept.
    pub fn set_config(&mut self, seq: TriggerSequence) -> ValidationResult<()> {
        match validate(&seq, &self.catalog) {
            Ok(valid) => {
                self.config = valid;
                info!("Trigger configuration updated");
                self.record(TriggerEvent::ConfigApplied);
                Ok(())
            }
            Err(e) => {
                warn!("Rejected trigger configuration: {e}");
                self.record(TriggerEvent::ConfigRejected(e.clone()));
                Err(e)
            }
        }
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        if self.run_mode != mode {
            self.run_mode = mode;
            info!("Trigger run mode {mode}");
            self.publish_mode();
        }
    }

    pub fn on_command(&mut self, cmd: Command) -> ValidationResult<()> {
        match cmd {
            Command::Arm => self.arm(),
            Command::Halt => self.halt(),
            Command::Toggle if self.status == Status::Inactive => self.arm(),
            Command::Toggle => self.halt(),
            Command::SetRunMode(mode) => self.set_run_mode(mode),
            Command::SetConfig(seq) => return self.set_config(seq),
        }
        Ok(())
    }

    pub fn on_block(&mut self, block: &SampleBlock) {
        if !(block.sample_rate.is_finite() && block.sample_rate > 0.0) {
            self.anomaly(EvaluationAnomaly::MissingSamplingFrequency(
                block.signal.clone(),
            ));
            return;
        }
        if self.sampling_frequency.is_none() {
            self.sampling_frequency = Some(block.sample_rate);
        }
        for sample in block.samples() {
            self.on_sample(&block.signal, sample);
        }
    }

    pub fn on_sample(&mut self, signal: &str, sample: Sample) {
        self.stats.samples += 1;
        if !sample.timestamp.is_finite() || !sample.value.is_finite() {
            self.anomaly(EvaluationAnomaly::NonFinite {
                signal: signal.to_string(),
                timestamp: sample.timestamp,
            });
            return;
        }
        if let Some(&previous) = self.last_timestamp.get(signal) {
            if sample.timestamp <= previous {
                self.anomaly(EvaluationAnomaly::OutOfOrder {
                    signal: signal.to_string(),
                    timestamp: sample.timestamp,
                    previous,
                });
                return;
            }
        }
        self.last_timestamp.insert(signal.to_string(), sample.timestamp);
        self.clock = Some(self.clock.map_or(sample.timestamp, |c| c.max(sample.timestamp)));
        self.recorder.ingest(signal, &sample);

        if self.status == Status::Active && self.evaluator.is_none() {
            if self.executor.settle(sample.timestamp) {
                self.complete_stop();
            }
            return;
        }
        let Some(evaluator) = self.evaluator.as_mut() else {
            return;
        };
        match evaluator.evaluate(signal, &sample) {
            Ok(MatchResult::Match { timestamp }) => self.on_match(timestamp),
            Ok(MatchResult::NoMatch) => (),
            Err(e) => self.anomaly(e),
        }
    }

    fn arm(&mut self) {
        if self.status != Status::Inactive {
            debug!("arm ignored while {}", self.status);
            return;
        }
        self.start_search();
        self.stats.arms += 1;
        self.record(TriggerEvent::Armed);
    }

    fn start_search(&mut self) {
        let snapshot = self.config.clone();
        info!(
            "Trigger armed, start when {}",
            snapshot.start().describe(&self.resolver())
        );
        self.executor
            .arm_buffer(&mut self.recorder, snapshot.pre_roll());
        let mut evaluator = ConditionEvaluator::from(snapshot.start());
        evaluator.arm(None);
        self.evaluator = Some(evaluator);
        self.armed = Some(snapshot);
        self.set_status(Status::Searching);
    }

    fn halt(&mut self) {
        if self.status == Status::Inactive {
            debug!("halt ignored, trigger inactive");
            return;
        }
        if let Some(armed) = &self.armed {
            let ctx = ActionContext {
                timestamp: self.clock.unwrap_or(0.0),
                pre_roll: None,
                post_roll: None,
            };
            let actions = StopActions {
                buffer_stop: None,
                ..armed.stop_actions().clone()
            };
            self.executor.execute_stop(
                &actions,
                ctx,
                &mut self.recorder,
                &mut self.gpio,
            );
        }
        let now = self.clock.unwrap_or(0.0);
        self.executor.close_pending(&mut self.recorder, now);
        self.executor.release_buffer(&mut self.recorder);
        self.evaluator = None;
        self.armed = None;
        self.set_status(Status::Inactive);
        self.stats.halts += 1;
        self.record(TriggerEvent::Halted);
    }

    fn on_match(&mut self, timestamp: f64) {
        let Some(armed) = &self.armed else {
            return;
        };
        let ctx = ActionContext {
            timestamp,
            pre_roll: armed.pre_roll(),
            post_roll: armed.post_roll(),
        };
        match self.status {
            Status::Searching => {
                info!("Trigger start at {timestamp:.6} s");
                self.executor.execute_start(
                    armed.start_actions(),
                    ctx,
                    &mut self.recorder,
                    &mut self.gpio,
                );
                let mut evaluator = ConditionEvaluator::from(armed.stop());
                evaluator.arm(Some(timestamp));
                self.evaluator = Some(evaluator);
                self.stats.start_matches += 1;
                self.record(TriggerEvent::StartMatched { timestamp });
                self.set_status(Status::Active);
            }
            Status::Active => {
                info!("Trigger stop at {timestamp:.6} s");
                self.executor.execute_stop(
                    armed.stop_actions(),
                    ctx,
                    &mut self.recorder,
                    &mut self.gpio,
                );
                self.stats.stop_matches += 1;
                self.record(TriggerEvent::StopMatched { timestamp });
                self.evaluator = None;
                if self.executor.settle(timestamp) {
                    self.complete_stop();
                } else {
                    debug!(
                        "post-roll until {:?} s",
                        self.executor.pending_until()
                    );
                }
            }
            Status::Inactive => (),
        }
    }

    /// Leave `active` once the post-roll is over.
    fn complete_stop(&mut self) {
        match self.run_mode {
            RunMode::Continuous => self.start_search(),
            RunMode::Single => {
                self.armed = None;
                self.set_status(Status::Inactive);
            }
        }
    }

    fn anomaly(&mut self, e: EvaluationAnomaly) {
        warn!("Dropped sample: {e}");
        self.stats.anomalies += 1;
        self.record(TriggerEvent::Anomaly(e));
    }

    fn record(&mut self, event: TriggerEvent) {
        if self.journal.len() == JOURNAL_CAPACITY {
            self.journal.pop_front();
        }
        self.journal.push_back(event);
    }

    fn set_status(&mut self, status: Status) {
        if self.status != status {
            debug!("trigger {} -> {status}", self.status);
            self.status = status;
            self.publish_status();
        }
    }

    fn publish_status(&self) {
        self.bus
            .publish(&self.status_topic(), json!(self.status.to_string()));
    }

    fn publish_mode(&self) {
        self.bus
            .publish(&self.mode_topic(), json!(self.run_mode.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::mock::MockActuators;
    use crate::bus::{RetainedBus, SubscribeFlags};
    use crate::condition::{
        Condition, ConditionKind, EdgeCondition, Operation, Threshold, TimeValue,
        WindowCondition,
    };
    use crate::sequence::DurationBuffer;
    use crate::writer::CaptureRecorder;

    type Machine = TriggerMachine<MockActuators, MockActuators, RetainedBus>;

    fn machine() -> (Machine, RetainedBus) {
        let bus = RetainedBus::new();
        let m = TriggerMachine::new(
            Arc::new(Catalog::default()),
            "js220/trigger",
            MockActuators::default(),
            MockActuators::default(),
            bus.clone(),
        );
        (m, bus)
    }

    /// Start on current > 0.5 held 0.5 s, stop as soon as it drops.
    fn pulse_sequence() -> TriggerSequence {
        let mut seq = TriggerSequence::default();
        seq.start.set_active(Condition::Edge(EdgeCondition {
            threshold: Threshold::new("current", Operation::Greater, 0.5),
            duration_min: TimeValue::seconds(0.5),
            ..EdgeCondition::default()
        }));
        seq.stop.set_active(Condition::Edge(EdgeCondition {
            threshold: Threshold::new("current", Operation::Less, 0.5),
            duration_min: TimeValue::seconds(0.0),
            ..EdgeCondition::default()
        }));
        seq
    }

    /// 100 ms samples, high on every `[on, off)` interval (in sample indices).
    fn feed(m: &mut Machine, range: std::ops::Range<u32>, pulses: &[(u32, u32)]) {
        for k in range {
            let high = pulses.iter().any(|&(on, off)| k >= on && k < off);
            m.on_sample(
                "current",
                Sample {
                    sample_id: k as u64,
                    timestamp: k as f64 / 10.0,
                    value: if high { 1.0 } else { 0.0 },
                },
            );
        }
    }

    #[test]
    fn single_run_returns_to_inactive() {
        let (mut m, bus) = machine();
        let status = bus.subscribe(&m.status_topic(), SubscribeFlags::PUB_RETAIN);
        m.set_config(pulse_sequence()).unwrap();
        m.on_command(Command::Arm).unwrap();
        assert_eq!(m.status(), Status::Searching);

        feed(&mut m, 0..16, &[(10, 21)]);
        assert_eq!(m.status(), Status::Active);
        feed(&mut m, 16..30, &[(10, 21)]);
        assert_eq!(m.status(), Status::Inactive);

        let published: Vec<_> = status.try_iter().map(|(_, v)| v).collect();
        assert_eq!(
            published,
            [
                json!("inactive"),
                json!("searching"),
                json!("active"),
                json!("inactive")
            ]
        );
        assert_eq!(
            m.recorder().calls,
            [
                "arm_buffer 0.001",
                "start Ram 1.5 0.001",
                "release_buffer",
                "stop Ram 2.1 0"
            ]
        );
        let stats = m.stats();
        assert_eq!((stats.start_matches, stats.stop_matches), (1, 1));
    }

    #[test]
    fn continuous_run_rearms() {
        let (mut m, _bus) = machine();
        m.set_config(pulse_sequence()).unwrap();
        m.on_command(Command::SetRunMode(RunMode::Continuous)).unwrap();
        m.on_command(Command::Toggle).unwrap();

        feed(&mut m, 0..50, &[(10, 21), (30, 40)]);
        assert_eq!(m.status(), Status::Searching);
        assert_eq!(m.stats().start_matches, 2);
        assert_eq!(m.stats().stop_matches, 2);

        m.on_command(Command::Toggle).unwrap();
        assert_eq!(m.status(), Status::Inactive);
        // last call closes the pre-roll buffer armed after the second stop
        assert_eq!(m.recorder().calls.last().map(String::as_str), Some("release_buffer"));
    }

    #[test]
    fn halt_when_inactive_is_silent() {
        let (mut m, _bus) = machine();
        m.on_command(Command::Halt).unwrap();
        assert_eq!(m.status(), Status::Inactive);
        assert!(m.recorder().calls.is_empty());
        assert!(m.gpio().calls.is_empty());
        assert_eq!(m.stats().halts, 0);
    }

    #[test]
    fn halt_while_active_stops_capture() {
        let (mut m, _bus) = machine();
        let mut seq = pulse_sequence();
        seq.stop_actions.gpo = Some(crate::actions::Gpo::new("T", 0));
        m.set_config(seq).unwrap();
        m.on_command(Command::Arm).unwrap();
        feed(&mut m, 0..17, &[(10, 40)]);
        assert_eq!(m.status(), Status::Active);

        m.on_command(Command::Halt).unwrap();
        assert_eq!(m.status(), Status::Inactive);
        assert_eq!(m.recorder().calls.last().map(String::as_str), Some("stop Ram 1.6 0"));
        assert_eq!(m.gpio().calls, ["gpo T=0"]);
    }

    #[test]
    fn default_wait_stop_uses_sample_clock() {
        let (mut m, _bus) = machine();
        m.on_command(Command::Arm).unwrap();
        feed(&mut m, 0..12, &[(10, 100)]);
        assert_eq!(m.status(), Status::Active);
        assert_eq!(m.last_event(), Some(&TriggerEvent::StartMatched { timestamp: 1.1 }));
        // voltage samples advance the wait timer too
        for k in 12..17 {
            m.on_sample(
                "voltage",
                Sample {
                    sample_id: k,
                    timestamp: k as f64 / 10.0,
                    value: 3.3,
                },
            );
        }
        assert_eq!(m.status(), Status::Inactive);
    }

    #[test]
    fn invalid_config_keeps_previous() {
        let (mut m, _bus) = machine();
        m.set_config(pulse_sequence()).unwrap();

        let mut bad = TriggerSequence::default();
        bad.start.set_active(Condition::Edge(EdgeCondition {
            threshold: Threshold::new("current_range", Operation::Greater, 2.0),
            ..EdgeCondition::default()
        }));
        let err = m.on_command(Command::SetConfig(bad)).unwrap_err();
        assert!(matches!(err, ValidationError::IncompatibleOperator { .. }));
        assert_eq!(m.get_config(), &pulse_sequence());
        assert!(matches!(m.last_event(), Some(TriggerEvent::ConfigRejected(_))));
    }

    #[test]
    fn config_is_snapshotted_on_arm() {
        let (mut m, _bus) = machine();
        m.set_config(pulse_sequence()).unwrap();
        m.on_command(Command::Arm).unwrap();

        let mut other = pulse_sequence();
        other.start.select(ConditionKind::Window);
        m.set_config(other).unwrap();

        feed(&mut m, 0..16, &[(10, 21)]);
        assert_eq!(m.status(), Status::Active);
        assert_eq!(m.armed_config(), Some(&pulse_sequence()));
    }

    #[test]
    fn out_of_order_samples_are_dropped() {
        let (mut m, _bus) = machine();
        m.set_config(pulse_sequence()).unwrap();
        m.on_command(Command::Arm).unwrap();
        feed(&mut m, 10..14, &[(10, 40)]);
        feed(&mut m, 12..13, &[(10, 40)]);
        assert_eq!(m.stats().anomalies, 1);
        assert!(matches!(
            m.last_event(),
            Some(TriggerEvent::Anomaly(EvaluationAnomaly::OutOfOrder { .. }))
        ));
        feed(&mut m, 14..16, &[(10, 40)]);
        assert_eq!(m.status(), Status::Active);
    }

    #[test]
    fn blocks_without_sample_rate_are_dropped() {
        let (mut m, _bus) = machine();
        m.on_block(&SampleBlock {
            signal: "current".into(),
            sample_id: 0,
            sample_rate: 0.0,
            timestamp: 0.0,
            values: vec![1.0; 4],
        });
        assert_eq!(m.stats().samples, 0);
        assert_eq!(m.stats().anomalies, 1);
    }

    #[test]
    fn run_mode_strings() {
        assert_eq!("continuous".parse::<RunMode>(), Ok(RunMode::Continuous));
        assert!("loop".parse::<RunMode>().is_err());
        assert_eq!(Status::Searching.to_string(), "searching");
    }

    #[test]
    fn post_roll_keeps_active_until_elapsed() {
        let (mut m, _bus) = machine();
        let mut seq = pulse_sequence();
        seq.after_stop = DurationBuffer::new(true, 0.5);
        m.set_config(seq).unwrap();
        m.on_command(Command::Arm).unwrap();

        feed(&mut m, 0..25, &[(10, 21)]);
        assert_eq!(m.stats().stop_matches, 1);
        assert_eq!(m.status(), Status::Active);
        assert_eq!(m.recorder().calls.last().map(String::as_str), Some("stop Ram 2.1 0.5"));

        feed(&mut m, 25..30, &[(10, 21)]);
        assert_eq!(m.status(), Status::Inactive);
    }

    #[test]
    fn halt_closes_post_roll_recording() {
        let dir = std::env::temp_dir().join(format!("jstrigger-machine-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let mut m = TriggerMachine::new(
            Arc::new(Catalog::default()),
            "js220/trigger",
            CaptureRecorder::new(&dir, 64, 1000),
            MockActuators::default(),
            RetainedBus::new(),
        );
        let mut seq = pulse_sequence();
        seq.start_actions.record_to_file = true;
        seq.after_stop = DurationBuffer::new(true, 10.0);
        m.set_config(seq).unwrap();
        m.set_run_mode(RunMode::Continuous);
        m.on_command(Command::Arm).unwrap();

        for k in 0..30u32 {
            let value = if (10..20).contains(&k) { 1.0 } else { 0.0 };
            m.on_sample(
                "current",
                Sample {
                    sample_id: k as u64,
                    timestamp: k as f64 / 10.0,
                    value,
                },
            );
        }
        assert_eq!(m.stats().stop_matches, 1);
        assert_eq!(m.status(), Status::Active);
        assert!(m.recorder().is_capturing());

        m.on_command(Command::Halt).unwrap();
        assert_eq!(m.status(), Status::Inactive);
        assert!(!m.recorder().is_capturing());
        assert_eq!(m.recorder().files().len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn window_start_on_energy() {
        let (mut m, _bus) = machine();
        let mut seq = TriggerSequence::default();
        *seq.start.select(ConditionKind::Window) = Condition::Window(WindowCondition {
            threshold: Threshold::new("energy", Operation::Greater, 1.0),
            duration: TimeValue::seconds(0.5),
        });
        m.set_config(seq).unwrap();
        m.on_command(Command::Arm).unwrap();

        // 5 J/s from 1.0 s: 1.5 J gained between 0.8 and 1.3
        for k in 0..14u32 {
            m.on_sample(
                "energy",
                Sample {
                    sample_id: k as u64,
                    timestamp: k as f64 / 10.0,
                    value: 5.0 * k.saturating_sub(10) as f64 / 10.0,
                },
            );
        }
        assert_eq!(m.status(), Status::Active);
        assert_eq!(m.last_event(), Some(&TriggerEvent::StartMatched { timestamp: 1.3 }));
    }

    #[test]
    fn failing_actuators_do_not_stall_transitions() {
        let failing = || MockActuators {
            fail: true,
            ..MockActuators::default()
        };
        let mut m = TriggerMachine::new(
            Arc::new(Catalog::default()),
            "js220/trigger",
            failing(),
            failing(),
            RetainedBus::new(),
        );
        let mut seq = pulse_sequence();
        seq.start_actions.gpo = Some(crate::actions::Gpo::new("T", 1));
        seq.stop_actions.gpo = Some(crate::actions::Gpo::new("T", 0));
        m.set_config(seq).unwrap();
        m.on_command(Command::Arm).unwrap();

        feed(&mut m, 0..30, &[(10, 21)]);
        assert_eq!(m.status(), Status::Inactive);
        assert_eq!((m.stats().start_matches, m.stats().stop_matches), (1, 1));
        assert_eq!(m.gpio().calls, ["gpo T=1", "gpo T=0"]);
        assert!(m.recorder().calls.contains(&"stop Ram 2.1 0".to_string()));
    }
}
