use std::collections::VecDeque;
use std::fmt;

use log::debug;

use crate::error::EvaluationAnomaly;
use crate::event::Sample;
use crate::signals::TIME;
use crate::units::UnitResolver;

/// Slack applied to duration comparisons so sample clocks built from
/// `n / fs` land on the boundary they name.
const TIME_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Equal,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Greater,
        Operation::Less,
        Operation::GreaterEqual,
        Operation::LessEqual,
        Operation::Equal,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Operation::Greater => ">",
            Operation::Less => "<",
            Operation::GreaterEqual => "≥",
            Operation::LessEqual => "≤",
            Operation::Equal => "==",
        }
    }

    /// Accepts the stored symbols plus their ASCII spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            ">" => Some(Operation::Greater),
            "<" => Some(Operation::Less),
            "≥" | ">=" => Some(Operation::GreaterEqual),
            "≤" | "<=" => Some(Operation::LessEqual),
            "==" | "=" => Some(Operation::Equal),
            _ => None,
        }
    }

    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operation::Greater => lhs > rhs,
            Operation::Less => lhs < rhs,
            Operation::GreaterEqual => lhs >= rhs,
            Operation::LessEqual => lhs <= rhs,
            Operation::Equal => (lhs - rhs).abs() <= f64::EPSILON * rhs.abs().max(1.0),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Comparison of one signal against a constant. `value` is in base SI
/// units; `unit` only remembers how the operator entered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub signal: String,
    pub operation: Operation,
    pub value: f64,
    pub unit: Option<String>,
}

impl Threshold {
    pub fn new(signal: &str, operation: Operation, value: f64) -> Self {
        Self {
            signal: signal.to_string(),
            operation,
            value,
            unit: None,
        }
    }

    pub fn holds(&self, value: f64) -> bool {
        self.operation.compare(value, self.value)
    }

    pub fn describe(&self, resolver: &UnitResolver) -> String {
        format!(
            "{} {} {}",
            self.signal,
            self.operation,
            resolver.format(self.value, &self.signal)
        )
    }
}

/// A duration in seconds, tagged with the `time` signal like every other
/// stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeValue {
    pub value: f64,
    pub signal: String,
    pub unit: Option<String>,
}

impl TimeValue {
    pub fn seconds(value: f64) -> Self {
        Self {
            value,
            signal: TIME.to_string(),
            unit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCondition {
    pub threshold: Threshold,
    pub duration_min: TimeValue,
    pub duration_max: TimeValue,
    pub duration_max_enabled: bool,
}

impl Default for EdgeCondition {
    fn default() -> Self {
        Self {
            threshold: Threshold::new("current", Operation::Greater, 10e-6),
            duration_min: TimeValue::seconds(10e-6),
            duration_max: TimeValue::seconds(1.0),
            duration_max_enabled: false,
        }
    }
}

impl EdgeCondition {
    /// Stop-side default: current falls back below 0.9 A.
    pub fn default_stop() -> Self {
        Self {
            threshold: Threshold::new("current", Operation::Less, 0.9),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowCondition {
    pub threshold: Threshold,
    pub duration: TimeValue,
}

impl Default for WindowCondition {
    fn default() -> Self {
        Self {
            threshold: Threshold::new("energy", Operation::Greater, 1.0),
            duration: TimeValue::seconds(0.1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitCondition {
    pub duration: TimeValue,
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self {
            duration: TimeValue::seconds(0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Edge,
    Window,
    Wait,
}

impl ConditionKind {
    pub fn name(self) -> &'static str {
        match self {
            ConditionKind::Edge => "edge",
            ConditionKind::Window => "window",
            ConditionKind::Wait => "wait",
        }
    }

    /// `duration` is the legacy name of the wait condition.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "edge" => Some(ConditionKind::Edge),
            "window" => Some(ConditionKind::Window),
            "wait" | "duration" => Some(ConditionKind::Wait),
            _ => None,
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Edge(EdgeCondition),
    Window(WindowCondition),
    Wait(WaitCondition),
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Condition::Edge(_) => ConditionKind::Edge,
            Condition::Window(_) => ConditionKind::Window,
            Condition::Wait(_) => ConditionKind::Wait,
        }
    }

    pub fn default_for(kind: ConditionKind) -> Self {
        match kind {
            ConditionKind::Edge => Condition::Edge(EdgeCondition::default()),
            ConditionKind::Window => Condition::Window(WindowCondition::default()),
            ConditionKind::Wait => Condition::Wait(WaitCondition::default()),
        }
    }

    pub fn describe(&self, resolver: &UnitResolver) -> String {
        match self {
            Condition::Edge(c) => {
                let mut s = format!(
                    "{} for at least {}",
                    c.threshold.describe(resolver),
                    resolver.format(c.duration_min.value, TIME)
                );
                if c.duration_max_enabled {
                    s.push_str(&format!(
                        " but no more than {}",
                        resolver.format(c.duration_max.value, TIME)
                    ));
                }
                s
            }
            Condition::Window(c) => format!(
                "{} over a {} window",
                c.threshold.describe(resolver),
                resolver.format(c.duration.value, TIME)
            ),
            Condition::Wait(c) => format!("wait {}", resolver.format(c.duration.value, TIME)),
        }
    }
}

/// The selected condition plus the last-edited value of every other variant,
/// so switching the type back and forth keeps what the operator entered.
#[derive(Debug, Clone)]
pub struct ConditionSlot {
    active: Condition,
    stash: Vec<Condition>,
}

// stash order is irrelevant, at most one entry per kind
impl PartialEq for ConditionSlot {
    fn eq(&self, other: &Self) -> bool {
        self.active == other.active
            && self.stash.len() == other.stash.len()
            && self
                .stash
                .iter()
                .all(|c| other.variant(c.kind()) == Some(c))
    }
}

impl ConditionSlot {
    pub fn new(active: Condition) -> Self {
        Self {
            active,
            stash: Vec::new(),
        }
    }

    pub fn with_stash(active: Condition, others: impl IntoIterator<Item = Condition>) -> Self {
        let mut slot = Self::new(active);
        for c in others {
            slot.stash_condition(c);
        }
        slot
    }

    pub fn active(&self) -> &Condition {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut Condition {
        &mut self.active
    }

    pub fn selected(&self) -> ConditionKind {
        self.active.kind()
    }

    /// Every stored variant, selected first.
    pub fn variants(&self) -> impl Iterator<Item = &Condition> {
        std::iter::once(&self.active).chain(self.stash.iter())
    }

    /// The stored configuration for `kind`, selected or not.
    pub fn variant(&self, kind: ConditionKind) -> Option<&Condition> {
        if self.active.kind() == kind {
            Some(&self.active)
        } else {
            self.stash.iter().find(|c| c.kind() == kind)
        }
    }

    pub fn select(&mut self, kind: ConditionKind) -> &mut Condition {
        if self.active.kind() != kind {
            let next = match self.stash.iter().position(|c| c.kind() == kind) {
                Some(idx) => self.stash.swap_remove(idx),
                None => Condition::default_for(kind),
            };
            let previous = std::mem::replace(&mut self.active, next);
            self.stash_condition(previous);
        }
        &mut self.active
    }

    /// Replace the selected condition, stashing the previous one if it was a
    /// different variant.
    pub fn set_active(&mut self, condition: Condition) {
        self.stash.retain(|c| c.kind() != condition.kind());
        let previous = std::mem::replace(&mut self.active, condition);
        if previous.kind() != self.active.kind() {
            self.stash_condition(previous);
        }
    }

    fn stash_condition(&mut self, condition: Condition) {
        if condition.kind() == self.active.kind() {
            return;
        }
        self.stash.retain(|c| c.kind() != condition.kind());
        self.stash.push(condition);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    NoMatch,
    Match { timestamp: f64 },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }
}

fn check_sample(
    signal: &str,
    last: Option<f64>,
    sample: &Sample,
) -> Result<(), EvaluationAnomaly> {
    if !sample.timestamp.is_finite() || !sample.value.is_finite() {
        return Err(EvaluationAnomaly::NonFinite {
            signal: signal.to_string(),
            timestamp: sample.timestamp,
        });
    }
    match last {
        Some(previous) if sample.timestamp <= previous => Err(EvaluationAnomaly::OutOfOrder {
            signal: signal.to_string(),
            timestamp: sample.timestamp,
            previous,
        }),
        _ => Ok(()),
    }
}

/// Streaming evaluation of an [`EdgeCondition`].
#[derive(Debug, Clone)]
pub struct EdgeEvaluator {
    condition: EdgeCondition,
    crossed_at: Option<f64>,
    // fired or exceeded duration_max on the current crossing
    fired: bool,
    expired: bool,
    last: Option<f64>,
}

impl EdgeEvaluator {
    pub fn new(condition: EdgeCondition) -> Self {
        Self {
            condition,
            crossed_at: None,
            fired: false,
            expired: false,
            last: None,
        }
    }

    pub fn crossed_at(&self) -> Option<f64> {
        self.crossed_at
    }

    pub fn reset(&mut self) {
        self.crossed_at = None;
        self.fired = false;
        self.expired = false;
        self.last = None;
    }

    pub fn evaluate(&mut self, sample: &Sample) -> Result<MatchResult, EvaluationAnomaly> {
        let c = &self.condition;
        check_sample(&c.threshold.signal, self.last, sample)?;
        self.last = Some(sample.timestamp);

        if !c.threshold.holds(sample.value) {
            self.crossed_at = None;
            self.fired = false;
            self.expired = false;
            return Ok(MatchResult::NoMatch);
        }
        if self.fired || self.expired {
            return Ok(MatchResult::NoMatch);
        }

        let t = sample.timestamp;
        let start = *self.crossed_at.get_or_insert(t);
        let elapsed = t - start;
        if c.duration_max_enabled && elapsed > c.duration_max.value + TIME_EPSILON {
            debug!(
                "edge on {} held {elapsed}s past duration_max, re-arming",
                c.threshold.signal
            );
            self.crossed_at = None;
            self.expired = true;
            return Ok(MatchResult::NoMatch);
        }
        if elapsed + TIME_EPSILON >= c.duration_min.value {
            self.fired = true;
            return Ok(MatchResult::Match { timestamp: t });
        }
        Ok(MatchResult::NoMatch)
    }
}

/// Streaming evaluation of a [`WindowCondition`] over accumulator readings.
///
/// The quantity compared is `newest - baseline`, where the baseline is the
/// latest reading at or before `t - duration`. `>`/`≥` may fire before the
/// window has filled, the other operators wait for a full window.
#[derive(Debug, Clone)]
pub struct WindowEvaluator {
    condition: WindowCondition,
    readings: VecDeque<(f64, f64)>,
    last: Option<f64>,
}

impl WindowEvaluator {
    pub fn new(condition: WindowCondition) -> Self {
        Self {
            condition,
            readings: VecDeque::new(),
            last: None,
        }
    }

    pub fn reset(&mut self) {
        self.readings.clear();
        self.last = None;
    }

    /// Accumulated quantity across the current trailing window.
    pub fn accumulated(&self) -> f64 {
        match (self.readings.front(), self.readings.back()) {
            (Some((_, first)), Some((_, last))) => last - first,
            _ => 0.0,
        }
    }

    pub fn evaluate(&mut self, sample: &Sample) -> Result<MatchResult, EvaluationAnomaly> {
        let c = &self.condition;
        check_sample(&c.threshold.signal, self.last, sample)?;
        self.last = Some(sample.timestamp);

        let t = sample.timestamp;
        self.readings.push_back((t, sample.value));
        let horizon = t - c.duration.value;
        while self.readings.len() >= 2 && self.readings[1].0 <= horizon + TIME_EPSILON {
            self.readings.pop_front();
        }
        if self.readings.len() < 2 {
            return Ok(MatchResult::NoMatch);
        }

        let full = self.readings[0].0 <= horizon + TIME_EPSILON;
        let early = matches!(
            c.threshold.operation,
            Operation::Greater | Operation::GreaterEqual
        );
        if (full || early) && c.threshold.holds(self.accumulated()) {
            self.readings.clear();
            self.readings.push_back((t, sample.value));
            return Ok(MatchResult::Match { timestamp: t });
        }
        Ok(MatchResult::NoMatch)
    }
}

/// Timer driven by the sample clock.
#[derive(Debug, Clone)]
pub struct WaitEvaluator {
    duration: f64,
    armed_at: Option<f64>,
    fired: bool,
}

impl WaitEvaluator {
    pub fn new(condition: WaitCondition) -> Self {
        Self {
            duration: condition.duration.value,
            armed_at: None,
            fired: false,
        }
    }

    /// Start the timer at `t`. Without an explicit arm, the first clock
    /// reading starts it.
    pub fn arm(&mut self, t: f64) {
        self.armed_at = Some(t);
        self.fired = false;
    }

    pub fn reset(&mut self) {
        self.armed_at = None;
        self.fired = false;
    }

    pub fn poll(&mut self, now: f64) -> MatchResult {
        if !now.is_finite() || self.fired {
            return MatchResult::NoMatch;
        }
        let armed_at = *self.armed_at.get_or_insert(now);
        if now - armed_at + TIME_EPSILON >= self.duration {
            self.fired = true;
            MatchResult::Match { timestamp: now }
        } else {
            MatchResult::NoMatch
        }
    }
}

/// Evaluator for whichever condition variant is installed.
#[derive(Debug, Clone)]
pub enum ConditionEvaluator {
    Edge(EdgeEvaluator),
    Window(WindowEvaluator),
    Wait(WaitEvaluator),
}

impl From<&Condition> for ConditionEvaluator {
    fn from(condition: &Condition) -> Self {
        match condition {
            Condition::Edge(c) => ConditionEvaluator::Edge(EdgeEvaluator::new(c.clone())),
            Condition::Window(c) => ConditionEvaluator::Window(WindowEvaluator::new(c.clone())),
            Condition::Wait(c) => ConditionEvaluator::Wait(WaitEvaluator::new(c.clone())),
        }
    }
}

impl ConditionEvaluator {
    /// The signal this evaluator consumes; `None` for the wait timer, which
    /// only reads the clock.
    pub fn signal(&self) -> Option<&str> {
        match self {
            ConditionEvaluator::Edge(e) => Some(&e.condition.threshold.signal),
            ConditionEvaluator::Window(w) => Some(&w.condition.threshold.signal),
            ConditionEvaluator::Wait(_) => None,
        }
    }

    pub fn arm(&mut self, t: Option<f64>) {
        match self {
            ConditionEvaluator::Edge(e) => e.reset(),
            ConditionEvaluator::Window(w) => w.reset(),
            ConditionEvaluator::Wait(w) => match t {
                Some(t) => w.arm(t),
                None => w.reset(),
            },
        }
    }

    /// Feed one sample of `signal`. Samples of other signals only advance
    /// the wait timer.
    pub fn evaluate(&mut self, signal: &str, sample: &Sample) -> Result<MatchResult, EvaluationAnomaly> {
        match self {
            ConditionEvaluator::Edge(e) if e.condition.threshold.signal == signal => e.evaluate(sample),
            ConditionEvaluator::Window(w) if w.condition.threshold.signal == signal => w.evaluate(sample),
            ConditionEvaluator::Wait(w) => Ok(w.poll(sample.timestamp)),
            _ => Ok(MatchResult::NoMatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(t: f64, v: f64) -> Sample {
        Sample {
            sample_id: (t * 10.0).round() as u64,
            timestamp: t,
            value: v,
        }
    }

    fn edge(min: f64, max: Option<f64>) -> EdgeEvaluator {
        EdgeEvaluator::new(EdgeCondition {
            threshold: Threshold::new("current", Operation::Greater, 0.5),
            duration_min: TimeValue::seconds(min),
            duration_max: TimeValue::seconds(max.unwrap_or(1.0)),
            duration_max_enabled: max.is_some(),
        })
    }

    /// Step input sampled every 100 ms: high on [on, off), low elsewhere.
    fn run(eval: &mut EdgeEvaluator, on: u32, off: u32, end: u32) -> Vec<f64> {
        let mut matches = Vec::new();
        for k in 0..=end {
            let t = k as f64 / 10.0;
            let v = if k >= on && k < off { 1.0 } else { 0.0 };
            if let MatchResult::Match { timestamp } = eval.evaluate(&s(t, v)).unwrap() {
                matches.push(timestamp);
            }
        }
        matches
    }

    #[test]
    fn edge_fires_once_after_duration_min() {
        let mut e = edge(0.5, None);
        assert_eq!(run(&mut e, 10, 21, 25), vec![1.5]);
    }

    #[test]
    fn edge_short_pulse_never_fires() {
        let mut e = edge(0.5, None);
        assert!(run(&mut e, 10, 12, 25).is_empty());
        assert_eq!(e.crossed_at(), None);
    }

    #[test]
    fn edge_duration_max_expires_before_min() {
        let mut e = edge(0.5, Some(0.3));
        assert!(run(&mut e, 10, 30, 30).is_empty());
        assert_eq!(e.crossed_at(), None);
    }

    #[test]
    fn edge_rearms_after_signal_returns() {
        let mut e = edge(0.2, None);
        let mut hits = run(&mut e, 2, 6, 8);
        for k in 9..=20 {
            let t = k as f64 / 10.0;
            let v = if (12..16).contains(&k) { 1.0 } else { 0.0 };
            if let MatchResult::Match { timestamp } = e.evaluate(&s(t, v)).unwrap() {
                hits.push(timestamp);
            }
        }
        assert_eq!(hits, vec![0.4, 1.4]);
    }

    #[test]
    fn edge_rejects_out_of_order() {
        let mut e = edge(0.1, None);
        e.evaluate(&s(1.0, 1.0)).unwrap();
        let err = e.evaluate(&s(0.9, 1.0)).unwrap_err();
        assert!(matches!(err, EvaluationAnomaly::OutOfOrder { .. }));
        // the rejected sample did not disturb the crossing
        assert_eq!(e.crossed_at(), Some(1.0));
        assert!(e.evaluate(&s(1.1, 1.0)).unwrap().is_match());
    }

    #[test]
    fn window_sliding_accumulation() {
        let mut w = WindowEvaluator::new(WindowCondition {
            threshold: Threshold::new("energy", Operation::Greater, 1.0),
            duration: TimeValue::seconds(0.5),
        });
        // 1 J/s for two seconds: 0.5 J per window, never above 1 J
        for k in 0..=20 {
            let t = k as f64 / 10.0;
            assert!(!w.evaluate(&s(t, t)).unwrap().is_match());
        }
        // 5 J/s burst: 1.3 J between 1.7 and 2.2
        let mut fired = None;
        for k in 21..=30 {
            let t = k as f64 / 10.0;
            let e = 2.0 + 5.0 * (t - 2.0);
            if let MatchResult::Match { timestamp } = w.evaluate(&s(t, e)).unwrap() {
                fired.get_or_insert(timestamp);
            }
        }
        assert_eq!(fired, Some(2.2));
    }

    #[test]
    fn window_less_than_waits_for_full_window() {
        let mut w = WindowEvaluator::new(WindowCondition {
            threshold: Threshold::new("charge", Operation::Less, 0.1),
            duration: TimeValue::seconds(1.0),
        });
        let mut fired = None;
        for k in 0..=20 {
            let t = k as f64 / 10.0;
            if let MatchResult::Match { timestamp } = w.evaluate(&s(t, 0.0)).unwrap() {
                fired.get_or_insert(timestamp);
            }
        }
        assert_eq!(fired, Some(1.0));
    }

    #[test]
    fn wait_uses_sample_clock() {
        let mut w = WaitEvaluator::new(WaitCondition {
            duration: TimeValue::seconds(0.5),
        });
        w.arm(1.0);
        assert!(!w.poll(1.4).is_match());
        assert_eq!(w.poll(1.5), MatchResult::Match { timestamp: 1.5 });
        assert!(!w.poll(1.6).is_match());
    }

    #[test]
    fn evaluator_ignores_other_signals() {
        let mut ev = ConditionEvaluator::from(&Condition::Edge(EdgeCondition {
            duration_min: TimeValue::seconds(0.0),
            ..EdgeCondition::default()
        }));
        assert_eq!(ev.signal(), Some("current"));
        assert!(!ev.evaluate("voltage", &s(0.0, 5.0)).unwrap().is_match());
        assert!(ev.evaluate("current", &s(0.1, 5.0)).unwrap().is_match());
    }

    #[test]
    fn slot_keeps_unselected_variants() {
        let mut slot = ConditionSlot::new(Condition::Edge(EdgeCondition::default_stop()));
        if let Condition::Window(w) = slot.select(ConditionKind::Window) {
            w.duration = TimeValue::seconds(2.0);
        }
        slot.select(ConditionKind::Edge);
        assert_eq!(
            slot.active(),
            &Condition::Edge(EdgeCondition::default_stop())
        );
        match slot.variant(ConditionKind::Window) {
            Some(Condition::Window(w)) => assert_eq!(w.duration.value, 2.0),
            other => panic!("unexpected {other:?}"),
        }
        assert!(slot.variant(ConditionKind::Wait).is_none());
    }

    #[test]
    fn operation_parsing() {
        for op in Operation::ALL {
            assert_eq!(Operation::parse(op.symbol()), Some(op));
        }
        assert_eq!(Operation::parse(">="), Some(Operation::GreaterEqual));
        assert_eq!(Operation::parse("!="), None);
        assert!(Operation::Equal.compare(3.0, 3.0));
        assert!(!Operation::Equal.compare(3.0, 2.0));
    }
}
