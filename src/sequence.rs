use std::fs;
use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::actions::{Gpo, StartActions, StopActions};
use crate::condition::{
    Condition, ConditionKind, ConditionSlot, EdgeCondition, Operation, Threshold, TimeValue,
    WaitCondition, WindowCondition,
};
use crate::error::{ValidationError, ValidationResult};
use crate::signals::{Catalog, SignalKind, TIME};

const SELECTED: &str = "__selected__";
const START_KINDS: [ConditionKind; 2] = [ConditionKind::Edge, ConditionKind::Window];
const STOP_KINDS: [ConditionKind; 3] = [
    ConditionKind::Wait,
    ConditionKind::Edge,
    ConditionKind::Window,
];

/// Optional pre-roll or post-roll duration.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationBuffer {
    pub enabled: bool,
    pub duration: TimeValue,
}

impl DurationBuffer {
    pub fn new(enabled: bool, seconds: f64) -> Self {
        Self {
            enabled,
            duration: TimeValue::seconds(seconds),
        }
    }

    /// Duration in seconds when enabled.
    pub fn seconds(&self) -> Option<f64> {
        self.enabled.then_some(self.duration.value)
    }
}

/// Complete start/stop trigger configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSequence {
    pub before_start: DurationBuffer,
    pub start: ConditionSlot,
    pub start_actions: StartActions,
    pub stop: ConditionSlot,
    pub stop_actions: StopActions,
    pub after_stop: DurationBuffer,
}

impl Default for TriggerSequence {
    fn default() -> Self {
        Self {
            before_start: DurationBuffer::new(true, 0.001),
            start: default_slot(&START_KINDS, ConditionKind::Edge, false),
            start_actions: StartActions::default(),
            stop: default_slot(&STOP_KINDS, ConditionKind::Wait, true),
            stop_actions: StopActions::default(),
            after_stop: DurationBuffer::new(false, 0.001),
        }
    }
}

fn default_condition(kind: ConditionKind, stop: bool) -> Condition {
    match kind {
        ConditionKind::Edge if stop => Condition::Edge(EdgeCondition::default_stop()),
        kind => Condition::default_for(kind),
    }
}

fn default_slot(kinds: &[ConditionKind], selected: ConditionKind, stop: bool) -> ConditionSlot {
    ConditionSlot::with_stash(
        default_condition(selected, stop),
        kinds
            .iter()
            .filter(|k| **k != selected)
            .map(|k| default_condition(*k, stop)),
    )
}

// --- serialization -------------------------------------------------------

fn unit_entry(map: &mut Map<String, Value>, unit: &Option<String>) {
    if let Some(unit) = unit {
        map.insert("unit".into(), json!(unit));
    }
}

fn threshold_to_value(t: &Threshold) -> Value {
    let mut map = Map::new();
    map.insert("signal".into(), json!(t.signal));
    map.insert("operation".into(), json!(t.operation.symbol()));
    map.insert("value".into(), json!(t.value));
    unit_entry(&mut map, &t.unit);
    Value::Object(map)
}

fn time_to_value(t: &TimeValue) -> Value {
    let mut map = Map::new();
    map.insert("value".into(), json!(t.value));
    map.insert("signal".into(), json!(t.signal));
    unit_entry(&mut map, &t.unit);
    Value::Object(map)
}

fn buffer_to_value(b: &DurationBuffer) -> Value {
    let mut v = time_to_value(&b.duration);
    if let Value::Object(map) = &mut v {
        map.insert("enabled".into(), json!(b.enabled));
    }
    v
}

fn condition_to_value(c: &Condition) -> Value {
    match c {
        Condition::Edge(e) => json!({
            "threshold": threshold_to_value(&e.threshold),
            "duration_min": time_to_value(&e.duration_min),
            "duration_max": time_to_value(&e.duration_max),
            "duration_max_enabled": e.duration_max_enabled,
        }),
        Condition::Window(w) => json!({
            "threshold": threshold_to_value(&w.threshold),
            "duration": time_to_value(&w.duration),
        }),
        Condition::Wait(w) => time_to_value(&w.duration),
    }
}

fn slot_to_value(slot: &ConditionSlot) -> Value {
    let mut map = Map::new();
    map.insert(SELECTED.into(), json!(slot.selected().name()));
    for c in slot.variants() {
        map.insert(c.kind().name().into(), condition_to_value(c));
    }
    Value::Object(map)
}

fn gpo_to_value(gpo: &Option<Gpo>, default_value: u8) -> Value {
    match gpo {
        Some(g) => json!({"enabled": true, "signal": g.channel, "value": g.value}),
        None => json!({"enabled": false, "signal": "0", "value": default_value}),
    }
}

// --- tolerant deserialization --------------------------------------------

fn get_bool(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn get_f64(v: &Value, key: &str, default: f64) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn get_str(v: &Value, key: &str, default: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn get_unit(v: &Value, default: &Option<String>) -> Option<String> {
    match v.get("unit").and_then(Value::as_str) {
        Some(u) => Some(u.to_string()),
        None => default.clone(),
    }
}

fn get_u8(v: &Value, key: &str, default: u8) -> u8 {
    v.get(key)
        .and_then(Value::as_u64)
        .and_then(|x| u8::try_from(x).ok())
        .unwrap_or(default)
}

fn threshold_from_value(v: &Value, default: &Threshold) -> Threshold {
    Threshold {
        signal: get_str(v, "signal", &default.signal),
        operation: v
            .get("operation")
            .and_then(Value::as_str)
            .and_then(Operation::parse)
            .unwrap_or(default.operation),
        value: get_f64(v, "value", default.value),
        unit: get_unit(v, &default.unit),
    }
}

fn time_from_value(v: &Value, default: &TimeValue) -> TimeValue {
    TimeValue {
        value: get_f64(v, "value", default.value),
        signal: get_str(v, "signal", &default.signal),
        unit: get_unit(v, &default.unit),
    }
}

fn buffer_from_value(v: &Value, default: &DurationBuffer) -> DurationBuffer {
    DurationBuffer {
        enabled: get_bool(v, "enabled", default.enabled),
        duration: time_from_value(v, &default.duration),
    }
}

fn condition_from_value(v: &Value, default: &Condition) -> Condition {
    let null = Value::Null;
    match default {
        Condition::Edge(d) => Condition::Edge(EdgeCondition {
            threshold: threshold_from_value(v.get("threshold").unwrap_or(&null), &d.threshold),
            duration_min: time_from_value(v.get("duration_min").unwrap_or(&null), &d.duration_min),
            duration_max: time_from_value(v.get("duration_max").unwrap_or(&null), &d.duration_max),
            duration_max_enabled: get_bool(v, "duration_max_enabled", d.duration_max_enabled),
        }),
        Condition::Window(d) => Condition::Window(WindowCondition {
            threshold: threshold_from_value(v.get("threshold").unwrap_or(&null), &d.threshold),
            duration: time_from_value(v.get("duration").unwrap_or(&null), &d.duration),
        }),
        Condition::Wait(d) => Condition::Wait(WaitCondition {
            duration: time_from_value(v, &d.duration),
        }),
    }
}

fn slot_from_value(v: &Value, default: &ConditionSlot, kinds: &[ConditionKind], stop: bool) -> ConditionSlot {
    let selected_name = v.get(SELECTED).and_then(Value::as_str);
    let selected = match selected_name.map(|s| (s, ConditionKind::parse(s))) {
        Some((_, Some(kind))) => kind,
        Some((name, None)) => {
            warn!("unknown condition `{name}`, using {}", default.selected());
            default.selected()
        }
        None => default.selected(),
    };

    let read = |kind: ConditionKind| {
        let fallback = default
            .variant(kind)
            .cloned()
            .unwrap_or_else(|| default_condition(kind, stop));
        // legacy documents store the wait condition under `duration`
        let stored = match kind {
            ConditionKind::Wait => v.get("wait").or_else(|| v.get("duration")),
            _ => v.get(kind.name()),
        };
        match stored {
            Some(stored) => condition_from_value(stored, &fallback),
            None => fallback,
        }
    };

    ConditionSlot::with_stash(
        read(selected),
        kinds.iter().filter(|k| **k != selected).map(|k| read(*k)),
    )
}

fn gpo_from_value(v: Option<&Value>, default_value: u8) -> Option<Gpo> {
    let v = v?;
    if !get_bool(v, "enabled", false) {
        return None;
    }
    Some(Gpo {
        channel: get_str(v, "signal", "0"),
        value: get_u8(v, "value", default_value),
    })
}

fn start_actions_from_value(v: &Value) -> StartActions {
    let d = StartActions::default();
    let inner = v.get("start_actions").unwrap_or(v);
    StartActions {
        ram_capture: get_bool(inner, "ram", d.ram_capture),
        record_to_file: get_bool(inner, "record", d.record_to_file),
        gpo: gpo_from_value(inner.get("gpo"), 1),
    }
}

fn stop_actions_from_value(v: &Value) -> StopActions {
    let inner = v.get("stop_actions").unwrap_or(v);
    // flat form: output / output_signal / output_value / buffer_stop_delay
    let gpo = match inner.get("gpo") {
        Some(g) => gpo_from_value(Some(g), 0),
        None if get_bool(inner, "output", false) => Some(Gpo {
            channel: get_str(inner, "output_signal", "0"),
            value: get_u8(inner, "output_value", 0),
        }),
        None => None,
    };
    let buffer_stop = match inner.get("buffer_stop") {
        Some(b @ Value::Object(_)) => {
            buffer_from_value(b, &DurationBuffer::new(false, 1.0)).seconds()
        }
        Some(Value::Bool(true)) => Some(get_f64(inner, "buffer_stop_delay", 0.0)),
        _ => None,
    };
    StopActions {
        gpo,
        single_marker: get_bool(inner, "single_marker", false),
        dual_marker: get_bool(inner, "dual_marker", false),
        buffer_stop,
    }
}

impl TriggerSequence {
    /// Nested document form, as persisted and published on the bus.
    pub fn to_value(&self) -> Value {
        let buffer_stop = match self.stop_actions.buffer_stop {
            Some(s) => DurationBuffer::new(true, s),
            None => DurationBuffer::new(false, 1.0),
        };
        json!({
            "before_start": buffer_to_value(&self.before_start),
            "start": slot_to_value(&self.start),
            "start_actions": {"start_actions": {
                "ram": self.start_actions.ram_capture,
                "record": self.start_actions.record_to_file,
                "gpo": gpo_to_value(&self.start_actions.gpo, 1),
            }},
            "stop": slot_to_value(&self.stop),
            "stop_actions": {"stop_actions": {
                "gpo": gpo_to_value(&self.stop_actions.gpo, 0),
                "single_marker": self.stop_actions.single_marker,
                "dual_marker": self.stop_actions.dual_marker,
                "buffer_stop": buffer_to_value(&buffer_stop),
            }},
            "after_stop": buffer_to_value(&self.after_stop),
        })
    }

    /// Read a document. Never fails: missing or mistyped entries take their
    /// default value.
    pub fn from_value(v: &Value) -> Self {
        let d = Self::default();
        let null = Value::Null;
        let section = |key: &str| v.get(key).unwrap_or(&null);
        Self {
            before_start: buffer_from_value(section("before_start"), &d.before_start),
            start: slot_from_value(section("start"), &d.start, &START_KINDS, false),
            start_actions: start_actions_from_value(section("start_actions")),
            stop: slot_from_value(section("stop"), &d.stop, &STOP_KINDS, true),
            stop_actions: stop_actions_from_value(section("stop_actions")),
            after_stop: buffer_from_value(section("after_stop"), &d.after_stop),
        }
    }

    pub fn from_json_str(s: &str) -> Self {
        match serde_json::from_str::<Value>(s) {
            Ok(v) => Self::from_value(&v),
            Err(e) => {
                warn!("unreadable trigger sequence, using defaults: {e}");
                Self::default()
            }
        }
    }

    pub fn to_json_string(&self) -> String {
        let v = self.to_value();
        serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        info!("Loaded trigger sequence from {}", path.as_ref().display());
        Ok(Self::from_json_str(&text))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_json_string())?;
        Ok(())
    }
}

// --- validation ----------------------------------------------------------

/// A sequence that passed [`validate`]. Only these are installed in the
/// state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSequence(TriggerSequence);

// the default sequence only names signals every catalog carries
impl Default for ValidatedSequence {
    fn default() -> Self {
        ValidatedSequence(TriggerSequence::default())
    }
}

impl ValidatedSequence {
    pub fn sequence(&self) -> &TriggerSequence {
        &self.0
    }

    pub fn start(&self) -> &Condition {
        self.0.start.active()
    }

    pub fn stop(&self) -> &Condition {
        self.0.stop.active()
    }

    pub fn start_actions(&self) -> &StartActions {
        &self.0.start_actions
    }

    pub fn stop_actions(&self) -> &StopActions {
        &self.0.stop_actions
    }

    pub fn pre_roll(&self) -> Option<f64> {
        self.0.before_start.seconds()
    }

    pub fn post_roll(&self) -> Option<f64> {
        self.0.after_stop.seconds()
    }
}

fn check_finite(field: &str, value: f64) -> ValidationResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite {
            field: field.to_string(),
            value,
        })
    }
}

fn check_unit(catalog: &Catalog, field: &str, signal: &str, unit: &Option<String>) -> ValidationResult<()> {
    let Some(unit) = unit else {
        return Ok(());
    };
    let Some(desc) = catalog.signal(signal) else {
        return Err(ValidationError::UnknownSignal {
            field: field.to_string(),
            signal: signal.to_string(),
        });
    };
    let unitless = desc.unit_choices.is_empty() && unit.is_empty();
    if unitless || desc.unit(unit).is_some() {
        Ok(())
    } else {
        Err(ValidationError::InvalidUnit {
            field: field.to_string(),
            signal: signal.to_string(),
            unit: unit.clone(),
        })
    }
}

fn check_time(catalog: &Catalog, field: &str, t: &TimeValue) -> ValidationResult<()> {
    if t.signal != TIME {
        return Err(ValidationError::IncompatibleSignal {
            field: field.to_string(),
            signal: t.signal.clone(),
            expected: "time",
        });
    }
    check_finite(field, t.value)?;
    if t.value < 0.0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value: t.value,
            min: 0.0,
            max: f64::INFINITY,
        });
    }
    check_unit(catalog, field, TIME, &t.unit)
}

fn check_threshold(
    catalog: &Catalog,
    field: &str,
    t: &Threshold,
    kinds: &[SignalKind],
    expected: &'static str,
) -> ValidationResult<()> {
    let desc = catalog
        .signal(&t.signal)
        .ok_or_else(|| ValidationError::UnknownSignal {
            field: field.to_string(),
            signal: t.signal.clone(),
        })?;
    if !kinds.contains(&desc.kind) {
        return Err(ValidationError::IncompatibleSignal {
            field: field.to_string(),
            signal: t.signal.clone(),
            expected,
        });
    }
    if desc.is_digital() && t.operation != Operation::Equal {
        return Err(ValidationError::IncompatibleOperator {
            field: field.to_string(),
            signal: t.signal.clone(),
            operation: t.operation.symbol().to_string(),
        });
    }
    check_finite(field, t.value)?;
    if let Some(range) = desc.value_range {
        if !range.contains(t.value) {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: t.value,
                min: range.min,
                max: range.max,
            });
        }
        if !range.on_step(t.value) {
            return Err(ValidationError::OffStep {
                field: field.to_string(),
                value: t.value,
                min: range.min,
                step: range.step,
            });
        }
    }
    check_unit(catalog, field, &t.signal, &t.unit)
}

fn check_condition(catalog: &Catalog, field: &str, c: &Condition, allow_wait: bool) -> ValidationResult<()> {
    match c {
        Condition::Edge(e) => {
            check_threshold(
                catalog,
                &format!("{field}.edge.threshold"),
                &e.threshold,
                &[SignalKind::Continuous, SignalKind::Digital],
                "a continuous or digital signal",
            )?;
            check_time(catalog, &format!("{field}.edge.duration_min"), &e.duration_min)?;
            if e.duration_max_enabled {
                check_time(catalog, &format!("{field}.edge.duration_max"), &e.duration_max)?;
            }
            Ok(())
        }
        Condition::Window(w) => {
            check_threshold(
                catalog,
                &format!("{field}.window.threshold"),
                &w.threshold,
                &[SignalKind::Accumulating],
                "an accumulating signal",
            )?;
            check_time(catalog, &format!("{field}.window.duration"), &w.duration)
        }
        Condition::Wait(_) if !allow_wait => Err(ValidationError::ConditionNotAllowed {
            field: field.to_string(),
            kind: ConditionKind::Wait.name().to_string(),
        }),
        Condition::Wait(w) => check_time(catalog, &format!("{field}.wait"), &w.duration),
    }
}

fn check_gpo(catalog: &Catalog, field: &str, gpo: &Option<Gpo>) -> ValidationResult<()> {
    let Some(gpo) = gpo else {
        return Ok(());
    };
    if catalog.output(&gpo.channel).is_none() {
        return Err(ValidationError::UnknownOutput {
            field: field.to_string(),
            channel: gpo.channel.clone(),
        });
    }
    if gpo.value > 1 {
        return Err(ValidationError::InvalidOutputValue {
            field: field.to_string(),
            value: gpo.value,
        });
    }
    Ok(())
}

/// Check every enabled part of `seq` against `catalog`. Unselected condition
/// variants are not checked.
pub fn validate(seq: &TriggerSequence, catalog: &Catalog) -> ValidationResult<ValidatedSequence> {
    if seq.before_start.enabled {
        check_time(catalog, "before_start", &seq.before_start.duration)?;
    }
    check_condition(catalog, "start", seq.start.active(), false)?;
    check_gpo(catalog, "start_actions.gpo", &seq.start_actions.gpo)?;
    check_condition(catalog, "stop", seq.stop.active(), true)?;
    check_gpo(catalog, "stop_actions.gpo", &seq.stop_actions.gpo)?;
    if let Some(delay) = seq.stop_actions.buffer_stop {
        check_time(catalog, "stop_actions.buffer_stop", &TimeValue::seconds(delay))?;
    }
    if seq.after_stop.enabled {
        check_time(catalog, "after_stop", &seq.after_stop.duration)?;
    }
    Ok(ValidatedSequence(seq.clone()))
}
