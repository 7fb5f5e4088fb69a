use serde::Deserialize;

/// How a signal behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Instantaneous analog measurement (current, voltage, power).
    Continuous,
    /// Monotonic integral of another signal (energy, charge).
    Accumulating,
    /// Small integer states (current range, LSB channels).
    Digital,
    /// Durations.
    Time,
}

/// Scale from a display unit to the base SI unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    Factor(f64),
    /// One sample period, resolved from the sampling frequency at use time.
    SamplePeriod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitChoice {
    pub label: &'static str,
    pub scale: Scale,
}

const fn unit(label: &'static str, factor: f64) -> UnitChoice {
    UnitChoice {
        label,
        scale: Scale::Factor(factor),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// True when `value` lies on `min + k * step`. A zero step allows any
    /// value.
    pub fn on_step(&self, value: f64) -> bool {
        if self.step <= 0.0 {
            return true;
        }
        let k = (value - self.min) / self.step;
        (k - k.round()).abs() <= 1e-9 * k.abs().max(1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    pub name: &'static str,
    pub kind: SignalKind,
    pub unit_choices: Vec<UnitChoice>,
    pub default_value: f64,
    pub default_unit: Option<usize>,
    pub value_range: Option<ValueRange>,
}

impl SignalDescriptor {
    pub fn unit(&self, label: &str) -> Option<&UnitChoice> {
        self.unit_choices.iter().find(|u| u.label == label)
    }

    /// Unit selected when the signal is first shown: the declared default or
    /// the largest unit.
    pub fn default_unit(&self) -> Option<&UnitChoice> {
        match self.default_unit {
            Some(idx) => self.unit_choices.get(idx),
            None => self.unit_choices.last(),
        }
    }

    pub fn is_digital(&self) -> bool {
        self.kind == SignalKind::Digital
    }
}

/// A general-purpose output and its bit in the device output register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub name: &'static str,
    pub bit: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum EnergyUnits {
    #[default]
    #[serde(rename = "J")]
    Joule,
    #[serde(rename = "Wh")]
    WattHour,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ChargeUnits {
    #[default]
    #[serde(rename = "C")]
    Coulomb,
    #[serde(rename = "Ah")]
    AmpHour,
}

pub const TIME: &str = "time";

/// Read-only registry of every signal and output the trigger may reference.
/// Built once at startup and shared by `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    signals: Vec<SignalDescriptor>,
    outputs: Vec<OutputDescriptor>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(EnergyUnits::default(), ChargeUnits::default())
    }
}

impl Catalog {
    pub fn new(energy: EnergyUnits, charge: ChargeUnits) -> Self {
        const WH: f64 = 3600.0;
        let energy_units = match energy {
            EnergyUnits::Joule => vec![
                unit("nJ", 1e-9),
                unit("µJ", 1e-6),
                unit("mJ", 1e-3),
                unit("J", 1.0),
            ],
            EnergyUnits::WattHour => vec![
                unit("nWh", 1e-9 * WH),
                unit("µWh", 1e-6 * WH),
                unit("mWh", 1e-3 * WH),
                unit("Wh", WH),
            ],
        };
        let charge_units = match charge {
            ChargeUnits::Coulomb => vec![
                unit("nC", 1e-9),
                unit("µC", 1e-6),
                unit("mC", 1e-3),
                unit("C", 1.0),
            ],
            ChargeUnits::AmpHour => vec![
                unit("pAh", 1e-12 * WH),
                unit("nAh", 1e-9 * WH),
                unit("µAh", 1e-6 * WH),
                unit("mAh", 1e-3 * WH),
                unit("Ah", WH),
            ],
        };

        let digital = |name, max| SignalDescriptor {
            name,
            kind: SignalKind::Digital,
            unit_choices: Vec::new(),
            default_value: 1.0,
            default_unit: None,
            value_range: Some(ValueRange {
                min: 0.0,
                max,
                step: 1.0,
            }),
        };

        let signals = vec![
            SignalDescriptor {
                name: TIME,
                kind: SignalKind::Time,
                unit_choices: vec![
                    UnitChoice {
                        label: "samples",
                        scale: Scale::SamplePeriod,
                    },
                    unit("µs", 1e-6),
                    unit("ms", 1e-3),
                    unit("s", 1.0),
                    unit("min", 60.0),
                    unit("h", 3600.0),
                    unit("d", 86400.0),
                ],
                default_value: 0.5,
                default_unit: Some(3),
                value_range: None,
            },
            SignalDescriptor {
                name: "current",
                kind: SignalKind::Continuous,
                unit_choices: vec![
                    unit("nA", 1e-9),
                    unit("µA", 1e-6),
                    unit("mA", 1e-3),
                    unit("A", 1.0),
                ],
                default_value: 1.0,
                default_unit: None,
                value_range: None,
            },
            SignalDescriptor {
                name: "voltage",
                kind: SignalKind::Continuous,
                unit_choices: vec![unit("mV", 1e-3), unit("V", 1.0)],
                default_value: 1.0,
                default_unit: None,
                value_range: None,
            },
            SignalDescriptor {
                name: "power",
                kind: SignalKind::Continuous,
                unit_choices: vec![
                    unit("nW", 1e-9),
                    unit("µW", 1e-6),
                    unit("mW", 1e-3),
                    unit("W", 1.0),
                ],
                default_value: 1.0,
                default_unit: None,
                value_range: None,
            },
            SignalDescriptor {
                name: "energy",
                kind: SignalKind::Accumulating,
                unit_choices: energy_units,
                default_value: 1.0,
                default_unit: Some(3),
                value_range: None,
            },
            SignalDescriptor {
                name: "charge",
                kind: SignalKind::Accumulating,
                unit_choices: charge_units,
                default_value: 1.0,
                default_unit: Some(3),
                value_range: None,
            },
            digital("current_range", 7.0),
            digital("current_lsb", 1.0),
            digital("voltage_lsb", 1.0),
        ];

        let outputs = vec![
            OutputDescriptor { name: "0", bit: 0 },
            OutputDescriptor { name: "1", bit: 1 },
            OutputDescriptor { name: "T", bit: 7 },
        ];

        Self { signals, outputs }
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn signals(&self) -> &[SignalDescriptor] {
        &self.signals
    }

    pub fn output(&self, name: &str) -> Option<&OutputDescriptor> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn outputs(&self) -> &[OutputDescriptor] {
        &self.outputs
    }

    /// Signals usable by an edge condition.
    pub fn edge_signals(&self) -> impl Iterator<Item = &SignalDescriptor> {
        self.signals
            .iter()
            .filter(|s| matches!(s.kind, SignalKind::Continuous | SignalKind::Digital))
    }

    /// Signals usable by a window condition.
    pub fn window_signals(&self) -> impl Iterator<Item = &SignalDescriptor> {
        self.signals
            .iter()
            .filter(|s| s.kind == SignalKind::Accumulating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_lookup() {
        let catalog = Catalog::default();
        assert_eq!(catalog.signal("current").unwrap().kind, SignalKind::Continuous);
        assert!(catalog.signal("current_range").unwrap().is_digital());
        assert!(catalog.signal("gpi[9]").is_none());
        assert_eq!(catalog.output("T").unwrap().bit, 7);
    }

    #[test]
    fn edge_and_window_signal_sets() {
        let catalog = Catalog::default();
        let edge: Vec<_> = catalog.edge_signals().map(|s| s.name).collect();
        assert_eq!(
            edge,
            [
                "current",
                "voltage",
                "power",
                "current_range",
                "current_lsb",
                "voltage_lsb"
            ]
        );
        let window: Vec<_> = catalog.window_signals().map(|s| s.name).collect();
        assert_eq!(window, ["energy", "charge"]);
    }

    #[test]
    fn unit_families() {
        let catalog = Catalog::new(EnergyUnits::WattHour, ChargeUnits::AmpHour);
        let energy = catalog.signal("energy").unwrap();
        assert_eq!(energy.default_unit().unwrap().label, "Wh");
        let charge = catalog.signal("charge").unwrap();
        assert_eq!(charge.default_unit().unwrap().label, "mAh");
        assert!(charge.unit("C").is_none());
    }
}
