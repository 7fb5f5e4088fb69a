use crate::error::UnitError;
use crate::signals::{Catalog, Scale, SignalDescriptor, UnitChoice};

/// Resolve a unit scale to a number. `None` for the sample-period unit when
/// no sampling frequency is known.
pub fn resolve_scale(scale: Scale, sampling_frequency: Option<f64>) -> Option<f64> {
    match scale {
        Scale::Factor(k) => Some(k),
        Scale::SamplePeriod => sampling_frequency
            .filter(|fs| fs.is_finite() && *fs > 0.0)
            .map(|fs| 1.0 / fs),
    }
}

/// Pick the largest unit whose scale does not exceed the magnitude of
/// `base_value`, or the smallest unit when the value is below all of them.
///
/// Returns `None` when no unit can be resolved (unitless signal, or only a
/// sample-period unit without a sampling frequency).
pub fn to_display(
    base_value: f64,
    units: &[UnitChoice],
    sampling_frequency: Option<f64>,
) -> Option<(f64, &'static str)> {
    let magnitude = base_value.abs();
    let mut best: Option<(f64, &'static str)> = None;
    let mut smallest: Option<(f64, &'static str)> = None;

    // descending search: later entries win ties
    for u in units.iter().rev() {
        let Some(k) = resolve_scale(u.scale, sampling_frequency) else {
            continue;
        };
        if k <= magnitude && best.map_or(true, |(b, _)| k > b) {
            best = Some((k, u.label));
        }
        if smallest.map_or(true, |(s, _)| k < s) {
            smallest = Some((k, u.label));
        }
    }

    best.or(smallest).map(|(k, label)| (base_value / k, label))
}

/// Converts between stored base-unit values and operator-facing display
/// values for the signals of one catalog.
#[derive(Debug, Clone, Copy)]
pub struct UnitResolver<'a> {
    catalog: &'a Catalog,
    sampling_frequency: Option<f64>,
}

impl<'a> UnitResolver<'a> {
    pub fn new(catalog: &'a Catalog, sampling_frequency: Option<f64>) -> Self {
        Self {
            catalog,
            sampling_frequency,
        }
    }

    pub fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    fn descriptor(&self, signal: &str) -> Result<&'a SignalDescriptor, UnitError> {
        self.catalog
            .signal(signal)
            .ok_or_else(|| UnitError::UnknownSignal(signal.to_string()))
    }

    /// Scale a display value in `unit_label` to base units. Unitless signals
    /// accept an empty label.
    pub fn to_base(
        &self,
        display_value: f64,
        unit_label: &str,
        signal: &str,
    ) -> Result<f64, UnitError> {
        let desc = self.descriptor(signal)?;
        if desc.unit_choices.is_empty() && unit_label.is_empty() {
            return Ok(display_value);
        }
        let unit = desc.unit(unit_label).ok_or_else(|| UnitError::InvalidUnit {
            signal: signal.to_string(),
            unit: unit_label.to_string(),
        })?;
        let k = resolve_scale(unit.scale, self.sampling_frequency)
            .ok_or_else(|| UnitError::MissingSamplingFrequency(unit_label.to_string()))?;
        Ok(display_value * k)
    }

    pub fn to_display(&self, base_value: f64, signal: &str) -> Result<(f64, &'static str), UnitError> {
        let desc = self.descriptor(signal)?;
        Ok(to_display(base_value, &desc.unit_choices, self.sampling_frequency).unwrap_or((base_value, "")))
    }

    /// Human-readable value such as `10 µA`, used in log lines.
    pub fn format(&self, base_value: f64, signal: &str) -> String {
        match self.to_display(base_value, signal) {
            Ok((v, "")) => format!("{v}"),
            Ok((v, unit)) => {
                let v = format!("{v:.4}");
                format!("{} {unit}", v.trim_end_matches('0').trim_end_matches('.'))
            }
            Err(_) => format!("{base_value}"),
        }
    }
}
