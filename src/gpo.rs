use std::sync::Arc;

use log::debug;
use serde_json::json;

use crate::actions::Gpio;
use crate::bus::SettingsBus;
use crate::error::{ActuatorFailure, ActuatorResult};
use crate::signals::Catalog;

/// General-purpose output register. Each catalog output maps to one bit;
/// every change is published as `<device>/settings/out/<channel>`.
pub struct GpoBank<B> {
    catalog: Arc<Catalog>,
    device: String,
    bus: B,
    mask: u8,
}

impl<B: SettingsBus> GpoBank<B> {
    pub fn new(catalog: Arc<Catalog>, device: &str, bus: B) -> Self {
        Self {
            catalog,
            device: device.trim_end_matches('/').to_string(),
            bus,
            mask: 0,
        }
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn level(&self, channel: &str) -> Option<u8> {
        self.catalog
            .output(channel)
            .map(|o| (self.mask >> o.bit) & 1)
    }
}

impl<B: SettingsBus> Gpio for GpoBank<B> {
    fn set(&mut self, channel: &str, value: u8) -> ActuatorResult<()> {
        let output = self
            .catalog
            .output(channel)
            .ok_or_else(|| ActuatorFailure::Output {
                channel: channel.to_string(),
                reason: "no such output".to_string(),
            })?;
        let bit = 1u8 << output.bit;
        match value {
            0 => self.mask &= !bit,
            1 => self.mask |= bit,
            _ => {
                return Err(ActuatorFailure::Output {
                    channel: channel.to_string(),
                    reason: format!("invalid level {value}"),
                })
            }
        }
        debug!("gpo {channel} = {value}, mask 0x{:02x}", self.mask);
        self.bus.publish(
            &format!("{}/settings/out/{channel}", self.device),
            json!(value),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RetainedBus;

    #[test]
    fn outputs_map_to_register_bits() {
        let bus = RetainedBus::new();
        let mut gpo = GpoBank::new(Arc::new(Catalog::default()), "js220/001", bus.clone());
        gpo.set("T", 1).unwrap();
        gpo.set("1", 1).unwrap();
        assert_eq!(gpo.mask(), 0b1000_0010);
        gpo.set("1", 0).unwrap();
        assert_eq!(gpo.mask(), 0b1000_0000);
        assert_eq!(gpo.level("T"), Some(1));
        assert_eq!(gpo.level("0"), Some(0));
        assert_eq!(bus.query("js220/001/settings/out/1"), Some(json!(0)));
    }

    #[test]
    fn rejects_unknown_output_and_level() {
        let mut gpo = GpoBank::new(Arc::new(Catalog::default()), "dev", RetainedBus::new());
        assert!(matches!(gpo.set("5", 1), Err(ActuatorFailure::Output { .. })));
        assert!(gpo.set("0", 2).is_err());
        assert_eq!(gpo.mask(), 0);
    }
}
