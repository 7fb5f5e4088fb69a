use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::event::{SampleBlock, SignalInfo};

/// Something that streams sample blocks.
pub trait SignalSource {
    fn signals(&self) -> Vec<SignalInfo>;

    /// Next block of every signal, all covering the same interval.
    fn next_blocks(&mut self) -> Vec<SampleBlock>;

    /// Time covered by one call to `next_blocks`.
    fn block_duration(&self) -> Duration;
}

/// Shape of the simulated load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waveform {
    pub base_current: f64,
    pub pulse_current: f64,
    pub pulse_period: f64,
    pub pulse_width: f64,
    pub voltage: f64,
    /// Peak uniform noise added to current, amperes.
    pub noise: f64,
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            base_current: 100e-6,
            pulse_current: 0.25,
            pulse_period: 1.0,
            pulse_width: 0.3,
            voltage: 3.3,
            noise: 1e-6,
        }
    }
}

/// Full-scale current of each range, range 0 first.
const CURRENT_RANGES: [f64; 6] = [10.0, 180e-3, 18e-3, 1.8e-3, 180e-6, 18e-6];

fn current_range(current: f64) -> usize {
    let magnitude = current.abs();
    CURRENT_RANGES
        .iter()
        .rposition(|&full_scale| magnitude <= full_scale)
        .unwrap_or(0)
}

/// Pulsed load on a fixed supply: current, voltage, power, their integrals
/// and the auto-ranging current range.
pub struct SimulatedSource {
    sampling_frequency: f64,
    block_size: usize,
    waveform: Waveform,
    rng: StdRng,
    sample_id: u64,
    energy: f64,
    charge: f64,
}

impl SimulatedSource {
    pub const SIGNALS: [(&'static str, &'static str); 6] = [
        ("current", "A"),
        ("voltage", "V"),
        ("power", "W"),
        ("energy", "J"),
        ("charge", "C"),
        ("current_range", ""),
    ];

    pub fn new(sampling_frequency: f64, block_size: usize, waveform: Waveform, seed: u64) -> Self {
        Self {
            sampling_frequency,
            block_size: block_size.max(1),
            waveform,
            rng: StdRng::seed_from_u64(seed),
            sample_id: 0,
            energy: 0.0,
            charge: 0.0,
        }
    }

    fn current_at(&mut self, t: f64) -> f64 {
        let w = &self.waveform;
        let phase = if w.pulse_period > 0.0 {
            t % w.pulse_period
        } else {
            f64::INFINITY
        };
        let level = if phase < w.pulse_width {
            w.pulse_current
        } else {
            w.base_current
        };
        let noise = w.noise;
        if noise > 0.0 {
            level + self.rng.random_range(-noise..noise)
        } else {
            level
        }
    }
}

impl SignalSource for SimulatedSource {
    fn signals(&self) -> Vec<SignalInfo> {
        Self::SIGNALS
            .iter()
            .map(|&(name, units)| SignalInfo {
                name: name.to_string(),
                units: units.to_string(),
                dtype: if name == "current_range" { "u8" } else { "f64" },
                sample_rate: self.sampling_frequency,
            })
            .collect()
    }

    fn next_blocks(&mut self) -> Vec<SampleBlock> {
        let n = self.block_size;
        let period = 1.0 / self.sampling_frequency;
        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); Self::SIGNALS.len()];

        for k in 0..n {
            let t = (self.sample_id + k as u64) as f64 * period;
            let i = self.current_at(t);
            let v = self.waveform.voltage;
            let p = i * v;
            self.energy += p * period;
            self.charge += i * period;
            let row = [i, v, p, self.energy, self.charge, current_range(i) as f64];
            for (column, value) in columns.iter_mut().zip(row) {
                column.push(value);
            }
        }

        let blocks = Self::SIGNALS
            .iter()
            .zip(columns)
            .map(|(&(name, _), values)| SampleBlock {
                signal: name.to_string(),
                sample_id: self.sample_id,
                sample_rate: self.sampling_frequency,
                timestamp: self.sample_id as f64 * period,
                values,
            })
            .collect();
        self.sample_id += n as u64;
        blocks
    }

    fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sampling_frequency)
    }
}

/// Run `source` on its own thread until `shutdown` is set or the receiver
/// goes away. With `realtime`, blocks are paced at the source rate.
pub fn spawn_source<S>(
    mut source: S,
    tx: Sender<SampleBlock>,
    shutdown: Arc<AtomicBool>,
    realtime: bool,
) -> JoinHandle<()>
where
    S: SignalSource + Send + 'static,
{
    thread::spawn(move || {
        let names: Vec<_> = source.signals().into_iter().map(|s| s.name).collect();
        info!("Streaming {}", names.join(", "));
        let pace = source.block_duration();
        'outer: while !shutdown.load(Ordering::SeqCst) {
            for block in source.next_blocks() {
                if tx.send(block).is_err() {
                    debug!("sample receiver closed");
                    break 'outer;
                }
            }
            if realtime {
                thread::sleep(pace);
            }
        }
    })
}
