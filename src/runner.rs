use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::bus::{Message, RetainedBus, SubscribeFlags};
use crate::config::Conf;
use crate::event::SampleBlock;
use crate::gpo::GpoBank;
use crate::machine::{Command, RunMode, Status, TriggerMachine, TriggerStats};
use crate::sequence::TriggerSequence;
use crate::signals::Catalog;
use crate::utils::RateCounter;
use crate::writer::CaptureRecorder;

pub type Machine = TriggerMachine<CaptureRecorder, GpoBank<RetainedBus>, RetainedBus>;

const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(100);

/// What the status panel shows, sent from the trigger thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub status: Status,
    pub run_mode: RunMode,
    pub stats: TriggerStats,
    pub sample_rate: f64,
    pub clock: Option<f64>,
    pub gpo_mask: u8,
    pub buffered: usize,
    pub captures: usize,
    pub last_event: Option<String>,
}

/// Owns the trigger machine and its devices. Configuration and run-mode
/// changes published on the bus are picked up by `apply_bus_updates`.
pub struct Runner {
    machine: Machine,
    settings_rx: Receiver<Message>,
    rate: RateCounter,
    last_event: Option<String>,
}

impl Runner {
    pub fn new(conf: &Conf, bus: RetainedBus) -> Result<Self> {
        let catalog = Arc::new(Catalog::new(conf.units.energy, conf.units.charge));
        let recorder = CaptureRecorder::new(
            &conf.recording.output_dir,
            conf.recording.buffer_capacity,
            conf.recording.ram_capacity,
        );
        let gpo = GpoBank::new(Arc::clone(&catalog), &conf.trigger.device, bus.clone());
        let mut machine = TriggerMachine::new(
            catalog,
            &conf.trigger.topic,
            recorder,
            gpo,
            bus.clone(),
        );
        machine.set_run_mode(conf.trigger.run_mode);
        machine.set_sampling_frequency(conf.source.sampling_frequency);
        if let Some(path) = &conf.trigger.sequence_file {
            load_sequence(&mut machine, path)?;
        }

        let settings_rx = bus.subscribe(
            &format!("{}/settings", conf.trigger.topic.trim_end_matches('/')),
            SubscribeFlags::PUB_RETAIN,
        );
        let mut runner = Self {
            machine,
            settings_rx,
            rate: RateCounter::new(),
            last_event: None,
        };
        runner.apply_bus_updates();
        Ok(runner)
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn command(&mut self, cmd: Command) {
        if let Err(e) = self.machine.on_command(cmd) {
            warn!("Command failed: {e}");
        }
        self.collect_events();
    }

    /// Apply configuration and run-mode values published by other clients.
    pub fn apply_bus_updates(&mut self) {
        let config_topic = self.machine.config_topic();
        let mode_topic = self.machine.mode_topic();
        while let Ok((topic, value)) = self.settings_rx.try_recv() {
            if topic == config_topic {
                let seq = TriggerSequence::from_value(&value);
                // rejection is already journaled by the machine
                let _ = self.machine.set_config(seq);
            } else if topic == mode_topic {
                match value.as_str().map(str::parse::<RunMode>) {
                    Some(Ok(mode)) => self.machine.set_run_mode(mode),
                    _ => warn!("Ignoring run mode {value}"),
                }
            }
        }
        self.collect_events();
    }

    pub fn on_block(&mut self, block: &SampleBlock) {
        // signals arrive together, count each instant once
        if block.signal == "current" {
            self.rate.increment(block.len() as u64);
        }
        self.machine.on_block(block);
        self.collect_events();
    }

    pub fn snapshot(&self) -> Snapshot {
        let recorder = self.machine.recorder();
        Snapshot {
            status: self.machine.status(),
            run_mode: self.machine.run_mode(),
            stats: self.machine.stats(),
            sample_rate: self.rate.rate(),
            clock: self.machine.clock(),
            gpo_mask: self.machine.gpio().mask(),
            buffered: recorder.buffered(),
            captures: recorder.files().len() + usize::from(recorder.last_capture().is_some()),
            last_event: self.last_event.clone(),
        }
    }

    /// Halt a running trigger and close open captures.
    pub fn finish(mut self) -> Result<TriggerStats> {
        self.machine.on_command(Command::Halt)?;
        self.machine.recorder_mut().finish()?;
        for path in self.machine.recorder().files() {
            info!("Wrote {}", path.display());
        }
        Ok(self.machine.stats())
    }

    fn collect_events(&mut self) {
        if let Some(event) = self.machine.drain_events().pop() {
            self.last_event = Some(event.to_string());
        }
    }
}

fn load_sequence(machine: &mut Machine, path: &Path) -> Result<()> {
    let seq = TriggerSequence::load(path)?;
    machine.set_config(seq)?;
    Ok(())
}

/// Run the trigger on its own thread until `shutdown` is set or the sample
/// source disconnects.
pub fn spawn_runner(
    mut runner: Runner,
    rx_blocks: Receiver<SampleBlock>,
    rx_commands: Receiver<Command>,
    tx_snapshots: Sender<Snapshot>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<Result<TriggerStats>> {
    thread::spawn(move || {
        let mut last_snapshot = Instant::now();
        loop {
            while let Ok(cmd) = rx_commands.try_recv() {
                debug!("command {cmd:?}");
                runner.command(cmd);
            }
            runner.apply_bus_updates();

            match rx_blocks.recv_timeout(Duration::from_millis(100)) {
                Ok(block) => runner.on_block(&block),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Sample source disconnected");
                    break;
                }
            }

            if last_snapshot.elapsed() >= SNAPSHOT_INTERVAL {
                last_snapshot = Instant::now();
                // the panel may already be gone during shutdown
                let _ = tx_snapshots.send(runner.snapshot());
            }
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
        }
        runner.finish()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SettingsBus;
    use crate::condition::{Condition, ConditionKind, EdgeCondition, Operation, Threshold};
    use crate::source::{SignalSource, SimulatedSource, Waveform};
    use confique::Config;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    fn conf(tag: &str) -> Conf {
        let mut conf = Conf::builder().load().unwrap();
        conf.source.sampling_frequency = 1000.0;
        conf.recording.output_dir =
            std::env::temp_dir().join(format!("jstrigger-runner-{tag}-{}", std::process::id()));
        conf
    }

    fn source() -> SimulatedSource {
        let waveform = Waveform {
            noise: 0.0,
            ..Waveform::default()
        };
        SimulatedSource::new(1000.0, 100, waveform, 1)
    }

    #[test]
    fn single_run_with_default_sequence() {
        let conf = conf("single");
        let mut runner = Runner::new(&conf, RetainedBus::new()).unwrap();
        let mut src = source();
        runner.command(Command::Arm);
        assert_eq!(runner.snapshot().status, Status::Searching);
        for _ in 0..20 {
            for block in src.next_blocks() {
                runner.on_block(&block);
            }
        }
        let snap = runner.snapshot();
        assert_eq!(snap.status, Status::Inactive);
        assert_eq!(snap.stats.start_matches, 1);
        assert_eq!(snap.stats.stop_matches, 1);
        assert!(snap.last_event.unwrap().starts_with("stop at"));
        let stats = runner.finish().unwrap();
        assert_eq!(stats.arms, 1);
    }

    #[test]
    fn bus_updates_reach_machine() {
        let conf = conf("bus");
        let bus = RetainedBus::new();
        let mut runner = Runner::new(&conf, bus.clone()).unwrap();

        let mut seq = TriggerSequence::default();
        *seq.start.select(ConditionKind::Edge) =
            Condition::Edge(EdgeCondition {
                threshold: Threshold::new("current", Operation::Greater, 0.1),
                ..EdgeCondition::default()
            });
        bus.publish(&runner.machine().config_topic(), seq.to_value());
        bus.publish(&runner.machine().mode_topic(), json!("continuous"));
        runner.apply_bus_updates();
        assert_eq!(runner.machine().get_config(), &seq);
        assert_eq!(runner.machine().run_mode(), RunMode::Continuous);

        bus.publish(
            &runner.machine().config_topic(),
            json!({"start": {"edge": {"threshold": {"signal": "nope"}}}}),
        );
        runner.apply_bus_updates();
        assert_eq!(runner.machine().get_config(), &seq);
        assert!(runner
            .snapshot()
            .last_event
            .unwrap()
            .starts_with("configuration rejected"));
    }

    #[test]
    fn worker_runs_until_source_closes() {
        let conf = conf("worker");
        let runner = Runner::new(&conf, RetainedBus::new()).unwrap();
        let (tx_blocks, rx_blocks) = unbounded();
        let (tx_cmd, rx_cmd) = unbounded();
        let (tx_snap, _rx_snap) = unbounded();
        tx_cmd.send(Command::Arm).unwrap();
        let mut src = source();
        for _ in 0..3 {
            for block in src.next_blocks() {
                tx_blocks.send(block).unwrap();
            }
        }
        drop(tx_blocks);
        let handle = spawn_runner(
            runner,
            rx_blocks,
            rx_cmd,
            tx_snap,
            Arc::new(AtomicBool::new(false)),
        );
        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats.arms, 1);
        assert_eq!(stats.start_matches, 1);
        assert_eq!(stats.halts, 1);
        assert_eq!(stats.samples, 3 * 100 * SimulatedSource::SIGNALS.len() as u64);
        let _ = std::fs::remove_dir_all(&conf.recording.output_dir);
    }
}
