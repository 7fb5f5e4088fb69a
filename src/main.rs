use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::Parser;
use confique::Config;
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError};
use jstrigger::config::Conf;
use jstrigger::machine::{Command, RunMode, Status};
use jstrigger::runner::{spawn_runner, Runner, Snapshot};
use jstrigger::sequence::TriggerSequence;
use jstrigger::source::{spawn_source, SimulatedSource};
use jstrigger::tui::StatusPanel;
use jstrigger::RetainedBus;
use log::{info, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, Config as LogConfig, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Sample blocks per signal queued between source and trigger.
const BLOCK_QUEUE: usize = 64;

#[derive(Parser, Debug)]
#[command(version, about = "Start/stop trigger engine for a JS220 sample stream")]
struct Args {
    /// TOML configuration file; missing files fall back to defaults
    #[arg(short, long, default_value = "jstrigger.toml")]
    config: PathBuf,

    /// Trigger sequence JSON, overrides `trigger.sequence_file`
    #[arg(short, long)]
    sequence: Option<PathBuf>,

    /// Log to the terminal instead of showing the status panel
    #[arg(long)]
    headless: bool,

    /// Arm the trigger on startup
    #[arg(long)]
    arm: bool,

    /// Re-arm after every stop
    #[arg(long)]
    continuous: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Write the default trigger sequence to this path and exit
    #[arg(long)]
    write_default: Option<PathBuf>,
}

fn init_logging(conf: &Conf, headless: bool) -> Result<()> {
    let level = LevelFilter::from(conf.log.level);
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![WriteLogger::new(
        level,
        LogConfig::default(),
        File::create(&conf.log.file)?,
    )];
    if headless {
        loggers.push(TermLogger::new(
            level,
            LogConfig::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

/// Follow snapshots until the time limit or, for an armed single run, until
/// the stop condition has fired.
fn run_headless(
    rx_snapshots: &crossbeam_channel::Receiver<Snapshot>,
    limit: Option<Duration>,
    until_stop: bool,
) {
    let t_begin = Instant::now();
    let mut reported = None;
    loop {
        match rx_snapshots.recv_timeout(Duration::from_millis(500)) {
            Ok(snapshot) => {
                if reported.as_ref() != snapshot.last_event.as_ref() {
                    reported = snapshot.last_event.clone();
                    info!(
                        "{} ({} mode), {:.0} S/s",
                        snapshot.status, snapshot.run_mode, snapshot.sample_rate
                    );
                }
                if until_stop
                    && snapshot.run_mode == RunMode::Single
                    && snapshot.status == Status::Inactive
                    && snapshot.stats.stop_matches > 0
                {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if limit.is_some_and(|d| t_begin.elapsed() >= d) {
            break;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_default {
        TriggerSequence::default().save(path)?;
        println!("Wrote default trigger sequence to {}", path.display());
        return Ok(());
    }

    let mut conf = Conf::builder().file(&args.config).load()?;
    if let Some(path) = &args.sequence {
        conf.trigger.sequence_file = Some(path.clone());
    }
    if args.continuous {
        conf.trigger.run_mode = RunMode::Continuous;
    }
    let limit = args.duration.map(Duration::try_from_secs_f64).transpose()?;

    init_logging(&conf, args.headless)?;
    info!("Configuration loaded from {}", args.config.display());

    let bus = RetainedBus::new();
    let runner = Runner::new(&conf, bus.clone())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    // the source blocks when the trigger falls behind
    let (tx_blocks, rx_blocks) = bounded(BLOCK_QUEUE * SimulatedSource::SIGNALS.len());
    let (tx_commands, rx_commands) = unbounded();
    let (tx_snapshots, rx_snapshots) = unbounded();

    let source = SimulatedSource::new(
        conf.source.sampling_frequency,
        conf.source.block_size,
        conf.source.waveform(),
        conf.source.seed,
    );
    let source_handle = spawn_source(
        source,
        tx_blocks,
        Arc::clone(&shutdown),
        conf.source.realtime,
    );
    if args.arm {
        tx_commands.send(Command::Arm)?;
    }
    let runner_handle = spawn_runner(
        runner,
        rx_blocks,
        rx_commands,
        tx_snapshots,
        Arc::clone(&shutdown),
    );

    if args.headless {
        run_headless(&rx_snapshots, limit, args.arm);
    } else {
        let mut panel = StatusPanel::new(&conf.trigger.topic, tx_commands.clone(), limit);
        let mut terminal = ratatui::init();
        let result = panel.run(&mut terminal, &rx_snapshots);
        ratatui::restore();
        result?;
    }

    shutdown.store(true, Ordering::SeqCst);
    source_handle
        .join()
        .map_err(|_| anyhow!("sample source thread panicked"))?;
    let stats = runner_handle
        .join()
        .map_err(|_| anyhow!("trigger thread panicked"))??;
    info!(
        "{} samples, {} arms, {} starts, {} stops, {} halts, {} anomalies",
        stats.samples, stats.arms, stats.start_matches, stats.stop_matches, stats.halts,
        stats.anomalies
    );
    Ok(())
}
