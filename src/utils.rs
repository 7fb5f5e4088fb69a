use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Result;

/// Sample throughput with an all-time total and a sliding 1 s window rate.
#[derive(Debug, Clone)]
pub struct RateCounter {
    /// All-time number of samples
    pub total: u64,
    /// All-time number of blocks
    pub blocks: u64,

    window: Duration,
    arrivals: VecDeque<(Instant, u64)>,
    in_window: u64,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl RateCounter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_window(window: Duration) -> Self {
        RateCounter {
            total: 0,
            blocks: 0,
            window,
            arrivals: VecDeque::new(),
            in_window: 0,
        }
    }

    /// Samples per second over the sliding window.
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        self.in_window as f64 / secs
    }

    pub fn increment(&mut self, samples: u64) {
        self.increment_at(Instant::now(), samples);
    }

    fn increment_at(&mut self, now: Instant, samples: u64) {
        self.total += samples;
        self.blocks += 1;

        self.arrivals.push_back((now, samples));
        self.in_window += samples;

        while let Some(&(ts, n)) = self.arrivals.front() {
            if now.duration_since(ts) > self.window {
                self.arrivals.pop_front();
                self.in_window -= n;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.blocks = 0;
        self.arrivals.clear();
        self.in_window = 0;
    }
}

/// Next free `<prefix><N>.<ext>` in `dir`, one past the highest existing
/// number. Creates `dir` if needed.
pub fn next_numbered_path(dir: &Path, prefix: &str, ext: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let max = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let stem = name.to_str()?.strip_suffix(ext)?.strip_suffix('.')?;
            stem.strip_prefix(prefix)?.parse::<usize>().ok()
        })
        .max();
    let n = max.map_or(0, |m| m + 1);
    Ok(dir.join(format!("{prefix}{n}.{ext}")))
}
