use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use ndarray::{s, Array2};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::actions::{CaptureTarget, Marker, Recorder};
use crate::error::{ActuatorFailure, ActuatorResult};
use crate::event::Sample;
use crate::utils::next_numbered_path;

/// Samples held in memory by one RAM capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RamCapture {
    pub start: f64,
    pub end: Option<f64>,
    pub samples: Vec<(String, Sample)>,
    /// Set when samples were dropped at the capacity limit.
    pub truncated: bool,
}

/// CSV capture file fed through a fixed-size row buffer.
///
/// Rows are `timestamp, signal index, value`; the buffer is written out when
/// it fills, on markers and on close.
pub struct CaptureFile {
    pub path: PathBuf,
    out: BufWriter<File>,
    signals: Vec<String>,
    buffer: Array2<f64>,
    buffer_capacity: usize,
    buffer_count: usize,
    pub rows_written: usize,
}

impl CaptureFile {
    pub fn create(path: &Path, trigger_time: f64, buffer_capacity: usize) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        let now = OffsetDateTime::now_utc().format(&Rfc3339)?;
        writeln!(out, "# capture started {now}")?;
        writeln!(out, "# trigger at {trigger_time:.9} s")?;
        writeln!(out, "timestamp,signal,value")?;
        let buffer_capacity = buffer_capacity.max(1);
        Ok(Self {
            path: path.to_path_buf(),
            out,
            signals: Vec::new(),
            buffer: Array2::<f64>::zeros((buffer_capacity, 3)),
            buffer_capacity,
            buffer_count: 0,
            rows_written: 0,
        })
    }

    fn signal_index(&mut self, signal: &str) -> usize {
        match self.signals.iter().position(|s| s == signal) {
            Some(idx) => idx,
            None => {
                self.signals.push(signal.to_string());
                self.signals.len() - 1
            }
        }
    }

    pub fn append(&mut self, signal: &str, sample: &Sample) -> Result<()> {
        let idx = self.signal_index(signal);
        let row = [sample.timestamp, idx as f64, sample.value];
        self.buffer
            .slice_mut(s![self.buffer_count, ..])
            .assign(&ndarray::ArrayView1::from(&row));
        self.buffer_count += 1;

        if self.buffer_count == self.buffer_capacity {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for row in self.buffer.slice(s![0..self.buffer_count, ..]).rows() {
            let signal = &self.signals[row[1] as usize];
            writeln!(self.out, "{:.9},{signal},{}", row[0], row[2])?;
        }
        self.rows_written += self.buffer_count;
        self.buffer_count = 0;
        self.out.flush()?;
        Ok(())
    }

    pub fn marker(&mut self, marker: Marker) -> Result<()> {
        self.flush()?;
        match marker {
            Marker::Single(t) => writeln!(self.out, "# marker {t:.9}")?,
            Marker::Dual(t0, t1) => writeln!(self.out, "# markers {t0:.9} {t1:.9}")?,
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<PathBuf> {
        self.flush()?;
        info!(
            "Closed {} after {} samples",
            self.path.display(),
            self.rows_written
        );
        Ok(self.path)
    }
}

/// Recorder that keeps pre-roll in a ring buffer, captures to RAM and
/// records to numbered CSV files.
pub struct CaptureRecorder {
    output_dir: PathBuf,
    buffer_capacity: usize,
    ram_capacity: usize,
    pre_roll: Option<f64>,
    history: VecDeque<(String, Sample)>,
    ram: Option<RamCapture>,
    ram_stop_at: Option<f64>,
    file: Option<CaptureFile>,
    file_stop_at: Option<f64>,
    last_capture: Option<RamCapture>,
    markers: Vec<Marker>,
    files: Vec<PathBuf>,
}

impl CaptureRecorder {
    pub fn new<P: AsRef<Path>>(output_dir: P, buffer_capacity: usize, ram_capacity: usize) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            buffer_capacity,
            ram_capacity,
            pre_roll: None,
            history: VecDeque::new(),
            ram: None,
            ram_stop_at: None,
            file: None,
            file_stop_at: None,
            last_capture: None,
            markers: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.ram.is_some() || self.file.is_some()
    }

    pub fn buffered(&self) -> usize {
        self.history.len()
    }

    /// Most recent completed RAM capture.
    pub fn last_capture(&self) -> Option<&RamCapture> {
        self.last_capture.as_ref()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Files closed so far.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn pre_roll_since(&self, t: f64) -> impl Iterator<Item = &(String, Sample)> {
        self.history.iter().filter(move |(_, s)| s.timestamp >= t)
    }

    fn finish_ram(&mut self, end: f64) {
        if let Some(mut capture) = self.ram.take() {
            capture.end = Some(end);
            info!(
                "RAM capture complete: {} samples from {:.6} s",
                capture.samples.len(),
                capture.start
            );
            self.last_capture = Some(capture);
        }
        self.ram_stop_at = None;
    }

    fn finish_file(&mut self) -> Result<()> {
        self.file_stop_at = None;
        if let Some(file) = self.file.take() {
            let path = file.close()?;
            self.files.push(path);
        }
        Ok(())
    }

    fn open_file(&mut self, timestamp: f64, pre_roll: f64) -> Result<()> {
        let path = next_numbered_path(&self.output_dir, "capture", "csv")?;
        let mut file = CaptureFile::create(&path, timestamp, self.buffer_capacity)?;
        for (signal, sample) in self.pre_roll_since(timestamp - pre_roll) {
            file.append(signal, sample)?;
        }
        info!("Recording to {}", path.display());
        self.file = Some(file);
        Ok(())
    }

    /// Close any open capture and flush the file. Called on shutdown.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(capture) = &self.ram {
            let end = capture
                .samples
                .last()
                .map_or(capture.start, |(_, s)| s.timestamp);
            self.finish_ram(end);
        }
        self.finish_file()
    }
}

fn recorder_error(e: anyhow::Error) -> ActuatorFailure {
    ActuatorFailure::Recorder(e.to_string())
}

impl Recorder for CaptureRecorder {
    fn arm_buffer(&mut self, duration: f64) -> ActuatorResult<()> {
        self.pre_roll = Some(duration);
        self.history.clear();
        Ok(())
    }

    fn release_buffer(&mut self) -> ActuatorResult<()> {
        self.pre_roll = None;
        self.history.clear();
        Ok(())
    }

    fn start(&mut self, target: CaptureTarget, timestamp: f64, pre_roll: f64) -> ActuatorResult<()> {
        match target {
            CaptureTarget::Ram => {
                if self.ram.is_some() {
                    self.finish_ram(timestamp);
                }
                let samples: Vec<_> = self
                    .pre_roll_since(timestamp - pre_roll)
                    .take(self.ram_capacity)
                    .cloned()
                    .collect();
                self.ram = Some(RamCapture {
                    start: timestamp,
                    end: None,
                    samples,
                    truncated: false,
                });
                Ok(())
            }
            CaptureTarget::File => {
                self.finish_file().map_err(recorder_error)?;
                self.open_file(timestamp, pre_roll).map_err(recorder_error)
            }
        }
    }

    fn stop(&mut self, target: CaptureTarget, timestamp: f64, post_roll: f64) -> ActuatorResult<()> {
        let stop_at = timestamp + post_roll.max(0.0);
        match target {
            CaptureTarget::Ram if post_roll > 0.0 => self.ram_stop_at = Some(stop_at),
            CaptureTarget::Ram => self.finish_ram(timestamp),
            CaptureTarget::File if post_roll > 0.0 => self.file_stop_at = Some(stop_at),
            CaptureTarget::File => self.finish_file().map_err(recorder_error)?,
        }
        Ok(())
    }

    fn marker(&mut self, marker: Marker) -> ActuatorResult<()> {
        self.markers.push(marker);
        if let Some(file) = &mut self.file {
            file.marker(marker).map_err(recorder_error)?;
        }
        Ok(())
    }

    fn ingest(&mut self, signal: &str, sample: &Sample) {
        let t = sample.timestamp;

        if let Some(duration) = self.pre_roll {
            self.history.push_back((signal.to_string(), *sample));
            while let Some((_, oldest)) = self.history.front() {
                if oldest.timestamp < t - duration {
                    self.history.pop_front();
                } else {
                    break;
                }
            }
        }

        if let Some(capture) = &mut self.ram {
            if self.ram_stop_at.map_or(true, |stop| t <= stop) {
                if capture.samples.len() < self.ram_capacity {
                    capture.samples.push((signal.to_string(), *sample));
                } else if !capture.truncated {
                    warn!("RAM capture full at {} samples", self.ram_capacity);
                    capture.truncated = true;
                }
            }
        }
        if let Some(stop) = self.ram_stop_at {
            if t >= stop {
                self.finish_ram(stop);
            }
        }

        if let Some(file) = &mut self.file {
            if self.file_stop_at.map_or(true, |stop| t <= stop) {
                if let Err(e) = file.append(signal, sample) {
                    warn!("Recording to {} failed: {e}", file.path.display());
                    self.file = None;
                    self.file_stop_at = None;
                }
            }
        }
        if let Some(stop) = self.file_stop_at {
            if t >= stop {
                if let Err(e) = self.finish_file() {
                    warn!("Closing capture file failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample(k: u64) -> Sample {
        Sample {
            sample_id: k,
            timestamp: k as f64 / 100.0,
            value: k as f64,
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("jstrigger-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn ram_capture_with_pre_and_post_roll() {
        let mut rec = CaptureRecorder::new(temp_dir("ram"), 16, 1000);
        rec.arm_buffer(0.055).unwrap();
        for k in 0..=100 {
            rec.ingest("current", &sample(k));
        }
        // ring keeps [0.95, 1.00]
        assert_eq!(rec.buffered(), 6);

        rec.start(CaptureTarget::Ram, 1.0, 0.025).unwrap();
        rec.release_buffer().unwrap();
        for k in 101..=150 {
            rec.ingest("current", &sample(k));
        }
        rec.stop(CaptureTarget::Ram, 1.5, 0.105).unwrap();
        assert!(rec.is_capturing());
        for k in 151..=170 {
            rec.ingest("current", &sample(k));
        }
        assert!(!rec.is_capturing());

        let capture = rec.last_capture().unwrap();
        assert_eq!(capture.samples.first().unwrap().1.sample_id, 98);
        assert_eq!(capture.samples.last().unwrap().1.sample_id, 160);
        assert!((capture.end.unwrap() - 1.605).abs() < 1e-9);
        assert!(!capture.truncated);
        assert_eq!(rec.buffered(), 0);
    }

    #[test]
    fn ram_capture_is_capped() {
        let mut rec = CaptureRecorder::new(temp_dir("cap"), 16, 10);
        rec.start(CaptureTarget::Ram, 0.0, 0.0).unwrap();
        for k in 0..50 {
            rec.ingest("current", &sample(k));
        }
        rec.stop(CaptureTarget::Ram, 0.5, 0.0).unwrap();
        let capture = rec.last_capture().unwrap();
        assert_eq!(capture.samples.len(), 10);
        assert!(capture.truncated);
    }

    #[test]
    fn file_recording_writes_numbered_csv() {
        let dir = temp_dir("file");
        let mut rec = CaptureRecorder::new(&dir, 4, 100);
        rec.arm_buffer(0.01).unwrap();
        rec.ingest("current", &sample(0));
        rec.ingest("voltage", &sample(1));

        rec.start(CaptureTarget::File, 0.01, 0.01).unwrap();
        for k in 2..12 {
            rec.ingest(if k % 2 == 0 { "current" } else { "voltage" }, &sample(k));
        }
        rec.marker(Marker::Single(0.11)).unwrap();
        rec.stop(CaptureTarget::File, 0.11, 0.0).unwrap();
        assert_eq!(rec.files(), [dir.join("capture0.csv")]);

        let text = fs::read_to_string(dir.join("capture0.csv")).unwrap();
        let rows: Vec<_> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows[0], "timestamp,signal,value");
        assert_eq!(rows.len(), 1 + 12);
        assert_eq!(rows[1], "0.000000000,current,0");
        assert_eq!(rows[2], "0.010000000,voltage,1");
        assert!(text.contains("# marker 0.110000000"));

        // second recording gets the next number
        rec.start(CaptureTarget::File, 0.2, 0.0).unwrap();
        rec.finish().unwrap();
        assert_eq!(rec.files().last(), Some(&dir.join("capture1.csv")));
        fs::remove_dir_all(&dir).unwrap();
    }
}
