/// One reading of one signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub sample_id: u64,
    /// Seconds on the source clock.
    pub timestamp: f64,
    pub value: f64,
}

/// Description of a sub-signal a source can stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    pub name: String,
    pub units: String,
    pub dtype: &'static str,
    pub sample_rate: f64,
}

/// A contiguous run of samples from one signal.
///
/// Sample `i` has id `sample_id + i` and timestamp
/// `timestamp + i / sample_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub signal: String,
    pub sample_id: u64,
    pub sample_rate: f64,
    pub timestamp: f64,
    pub values: Vec<f64>,
}

impl SampleBlock {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sample_at(&self, idx: usize) -> Option<Sample> {
        self.values.get(idx).map(|&value| Sample {
            sample_id: self.sample_id + idx as u64,
            timestamp: self.timestamp + idx as f64 / self.sample_rate,
            value,
        })
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.values.len()).filter_map(move |idx| self.sample_at(idx))
    }

    /// Timestamp one period past the last sample.
    pub fn end_timestamp(&self) -> f64 {
        self.timestamp + self.values.len() as f64 / self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sample_clock() {
        let block = SampleBlock {
            signal: "current".into(),
            sample_id: 100,
            sample_rate: 1000.0,
            timestamp: 0.1,
            values: vec![1.0, 2.0, 3.0],
        };
        let samples: Vec<_> = block.samples().collect();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].sample_id, 102);
        assert!((samples[2].timestamp - 0.102).abs() < 1e-12);
        assert_eq!(samples[1].value, 2.0);
        assert!((block.end_timestamp() - 0.103).abs() < 1e-12);
        assert!(block.sample_at(3).is_none());
    }
}
