use serde::Serialize;

/// What was measured at a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    /// Proportional set size summed over every tracked process, in bytes.
    Pss { bytes: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    /// Milliseconds since the run started.
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub measurement: Measurement,
}

impl Sample {
    pub fn pss(timestamp_ms: u64, bytes: u64) -> Sample {
        Sample {
            timestamp_ms,
            measurement: Measurement::Pss { bytes },
        }
    }

    pub fn combined_pss_bytes(&self) -> u64 {
        match self.measurement {
            Measurement::Pss { bytes } => bytes,
        }
    }

    fn add_pss(&mut self, more: u64) {
        match &mut self.measurement {
            Measurement::Pss { bytes } => *bytes = bytes.saturating_add(more),
        }
    }
}

/// Append-only log of samples, ordered by timestamp, with at most one entry
/// per timestamp.
#[derive(Debug, Default)]
pub struct Store {
    samples: Vec<Sample>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    /// Records a PSS reading. Readings that land on a timestamp already in
    /// the store are added to that entry instead of creating a new one.
    pub fn record_pss(&mut self, timestamp_ms: u64, bytes: u64) {
        // the sampling loop only moves forward, so the tail is the usual case
        match self.samples.last().map(|s| s.timestamp_ms) {
            None => self.samples.push(Sample::pss(timestamp_ms, bytes)),
            Some(last) if last < timestamp_ms => {
                self.samples.push(Sample::pss(timestamp_ms, bytes))
            }
            Some(_) => match self
                .samples
                .binary_search_by_key(&timestamp_ms, |s| s.timestamp_ms)
            {
                Ok(idx) => self.samples[idx].add_pss(bytes),
                Err(idx) => self.samples.insert(idx, Sample::pss(timestamp_ms, bytes)),
            },
        }
    }

    pub fn push(&mut self, sample: Sample) {
        match sample.measurement {
            Measurement::Pss { bytes } => self.record_pss(sample.timestamp_ms, bytes),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Largest combined PSS seen at any single timestamp.
    pub fn max_combined_pss(&self) -> u64 {
        self.samples
            .iter()
            .map(Sample::combined_pss_bytes)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_timestamp_is_merged() {
        let mut store = Store::new();
        store.record_pss(7, 100);
        store.record_pss(7, 23);
        assert_eq!(store.samples(), &[Sample::pss(7, 123)]);
    }

    #[test]
    fn ordered_and_unique() {
        let mut store = Store::new();
        store.record_pss(10, 1);
        store.record_pss(30, 3);
        store.record_pss(20, 2);
        store.record_pss(10, 4);
        let stamps: Vec<_> = store.samples().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        assert_eq!(store.samples()[0].combined_pss_bytes(), 5);
    }

    #[test]
    fn max_over_timestamps() {
        let mut store = Store::new();
        assert_eq!(store.max_combined_pss(), 0);
        store.record_pss(0, 10);
        store.record_pss(150, 20);
        store.record_pss(390, 30);
        assert_eq!(store.max_combined_pss(), 30);

        // two pids at the same tick beat a single larger reading
        store.record_pss(400, 20);
        store.record_pss(400, 15);
        assert_eq!(store.max_combined_pss(), 35);
    }

    #[test]
    fn serializes_tagged() -> anyhow::Result<()> {
        let json = serde_json::to_value(Sample::pss(3, 4096))?;
        assert_eq!(
            json,
            serde_json::json!({ "timestamp_ms": 3, "kind": "pss", "bytes": 4096 })
        );
        Ok(())
    }
}
