use crate::telemetry::{Sample, Store};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub total_bytes: u64,
    pub samples: u64,
}

impl Bucket {
    pub fn average(&self) -> Option<u64> {
        self.total_bytes.checked_div(self.samples)
    }
}

/// The store reduced to a fixed number of columns, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Bucket averages scaled into `[0, chart_height]` against `max_combined_pss`.
    pub heights: Vec<f64>,
    pub max_combined_pss: u64,
}

impl Series {
    pub fn new(store: &Store, width: usize, duration_ms: u64, chart_height: u64) -> Series {
        let buckets = bucketize(store.samples(), width, duration_ms);
        let averages = forward_fill(&buckets);
        let max_combined_pss = store.max_combined_pss();
        let heights = scale(&averages, max_combined_pss, chart_height);
        Series {
            heights,
            max_combined_pss,
        }
    }
}

/// Spreads `samples` over `width` equal slices of `duration_ms`, starting at
/// the first sample. Anything past the end lands in the last slice.
pub fn bucketize(samples: &[Sample], width: usize, duration_ms: u64) -> Vec<Bucket> {
    let mut buckets = vec![Bucket::default(); width];
    let Some(first) = samples.first() else {
        return buckets;
    };
    if width == 0 {
        return buckets;
    }

    let last = width - 1;
    let bracket_width = duration_ms as f64 / width as f64;
    for sample in samples {
        let offset = sample.timestamp_ms.saturating_sub(first.timestamp_ms);
        let idx = if bracket_width > 0.0 {
            ((offset as f64 / bracket_width).floor() as usize).min(last)
        } else if offset == 0 {
            0
        } else {
            last
        };

        let bucket = &mut buckets[idx];
        bucket.total_bytes = bucket.total_bytes.saturating_add(sample.combined_pss_bytes());
        bucket.samples += 1;
    }
    buckets
}

/// Bucket averages; an empty bucket repeats the one before it, and leading
/// empty buckets are 0.
pub fn forward_fill(buckets: &[Bucket]) -> Vec<u64> {
    let mut previous = 0;
    buckets
        .iter()
        .map(|bucket| {
            previous = bucket.average().unwrap_or(previous);
            previous
        })
        .collect()
}

pub fn scale(averages: &[u64], max: u64, chart_height: u64) -> Vec<f64> {
    if max == 0 {
        return vec![0.0; averages.len()];
    }
    let factor = chart_height as f64 / max as f64;
    averages
        .iter()
        .map(|&avg| (avg as f64 * factor).min(chart_height as f64))
        .collect()
}
