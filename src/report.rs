use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::Series;
use crate::chart;
use crate::proc::{Reaped, Termination};
use crate::telemetry::{Sample, Store};
use crate::tracker::Counters;

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub command: String,
    #[serde(flatten)]
    pub counters: Counters,
    pub max_pss_bytes: u64,
    pub wall_ms: u64,
    #[serde(flatten)]
    pub reaped: Reaped,
    pub samples: &'a [Sample],
}

impl<'a> Report<'a> {
    pub fn new(
        command: String,
        counters: Counters,
        store: &'a Store,
        wall_ms: u64,
        reaped: Reaped,
    ) -> Report<'a> {
        Report {
            command,
            counters,
            max_pss_bytes: store.max_combined_pss(),
            wall_ms,
            reaped,
            samples: store.samples(),
        }
    }

    pub fn write_summary(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "Num threads = {}", self.counters.threads)?;
        writeln!(out, "Num process = {}", self.counters.processes)?;
        writeln!(out, "Max PSS: {} bytes", chart::grouped(self.max_pss_bytes))?;
        writeln!(
            out,
            "Walltime: {}ms - user-space: {}ms - kernel-space: {}ms",
            chart::grouped(self.wall_ms),
            chart::grouped(self.reaped.user_ms),
            chart::grouped(self.reaped.kernel_ms),
        )?;
        match self.reaped.termination {
            Termination::Exited(0) => {}
            Termination::Exited(code) => writeln!(out, "Exit status: {}", code)?,
            Termination::Signaled(signal) => writeln!(out, "Killed by signal {}", signal)?,
        }
        Ok(())
    }

    /// Summary, then the chart when there is anything to draw.
    pub fn write_text(
        &self,
        out: &mut impl Write,
        store: &Store,
        columns: usize,
        rows: u64,
    ) -> io::Result<()> {
        self.write_summary(out)?;
        if !store.is_empty() {
            let series = Series::new(store, columns, self.wall_ms, rows);
            chart::render(out, &series, rows, self.wall_ms)?;
        }
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// The exit code that mirrors how the command ended.
    pub fn exit_code(&self) -> i32 {
        match self.reaped.termination {
            Termination::Exited(code) => code,
            Termination::Signaled(signal) => 128 + signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let mut store = Store::new();
        store.record_pss(0, 1_500_000);
        store.record_pss(3, 2_048_000);
        store
    }

    fn report(store: &Store, termination: Termination) -> Report<'_> {
        Report::new(
            "make -j8".into(),
            Counters {
                threads: 12,
                processes: 3,
            },
            store,
            1234,
            Reaped {
                termination,
                user_ms: 900,
                kernel_ms: 45,
            },
        )
    }

    #[test]
    fn summary() -> anyhow::Result<()> {
        let store = store();
        let mut out = Vec::new();
        report(&store, Termination::Exited(0)).write_summary(&mut out)?;
        assert_eq!(
            String::from_utf8(out)?,
            "Num threads = 12\n\
             Num process = 3\n\
             Max PSS: 2,048,000 bytes\n\
             Walltime: 1,234ms - user-space: 900ms - kernel-space: 45ms\n"
        );
        Ok(())
    }

    #[test]
    fn chart_only_with_samples() -> anyhow::Result<()> {
        let empty = Store::new();
        let mut out = Vec::new();
        report(&empty, Termination::Exited(0)).write_text(&mut out, &empty, 10, 4)?;
        assert_eq!(String::from_utf8(out)?.lines().count(), 4);

        let store = store();
        let mut out = Vec::new();
        report(&store, Termination::Exited(0)).write_text(&mut out, &store, 10, 4)?;
        // summary, frame top, rows, axis, labels
        assert_eq!(String::from_utf8(out)?.lines().count(), 4 + 1 + 4 + 2);
        Ok(())
    }

    #[test]
    fn failure_is_reported() -> anyhow::Result<()> {
        let store = store();
        let failed = report(&store, Termination::Exited(2));
        let mut out = Vec::new();
        failed.write_summary(&mut out)?;
        assert!(String::from_utf8(out)?.ends_with("Exit status: 2\n"));
        assert_eq!(failed.exit_code(), 2);
        assert_eq!(report(&store, Termination::Signaled(9)).exit_code(), 137);
        Ok(())
    }

    #[test]
    fn json() -> anyhow::Result<()> {
        let store = store();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.json");
        report(&store, Termination::Exited(0)).write_json(&path)?;

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(json["threads"], 12);
        assert_eq!(json["processes"], 3);
        assert_eq!(json["max_pss_bytes"], 2_048_000);
        assert_eq!(json["termination"]["exited"], 0);
        assert_eq!(json["user_ms"], 900);
        assert_eq!(json["samples"][1]["timestamp_ms"], 3);
        assert_eq!(json["samples"][1]["bytes"], 2_048_000);
        Ok(())
    }
}
