use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use nix::unistd::Pid;
use tracing::trace;

use crate::telemetry::Sample;

/// Reads proportional set sizes out of `/proc/<pid>/smaps`.
#[derive(Debug)]
pub struct PssSampler {
    proc_root: PathBuf,
}

impl PssSampler {
    pub fn new(proc_root: impl Into<PathBuf>) -> PssSampler {
        PssSampler {
            proc_root: proc_root.into(),
        }
    }

    /// PSS of one process in bytes. A process we can't read (it already
    /// exited, or is not ours to look at) counts as zero.
    pub fn pss(&self, pid: Pid) -> u64 {
        let path = self.proc_root.join(pid.to_string()).join("smaps");
        match File::open(&path) {
            Ok(file) => sum_pss(BufReader::new(file)),
            Err(e) => {
                trace!(path = %path.display(), error = %e, "smaps unavailable");
                0
            }
        }
    }

    /// One combined sample over `tgids`, or nothing if there are none.
    pub fn sample(&self, now_ms: u64, tgids: impl IntoIterator<Item = Pid>) -> Option<Sample> {
        let mut tgids = tgids.into_iter().peekable();
        tgids.peek()?;

        let total = tgids.map(|pid| self.pss(pid)).sum();
        Some(Sample::pss(now_ms, total))
    }
}

/// Sums every `Pss:` line (kB) of an smaps file, in bytes.
fn sum_pss(reader: impl BufRead) -> u64 {
    let mut kb = 0u64;
    // a read error means the process went away mid-read; keep what we have
    for line in reader.lines().map_while(Result::ok) {
        let Some(rest) = line.strip_prefix("Pss:") else {
            continue;
        };
        if let Some(value) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
            kb += value;
        }
    }
    kb * 1024
}
