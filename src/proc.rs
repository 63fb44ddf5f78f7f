use std::collections::HashMap;
use std::ffi::{CString, OsString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeVal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::privilege;

pub const PROC_ROOT: &str = "/proc";

/// Best-effort `pid -> command line` lookups.
///
/// A process may be gone before we get to read its cmdline, so the launcher
/// declares the one it knows up front. Lookups are cached until the pid exits.
#[derive(Debug)]
pub struct Cmdlines {
    proc_root: PathBuf,
    cache: HashMap<Pid, String>,
}

impl Cmdlines {
    pub fn new(proc_root: impl Into<PathBuf>) -> Cmdlines {
        Cmdlines {
            proc_root: proc_root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn declare(&mut self, pid: Pid, cmdline: impl Into<String>) {
        self.cache.insert(pid, cmdline.into());
    }

    pub fn resolve(&mut self, pid: Pid) -> &str {
        let proc_root = &self.proc_root;
        self.cache
            .entry(pid)
            .or_insert_with(|| read_cmdline(proc_root, pid))
            .as_str()
    }

    pub fn forget(&mut self, pid: Pid) {
        self.cache.remove(&pid);
    }
}

fn read_cmdline(proc_root: &Path, pid: Pid) -> String {
    let path = proc_root.join(pid.to_string()).join("cmdline");
    match fs::read(&path) {
        Ok(bytes) => format_cmdline(&bytes),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cmdline unavailable");
            String::new()
        }
    }
}

/// Turns the NUL separated argv from `/proc/<pid>/cmdline` into one line.
pub fn format_cmdline(raw: &[u8]) -> String {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let joined: Vec<u8> = raw[..end]
        .iter()
        .map(|&b| if b == 0 { b' ' } else { b })
        .collect();
    String::from_utf8_lossy(&joined).into_owned()
}

pub fn join_command(command: &[OsString]) -> String {
    command
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Forks and execs `command`. The child drops root privileges (when running
/// under sudo) before exec.
pub fn launch(command: &[OsString]) -> Result<Pid> {
    let argv = command
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes())
                .map_err(|_| Error::NulInCommand(arg.to_string_lossy().into_owned()))
        })
        .collect::<Result<Vec<_>>>()?;
    let Some(program) = argv.first() else {
        return Err(Error::EmptyCommand);
    };

    // SAFETY: we are single threaded at this point, the child only drops
    // privileges and execs.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            if let Err(e) = privilege::drop_root() {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }

            let err = match execvp(program, &argv) {
                Ok(never) => match never {},
                Err(e) => e,
            };
            eprintln!("Error: failed to execute {:?}: {}", program, err);
            std::process::exit(127);
        }
        Ok(ForkResult::Parent { child }) => {
            debug!(%child, command = %join_command(command), "launched");
            Ok(child)
        }
        Err(source) => Err(Error::Launch {
            command: join_command(command),
            source,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Reaped {
    pub termination: Termination,
    pub user_ms: u64,
    pub kernel_ms: u64,
}

/// Waits for `pid` and collects its cpu usage.
pub fn reap(pid: Pid) -> Result<Reaped> {
    let termination = loop {
        match waitpid(pid, None).map_err(Error::Reap)? {
            WaitStatus::Exited(_, code) => break Termination::Exited(code),
            WaitStatus::Signaled(_, signal, _) => break Termination::Signaled(signal as i32),
            other => trace!(?other, "ignoring wait status"),
        }
    };

    // only one child was ever reaped, so the children's totals are its own
    let usage = getrusage(UsageWho::RUSAGE_CHILDREN).map_err(Error::Reap)?;
    Ok(Reaped {
        termination,
        user_ms: to_ms(usage.user_time()),
        kernel_ms: to_ms(usage.system_time()),
    })
}

fn to_ms(tv: TimeVal) -> u64 {
    tv.tv_sec() as u64 * 1000 + tv.tv_usec() as u64 / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmdline_nuls_become_spaces() {
        assert_eq!(format_cmdline(b"sleep\x001\x00"), "sleep 1");
        assert_eq!(format_cmdline(b"bash\x00-c\x00echo  hi\x00\x00"), "bash -c echo  hi");
        assert_eq!(format_cmdline(b"no-trailer"), "no-trailer");
        assert_eq!(format_cmdline(b""), "");
        assert_eq!(format_cmdline(b"\x00\x00"), "");
    }

    #[test]
    fn resolve_reads_and_caches() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("42");
        fs::create_dir(&dir)?;
        fs::write(dir.join("cmdline"), b"cat\x00/etc/hosts\x00")?;

        let mut cmdlines = Cmdlines::new(root.path());
        let pid = Pid::from_raw(42);
        assert_eq!(cmdlines.resolve(pid), "cat /etc/hosts");

        // cached, even once the file changes
        fs::write(dir.join("cmdline"), b"other\x00")?;
        assert_eq!(cmdlines.resolve(pid), "cat /etc/hosts");

        cmdlines.forget(pid);
        assert_eq!(cmdlines.resolve(pid), "other");
        Ok(())
    }

    #[test]
    fn missing_process_is_empty() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut cmdlines = Cmdlines::new(root.path());
        assert_eq!(cmdlines.resolve(Pid::from_raw(7)), "");
        Ok(())
    }

    #[test]
    fn declared_wins() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut cmdlines = Cmdlines::new(root.path());
        cmdlines.declare(Pid::from_raw(7), "sleep 1");
        assert_eq!(cmdlines.resolve(Pid::from_raw(7)), "sleep 1");
        Ok(())
    }

    #[test]
    fn joins_command() {
        let command = vec![OsString::from("ls"), OsString::from("-la")];
        assert_eq!(join_command(&command), "ls -la");
    }

    #[test]
    fn to_ms_truncates_micros() {
        assert_eq!(to_ms(TimeVal::new(2, 345_999)), 2345);
    }

    #[test]
    fn rejects_interior_nul() {
        let command = vec![OsString::from("l\0s")];
        assert!(matches!(launch(&command), Err(Error::NulInCommand(_))));
    }
}
