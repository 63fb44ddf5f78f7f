use std::collections::HashSet;

use nix::unistd::Pid;
use serde::Serialize;
use tracing::debug;

/// Running totals, read once the loop is over.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Every accepted fork, thread or process.
    pub threads: u64,
    /// Accepted forks that produced a new task group.
    pub processes: u64,
}

/// What [`Tracker::on_fork`] made of a fork notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    Thread,
    Process,
    Ignored,
}

/// Decides, from fork and exit notifications alone, which task groups belong
/// to the observed subtree.
///
/// The kernel reports every fork on the machine. A task whose pid differs from
/// its tgid is a thread; it is counted when its task group is tracked but is
/// never tracked itself. A task whose pid equals its tgid is a new process; it
/// joins the subtree when its parent's task group is tracked.
#[derive(Debug, Default)]
pub struct Tracker {
    tracked: HashSet<Pid>,
    counters: Counters,
}

impl Tracker {
    pub fn new() -> Tracker {
        Tracker::default()
    }

    pub fn track(&mut self, tgid: Pid) {
        if self.tracked.insert(tgid) {
            debug!(%tgid, tracked = self.tracked.len(), "tracking");
        }
    }

    pub fn untrack(&mut self, tgid: Pid) {
        if self.tracked.remove(&tgid) {
            debug!(%tgid, tracked = self.tracked.len(), "untracking");
        }
    }

    pub fn is_tracked(&self, tgid: Pid) -> bool {
        self.tracked.contains(&tgid)
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn tracked(&self) -> impl Iterator<Item = Pid> + '_ {
        self.tracked.iter().copied()
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn on_fork(
        &mut self,
        parent_pid: Pid,
        parent_tgid: Pid,
        child_pid: Pid,
        child_tgid: Pid,
    ) -> ForkOutcome {
        if child_pid != child_tgid {
            if !self.is_tracked(child_tgid) {
                return ForkOutcome::Ignored;
            }

            self.counters.threads += 1;
            debug!(%parent_pid, %parent_tgid, %child_pid, %child_tgid, "new thread");
            return ForkOutcome::Thread;
        }

        // a repeated notification for a child we already know still counts
        if !self.is_tracked(parent_tgid) && !self.is_tracked(child_tgid) {
            return ForkOutcome::Ignored;
        }

        self.counters.threads += 1;
        self.counters.processes += 1;
        debug!(%parent_pid, %parent_tgid, %child_pid, %child_tgid, "new process");
        self.track(child_tgid);
        ForkOutcome::Process
    }

    pub fn on_exit(&mut self, pid: Pid) {
        self.untrack(pid);
    }
}
