use nix::unistd::Pid;

use crate::proc::Cmdlines;
use crate::telemetry::Store;
use crate::tracker::Tracker;

/// When the observation is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
    /// The launched process has exited.
    RootExits,
    /// Every tracked process has exited.
    AllExit,
}

/// Everything one run mutates, owned in one place and handed by reference to
/// the netlink client, the sampler and the event loop.
#[derive(Debug)]
pub struct Session {
    pub tracker: Tracker,
    pub store: Store,
    pub cmdlines: Cmdlines,
    root: Pid,
    until: Until,
}

impl Session {
    /// Starts observing `root`, whose command line is already known.
    pub fn new(root: Pid, cmdline: String, cmdlines: Cmdlines, until: Until) -> Session {
        let mut session = Session {
            tracker: Tracker::new(),
            store: Store::new(),
            cmdlines,
            root,
            until,
        };
        session.tracker.track(root);
        session.cmdlines.declare(root, cmdline);
        session
    }

    pub fn root(&self) -> Pid {
        self.root
    }

    pub fn is_running(&self) -> bool {
        match self.until {
            Until::RootExits => self.tracker.is_tracked(self.root),
            Until::AllExit => !self.tracker.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(until: Until) -> Session {
        Session::new(
            Pid::from_raw(100),
            "make -j8".into(),
            Cmdlines::new("/nonexistent"),
            until,
        )
    }

    #[test]
    fn root_is_tracked_and_declared() {
        let mut session = session(Until::RootExits);
        assert!(session.tracker.is_tracked(Pid::from_raw(100)));
        assert_eq!(session.cmdlines.resolve(Pid::from_raw(100)), "make -j8");
        assert!(session.is_running());
    }

    #[test]
    fn root_exit_ends_the_run() {
        let mut session = session(Until::RootExits);
        session.tracker.track(Pid::from_raw(200));
        session.tracker.untrack(Pid::from_raw(100));
        assert!(!session.is_running());
    }

    #[test]
    fn all_exit_waits_for_the_last_one() {
        let mut session = session(Until::AllExit);
        session.tracker.track(Pid::from_raw(200));
        session.tracker.untrack(Pid::from_raw(100));
        assert!(session.is_running());
        session.tracker.untrack(Pid::from_raw(200));
        assert!(!session.is_running());
    }
}
