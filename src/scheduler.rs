use std::time::Instant;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::netlink::{self, ProcConnector};
use crate::sampler::PssSampler;
use crate::session::Session;

/// What waiting on the event source produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Timeout,
    Interrupted,
}

/// The one thing the loop blocks on.
pub trait EventSource {
    /// Blocks until there is something to read or `timeout_ms` elapsed.
    fn wait(&mut self, timeout_ms: u64) -> Result<Readiness>;

    /// Reads what is ready and applies it to the session.
    fn drain(&mut self, session: &mut Session) -> Result<()>;
}

pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the run started.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn start() -> MonotonicClock {
        MonotonicClock {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// The process connector socket behind epoll.
pub struct NetlinkSource {
    epoll: Epoll,
    connector: ProcConnector,
    echo_exec: bool,
    events: [EpollEvent; 1],
}

impl NetlinkSource {
    pub fn new(connector: ProcConnector, echo_exec: bool) -> Result<NetlinkSource> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(Error::Epoll)?;
        epoll
            .add(&connector, EpollEvent::new(EpollFlags::EPOLLIN, 0))
            .map_err(Error::Epoll)?;

        Ok(NetlinkSource {
            epoll,
            connector,
            echo_exec,
            events: [EpollEvent::empty()],
        })
    }
}

impl EventSource for NetlinkSource {
    fn wait(&mut self, timeout_ms: u64) -> Result<Readiness> {
        let timeout = timeout_ms.min(i32::MAX as u64) as isize;
        match self.epoll.wait(&mut self.events, timeout) {
            Ok(0) => Ok(Readiness::Timeout),
            Ok(_) => {
                let flags = self.events[0].events();
                if flags.contains(EpollFlags::EPOLLIN) {
                    Ok(Readiness::Ready)
                } else if flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR) {
                    Err(Error::Hangup)
                } else {
                    Ok(Readiness::Interrupted)
                }
            }
            Err(Errno::EINTR) => Ok(Readiness::Interrupted),
            Err(e) => Err(Error::Wait(e)),
        }
    }

    fn drain(&mut self, session: &mut Session) -> Result<()> {
        let Some(batch) = self.connector.receive() else {
            return Ok(());
        };

        for cmdline in netlink::dispatch_batch(&batch, session) {
            if self.echo_exec {
                println!("\x1b[0;31mEXEC\x1b[0m: [{}]", cmdline);
            }
        }
        Ok(())
    }
}

/// Next sampling deadline after `deadline`, strictly later than `now`.
///
/// Deadlines stay on the `deadline + k * period` grid. Ticks the loop was too
/// busy to take are skipped, not replayed.
pub fn next_deadline(deadline: u64, now: u64, period_ms: u64) -> u64 {
    let period_ms = period_ms.max(1);
    let next = deadline + period_ms;
    if next > now {
        return next;
    }
    let behind = now - deadline;
    deadline + (behind / period_ms + 1) * period_ms
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub drains: u64,
    pub interrupts: u64,
}

/// Interleaves draining process events with sampling on a fixed cadence,
/// until the session says the observed processes are gone.
pub struct Scheduler<'a, S, C> {
    source: S,
    sampler: &'a PssSampler,
    clock: C,
    period_ms: u64,
}

impl<'a, S: EventSource, C: Clock> Scheduler<'a, S, C> {
    pub fn new(source: S, sampler: &'a PssSampler, clock: C, period_ms: u64) -> Self {
        Scheduler {
            source,
            sampler,
            clock,
            period_ms: period_ms.max(1),
        }
    }

    pub fn run(&mut self, session: &mut Session) -> Result<LoopStats> {
        let mut stats = LoopStats::default();
        let mut deadline = self.clock.now_ms();

        while session.is_running() {
            let timeout = deadline.saturating_sub(self.clock.now_ms());
            match self.source.wait(timeout)? {
                Readiness::Interrupted => stats.interrupts += 1,
                Readiness::Ready => {
                    self.source.drain(session)?;
                    stats.drains += 1;
                }
                Readiness::Timeout => {
                    let now = self.clock.now_ms();
                    if now < deadline {
                        continue;
                    }
                    if let Some(sample) = self.sampler.sample(now, session.tracker.tracked()) {
                        session.store.push(sample);
                    }
                    stats.ticks += 1;
                    deadline = next_deadline(deadline, now, self.period_ms);
                }
            }
        }

        info!(?stats, samples = session.store.len(), "observed processes are gone");
        debug!(counters = ?session.tracker.counters(), "final counters");
        Ok(stats)
    }
}
