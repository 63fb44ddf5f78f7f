//! Client for the kernel's process connector: subscribes to fork, exec and
//! exit notifications for the whole machine and feeds them to the tracker.

pub mod wire;

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{bind, recvfrom, send, MsgFlags, NetlinkAddr};
use nix::unistd::getpid;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::session::Session;
use wire::{Batch, BatchEnd, ProcEvent};

const RECV_BUF_SIZE: usize = 8192;

/// A netlink socket subscribed to the process connector multicast group.
#[derive(Debug)]
pub struct ProcConnector {
    fd: OwnedFd,
    pid: u32,
    buf: Vec<u8>,
}

impl ProcConnector {
    /// Opens, binds and subscribes. Events are only guaranteed to arrive once
    /// this has returned.
    pub fn subscribe() -> Result<ProcConnector> {
        // SAFETY: plain syscall, the result is checked below
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                wire::NETLINK_CONNECTOR,
            )
        };
        let raw = Errno::result(raw).map_err(Error::Socket)?;
        // SAFETY: `raw` is a freshly created descriptor nobody else owns
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let pid = getpid().as_raw() as u32;
        bind(fd.as_raw_fd(), &NetlinkAddr::new(pid, wire::CN_IDX_PROC)).map_err(Error::Bind)?;

        let connector = ProcConnector {
            fd,
            pid,
            buf: vec![0; RECV_BUF_SIZE],
        };
        connector.send_op(wire::PROC_CN_MCAST_LISTEN)?;
        info!(pid, "subscribed to process events");
        Ok(connector)
    }

    fn send_op(&self, op: u32) -> Result<()> {
        let msg = wire::mcast_message(self.pid, op);
        let sent = send(self.fd.as_raw_fd(), &msg, MsgFlags::empty()).map_err(Error::Subscribe)?;
        if sent != msg.len() {
            return Err(Error::ShortSubscribe {
                sent,
                expected: msg.len(),
            });
        }
        Ok(())
    }

    /// Reads one datagram. Anything that did not come from the kernel, empty
    /// reads and receive errors yield nothing.
    pub fn receive(&mut self) -> Option<Batch> {
        let (len, from) = match recvfrom::<NetlinkAddr>(self.fd.as_raw_fd(), &mut self.buf) {
            Ok(received) => received,
            Err(Errno::ENOBUFS) => {
                // a lost exit for the launched process keeps the run going
                warn!("netlink receive buffer overrun, process events were lost");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "netlink receive failed");
                return None;
            }
        };

        if !accept(len, from) {
            return None;
        }

        trace!(len, "received datagram");
        Some(wire::decode_batch(&self.buf[..len]))
    }
}

/// Whether a datagram of `len` bytes from `from` is worth decoding: it must
/// come from the kernel (port id 0) and carry something.
fn accept(len: usize, from: Option<NetlinkAddr>) -> bool {
    if from.map(|addr| addr.pid()) != Some(0) {
        debug!(?from, "discarding datagram not sent by the kernel");
        return false;
    }
    if len == 0 {
        debug!("discarding empty datagram");
        return false;
    }
    true
}

impl AsFd for ProcConnector {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for ProcConnector {
    fn drop(&mut self) {
        if let Err(e) = self.send_op(wire::PROC_CN_MCAST_IGNORE) {
            debug!(error = %e, "failed to unsubscribe from process events");
        }
    }
}

/// Applies every event of a batch to the session. Returns the command lines
/// of tracked processes that called exec, in order.
pub fn dispatch_batch(batch: &Batch, session: &mut Session) -> Vec<String> {
    match &batch.end {
        BatchEnd::Exhausted | BatchEnd::Done => {}
        BatchEnd::Aborted(kind) => debug!(kind, "netlink batch aborted"),
        BatchEnd::Malformed(e) => debug!(error = %e, "malformed netlink record"),
    }

    batch
        .events
        .iter()
        .filter_map(|event| dispatch(event, session))
        .collect()
}

/// Applies one event. Returns the command line to display for a tracked exec.
pub fn dispatch(event: &ProcEvent, session: &mut Session) -> Option<String> {
    match *event {
        ProcEvent::Ack => debug!("listen request acknowledged"),
        ProcEvent::Fork {
            parent_pid,
            parent_tgid,
            child_pid,
            child_tgid,
        } => {
            session
                .tracker
                .on_fork(parent_pid, parent_tgid, child_pid, child_tgid);
        }
        ProcEvent::Exec { pid, tgid } => {
            if !session.tracker.is_tracked(tgid) {
                return None;
            }
            // the cmdline changed, whatever we knew for this pid is stale
            if pid != session.root() {
                session.cmdlines.forget(pid);
            }
            return Some(session.cmdlines.resolve(pid).to_owned());
        }
        ProcEvent::Exit {
            pid,
            tgid,
            exit_code,
            exit_signal,
        } => {
            trace!(%pid, %tgid, exit_code, exit_signal, "exit");
            session.tracker.on_exit(pid);
            if pid != session.root() {
                session.cmdlines.forget(pid);
            }
        }
        ProcEvent::Uid {
            pid,
            tgid,
            ruid,
            euid,
        } => debug!(%pid, %tgid, ruid, euid, "uid change"),
        ProcEvent::Gid {
            pid,
            tgid,
            rgid,
            egid,
        } => debug!(%pid, %tgid, rgid, egid, "gid change"),
        ProcEvent::Other(what) => trace!(what, "ignoring process event"),
    }
    None
}
