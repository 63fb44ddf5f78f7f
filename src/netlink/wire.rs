//! Binary layout of the kernel's process connector messages.
//!
//! Every datagram is a run of `nlmsghdr`-framed records. Each record carries a
//! `cn_msg` header followed by a `proc_event`:
//!
//! ```text
//! nlmsghdr  { len: u32, type: u16, flags: u16, seq: u32, pid: u32 }      16 bytes
//! cn_msg    { idx: u32, val: u32, seq: u32, ack: u32, len: u16, flags: u16 }  20 bytes
//! proc_event{ what: u32, cpu: u32, timestamp_ns: u64, event_data: union }
//! ```
//!
//! All integers are in host byte order. Lengths are checked before any field
//! is read; nothing here trusts the buffer.

use nix::libc;
use nix::unistd::Pid;
use thiserror::Error;

pub const NETLINK_CONNECTOR: i32 = libc::NETLINK_CONNECTOR;
pub const CN_IDX_PROC: u32 = 1;
pub const CN_VAL_PROC: u32 = 1;

pub const PROC_CN_MCAST_LISTEN: u32 = 1;
pub const PROC_CN_MCAST_IGNORE: u32 = 2;

pub const NLMSG_NOOP: u16 = libc::NLMSG_NOOP as u16;
pub const NLMSG_ERROR: u16 = libc::NLMSG_ERROR as u16;
pub const NLMSG_DONE: u16 = libc::NLMSG_DONE as u16;
pub const NLMSG_OVERRUN: u16 = libc::NLMSG_OVERRUN as u16;

const NLMSG_ALIGNTO: usize = 4;
pub const NLMSG_HDRLEN: usize = 16;
pub const CN_MSG_LEN: usize = 20;
const PROC_EVENT_HDRLEN: usize = 16;

const PROC_EVENT_NONE: u32 = 0x0000_0000;
const PROC_EVENT_FORK: u32 = 0x0000_0001;
const PROC_EVENT_EXEC: u32 = 0x0000_0002;
const PROC_EVENT_UID: u32 = 0x0000_0004;
const PROC_EVENT_GID: u32 = 0x0000_0040;
const PROC_EVENT_EXIT: u32 = 0x8000_0000;

pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

pub const fn nlmsg_length(payload: usize) -> usize {
    payload + NLMSG_HDRLEN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("{what} truncated: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },

    #[error("netlink record claims {len} bytes but only {remaining} remain")]
    BadLength { len: usize, remaining: usize },
}

/// A decoded `proc_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcEvent {
    /// Acknowledgement of our subscription.
    Ack,
    Fork {
        parent_pid: Pid,
        parent_tgid: Pid,
        child_pid: Pid,
        child_tgid: Pid,
    },
    Exec {
        pid: Pid,
        tgid: Pid,
    },
    Uid {
        pid: Pid,
        tgid: Pid,
        ruid: u32,
        euid: u32,
    },
    Gid {
        pid: Pid,
        tgid: Pid,
        rgid: u32,
        egid: u32,
    },
    Exit {
        pid: Pid,
        tgid: Pid,
        exit_code: u32,
        exit_signal: u32,
    },
    /// sid, ptrace, comm, coredump and anything newer than this decoder.
    Other(u32),
}

/// How decoding a datagram ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEnd {
    /// Every record in the datagram was read.
    Exhausted,
    /// An `NLMSG_DONE` record was read (and its event kept).
    Done,
    /// An `NLMSG_ERROR` or `NLMSG_OVERRUN` record; nothing after it was read.
    Aborted(u16),
    /// A record could not be decoded; nothing after it was read.
    Malformed(WireError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub events: Vec<ProcEvent>,
    pub end: BatchEnd,
}

/// Builds the `{ nlmsghdr | cn_msg | proc_cn_mcast_op }` control message that
/// subscribes (or unsubscribes) `pid` to the process connector group.
pub fn mcast_message(pid: u32, op: u32) -> Vec<u8> {
    let payload = CN_MSG_LEN + 4;
    let len = nlmsg_length(payload);
    let mut buf = Vec::with_capacity(nlmsg_align(len));

    // nlmsghdr
    buf.extend_from_slice(&(len as u32).to_ne_bytes());
    buf.extend_from_slice(&NLMSG_DONE.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&pid.to_ne_bytes());

    // cn_msg
    buf.extend_from_slice(&CN_IDX_PROC.to_ne_bytes());
    buf.extend_from_slice(&CN_VAL_PROC.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(&4u16.to_ne_bytes());
    buf.extend_from_slice(&0u16.to_ne_bytes());

    buf.extend_from_slice(&op.to_ne_bytes());
    buf.resize(nlmsg_align(len), 0);
    buf
}

/// Decodes every record in one received datagram.
///
/// `NLMSG_NOOP` records are skipped, `NLMSG_ERROR` and `NLMSG_OVERRUN` end the
/// batch without dispatching, and `NLMSG_DONE` ends it after its own event.
pub fn decode_batch(buf: &[u8]) -> Batch {
    let mut events = Vec::new();
    let mut rest = buf;

    let end = loop {
        if rest.len() < NLMSG_HDRLEN {
            break BatchEnd::Exhausted;
        }

        let len = read_u32(rest, 0) as usize;
        let kind = read_u16(rest, 4);
        if len < NLMSG_HDRLEN || len > rest.len() {
            break BatchEnd::Malformed(WireError::BadLength {
                len,
                remaining: rest.len(),
            });
        }

        match kind {
            NLMSG_NOOP => {}
            NLMSG_ERROR | NLMSG_OVERRUN => break BatchEnd::Aborted(kind),
            _ => match decode_connector(&rest[NLMSG_HDRLEN..len]) {
                Ok(event) => events.push(event),
                Err(e) => break BatchEnd::Malformed(e),
            },
        }

        if kind == NLMSG_DONE {
            break BatchEnd::Done;
        }

        let next = nlmsg_align(len);
        if next >= rest.len() {
            break BatchEnd::Exhausted;
        }
        rest = &rest[next..];
    };

    Batch { events, end }
}

/// Decodes a `cn_msg` and the `proc_event` it carries.
pub fn decode_connector(buf: &[u8]) -> Result<ProcEvent, WireError> {
    need("cn_msg", buf, CN_MSG_LEN)?;
    let data_len = read_u16(buf, 16) as usize;
    let data = &buf[CN_MSG_LEN..];
    need("cn_msg payload", data, data_len)?;
    decode_proc_event(&data[..data_len])
}

pub fn decode_proc_event(buf: &[u8]) -> Result<ProcEvent, WireError> {
    need("proc_event", buf, PROC_EVENT_HDRLEN)?;
    let what = read_u32(buf, 0);
    let data = &buf[PROC_EVENT_HDRLEN..];

    let event = match what {
        PROC_EVENT_NONE => ProcEvent::Ack,
        PROC_EVENT_FORK => {
            need("fork event", data, 16)?;
            ProcEvent::Fork {
                parent_pid: read_pid(data, 0),
                parent_tgid: read_pid(data, 4),
                child_pid: read_pid(data, 8),
                child_tgid: read_pid(data, 12),
            }
        }
        PROC_EVENT_EXEC => {
            need("exec event", data, 8)?;
            ProcEvent::Exec {
                pid: read_pid(data, 0),
                tgid: read_pid(data, 4),
            }
        }
        PROC_EVENT_UID => {
            need("uid event", data, 16)?;
            ProcEvent::Uid {
                pid: read_pid(data, 0),
                tgid: read_pid(data, 4),
                ruid: read_u32(data, 8),
                euid: read_u32(data, 12),
            }
        }
        PROC_EVENT_GID => {
            need("gid event", data, 16)?;
            ProcEvent::Gid {
                pid: read_pid(data, 0),
                tgid: read_pid(data, 4),
                rgid: read_u32(data, 8),
                egid: read_u32(data, 12),
            }
        }
        PROC_EVENT_EXIT => {
            need("exit event", data, 16)?;
            ProcEvent::Exit {
                pid: read_pid(data, 0),
                tgid: read_pid(data, 4),
                exit_code: read_u32(data, 8),
                exit_signal: read_u32(data, 12),
            }
        }
        other => ProcEvent::Other(other),
    };

    Ok(event)
}

fn need(what: &'static str, buf: &[u8], need: usize) -> Result<(), WireError> {
    if buf.len() < need {
        return Err(WireError::Truncated {
            what,
            need,
            have: buf.len(),
        });
    }
    Ok(())
}

// callers have checked the length
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_pid(buf: &[u8], at: usize) -> Pid {
    Pid::from_raw(read_u32(buf, at) as i32)
}
