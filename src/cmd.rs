//! Command records, the pending-command queue and the terminator table.
//!
//! Exactly one command is ever in flight per span; everything else waits in
//! FIFO order. Response routing is data, not code: each command names its
//! [`ResponseHandler`] variant and each registered notification prefix maps
//! to a [`NotifyKind`], both matched in the span engine.

use embassy_time::Duration;
use heapless::{Deque, String, Vec};

use crate::error::{Error, Result};

pub const MAX_CMD_SZ: usize = 128;
pub const CMD_QUEUE_SZ: usize = 100;
pub const NOTIFY_TABLE_SZ: usize = 16;
/// Comma-separated fields within one response entry.
pub const MAX_FIELDS: usize = 10;

pub type CmdString = String<MAX_CMD_SZ>;

/// Routing tag for the response to an enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseHandler {
    /// Fire and forget.
    None,
    /// Only log `what` when the command fails.
    ExpectOk(&'static str),
    /// Inventory reads issued during bring-up.
    Model,
    Manufacturer,
    Revision,
    SerialNumber,
    Imsi,
    SubscriberNumber,
    Smsc,
    /// `AT+CLIP=1` acknowledgement.
    ClipEnable,
    /// `AT+CREG?` status query; also ends bring-up.
    Creg,
    SignalQuality,
    /// `AT+CLCC` call-list reconciliation.
    CallList,
    Dial { call_id: u8 },
    Answer { call_id: u8 },
    Hangup { call_id: u8 },
    /// `AT+CMGF` mode switch ahead of a text-mode SMS.
    SmsTextMode { sms_id: u16 },
    /// Final `+CMGS`/terminator after the 0x1A end-of-message byte.
    SmsSend { sms_id: u16 },
    /// `AT+CMGR` read-back triggered by `+CMTI`.
    SmsRead,
}

/// A queued AT command with its timeout and response routing.
#[derive(Debug, Clone)]
pub struct AtCmd {
    pub cmd: CmdString,
    pub handler: ResponseHandler,
    pub timeout: Duration,
}

impl AtCmd {
    pub fn new(cmd: &str, handler: ResponseHandler, timeout: Duration) -> Result<Self> {
        if cmd.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let mut s = CmdString::new();
        s.push_str(cmd).map_err(|_| Error::InvalidArgument)?;
        Ok(Self {
            cmd: s,
            handler,
            timeout,
        })
    }
}

pub struct CmdQueue {
    queue: Deque<AtCmd, CMD_QUEUE_SZ>,
}

impl CmdQueue {
    pub fn new() -> Self {
        Self { queue: Deque::new() }
    }

    /// A full command queue means the engine is generating commands faster
    /// than the modem can ever answer, which is a logic error upstream.
    pub fn push(&mut self, cmd: AtCmd) -> Result<()> {
        self.queue.push_back(cmd).map_err(|_| Error::OutOfMemory)
    }

    pub fn pop(&mut self) -> Option<AtCmd> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue = Deque::new();
    }
}

impl Default for CmdQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Unsolicited notifications routed by registered prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyKind {
    Cring,
    Ring,
    Clip,
    Creg,
    CodecInfo,
    /// `+CMT` direct SMS delivery; the payload rides on the following line.
    SmsDeliver,
    /// `+CMTI` stored-SMS indication.
    SmsWaiting,
}

/// Outcome of a notification handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
    /// The token (and possibly its continuation line) was consumed.
    Handled,
    /// This could be the prefix of a response whose terminator has not
    /// arrived yet; leave the window untouched.
    NeedsMore,
}

#[derive(Debug, Clone)]
pub struct Notify {
    pub prefix: String<16>,
    pub kind: NotifyKind,
}

pub type NotifyTable = Vec<Notify, NOTIFY_TABLE_SZ>;

/// Register `kind` under `prefix`, overwriting an earlier registration of
/// the same prefix.
pub fn register_notify(table: &mut NotifyTable, prefix: &str, kind: NotifyKind) -> Result<()> {
    if let Some(existing) = table
        .iter_mut()
        .find(|n| n.prefix.eq_ignore_ascii_case(prefix))
    {
        info!("Already had a notifier for prefix {}", prefix);
        existing.kind = kind;
        return Ok(());
    }

    let mut p = String::new();
    p.push_str(prefix).map_err(|_| Error::InvalidArgument)?;
    table
        .push(Notify { prefix: p, kind })
        .map_err(|_| Error::OutOfMemory)
}

pub fn lookup_notify(table: &NotifyTable, token: &str) -> Option<NotifyKind> {
    table
        .iter()
        .find(|n| starts_with_ci(token, &n.prefix))
        .map(|n| n.kind)
}

/// Terminator prefixes and their success polarity.
const TERMINATORS: &[(&str, bool)] = &[
    ("OK", true),
    ("CONNECT", true),
    ("BUSY", false),
    ("ERROR", false),
    ("NO DIALTONE", false),
    ("NO ANSWER", false),
    ("NO CARRIER", false),
    ("+CMS ERROR:", false),
    ("+CME ERROR:", false),
    ("+EXT ERROR:", false),
];

/// `Some(polarity)` when `token` ends a response.
pub fn check_terminator(token: &str) -> Option<bool> {
    TERMINATORS
        .iter()
        .find(|(prefix, _)| starts_with_ci(token, prefix))
        .map(|&(_, success)| success)
}

pub fn starts_with_ci(token: &str, prefix: &str) -> bool {
    token.len() >= prefix.len()
        && token.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Strip a notification prefix (e.g. `+CLIP: `) off the front of a token,
/// tolerating a missing space after the colon.
pub fn strip_prefix_ci<'t>(token: &'t str, prefix: &str) -> Option<&'t str> {
    if !starts_with_ci(token, prefix) {
        return None;
    }
    Some(token[prefix.len()..].trim_start_matches(": ").trim_start_matches(':'))
}

/// Split a response entry into its comma-separated fields, honoring quoted
/// strings and keeping empty fields in place.
pub fn split_fields(entry: &str) -> Vec<&str, MAX_FIELDS> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let bytes = entry.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                if fields.push(entry[start..i].trim()).is_err() {
                    return fields;
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let _ = fields.push(entry[start..].trim());
    fields
}

/// Remove one level of surrounding double quotes.
pub fn unquote(field: &str) -> &str {
    field
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(field)
}
