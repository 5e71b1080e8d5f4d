//! Shared fixtures for the unit and scenario tests.

use std::sync::{Mutex, MutexGuard};
use std::vec::Vec;

use crate::host::HostInterface;
use crate::sms::{SmsEvent, SmsStatus};
use crate::types::{ConEvent, ConStatus, RefusalReason, RelEvent, SpanStatus};

/// The mock time driver is process-global, so tests that advance it (or
/// that depend on armed timers staying pending) serialize on this lock.
static TIME: Mutex<()> = Mutex::new(());

pub fn time_guard() -> MutexGuard<'static, ()> {
    TIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A host that records every callback and all transport writes.
#[derive(Default)]
pub struct RecordingHost {
    pub written: Vec<u8>,
    pub statuses: Vec<(u8, SpanStatus)>,
    pub con_inds: Vec<(u8, ConEvent)>,
    pub con_stss: Vec<(u8, ConStatus)>,
    pub rel_inds: Vec<(u8, RelEvent)>,
    pub rel_cfms: Vec<u8>,
    pub refusals: Vec<(u8, RefusalReason)>,
    pub sms_inds: Vec<SmsEvent>,
    pub sms_stss: Vec<(u16, SmsStatus)>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    /// The `\r\n`-terminated command lines written so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.written_str()
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl HostInterface for RecordingHost {
    fn span_write(&mut self, _span_id: u8, data: &[u8]) -> usize {
        self.written.extend_from_slice(data);
        data.len()
    }

    fn span_status(&mut self, span_id: u8, status: SpanStatus) {
        self.statuses.push((span_id, status));
    }

    fn con_ind(&mut self, _span_id: u8, call_id: u8, event: &ConEvent) {
        self.con_inds.push((call_id, event.clone()));
    }

    fn con_sts(&mut self, _span_id: u8, call_id: u8, status: ConStatus) {
        self.con_stss.push((call_id, status));
    }

    fn rel_ind(&mut self, _span_id: u8, call_id: u8, event: &RelEvent) {
        self.rel_inds.push((call_id, *event));
    }

    fn rel_cfm(&mut self, _span_id: u8, call_id: u8) {
        self.rel_cfms.push(call_id);
    }

    fn con_refused(&mut self, _span_id: u8, call_id: u8, reason: RefusalReason) {
        self.refusals.push((call_id, reason));
    }

    fn sms_ind(&mut self, _span_id: u8, event: &SmsEvent) {
        self.sms_inds.push(event.clone());
    }

    fn sms_sts(&mut self, _span_id: u8, sms_id: u16, status: &SmsStatus) {
        self.sms_stss.push((sms_id, status.clone()));
    }
}
