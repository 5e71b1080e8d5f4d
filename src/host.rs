//! The interface the host application implements.
//!
//! Every method is invoked synchronously from inside an [`Engine`] entry
//! point on the thread that called it; implementations may call back into
//! the engine once the entry point returns, but not re-entrantly.
//!
//! [`Engine`]: crate::Engine

use crate::sms::{SmsEvent, SmsStatus};
use crate::types::{ConEvent, ConStatus, RefusalReason, RelEvent, SpanStatus};

pub trait HostInterface {
    /// Write bytes to the span's transport. Must accept all bytes or report
    /// how many were taken; a short write loses the remainder of the
    /// command and the modem will time it out.
    fn span_write(&mut self, span_id: u8, data: &[u8]) -> usize;

    /// Out-of-band span condition: bring-up finished, signalling status
    /// changed, SIM inventory available, or an alarm.
    fn span_status(&mut self, span_id: u8, status: SpanStatus);

    /// Incoming call. Answer it with `con_cfm`, refuse it with `rel_req`.
    fn con_ind(&mut self, span_id: u8, call_id: u8, event: &ConEvent);

    /// Progress of an outgoing call (remote ringing, remote answered).
    fn con_sts(&mut self, span_id: u8, call_id: u8, status: ConStatus);

    /// The remote side released the call; acknowledge with `rel_cfm`.
    fn rel_ind(&mut self, span_id: u8, call_id: u8, event: &RelEvent);

    /// A locally requested hangup completed.
    fn rel_cfm(&mut self, span_id: u8, call_id: u8);

    /// An outbound call request was refused before anything was dialed.
    fn con_refused(&mut self, span_id: u8, call_id: u8, reason: RefusalReason) {
        let _ = (span_id, call_id, reason);
    }

    /// An SMS arrived.
    fn sms_ind(&mut self, span_id: u8, event: &SmsEvent);

    /// Final disposition of a submitted SMS. Every `sms_req` produces
    /// exactly one of these.
    fn sms_sts(&mut self, span_id: u8, sms_id: u16, status: &SmsStatus);
}
