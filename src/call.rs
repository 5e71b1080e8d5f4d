//! Call state machine and CLCC reconciliation.
//!
//! Incoming calls are born from `+CRING`, identified by `+CLIP` (or a CLCC
//! resync when CLIP never arrives) and answered with `ATA`. Outgoing calls
//! dial with `ATD` and poll `AT+CLCC` until the remote end answers. The
//! modem's call list is authoritative: a local call without a matching list
//! row is terminated.

use embassy_time::Duration;
use heapless::String;

use crate::cmd::{self, ResponseHandler};
use crate::config::debug;
use crate::host::HostInterface;
use crate::sched::{TimerKind, TimerOwner};
use crate::span::Span;
use crate::types::{
    CallSub, CallType, ConEvent, ConStatus, Direction, HangupCause, Number, NumberValidity,
    RelEvent,
};

pub const MAX_CALLS_PER_SPAN: usize = 16;
/// Host-chosen outbound ids start here; lower ids are reserved for
/// incoming allocation.
pub const OUTBOUND_CALL_ID_BASE: u8 = 8;

const TIMEOUT_DIAL: Duration = Duration::from_secs(15);
const TIMEOUT_ANSWER: Duration = Duration::from_secs(30);
const TIMEOUT_HANGUP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CallState {
    Idle,
    /// Call object exists; CRING seen or ATD emitted.
    Dialing,
    /// Identified: CLIP processed or the modem reported the call.
    Dialed,
    /// Remote end is ringing (outgoing only).
    Ringing,
    /// Remote end answered, local confirmation in progress.
    Answered,
    Up,
    /// Remote hangup reported, waiting for the host's release confirm.
    Terminating,
    TerminatingCmpl,
    /// Local hangup requested, `ATH` in progress.
    Hangup,
    HangupCmpl,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Dialing => "DIALING",
            Self::Dialed => "DIALED",
            Self::Ringing => "RINGING",
            Self::Answered => "ANSWERED",
            Self::Up => "UP",
            Self::Terminating => "TERMINATING",
            Self::TerminatingCmpl => "TERMINATING_CMPL",
            Self::Hangup => "HANGUP",
            Self::HangupCmpl => "HANGUP_CMPL",
        }
    }
}

/// One call slot, alive from allocation until a `*_CMPL` state destroys it.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: u8,
    pub dir: Direction,
    pub ty: CallType,
    pub state: CallState,
    pub called_num: Number,
    pub calling_num: Number,
    /// The modem's own id for this call, learned from the CLCC list.
    pub modem_id: Option<u8>,
    /// A CLIP was already processed for this incoming call.
    pub rcv_clip: bool,
}

impl Call {
    fn new(id: u8, dir: Direction) -> Self {
        Self {
            id,
            dir,
            ty: CallType::Voice,
            state: CallState::Idle,
            called_num: Number::default(),
            calling_num: Number::default(),
            modem_id: None,
            rcv_clip: false,
        }
    }
}

/// One row of a `+CLCC` response.
#[derive(Debug, Clone, Copy)]
struct ClccEntry {
    id: u8,
    #[allow(dead_code)]
    dir: u8,
    stat: u8,
}

fn clcc_stat_str(stat: u8) -> &'static str {
    match stat {
        0 => "active",
        1 => "held",
        2 => "dialing",
        3 => "alerting",
        4 => "incoming",
        5 => "waiting",
        _ => "invalid",
    }
}

impl Span {
    /// Allocate a call slot. `call_id` 0 picks the next free id starting
    /// after the last allocation, wrapping and skipping 0.
    pub(crate) fn call_create(&mut self, call_id: u8, dir: Direction) -> crate::error::Result<u8> {
        let id = if call_id != 0 {
            if self.calls[call_id as usize].is_some() {
                return Err(crate::error::Error::Busy);
            }
            call_id
        } else {
            let start = self.last_call_id % (MAX_CALLS_PER_SPAN as u8 - 1) + 1;
            let mut id = start;
            loop {
                if self.calls[id as usize].is_none() {
                    break id;
                }
                id = id % (MAX_CALLS_PER_SPAN as u8 - 1) + 1;
                if id == start {
                    error!("Could not allocate a new call id");
                    return Err(crate::error::Error::OutOfMemory);
                }
            }
        };

        if self.config.debug(debug::CALL_STATE) {
            debug!("[id:{}] Created new {} call", id, dir.as_str());
        }
        self.calls[id as usize] = Some(Call::new(id, dir));
        self.last_call_id = id;
        Ok(id)
    }

    pub(crate) fn call_destroy(&mut self, call_id: u8) {
        self.sched.cancel_by_owner(TimerOwner::Call(call_id));
        if self.calls[call_id as usize].take().is_none() {
            error!("[id:{}] Could not find call to destroy", call_id);
        } else if self.config.debug(debug::CALL_STATE) {
            debug!("[id:{}] Destroyed call", call_id);
        }
    }

    pub(crate) fn call(&self, call_id: u8) -> Option<&Call> {
        self.calls.get(call_id as usize).and_then(|c| c.as_ref())
    }

    pub(crate) fn call_mut(&mut self, call_id: u8) -> Option<&mut Call> {
        self.calls.get_mut(call_id as usize).and_then(|c| c.as_mut())
    }

    pub(crate) fn call_by_state(&self, state: CallState) -> Option<u8> {
        self.calls
            .iter()
            .flatten()
            .find(|c| c.state == state)
            .map(|c| c.id)
    }

    pub(crate) fn call_set_state<H: HostInterface>(
        &mut self,
        host: &mut H,
        call_id: u8,
        new_state: CallState,
    ) {
        let trace_states = self.config.debug(debug::CALL_STATE);
        let Some(call) = self.call_mut(call_id) else {
            error!("[id:{}] No such call for state change", call_id);
            return;
        };
        if trace_states {
            debug!(
                "[id:{}] Call state change from {} to {}",
                call_id,
                call.state.as_str(),
                new_state.as_str()
            );
        }
        call.state = new_state;
        let dir = call.dir;

        match new_state {
            CallState::Idle => {}
            CallState::Dialing => match dir {
                Direction::Incoming => {
                    // A CLIP may or may not follow the CRING; resync with
                    // the call list if it never shows up.
                    let timeout = self.config.timeout_cid_num;
                    self.arm_timer(
                        "clip_timeout",
                        timeout,
                        TimerKind::ClipTimeout { call_id },
                        TimerOwner::Call(call_id),
                    );
                }
                Direction::Outgoing => {
                    let digits = self.call(call_id).unwrap().called_num.digits.clone();
                    let mut atd = String::<{ cmd::MAX_CMD_SZ }>::new();
                    use core::fmt::Write;
                    if write!(atd, "ATD{};", digits).is_err() {
                        self.call_set_state(host, call_id, CallState::Terminating);
                        return;
                    }
                    self.enqueue_cmd(&atd, ResponseHandler::Dial { call_id }, TIMEOUT_DIAL);
                    self.arm_progress_monitor(call_id);
                }
            },
            CallState::Dialed => {
                if dir == Direction::Incoming {
                    let call = self.call(call_id).unwrap();
                    let event = ConEvent {
                        ty: call.ty,
                        sub: CallSub::Real,
                        called_num: Number::default(),
                        calling_num: call.calling_num.clone(),
                        calling_name: String::new(),
                    };
                    host.con_ind(self.id, call_id, &event);
                }
            }
            CallState::Ringing => {
                host.con_sts(self.id, call_id, ConStatus::Ringing);
            }
            CallState::Answered => match dir {
                Direction::Incoming => {
                    self.enqueue_cmd("ATA", ResponseHandler::Answer { call_id }, TIMEOUT_ANSWER);
                }
                Direction::Outgoing => {
                    host.con_sts(self.id, call_id, ConStatus::Answer);
                    self.call_set_state(host, call_id, CallState::Up);
                }
            },
            CallState::Up => {}
            CallState::Terminating => {
                let event = RelEvent {
                    cause: HangupCause::Normal,
                };
                host.rel_ind(self.id, call_id, &event);
            }
            CallState::TerminatingCmpl => {
                self.call_destroy(call_id);
            }
            CallState::Hangup => {
                self.enqueue_cmd("ATH", ResponseHandler::Hangup { call_id }, TIMEOUT_HANGUP);
            }
            CallState::HangupCmpl => {
                host.rel_cfm(self.id, call_id);
                self.call_destroy(call_id);
            }
        }
    }

    pub(crate) fn arm_progress_monitor(&mut self, call_id: u8) {
        let interval = self.config.progress_poll_interval;
        self.arm_timer(
            "progress_monitor",
            interval,
            TimerKind::ProgressMonitor { call_id },
            TimerOwner::Call(call_id),
        );
    }

    /// `+CRING: <type>` — allocate the incoming call unless one is already
    /// being set up.
    pub(crate) fn handle_cring<H: HostInterface>(&mut self, host: &mut H, payload: &str) {
        debug!("Incoming CRING: {}", payload);

        // Only one incoming call can be in setup at a time; repeated CRINGs
        // for it are expected.
        if self.call_by_state(CallState::Dialing).is_some()
            || self.call_by_state(CallState::Dialed).is_some()
        {
            return;
        }

        let call_id = match self.call_create(0, Direction::Incoming) {
            Ok(id) => id,
            Err(_) => {
                error!("Failed to create new call");
                return;
            }
        };
        let ty = CallType::from_ring_type(payload.trim());
        self.call_mut(call_id).unwrap().ty = ty;
        debug!("[id:{}] Call type {}", call_id, ty.as_str());

        self.call_set_state(host, call_id, CallState::Dialing);
    }

    /// `+CLIP: <number>,<type>,...,<validity>` — attach the calling number
    /// to the call born from CRING and present it to the host.
    pub(crate) fn handle_clip<H: HostInterface>(&mut self, host: &mut H, payload: &str) {
        debug!("Incoming CLIP: {}", payload);

        if let Some(call_id) = self.call_by_state(CallState::Dialed) {
            let call = self.call(call_id).unwrap();
            if call.dir == Direction::Incoming && !call.rcv_clip {
                // Too late, the host was already notified off the call list.
                error!("Received CLIP after CLIP timeout");
            }
            return;
        }

        let Some(call_id) = self.call_by_state(CallState::Dialing) else {
            error!("Received CLIP without CRING");
            return;
        };
        if !self.clip {
            debug!("CLIP delivered before presentation was acknowledged");
        }
        if self.call(call_id).unwrap().rcv_clip {
            return;
        }

        let fields = cmd::split_fields(payload);
        if fields.is_empty() {
            error!("Failed to parse CLIP entry: {}", payload);
            return;
        }

        let mut calling = Number::new(cmd::unquote(fields[0]));
        if calling.digits.is_empty() {
            debug!("Calling number not available");
        }
        if let Some(toa) = fields.get(1).and_then(|f| f.parse::<u8>().ok()) {
            calling.apply_type_of_address(toa);
        }
        if let Some(validity) = fields.get(5).and_then(|f| f.parse::<u8>().ok()) {
            calling.validity = match validity {
                0 => NumberValidity::Valid,
                1 => NumberValidity::Withheld,
                2 => NumberValidity::Unavailable,
                _ => {
                    error!("Invalid number validity from CLIP: {}", payload);
                    NumberValidity::Invalid
                }
            };
        }

        debug!(
            "Calling number {} type:{} plan:{} validity:{}",
            calling.digits,
            calling.ty.as_str(),
            calling.plan.as_str(),
            calling.validity.as_str()
        );

        {
            let call = self.call_mut(call_id).unwrap();
            call.rcv_clip = true;
            call.calling_num = calling;
        }
        // The identity is complete; no need for the call-list resync.
        self.sched.cancel_by_owner(TimerOwner::Call(call_id));
        self.call_set_state(host, call_id, CallState::Dialed);
    }

    /// Reconcile every local call against a full `+CLCC` response.
    pub(crate) fn handle_clcc_response<H: HostInterface>(
        &mut self,
        host: &mut H,
        tokens: &[crate::tokenizer::Token],
    ) {
        let mut entries: heapless::Vec<ClccEntry, 10> = heapless::Vec::new();

        for token in tokens {
            if cmd::check_terminator(token).is_some() {
                break;
            }
            let Some(payload) = cmd::strip_prefix_ci(token, "+CLCC") else {
                continue;
            };
            let fields = cmd::split_fields(payload);
            if fields.len() < 3 {
                error!("Failed to parse CLCC entry: {}", token.as_str());
                continue;
            }
            let (Ok(id), Ok(dir), Ok(stat)) = (
                fields[0].parse::<u8>(),
                fields[1].parse::<u8>(),
                fields[2].parse::<u8>(),
            ) else {
                error!("Failed to parse CLCC entry: {}", token.as_str());
                continue;
            };
            if id == 0 {
                error!("Failed to parse call id from CLCC entry: {}", token.as_str());
                continue;
            }
            debug!("CLCC entry (id:{} dir:{} stat:{})", id, dir, clcc_stat_str(stat));
            let _ = entries.push(ClccEntry { id, dir, stat });
        }

        let call_ids: heapless::Vec<u8, MAX_CALLS_PER_SPAN> =
            self.calls.iter().flatten().map(|c| c.id).collect();

        for call_id in call_ids {
            let Some(call) = self.call(call_id) else { continue };
            let state = call.state;
            let dir = call.dir;
            let modem_id = call.modem_id;
            let mut matched = false;

            match state {
                CallState::Dialing if dir == Direction::Incoming => {
                    if let Some(entry) = entries.iter().find(|e| e.stat == 4) {
                        self.call_mut(call_id).unwrap().modem_id = Some(entry.id);
                        debug!("[id:{}] module call (modid:{})", call_id, entry.id);
                        self.call_set_state(host, call_id, CallState::Dialed);
                        matched = true;
                    }
                }
                CallState::Dialing => {
                    for entry in entries.iter().copied() {
                        match entry.stat {
                            2 | 3 => {
                                self.call_mut(call_id).unwrap().modem_id = Some(entry.id);
                                debug!("[id:{}] module call (modid:{})", call_id, entry.id);
                                let next = if entry.stat == 2 {
                                    CallState::Dialed
                                } else {
                                    CallState::Ringing
                                };
                                self.call_set_state(host, call_id, next);
                                self.arm_progress_monitor(call_id);
                                matched = true;
                            }
                            0 => {
                                self.call_mut(call_id).unwrap().modem_id = Some(entry.id);
                                self.call_set_state(host, call_id, CallState::Answered);
                                matched = true;
                            }
                            _ => {}
                        }
                        if matched {
                            break;
                        }
                    }
                }
                CallState::Dialed if dir == Direction::Incoming => {
                    if let Some(entry) = entries.iter().find(|e| e.stat == 4) {
                        if self.call(call_id).unwrap().modem_id.is_none() {
                            self.call_mut(call_id).unwrap().modem_id = Some(entry.id);
                        }
                        matched = true;
                    }
                }
                CallState::Dialed => {
                    for entry in entries.iter().copied() {
                        match entry.stat {
                            2 => {
                                self.arm_progress_monitor(call_id);
                                matched = true;
                            }
                            3 => {
                                self.call_set_state(host, call_id, CallState::Ringing);
                                self.arm_progress_monitor(call_id);
                                matched = true;
                            }
                            0 => {
                                self.call_set_state(host, call_id, CallState::Answered);
                                matched = true;
                            }
                            _ => {}
                        }
                        if matched {
                            break;
                        }
                    }
                }
                CallState::Ringing => {
                    for entry in entries.iter().copied() {
                        match entry.stat {
                            3 => {
                                self.arm_progress_monitor(call_id);
                                matched = true;
                            }
                            0 => {
                                self.call_set_state(host, call_id, CallState::Answered);
                                matched = true;
                            }
                            _ => {}
                        }
                        if matched {
                            break;
                        }
                    }
                }
                _ => {
                    if let Some(modem_id) = modem_id {
                        if entries.iter().any(|e| e.id == modem_id) {
                            debug!("[id:{}] Matched call in CLCC entry (modid:{})", call_id, modem_id);
                            matched = true;
                        }
                    }
                }
            }

            if !matched {
                if self.config.debug(debug::CALL_STATE) {
                    debug!("[id:{}] No CLCC entries for call, hanging up", call_id);
                }
                // A state machine in progress toward destruction stays there.
                if !matches!(
                    self.call(call_id).map(|c| c.state),
                    Some(CallState::Terminating) | None
                ) {
                    self.call_set_state(host, call_id, CallState::Terminating);
                }
            }
        }
    }

    /// Dial/answer/hangup command completions.
    pub(crate) fn handle_dial_response<H: HostInterface>(
        &mut self,
        _host: &mut H,
        call_id: u8,
        success: bool,
    ) {
        if !success {
            error!("[id:{}] Failed to make outbound call", call_id);
            self.enqueue_clcc();
        }
    }

    pub(crate) fn handle_answer_response<H: HostInterface>(
        &mut self,
        host: &mut H,
        call_id: u8,
        success: bool,
    ) {
        if success {
            self.call_set_state(host, call_id, CallState::Up);
        } else {
            info!("[id:{}] Failed to answer call", call_id);
            self.enqueue_clcc();
        }
    }

    pub(crate) fn handle_hangup_response<H: HostInterface>(
        &mut self,
        host: &mut H,
        call_id: u8,
        success: bool,
    ) {
        if success {
            self.call_set_state(host, call_id, CallState::HangupCmpl);
        } else {
            error!("[id:{}] Failed to hangup call", call_id);
            self.enqueue_clcc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpanConfig;
    use crate::error::Error;
    use crate::modules::ModuleKind;
    use crate::span::Span;

    fn span() -> Span {
        Span::new(1, SpanConfig::new(ModuleKind::Telit))
    }

    #[test]
    fn explicit_id_allocation_reports_busy() {
        let mut span = span();
        assert_eq!(span.call_create(8, Direction::Outgoing).unwrap(), 8);
        assert_eq!(span.call_create(8, Direction::Outgoing), Err(Error::Busy));
        assert_eq!(span.call(8).unwrap().id, 8);
    }

    #[test]
    fn auto_allocation_scans_forward_and_wraps() {
        let mut span = span();
        assert_eq!(span.call_create(0, Direction::Incoming).unwrap(), 1);
        assert_eq!(span.call_create(0, Direction::Incoming).unwrap(), 2);

        span.call_destroy(1);
        // The scan resumes after the last allocation instead of reusing 1.
        assert_eq!(span.call_create(0, Direction::Incoming).unwrap(), 3);

        // Fill the remaining slots: 4..=15 first, then the wrap picks up 1.
        let mut granted = heapless::Vec::<u8, MAX_CALLS_PER_SPAN>::new();
        while let Ok(id) = span.call_create(0, Direction::Incoming) {
            granted.push(id).unwrap();
        }
        assert_eq!(granted.len(), 13);
        assert_eq!(*granted.last().unwrap(), 1);
        assert_eq!(
            span.call_create(0, Direction::Incoming),
            Err(Error::OutOfMemory)
        );
    }

    #[test]
    fn destroy_clears_slot_and_owned_timers() {
        let mut span = span();
        let id = span.call_create(0, Direction::Incoming).unwrap();
        span.arm_timer(
            "clip_timeout",
            Duration::from_secs(3600),
            TimerKind::ClipTimeout { call_id: id },
            TimerOwner::Call(id),
        );
        assert!(!span.sched.is_idle());

        span.call_destroy(id);
        assert!(span.call(id).is_none());
        assert!(span.sched.is_idle());
    }

    #[test]
    fn lookup_by_state() {
        let mut span = span();
        let id = span.call_create(0, Direction::Incoming).unwrap();
        assert_eq!(span.call_by_state(CallState::Idle), Some(id));
        span.call_mut(id).unwrap().state = CallState::Dialing;
        assert_eq!(span.call_by_state(CallState::Idle), None);
        assert_eq!(span.call_by_state(CallState::Dialing), Some(id));
    }
}
