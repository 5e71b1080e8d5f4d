//! The per-span engine: lifecycle, run loop and response/notification
//! dispatch.
//!
//! A span is driven by three host entry points: bytes in (`process_read`),
//! one cooperative tick (`run`) and the wakeup query (`schedule_next`).
//! Inside a tick the engine drains host events into state machine
//! transitions, puts the next queued command on the wire, classifies every
//! complete line from the receive buffer and fires expired timers.

use embassy_time::Duration;
use heapless::{Deque, String, Vec};

use crate::buffer::{RxBuffer, BUFFER_SZ};
use crate::call::{Call, CallState, MAX_CALLS_PER_SPAN};
use crate::cmd::{self, AtCmd, CmdQueue, NotifyKind, NotifyTable, ResponseHandler};
use crate::config::{debug, SpanConfig};
use crate::error::{Error, Result};
use crate::host::HostInterface;
use crate::modules::{ChipOps, Module};
use crate::registration::{rssi_to_dbm, NetInfo, NetStatus};
use crate::sched::{Scheduler, TimerKind, TimerOwner};
use crate::sms::{Sms, SmsState, MAX_SMSS_PER_SPAN};
use crate::tokenizer::{tokenize, Token};
use crate::types::{Alarm, ConEvent, Direction, RefusalReason, SigStatus, SpanStatus};

pub const EVENT_QUEUE_SZ: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpanState {
    Down,
    /// Chip specific initialization procedure running.
    Init,
    /// Ready to process call and SMS requests.
    Ready,
    Shutdown,
}

impl SpanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::Init => "INIT",
            Self::Ready => "READY",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

/// Host requests queued by the API entry points and drained inside `run`.
#[derive(Debug, Clone)]
pub enum Event {
    ConReq { call_id: u8, event: ConEvent },
    ConCfm { call_id: u8 },
    RelReq { call_id: u8 },
    RelCfm { call_id: u8 },
}

impl Event {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ConReq { .. } => "con_req",
            Self::ConCfm { .. } => "con_cfm",
            Self::RelReq { .. } => "rel_req",
            Self::RelCfm { .. } => "rel_cfm",
        }
    }
}

/// Device inventory gathered during bring-up.
#[derive(Debug, Default, Clone)]
pub struct ChipInfo {
    pub manufacturer: String<32>,
    pub model: String<32>,
    pub firmware: String<32>,
    pub imei: String<24>,
    pub imsi: String<24>,
    pub subscriber_number: String<32>,
    pub smsc: crate::types::Number,
}

struct InFlight {
    cmd: AtCmd,
    timer_id: u64,
}

enum NotifyOutcome {
    /// `n` tokens were consumed starting at the current position.
    Handled(usize),
    /// Possibly an incomplete response; leave the window alone.
    NeedsMore,
}

pub struct Span {
    pub(crate) id: u8,
    pub(crate) config: SpanConfig,
    pub(crate) module: Module,
    pub(crate) state: SpanState,
    pub(crate) running: bool,

    pub(crate) buffer: RxBuffer,
    pub(crate) events: Deque<Event, EVENT_QUEUE_SZ>,
    pub(crate) cmds: CmdQueue,
    in_flight: Option<InFlight>,
    pub(crate) sched: Scheduler,
    pub(crate) notifys: NotifyTable,

    pub(crate) calls: [Option<Call>; MAX_CALLS_PER_SPAN],
    pub(crate) last_call_id: u8,

    pub(crate) smss: [Option<Sms>; MAX_SMSS_PER_SPAN],
    pub(crate) sms_queue: Deque<u16, MAX_SMSS_PER_SPAN>,
    pub(crate) outbound_sms: Option<u16>,
    pub(crate) sms_awaiting_prompt: bool,

    /// Scheduler id of the pending-window flush timer, 0 when unarmed.
    stale_timer: u64,

    pub(crate) sigstatus: SigStatus,
    pub(crate) net_info: NetInfo,
    pub(crate) chip_info: ChipInfo,
    pub(crate) clip: bool,
}

impl Span {
    pub(crate) fn new(id: u8, config: SpanConfig) -> Self {
        Self {
            id,
            module: Module::from_kind(config.module),
            config,
            state: SpanState::Down,
            running: false,
            buffer: RxBuffer::new(),
            events: Deque::new(),
            cmds: CmdQueue::new(),
            in_flight: None,
            sched: Scheduler::new(),
            notifys: NotifyTable::new(),
            calls: core::array::from_fn(|_| None),
            last_call_id: 0,
            smss: core::array::from_fn(|_| None),
            sms_queue: Deque::new(),
            outbound_sms: None,
            sms_awaiting_prompt: false,
            stale_timer: 0,
            sigstatus: SigStatus::Down,
            net_info: NetInfo::default(),
            chip_info: ChipInfo::default(),
            clip: false,
        }
    }

    pub(crate) fn set_state(&mut self, new_state: SpanState) {
        debug!(
            "Changing span state from {} to {}",
            self.state.as_str(),
            new_state.as_str()
        );
        self.state = new_state;
    }

    // ---------------------------------------------------------- lifecycle

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.running {
            error!("Span was already started");
            return Err(Error::Fail);
        }
        debug!("Starting span {} ({} module)", self.id, self.module.name());

        self.running = true;
        self.set_state(SpanState::Init);
        self.calls = core::array::from_fn(|_| None);
        self.smss = core::array::from_fn(|_| None);
        self.sms_queue = Deque::new();
        self.outbound_sms = None;
        self.sms_awaiting_prompt = false;
        self.notifys = NotifyTable::new();
        self.net_info = NetInfo::default();
        self.sigstatus = SigStatus::Down;
        self.buffer.reset();

        self.register_notify("+CRING", NotifyKind::Cring)?;
        // Extended format reporting (AT+CRC) should suppress plain RING,
        // but register it just in case.
        self.register_notify("+RING", NotifyKind::Ring)?;
        self.register_notify("+CLIP", NotifyKind::Clip)?;
        self.register_notify("+CREG", NotifyKind::Creg)?;
        // Registered with the colon so `+CMT` cannot shadow `+CMTI`.
        self.register_notify("+CMT:", NotifyKind::SmsDeliver)?;
        self.register_notify("+CMTI:", NotifyKind::SmsWaiting)?;

        let module = self.module;
        if module.flags() != 0 {
            debug!("Module quirk flags {}", module.flags());
        }
        module.start(self)?;
        module.wait_sim(self)?;

        // Generic bring-up, identical for every chip.
        self.enqueue_cmd_default("ATX4", ResponseHandler::None);
        // Mobile equipment error reporting, numeric mode.
        self.enqueue_cmd_default("AT+CMEE=1", ResponseHandler::None);
        // Extended format reporting.
        self.enqueue_cmd_default("AT+CRC=1", ResponseHandler::None);
        self.enqueue_cmd_default("AT+CGMM", ResponseHandler::Model);
        self.enqueue_cmd_default("AT+CGMI", ResponseHandler::Manufacturer);
        self.enqueue_cmd_default("AT+CGMR", ResponseHandler::Revision);
        self.enqueue_cmd_default("AT+CGSN", ResponseHandler::SerialNumber);
        self.enqueue_cmd_default("AT+CIMI", ResponseHandler::Imsi);
        self.enqueue_cmd_default("AT+CLIP=1", ResponseHandler::ClipEnable);
        // New message indications to the terminal.
        self.enqueue_cmd_default("AT+CNMI=2,1", ResponseHandler::ExpectOk("enable new message indications"));
        self.enqueue_cmd_default("AT+COPS=3,0", ResponseHandler::ExpectOk("set operator format"));
        self.enqueue_cmd_default("AT+CNUM", ResponseHandler::SubscriberNumber);
        self.enqueue_cmd_default("AT+CSCA?", ResponseHandler::Smsc);
        self.enqueue_cmd_default("AT+CSQ", ResponseHandler::SignalQuality);
        // Unsolicited registration reports, then the current status in case
        // the module is already registered.
        self.enqueue_cmd_default("AT+CREG=1", ResponseHandler::None);
        self.enqueue_cmd_default("AT+CREG?", ResponseHandler::Creg);

        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        if !self.running {
            error!("Span was not running");
            return Err(Error::Fail);
        }
        self.set_state(SpanState::Shutdown);

        let module = self.module;
        if module.shutdown(self).is_err() {
            warn!("Module shutdown incomplete");
        }

        self.sched.clear();
        self.stale_timer = 0;
        self.cmds.clear();
        self.events = Deque::new();
        self.in_flight = None;
        self.notifys = NotifyTable::new();
        self.buffer.reset();
        self.calls = core::array::from_fn(|_| None);
        self.smss = core::array::from_fn(|_| None);
        self.sms_queue = Deque::new();
        self.outbound_sms = None;
        self.sms_awaiting_prompt = false;

        self.running = false;
        self.set_state(SpanState::Down);
        Ok(())
    }

    // ------------------------------------------------------------ helpers

    pub(crate) fn register_notify(&mut self, prefix: &str, kind: NotifyKind) -> Result<()> {
        cmd::register_notify(&mut self.notifys, prefix, kind)
    }

    pub(crate) fn enqueue_cmd(&mut self, command: &str, handler: ResponseHandler, timeout: Duration) {
        if self.config.debug(debug::AT_HANDLE) {
            debug!("Enqueued command \"{}\"", command);
        }
        let cmd = match AtCmd::new(command, handler, timeout) {
            Ok(cmd) => cmd,
            Err(_) => {
                error!("Invalid cmd to enqueue \"{}\"", command);
                return;
            }
        };
        if self.cmds.push(cmd).is_err() {
            // The queue is sized for every legal burst; overflow means the
            // engine is looping on itself.
            error!("Command queue full, dropping \"{}\"", command);
        }
    }

    pub(crate) fn enqueue_cmd_default(&mut self, command: &str, handler: ResponseHandler) {
        self.enqueue_cmd(command, handler, self.config.timeout_command);
    }

    pub(crate) fn enqueue_clcc(&mut self) {
        self.enqueue_cmd_default("AT+CLCC", ResponseHandler::CallList);
    }

    pub(crate) fn arm_timer(
        &mut self,
        name: &'static str,
        delay: Duration,
        kind: TimerKind,
        owner: TimerOwner,
    ) -> u64 {
        match self.sched.arm(name, delay, kind, owner) {
            Ok(id) => id,
            Err(_) => {
                error!("Failed to arm timer {}", name);
                0
            }
        }
    }

    pub(crate) fn raw_write<H: HostInterface>(&mut self, host: &mut H, data: &[u8]) {
        if self.config.debug(debug::UART_RAW) {
            debug!("[TX RAW] {} bytes", data.len());
        }
        let written = host.span_write(self.id, data);
        if written < data.len() {
            error!("Transport short write ({}/{})", written, data.len());
        }
    }

    pub(crate) fn sms(&self, sms_id: u16) -> Option<&Sms> {
        self.smss.get(sms_id as usize).and_then(|s| s.as_ref())
    }

    pub(crate) fn sms_mut(&mut self, sms_id: u16) -> Option<&mut Sms> {
        self.smss.get_mut(sms_id as usize).and_then(|s| s.as_mut())
    }

    pub(crate) fn sms_destroy(&mut self, sms_id: u16) {
        if let Some(slot) = self.smss.get_mut(sms_id as usize) {
            *slot = None;
        }
    }

    // ----------------------------------------------------------- run loop

    pub(crate) fn process_read(&self, data: &[u8]) -> Result<()> {
        if self.config.debug(debug::UART_RAW) {
            debug!("[RX RAW] {} bytes", data.len());
        }
        self.buffer.enqueue(data).map_err(|e| {
            error!("Failed to enqueue read bytes, discarding chunk");
            e
        })
    }

    pub(crate) fn run<H: HostInterface>(&mut self, host: &mut H) {
        self.run_events(host);
        self.run_sms_queue(host);
        self.emit_next_cmd(host);
        self.process_buffer(host);
        self.run_timers(host);
    }

    pub(crate) fn schedule_next(&self) -> i64 {
        if !self.running {
            return -1;
        }
        if self.in_flight.is_some() || !self.cmds.is_empty() || !self.events.is_empty() {
            return 0;
        }
        match self.sched.time_to_next() {
            Some(ms) => ms as i64,
            None => -1,
        }
    }

    fn run_events<H: HostInterface>(&mut self, host: &mut H) {
        while let Some(event) = self.events.pop_front() {
            debug!("Processing event \"{}\"", event.as_str());
            match event {
                Event::ConReq { call_id, event } => {
                    match self.call_create(call_id, Direction::Outgoing) {
                        Ok(id) => {
                            {
                                let call = self.call_mut(id).unwrap();
                                call.ty = event.ty;
                                call.called_num = event.called_num;
                            }
                            self.call_set_state(host, id, CallState::Dialing);
                        }
                        Err(Error::Busy) => {
                            error!("[id:{}] Call with this ID already exists", call_id);
                            host.con_refused(self.id, call_id, RefusalReason::CallIdInUse);
                        }
                        Err(_) => {
                            error!("[id:{}] Failed to allocate new call", call_id);
                            host.con_refused(self.id, call_id, RefusalReason::NoFreeSlot);
                        }
                    }
                }
                Event::ConCfm { call_id } => {
                    if self.call(call_id).is_some() {
                        self.call_set_state(host, call_id, CallState::Answered);
                    } else {
                        error!("[id:{}] Failed to find call", call_id);
                    }
                }
                Event::RelReq { call_id } => {
                    if self.call(call_id).is_some() {
                        self.call_set_state(host, call_id, CallState::Hangup);
                    } else {
                        error!("[id:{}] Failed to find call", call_id);
                    }
                }
                Event::RelCfm { call_id } => {
                    if self.call(call_id).is_some() {
                        self.call_set_state(host, call_id, CallState::TerminatingCmpl);
                    } else {
                        error!("[id:{}] Failed to find call", call_id);
                    }
                }
            }
        }
    }

    /// Advance the head of the SMS queue once the previous send completed.
    fn run_sms_queue<H: HostInterface>(&mut self, host: &mut H) {
        if self.outbound_sms.is_some() {
            return;
        }
        if let Some(next) = self.sms_queue.pop_front() {
            self.sms_set_state(host, next, SmsState::Start);
        }
    }

    fn emit_next_cmd<H: HostInterface>(&mut self, host: &mut H) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(cmd) = self.cmds.pop() else { return };

        if self.config.debug(debug::UART_DUMP) {
            debug!("[TX AT] {}", cmd.cmd);
        }

        let mut wire = Vec::<u8, { cmd::MAX_CMD_SZ + 2 }>::new();
        let _ = wire.extend_from_slice(cmd.cmd.as_bytes());
        let _ = wire.extend_from_slice(b"\r\n");
        self.raw_write(host, &wire);

        let timer_id = self.arm_timer(
            "command_timeout",
            cmd.timeout,
            TimerKind::CommandTimeout,
            TimerOwner::Span,
        );
        self.in_flight = Some(InFlight { cmd, timer_id });
    }

    /// The `>` prompt of the two-prompt SMS send arrives without a line
    /// terminator, so it is matched on raw bytes before tokenizing.
    fn check_sms_prompt<H: HostInterface>(&mut self, host: &mut H) {
        let Some(sms_id) = self.outbound_sms else { return };
        let mut window = [0u8; BUFFER_SZ];
        let Ok(len) = self.buffer.peek(&mut window) else { return };

        if let Some(pos) = window[..len].iter().position(|&b| b == b'>') {
            let mut consumed = pos + 1;
            if window.get(consumed) == Some(&b' ') {
                consumed += 1;
            }
            let _ = self.buffer.flush(consumed);
            self.sms_awaiting_prompt = false;
            self.sms_set_state(host, sms_id, SmsState::SendBody);
        }
    }

    fn process_buffer<H: HostInterface>(&mut self, host: &mut H) {
        if self.sms_awaiting_prompt {
            self.check_sms_prompt(host);
        }

        let mut window = [0u8; BUFFER_SZ];
        let Ok(len) = self.buffer.peek(&mut window) else { return };

        if self.config.debug(debug::UART_DUMP) {
            debug!("[RX AT] {} bytes", len);
        }

        let tokenized = match tokenize(&window[..len]) {
            Ok(Some(t)) => t,
            Ok(None) => return,
            Err(_) => {
                // A line beyond the token bounds cannot ever complete;
                // drop the window and resynchronize on the next line.
                error!("Unparseable receive window, flushing {} bytes", len);
                let _ = self.buffer.flush(len);
                return;
            }
        };
        let tokens = tokenized.tokens;
        let consumed = tokenized.consumed;

        if self.config.debug(debug::AT_PARSE) {
            debug!("Decoded {} tokens, consumed {} of {}", tokens.len(), consumed, len);
        }

        let mut handled_any = false;
        let mut needs_more = false;
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            let mut handled = false;

            if let Some(success) = cmd::check_terminator(token) {
                if self.in_flight.is_some() {
                    // Single token response, or the tail of a multi line
                    // response whose body tokens are still in the window.
                    self.complete_in_flight(host, &tokens[..=i], success);
                    handled = true;
                } else if !success {
                    // A failure terminator with nothing in flight is a
                    // remote hangup; reconcile with the call list.
                    self.enqueue_clcc();
                    handled = true;
                }
            } else if i + 1 < tokens.len()
                && cmd::check_terminator(&tokens[i + 1]).is_some()
                && self.in_flight.is_some()
            {
                let success = cmd::check_terminator(&tokens[i + 1]).unwrap();
                self.complete_in_flight(host, &tokens[..=i + 1], success);
                i += 1;
                handled = true;
            }

            if !handled {
                if token.starts_with('+') || token.starts_with('#') {
                    match self.dispatch_notify(host, &tokens, i) {
                        NotifyOutcome::Handled(n) => {
                            i += n - 1;
                            handled = true;
                        }
                        NotifyOutcome::NeedsMore => {
                            // Could be the body of a response whose
                            // terminator has not arrived; keep it buffered.
                            needs_more = true;
                            i += 1;
                            continue;
                        }
                    }
                } else if self.in_flight.is_some() {
                    // Partial response body, wait for the terminator.
                    i += 1;
                    continue;
                } else {
                    debug!("Failed to parse AT token \"{}\"", token.as_str());
                    handled = true;
                }
            }

            if handled {
                handled_any = true;
            }
            i += 1;
        }

        if handled_any {
            let _ = self.buffer.flush(consumed);
            if self.stale_timer != 0 {
                let _ = self.sched.cancel(self.stale_timer);
                self.stale_timer = 0;
            }
        } else if needs_more && self.in_flight.is_none() && self.stale_timer == 0 {
            // Unclaimed tokens with no command in flight: give a possible
            // continuation one command timeout to arrive, then flush.
            let timeout = self.config.timeout_command;
            self.stale_timer = self.arm_timer(
                "stale_pending",
                timeout,
                TimerKind::StalePending,
                TimerOwner::Span,
            );
        }
    }

    fn complete_in_flight<H: HostInterface>(
        &mut self,
        host: &mut H,
        tokens: &[Token],
        success: bool,
    ) {
        let Some(in_flight) = self.in_flight.take() else {
            error!("No command was pending");
            return;
        };
        let _ = self.sched.cancel(in_flight.timer_id);

        if self.config.debug(debug::AT_HANDLE) {
            debug!("Handling response for cmd {}", in_flight.cmd.cmd);
        }
        self.handle_response(host, in_flight.cmd.handler, tokens, success);
    }

    /// First body line of a completed response, when there is one.
    fn body_token<'t>(&self, tokens: &'t [Token]) -> Option<&'t Token> {
        (tokens.len() > 1).then(|| &tokens[0])
    }

    fn handle_response<H: HostInterface>(
        &mut self,
        host: &mut H,
        handler: ResponseHandler,
        tokens: &[Token],
        success: bool,
    ) {
        match handler {
            ResponseHandler::None => {}
            ResponseHandler::ExpectOk(what) => {
                if !success {
                    error!("Failed to {}", what);
                }
            }
            ResponseHandler::Model => {
                if !success {
                    error!("Failed to obtain module model");
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    self.chip_info.model = truncated(body);
                }
            }
            ResponseHandler::Manufacturer => {
                if !success {
                    error!("Failed to obtain module manufacturer id");
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    self.chip_info.manufacturer = truncated(body);
                }
            }
            ResponseHandler::Revision => {
                if !success {
                    error!("Failed to obtain module revision identification");
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    let text = body.trim();
                    let text = text.strip_prefix("Revision:").unwrap_or(text).trim_start();
                    self.chip_info.firmware = truncated(text);
                }
            }
            ResponseHandler::SerialNumber => {
                if !success {
                    error!("Failed to obtain module serial number");
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    self.chip_info.imei = truncated(body);
                }
            }
            ResponseHandler::Imsi => {
                if !success {
                    error!("Failed to obtain subscriber identity");
                    host.span_status(self.id, SpanStatus::Alarm(Alarm::NoSim));
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    self.chip_info.imsi = truncated(body);
                }
            }
            ResponseHandler::SubscriberNumber => {
                if !success {
                    error!("Failed to obtain own number");
                    return;
                }
                if tokens.len() < 2 {
                    // Single token response: no MSISDN on this SIM.
                    self.chip_info.subscriber_number = truncated("Not available");
                } else {
                    // +CNUM: "TELEPHONE","+16473380980",145,7,4
                    let body = tokens[0].clone();
                    let payload = cmd::strip_prefix_ci(&body, "+CNUM").unwrap_or(&body);
                    let fields = cmd::split_fields(payload);
                    let number = fields.get(1).or(fields.first()).copied().unwrap_or("");
                    self.chip_info.subscriber_number = truncated(cmd::unquote(number));
                }
                host.span_status(self.id, SpanStatus::SimInfoReady);
            }
            ResponseHandler::Smsc => {
                if !success {
                    error!("Failed to obtain SMSC address");
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    let body = body.clone();
                    if let Some(payload) = cmd::strip_prefix_ci(&body, "+CSCA") {
                        let fields = cmd::split_fields(payload);
                        if let Some(digits) = fields.first() {
                            let mut smsc = crate::types::Number::new(cmd::unquote(digits));
                            if let Some(toa) = fields.get(1).and_then(|f| f.parse::<u8>().ok()) {
                                smsc.apply_type_of_address(toa);
                            }
                            self.chip_info.smsc = smsc;
                        }
                    }
                }
            }
            ResponseHandler::ClipEnable => {
                if !success {
                    self.clip = false;
                    error!("Failed to enable calling line presentation");
                    return;
                }
                self.clip = true;
            }
            ResponseHandler::Creg => {
                if !success {
                    error!("Failed to obtain network registration report");
                    return;
                }
                if let Some(body) = self.body_token(tokens) {
                    let body = body.clone();
                    let payload = cmd::strip_prefix_ci(&body, "+CREG").unwrap_or(&body);
                    let fields = cmd::split_fields(payload);
                    // <mode>,<stat>[,<lac>,<ci>]
                    match fields.len() {
                        2 | 4 => {
                            if fields.len() == 4 {
                                self.net_info.lac = parse_hex_field(fields[2]);
                                self.net_info.ci = parse_hex_field(fields[3]);
                            }
                            if let Ok(stat) = fields[1].parse::<u8>() {
                                self.update_net_status(host, stat);
                            }
                        }
                        _ => {
                            error!("Failed to parse CREG response {}", payload);
                        }
                    }
                }
                self.finish_bringup(host);
            }
            ResponseHandler::SignalQuality => {
                if !success {
                    error!("Failed to obtain signal strength");
                    return;
                }
                let Some(body) = self.body_token(tokens) else { return };
                let body = body.clone();
                let payload = cmd::strip_prefix_ci(&body, "+CSQ").unwrap_or(&body);
                let fields = cmd::split_fields(payload);
                let (Some(Ok(rssi)), Some(Ok(ber))) = (
                    fields.first().map(|f| f.parse::<u8>()),
                    fields.get(1).map(|f| f.parse::<u8>()),
                ) else {
                    error!("Failed to parse CSQ {}", payload);
                    return;
                };
                self.net_info.rssi = rssi;
                self.net_info.ber = ber;
                debug!("Signal strength ({})dBm (ber index:{})", rssi_to_dbm(rssi), ber);
                if rssi == 99 {
                    host.span_status(self.id, SpanStatus::Alarm(Alarm::NoSignal));
                }
            }
            ResponseHandler::CallList => {
                self.handle_clcc_response(host, tokens);
            }
            ResponseHandler::Dial { call_id } => {
                self.handle_dial_response(host, call_id, success);
            }
            ResponseHandler::Answer { call_id } => {
                self.handle_answer_response(host, call_id, success);
            }
            ResponseHandler::Hangup { call_id } => {
                self.handle_hangup_response(host, call_id, success);
            }
            ResponseHandler::SmsTextMode { sms_id } => {
                self.sms_text_mode_done(host, sms_id, success);
            }
            ResponseHandler::SmsSend { sms_id } => {
                self.sms_send_done(host, sms_id, tokens, success);
            }
            ResponseHandler::SmsRead => {
                if !success || tokens.len() < 3 {
                    error!("Failed to read stored SMS");
                    return;
                }
                let header = tokens[0].clone();
                let body = tokens[1].clone();
                let payload = cmd::strip_prefix_ci(&header, "+CMGR").unwrap_or(&header);
                let payload: String<{ crate::tokenizer::MAX_TOKEN_SZ }> = truncated(payload);
                self.sms_deliver_incoming(host, &payload, &body);
            }
        }
    }

    /// The `AT+CREG?` answer is the last command of the bring-up script.
    fn finish_bringup<H: HostInterface>(&mut self, host: &mut H) {
        if self.state != SpanState::Init {
            return;
        }
        self.set_state(SpanState::Ready);
        host.span_status(self.id, SpanStatus::Ready);

        if self.config.signal_poll_interval.as_millis() > 0 {
            let interval = self.config.signal_poll_interval;
            self.arm_timer("signal_poll", interval, TimerKind::SignalPoll, TimerOwner::Span);
        }
    }

    fn dispatch_notify<H: HostInterface>(
        &mut self,
        host: &mut H,
        tokens: &[Token],
        i: usize,
    ) -> NotifyOutcome {
        let token = &tokens[i];
        let Some(kind) = cmd::lookup_notify(&self.notifys, token) else {
            // Not an error: this may be a response body waiting for its
            // terminator.
            debug!("No handler for unsolicited notify \"{}\"", token.as_str());
            return NotifyOutcome::NeedsMore;
        };

        if self.config.debug(debug::AT_HANDLE) {
            debug!("Handling notify for \"{}\"", token.as_str());
        }

        match kind {
            NotifyKind::Cring => {
                let payload = cmd::strip_prefix_ci(token, "+CRING").unwrap_or(token);
                let payload: String<64> = truncated(payload);
                self.handle_cring(host, &payload);
                NotifyOutcome::Handled(1)
            }
            NotifyKind::Ring => {
                debug!("Plain RING with extended reporting enabled");
                NotifyOutcome::Handled(1)
            }
            NotifyKind::Clip => {
                let payload = cmd::strip_prefix_ci(token, "+CLIP").unwrap_or(token);
                let payload: String<{ crate::tokenizer::MAX_TOKEN_SZ }> = truncated(payload);
                self.handle_clip(host, &payload);
                NotifyOutcome::Handled(1)
            }
            NotifyKind::Creg => {
                let payload = cmd::strip_prefix_ci(token, "+CREG").unwrap_or(token);
                let fields = cmd::split_fields(payload);
                match fields.len() {
                    1 => {
                        if let Ok(stat) = fields[0].parse::<u8>() {
                            self.update_net_status(host, stat);
                            NotifyOutcome::Handled(1)
                        } else {
                            error!("Failed to parse CREG report {}", payload);
                            NotifyOutcome::Handled(1)
                        }
                    }
                    // More than one field means this is the body of a
                    // `AT+CREG?` response whose terminator is still due.
                    _ => NotifyOutcome::NeedsMore,
                }
            }
            NotifyKind::CodecInfo => {
                let payload = cmd::strip_prefix_ci(token, "#CODECINFO").unwrap_or(token);
                debug!("Codec in use: {}", payload);
                NotifyOutcome::Handled(1)
            }
            NotifyKind::SmsDeliver => {
                let Some(body) = tokens.get(i + 1) else {
                    // The payload line has not arrived yet.
                    return NotifyOutcome::NeedsMore;
                };
                let header = cmd::strip_prefix_ci(token, "+CMT").unwrap_or(token);
                let header: String<{ crate::tokenizer::MAX_TOKEN_SZ }> = truncated(header);
                let body = body.clone();
                self.sms_deliver_incoming(host, &header, &body);
                NotifyOutcome::Handled(2)
            }
            NotifyKind::SmsWaiting => {
                let payload = cmd::strip_prefix_ci(token, "+CMTI").unwrap_or(token);
                let fields = cmd::split_fields(payload);
                // +CMTI: "SM",<index>
                let Some(Ok(index)) = fields.get(1).map(|f| f.parse::<u16>()) else {
                    error!("Failed to parse CMTI indication {}", payload);
                    return NotifyOutcome::Handled(1);
                };
                let mut read = String::<32>::new();
                use core::fmt::Write;
                let _ = write!(read, "AT+CMGR={}", index);
                self.enqueue_cmd_default(&read, ResponseHandler::SmsRead);
                NotifyOutcome::Handled(1)
            }
        }
    }

    pub(crate) fn update_net_status<H: HostInterface>(&mut self, host: &mut H, stat: u8) {
        let stat = NetStatus::from(stat);
        if stat == NetStatus::Invalid {
            error!("Invalid network status");
            return;
        }
        if self.net_info.stat == stat {
            return;
        }

        info!("Network status changed to \"{}\"", stat.as_str());
        let was_up = self.net_info.stat.is_up();
        self.net_info.stat = stat;

        if was_up != stat.is_up() {
            let sigstatus = if stat.is_up() {
                SigStatus::Up
            } else {
                SigStatus::Down
            };
            info!(
                "Signalling status changed to {}",
                if stat.is_up() { "Up" } else { "Down" }
            );
            self.sigstatus = sigstatus;
            host.span_status(self.id, SpanStatus::SigStatus(sigstatus));
        }
    }

    fn run_timers<H: HostInterface>(&mut self, host: &mut H) {
        while let Some(timer) = self.sched.pop_due() {
            match timer.kind {
                TimerKind::ClipTimeout { call_id } => {
                    debug!("[id:{}] No CLIP after CRING, resyncing", call_id);
                    self.enqueue_clcc();
                }
                TimerKind::ProgressMonitor { .. } => {
                    self.enqueue_clcc();
                }
                TimerKind::CommandTimeout => {
                    if let Some(in_flight) = self.in_flight.take() {
                        error!("Command \"{}\" timed out", in_flight.cmd.cmd);
                        self.handle_response(host, in_flight.cmd.handler, &[], false);
                    }
                }
                TimerKind::SignalPoll => {
                    self.enqueue_cmd_default("AT+CSQ", ResponseHandler::SignalQuality);
                    let interval = self.config.signal_poll_interval;
                    self.arm_timer("signal_poll", interval, TimerKind::SignalPoll, TimerOwner::Span);
                }
                TimerKind::StalePending => {
                    self.stale_timer = 0;
                    self.flush_stale();
                }
            }
        }
    }

    /// Drop a buffered window that never got its continuation.
    fn flush_stale(&mut self) {
        let mut window = [0u8; BUFFER_SZ];
        let Ok(len) = self.buffer.peek(&mut window) else { return };
        if let Ok(Some(tokenized)) = tokenize(&window[..len]) {
            warn!("Flushing {} stale buffered bytes", tokenized.consumed);
            let _ = self.buffer.flush(tokenized.consumed);
        }
    }
}

fn truncated<const N: usize>(text: &str) -> String<N> {
    let mut out = String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn parse_hex_field(field: &str) -> u16 {
    u16::from_str_radix(cmd::unquote(field), 16).unwrap_or(0)
}
