//! The engine handle owning every span.
//!
//! One `Engine` replaces the process-wide callback and span tables a C
//! rendition of this library would keep: the host constructs it with its
//! [`HostInterface`] implementation and drives each span through the entry
//! points below.

use crate::call::{MAX_CALLS_PER_SPAN, OUTBOUND_CALL_ID_BASE};
use crate::config::SpanConfig;
use crate::error::{Error, Result};
use crate::host::HostInterface;
use crate::modules::{ChipOps, CodecMask};
use crate::registration::NetInfo;
use crate::sms::{Sms, SmsEvent, SmsState, MAX_SMSS_PER_SPAN};
use crate::span::{ChipInfo, Event, Span};
use crate::types::ConEvent;

pub const MAX_SPANS: usize = 32;

pub struct Engine<H: HostInterface> {
    host: H,
    spans: [Option<Span>; MAX_SPANS],
}

impl<H: HostInterface> Engine<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            spans: core::array::from_fn(|_| None),
        }
    }

    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    fn span(&self, span_id: u8) -> Result<&Span> {
        if span_id == 0 || span_id as usize >= MAX_SPANS {
            return Err(Error::InvalidArgument);
        }
        self.spans[span_id as usize].as_ref().ok_or(Error::InvalidArgument)
    }

    fn span_mut(&mut self, span_id: u8) -> Result<(&mut Span, &mut H)> {
        if span_id == 0 || span_id as usize >= MAX_SPANS {
            return Err(Error::InvalidArgument);
        }
        match self.spans[span_id as usize].as_mut() {
            Some(span) => Ok((span, &mut self.host)),
            None => Err(Error::InvalidArgument),
        }
    }

    // ---------------------------------------------------------- lifecycle

    /// Configure a span. Fails when the id is out of range or the span is
    /// already configured.
    pub fn span_config(&mut self, span_id: u8, config: SpanConfig) -> Result<()> {
        if span_id == 0 || span_id as usize >= MAX_SPANS {
            return Err(Error::InvalidArgument);
        }
        let slot = &mut self.spans[span_id as usize];
        if slot.is_some() {
            error!("Span {} was already configured", span_id);
            return Err(Error::Fail);
        }

        debug!("Configured span {} for {} module", span_id, config.module.as_str());
        *slot = Some(Span::new(span_id, config));
        Ok(())
    }

    /// Tear down a configured span. The span must be stopped first.
    pub fn span_unconfig(&mut self, span_id: u8) -> Result<()> {
        if span_id == 0 || span_id as usize >= MAX_SPANS {
            return Err(Error::InvalidArgument);
        }
        let slot = &mut self.spans[span_id as usize];
        let Some(span) = slot.as_ref() else {
            error!("Span {} was not configured", span_id);
            return Err(Error::Fail);
        };
        if span.running {
            error!("Cannot unconfig running span, stop it first");
            return Err(Error::Fail);
        }
        *slot = None;
        Ok(())
    }

    pub fn span_start(&mut self, span_id: u8) -> Result<()> {
        let (span, _) = self.span_mut(span_id)?;
        span.start()
    }

    pub fn span_stop(&mut self, span_id: u8) -> Result<()> {
        let (span, _) = self.span_mut(span_id)?;
        span.stop()
    }

    // ------------------------------------------------------------ driving

    /// Feed bytes read from the transport. May be called from a different
    /// thread than `span_run`; the receive buffer serializes internally.
    /// On overflow the chunk is discarded and an error returned.
    pub fn span_process_read(&mut self, span_id: u8, data: &[u8]) -> Result<()> {
        self.span(span_id)?.process_read(data)
    }

    /// One cooperative tick: drain events, emit a command, dispatch
    /// received lines, fire timers.
    pub fn span_run(&mut self, span_id: u8) -> Result<()> {
        let (span, host) = self.span_mut(span_id)?;
        span.run(host);
        Ok(())
    }

    /// `0` when work is pending, milliseconds until the next timer, or
    /// `-1` when fully idle.
    pub fn span_schedule_next(&mut self, span_id: u8) -> i64 {
        match self.span(span_id) {
            Ok(span) => span.schedule_next(),
            Err(_) => -1,
        }
    }

    // -------------------------------------------------------------- calls

    /// Request an outgoing call. Outbound call ids live in
    /// `8..MAX_CALLS_PER_SPAN`; the low range belongs to incoming calls.
    pub fn con_req(&mut self, span_id: u8, call_id: u8, event: ConEvent) -> Result<()> {
        let (span, _) = self.span_mut(span_id)?;
        if call_id < OUTBOUND_CALL_ID_BASE || call_id as usize >= MAX_CALLS_PER_SPAN {
            error!("[id:{}] Invalid outbound call id", call_id);
            return Err(Error::InvalidArgument);
        }
        if !span.running {
            return Err(Error::Fail);
        }
        span.events
            .push_back(Event::ConReq { call_id, event })
            .map_err(|_| Error::OutOfMemory)
    }

    /// Accept an incoming call previously presented through `con_ind`.
    pub fn con_cfm(&mut self, span_id: u8, call_id: u8) -> Result<()> {
        self.push_call_event(span_id, call_id, Event::ConCfm { call_id })
    }

    /// Hang up a call.
    pub fn rel_req(&mut self, span_id: u8, call_id: u8) -> Result<()> {
        self.push_call_event(span_id, call_id, Event::RelReq { call_id })
    }

    /// Acknowledge a `rel_ind`; releases the call record.
    pub fn rel_cfm(&mut self, span_id: u8, call_id: u8) -> Result<()> {
        self.push_call_event(span_id, call_id, Event::RelCfm { call_id })
    }

    fn push_call_event(&mut self, span_id: u8, call_id: u8, event: Event) -> Result<()> {
        let (span, _) = self.span_mut(span_id)?;
        if call_id == 0 {
            return Err(Error::InvalidArgument);
        }
        if !span.running {
            return Err(Error::Fail);
        }
        span.events.push_back(event).map_err(|_| Error::OutOfMemory)
    }

    // ---------------------------------------------------------------- sms

    /// Submit an SMS. The span takes ownership of the event; the final
    /// disposition always arrives through `sms_sts`.
    pub fn sms_req(&mut self, span_id: u8, sms_id: u16, event: SmsEvent) -> Result<()> {
        let (span, host) = self.span_mut(span_id)?;
        if sms_id == 0 || sms_id as usize >= MAX_SMSS_PER_SPAN {
            return Err(Error::InvalidArgument);
        }
        if !span.running {
            return Err(Error::Fail);
        }
        if span.sms(sms_id).is_some() {
            return Err(Error::Busy);
        }

        span.smss[sms_id as usize] = Some(Sms::new(sms_id, event));
        span.sms_set_state(host, sms_id, SmsState::Queued);
        Ok(())
    }

    /// Current state of a call slot, `None` once the call is destroyed.
    pub fn call_state(&self, span_id: u8, call_id: u8) -> Option<crate::call::CallState> {
        self.span(span_id)
            .ok()
            .and_then(|span| span.call(call_id))
            .map(|call| call.state)
    }

    // ---------------------------------------------------------- inventory

    /// Device inventory gathered during bring-up.
    pub fn chip_info(&self, span_id: u8) -> Result<&ChipInfo> {
        Ok(&self.span(span_id)?.chip_info)
    }

    /// Latest registration and signal snapshot.
    pub fn net_info(&self, span_id: u8) -> Result<NetInfo> {
        let span = self.span(span_id)?;
        if !span.running {
            return Err(Error::Fail);
        }
        Ok(span.net_info)
    }

    // -------------------------------------------------------- chip extras

    /// Ask the chip profile to apply an audio codec preference mask.
    pub fn span_set_codec(&mut self, span_id: u8, mask: CodecMask) -> Result<()> {
        let (span, _) = self.span_mut(span_id)?;
        if !span.running {
            return Err(Error::Fail);
        }
        let module = span.module;
        module.set_codec(span, mask)
    }

    /// Run the chip profile's restart sequence, where one exists.
    pub fn span_restart(&mut self, span_id: u8) -> Result<()> {
        let (span, _) = self.span_mut(span_id)?;
        if !span.running {
            return Err(Error::Fail);
        }
        let module = span.module;
        module.restart(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallState;
    use crate::modules::ModuleKind;
    use crate::sms::{ContentCharset, SmsCause, SmsEvent, SmsType};
    use crate::test_helpers::{time_guard, RecordingHost};
    use crate::types::{
        ConStatus, Number, NumberPlan, NumberType, NumberValidity, SigStatus, SpanStatus,
    };
    use embassy_time::{Duration, MockDriver};

    const SPAN: u8 = 1;

    fn engine() -> Engine<RecordingHost> {
        let mut engine = Engine::new(RecordingHost::new());
        engine
            .span_config(SPAN, SpanConfig::new(ModuleKind::Telit))
            .unwrap();
        engine.span_start(SPAN).unwrap();
        engine
    }

    /// Run ticks, answering each newly emitted command with a plain OK,
    /// until the bring-up script has drained.
    fn drive_bringup(engine: &mut Engine<RecordingHost>) {
        let mut answered = 0;
        for _ in 0..96 {
            engine.span_run(SPAN).unwrap();
            let emitted = engine.host().commands().len();
            if emitted > answered {
                answered = emitted;
                engine.span_process_read(SPAN, b"\r\nOK\r\n").unwrap();
            }
        }
    }

    fn feed_and_run(engine: &mut Engine<RecordingHost>, bytes: &[u8]) {
        engine.span_process_read(SPAN, bytes).unwrap();
        engine.span_run(SPAN).unwrap();
    }

    fn outbound_event(digits: &str) -> ConEvent {
        let mut event = ConEvent::default();
        event.called_num = Number::new(digits);
        event
    }

    fn pdu_sms(to: &str, smsc: &str, text: &str) -> SmsEvent {
        let mut event = SmsEvent::default();
        event.ty = SmsType::Pdu;
        event.to = Number::new(to);
        event.to.ty = NumberType::International;
        event.to.plan = NumberPlan::Isdn;
        event.pdu.smsc = Number::new(smsc);
        event.pdu.smsc.ty = NumberType::International;
        event.pdu.smsc.plan = NumberPlan::Isdn;
        let _ = event.content.data.extend_from_slice(text.as_bytes());
        event
    }

    #[test]
    fn bringup_script_and_ready() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);

        let commands = engine.host().commands();
        // Chip specific commands come first, the generic script after.
        assert_eq!(commands[0], "AT#SELINT=2");
        assert!(commands.contains(&"AT#CODECINFO=1,2".to_string()));
        assert!(commands.contains(&"ATX4".to_string()));
        assert!(commands.contains(&"AT+CMEE=1".to_string()));
        assert!(commands.contains(&"AT+CLIP=1".to_string()));
        assert_eq!(commands.last().unwrap(), "AT+CREG?");

        assert!(engine
            .host()
            .statuses
            .contains(&(SPAN, SpanStatus::Ready)));
        assert!(engine
            .host()
            .statuses
            .contains(&(SPAN, SpanStatus::SimInfoReady)));
    }

    #[test]
    fn incoming_call_with_clip() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        feed_and_run(
            &mut engine,
            b"\r\n+CRING: VOICE\r\n\r\n+CLIP: \"+14165551212\",145,\"\",0\r\n",
        );

        let host = engine.host();
        assert_eq!(host.con_inds.len(), 1);
        let (call_id, event) = host.con_inds[0].clone();
        assert_eq!(event.calling_num.digits.as_str(), "+14165551212");
        assert_eq!(event.calling_num.ty, NumberType::International);
        assert_eq!(event.calling_num.plan, NumberPlan::Isdn);
        assert_eq!(event.calling_num.validity, NumberValidity::Valid);
        assert_eq!(engine.call_state(SPAN, call_id), Some(CallState::Dialed));
    }

    #[test]
    fn incoming_call_without_clip_resyncs() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        feed_and_run(&mut engine, b"\r\n+CRING: VOICE\r\n");
        assert_eq!(engine.call_state(SPAN, 1), Some(CallState::Dialing));

        // No CLIP within the CID timeout: expect a call list query.
        MockDriver::get().advance(Duration::from_millis(10_001));
        engine.span_run(SPAN).unwrap();
        engine.span_run(SPAN).unwrap();
        assert_eq!(engine.host().commands(), vec!["AT+CLCC".to_string()]);

        feed_and_run(&mut engine, b"\r\n+CLCC: 1,1,4,0,0,\"\",128,\"\"\r\nOK\r\n");
        assert_eq!(engine.call_state(SPAN, 1), Some(CallState::Dialed));
        let host = engine.host();
        assert_eq!(host.con_inds.len(), 1);
        assert!(host.con_inds[0].1.calling_num.digits.is_empty());
    }

    #[test]
    fn outbound_call_to_answer_and_remote_hangup() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        engine.con_req(SPAN, 8, outbound_event("5551212")).unwrap();
        engine.span_run(SPAN).unwrap();
        assert_eq!(engine.host().commands()[0], "ATD5551212;");
        assert_eq!(engine.call_state(SPAN, 8), Some(CallState::Dialing));
        feed_and_run(&mut engine, b"\r\nOK\r\n");

        // Progress poll finds the remote end alerting.
        MockDriver::get().advance(Duration::from_millis(751));
        engine.span_run(SPAN).unwrap();
        engine.span_run(SPAN).unwrap();
        assert!(engine.host().commands().contains(&"AT+CLCC".to_string()));
        feed_and_run(&mut engine, b"\r\n+CLCC: 1,0,3,0,0,\"5551212\",129,\"\"\r\nOK\r\n");
        assert_eq!(engine.call_state(SPAN, 8), Some(CallState::Ringing));
        assert!(engine.host().con_stss.contains(&(8, ConStatus::Ringing)));

        // Next poll reports the call active.
        MockDriver::get().advance(Duration::from_millis(751));
        engine.span_run(SPAN).unwrap();
        engine.span_run(SPAN).unwrap();
        feed_and_run(&mut engine, b"\r\n+CLCC: 1,0,0,0,0,\"5551212\",129,\"\"\r\nOK\r\n");
        assert_eq!(engine.call_state(SPAN, 8), Some(CallState::Up));
        assert!(engine.host().con_stss.contains(&(8, ConStatus::Answer)));

        // Remote hangup: a bare failure terminator triggers a resync that
        // no longer lists the call.
        engine.host().clear();
        feed_and_run(&mut engine, b"\r\nNO CARRIER\r\n");
        engine.span_run(SPAN).unwrap();
        assert!(engine.host().commands().contains(&"AT+CLCC".to_string()));
        feed_and_run(&mut engine, b"\r\nOK\r\n");
        assert_eq!(engine.call_state(SPAN, 8), Some(CallState::Terminating));
        assert_eq!(engine.host().rel_inds.len(), 1);

        engine.rel_cfm(SPAN, 8).unwrap();
        engine.span_run(SPAN).unwrap();
        assert_eq!(engine.call_state(SPAN, 8), None);
    }

    #[test]
    fn local_hangup_flow() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        engine.con_req(SPAN, 9, outbound_event("18005551234")).unwrap();
        engine.span_run(SPAN).unwrap();
        feed_and_run(&mut engine, b"\r\nOK\r\n");

        engine.rel_req(SPAN, 9).unwrap();
        engine.span_run(SPAN).unwrap();
        engine.span_run(SPAN).unwrap();
        assert_eq!(engine.call_state(SPAN, 9), Some(CallState::Hangup));
        assert!(engine.host().commands().contains(&"ATH".to_string()));

        feed_and_run(&mut engine, b"\r\nOK\r\n");
        assert_eq!(engine.call_state(SPAN, 9), None);
        assert_eq!(engine.host().rel_cfms, vec![9]);
    }

    #[test]
    fn outbound_call_id_range_is_enforced() {
        let _time = time_guard();
        let mut engine = engine();
        assert_eq!(
            engine.con_req(SPAN, 3, outbound_event("123")),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            engine.con_req(SPAN, 16, outbound_event("123")),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn registration_drives_sigstatus_once() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        // Searching: still down, no report.
        feed_and_run(&mut engine, b"\r\n+CREG: 2\r\n");
        assert!(engine.host().statuses.is_empty());

        // Roaming brings signalling up.
        feed_and_run(&mut engine, b"\r\n+CREG: 5\r\n");
        assert_eq!(
            engine.host().statuses,
            vec![(SPAN, SpanStatus::SigStatus(SigStatus::Up))]
        );

        // Roaming to home: still up, nothing new.
        feed_and_run(&mut engine, b"\r\n+CREG: 1\r\n");
        assert_eq!(engine.host().statuses.len(), 1);

        // Losing registration brings it down.
        feed_and_run(&mut engine, b"\r\n+CREG: 0\r\n");
        assert_eq!(
            engine.host().statuses.last(),
            Some(&(SPAN, SpanStatus::SigStatus(SigStatus::Down)))
        );
    }

    #[test]
    fn sms_without_network_fails_without_commands() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        engine
            .sms_req(SPAN, 1, pdu_sms("+14165551212", "+12125551212", "Hi"))
            .unwrap();

        let host = engine.host();
        assert_eq!(host.sms_stss.len(), 1);
        let (sms_id, status) = host.sms_stss[0].clone();
        assert_eq!(sms_id, 1);
        assert!(!status.success);
        assert_eq!(status.cause, Some(SmsCause::NoNetwork));
        assert!(!host.written_str().contains("CMGS"));
    }

    #[test]
    fn sms_pdu_send_flow() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        feed_and_run(&mut engine, b"\r\n+CREG: 1\r\n");
        engine.host().clear();

        engine
            .sms_req(SPAN, 2, pdu_sms("+14165551212", "+12125551212", "Hi"))
            .unwrap();
        engine.span_run(SPAN).unwrap();
        engine.span_run(SPAN).unwrap();

        // Octet count excludes the SMSC field.
        assert!(engine.host().commands().contains(&"AT+CMGS=15".to_string()));

        // The prompt releases the rendered hex body and the 0x1A byte.
        feed_and_run(&mut engine, b"\r\n> ");
        let written = engine.host().written_str();
        assert!(written.contains("07912121551512f201000b914161551512f2000002c834"));
        assert!(written.ends_with("\u{1a}"));

        feed_and_run(&mut engine, b"\r\n+CMGS: 4\r\n\r\nOK\r\n");
        let host = engine.host();
        assert_eq!(host.sms_stss.len(), 1);
        assert!(host.sms_stss[0].1.success);
    }

    #[test]
    fn incoming_sms_pdu_delivery() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        feed_and_run(
            &mut engine,
            b"\r\n+CMT: ,26\r\n07912121551512f2040b914161551512f200006280102100000002c834\r\n",
        );

        let host = engine.host();
        assert_eq!(host.sms_inds.len(), 1);
        let event = &host.sms_inds[0];
        assert_eq!(event.from.digits.as_str(), "14165551212");
        assert_eq!(event.content.data.as_slice(), b"Hi");
        assert_eq!(event.content.charset, ContentCharset::Ascii);
    }

    #[test]
    fn stored_sms_indication_is_read_back() {
        let _time = time_guard();
        let mut engine = engine();
        drive_bringup(&mut engine);
        engine.host().clear();

        feed_and_run(&mut engine, b"\r\n+CMTI: \"SM\",3\r\n");
        engine.span_run(SPAN).unwrap();
        assert!(engine.host().commands().contains(&"AT+CMGR=3".to_string()));

        feed_and_run(
            &mut engine,
            b"\r\n+CMGR: 0,,26\r\n07912121551512f2040b914161551512f200006280102100000002c834\r\nOK\r\n",
        );
        let host = engine.host();
        assert_eq!(host.sms_inds.len(), 1);
        assert_eq!(host.sms_inds[0].from.digits.as_str(), "14165551212");
    }

    #[test]
    fn command_timeout_completes_with_failure() {
        let _time = time_guard();
        let mut engine = engine();
        engine.span_run(SPAN).unwrap();
        assert_eq!(engine.host().commands().len(), 1);

        // No response at all: the command is failed and the next one goes
        // out on the wire.
        MockDriver::get().advance(Duration::from_millis(10_001));
        engine.span_run(SPAN).unwrap();
        engine.span_run(SPAN).unwrap();
        assert_eq!(engine.host().commands().len(), 2);
    }

    #[test]
    fn inventory_is_captured() {
        let _time = time_guard();
        let mut engine = engine();

        // Walk the script up to the inventory reads with explicit bodies.
        let replies: &[(&str, &[u8])] = &[
            ("AT#SELINT=2", b"\r\nOK\r\n"),
            ("AT#SMSMODE=1", b"\r\nOK\r\n"),
            ("AT#REGMODE=1", b"\r\nOK\r\n"),
            ("AT#DVI=1,1,0", b"\r\nOK\r\n"),
            ("AT#SHFEC=1", b"\r\nOK\r\n"),
            ("AT#SHSEC=1", b"\r\nOK\r\n"),
            ("AT#SHSSD=0", b"\r\nOK\r\n"),
            ("AT#CODECINFO=1,2", b"\r\nOK\r\n"),
            ("AT+CPIN?", b"\r\n+CPIN: READY\r\n\r\nOK\r\n"),
            ("ATX4", b"\r\nOK\r\n"),
            ("AT+CMEE=1", b"\r\nOK\r\n"),
            ("AT+CRC=1", b"\r\nOK\r\n"),
            ("AT+CGMM", b"\r\nGM862-QUAD\r\n\r\nOK\r\n"),
            ("AT+CGMI", b"\r\nTelit\r\n\r\nOK\r\n"),
            ("AT+CGMR", b"\r\nRevision: 07.02.404\r\n\r\nOK\r\n"),
            ("AT+CGSN", b"\r\n351234567890123\r\n\r\nOK\r\n"),
            ("AT+CIMI", b"\r\n302720304127533\r\n\r\nOK\r\n"),
            ("AT+CLIP=1", b"\r\nOK\r\n"),
            ("AT+CNMI=2,1", b"\r\nOK\r\n"),
            ("AT+COPS=3,0", b"\r\nOK\r\n"),
            ("AT+CNUM", b"\r\n+CNUM: \"TELEPHONE\",\"+16473380980\",145\r\n\r\nOK\r\n"),
            ("AT+CSCA?", b"\r\n+CSCA: \"+12125551212\",145\r\n\r\nOK\r\n"),
            ("AT+CSQ", b"\r\n+CSQ: 21,0\r\n\r\nOK\r\n"),
            ("AT+CREG=1", b"\r\nOK\r\n"),
            ("AT+CREG?", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n"),
        ];

        for (expected, reply) in replies {
            // Tick until the command reaches the wire, then answer it.
            for _ in 0..4 {
                engine.span_run(SPAN).unwrap();
                if engine.host().commands().last().map(|s| s.as_str()) == Some(*expected) {
                    break;
                }
            }
            assert_eq!(
                engine.host().commands().last().unwrap(),
                expected,
                "unexpected command order"
            );
            engine.span_process_read(SPAN, reply).unwrap();
            engine.span_run(SPAN).unwrap();
        }

        let info = engine.chip_info(SPAN).unwrap();
        assert_eq!(info.model.as_str(), "GM862-QUAD");
        assert_eq!(info.manufacturer.as_str(), "Telit");
        assert_eq!(info.firmware.as_str(), "07.02.404");
        assert_eq!(info.imei.as_str(), "351234567890123");
        assert_eq!(info.imsi.as_str(), "302720304127533");
        assert_eq!(info.subscriber_number.as_str(), "+16473380980");
        assert_eq!(info.smsc.digits.as_str(), "+12125551212");

        let net = engine.net_info(SPAN).unwrap();
        assert_eq!(net.rssi, 21);
        assert!(net.stat.is_up());

        // Registration was already home, so signalling came up and the
        // span reported ready.
        assert!(engine.host().statuses.contains(&(SPAN, SpanStatus::Ready)));
        assert!(engine
            .host()
            .statuses
            .contains(&(SPAN, SpanStatus::SigStatus(SigStatus::Up))));
    }

    #[test]
    fn lifecycle_rules() {
        let _time = time_guard();
        let mut engine = Engine::new(RecordingHost::new());
        let config = SpanConfig::new(ModuleKind::Motorola);

        assert!(engine.span_config(0, config.clone()).is_err());
        engine.span_config(2, config.clone()).unwrap();
        assert!(engine.span_config(2, config.clone()).is_err());

        engine.span_start(2).unwrap();
        assert!(engine.span_start(2).is_err());
        // A running span cannot be unconfigured.
        assert!(engine.span_unconfig(2).is_err());

        engine.span_stop(2).unwrap();
        assert!(engine.span_stop(2).is_err());
        engine.span_unconfig(2).unwrap();
        assert!(engine.span_unconfig(2).is_err());
    }

    #[test]
    fn schedule_next_reflects_pending_work() {
        let _time = time_guard();
        let mut engine = engine();
        // Bring-up commands pending: work is ready now.
        assert_eq!(engine.span_schedule_next(SPAN), 0);

        drive_bringup(&mut engine);
        // Quiescent span with no timers: idle forever.
        assert_eq!(engine.span_schedule_next(SPAN), -1);

        feed_and_run(&mut engine, b"\r\n+CRING: VOICE\r\n");
        // The CID timer is the next deadline.
        let next = engine.span_schedule_next(SPAN);
        assert!(next > 0 && next <= 10_000);
    }
}
