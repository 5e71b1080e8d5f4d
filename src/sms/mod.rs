//! SMS engine: the outgoing send state machine, the incoming delivery path
//! and the content transforms between host payloads and wire bodies.

pub mod pdu;

use heapless::{String, Vec};

use crate::cmd::ResponseHandler;
use crate::config::debug;
use crate::error::{Error, Result};
use crate::host::HostInterface;
use crate::sched::TimerOwner;
use crate::span::Span;
use crate::types::Number;

use pdu::{ConcatInfo, Dcs, Pdu, Scts, SubmitPdu, Vp};

/// Maximum host-visible SMS payload.
pub const MAX_SMS_SZ: usize = 1024;
pub const MAX_SMSS_PER_SPAN: usize = 16;

/// End-of-message byte finishing the two-prompt send exchange.
pub(crate) const SMS_EOM: u8 = 0x1A;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SmsType {
    Txt,
    #[default]
    Pdu,
}

/// Transport encoding of the payload between host and library.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContentEncoding {
    #[default]
    None,
    Base64,
    Hex,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ContentCharset {
    #[default]
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SmsCause {
    NoNetwork,
    QueueFull,
    Invalid,
}

#[derive(Debug, Default, Clone)]
pub struct SmsContent {
    pub encoding: ContentEncoding,
    pub charset: ContentCharset,
    pub data: Vec<u8, MAX_SMS_SZ>,
}

/// PDU-level knobs a host may set on an outgoing message; all default to
/// the plain single-part SMS-SUBMIT.
#[derive(Debug, Default, Clone)]
pub struct PduMeta {
    pub smsc: Number,
    pub mr: u8,
    pub pid: u8,
    pub dcs: Dcs,
    pub vp: Vp,
    pub concat: Option<ConcatInfo>,
}

/// The host-facing SMS payload, used in both directions.
#[derive(Debug, Default, Clone)]
pub struct SmsEvent {
    pub ty: SmsType,
    pub to: Number,
    pub from: Number,
    pub scts: Scts,
    pub content: SmsContent,
    pub pdu: PduMeta,
}

#[derive(Debug, Default, Clone)]
pub struct SmsStatus {
    pub success: bool,
    pub cause: Option<SmsCause>,
    /// Raw failure terminator (e.g. `+CMS ERROR: 500`) when one was seen.
    pub error: Option<String<64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SmsState {
    Queued,
    Start,
    SendHeader,
    SendBody,
    SendTerminator,
    Complete,
}

impl SmsState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Start => "START",
            Self::SendHeader => "SEND_HEADER",
            Self::SendBody => "SEND_BODY",
            Self::SendTerminator => "SEND_TERMINATOR",
            Self::Complete => "COMPLETE",
        }
    }
}

/// One outgoing SMS owned by its span slot until completion.
#[derive(Debug, Clone)]
pub struct Sms {
    pub id: u16,
    pub state: SmsState,
    pub event: SmsEvent,
    /// Rendered on-the-wire body: hex-ASCII PDU or raw text.
    pub body: Vec<u8, MAX_SMS_SZ>,
    /// Octet count reported in `AT+CMGS=<n>` for PDU mode.
    pub tpdu_len: usize,
    pub cause: Option<SmsCause>,
    pub error: Option<String<64>>,
}

impl Sms {
    pub fn new(id: u16, event: SmsEvent) -> Self {
        Self {
            id,
            state: SmsState::Queued,
            event,
            body: Vec::new(),
            tpdu_len: 0,
            cause: None,
            error: None,
        }
    }
}

impl Span {
    pub(crate) fn sms_set_state<H: HostInterface>(
        &mut self,
        host: &mut H,
        sms_id: u16,
        new_state: SmsState,
    ) {
        let trace_states = self.config.debug(debug::CALL_STATE);
        let Some(sms) = self.sms_mut(sms_id) else {
            error!("[sms:{}] No such sms for state change", sms_id);
            return;
        };
        if trace_states {
            debug!(
                "[sms:{}] SMS state change from {} to {}",
                sms_id,
                sms.state.as_str(),
                new_state.as_str()
            );
        }
        sms.state = new_state;

        match new_state {
            SmsState::Queued => {
                if self.sigstatus_down() {
                    warn!("[sms:{}] Cannot send SMS when network is down", sms_id);
                    self.sms_fail(host, sms_id, SmsCause::NoNetwork);
                    return;
                }
                if let Err(cause) = self.sms_render_body(sms_id) {
                    self.sms_fail(host, sms_id, cause);
                    return;
                }
                if self.sms_queue.push_back(sms_id).is_err() {
                    warn!("[sms:{}] SMS queue full", sms_id);
                    self.sms_fail(host, sms_id, SmsCause::QueueFull);
                }
            }
            SmsState::Start => {
                self.outbound_sms = Some(sms_id);
                let ty = self.sms(sms_id).map(|s| s.event.ty);
                if ty == Some(SmsType::Txt) {
                    self.enqueue_cmd_default(
                        "AT+CMGF=1",
                        ResponseHandler::SmsTextMode { sms_id },
                    );
                } else {
                    self.sms_set_state(host, sms_id, SmsState::SendHeader);
                }
            }
            SmsState::SendHeader => {
                let Some(sms) = self.sms(sms_id) else { return };
                let mut cmd = String::<{ crate::cmd::MAX_CMD_SZ }>::new();
                let ok = match sms.event.ty {
                    SmsType::Pdu => {
                        write_fmt(&mut cmd, format_args!("AT+CMGS={}", sms.tpdu_len))
                    }
                    SmsType::Txt => write_fmt(
                        &mut cmd,
                        format_args!("AT+CMGS=\"{}\"", sms.event.to.digits),
                    ),
                };
                if ok.is_err() {
                    self.sms_fail(host, sms_id, SmsCause::Invalid);
                    return;
                }
                // The command stays in flight across the prompt, the body
                // write and the end-of-message byte; the +CMGS reference
                // and final OK complete it.
                self.enqueue_cmd(
                    &cmd,
                    ResponseHandler::SmsSend { sms_id },
                    embassy_time::Duration::from_secs(30),
                );
                self.sms_awaiting_prompt = true;
            }
            SmsState::SendBody => {
                self.sms_send_body(host, sms_id);
            }
            SmsState::SendTerminator => {
                self.raw_write(host, &[SMS_EOM]);
            }
            SmsState::Complete => {
                self.sms_complete(host, sms_id);
            }
        }
    }

    fn sigstatus_down(&self) -> bool {
        self.sigstatus == crate::types::SigStatus::Down
    }

    pub(crate) fn sms_fail<H: HostInterface>(&mut self, host: &mut H, sms_id: u16, cause: SmsCause) {
        if let Some(sms) = self.sms_mut(sms_id) {
            sms.cause = Some(cause);
        }
        self.sms_set_state(host, sms_id, SmsState::Complete);
    }

    /// Render the wire body for an SMS leaving the QUEUED state.
    fn sms_render_body(&mut self, sms_id: u16) -> core::result::Result<(), SmsCause> {
        let trace_encode = self.config.debug(debug::SMS_ENCODE);
        let default_smsc = self.chip_info.smsc.clone();
        let Some(sms) = self.sms_mut(sms_id) else {
            return Err(SmsCause::Invalid);
        };

        match sms.event.ty {
            SmsType::Txt => {
                debug!("[sms:{}] Sending SMS in text mode", sms.id);
                let data = sms.event.content.data.clone();
                sms.body = data;
                Ok(())
            }
            SmsType::Pdu => {
                debug!("[sms:{}] Sending SMS in PDU mode", sms.id);

                let smsc = if sms.event.pdu.smsc.digits.is_empty() {
                    if default_smsc.digits.is_empty() {
                        error!("[sms:{}] SMSC information not available", sms.id);
                        return Err(SmsCause::Invalid);
                    }
                    default_smsc
                } else {
                    sms.event.pdu.smsc.clone()
                };

                let text = decode_content(&sms.event.content).map_err(|_| SmsCause::Invalid)?;
                let submit = SubmitPdu {
                    smsc: &smsc,
                    to: &sms.event.to,
                    mr: sms.event.pdu.mr,
                    pid: sms.event.pdu.pid,
                    reply_path: false,
                    status_report: false,
                    reject_duplicates: false,
                    dcs: sms.event.pdu.dcs,
                    vp: sms.event.pdu.vp,
                    concat: sms.event.pdu.concat,
                    text: &text,
                };
                let (octets, tpdu_len) = pdu::encode_submit(&submit).map_err(|_| SmsCause::Invalid)?;

                if trace_encode {
                    debug!(
                        "[sms:{}] Rendered {} PDU octets, {} in the TPDU",
                        sms.id,
                        octets.len(),
                        tpdu_len
                    );
                }
                let hex = crate::hex::encode_hex::<MAX_SMS_SZ>(&octets)
                    .map_err(|_| SmsCause::Invalid)?;
                sms.body = hex;
                sms.tpdu_len = tpdu_len;
                Ok(())
            }
        }
    }

    fn sms_send_body<H: HostInterface>(&mut self, host: &mut H, sms_id: u16) {
        let Some(sms) = self.sms(sms_id) else { return };
        let body = sms.body.clone();
        self.raw_write(host, &body);
        self.sms_set_state(host, sms_id, SmsState::SendTerminator);
    }

    fn sms_complete<H: HostInterface>(&mut self, host: &mut H, sms_id: u16) {
        let status = match self.sms(sms_id) {
            Some(sms) => SmsStatus {
                success: sms.cause.is_none(),
                cause: sms.cause,
                error: sms.error.clone(),
            },
            None => return,
        };
        let ty = self.sms(sms_id).map(|s| s.event.ty);

        if ty == Some(SmsType::Txt) {
            // Put the module back into PDU mode.
            self.enqueue_cmd_default("AT+CMGF=0", ResponseHandler::None);
        }

        host.sms_sts(self.id, sms_id, &status);

        self.sched.cancel_by_owner(TimerOwner::Sms(sms_id));
        if self.outbound_sms == Some(sms_id) {
            self.outbound_sms = None;
            self.sms_awaiting_prompt = false;
        }
        self.sms_destroy(sms_id);
    }

    /// Completion of the in-flight `AT+CMGS` exchange.
    pub(crate) fn sms_send_done<H: HostInterface>(
        &mut self,
        host: &mut H,
        sms_id: u16,
        tokens: &[crate::tokenizer::Token],
        success: bool,
    ) {
        if success {
            if let Some(reference) = tokens
                .iter()
                .find_map(|t| crate::cmd::strip_prefix_ci(t, "+CMGS"))
            {
                debug!("[sms:{}] Message reference {}", sms_id, reference);
            }
        } else {
            if let Some(sms) = self.sms_mut(sms_id) {
                sms.cause = Some(SmsCause::Invalid);
                if let Some(last) = tokens.last() {
                    let mut err = String::new();
                    for c in last.chars() {
                        if err.push(c).is_err() {
                            break;
                        }
                    }
                    sms.error = Some(err);
                }
            }
        }
        self.sms_set_state(host, sms_id, SmsState::Complete);
    }

    /// `AT+CMGF=1` acknowledgement ahead of a text-mode send.
    pub(crate) fn sms_text_mode_done<H: HostInterface>(
        &mut self,
        host: &mut H,
        sms_id: u16,
        success: bool,
    ) {
        if success {
            self.sms_set_state(host, sms_id, SmsState::SendHeader);
        } else {
            error!("[sms:{}] Failed to switch to text mode", sms_id);
            self.sms_fail(host, sms_id, SmsCause::Invalid);
        }
    }

    /// Deliver one received message, arriving either as a hex PDU line or
    /// as plain text with the CMT/CMGR header fields.
    pub(crate) fn sms_deliver_incoming<H: HostInterface>(
        &mut self,
        host: &mut H,
        header: &str,
        body: &str,
    ) {
        if self.config.debug(debug::SMS_DECODE) {
            debug!("Decoding incoming SMS [{}]", body);
        }

        match decode_incoming_pdu(body, self.config.incoming_sms_encoding) {
            Ok(event) => host.sms_ind(self.id, &event),
            Err(_) => {
                // Not a PDU; treat it as a text-mode delivery where the
                // header carries sender and timestamp.
                let event = decode_incoming_text(header, body);
                host.sms_ind(self.id, &event);
            }
        }
    }
}

fn write_fmt<const N: usize>(s: &mut String<N>, args: core::fmt::Arguments) -> Result<()> {
    use core::fmt::Write;
    s.write_fmt(args).map_err(|_| Error::OutOfMemory)
}

/// Resolve the host payload into plain UTF-8 text for PDU rendering.
pub fn decode_content(content: &SmsContent) -> Result<pdu::TextBuf> {
    let mut raw = Vec::<u8, MAX_SMS_SZ>::new();
    match content.encoding {
        ContentEncoding::None => raw
            .extend_from_slice(&content.data)
            .map_err(|_| Error::OutOfMemory)?,
        ContentEncoding::Base64 => {
            let text = core::str::from_utf8(&content.data).map_err(|_| Error::InvalidArgument)?;
            decode_base64(text, &mut raw)?;
        }
        ContentEncoding::Hex => {
            let text = core::str::from_utf8(&content.data).map_err(|_| Error::InvalidArgument)?;
            raw = crate::hex::decode_hex::<MAX_SMS_SZ>(text)?;
        }
    }

    let text = core::str::from_utf8(&raw).map_err(|_| Error::InvalidArgument)?;
    let mut out = pdu::TextBuf::new();
    out.push_str(text).map_err(|_| Error::OutOfMemory)?;
    Ok(out)
}

/// Package decoded user data for the host: pure ASCII goes out verbatim,
/// anything else is marked UTF-8 and wrapped in the requested transport
/// encoding.
pub fn encode_content(text: &str, requested: ContentEncoding) -> Result<SmsContent> {
    let mut content = SmsContent::default();
    if text.bytes().all(|b| b <= 0x7F) {
        content.charset = ContentCharset::Ascii;
        content.encoding = ContentEncoding::None;
        content
            .data
            .extend_from_slice(text.as_bytes())
            .map_err(|_| Error::OutOfMemory)?;
        return Ok(content);
    }

    content.charset = ContentCharset::Utf8;
    content.encoding = requested;
    match requested {
        ContentEncoding::None => content
            .data
            .extend_from_slice(text.as_bytes())
            .map_err(|_| Error::OutOfMemory)?,
        ContentEncoding::Base64 => encode_base64(text.as_bytes(), &mut content.data)?,
        ContentEncoding::Hex => {
            content.data = crate::hex::encode_hex::<MAX_SMS_SZ>(text.as_bytes())?;
        }
    }
    Ok(content)
}

/// Turn a received hex PDU line into the host event.
pub fn decode_incoming_pdu(line: &str, requested: ContentEncoding) -> Result<SmsEvent> {
    let octets = crate::hex::decode_hex::<{ pdu::MAX_PDU_OCTETS }>(line.trim())?;
    let decoded: Pdu = pdu::decode(&octets)?;
    if decoded.submit {
        return Err(Error::Fail);
    }

    let mut event = SmsEvent::default();
    event.ty = SmsType::Pdu;
    event.from = decoded.peer;
    event.scts = decoded.scts;
    event.pdu.smsc = decoded.smsc;
    event.pdu.pid = decoded.pid;
    event.pdu.dcs = decoded.dcs;
    event.pdu.concat = decoded.concat;
    event.content = encode_content(&decoded.text, requested)?;
    Ok(event)
}

/// Text-mode delivery: `+CMT: "<from>",,"<scts>"` followed by the body.
pub fn decode_incoming_text(header: &str, body: &str) -> SmsEvent {
    let mut event = SmsEvent::default();
    event.ty = SmsType::Txt;

    let fields = crate::cmd::split_fields(header);
    if let Some(from) = fields.first() {
        event.from = Number::new(crate::cmd::unquote(from));
    }
    if let Some(scts) = fields.iter().find(|f| f.contains('/')) {
        event.scts = parse_text_scts(crate::cmd::unquote(scts));
    }

    let _ = event.content.data.extend_from_slice(body.as_bytes());
    event.content.charset = if body.bytes().all(|b| b <= 0x7F) {
        ContentCharset::Ascii
    } else {
        ContentCharset::Utf8
    };
    event
}

/// Parse a text-mode service centre timestamp, `11/11/23,14:42:17+00`.
fn parse_text_scts(s: &str) -> Scts {
    let mut scts = Scts::default();
    let mut parts = s.split(',');

    if let Some(date) = parts.next() {
        let mut date = date.split('/');
        scts.year = parse_u8(date.next());
        scts.month = parse_u8(date.next());
        scts.day = parse_u8(date.next());
    }
    if let Some(time) = parts.next() {
        let (hms, tz) = match time.find(['+', '-']) {
            Some(pos) => (&time[..pos], &time[pos..]),
            None => (time, ""),
        };
        let mut hms = hms.split(':');
        scts.hour = parse_u8(hms.next());
        scts.minute = parse_u8(hms.next());
        scts.second = parse_u8(hms.next());
        scts.timezone = tz.parse().unwrap_or(0);
    }
    scts
}

fn parse_u8(s: Option<&str>) -> u8 {
    s.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub fn encode_base64<const N: usize>(raw: &[u8], out: &mut Vec<u8, N>) -> Result<()> {
    for chunk in raw.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let idx = [
            b[0] >> 2,
            ((b[0] & 0x03) << 4) | (b[1] >> 4),
            ((b[1] & 0x0F) << 2) | (b[2] >> 6),
            b[2] & 0x3F,
        ];
        for (i, &v) in idx.iter().enumerate() {
            let c = if i <= chunk.len() {
                BASE64_ALPHABET[v as usize]
            } else {
                b'='
            };
            out.push(c).map_err(|_| Error::OutOfMemory)?;
        }
    }
    Ok(())
}

pub fn decode_base64<const N: usize>(text: &str, out: &mut Vec<u8, N>) -> Result<()> {
    let mut acc: u32 = 0;
    let mut nbits = 0;
    for c in text.bytes() {
        let v = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            b'=' | b'\r' | b'\n' => continue,
            _ => return Err(Error::InvalidArgument),
        };
        acc = (acc << 6) | v as u32;
        nbits += 6;
        if nbits >= 8 {
            nbits -= 8;
            out.push((acc >> nbits) as u8).map_err(|_| Error::OutOfMemory)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let mut encoded = Vec::<u8, 64>::new();
        encode_base64(b"light work.", &mut encoded).unwrap();
        assert_eq!(encoded.as_slice(), b"bGlnaHQgd29yay4=");

        let mut decoded = Vec::<u8, 64>::new();
        decode_base64(core::str::from_utf8(&encoded).unwrap(), &mut decoded).unwrap();
        assert_eq!(decoded.as_slice(), b"light work.");
    }

    #[test]
    fn ascii_content_goes_out_plain() {
        let content = encode_content("hello", ContentEncoding::Base64).unwrap();
        assert_eq!(content.charset, ContentCharset::Ascii);
        assert_eq!(content.encoding, ContentEncoding::None);
        assert_eq!(content.data.as_slice(), b"hello");
    }

    #[test]
    fn non_ascii_content_honors_requested_encoding() {
        let content = encode_content("héllo", ContentEncoding::Base64).unwrap();
        assert_eq!(content.charset, ContentCharset::Utf8);
        assert_eq!(content.encoding, ContentEncoding::Base64);

        let roundtrip = decode_content(&content).unwrap();
        assert_eq!(roundtrip.as_str(), "héllo");
    }

    #[test]
    fn hex_content_round_trips() {
        let content = encode_content("héllo", ContentEncoding::Hex).unwrap();
        assert_eq!(content.encoding, ContentEncoding::Hex);
        let roundtrip = decode_content(&content).unwrap();
        assert_eq!(roundtrip.as_str(), "héllo");
    }

    #[test]
    fn text_scts_parsing() {
        let scts = parse_text_scts("11/11/23,14:42:17+00");
        assert_eq!(scts.year, 11);
        assert_eq!(scts.month, 11);
        assert_eq!(scts.day, 23);
        assert_eq!(scts.hour, 14);
        assert_eq!(scts.minute, 42);
        assert_eq!(scts.second, 17);
        assert_eq!(scts.timezone, 0);
    }

    #[test]
    fn incoming_pdu_becomes_event() {
        // Deliver of "Hi" from +14165551212 (see the codec tests).
        let line = "07912121551512f2040b914161551512f200006280102100000002c834";
        let event = decode_incoming_pdu(line, ContentEncoding::Base64).unwrap();
        assert_eq!(event.from.digits.as_str(), "14165551212");
        assert_eq!(event.content.data.as_slice(), b"Hi");
        assert_eq!(event.content.charset, ContentCharset::Ascii);
        assert_eq!(event.scts.day, 1);
    }

    #[test]
    fn incoming_text_fallback() {
        let event = decode_incoming_text("\"+15145551212\",,\"11/11/23,14:42:17+00\"", "hello there");
        assert_eq!(event.from.digits.as_str(), "+15145551212");
        assert_eq!(event.content.data.as_slice(), b"hello there");
        assert_eq!(event.scts.minute, 42);
    }
}
