use embassy_time::Duration;

use crate::modules::ModuleKind;
use crate::sms::ContentEncoding;

/// Debug mask bits. These only influence log verbosity, never behavior.
pub mod debug {
    /// Show raw uart reads and writes.
    pub const UART_RAW: u32 = 1 << 0;
    /// Show AT commands going in and out.
    pub const UART_DUMP: u32 = 1 << 1;
    /// Call and SMS state changes.
    pub const CALL_STATE: u32 = 1 << 2;
    /// How received bytes are tokenized.
    pub const AT_PARSE: u32 = 1 << 3;
    /// How AT commands are scheduled and dispatched.
    pub const AT_HANDLE: u32 = 1 << 4;
    /// SMS PDU encoding.
    pub const SMS_ENCODE: u32 = 1 << 5;
    /// SMS PDU decoding.
    pub const SMS_DECODE: u32 = 1 << 6;
}

/// Per-span configuration, fixed between `span_config` and `span_unconfig`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpanConfig {
    pub module: ModuleKind,
    /// How long to wait for a CLIP after CRING before resyncing with the
    /// modem call list.
    pub timeout_cid_num: Duration,
    /// Default timeout applied to enqueued AT commands. Dial, answer and
    /// hangup carry their own longer timeouts.
    pub timeout_command: Duration,
    /// Interval of the `AT+CLCC` progress poll while an outbound call is
    /// being established.
    pub progress_poll_interval: Duration,
    /// Interval of the periodic `AT+CSQ` signal poll. Zero disables it.
    pub signal_poll_interval: Duration,
    /// Requested transport encoding for incoming SMS bodies that are not
    /// plain ASCII.
    pub incoming_sms_encoding: ContentEncoding,
    pub debug_mask: u32,
}

impl SpanConfig {
    pub fn new(module: ModuleKind) -> Self {
        Self {
            module,
            timeout_cid_num: Duration::from_secs(10),
            timeout_command: Duration::from_secs(10),
            progress_poll_interval: Duration::from_millis(750),
            signal_poll_interval: Duration::from_secs(0),
            incoming_sms_encoding: ContentEncoding::Base64,
            debug_mask: 0,
        }
    }

    pub(crate) fn debug(&self, bit: u32) -> bool {
        self.debug_mask & bit != 0
    }
}
