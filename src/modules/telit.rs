//! Telit GSM module family.

use core::fmt::Write;

use heapless::String;

use super::{ChipOps, CodecMask};
use crate::cmd::{NotifyKind, ResponseHandler};
use crate::error::{Error, Result};
use crate::span::Span;

#[derive(Debug, Clone, Copy)]
pub struct Telit;

impl ChipOps for Telit {
    fn start(&self, span: &mut Span) -> Result<()> {
        debug!("Starting Telit module");

        // Options recommended by section 2.1 of the Telit AT commands
        // reference guide.
        span.enqueue_cmd_default("AT#SELINT=2", ResponseHandler::ExpectOk("enable interface type"));
        span.enqueue_cmd_default("AT#SMSMODE=1", ResponseHandler::ExpectOk("enable sms mode"));

        // AT#REGMODE=1 makes CREG behavior more formal.
        span.enqueue_cmd_default("AT#REGMODE=1", ResponseHandler::None);
        span.enqueue_cmd_default(
            "AT#DVI=1,1,0",
            ResponseHandler::ExpectOk("enable Digital Voice Interface"),
        );

        // Echo cancellation on the handset audio path.
        span.enqueue_cmd_default("AT#SHFEC=1", ResponseHandler::None);
        span.enqueue_cmd_default("AT#SHSEC=1", ResponseHandler::None);

        // Sidetone sounds like echo on calls with long delay, keep it off.
        span.enqueue_cmd_default("AT#SHSSD=0", ResponseHandler::ExpectOk("disable sidetone"));

        // Short-mode codec notifications, reporting only the codec in use.
        span.enqueue_cmd_default(
            "AT#CODECINFO=1,2",
            ResponseHandler::ExpectOk("enable codec notifications"),
        );
        span.register_notify("#CODECINFO", NotifyKind::CodecInfo)?;

        Ok(())
    }

    fn restart(&self, span: &mut Span) -> Result<()> {
        debug!("Restarting Telit module");
        let _ = span;
        Err(Error::NotImplemented)
    }

    fn shutdown(&self, span: &mut Span) -> Result<()> {
        debug!("Stopping Telit module");
        let _ = span;
        Ok(())
    }

    fn set_codec(&self, span: &mut Span, mask: CodecMask) -> Result<()> {
        let mut cmd = String::<32>::new();
        write!(cmd, "AT#CODEC={}", mask).map_err(|_| Error::Fail)?;
        span.enqueue_cmd_default(&cmd, ResponseHandler::ExpectOk("set codec preferences"));
        Ok(())
    }

    fn wait_sim(&self, span: &mut Span) -> Result<()> {
        span.enqueue_cmd_default("AT+CPIN?", ResponseHandler::ExpectOk("query SIM readiness"));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telit"
    }
}
