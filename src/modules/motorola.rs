//! Motorola GSM module family (G24 and the Junghanns QuadGSM carriers).

use super::{ChipOps, CodecMask};
use crate::cmd::ResponseHandler;
use crate::error::{Error, Result};
use crate::span::Span;

#[derive(Debug, Clone, Copy)]
pub struct Motorola;

impl ChipOps for Motorola {
    fn start(&self, span: &mut Span) -> Result<()> {
        debug!("Starting Motorola module");

        // Route incoming SMS directly to the terminal.
        span.enqueue_cmd_default(
            "AT+CNMI=0,2,2",
            ResponseHandler::ExpectOk("enable new message indications"),
        );
        Ok(())
    }

    fn restart(&self, span: &mut Span) -> Result<()> {
        debug!("Restarting Motorola module");
        let _ = span;
        Err(Error::NotImplemented)
    }

    fn shutdown(&self, span: &mut Span) -> Result<()> {
        debug!("Stopping Motorola module");
        let _ = span;
        Ok(())
    }

    fn set_codec(&self, span: &mut Span, _mask: CodecMask) -> Result<()> {
        // The AT+MVC codec preference command is not recognized by the
        // QuadGSM carrier, so this stays a no-op.
        debug!("Setting codec preferences unsupported");
        let _ = span;
        Ok(())
    }

    fn wait_sim(&self, span: &mut Span) -> Result<()> {
        info!("Waiting for SIM access...");

        span.enqueue_cmd_default("AT+CMEE=2", ResponseHandler::None);
        span.enqueue_cmd_default("AT+MADIGITAL=1", ResponseHandler::None);
        span.enqueue_cmd_default("AT+CPIN?", ResponseHandler::ExpectOk("query SIM readiness"));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "motorola"
    }
}
