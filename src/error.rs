/// Errors surfaced by the engine entry points and internal components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Generic failure with no more specific kind.
    Fail,
    /// A bounded container had no room left for the request.
    OutOfMemory,
    /// The modem did not answer within the command timeout.
    Timeout,
    /// The operation exists in the chip interface but is not implemented
    /// for the configured module.
    NotImplemented,
    /// A parameter was outside its documented range.
    InvalidArgument,
    /// The requested id is already in use.
    Busy,
}

pub type Result<T> = core::result::Result<T, Error>;
