use thiserror::Error;

/// Exception codes returned by a server device in an exception reply.
pub const ILLEGAL_FUNCTION: u8 = 0x01;
pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
pub const SERVER_DEVICE_FAILURE: u8 = 0x04;
pub const ACKNOWLEDGE: u8 = 0x05;
pub const SERVER_DEVICE_BUSY: u8 = 0x06;
pub const MEMORY_PARITY_ERROR: u8 = 0x08;
pub const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
pub const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;

/// A well-formed exception reply from the server device.
///
/// `function_code` is the request's function code with the exception flag
/// already stripped. Callers branch on `exception_code`; the rendered
/// message is presentation-only.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("modbus: exception '{exception_code}' ({msg}), function '{function_code}'", msg = self.message())]
pub struct ExceptionError {
    pub function_code: u8,
    pub exception_code: u8,
}

impl ExceptionError {
    pub fn new(function_code: u8, exception_code: u8) -> Self {
        Self {
            function_code,
            exception_code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self.exception_code {
            ILLEGAL_FUNCTION => "illegal function",
            ILLEGAL_DATA_ADDRESS => "illegal data address",
            ILLEGAL_DATA_VALUE => "illegal data value",
            SERVER_DEVICE_FAILURE => "server device failure",
            ACKNOWLEDGE => "acknowledge",
            SERVER_DEVICE_BUSY => "server device busy",
            MEMORY_PARITY_ERROR => "memory parity error",
            GATEWAY_PATH_UNAVAILABLE => "gateway path unavailable",
            GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND => "gateway target device failed to respond",
            _ => "unknown",
        }
    }
}
