use thiserror::Error;

/// Local argument validation failures, raised before any framing or I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Quantity {quantity} out of range [{min}, {max}] for function {function:#04X}")]
    QuantityOutOfRange {
        function: u8,
        quantity: u16,
        min: u16,
        max: u16,
    },

    #[error("Address span {address:#06X}+{quantity} exceeds the 0xFFFF address space")]
    AddressOverflow { address: u16, quantity: u16 },

    #[error("Invalid coil value {value:#06X}, expected 0x0000 or 0xFF00")]
    InvalidCoilValue { value: u16 },

    #[error(
        "Payload length {actual} does not match expected {expected} for function {function:#04X}"
    )]
    PayloadLength {
        function: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Payload length {0} is not a whole number of 16-bit words")]
    UnalignedPayload(usize),
}
