use std::ops::Range;

/// Function codes for bit access.
pub const READ_COILS: u8 = 0x01;
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Function codes for 16-bit access.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Serial-line diagnostics function codes.
pub const READ_EXCEPTION_STATUS: u8 = 0x07;
pub const DIAGNOSTICS: u8 = 0x08;
pub const GET_COMM_EVENT_COUNTER: u8 = 0x0B;
pub const GET_COMM_EVENT_LOG: u8 = 0x0C;

/// Set on the reply function code when the server rejected the request.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Maximum PDU size (function code + data) on any binding.
pub const MAX_PDU_SIZE: usize = 253;

/// ProtocolDataUnit (PDU) is independent of underlying communication layers.
///
/// `reverse_output_byte_order` asks the packager to byte-swap each 16-bit
/// word of the request's register-data region before framing;
/// `reverse_input_byte_order` asks the client to apply the same swap to the
/// decoded reply data. Swaps are per-word only, never across words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDataUnit {
    pub function_code: u8,
    pub data: Vec<u8>,
    pub reverse_input_byte_order: bool,
    pub reverse_output_byte_order: bool,
}

impl ProtocolDataUnit {
    pub fn new(function_code: u8, data: Vec<u8>) -> Self {
        Self {
            function_code,
            data,
            reverse_input_byte_order: false,
            reverse_output_byte_order: false,
        }
    }
}

/// Per-function quantity bounds. Process-wide constant, never mutated.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub function_code: u8,
    /// Inclusive quantity bounds, when the function carries a quantity.
    pub quantity: Option<(u16, u16)>,
}

pub const FUNCTION_SPECS: [FunctionSpec; 12] = [
    FunctionSpec {
        function_code: READ_COILS,
        quantity: Some((0x0001, 0x07D0)),
    },
    FunctionSpec {
        function_code: READ_DISCRETE_INPUTS,
        quantity: Some((0x0001, 0x07D0)),
    },
    FunctionSpec {
        function_code: READ_HOLDING_REGISTERS,
        quantity: Some((0x0001, 0x007D)),
    },
    FunctionSpec {
        function_code: READ_INPUT_REGISTERS,
        quantity: Some((0x0001, 0x007D)),
    },
    FunctionSpec {
        function_code: WRITE_SINGLE_COIL,
        quantity: None,
    },
    FunctionSpec {
        function_code: WRITE_SINGLE_REGISTER,
        quantity: None,
    },
    FunctionSpec {
        function_code: READ_EXCEPTION_STATUS,
        quantity: None,
    },
    FunctionSpec {
        function_code: DIAGNOSTICS,
        quantity: None,
    },
    FunctionSpec {
        function_code: GET_COMM_EVENT_COUNTER,
        quantity: None,
    },
    FunctionSpec {
        function_code: GET_COMM_EVENT_LOG,
        quantity: None,
    },
    FunctionSpec {
        function_code: WRITE_MULTIPLE_COILS,
        quantity: Some((0x0001, 0x07B0)),
    },
    FunctionSpec {
        function_code: WRITE_MULTIPLE_REGISTERS,
        quantity: Some((0x0001, 0x007B)),
    },
];

pub fn function_spec(function_code: u8) -> Option<&'static FunctionSpec> {
    FUNCTION_SPECS
        .iter()
        .find(|spec| spec.function_code == function_code)
}

/// Byte-swap each 16-bit word in place. A trailing odd byte is left alone.
pub fn swap_words(data: &mut [u8]) {
    for word in data.chunks_exact_mut(2) {
        word.swap(0, 1);
    }
}

/// Register-data region of a request payload, if the function carries one.
pub fn request_word_region(function_code: u8, data_len: usize) -> Option<Range<usize>> {
    match function_code {
        WRITE_SINGLE_REGISTER if data_len >= 4 => Some(2..4),
        WRITE_MULTIPLE_REGISTERS if data_len > 5 => Some(5..data_len),
        DIAGNOSTICS if data_len > 2 => Some(2..data_len),
        _ => None,
    }
}

/// Register-data region of a reply payload, if the function carries one.
pub fn reply_word_region(function_code: u8, data_len: usize) -> Option<Range<usize>> {
    match function_code {
        READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS if data_len > 1 => Some(1..data_len),
        WRITE_SINGLE_REGISTER if data_len >= 4 => Some(2..4),
        DIAGNOSTICS if data_len > 2 => Some(2..data_len),
        GET_COMM_EVENT_COUNTER if data_len >= 4 => Some(0..4),
        _ => None,
    }
}
