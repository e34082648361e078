use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::ClientConfig,
    errors::{FrameError, FrameSizeKind, MasterError, RequestError},
    frame::Packager,
    pdu::{
        self, ProtocolDataUnit, DIAGNOSTICS, GET_COMM_EVENT_COUNTER, GET_COMM_EVENT_LOG,
        READ_COILS, READ_DISCRETE_INPUTS, READ_EXCEPTION_STATUS, READ_HOLDING_REGISTERS,
        READ_INPUT_REGISTERS, WRITE_MULTIPLE_COILS, WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_COIL,
        WRITE_SINGLE_REGISTER,
    },
    transport::Transporter,
};

/// Coil values accepted by Write Single Coil (0x05).
pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

/// The function dispatcher: one operation per Modbus function code.
///
/// Each operation validates its arguments locally, builds a PDU, frames it
/// through the packager and delivers it through the transporter. Exactly
/// one logical request goes out per call; retries inside the transporter
/// re-send the same frame.
///
/// Success returns the reply PDU's data with the function code stripped;
/// an exception reply surfaces as [`MasterError::Exception`].
pub struct Client<P, T> {
    packager: P,
    transporter: T,
    config: ClientConfig,
}

impl<P, T> Client<P, T>
where
    P: Packager,
    T: Transporter,
{
    pub fn new(packager: P, transporter: T, config: ClientConfig) -> Result<Self, MasterError> {
        config.validate()?;
        Ok(Self {
            packager,
            transporter,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read the ON/OFF state of 1-2000 coils (function code 0x01).
    ///
    /// Returns the packed bitmask bytes, byte count first.
    pub async fn read_coils(
        &self,
        address: u16,
        quantity: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        check_quantity(READ_COILS, quantity)?;
        check_span(address, quantity)?;
        self.execute(self.request(READ_COILS, range_payload(address, quantity)), cancel)
            .await
    }

    /// Read the state of 1-2000 discrete inputs (function code 0x02).
    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        check_quantity(READ_DISCRETE_INPUTS, quantity)?;
        check_span(address, quantity)?;
        self.execute(
            self.request(READ_DISCRETE_INPUTS, range_payload(address, quantity)),
            cancel,
        )
        .await
    }

    /// Read 1-125 holding registers (function code 0x03).
    ///
    /// Returns the register bytes, byte count first, two bytes per
    /// register big-endian unless reply-word swapping is configured.
    pub async fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        check_quantity(READ_HOLDING_REGISTERS, quantity)?;
        check_span(address, quantity)?;
        self.execute(
            self.request(READ_HOLDING_REGISTERS, range_payload(address, quantity)),
            cancel,
        )
        .await
    }

    /// Read 1-125 input registers (function code 0x04).
    pub async fn read_input_registers(
        &self,
        address: u16,
        quantity: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        check_quantity(READ_INPUT_REGISTERS, quantity)?;
        check_span(address, quantity)?;
        self.execute(
            self.request(READ_INPUT_REGISTERS, range_payload(address, quantity)),
            cancel,
        )
        .await
    }

    /// Force a single coil ON or OFF (function code 0x05).
    ///
    /// `value` must be [`COIL_ON`] (0xFF00) or [`COIL_OFF`] (0x0000); any
    /// other value fails locally without touching the transport.
    pub async fn write_single_coil(
        &self,
        address: u16,
        value: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        if value != COIL_ON && value != COIL_OFF {
            return Err(RequestError::InvalidCoilValue { value }.into());
        }
        self.execute(
            self.request(WRITE_SINGLE_COIL, range_payload(address, value)),
            cancel,
        )
        .await
    }

    /// Write a single holding register (function code 0x06).
    pub async fn write_single_register(
        &self,
        address: u16,
        value: u16,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        self.execute(
            self.request(WRITE_SINGLE_REGISTER, range_payload(address, value)),
            cancel,
        )
        .await
    }

    /// Read the eight internal exception-status coils (function code 0x07,
    /// serial line). Passed through unchanged on any binding.
    pub async fn read_exception_status(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        self.execute(self.request(READ_EXCEPTION_STATUS, Vec::new()), cancel)
            .await
    }

    /// Run a diagnostics sub-function (function code 0x08, serial line).
    ///
    /// `data` is a sequence of register-sized words; sub-function semantics
    /// are device-specific and not interpreted here.
    pub async fn diagnostics(
        &self,
        sub_function: u16,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        if data.len() % 2 != 0 {
            return Err(RequestError::UnalignedPayload(data.len()).into());
        }
        let mut payload = Vec::with_capacity(2 + data.len());
        payload.extend_from_slice(&sub_function.to_be_bytes());
        payload.extend_from_slice(data);
        self.execute(self.request(DIAGNOSTICS, payload), cancel).await
    }

    /// Read the communication event counter (function code 0x0B, serial
    /// line).
    pub async fn get_comm_event_counter(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        self.execute(self.request(GET_COMM_EVENT_COUNTER, Vec::new()), cancel)
            .await
    }

    /// Read the communication event log (function code 0x0C, serial line).
    pub async fn get_comm_event_log(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        self.execute(self.request(GET_COMM_EVENT_LOG, Vec::new()), cancel)
            .await
    }

    /// Force a sequence of 1-1968 coils (function code 0x0F).
    ///
    /// `values` packs one coil per bit, LSB first, and must be exactly
    /// `ceil(quantity / 8)` bytes.
    pub async fn write_multiple_coils(
        &self,
        address: u16,
        quantity: u16,
        values: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        check_quantity(WRITE_MULTIPLE_COILS, quantity)?;
        check_span(address, quantity)?;

        let expected = (quantity as usize + 7) / 8;
        if values.len() != expected {
            return Err(RequestError::PayloadLength {
                function: WRITE_MULTIPLE_COILS,
                expected,
                actual: values.len(),
            }
            .into());
        }

        self.execute(
            self.request(
                WRITE_MULTIPLE_COILS,
                values_payload(address, quantity, values),
            ),
            cancel,
        )
        .await
    }

    /// Write a block of 1-123 holding registers (function code 0x10).
    ///
    /// `values` must be exactly `quantity * 2` bytes.
    pub async fn write_multiple_registers(
        &self,
        address: u16,
        quantity: u16,
        values: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        check_quantity(WRITE_MULTIPLE_REGISTERS, quantity)?;
        check_span(address, quantity)?;

        let expected = quantity as usize * 2;
        if values.len() != expected {
            return Err(RequestError::PayloadLength {
                function: WRITE_MULTIPLE_REGISTERS,
                expected,
                actual: values.len(),
            }
            .into());
        }

        self.execute(
            self.request(
                WRITE_MULTIPLE_REGISTERS,
                values_payload(address, quantity, values),
            ),
            cancel,
        )
        .await
    }

    fn request(&self, function_code: u8, data: Vec<u8>) -> ProtocolDataUnit {
        let mut request = ProtocolDataUnit::new(function_code, data);
        request.reverse_output_byte_order = self.config.swap_request_words;
        request.reverse_input_byte_order = self.config.swap_reply_words;
        request
    }

    async fn execute(
        &self,
        request: ProtocolDataUnit,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        let function_code = request.function_code;
        debug!(
            "Executing function {:#04X} with {} payload bytes",
            function_code,
            request.data.len()
        );

        let request_adu = self.packager.encode(&request)?;
        let reply_adu = self
            .transporter
            .send(
                &request_adu,
                self.config.wait_times,
                self.config.timeout,
                cancel,
            )
            .await?;

        let reply = self.packager.decode(&reply_adu)?;
        self.packager.verify(&request_adu, &reply_adu)?;

        let mut data = reply.data;
        check_reply_shape(function_code, &data, &reply_adu)?;

        if self.config.swap_reply_words {
            if let Some(region) = pdu::reply_word_region(function_code, data.len()) {
                pdu::swap_words(&mut data[region]);
            }
        }

        Ok(data)
    }
}

/// address(2) + quantity-or-value(2), the payload of most requests.
fn range_payload(address: u16, word: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&address.to_be_bytes());
    data.extend_from_slice(&word.to_be_bytes());
    data
}

/// address(2) + quantity(2) + byte count(1) + values(N).
fn values_payload(address: u16, quantity: u16, values: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(5 + values.len());
    data.extend_from_slice(&address.to_be_bytes());
    data.extend_from_slice(&quantity.to_be_bytes());
    data.push(values.len() as u8);
    data.extend_from_slice(values);
    data
}

fn check_quantity(function_code: u8, quantity: u16) -> Result<(), RequestError> {
    let spec = pdu::function_spec(function_code)
        .and_then(|spec| spec.quantity)
        .unwrap_or((0, u16::MAX));
    let (min, max) = spec;

    if quantity < min || quantity > max {
        return Err(RequestError::QuantityOutOfRange {
            function: function_code,
            quantity,
            min,
            max,
        });
    }

    Ok(())
}

/// The last touched address, `address + quantity - 1`, must stay within
/// the 16-bit address space.
fn check_span(address: u16, quantity: u16) -> Result<(), RequestError> {
    if address as u32 + quantity as u32 > 0x1_0000 {
        return Err(RequestError::AddressOverflow { address, quantity });
    }

    Ok(())
}

/// Byte-count-prefixed replies must carry as many bytes as they announce.
fn check_reply_shape(
    function_code: u8,
    data: &[u8],
    reply_adu: &[u8],
) -> Result<(), MasterError> {
    let counted = matches!(
        function_code,
        READ_COILS
            | READ_DISCRETE_INPUTS
            | READ_HOLDING_REGISTERS
            | READ_INPUT_REGISTERS
            | GET_COMM_EVENT_LOG
    );
    if !counted {
        return Ok(());
    }

    let announced = data.first().copied().unwrap_or(0) as usize;
    if data.is_empty() || announced != data.len() - 1 {
        return Err(FrameError::size(
            FrameSizeKind::LengthMismatch,
            format!(
                "Reply announces {} data bytes but carries {}",
                announced,
                data.len().saturating_sub(1)
            ),
            Some(reply_adu.to_vec()),
        )
        .into());
    }

    Ok(())
}
