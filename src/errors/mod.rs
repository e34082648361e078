mod config;
mod correlation;
mod exception;
mod frame;
mod master;
mod request;
mod transport;

pub use exception::ACKNOWLEDGE;
pub use exception::GATEWAY_PATH_UNAVAILABLE;
pub use exception::GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND;
pub use exception::ILLEGAL_DATA_ADDRESS;
pub use exception::ILLEGAL_DATA_VALUE;
pub use exception::ILLEGAL_FUNCTION;
pub use exception::MEMORY_PARITY_ERROR;
pub use exception::SERVER_DEVICE_BUSY;
pub use exception::SERVER_DEVICE_FAILURE;

pub use config::ConfigError;
pub use correlation::CorrelationError;
pub use exception::ExceptionError;
pub use frame::FrameError;
pub use frame::FrameFormatKind;
pub use frame::FrameSizeKind;
pub use master::MasterError;
pub use request::RequestError;
pub use transport::IoOperation;
pub use transport::TransportError;
