//! A Modbus master protocol stack.
//!
//! Three layers: a [`Client`] dispatches typed function-code operations, a
//! [`Packager`] frames PDUs for the link (RTU, ASCII or TCP), and a
//! [`Transporter`] delivers frames with per-attempt timeout, bounded retry
//! and cancellation.

pub mod client;
pub mod config;
pub mod errors;
pub mod frame;
pub mod pdu;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use errors::ExceptionError;
pub use errors::MasterError;
pub use frame::AsciiPackager;
pub use frame::Packager;
pub use frame::RtuPackager;
pub use frame::TcpPackager;
pub use pdu::ProtocolDataUnit;
pub use transport::FrameFormat;
pub use transport::StreamTransport;
pub use transport::Transporter;
