use thiserror::Error;

/// Frame integrity failures detected while encoding or decoding an ADU.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame size error: {kind} - {details}")]
    Size {
        kind: FrameSizeKind,
        details: String,
        frame_data: Option<Vec<u8>>,
    },

    #[error("Frame format error: {kind} - {details}")]
    Format {
        kind: FrameFormatKind,
        details: String,
        frame_data: Option<Vec<u8>>,
    },

    #[error("CRC error: calculated={calculated:04X}, received={received:04X}, frame={frame_hex}")]
    Crc {
        calculated: u16,
        received: u16,
        frame_hex: String,
    },

    #[error("LRC error: calculated={calculated:02X}, received={received:02X}, frame={frame_hex}")]
    Lrc {
        calculated: u8,
        received: u8,
        frame_hex: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeKind {
    TooShort,
    TooLong,
    LengthMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormatKind {
    InvalidHeader,
    InvalidFormat,
    UnexpectedResponse,
}

impl FrameError {
    pub fn size(
        kind: FrameSizeKind,
        details: impl Into<String>,
        frame_data: Option<Vec<u8>>,
    ) -> Self {
        FrameError::Size {
            kind,
            details: details.into(),
            frame_data,
        }
    }

    pub fn format(
        kind: FrameFormatKind,
        details: impl Into<String>,
        frame_data: Option<Vec<u8>>,
    ) -> Self {
        FrameError::Format {
            kind,
            details: details.into(),
            frame_data,
        }
    }
}

impl std::fmt::Display for FrameSizeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "Frame too short"),
            Self::TooLong => write!(f, "Frame too long"),
            Self::LengthMismatch => write!(f, "Length field mismatch"),
        }
    }
}

impl std::fmt::Display for FrameFormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "Invalid frame header"),
            Self::InvalidFormat => write!(f, "Invalid frame format"),
            Self::UnexpectedResponse => write!(f, "Unexpected response"),
        }
    }
}
