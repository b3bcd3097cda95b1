use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("Buffer too small")]
    BufferTooSmallError,
    #[error("Cannot parse string as the given type")]
    ParseError,
    #[error("Inconsistent AT response")]
    ModemError,
    #[error("AT error response")]
    AtErrorResponse,
    #[error("UART read error")]
    UartReadError,
    #[error("UART write error")]
    UartWriteError,
    #[error("String encoding error")]
    StringEncodingError,
    #[error("Timeout error")]
    TimeoutError,
    #[error("Reference calibration missing")]
    CalibrationMissing,
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Current range overflow")]
    RangeOverflow,
    #[error("Invalid argument")]
    InvalidArgument,
}

impl Error {
    /// Low byte of the 16-bit wire code.
    pub const fn kind(&self) -> u8 {
        match self {
            Error::TimeoutError => 0x01,
            Error::CalibrationMissing => 0x02,
            Error::ModemError => 0x03,
            Error::AtErrorResponse => 0x04,
            Error::PayloadTooLarge => 0x05,
            Error::RangeOverflow => 0x06,
            Error::InvalidArgument => 0x07,
            Error::BufferTooSmallError => 0x08,
            Error::ParseError => 0x09,
            Error::UartReadError => 0x0A,
            Error::UartWriteError => 0x0B,
            Error::StringEncodingError => 0x0C,
        }
    }

    /// Code reported to the backend in an error-stack frame.
    pub const fn code(&self, source: ErrorSource) -> u16 {
        ((source as u16) << 8) | self.kind() as u16
    }
}

/// Component that raised an error, the high byte of the wire code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ErrorSource {
    Range = 1,
    Analog = 2,
    Uplink = 3,
    Supervisor = 4,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::RangeOverflow.code(ErrorSource::Range), 0x0106);
        assert_eq!(Error::TimeoutError.code(ErrorSource::Uplink), 0x0301);
        assert_eq!(Error::CalibrationMissing.code(ErrorSource::Analog), 0x0202);
    }
}
