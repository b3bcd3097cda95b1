//! Binary uplink frames.
//!
//! Fields are packed big-endian and back to back, without any alignment padding. Each frame is
//! described by a table of field widths in bits.

use heapless::Vec;

use crate::config::FirmwareInfo;
use crate::error::Error;
use crate::range::RangeLevel;
use crate::status::{ERROR_STACK_SIZE, Sample, TMCU_UNAVAILABLE};

/// Largest payload accepted by the modem.
pub const MAX_PAYLOAD: usize = 12;

/// reset_reason, major_version, minor_version, commit_index, commit_id, dirty_flag
pub const STARTUP_FIELDS: [u8; 6] = [8, 8, 8, 8, 28, 4];
/// vout_mv, range, iout_ua, vmcu_mv, tmcu_degrees
pub const MONITORING_FIELDS: [u8; 5] = [16, 8, 24, 16, 8];
pub const ERROR_CODE_BITS: u8 = 16;

pub const STARTUP_LEN: usize = 8;
pub const MONITORING_LEN: usize = 9;

/// Current reported while the bypass switch is engaged.
pub const IOUT_UNAVAILABLE: u32 = (1 << 24) - 1;

/// Packs `values` into `out` using `widths` bits for each one. Values are truncated to their
/// width. Returns the number of bytes used.
pub fn pack_fields(widths: &[u8], values: &[u32], out: &mut [u8]) -> crate::Result<usize> {
    if widths.len() != values.len() || widths.iter().any(|w| *w == 0 || *w > 32) {
        return Err(Error::InvalidArgument);
    }
    let total_bits: usize = widths.iter().map(|w| usize::from(*w)).sum();
    let len = total_bits.div_ceil(8);
    if out.len() < len {
        return Err(Error::BufferTooSmallError);
    }
    out[..len].fill(0);

    let mut pos = 0;
    for (width, value) in widths.iter().zip(values) {
        for bit in (0..*width).rev() {
            if (value >> bit) & 1 == 1 {
                out[pos / 8] |= 0x80 >> (pos % 8);
            }
            pos += 1;
        }
    }
    Ok(len)
}

/// Reads the fields described by `widths` from `bytes`.
pub fn unpack_fields<const N: usize>(widths: &[u8; N], bytes: &[u8]) -> crate::Result<[u32; N]> {
    if widths.iter().any(|w| *w == 0 || *w > 32) {
        return Err(Error::InvalidArgument);
    }
    let total_bits: usize = widths.iter().map(|w| usize::from(*w)).sum();
    if bytes.len() < total_bits.div_ceil(8) {
        return Err(Error::BufferTooSmallError);
    }

    let mut values = [0u32; N];
    let mut pos = 0;
    for (width, value) in widths.iter().zip(values.iter_mut()) {
        for _ in 0..*width {
            let bit = (bytes[pos / 8] >> (7 - pos % 8)) & 1;
            *value = (*value << 1) | u32::from(bit);
            pos += 1;
        }
    }
    Ok(values)
}

/// Sign-magnitude temperature byte, `0x7F` when unavailable.
pub fn encode_temperature(degrees: i8) -> u8 {
    if degrees == TMCU_UNAVAILABLE {
        return 0x7F;
    }
    let magnitude = degrees.unsigned_abs().min(0x7E);
    if degrees < 0 { 0x80 | magnitude } else { magnitude }
}

pub fn decode_temperature(byte: u8) -> i8 {
    if byte == 0x7F {
        return TMCU_UNAVAILABLE;
    }
    let magnitude = (byte & 0x7F) as i8;
    if byte & 0x80 != 0 { -magnitude } else { magnitude }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartupFrame {
    pub reset_reason: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub commit_index: u8,
    pub commit_id: u32,
    pub dirty: bool,
}

impl From<&FirmwareInfo> for StartupFrame {
    fn from(info: &FirmwareInfo) -> Self {
        Self {
            reset_reason: info.reset_reason,
            major_version: info.major_version,
            minor_version: info.minor_version,
            commit_index: info.commit_index,
            commit_id: info.commit_id & 0x0FFF_FFFF,
            dirty: info.dirty,
        }
    }
}

impl StartupFrame {
    pub fn encode(&self) -> crate::Result<[u8; STARTUP_LEN]> {
        let mut bytes = [0; STARTUP_LEN];
        pack_fields(
            &STARTUP_FIELDS,
            &[
                u32::from(self.reset_reason),
                u32::from(self.major_version),
                u32::from(self.minor_version),
                u32::from(self.commit_index),
                self.commit_id,
                u32::from(self.dirty),
            ],
            &mut bytes,
        )?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let [reset_reason, major, minor, index, commit_id, dirty] =
            unpack_fields(&STARTUP_FIELDS, bytes)?;
        Ok(Self {
            reset_reason: reset_reason as u8,
            major_version: major as u8,
            minor_version: minor as u8,
            commit_index: index as u8,
            commit_id,
            dirty: dirty != 0,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonitoringFrame {
    pub vout_mv: u16,
    pub range: RangeLevel,
    pub iout_ua: u32,
    pub vmcu_mv: u16,
    pub tmcu_degrees: i8,
}

impl MonitoringFrame {
    /// Builds the frame of a sample. Values outside of their field are clamped.
    ///
    /// While the bypass is engaged the current cannot be measured, the frame then carries
    /// range `None` and an all-ones current.
    pub fn from_sample(sample: &Sample) -> Self {
        let (range, iout_ua) = if sample.bypass {
            (RangeLevel::None, IOUT_UNAVAILABLE)
        } else {
            (
                sample.range,
                sample.iout_ua.clamp(0, IOUT_UNAVAILABLE as i32 - 1) as u32,
            )
        };
        Self {
            vout_mv: sample.vout_mv.clamp(0, i32::from(u16::MAX)) as u16,
            range,
            iout_ua,
            vmcu_mv: sample.vmcu_mv.clamp(0, i32::from(u16::MAX)) as u16,
            tmcu_degrees: sample.tmcu_degrees,
        }
    }

    pub fn encode(&self) -> crate::Result<[u8; MONITORING_LEN]> {
        let mut bytes = [0; MONITORING_LEN];
        pack_fields(
            &MONITORING_FIELDS,
            &[
                u32::from(self.vout_mv),
                self.range as u32,
                self.iout_ua,
                u32::from(self.vmcu_mv),
                u32::from(encode_temperature(self.tmcu_degrees)),
            ],
            &mut bytes,
        )?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let [vout_mv, range, iout_ua, vmcu_mv, tmcu] = unpack_fields(&MONITORING_FIELDS, bytes)?;
        Ok(Self {
            vout_mv: vout_mv as u16,
            range: RangeLevel::try_from(range as u8)?,
            iout_ua,
            vmcu_mv: vmcu_mv as u16,
            tmcu_degrees: decode_temperature(tmcu as u8),
        })
    }
}

/// Error codes, oldest first.
pub fn encode_error_stack(codes: &[u16]) -> crate::Result<Vec<u8, MAX_PAYLOAD>> {
    if codes.len() > ERROR_STACK_SIZE {
        return Err(Error::PayloadTooLarge);
    }
    let mut bytes = Vec::new();
    for code in codes {
        bytes
            .extend_from_slice(&code.to_be_bytes())
            .map_err(|_| Error::BufferTooSmallError)?;
    }
    Ok(bytes)
}

pub fn decode_error_stack(bytes: &[u8]) -> crate::Result<Vec<u16, ERROR_STACK_SIZE>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::ParseError);
    }
    if bytes.len() > ERROR_STACK_SIZE * 2 {
        return Err(Error::PayloadTooLarge);
    }
    bytes
        .chunks(usize::from(ERROR_CODE_BITS / 8))
        .map(|chunk| {
            unpack_fields(&[ERROR_CODE_BITS], chunk).map(|[code]| code as u16)
        })
        .collect::<crate::Result<Vec<u16, ERROR_STACK_SIZE>>>()
}

/// Frame transmitted over the radio link.
#[derive(Clone, Debug, PartialEq)]
pub enum UplinkFrame {
    Startup(StartupFrame),
    Monitoring(MonitoringFrame),
    ErrorStack(Vec<u16, ERROR_STACK_SIZE>),
}

impl UplinkFrame {
    pub fn encode(&self) -> crate::Result<Vec<u8, MAX_PAYLOAD>> {
        match self {
            UplinkFrame::Startup(frame) => {
                Vec::from_slice(&frame.encode()?).map_err(|_| Error::BufferTooSmallError)
            }
            UplinkFrame::Monitoring(frame) => {
                Vec::from_slice(&frame.encode()?).map_err(|_| Error::BufferTooSmallError)
            }
            UplinkFrame::ErrorStack(codes) => encode_error_stack(codes),
        }
    }
}
