/*
    FluxFox
    https://github.com/dbalsom/fluxfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Parameterized CRC computation and verification.
//!
//! A [CrcModel] fully describes a CRC variant in the usual catalogue form:
//! width, polynomial, initial register, input/output reflection and final XOR.
//! The bitwise implementation on [CrcModel] is the reference. [CrcEngine] adds
//! a table-driven path that must always agree with it, and runs the model's
//! self-test when it is created.
//!
//! Registers of any width from 1 to 64 bits are supported. Values are always
//! returned right-aligned in a `u64`.

mod engine;
mod presets;

use std::borrow::Cow;
use thiserror::Error;

pub use engine::{CrcDigest, CrcEngine};
pub use presets::{find_preset, preset_by_id, CrcPresetId, CRC_PRESETS};

/// The standard catalogue check input.
pub const CRC_CHECK_INPUT: &[u8] = b"123456789";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrcModelError {
    #[error("Unsupported CRC width: {0} bits")]
    InvalidWidth(u8),
    #[error("CRC parameter '{field}' value {value:#X} does not fit a {width}-bit register")]
    ParameterOverflow { field: String, value: u64, width: u8 },
    #[error("CRC model {name} failed self-test: expected {expected:#X}, computed {computed:#X}")]
    CheckMismatch { name: String, expected: u64, computed: u64 },
    #[error("Unknown CRC preset: {0}")]
    UnknownPreset(String),
}

/// The parameters of a CRC variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CrcModel {
    /// Catalogue name, e.g. "CRC-16/IBM-3740".
    pub name: Cow<'static, str>,
    /// Register width in bits.
    pub width: u8,
    /// Generator polynomial, normal (MSB-first) form, without the implicit top bit.
    pub poly: u64,
    /// Initial register value.
    pub init: u64,
    /// Reverse the bits of each input byte before processing.
    pub refin: bool,
    /// Reverse the final register before applying `xorout`.
    pub refout: bool,
    /// Value XORed into the final register.
    pub xorout: u64,
    /// CRC of [CRC_CHECK_INPUT], if known.
    pub check: Option<u64>,
}

impl CrcModel {
    /// Mask covering a register of this model's width.
    pub fn mask(&self) -> u64 {
        width_mask(self.width)
    }

    /// Number of bytes a CRC of this model occupies when stored after a field.
    pub fn byte_len(&self) -> usize {
        (self.width as usize).div_ceil(8)
    }

    /// Check that the width is supported and every parameter fits in the register.
    pub fn validate(&self) -> Result<(), CrcModelError> {
        if self.width == 0 || self.width > 64 {
            return Err(CrcModelError::InvalidWidth(self.width));
        }
        let mask = self.mask();
        let fields = [("poly", self.poly), ("init", self.init), ("xorout", self.xorout)];
        for (field, value) in fields.into_iter().chain(self.check.map(|c| ("check", c))) {
            if value & !mask != 0 {
                return Err(CrcModelError::ParameterOverflow {
                    field: field.to_string(),
                    value,
                    width: self.width,
                });
            }
        }
        Ok(())
    }

    /// Compute the CRC of `data` one bit at a time.
    ///
    /// This is the reference shift-register implementation. It is slow, and is
    /// used to validate the table-driven [CrcEngine].
    pub fn compute(&self, data: &[u8]) -> u64 {
        let width = self.width.clamp(1, 64);
        let mask = width_mask(width);
        let top = 1u64 << (width - 1);
        let poly = self.poly & mask;
        let mut register = self.init & mask;

        for &byte in data {
            let byte = if self.refin { byte.reverse_bits() } else { byte };
            for i in (0..8).rev() {
                let bit = (byte >> i) & 1 != 0;
                let msb = register & top != 0;
                register = (register << 1) & mask;
                if msb != bit {
                    register ^= poly;
                }
            }
        }

        if self.refout {
            register = reflect(register, width);
        }
        (register ^ self.xorout) & mask
    }

    /// Run the catalogue self-test, if this model has a check value.
    pub fn self_test(&self) -> Result<(), CrcModelError> {
        self.validate()?;
        match self.check {
            Some(expected) => {
                let computed = self.compute(CRC_CHECK_INPUT);
                if computed != expected {
                    return Err(CrcModelError::CheckMismatch {
                        name: self.name.to_string(),
                        expected,
                        computed,
                    });
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Interpret CRC bytes as stored after a field.
    ///
    /// Reflected models store their CRC least significant byte first, as serial
    /// protocols transmit them. Normal models store it most significant byte
    /// first, as the IBM floppy formats do.
    /// Returns None if `bytes` is not exactly [CrcModel::byte_len] long.
    pub fn read_recorded(&self, bytes: &[u8]) -> Option<u64> {
        if bytes.len() != self.byte_len() {
            return None;
        }
        let value = if self.refout {
            bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64)
        }
        else {
            bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
        };
        Some(value & self.mask())
    }

    /// The inverse of [CrcModel::read_recorded].
    pub fn to_recorded(&self, value: u64) -> Vec<u8> {
        let len = self.byte_len();
        let mut bytes: Vec<u8> = (0..len).map(|i| (value >> (8 * i)) as u8).collect();
        if !self.refout {
            bytes.reverse();
        }
        bytes
    }
}

/// Compute the CRC of `data` under `model` with the bitwise reference implementation.
pub fn compute(data: &[u8], model: &CrcModel) -> u64 {
    model.compute(data)
}

/// Verify `data` against the CRC bytes recorded after it.
///
/// CRC verification is a pure function of its inputs.
pub fn verify(data: &[u8], trailing_crc_bytes: &[u8], model: &CrcModel) -> bool {
    match model.read_recorded(trailing_crc_bytes) {
        Some(recorded) => model.compute(data) == recorded,
        None => false,
    }
}

/// Reverse the low `width` bits of `value`.
#[inline]
pub fn reflect(value: u64, width: u8) -> u64 {
    match width {
        0 => 0,
        w if w >= 64 => value.reverse_bits(),
        w => value.reverse_bits() >> (64 - w as u32),
    }
}

#[inline]
pub(crate) fn width_mask(width: u8) -> u64 {
    match width {
        0 => 0,
        w if w >= 64 => u64::MAX,
        w => (1u64 << w) - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ccitt_false() -> CrcModel {
        CrcModel {
            name: Cow::Borrowed("CRC-16/CCITT-FALSE"),
            width: 16,
            poly: 0x1021,
            init: 0xFFFF,
            refin: false,
            refout: false,
            xorout: 0x0000,
            check: Some(0x29B1),
        }
    }

    #[test]
    fn test_ccitt_false_check() {
        assert_eq!(compute(CRC_CHECK_INPUT, &ccitt_false()), 0x29B1);
    }

    #[test]
    fn test_iso_hdlc_check() {
        let model = CrcModel {
            name: Cow::Borrowed("CRC-32/ISO-HDLC"),
            width: 32,
            poly: 0x04C1_1DB7,
            init: 0xFFFF_FFFF,
            refin: true,
            refout: true,
            xorout: 0xFFFF_FFFF,
            check: Some(0xCBF4_3926),
        };
        assert_eq!(compute(CRC_CHECK_INPUT, &model), 0xCBF4_3926);
    }

    #[test]
    fn test_reflect() {
        assert_eq!(reflect(0b0001, 4), 0b1000);
        assert_eq!(reflect(0x1021, 16), 0x8408);
        assert_eq!(reflect(0x04C1_1DB7, 32), 0xEDB8_8320);
        assert_eq!(reflect(1, 64), 1 << 63);
    }

    #[test]
    fn test_verify_recorded_bytes() {
        let model = ccitt_false();
        let data = b"123456789";
        assert!(verify(data, &[0x29, 0xB1], &model));
        assert!(!verify(data, &[0xB1, 0x29], &model));
        assert!(!verify(data, &[0x29], &model));
        assert_eq!(model.to_recorded(0x29B1), vec![0x29, 0xB1]);
    }

    #[test]
    fn test_crc_over_message_and_crc_is_zero() {
        // Appending a non-reflected, zero-xorout CRC to its message yields a zero residue.
        let model = ccitt_false();
        let mut data = b"FLUX".to_vec();
        let crc = model.compute(&data);
        data.extend(model.to_recorded(crc));
        assert_eq!(model.compute(&data), 0);
    }

    #[test]
    fn test_validate_rejects_bad_models() {
        let mut model = ccitt_false();
        model.width = 0;
        assert_eq!(model.validate(), Err(CrcModelError::InvalidWidth(0)));

        let mut model = ccitt_false();
        model.poly = 0x1_1021;
        assert!(matches!(model.validate(), Err(CrcModelError::ParameterOverflow { .. })));

        let mut model = ccitt_false();
        model.check = Some(0x1234);
        assert!(matches!(model.self_test(), Err(CrcModelError::CheckMismatch { .. })));
    }
}
