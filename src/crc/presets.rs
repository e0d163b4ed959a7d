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

//! A static table of catalogued CRC models.
//!
//! Entries are ordered by [CrcPresetId] discriminant, so a preset can be
//! looked up by numeric id, by enum or by (case-insensitive) name or alias.

use super::CrcModel;
use std::borrow::Cow;
use strum::{Display, EnumIter, EnumString};

#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrcPresetId {
    #[strum(serialize = "CRC-8/SMBUS")]
    Crc8Smbus = 0,
    #[strum(serialize = "CRC-8/MAXIM-DOW")]
    Crc8MaximDow = 1,
    #[strum(serialize = "CRC-8/ROHC")]
    Crc8Rohc = 2,
    #[strum(serialize = "CRC-16/IBM-3740")]
    Crc16Ibm3740 = 3,
    #[strum(serialize = "CRC-16/ARC")]
    Crc16Arc = 4,
    #[strum(serialize = "CRC-16/KERMIT")]
    Crc16Kermit = 5,
    #[strum(serialize = "CRC-16/XMODEM")]
    Crc16Xmodem = 6,
    #[strum(serialize = "CRC-16/IBM-SDLC")]
    Crc16IbmSdlc = 7,
    #[strum(serialize = "CRC-16/MODBUS")]
    Crc16Modbus = 8,
    #[strum(serialize = "CRC-16/GENIBUS")]
    Crc16Genibus = 9,
    #[strum(serialize = "CRC-24/OPENPGP")]
    Crc24Openpgp = 10,
    #[strum(serialize = "CRC-24/BLE")]
    Crc24Ble = 11,
    #[strum(serialize = "CRC-32/ISO-HDLC")]
    Crc32IsoHdlc = 12,
    #[strum(serialize = "CRC-32/BZIP2")]
    Crc32Bzip2 = 13,
    #[strum(serialize = "CRC-32/ISCSI")]
    Crc32Iscsi = 14,
    #[strum(serialize = "CRC-32/MPEG-2")]
    Crc32Mpeg2 = 15,
    #[strum(serialize = "CRC-32/CKSUM")]
    Crc32Cksum = 16,
    #[strum(serialize = "CRC-32/JAMCRC")]
    Crc32Jamcrc = 17,
}

impl CrcPresetId {
    /// The model for this preset.
    pub fn model(self) -> &'static CrcModel {
        &CRC_PRESETS[self as usize]
    }

    /// The CRC used by IBM System 34 formatted floppies (IBM PC, Atari ST, ISO MFM and FM).
    pub const FLOPPY: CrcPresetId = CrcPresetId::Crc16Ibm3740;
}

impl TryFrom<u32> for CrcPresetId {
    type Error = ();

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        use strum::IntoEnumIterator;
        CrcPresetId::iter().find(|p| *p as u32 == id).ok_or(())
    }
}

const fn preset(
    name: &'static str,
    width: u8,
    poly: u64,
    init: u64,
    refin: bool,
    refout: bool,
    xorout: u64,
    check: u64,
) -> CrcModel {
    CrcModel {
        name: Cow::Borrowed(name),
        width,
        poly,
        init,
        refin,
        refout,
        xorout,
        check: Some(check),
    }
}

#[rustfmt::skip]
pub static CRC_PRESETS: [CrcModel; 18] = [
    //      name                 width  poly         init         refin  refout xorout       check
    preset("CRC-8/SMBUS",        8,     0x07,        0x00,        false, false, 0x00,        0xF4),
    preset("CRC-8/MAXIM-DOW",    8,     0x31,        0x00,        true,  true,  0x00,        0xA1),
    preset("CRC-8/ROHC",         8,     0x07,        0xFF,        true,  true,  0x00,        0xD0),
    preset("CRC-16/IBM-3740",    16,    0x1021,      0xFFFF,      false, false, 0x0000,      0x29B1),
    preset("CRC-16/ARC",         16,    0x8005,      0x0000,      true,  true,  0x0000,      0xBB3D),
    preset("CRC-16/KERMIT",      16,    0x1021,      0x0000,      true,  true,  0x0000,      0x2189),
    preset("CRC-16/XMODEM",      16,    0x1021,      0x0000,      false, false, 0x0000,      0x31C3),
    preset("CRC-16/IBM-SDLC",    16,    0x1021,      0xFFFF,      true,  true,  0xFFFF,      0x906E),
    preset("CRC-16/MODBUS",      16,    0x8005,      0xFFFF,      true,  true,  0x0000,      0x4B37),
    preset("CRC-16/GENIBUS",     16,    0x1021,      0xFFFF,      false, false, 0xFFFF,      0xD64E),
    preset("CRC-24/OPENPGP",     24,    0x864CFB,    0xB704CE,    false, false, 0x000000,    0x21CF02),
    preset("CRC-24/BLE",         24,    0x00065B,    0x555555,    true,  true,  0x000000,    0xC25A56),
    preset("CRC-32/ISO-HDLC",    32,    0x04C11DB7,  0xFFFFFFFF,  true,  true,  0xFFFFFFFF,  0xCBF43926),
    preset("CRC-32/BZIP2",       32,    0x04C11DB7,  0xFFFFFFFF,  false, false, 0xFFFFFFFF,  0xFC891918),
    preset("CRC-32/ISCSI",       32,    0x1EDC6F41,  0xFFFFFFFF,  true,  true,  0xFFFFFFFF,  0xE3069283),
    preset("CRC-32/MPEG-2",      32,    0x04C11DB7,  0xFFFFFFFF,  false, false, 0x00000000,  0x0376E6E7),
    preset("CRC-32/CKSUM",       32,    0x04C11DB7,  0x00000000,  false, false, 0xFFFFFFFF,  0x765E7680),
    preset("CRC-32/JAMCRC",      32,    0x04C11DB7,  0xFFFFFFFF,  true,  true,  0x00000000,  0x340BC6D9),
];

/// Common alternative names for catalogued models.
const ALIASES: [(&str, CrcPresetId); 10] = [
    ("CRC-8", CrcPresetId::Crc8Smbus),
    ("CRC-16/CCITT-FALSE", CrcPresetId::Crc16Ibm3740),
    ("CRC-16/AUTOSAR", CrcPresetId::Crc16Ibm3740),
    ("CRC-16", CrcPresetId::Crc16Arc),
    ("CRC-16/X-25", CrcPresetId::Crc16IbmSdlc),
    ("CRC-16/CCITT", CrcPresetId::Crc16Kermit),
    ("CRC-24", CrcPresetId::Crc24Openpgp),
    ("CRC-32", CrcPresetId::Crc32IsoHdlc),
    ("CRC-32C", CrcPresetId::Crc32Iscsi),
    ("CRC-32/POSIX", CrcPresetId::Crc32Cksum),
];

/// Look up a preset by catalogue name or alias, ignoring case.
pub fn find_preset(name: &str) -> Option<&'static CrcModel> {
    CRC_PRESETS
        .iter()
        .find(|model| model.name.eq_ignore_ascii_case(name))
        .or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
                .map(|(_, id)| id.model())
        })
}

/// Look up a preset by numeric id.
pub fn preset_by_id(id: u32) -> Option<&'static CrcModel> {
    CRC_PRESETS.get(id as usize)
}
