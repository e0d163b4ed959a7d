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

use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// The Group Coded Recording variant used on a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GcrScheme {
    /// Commodore 1541 5-to-4 GCR.
    Commodore,
    /// Apple II / Macintosh 6-and-2 GCR disk nibbles.
    Apple62,
}

/// The encoding of bits on a track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataEncoding {
    /// Frequency Modulation. Every data bit is preceded by a clock bit.
    Fm,
    /// Modified Frequency Modulation. A clock bit is written only between two zero data bits.
    #[default]
    Mfm,
    /// Group Coded Recording. Groups of data bits map to self-clocking code groups.
    Gcr(GcrScheme),
}

impl Display for DataEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DataEncoding::Fm => write!(f, "FM"),
            DataEncoding::Mfm => write!(f, "MFM"),
            DataEncoding::Gcr(GcrScheme::Commodore) => write!(f, "GCR (Commodore)"),
            DataEncoding::Gcr(GcrScheme::Apple62) => write!(f, "GCR (6-and-2)"),
        }
    }
}

impl DataEncoding {
    /// The number of bit cells used to record one data byte.
    pub fn cells_per_byte(&self) -> usize {
        match self {
            DataEncoding::Fm | DataEncoding::Mfm => 16,
            DataEncoding::Gcr(GcrScheme::Commodore) => 10,
            DataEncoding::Gcr(GcrScheme::Apple62) => 8,
        }
    }

    /// The shortest possible flux interval, in bit cells.
    pub fn min_run(&self) -> usize {
        match self {
            DataEncoding::Mfm => 2,
            _ => 1,
        }
    }

    /// The longest legal run of cells without a flux transition.
    pub fn max_zero_run(&self) -> usize {
        match self {
            DataEncoding::Fm => 1,
            DataEncoding::Mfm => 3,
            DataEncoding::Gcr(GcrScheme::Commodore) => 2,
            DataEncoding::Gcr(GcrScheme::Apple62) => 2,
        }
    }
}

/// The final status of a merged sector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectorStatus {
    /// The selected data passed its CRC.
    Ok,
    /// The selected data failed its CRC but was chosen by the merge strategy.
    Recovered,
    /// No candidate could be selected.
    Failed,
}

impl Display for SectorStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            SectorStatus::Ok => write!(f, "OK"),
            SectorStatus::Recovered => write!(f, "Recovered"),
            SectorStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// A recorded integrity value and the value calculated over the data it protects.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntegrityField {
    pub recorded: u64,
    pub calculated: u64,
}

impl IntegrityField {
    pub fn new(recorded: u64, calculated: u64) -> Self {
        Self { recorded, calculated }
    }
    pub fn is_valid(&self) -> bool {
        self.recorded == self.calculated
    }
}

/// The outcome of checking a sector header or data field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntegrityCheck {
    /// Represents the result of a CRC (Cyclic Redundancy Check)
    Crc(IntegrityField),
    /// Represents the result of an XOR checksum
    Checksum(IntegrityField),
}

impl Display for IntegrityCheck {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Valid")
        }
        else {
            write!(f, "Invalid")
        }
    }
}

impl IntegrityCheck {
    pub fn is_valid(&self) -> bool {
        use IntegrityCheck::*;
        match self {
            Crc(result) => result.is_valid(),
            Checksum(result) => result.is_valid(),
        }
    }
    pub fn is_error(&self) -> bool {
        !self.is_valid()
    }
    /// The value stored on disk.
    pub fn recorded(&self) -> u64 {
        match self {
            IntegrityCheck::Crc(field) | IntegrityCheck::Checksum(field) => field.recorded,
        }
    }
    /// The same kind of check against the same recorded value, with a new calculated value.
    pub fn with_calculated(&self, calculated: u64) -> IntegrityCheck {
        match self {
            IntegrityCheck::Crc(field) => IntegrityCheck::Crc(IntegrityField::new(field.recorded, calculated)),
            IntegrityCheck::Checksum(field) => {
                IntegrityCheck::Checksum(IntegrityField::new(field.recorded, calculated))
            }
        }
    }
}
