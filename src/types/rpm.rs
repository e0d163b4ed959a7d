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

//! Rotation rate classification for measured index-to-index times.

use std::fmt::{self, Display, Formatter};

/// Nominal spindle speeds with the band of measured rates accepted for each.
/// The 300 and 360 bands would overlap at 15% tolerance, so they meet at 327.
const RPM_BANDS: [(f64, std::ops::Range<f64>); 4] = [
    (150.0, 127.5..172.5),
    (300.0, 255.0..327.0),
    (360.0, 327.0..414.0),
    (600.0, 510.0..690.0),
];

/// The nominal rotation rate a revolution was captured at, carrying the measured
/// rate as a ratio to nominal.
///
/// 300RPM is the common case. 5.25" high density drives turn at 360RPM whatever
/// the media, Amiga HD drives at 150RPM, and the Macintosh SuperDrive at 600RPM
/// when reading double density disks.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskRpm {
    Rpm150(f64),
    Rpm300(f64),
    Rpm360(f64),
    Rpm600(f64),
}

impl Default for DiskRpm {
    fn default() -> Self {
        DiskRpm::Rpm300(1.0)
    }
}

impl From<DiskRpm> for f64 {
    fn from(rpm: DiskRpm) -> Self {
        rpm.nominal() * rpm.factor()
    }
}

impl Display for DiskRpm {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(fmt, "{}RPM", self.nominal() as u32)?;
        let deviation = (self.factor() - 1.0) * 100.0;
        if deviation != 0.0 {
            write!(fmt, " {:+.3}%", deviation)?;
        }
        Ok(())
    }
}

impl DiskRpm {
    fn with_nominal(nominal: f64, factor: f64) -> Option<DiskRpm> {
        match nominal as u32 {
            150 => Some(DiskRpm::Rpm150(factor)),
            300 => Some(DiskRpm::Rpm300(factor)),
            360 => Some(DiskRpm::Rpm360(factor)),
            600 => Some(DiskRpm::Rpm600(factor)),
            _ => None,
        }
    }

    /// The nominal rate in revolutions per minute.
    pub fn nominal(&self) -> f64 {
        match self {
            DiskRpm::Rpm150(_) => 150.0,
            DiskRpm::Rpm300(_) => 300.0,
            DiskRpm::Rpm360(_) => 360.0,
            DiskRpm::Rpm600(_) => 600.0,
        }
    }

    /// Ratio of the measured rate to the nominal rate.
    pub fn factor(&self) -> f64 {
        match *self {
            DiskRpm::Rpm150(f) | DiskRpm::Rpm300(f) | DiskRpm::Rpm360(f) | DiskRpm::Rpm600(f) => f,
        }
    }

    /// Measured rate for an index-to-index time in seconds.
    pub fn rpm_from_index_time(time: f64) -> Option<f64> {
        (time.is_finite() && time > 0.0).then(|| 60.0 / time)
    }

    /// Classify an index-to-index time in seconds. None if the measured rate falls
    /// outside every nominal band.
    pub fn try_from_index_time(time: f64) -> Option<DiskRpm> {
        let rpm = Self::rpm_from_index_time(time)?;
        RPM_BANDS
            .iter()
            .find(|(_, band)| band.contains(&rpm))
            .and_then(|(nominal, _)| Self::with_nominal(*nominal, rpm / nominal))
    }

    /// Seconds per revolution at this rate.
    pub fn index_time(&self) -> f64 {
        60.0 / f64::from(*self)
    }
}
