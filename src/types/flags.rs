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

//! Defines common bitflags

use bitflags::bitflags;

bitflags! {
    /// Bit flags summarizing conditions detected while decoding a track.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[rustfmt::skip]
    pub struct QualityFlags: u32 {
        #[doc = "No revolution of the track was bounded by index pulses"]
        const NO_INDEX          = 0b0000_0000_0000_0001;
        #[doc = "Rotation speed varied by more than 1% between revolutions"]
        const RPM_UNSTABLE      = 0b0000_0000_0000_0010;
        #[doc = "The PLL never locked on at least one revolution"]
        const CLOCK_LOST        = 0b0000_0000_0000_0100;
        #[doc = "At least one merged sector retains weak bits"]
        const WEAK_BITS         = 0b0000_0000_0000_1000;
        #[doc = "At least one sector could not be recovered"]
        const FAILED_SECTORS    = 0b0000_0000_0001_0000;
        #[doc = "At least one sector was recovered without a valid CRC"]
        const RECOVERED_SECTORS = 0b0000_0000_0010_0000;
        #[doc = "No address marks were found on any revolution"]
        const NO_SYNC           = 0b0000_0000_0100_0000;
    }
}
