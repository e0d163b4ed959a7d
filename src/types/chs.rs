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

//! Track locations and the sector IDs recorded on them.

use crate::MAXIMUM_SECTOR_SIZE;
use std::fmt::{self, Display, Formatter};

/// Where a track was captured: a cylinder and a head.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskCh {
    c: u16,
    h: u8,
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[c:{:2} h:{}]", self.c, self.h)
    }
}

impl From<(u16, u8)> for DiskCh {
    fn from(ch: (u16, u8)) -> Self {
        DiskCh::new(ch.0, ch.1)
    }
}

impl DiskCh {
    pub const fn new(c: u16, h: u8) -> Self {
        DiskCh { c, h }
    }
    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
}

/// The (c, h, s, n) tuple read from a sector header.
///
/// Reads of one sector from different revolutions are grouped under their
/// [SectorAddress]. It holds what the header claims, which may differ from the
/// [DiskCh] the track was captured at.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorAddress {
    c: u16,
    h: u8,
    s: u8,
    n: u8,
}

impl Display for SectorAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[c:{:2} h:{} s:{:3} n:{}]", self.c, self.h, self.s, self.n)
    }
}

impl From<[u8; 4]> for SectorAddress {
    /// Build an address from the four ID bytes of an IBM sector header.
    fn from([c, h, s, n]: [u8; 4]) -> Self {
        SectorAddress::new(c as u16, h, s, n)
    }
}

impl SectorAddress {
    pub const fn new(c: u16, h: u8, s: u8, n: u8) -> Self {
        SectorAddress { c, h, s, n }
    }
    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Sector number within the track.
    pub fn s(&self) -> u8 {
        self.s
    }
    /// Size code. See [SectorAddress::n_size].
    pub fn n(&self) -> u8 {
        self.n
    }
    /// Data field length in bytes, `128 << n`, capped at [MAXIMUM_SECTOR_SIZE].
    pub fn n_size(&self) -> usize {
        Self::n_to_bytes(self.n)
    }
    pub fn n_to_bytes(n: u8) -> usize {
        if n < 6 {
            128usize << n
        }
        else {
            MAXIMUM_SECTOR_SIZE
        }
    }
    /// The track this header says it belongs to.
    pub fn ch(&self) -> DiskCh {
        DiskCh::new(self.c, self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_n_size() {
        assert_eq!(SectorAddress::new(0, 0, 1, 0).n_size(), 128);
        assert_eq!(SectorAddress::new(0, 0, 1, 2).n_size(), 512);
        assert_eq!(SectorAddress::new(0, 0, 1, 6).n_size(), 8192);
        assert_eq!(SectorAddress::new(0, 0, 1, 7).n_size(), 8192);
        assert_eq!(SectorAddress::new(0, 0, 1, 0xFF).n_size(), 8192);
    }

    #[test]
    fn test_ordering_groups_by_track_then_sector() {
        let a = SectorAddress::new(1, 0, 9, 2);
        let b = SectorAddress::new(1, 1, 1, 2);
        let c = SectorAddress::new(2, 0, 1, 2);
        assert!(a < b && b < c);
        assert_eq!(SectorAddress::from([1, 0, 9, 2]), a);
        assert_eq!(a.to_string(), "[c: 1 h:0 s:  9 n:2]");
    }
}
