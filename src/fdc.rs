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

//! Port access for a live floppy disk controller backend.
//!
//! The decode core never talks to hardware. A backend that drives a real
//! controller implements [FdcPort] and produces [crate::flux::Revolution]s or
//! sector data on its own; the trait only fixes the narrow surface such a
//! backend is built on.

/// Byte-wide register access to a floppy disk controller.
pub trait FdcPort {
    /// Read the register at `port`.
    fn read_byte(&mut self, port: u16) -> u8;
    /// Write `value` to the register at `port`.
    fn write_byte(&mut self, port: u16, value: u8);
    /// Wait at least `us` microseconds.
    fn delay(&mut self, us: u32);
}
