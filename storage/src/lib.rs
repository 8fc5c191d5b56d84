//! Flash storage traits.
//!
//! This crate is the only thing the filesystem core requires from the
//! layer below it: a page-granular read, an AND-semantics page
//! program, and a sector erase, plus a geometry query. It knows
//! nothing about sectors, metadata, or files — see the `sffs` crate
//! for that.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
    NotWritten,
    /// A `page_write` attempted to set a bit from 0 to 1. Flash can only
    /// clear bits (1 -> 0); getting a 1 back requires an erase.
    NotErased,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Geometry of a flash device, as returned by `ReadFlash::get_info`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Geometry {
    /// Total addressable bytes.
    pub capacity: usize,
    /// Smallest unit that can be erased; also the largest span a
    /// single read or program may cover.
    pub page_size: usize,
    /// Smallest unit that can be erased.
    pub sector_size: usize,
    /// Smallest unit that can be read; 1 unless the device requires
    /// aligned reads of some larger size.
    pub block_size: usize,
}

/// Read-only interface into flash.
pub trait ReadFlash {
    fn get_info(&self) -> Geometry;

    /// Read `buf.len()` bytes starting at `addr`. `addr..addr+buf.len()`
    /// must lie within a single page; `buf.len()` may be smaller than
    /// a full page.
    fn page_read(&mut self, addr: usize, buf: &mut [u8]) -> Result<()>;
}

/// Flash that can be written to and erased.
pub trait Flash: ReadFlash {
    /// Program `data` at `addr`. `addr..addr+data.len()` must lie
    /// within a single page, but need not span the whole page — a
    /// single field inside a metadata record can be programmed on its
    /// own. The resulting stored byte is `old & data` for every byte;
    /// setting a 0 bit of `old` back to 1 is an error
    /// (`Error::NotErased`).
    fn page_write(&mut self, addr: usize, data: &[u8]) -> Result<()>;

    /// Erase the sector containing `addr`. `addr` must be sector-aligned.
    /// Every bit in the sector becomes 1.
    fn sector_erase(&mut self, addr: usize) -> Result<()>;

    /// Erase every sector on the device. The default implementation
    /// erases sector by sector; a real driver may override this with a
    /// faster bulk-erase command.
    fn chip_erase(&mut self) -> Result<()> {
        let geometry = self.get_info();
        let mut addr = 0;
        while addr < geometry.capacity {
            self.sector_erase(addr)?;
            addr += geometry.sector_size;
        }
        Ok(())
    }
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(flash: &T, addr: usize, length: usize) -> Result<()> {
    let geometry = flash.get_info();
    check_within_page(geometry, addr, length)
}

pub fn check_write<T: Flash>(flash: &T, addr: usize, length: usize) -> Result<()> {
    let geometry = flash.get_info();
    check_within_page(geometry, addr, length)
}

pub fn check_erase<T: Flash>(flash: &T, addr: usize) -> Result<()> {
    let geometry = flash.get_info();
    if addr >= geometry.capacity {
        return Err(Error::OutOfBounds);
    }
    if addr % geometry.sector_size != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

/// `addr..addr+length` must fit entirely within one page-sized window,
/// but need not start at a page boundary or cover the whole page.
pub fn check_within_page(geometry: Geometry, addr: usize, length: usize) -> Result<()> {
    if length > geometry.page_size || length > geometry.capacity || addr > geometry.capacity - length {
        return Err(Error::OutOfBounds);
    }
    if length == 0 {
        return Ok(());
    }
    let page_size = geometry.page_size;
    let first_page = addr / page_size;
    let last_page = (addr + length - 1) / page_size;
    if first_page != last_page {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry { capacity: 1024, page_size: 256, sector_size: 256, block_size: 1 }
    }

    #[test]
    fn rejects_out_of_bounds() {
        assert_eq!(check_within_page(geometry(), 1024, 1), Err(Error::OutOfBounds));
        assert_eq!(check_within_page(geometry(), 768, 512), Err(Error::OutOfBounds));
    }

    #[test]
    fn rejects_span_crossing_page_boundary() {
        assert_eq!(check_within_page(geometry(), 250, 10), Err(Error::OutOfBounds));
    }

    #[test]
    fn accepts_partial_unaligned_write_within_one_page() {
        assert_eq!(check_within_page(geometry(), 4, 1), Ok(()));
        assert_eq!(check_within_page(geometry(), 257, 8), Ok(()));
    }

    #[test]
    fn accepts_full_page() {
        assert_eq!(check_within_page(geometry(), 256, 256), Ok(()));
    }
}
