//! Flash geometry presets.
//!
//! Real NOR flash parts vary widely in page and sector size. These
//! presets mirror device families a small filesystem is actually
//! deployed against, so tests exercise more than one shape of the
//! layout arithmetic in `sffs`.

use crate::SimFlash;

/// The configuration of a single simulated flash device.
pub struct DeviceLayout {
    pub page_size: usize,
    pub sector_size: usize,
    pub sector_count: usize,
}

impl DeviceLayout {
    pub fn build(&self) -> SimFlash {
        SimFlash::new(self.page_size, self.sector_size, self.sector_count)
    }
}

/// Small MCU-internal flash: tiny pages, small sectors
/// (page_size=256, sector_size=4096, ~1 MiB capacity).
pub static SMALL: DeviceLayout = DeviceLayout { page_size: 256, sector_size: 4096, sector_count: 256 };

/// A device with larger sectors, typical of external SPI NOR parts.
pub static SPI_NOR: DeviceLayout = DeviceLayout { page_size: 256, sector_size: 65536, sector_count: 16 };

/// A device with a smaller sector-to-page ratio, to stress
/// `data_pages_per_sector` rounding in the layout arithmetic.
pub static TIGHT: DeviceLayout = DeviceLayout { page_size: 512, sector_size: 2048, sector_count: 64 };

/// All presets, for tests that want to sweep every geometry.
pub static ALL: &[&DeviceLayout] = &[&SMALL, &SPI_NOR, &TIGHT];
