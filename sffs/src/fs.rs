//! The mounted filesystem: format, mount, and the low-level flash
//! accessors every other module (`locator`, `file`, `reclaim`,
//! `debug`) builds on.

use asraw::{AsMutRaw, AsRaw};
use storage::Flash;

use crate::layout::Layout;
use crate::master::MasterPage;
use crate::metadata::{MetadataHeader, MetadataItem, PageState, SectorState};
use crate::{Error, Result};

#[cfg(feature = "std")]
pub(crate) type CacheMap = std::collections::HashMap<(u16, u16), (u32, u16)>;

/// Options controlling `Filesystem::mount` (§4.10, §4.12).
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Proactively reclaim once the DIRTY sector count reaches this
    /// watermark, rather than waiting for allocation to fail outright
    /// (§4.8). `None` picks `max(1, sector_count / 4)`.
    pub reclaim_watermark: Option<usize>,
    /// Repair duplicate-USED items and age orphaned RESERVED items to
    /// OLD during mount (§4.5 crash recovery note, §4.13). Disabling
    /// this is only useful for tests that want to inspect the raw,
    /// unrepaired state after a simulated crash.
    pub repair_on_mount: bool,
}

impl Default for MountOptions {
    fn default() -> MountOptions {
        MountOptions { reclaim_watermark: None, repair_on_mount: true }
    }
}

/// Options controlling `Filesystem::format` (§4.9).
#[derive(Debug, Clone, Default)]
pub struct FormatOptions<'a> {
    pub label: &'a str,
}

/// A mounted SFFS volume.
pub struct Filesystem<F: Flash> {
    pub(crate) flash: F,
    pub(crate) layout: Layout,
    pub(crate) reclaim_watermark: usize,
    #[cfg(feature = "std")]
    pub(crate) cache: Option<CacheMap>,
}

impl<F: Flash> Filesystem<F> {
    /// Erase every sector, write a fresh header to each, and write the
    /// master page as the very first allocation: sector 0, item 0
    /// (§4.9). No locator scan is needed since every sector is known
    /// to be empty.
    pub fn format(flash: &mut F, options: FormatOptions) -> Result<()> {
        let layout = Layout::new(flash.get_info())?;
        flash.chip_erase()?;
        for sector in 0..layout.sector_count as u32 {
            let header = MetadataHeader::new(SectorState::Erased);
            flash.page_write(layout.header_addr(sector), header.as_raw())?;
        }

        let master = MasterPage::new(
            options.label,
            layout.page_size as u32,
            layout.sector_size as u32,
            layout.sector_count as u32,
        );
        let sector = 0u32;
        let idx = 0u16;
        let item = MetadataItem::committed(
            crate::metadata::MASTER_FILE_ID,
            0,
            PageState::Used,
            MasterPage::SIZE as u16,
        );
        flash.page_write(layout.data_page_addr(sector, idx), master.as_raw())?;
        flash.page_write(layout.item_addr(sector, idx), item.as_raw())?;
        flash.page_write(layout.header_addr(sector) + 4, &[SectorState::Used as u8])?;
        Ok(())
    }

    /// Scan every sector's metadata and bring up an in-RAM filesystem
    /// handle (§4.10).
    pub fn mount(flash: F, options: MountOptions) -> Result<Filesystem<F>> {
        let layout = Layout::new(flash.get_info())?;
        let reclaim_watermark = options.reclaim_watermark.unwrap_or_else(|| (layout.sector_count / 4).max(1));

        let mut fs = Filesystem {
            flash,
            layout,
            reclaim_watermark,
            #[cfg(feature = "std")]
            cache: None,
        };

        #[cfg(feature = "std")]
        {
            fs.cache = Some(CacheMap::new());
            fs.rebuild_cache()?;
        }

        if options.repair_on_mount {
            crate::reclaim::repair_duplicates(&mut fs)?;
        }

        let master = fs.read_master()?;
        if !master.is_valid_magic() {
            return Err(Error::Corrupt);
        }
        let master_page_size = master.page_size;
        let master_sector_size = master.sector_size;
        if master_page_size as usize != layout.page_size || master_sector_size as usize != layout.sector_size {
            log::warn!(
                "master page geometry echo does not match driver-reported geometry \
                 (master: {}x{}, driver: {}x{})",
                master_page_size,
                master_sector_size,
                layout.page_size,
                layout.sector_size
            );
        }

        Ok(fs)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Reclaim the underlying flash device, discarding the mount's
    /// in-RAM state. Used by tests that simulate a power cut and
    /// reopen the same device with `mount` again.
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Open a file for reading or writing (§4.5, §4.6).
    pub fn open(&mut self, file_id: u16, mode: crate::file::OpenMode) -> Result<crate::file::FileHandle<'_, F>> {
        crate::file::FileHandle::open_id(self, file_id, mode)
    }

    /// Delete a file (§4.6).
    pub fn remove(&mut self, file_id: u16) -> Result<()> {
        crate::file::file_remove(self, file_id)
    }

    /// Current size of a file in bytes, without opening it (§4.6).
    pub fn size(&mut self, file_id: u16) -> Result<u32> {
        crate::file::file_size(self, file_id)
    }

    /// Force a full device rescan of the locator cache, discarding
    /// whatever it currently holds (§4.11, §6). A no-op, never-failing
    /// call without the `std` feature, where there is no cache to
    /// rebuild. Exposed so a caller (or a test) can cross-check cached
    /// lookups against a fresh scan on demand.
    pub fn cache_clear(&mut self) -> Result<()> {
        self.rebuild_cache()
    }

    /// Mark any current live copy of `(file_id, block)` as MOVING,
    /// returning its location if one existed. Called before a
    /// replacement page is even reserved, so the window in which two
    /// items could both read USED for the same block narrows to just
    /// the final state-byte program that commits the new copy (§4.2,
    /// §4.5 step 3).
    pub(crate) fn begin_replace(&mut self, file_id: u16, block: u16) -> Result<Option<(u32, u16)>> {
        let Some((sector, idx)) = crate::locator::find_page(self, file_id, block)? else {
            return Ok(None);
        };
        if self.read_item(sector, idx)?.page_state() == Some(PageState::Used) {
            self.set_item_state(sector, idx, PageState::Moving)?;
        }
        Ok(Some((sector, idx)))
    }

    /// The full copy-on-write commit for one data page (§4.5 steps
    /// 4-6): reserve an erased slot, write the data, then flip it live
    /// and set its final size in one program. Does not touch any
    /// previous item for the same `(file_id, block)` — callers that
    /// are replacing an existing block must age the old item out
    /// themselves via [`Filesystem::retire_other_copies`], after first
    /// narrowing the window with [`Filesystem::begin_replace`].
    pub(crate) fn allocate_and_commit(&mut self, file_id: u16, block: u16, page: &[u8], size: u16) -> Result<(u32, u16)> {
        let (sector, idx) = match crate::locator::find_erased_page(self) {
            Ok(loc) => loc,
            Err(Error::NoSpace) => {
                crate::reclaim::reclaim_one(self)?;
                crate::locator::find_erased_page(self)?
            }
            Err(e) => return Err(e),
        };
        let reserved = MetadataItem::reserved(file_id, block);
        self.write_new_item(sector, idx, &reserved)?;
        self.flash.page_write(self.layout.data_page_addr(sector, idx), page)?;
        self.commit_size_and_state(sector, idx, PageState::Used, size)?;
        self.cache_put(file_id, block, (sector, idx));
        self.reclaim_if_over_watermark()?;
        Ok((sector, idx))
    }

    /// Proactively reclaim one sector once the DIRTY count reaches
    /// `reclaim_watermark`, so an allocation is less likely to have to
    /// pay for reclamation synchronously (§4.8, §4.12).
    fn reclaim_if_over_watermark(&mut self) -> Result<()> {
        let mut dirty = 0;
        for sector in 0..self.layout.sector_count as u32 {
            let header = self.read_header(sector)?;
            if SectorState::from_byte(header.state) == Some(SectorState::Dirty) {
                dirty += 1;
            }
        }
        if dirty >= self.reclaim_watermark {
            crate::reclaim::reclaim_one(self)?;
        }
        Ok(())
    }

    /// Age every USED or MOVING item for `(file_id, block)` other than
    /// `keep` to OLD (§4.5 step 5): there must be exactly one live
    /// copy once a write commits.
    pub(crate) fn retire_other_copies(&mut self, file_id: u16, block: u16, keep: (u32, u16)) -> Result<()> {
        let sector_count = self.layout.sector_count as u32;
        let pages_per_sector = self.layout.data_pages_per_sector as u16;
        for sector in 0..sector_count {
            for idx in 0..pages_per_sector {
                if (sector, idx) == keep {
                    continue;
                }
                let item = self.read_item(sector, idx)?;
                if item.matches(file_id, block) && item.is_live() {
                    self.set_item_state(sector, idx, PageState::Old)?;
                }
            }
        }
        Ok(())
    }

    fn read_master(&mut self) -> Result<MasterPage> {
        let mut master = MasterPage::default();
        let bytes = master.as_mut_raw();
        let len = bytes.len();
        let (sector, idx) = crate::locator::find_page(self, crate::metadata::MASTER_FILE_ID, 0)?.ok_or(Error::Corrupt)?;
        let addr = self.layout.data_page_addr(sector, idx);
        self.flash.page_read(addr, &mut bytes[..len])?;
        Ok(master)
    }

    // --- low-level flash accessors shared by locator/file/reclaim/debug ---

    pub(crate) fn read_page(&mut self, addr: usize, buf: &mut [u8]) -> Result<()> {
        self.flash.page_read(addr, buf)?;
        Ok(())
    }

    pub(crate) fn write_page(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        self.flash.page_write(addr, data)?;
        Ok(())
    }

    pub(crate) fn erase_sector(&mut self, addr: usize) -> Result<()> {
        self.flash.sector_erase(addr)?;
        Ok(())
    }

    pub(crate) fn read_header(&mut self, sector: u32) -> Result<MetadataHeader> {
        let mut header = MetadataHeader::default();
        let bytes = header.as_mut_raw();
        let len = bytes.len();
        self.flash.page_read(self.layout.header_addr(sector), &mut bytes[..len])?;
        Ok(header)
    }

    pub(crate) fn read_item(&mut self, sector: u32, idx: u16) -> Result<MetadataItem> {
        let mut item = MetadataItem::default();
        let bytes = item.as_mut_raw();
        let len = bytes.len();
        self.flash.page_read(self.layout.item_addr(sector, idx), &mut bytes[..len])?;
        Ok(item)
    }

    /// Program a brand-new item record in one page_write (all fields
    /// AND down from the erased 0xFF at once; legal because every
    /// field of a just-allocated item starts fully erased).
    pub(crate) fn write_new_item(&mut self, sector: u32, idx: u16, item: &MetadataItem) -> Result<()> {
        self.flash.page_write(self.layout.item_addr(sector, idx), item.as_raw())?;
        Ok(())
    }

    /// Program only the item's `state` byte (offset 4), the monotone
    /// transition used for every state change after initial commit.
    pub(crate) fn set_item_state(&mut self, sector: u32, idx: u16, state: PageState) -> Result<()> {
        let addr = self.layout.item_addr(sector, idx) + 4;
        self.flash.page_write(addr, &[state as u8])?;
        self.cache_invalidate(sector, idx);
        self.update_sector_header(sector)?;
        Ok(())
    }

    /// Program `state` and `size` together in a single page_write.
    /// `state` (offset 4) and `size` (offset 5..7) are contiguous in
    /// `MetadataItem`'s packed layout, so this closes the window in
    /// step 6 of §4.5 where the two would otherwise land as separate
    /// programs and an item could briefly read USED with a stale
    /// erased size.
    pub(crate) fn commit_size_and_state(&mut self, sector: u32, idx: u16, state: PageState, size: u16) -> Result<()> {
        let addr = self.layout.item_addr(sector, idx) + 4;
        let mut buf = [0u8; 3];
        buf[0] = state as u8;
        buf[1..3].copy_from_slice(&size.to_le_bytes());
        self.flash.page_write(addr, &buf)?;
        self.cache_invalidate(sector, idx);
        self.update_sector_header(sector)?;
        Ok(())
    }

    pub(crate) fn census(&mut self, sector: u32) -> Result<(usize, usize, usize, usize, usize)> {
        let (mut e, mut r, mut u, mut m, mut o) = (0, 0, 0, 0, 0);
        for idx in 0..self.layout.data_pages_per_sector as u16 {
            let item = self.read_item(sector, idx)?;
            match item.page_state() {
                Some(PageState::Erased) => e += 1,
                Some(PageState::Reserved) => r += 1,
                Some(PageState::Used) => u += 1,
                Some(PageState::Moving) => m += 1,
                Some(PageState::Old) => o += 1,
                None => return Err(Error::Corrupt),
            }
        }
        Ok((e, r, u, m, o))
    }

    /// Recompute a sector's derived state from its item census and
    /// program the header if it changed (§4.3).
    pub(crate) fn update_sector_header(&mut self, sector: u32) -> Result<()> {
        let (e, r, u, m, o) = self.census(sector)?;
        let capacity = self.layout.data_pages_per_sector;
        let derived = SectorState::from_census(e, r, u, m, o, capacity);
        let header = self.read_header(sector)?;
        let current = SectorState::from_byte(header.state).ok_or(Error::Corrupt)?;
        if current != derived {
            log::trace!("sector {} header {:?} -> {:?}", sector, current, derived);
            let addr = self.layout.header_addr(sector) + 4; // state byte offset
            self.flash.page_write(addr, &[derived as u8])?;
        }
        Ok(())
    }

    // --- locator cache plumbing (§4.11); no-ops without `std` ---

    #[cfg(feature = "std")]
    pub(crate) fn cache_get(&self, file_id: u16, block: u16) -> Option<(u32, u16)> {
        self.cache.as_ref().and_then(|c| c.get(&(file_id, block)).copied())
    }
    #[cfg(not(feature = "std"))]
    pub(crate) fn cache_get(&self, _file_id: u16, _block: u16) -> Option<(u32, u16)> {
        None
    }

    #[cfg(feature = "std")]
    pub(crate) fn cache_put(&mut self, file_id: u16, block: u16, location: (u32, u16)) {
        if let Some(cache) = self.cache.as_mut() {
            cache.insert((file_id, block), location);
        }
    }
    #[cfg(not(feature = "std"))]
    pub(crate) fn cache_put(&mut self, _file_id: u16, _block: u16, _location: (u32, u16)) {}

    #[cfg(feature = "std")]
    pub(crate) fn cache_remove(&mut self, file_id: u16, block: u16) {
        if let Some(cache) = self.cache.as_mut() {
            cache.remove(&(file_id, block));
        }
    }
    #[cfg(not(feature = "std"))]
    pub(crate) fn cache_remove(&mut self, _file_id: u16, _block: u16) {}

    /// Drop any cache entry pointing at this exact (sector, item); used
    /// when an item's state changes, since the entry may now be stale
    /// (e.g. USED -> OLD). The caller re-populates the cache lazily on
    /// the next lookup via the linear-scan fallback.
    #[cfg(feature = "std")]
    pub(crate) fn cache_invalidate(&mut self, sector: u32, idx: u16) {
        if let Some(cache) = self.cache.as_mut() {
            cache.retain(|_, &mut v| v != (sector, idx));
        }
    }
    #[cfg(not(feature = "std"))]
    pub(crate) fn cache_invalidate(&mut self, _sector: u32, _idx: u16) {}

    #[cfg(feature = "std")]
    pub(crate) fn rebuild_cache(&mut self) -> Result<()> {
        let mut fresh = CacheMap::new();
        for sector in 0..self.layout.sector_count as u32 {
            let header = self.read_header(sector)?;
            if !header.is_valid_magic() {
                continue;
            }
            let state = SectorState::from_byte(header.state);
            if matches!(state, Some(SectorState::Erased) | None) {
                continue;
            }
            for idx in 0..self.layout.data_pages_per_sector as u16 {
                let item = self.read_item(sector, idx)?;
                if item.is_live() {
                    // Prefer USED over MOVING if both are present; a
                    // MOVING sibling is only a fallback (§4.4).
                    let better = match (item.page_state(), fresh.get(&(item.file_id, item.block))) {
                        (Some(PageState::Used), _) => true,
                        (_, None) => true,
                        _ => false,
                    };
                    if better {
                        fresh.insert((item.file_id, item.block), (sector, idx));
                    }
                }
            }
        }
        self.cache = Some(fresh);
        Ok(())
    }
    #[cfg(not(feature = "std"))]
    pub(crate) fn rebuild_cache(&mut self) -> Result<()> {
        Ok(())
    }
}
