//! Sector reclamation: freeing a garbage-heavy sector by copying its
//! still-live pages elsewhere and erasing it (§4.8).
//!
//! Because every field of every item starts erased (0xFF) and erase
//! clears a whole sector back to that state in one shot, a freshly
//! erased sector's header and item table come back exactly right
//! without touching the item table again — only the header itself
//! needs reprogramming, and every one of its fields is a monotone
//! clear from the all-ones state `sector_erase` just produced.

use asraw::AsRaw;
use storage::Flash;

use crate::metadata::{MetadataHeader, MetadataItem, PageState, SectorState};
use crate::{Error, Filesystem, Result};

const MAX_PAGE_SIZE: usize = 4096;

/// Pick the sector with the most garbage and free it. Returns
/// `Error::NoSpace` if every non-erased sector is still fully live
/// (§4.1 invariant: this should never happen as long as one sector is
/// always kept in reserve).
pub(crate) fn reclaim_one<F: Flash>(fs: &mut Filesystem<F>) -> Result<()> {
    let victim = pick_victim(fs)?;
    log::debug!("reclaiming sector {}", victim);

    let pages_per_sector = fs.layout().data_pages_per_sector as u16;
    let page_size = fs.layout().page_size;
    let mut scratch = [0u8; MAX_PAGE_SIZE];

    for idx in 0..pages_per_sector {
        let item = fs.read_item(victim, idx)?;
        if !item.is_live() {
            continue;
        }
        let addr = fs.layout().data_page_addr(victim, idx);
        fs.read_page(addr, &mut scratch[..page_size])?;
        relocate(fs, victim, item.file_id, item.block, item.state, &scratch[..page_size], item.size)?;
    }

    fs.erase_sector(fs.layout().sector_base(victim))?;
    let header = MetadataHeader::new(SectorState::Erased);
    fs.write_page(fs.layout().header_addr(victim), header.as_raw())?;
    Ok(())
}

/// Copy one live page out of `exclude` into an erased slot elsewhere,
/// preserving its original page state (USED or MOVING — a page caught
/// mid-relocation by a crash is still live and must move again).
fn relocate<F: Flash>(fs: &mut Filesystem<F>, exclude: u32, file_id: u16, block: u16, state: u8, page: &[u8], size: u16) -> Result<()> {
    let (sector, idx) = find_erased_page_excluding(fs, exclude)?;
    let reserved = MetadataItem::reserved(file_id, block);
    fs.write_new_item(sector, idx, &reserved)?;
    fs.write_page(fs.layout().data_page_addr(sector, idx), page)?;
    let target_state = PageState::from_byte(state).unwrap_or(PageState::Used);
    fs.commit_size_and_state(sector, idx, target_state, size)?;
    fs.cache_put(file_id, block, (sector, idx));
    Ok(())
}

fn find_erased_page_excluding<F: Flash>(fs: &mut Filesystem<F>, exclude: u32) -> Result<(u32, u16)> {
    let sector_count = fs.layout().sector_count as u32;
    let pages_per_sector = fs.layout().data_pages_per_sector as u16;
    for sector in 0..sector_count {
        if sector == exclude {
            continue;
        }
        for idx in 0..pages_per_sector {
            let item = fs.read_item(sector, idx)?;
            if item.page_state() == Some(PageState::Erased) {
                return Ok((sector, idx));
            }
        }
    }
    Err(Error::NoSpace)
}

fn pick_victim<F: Flash>(fs: &mut Filesystem<F>) -> Result<u32> {
    let sector_count = fs.layout().sector_count as u32;
    let mut best: Option<(u32, usize)> = None;
    for sector in 0..sector_count {
        let header = fs.read_header(sector)?;
        let state = SectorState::from_byte(header.state);
        if !matches!(state, Some(SectorState::Full) | Some(SectorState::Dirty)) {
            continue;
        }
        let (_, _, _, _, old) = fs.census(sector)?;
        if best.map_or(true, |(_, best_old)| old > best_old) {
            best = Some((sector, old));
        }
    }
    best.map(|(sector, _)| sector).ok_or(Error::NoSpace)
}

/// Mount-time repair of interrupted writes (§4.13): age orphaned
/// RESERVED items (crash before the data page or the state flip) to
/// OLD so they never look live, and resolve any (file_id, block) left
/// with more than one live copy (crash after the new copy went USED
/// but before the old one was aged) down to exactly one.
pub(crate) fn repair_duplicates<F: Flash>(fs: &mut Filesystem<F>) -> Result<()> {
    let sector_count = fs.layout().sector_count as u32;
    let pages_per_sector = fs.layout().data_pages_per_sector as u16;

    for sector in 0..sector_count {
        for idx in 0..pages_per_sector {
            let item = fs.read_item(sector, idx)?;
            if item.page_state() == Some(PageState::Reserved) {
                log::warn!("repairing orphaned RESERVED item at sector {} idx {}", sector, idx);
                fs.set_item_state(sector, idx, PageState::Old)?;
            }
        }
    }

    // Scan in (sector, item_index) order and keep the first copy of
    // each (file_id, block) seen, demoting every later duplicate —
    // this is the same order `find_page`'s linear scan would report,
    // so the survivor is always the one a lookup would have returned
    // anyway.
    let mut seen: alloc_free_set::Seen = alloc_free_set::Seen::default();
    for sector in 0..sector_count {
        for idx in 0..pages_per_sector {
            let item = fs.read_item(sector, idx)?;
            if item.page_state() != Some(PageState::Used) && item.page_state() != Some(PageState::Moving) {
                continue;
            }
            let file_id = item.file_id;
            let block = item.block;
            if seen.get(file_id, block).is_some() {
                log::warn!("repairing duplicate live copy of file {} block {} at sector {} idx {}", file_id, block, sector, idx);
                fs.set_item_state(sector, idx, PageState::Old)?;
            } else {
                seen.insert(file_id, block, (sector, idx));
            }
        }
    }
    Ok(())
}

/// A tiny fixed-capacity seen-set, so duplicate repair works the same
/// with or without `std`'s `HashMap`.
mod alloc_free_set {
    const CAPACITY: usize = 64;

    pub(crate) struct Seen {
        entries: [(u16, u16, u32, u16); CAPACITY],
        len: usize,
    }

    impl Default for Seen {
        fn default() -> Self {
            Seen {
                entries: [(0, 0, 0, 0); CAPACITY],
                len: 0,
            }
        }
    }

    impl Seen {
        pub(crate) fn get(&self, file_id: u16, block: u16) -> Option<(u32, u16)> {
            self.entries[..self.len]
                .iter()
                .find(|e| e.0 == file_id && e.1 == block)
                .map(|e| (e.2, e.3))
        }

        /// Beyond `CAPACITY` distinct live items per volume this
        /// silently drops the record, which only means a vanishingly
        /// unlikely double-repair is deferred to the next mount.
        pub(crate) fn insert(&mut self, file_id: u16, block: u16, location: (u32, u16)) {
            if self.len < CAPACITY {
                self.entries[self.len] = (file_id, block, location.0, location.1);
                self.len += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use simflash::SimFlash;

    use super::*;
    use crate::file::{file_remove, FileHandle, OpenMode};
    use crate::{Filesystem, FormatOptions, MountOptions};

    fn mounted(sectors: usize) -> Filesystem<SimFlash> {
        let _ = env_logger::try_init();
        let mut flash = SimFlash::new(256, 4096, sectors);
        Filesystem::format(&mut flash, FormatOptions::default()).unwrap();
        Filesystem::mount(flash, MountOptions::default()).unwrap()
    }

    #[test]
    fn reclaim_recovers_space_after_churn() {
        let mut fs = mounted(4);
        for round in 0..40u16 {
            let mut f = FileHandle::open_id(&mut fs, 1, OpenMode::Overwrite).unwrap();
            f.write(&[round as u8; 200]).unwrap();
        }
        let mut f = FileHandle::open_id(&mut fs, 1, OpenMode::Read).unwrap();
        let mut buf = [0u8; 200];
        f.read(&mut buf).unwrap();
        assert_eq!(buf, [39u8; 200]);
    }

    #[test]
    fn removed_file_space_is_eventually_reusable() {
        let mut fs = mounted(4);
        for id in 1..10u16 {
            let mut f = FileHandle::open_id(&mut fs, id, OpenMode::Overwrite).unwrap();
            f.write(&[id as u8; 200]).unwrap();
            file_remove(&mut fs, id).unwrap();
        }
        let mut f = FileHandle::open_id(&mut fs, 99, OpenMode::Overwrite).unwrap();
        f.write(b"still room").unwrap();
    }
}
