//! The on-flash metadata header and item records, and the two state
//! machines (per-sector, per-page) that drive every transition.
//!
//! Every legal forward edge in either state machine is required to
//! only clear bits of the previously stored byte: programming the new
//! code must satisfy `old & new == new`. `is_monotone` checks this for
//! both machines below rather than trusting it by inspection.

use asraw::{AsMutRaw, AsRaw};
use core::fmt;

/// Magic value at the start of every sector's metadata header.
pub const SECTOR_MAGIC: u32 = 0x8798_5214;

/// Magic value inside the master page (file_id 0).
pub const MASTER_MAGIC: u32 = 0x9382_7485;

/// file_id reserved to mean "unallocated item".
pub const UNALLOCATED_FILE_ID: u16 = 0xFFFF;

/// file_id reserved for the filesystem's own master page.
pub const MASTER_FILE_ID: u16 = 0;

/// Largest file_id a caller may use.
pub const MAX_FILE_ID: u16 = 0xFFFE;

/// A sector's lifecycle, derived from the census of its items (§4.3).
///
/// The four codes form a single monotone chain
/// `ERASED ⊇ USED ⊇ FULL ⊇ DIRTY` (each is a bitwise subset of the
/// previous), matching §6 exactly: these are the only state bytes
/// that must be bit-exact for on-disk compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectorState {
    Erased = 0xDE,
    Used = 0xD6,
    Full = 0x56,
    Dirty = 0x46,
}

impl SectorState {
    pub fn from_byte(byte: u8) -> Option<SectorState> {
        match byte {
            0xDE => Some(SectorState::Erased),
            0xD6 => Some(SectorState::Used),
            0x56 => Some(SectorState::Full),
            0x46 => Some(SectorState::Dirty),
            _ => None,
        }
    }

    /// The sector state implied by an item census, per the §4.3 table.
    pub fn from_census(erased: usize, reserved: usize, used: usize, moving: usize, old: usize, capacity: usize) -> SectorState {
        if erased == capacity {
            SectorState::Erased
        } else if erased > 0 {
            debug_assert!(reserved + used + moving + old > 0);
            SectorState::Used
        } else if old == 0 {
            SectorState::Full
        } else {
            SectorState::Dirty
        }
    }
}

/// A page item's lifecycle (§4.2).
///
/// §6 lists ERASED=0xB7, RESERVED=0x34, USED=0xB5, which cannot
/// all hold at once: `RESERVED -> USED` would require *setting* bits
/// (0x34 & 0xB5 == 0x34, not 0xB5), violating the bit-clearing rule.
/// §4.8/§4.9 also
/// both require a freshly erased item to read back as literal `0xFF`
/// ("leave item entries as 0xFF (ERASED by erase)") rather than a
/// distinct programmed sentinel. This implementation resolves the
/// conflict by using `0xFF` for ERASED and a genuine monotone chain
/// for the rest: `ERASED ⊇ RESERVED ⊇ USED ⊇ MOVING ⊇ OLD`. See
/// DESIGN.md for the full writeup; this is an on-disk format
/// deviation from §6's literal byte table, not from its semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    Erased = 0xFF,
    Reserved = 0xFE,
    Used = 0xFC,
    Moving = 0xF8,
    Old = 0xF0,
}

impl PageState {
    pub fn from_byte(byte: u8) -> Option<PageState> {
        match byte {
            0xFF => Some(PageState::Erased),
            0xFE => Some(PageState::Reserved),
            0xFC => Some(PageState::Used),
            0xF8 => Some(PageState::Moving),
            0xF0 => Some(PageState::Old),
            _ => None,
        }
    }
}

/// Sector metadata header, written starting at sector base (§3, §6).
#[repr(C, packed)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataHeader {
    pub magic: u32,
    pub state: u8,
    pub metadata_page_count: u8,
    pub metadata_item_count: u8,
    pub reserved: u8,
}

impl AsRaw for MetadataHeader {}
unsafe impl AsMutRaw for MetadataHeader {}

impl fmt::Debug for MetadataHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magic = self.magic;
        let state = self.state;
        let metadata_page_count = self.metadata_page_count;
        let metadata_item_count = self.metadata_item_count;
        f.debug_struct("MetadataHeader")
            .field("magic", &format_args!("{:#x}", magic))
            .field("state", &format_args!("{:#x}", state))
            .field("metadata_page_count", &metadata_page_count)
            .field("metadata_item_count", &metadata_item_count)
            .finish()
    }
}

impl MetadataHeader {
    pub const SIZE: usize = core::mem::size_of::<MetadataHeader>();

    pub fn new(state: SectorState) -> MetadataHeader {
        MetadataHeader {
            magic: SECTOR_MAGIC,
            state: state as u8,
            metadata_page_count: 1,
            metadata_item_count: 1,
            reserved: 0xFF,
        }
    }

    pub fn is_valid_magic(&self) -> bool {
        self.magic == SECTOR_MAGIC
    }
}

/// A single metadata item, binding a (file_id, block) to the data page
/// in the same sector at the same table index (§3, §6).
#[repr(C, packed)]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataItem {
    pub file_id: u16,
    pub block: u16,
    pub state: u8,
    pub size: u16,
    pub reserved: u8,
}

impl AsRaw for MetadataItem {}
unsafe impl AsMutRaw for MetadataItem {}

impl fmt::Debug for MetadataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file_id = self.file_id;
        let block = self.block;
        let state = self.state;
        let size = self.size;
        f.debug_struct("MetadataItem")
            .field("file_id", &file_id)
            .field("block", &block)
            .field("state", &format_args!("{:#x}", state))
            .field("size", &size)
            .finish()
    }
}

impl MetadataItem {
    pub const SIZE: usize = core::mem::size_of::<MetadataItem>();

    pub fn erased() -> MetadataItem {
        MetadataItem {
            file_id: UNALLOCATED_FILE_ID,
            block: 0xFFFF,
            state: PageState::Erased as u8,
            size: 0xFFFF,
            reserved: 0xFF,
        }
    }

    /// An item record with every field programmed in a single
    /// `page_write`, legal only when every byte starts fully erased
    /// (i.e. this item slot has never been written before).
    pub fn committed(file_id: u16, block: u16, state: PageState, size: u16) -> MetadataItem {
        MetadataItem { file_id, block, state: state as u8, size, reserved: 0xFF }
    }

    /// A freshly RESERVED item, identity fields set but size still
    /// erased (§4.5 step 1): the allocator writes this first, then the
    /// data page, then flips `state` to USED and shrinks `size`.
    pub fn reserved(file_id: u16, block: u16) -> MetadataItem {
        MetadataItem { file_id, block, state: PageState::Reserved as u8, size: 0xFFFF, reserved: 0xFF }
    }

    pub fn page_state(&self) -> Option<PageState> {
        PageState::from_byte(self.state)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.page_state(), Some(PageState::Used) | Some(PageState::Moving))
    }

    pub fn matches(&self, file_id: u16, block: u16) -> bool {
        self.file_id == file_id && self.block == block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_monotone(old: u8, new: u8) -> bool {
        old & new == new
    }

    #[test]
    fn sector_chain_is_monotone() {
        use SectorState::*;
        let chain = [Erased, Used, Full, Dirty];
        for pair in chain.windows(2) {
            assert!(
                is_monotone(pair[0] as u8, pair[1] as u8),
                "{:?} -> {:?} is not bit-clearing",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn page_chain_covers_every_legal_edge() {
        use PageState::*;
        // ERASED -> RESERVED -> USED -> {MOVING, OLD}; MOVING -> OLD.
        let edges = [
            (Erased, Reserved),
            (Reserved, Used),
            (Used, Moving),
            (Used, Old),
            (Moving, Old),
        ];
        for (from, to) in edges {
            assert!(is_monotone(from as u8, to as u8), "{:?} -> {:?} is not bit-clearing", from, to);
        }
    }

    #[test]
    fn header_and_item_are_eight_bytes_packed() {
        assert_eq!(MetadataHeader::SIZE, 8);
        assert_eq!(MetadataItem::SIZE, 8);
    }

    #[test]
    fn erased_item_round_trips_as_all_ones() {
        let item = MetadataItem::erased();
        assert_eq!(item.as_raw(), &[0xFF; 8]);
    }

    #[test]
    fn sector_state_from_census() {
        let erased = SectorState::from_census(10, 0, 0, 0, 0, 10);
        assert_eq!(erased, SectorState::Erased);

        let used = SectorState::from_census(3, 1, 6, 0, 0, 10);
        assert_eq!(used, SectorState::Used);

        let full = SectorState::from_census(0, 0, 8, 2, 0, 10);
        assert_eq!(full, SectorState::Full);

        let dirty = SectorState::from_census(0, 0, 6, 1, 3, 10);
        assert_eq!(dirty, SectorState::Dirty);
    }
}
