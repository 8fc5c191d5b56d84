//! The master page: a labeled header written as an ordinary file with
//! id 0, block 0 (§3, §4.9). There is no directory; this is the only
//! record every mount reads unconditionally.

use asraw::{AsMutRaw, AsRaw};
use core::fmt;

use crate::metadata::MASTER_MAGIC;

pub const LABEL_LEN: usize = 32;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MasterPage {
    pub magic: u32,
    pub label: [u8; LABEL_LEN],
    pub page_size: u32,
    pub sector_size: u32,
    pub sector_count: u32,
}

impl AsRaw for MasterPage {}
unsafe impl AsMutRaw for MasterPage {}

impl Default for MasterPage {
    fn default() -> MasterPage {
        MasterPage { magic: 0, label: [0; LABEL_LEN], page_size: 0, sector_size: 0, sector_count: 0 }
    }
}

impl fmt::Debug for MasterPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magic = self.magic;
        let page_size = self.page_size;
        let sector_size = self.sector_size;
        let sector_count = self.sector_count;
        f.debug_struct("MasterPage")
            .field("magic", &format_args!("{:#x}", magic))
            .field("label", &self.label())
            .field("page_size", &page_size)
            .field("sector_size", &sector_size)
            .field("sector_count", &sector_count)
            .finish()
    }
}

impl MasterPage {
    pub const SIZE: usize = core::mem::size_of::<MasterPage>();

    pub fn new(label: &str, page_size: u32, sector_size: u32, sector_count: u32) -> MasterPage {
        let mut bytes = [0u8; LABEL_LEN];
        let src = label.as_bytes();
        let n = src.len().min(LABEL_LEN);
        bytes[..n].copy_from_slice(&src[..n]);
        MasterPage { magic: MASTER_MAGIC, label: bytes, page_size, sector_size, sector_count }
    }

    pub fn is_valid_magic(&self) -> bool {
        self.magic == MASTER_MAGIC
    }

    pub fn label(&self) -> &str {
        let end = self.label.iter().position(|&b| b == 0).unwrap_or(LABEL_LEN);
        core::str::from_utf8(&self.label[..end]).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_round_trips() {
        let page = MasterPage::new("sffs-test", 256, 4096, 16);
        assert_eq!(page.label(), "sffs-test");
        assert!(page.is_valid_magic());
    }

    #[test]
    fn oversized_label_is_truncated_not_panicking() {
        let long = "x".repeat(100);
        let page = MasterPage::new(&long, 256, 4096, 16);
        assert_eq!(page.label().len(), LABEL_LEN);
    }
}
