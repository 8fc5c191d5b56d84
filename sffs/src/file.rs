//! File handles: the block-oriented read/write/seek API built on top
//! of the copy-on-write commit in [`crate::fs`] (§4.5, §4.6, §4.7).
//!
//! A file has no separate inode; its size is the sum of every live
//! item's recorded `size` for that `file_id` (§4.2, §4.7) — a block
//! with no item at all is a hole and contributes nothing, but does not
//! end the file if a later block still has one. Blocks are addressed
//! by `position / page_size`; a write that touches the middle of a
//! block is a read-modify-write of the whole block, since flash can
//! only clear bits and a block's data page is never partially
//! reprogrammed in place once committed.

use storage::Flash;

use crate::metadata::MAX_FILE_ID;
use crate::{Error, Filesystem, Result};

/// Upper bound on `page_size` across every `Layout` this crate
/// mounts; lets read-modify-write use a stack buffer instead of an
/// allocator, so file I/O works the same with or without `std`.
const MAX_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fail if the file does not already have at least one block.
    Read,
    /// Start writing from position 0; later blocks from a previous,
    /// longer version of the file are left as old garbage, collected
    /// the next time their sector is reclaimed, and no longer visible
    /// at the new, shorter size (§4.6).
    Overwrite,
    /// Start writing from the current end of the file.
    Append,
}

/// An open file. Borrows the mounted filesystem for its lifetime;
/// only one handle per file is meaningful at a time (§5).
pub struct FileHandle<'a, F: Flash> {
    fs: &'a mut Filesystem<F>,
    file_id: u16,
    position: u32,
    size: u32,
    /// True for `OpenMode::Overwrite`: a block's on-flash content from
    /// before this handle was opened is stale and must not be treated
    /// as data to preserve by the read-modify-write in `write`.
    truncate: bool,
}

impl<'a, F: Flash> core::fmt::Debug for FileHandle<'a, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileHandle")
            .field("file_id", &self.file_id)
            .field("position", &self.position)
            .field("size", &self.size)
            .field("truncate", &self.truncate)
            .finish()
    }
}

impl<'a, F: Flash> FileHandle<'a, F> {
    pub(crate) fn open_id(fs: &'a mut Filesystem<F>, file_id: u16, mode: OpenMode) -> Result<FileHandle<'a, F>> {
        if file_id == 0 || file_id > MAX_FILE_ID {
            return Err(Error::InvalidArg);
        }
        let on_disk_size = file_size(fs, file_id)?;
        let (position, size, truncate) = match mode {
            OpenMode::Read => {
                if on_disk_size == 0 && find_first_block(fs, file_id)?.is_none() {
                    return Err(Error::NotFound);
                }
                (0, on_disk_size, false)
            }
            OpenMode::Overwrite => (0, 0, true),
            OpenMode::Append => (on_disk_size, on_disk_size, false),
        };
        Ok(FileHandle { fs, file_id, position, size, truncate })
    }

    pub fn file_size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    /// Move the read/write cursor. Seeking past the end is allowed;
    /// the next write will leave a gap of blocks with no item at all,
    /// which reads back as zeros up to the file's declared length
    /// (§4.6).
    pub fn seek(&mut self, position: u32) {
        self.position = position;
    }

    /// Read up to `buf.len()` bytes starting at the cursor, stopping
    /// at the end of the file. Returns the number of bytes read. A
    /// block with no item at all is a hole and reads as zeros, same as
    /// a block short of a full page (§4.6).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let page_size = self.fs.layout().page_size as u32;
        let mut written = 0usize;
        let mut scratch = [0u8; MAX_PAGE_SIZE];

        while written < buf.len() && self.position < self.size {
            let block = (self.position / page_size) as u16;
            let offset = (self.position % page_size) as usize;
            let (block_len, found) = read_block(self.fs, self.file_id, block, page_size as usize, &mut scratch)?;
            let avail_in_block = if found { block_len.saturating_sub(offset) } else { (page_size as usize).saturating_sub(offset) };
            let remaining_in_file = (self.size - self.position) as usize;
            let take = (buf.len() - written).min(avail_in_block).min(remaining_in_file);
            if take == 0 {
                break;
            }
            buf[written..written + take].copy_from_slice(&scratch[offset..offset + take]);
            written += take;
            self.position += take as u32;
        }
        Ok(written)
    }

    /// Read starting at `pos` without disturbing the handle's own
    /// cursor (§6).
    pub fn read_pos(&mut self, buf: &mut [u8], pos: u32) -> Result<usize> {
        let saved = self.position;
        self.position = pos;
        let result = self.read(buf);
        self.position = saved;
        result
    }

    /// Write `buf` at the cursor, advancing it and extending the
    /// file's recorded size if the write reaches past the current end
    /// (§4.5).
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let page_size = self.fs.layout().page_size as u32;
        let mut consumed = 0usize;
        let mut scratch = [0u8; MAX_PAGE_SIZE];

        while consumed < buf.len() {
            let block = (self.position / page_size) as u16;
            let offset = (self.position % page_size) as usize;
            let (existing_len, _found) = read_block(self.fs, self.file_id, block, page_size as usize, &mut scratch)?;
            let baseline = if self.truncate { 0 } else { existing_len };
            let usable = baseline.max(offset);
            // Anything between the valid end of this block and
            // `offset` that was never written reads as zero, matching
            // a plain append past a short last block — and, in
            // truncate mode, erasing whatever stale bytes `read_block`
            // copied in from the previous generation.
            for b in scratch.iter_mut().take(offset).skip(baseline) {
                *b = 0;
            }

            let take = (buf.len() - consumed).min(page_size as usize - offset);
            scratch[offset..offset + take].copy_from_slice(&buf[consumed..consumed + take]);
            let new_len = usable.max(offset + take);

            // Mark any current live copy as MOVING before the new page
            // is even reserved, so the window in which two items could
            // both read USED for this block is only the final state
            // flip below, not the whole reserve-and-program sequence
            // (§4.2/§4.5 step 3).
            self.fs.begin_replace(self.file_id, block)?;

            let page = &scratch[..page_size as usize];
            let location = self.fs.allocate_and_commit(self.file_id, block, page, new_len as u16)?;
            self.fs.retire_other_copies(self.file_id, block, location)?;

            consumed += take;
            self.position += take as u32;
            if self.position > self.size {
                self.size = self.position;
            }
        }
        Ok(())
    }

    /// Write starting at `pos` without disturbing the handle's own
    /// cursor (§6).
    pub fn write_pos(&mut self, buf: &[u8], pos: u32) -> Result<()> {
        let saved = self.position;
        self.position = pos;
        let result = self.write(buf);
        self.position = saved;
        result
    }

    /// Drop the handle without any extra bookkeeping; all state lives
    /// on flash already, so there is nothing to flush (§4.5).
    pub fn close(self) {}
}

/// Delete a file: age every one of its items to OLD so the space is
/// reclaimed like any other garbage, without a tombstone record
/// (§4.6, §4.8).
pub fn file_remove<F: Flash>(fs: &mut Filesystem<F>, file_id: u16) -> Result<()> {
    if file_id == 0 || file_id > MAX_FILE_ID {
        return Err(Error::InvalidArg);
    }
    let sector_count = fs.layout().sector_count as u32;
    let pages_per_sector = fs.layout().data_pages_per_sector as u16;
    let mut found = false;
    for sector in 0..sector_count {
        for idx in 0..pages_per_sector {
            let item = fs.read_item(sector, idx)?;
            if item.file_id == file_id && item.is_live() {
                found = true;
                fs.set_item_state(sector, idx, crate::metadata::PageState::Old)?;
            }
        }
    }
    if !found {
        return Err(Error::NotFound);
    }
    Ok(())
}

/// Σ `item.size` over every item matching `file_id` with state USED or
/// MOVING (§4.7) — a plain device-wide sum, not a walk that stops at
/// the first gap, since a file may have a hole followed by more data.
pub fn file_size<F: Flash>(fs: &mut Filesystem<F>, file_id: u16) -> Result<u32> {
    let sector_count = fs.layout().sector_count as u32;
    let pages_per_sector = fs.layout().data_pages_per_sector as u16;
    let mut total = 0u32;
    for sector in 0..sector_count {
        for idx in 0..pages_per_sector {
            let item = fs.read_item(sector, idx)?;
            if item.file_id == file_id && item.is_live() {
                total += item.size as u32;
            }
        }
    }
    Ok(total)
}

fn find_first_block<F: Flash>(fs: &mut Filesystem<F>, file_id: u16) -> Result<Option<(u32, u16)>> {
    crate::locator::find_page(fs, file_id, 0)
}

/// Read block `block` of `file_id` into `scratch[..page_size]`,
/// zero-filling if the block has never been written. Returns the
/// block's recorded length and whether it was found at all.
fn read_block<F: Flash>(fs: &mut Filesystem<F>, file_id: u16, block: u16, page_size: usize, scratch: &mut [u8]) -> Result<(usize, bool)> {
    match crate::locator::find_page(fs, file_id, block)? {
        None => {
            scratch[..page_size].fill(0);
            Ok((0, false))
        }
        Some((sector, idx)) => {
            let item = fs.read_item(sector, idx)?;
            let addr = fs.layout().data_page_addr(sector, idx);
            fs.read_page(addr, &mut scratch[..page_size])?;
            Ok((item.size as usize, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use simflash::SimFlash;

    use super::*;
    use crate::{Filesystem, FormatOptions, MountOptions};

    fn mounted() -> Filesystem<SimFlash> {
        let _ = env_logger::try_init();
        let mut flash = SimFlash::new(256, 4096, 8);
        Filesystem::format(&mut flash, FormatOptions::default()).unwrap();
        Filesystem::mount(flash, MountOptions::default()).unwrap()
    }

    #[test]
    fn write_then_read_back_small_file() {
        let mut fs = mounted();
        {
            let mut f = FileHandle::open_id(&mut fs, 7, OpenMode::Overwrite).unwrap();
            f.write(b"hello, sffs").unwrap();
        }
        let mut f = FileHandle::open_id(&mut fs, 7, OpenMode::Read).unwrap();
        assert_eq!(f.file_size(), 11);
        let mut buf = [0u8; 11];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello, sffs");
    }

    #[test]
    fn write_spanning_multiple_blocks() {
        let mut fs = mounted();
        let data: std::vec::Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        {
            let mut f = FileHandle::open_id(&mut fs, 3, OpenMode::Overwrite).unwrap();
            f.write(&data).unwrap();
        }
        let mut f = FileHandle::open_id(&mut fs, 3, OpenMode::Read).unwrap();
        assert_eq!(f.file_size() as usize, data.len());
        let mut buf = std::vec![0u8; data.len()];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(buf, data);
    }

    #[test]
    fn append_extends_past_previous_end() {
        let mut fs = mounted();
        {
            let mut f = FileHandle::open_id(&mut fs, 9, OpenMode::Overwrite).unwrap();
            f.write(b"abc").unwrap();
        }
        {
            let mut f = FileHandle::open_id(&mut fs, 9, OpenMode::Append).unwrap();
            f.write(b"def").unwrap();
        }
        let mut f = FileHandle::open_id(&mut fs, 9, OpenMode::Read).unwrap();
        let mut buf = [0u8; 6];
        f.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn overwrite_resets_size_even_if_shorter() {
        let mut fs = mounted();
        {
            let mut f = FileHandle::open_id(&mut fs, 5, OpenMode::Overwrite).unwrap();
            f.write(b"a long first version").unwrap();
        }
        {
            let mut f = FileHandle::open_id(&mut fs, 5, OpenMode::Overwrite).unwrap();
            f.write(b"short").unwrap();
        }
        let mut f = FileHandle::open_id(&mut fs, 5, OpenMode::Read).unwrap();
        assert_eq!(f.file_size(), 5);
    }

    #[test]
    fn remove_then_read_fails() {
        let mut fs = mounted();
        {
            let mut f = FileHandle::open_id(&mut fs, 11, OpenMode::Overwrite).unwrap();
            f.write(b"gone soon").unwrap();
        }
        file_remove(&mut fs, 11).unwrap();
        assert!(FileHandle::open_id(&mut fs, 11, OpenMode::Read).is_err());
    }

    #[test]
    fn file_id_zero_is_reserved() {
        let mut fs = mounted();
        assert_eq!(FileHandle::open_id(&mut fs, 0, OpenMode::Overwrite).unwrap_err(), Error::InvalidArg);
    }
}
