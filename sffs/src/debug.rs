//! `debug_print`: a human-readable dump of every sector's header and
//! item table, for diagnosing a volume from a test or a shell command
//! (§6, §10). Distinct from the `log` crate calls elsewhere in this
//! crate — those are for developers running the code, this is a
//! stable-ish report a caller can show a user. Never panics and never
//! returns a filesystem error: a corrupt record is reported inline
//! instead of aborting the dump.

use core::fmt::Write;

use storage::Flash;

use crate::metadata::{PageState, SectorState};
use crate::Filesystem;

/// Write a census of `fs` to `out`. Returns an error only if `out`
/// itself fails (e.g. a fixed buffer that ran out of room).
pub fn debug_print<F: Flash, W: Write>(fs: &mut Filesystem<F>, out: &mut W) -> core::fmt::Result {
    let layout = fs.layout();
    writeln!(out, "sffs volume: {} sectors, {} bytes/page, {} data pages/sector", layout.sector_count, layout.page_size, layout.data_pages_per_sector)?;

    for sector in 0..layout.sector_count as u32 {
        let header = match fs.read_header(sector) {
            Ok(h) => h,
            Err(_) => {
                writeln!(out, "sector {:3}: <read error>", sector)?;
                continue;
            }
        };
        let state = SectorState::from_byte(header.state);
        writeln!(out, "sector {:3}: state={}", sector, describe_sector(state))?;

        for idx in 0..layout.data_pages_per_sector as u16 {
            let item = match fs.read_item(sector, idx) {
                Ok(i) => i,
                Err(_) => {
                    writeln!(out, "    item {:3}: <read error>", idx)?;
                    continue;
                }
            };
            if item.page_state() == Some(PageState::Erased) {
                continue;
            }
            let file_id = item.file_id;
            let block = item.block;
            let size = item.size;
            writeln!(
                out,
                "    item {:3}: file={:5} block={:5} size={:5} state={}",
                idx,
                file_id,
                block,
                size,
                describe_page(item.page_state())
            )?;
        }
    }
    Ok(())
}

fn describe_sector(state: Option<SectorState>) -> &'static str {
    match state {
        Some(SectorState::Erased) => "ERASED",
        Some(SectorState::Used) => "USED",
        Some(SectorState::Full) => "FULL",
        Some(SectorState::Dirty) => "DIRTY",
        None => "?",
    }
}

fn describe_page(state: Option<PageState>) -> &'static str {
    match state {
        Some(PageState::Erased) => "ERASED",
        Some(PageState::Reserved) => "RESERVED",
        Some(PageState::Used) => "USED",
        Some(PageState::Moving) => "MOVING",
        Some(PageState::Old) => "OLD",
        None => "?",
    }
}

#[cfg(test)]
mod tests {
    use simflash::SimFlash;

    use super::*;
    use crate::{FormatOptions, MountOptions, OpenMode};

    #[test]
    fn dump_contains_every_written_file() {
        let _ = env_logger::try_init();
        let mut flash = SimFlash::new(256, 4096, 4);
        Filesystem::format(&mut flash, FormatOptions::default()).unwrap();
        let mut fs = Filesystem::mount(flash, MountOptions::default()).unwrap();
        {
            let mut f = fs.open(5, OpenMode::Overwrite).unwrap();
            f.write(b"hi").unwrap();
        }

        let mut report = std::string::String::new();
        debug_print(&mut fs, &mut report).unwrap();
        assert!(report.contains("file=5"));
        assert!(report.contains("sffs volume"));
    }
}
