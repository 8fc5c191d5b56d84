//! Property-style exercises against a simulated device: a long seeded
//! random workload (§8 scenario 4) and a crash-recovery check using
//! fault injection (scenario 6).

use std::collections::HashMap;

use simflash::workload::{Op, WorkloadGen};
use simflash::SimFlash;
use sffs::{Filesystem, FormatOptions, MountOptions, OpenMode};

fn fresh(sectors: usize) -> Filesystem<SimFlash> {
    let _ = env_logger::try_init();
    let mut flash = SimFlash::new(256, 4096, sectors);
    Filesystem::format(&mut flash, FormatOptions::default()).unwrap();
    Filesystem::mount(flash, MountOptions::default()).unwrap()
}

/// Runs a seeded random workload against a live volume, tracking an
/// in-memory model of every file's expected content, and checks the
/// filesystem against that model at every step. 50 files and 100,000
/// steps is enough churn to drive reclamation through many cycles on a
/// six-sector device and to exercise block reuse across a wide spread
/// of files, not just the handful that would come up in a shorter run.
#[test]
fn random_workload_matches_model() {
    const FILE_COUNT: usize = 50;
    let mut fs = fresh(6);
    let mut model: HashMap<usize, Vec<u8>> = HashMap::new();
    let mut gen = WorkloadGen::new(0xC0FFEE, FILE_COUNT);

    for step in 0..100_000 {
        let (file_index, op) = gen.next_step();
        let file_id = (file_index + 1) as u16;
        match op {
            Op::Rewrite => {
                let len = gen.content_len(500, 1500);
                let mut content = vec![0u8; len];
                gen.fill_content(&mut content);
                let mut f = fs.open(file_id, OpenMode::Overwrite).unwrap();
                f.write(&content).unwrap();
                model.insert(file_index, content);
            }
            Op::Delete => {
                if model.remove(&file_index).is_some() {
                    fs.remove(file_id).unwrap();
                }
            }
            Op::SizeCheck => {
                if let Some(expected) = model.get(&file_index) {
                    assert_eq!(fs.size(file_id).unwrap() as usize, expected.len(), "size mismatch at step {}", step);
                }
            }
            Op::Verify => {
                if let Some(expected) = model.get(&file_index) {
                    let mut f = fs.open(file_id, OpenMode::Read).unwrap();
                    let mut buf = vec![0u8; expected.len()];
                    let n = f.read(&mut buf).unwrap();
                    assert_eq!(n, expected.len(), "short read at step {}", step);
                    assert_eq!(&buf, expected, "content mismatch at step {}", step);
                }
            }
        }
    }
}

/// After a simulated power cut mid-write, remounting must leave every
/// file that existed before the interrupted write intact, and must
/// never report two live copies of the same block (§4.5 crash
/// recovery note, §8 scenario 6). Swept across several cut points so
/// the check isn't tied to one lucky (or unlucky) spot in the COW
/// sequence: N=1 lands inside `begin_replace`'s own state program,
/// N=7 lands around the new item's commit, N=13 lands after the old
/// copy has likely been retired.
#[test]
fn power_cut_during_rewrite_preserves_prior_content() {
    for cut_after in [1usize, 7, 13] {
        let mut flash = SimFlash::new(256, 4096, 4);
        Filesystem::format(&mut flash, FormatOptions::default()).unwrap();

        {
            let mut fs = Filesystem::mount(flash, MountOptions::default()).unwrap();
            {
                let mut f = fs.open(1, OpenMode::Overwrite).unwrap();
                f.write(b"first committed version").unwrap();
            }
            {
                let mut f = fs.open(2, OpenMode::Overwrite).unwrap();
                f.write(b"never touched by this rewrite").unwrap();
            }
            flash = remount_raw(fs);
        }

        flash.cut_power_after(cut_after);

        let mut fs = Filesystem::mount(flash, MountOptions::default()).unwrap();
        let mut f = fs.open(1, OpenMode::Overwrite).unwrap();
        let _ = f.write(b"second version that may not fully land");
        drop(f);

        let mut flash = remount_raw(fs);
        flash.restore_power();
        let mut fs = Filesystem::mount(flash, MountOptions::default()).unwrap();

        let mut f = fs.open(1, OpenMode::Read).unwrap();
        let mut buf = [0u8; 64];
        let n = f.read(&mut buf).unwrap();
        let content = &buf[..n];
        assert!(
            content == b"first committed version" || content == b"second version that may not fully land",
            "cut_after={}: file content after a power cut must be exactly one of the two written versions, got {:?}",
            cut_after,
            content
        );

        let mut f2 = fs.open(2, OpenMode::Read).unwrap();
        let mut buf2 = [0u8; 64];
        let n2 = f2.read(&mut buf2).unwrap();
        assert_eq!(&buf2[..n2], b"never touched by this rewrite", "cut_after={}: unrelated file must survive untouched", cut_after);
    }
}

fn remount_raw(fs: Filesystem<SimFlash>) -> SimFlash {
    fs.into_inner()
}

#[test]
fn reclamation_keeps_a_small_device_usable_indefinitely() {
    let mut fs = fresh(3);
    for round in 0..200u16 {
        let mut f = fs.open(1, OpenMode::Overwrite).unwrap();
        f.write(&[round as u8; 300]).unwrap();
    }
    let mut f = fs.open(1, OpenMode::Read).unwrap();
    let mut buf = [0u8; 300];
    f.read(&mut buf).unwrap();
    assert_eq!(buf, [199u8; 300]);
}
