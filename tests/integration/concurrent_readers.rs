#![allow(missing_docs)]

mod support;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use slotdir::storage::dir_page;
use slotdir::types::page::{self, PageKind};
use slotdir::wal::Clean;
use slotdir::{Lsn, OffsetNumber, PageId};
use support::{install, mem_engine, Forward};

#[test]
fn readers_never_observe_half_applied_pages() {
    let heaps: Vec<PageId> = (200..240).map(PageId).collect();
    let mut forward = Forward::new(&heaps, 1);
    let mut rng = ChaCha8Rng::seed_from_u64(0x5107_D1);
    let mut live = Vec::new();
    for &heap in &heaps {
        let len = rng.gen_range(8..80);
        live.push((heap, forward.allocate(heap, &vec![0xC3; len])));
        if live.len() > 4 && rng.gen_bool(0.3) {
            let (heap, location) = live.remove(rng.gen_range(0..live.len()));
            forward.clear(heap);
            forward.clean(location.page, &[location.offset]);
        }
    }
    let max_page = forward.meta.last_used.expect("chain").0;

    let engine = Arc::new(mem_engine());
    forward.seed_data_pages(&engine, &heaps);
    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicU64::new(0));

    let readers: Vec<_> = (0..4)
        .map(|seed| {
            let engine = engine.clone();
            let done = done.clone();
            let observed = observed.clone();
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut rounds = 0u32;
                while !done.load(Ordering::Acquire) || rounds < 50 {
                    rounds += 1;
                    let id = PageId(rng.gen_range(1..=max_page));
                    let Some(page) = engine.cache().read(id).expect("read") else {
                        continue;
                    };
                    let data = page.data();
                    if page::expect_kind(data, PageKind::Directory).is_err() {
                        continue;
                    }
                    for offset in dir_page::live_offsets(data).expect("structure") {
                        let entry = dir_page::entry(data, offset).expect("entry");
                        assert!(entry.map_or(false, |bytes| bytes.iter().all(|&b| b == 0xC3)));
                    }
                    observed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for record in &forward.log {
        engine.redo(record).expect("redo");
    }
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().expect("reader panicked");
    }
    forward.assert_matches(&engine);
    assert!(observed.load(Ordering::Relaxed) > 0);
}

#[test]
fn clean_waits_for_pinned_readers() {
    let engine = Arc::new(mem_engine());
    let dir = PageId(1);
    let mut bytes = vec![0u8; support::PAGE_SIZE as usize];
    dir_page::init(&mut bytes, dir).unwrap();
    dir_page::add_entry(&mut bytes, b"first", None).unwrap();
    dir_page::add_entry(&mut bytes, b"second", None).unwrap();
    page::set_page_lsn(&mut bytes, Lsn(5));
    install(&engine, dir, &bytes);

    let reader = engine.cache().read(dir).unwrap().unwrap();
    let (tx, rx) = mpsc::channel();
    let worker = {
        let engine = engine.clone();
        thread::spawn(move || {
            let record = Clean::new(dir, &[OffsetNumber(1)]).build(Lsn(10)).unwrap();
            engine.redo(&record).unwrap();
            tx.send(()).unwrap();
        })
    };
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(
        dir_page::entry(reader.data(), OffsetNumber(1)).unwrap(),
        Some(&b"first"[..])
    );
    drop(reader);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("clean finished once the reader let go");
    worker.join().unwrap();

    let page = engine.cache().read(dir).unwrap().unwrap();
    assert_eq!(dir_page::entry(page.data(), OffsetNumber(1)).unwrap(), None);
    assert_eq!(
        dir_page::entry(page.data(), OffsetNumber(2)).unwrap(),
        Some(&b"second"[..])
    );
}
