#![allow(missing_docs)]

mod support;

use std::collections::BTreeMap;

use proptest::prelude::*;
use slotdir::storage::{dir_page, SlotLocation};
use slotdir::types::page;
use slotdir::wal::{AllocateEntry, Clean};
use slotdir::{FatalError, Lsn, OffsetNumber, PageId, RedoAction};
use support::{install, mem_engine, page_bytes, Forward, PAGE_SIZE};

const DIR: PageId = PageId(1);
const HEAP_COUNT: u64 = 6;

#[derive(Debug, Clone)]
enum Op {
    Allocate { heap: u64, len: usize, fill: u8 },
    Clean { pick: usize, mask: u32 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..HEAP_COUNT, 1usize..100, any::<u8>())
            .prop_map(|(heap, len, fill)| Op::Allocate { heap, len, fill }),
        1 => (any::<usize>(), 1u32..u32::MAX).prop_map(|(pick, mask)| Op::Clean { pick, mask }),
    ]
}

fn heap_id(n: u64) -> PageId {
    PageId(1000 + n)
}

/// Runs `ops` through the forward path, keeping back-references consistent:
/// an entry's data page is cleared before the entry is pruned.
fn run_forward(ops: &[Op]) -> (Forward, Vec<PageId>) {
    let heaps: Vec<PageId> = (0..HEAP_COUNT).map(heap_id).collect();
    let mut forward = Forward::new(&heaps, 1);
    let mut owners: BTreeMap<PageId, SlotLocation> = BTreeMap::new();
    for op in ops {
        match op {
            Op::Allocate { heap, len, fill } => {
                let heap = heap_id(*heap);
                if owners.contains_key(&heap) {
                    continue;
                }
                let location = forward.allocate(heap, &vec![*fill; *len]);
                owners.insert(heap, location);
            }
            Op::Clean { pick, mask } => {
                if owners.is_empty() {
                    continue;
                }
                let pages: Vec<PageId> = owners.values().map(|l| l.page).collect();
                let target = pages[pick % pages.len()];
                let victims: Vec<(PageId, SlotLocation)> = owners
                    .iter()
                    .filter(|(_, l)| l.page == target)
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << (i % 32)) != 0)
                    .map(|(_, (heap, l))| (*heap, *l))
                    .collect();
                if victims.is_empty() {
                    continue;
                }
                for (heap, _) in &victims {
                    forward.clear(*heap);
                    owners.remove(heap);
                }
                let offsets: Vec<OffsetNumber> = victims.iter().map(|(_, l)| l.offset).collect();
                forward.clean(target, &offsets);
            }
        }
    }
    (forward, heaps)
}

fn page_with(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE as usize];
    dir_page::init(&mut page, DIR).unwrap();
    for entry in entries {
        dir_page::add_entry(&mut page, entry, None).unwrap().unwrap();
    }
    page::set_page_lsn(&mut page, Lsn(5));
    page
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn clean_leaves_exactly_the_survivors(
        entries in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..24), 1..14),
        mask in any::<u16>(),
    ) {
        let engine = mem_engine();
        install(&engine, DIR, &page_with(&entries));
        let all: Vec<OffsetNumber> = (1..=entries.len() as u16).map(OffsetNumber).collect();
        let pruned: Vec<OffsetNumber> = all
            .iter()
            .copied()
            .filter(|o| mask & (1 << (o.0 - 1)) != 0)
            .collect();

        let record = Clean::new(DIR, &pruned).build(Lsn(10)).unwrap();
        let summary = engine.redo(&record).unwrap();
        prop_assert_eq!(summary.action(0), Some(RedoAction::ApplyDelta));

        let page = page_bytes(&engine, DIR).unwrap();
        let survivors: Vec<OffsetNumber> =
            all.iter().copied().filter(|o| !pruned.contains(o)).collect();
        prop_assert_eq!(dir_page::live_offsets(&page).unwrap(), survivors.clone());
        for offset in &survivors {
            let expected = &entries[offset.0 as usize - 1];
            prop_assert_eq!(dir_page::entry(&page, *offset).unwrap(), Some(&expected[..]));
        }
        let header = dir_page::Header::parse(&page).unwrap();
        let live_bytes: usize = survivors.iter().map(|o| entries[o.0 as usize - 1].len()).sum();
        prop_assert_eq!(header.upper, header.special - live_bytes);
        prop_assert!(page[header.lower..header.upper].iter().all(|&b| b == 0));
    }

    #[test]
    fn forward_histories_replay_byte_identically(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (forward, heaps) = run_forward(&ops);
        let engine = mem_engine();
        forward.seed_data_pages(&engine, &heaps);
        for record in &forward.log {
            engine.redo(record).unwrap();
        }
        forward.assert_matches(&engine);
    }

    #[test]
    fn every_record_is_idempotent(ops in prop::collection::vec(arb_op(), 1..30)) {
        let (forward, heaps) = run_forward(&ops);
        let engine = mem_engine();
        forward.seed_data_pages(&engine, &heaps);
        for record in &forward.log {
            engine.redo(record).unwrap();
            let snapshot: Vec<Option<Vec<u8>>> =
                forward.pages.keys().map(|id| page_bytes(&engine, *id)).collect();
            if !record.init_page() {
                engine.redo(record).unwrap();
                let again: Vec<Option<Vec<u8>>> =
                    forward.pages.keys().map(|id| page_bytes(&engine, *id)).collect();
                prop_assert_eq!(snapshot, again);
            }
        }
        forward.assert_matches(&engine);
    }

    #[test]
    fn requested_offset_beyond_next_is_fatal(
        existing in 0usize..6,
        gap in 2u16..20,
    ) {
        let engine = mem_engine();
        let entries: Vec<Vec<u8>> = (0..existing).map(|i| vec![i as u8; 8]).collect();
        let page = if entries.is_empty() {
            let mut page = vec![0u8; PAGE_SIZE as usize];
            dir_page::init(&mut page, DIR).unwrap();
            page::set_page_lsn(&mut page, Lsn(5));
            page
        } else {
            page_with(&entries)
        };
        install(&engine, DIR, &page);
        install(&engine, PageId(2), &support::blank_data_page(PageId(2)));
        let requested = OffsetNumber(existing as u16 + gap);
        let record = AllocateEntry::new(DIR, PageId(2), requested, b"late")
            .build(Lsn(10))
            .unwrap();
        let err = engine.redo(&record).unwrap_err();
        prop_assert_eq!(
            err.as_fatal(),
            Some(&FatalError::EntryPlacement { page: DIR, requested, placed: None })
        );
    }
}
