#![allow(missing_docs)]

mod support;

use slotdir::storage::{dir_page, heap, meta, MetaState, SlotLocation};
use slotdir::types::page;
use slotdir::wal::{block, AllocateEntry, Clean, ClearLocation, PageImage};
use slotdir::{FatalError, Lsn, OffsetNumber, PageId, RedoAction};
use support::{install, mem_engine, page_bytes, Forward, META_PAGE, PAGE_SIZE};

const DIR: PageId = PageId(1);
const HEAP: PageId = PageId(2);

fn empty_dir_page(id: PageId, lsn: Lsn) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE as usize];
    dir_page::init(&mut page, id).unwrap();
    page::set_page_lsn(&mut page, lsn);
    page
}

#[test]
fn allocate_clean_clear_walkthrough() {
    let engine = mem_engine();
    install(&engine, DIR, &empty_dir_page(DIR, Lsn(5)));
    install(&engine, HEAP, &support::blank_data_page(HEAP));

    let allocate = AllocateEntry::new(DIR, HEAP, OffsetNumber(1), b"abc")
        .prev_link(None)
        .build(Lsn(100))
        .unwrap();
    let summary = engine.redo(&allocate).unwrap();
    assert_eq!(summary.action(block::DIRECTORY), Some(RedoAction::ApplyDelta));
    assert_eq!(summary.action(block::DATA), Some(RedoAction::ApplyDelta));

    let dir = page_bytes(&engine, DIR).unwrap();
    assert_eq!(dir_page::entry_count(&dir).unwrap(), 1);
    assert_eq!(dir_page::entry(&dir, OffsetNumber(1)).unwrap(), Some(&b"abc"[..]));
    assert_eq!(dir_page::trailer(&dir).unwrap().prev, None);
    assert_eq!(page::page_lsn(&dir), Lsn(100));
    let heap_page = page_bytes(&engine, HEAP).unwrap();
    assert_eq!(
        heap::back_reference(&heap_page).unwrap(),
        Some(SlotLocation::new(DIR, OffsetNumber(1)))
    );

    let clean = Clean::new(DIR, &[OffsetNumber(1)]).build(Lsn(200)).unwrap();
    engine.redo(&clean).unwrap();
    let dir = page_bytes(&engine, DIR).unwrap();
    assert_eq!(dir_page::entry_count(&dir).unwrap(), 0);
    assert_eq!(dir_page::max_offset(&dir).unwrap(), 0);

    engine.redo(&ClearLocation::new(HEAP).build(Lsn(300))).unwrap();
    let heap_page = page_bytes(&engine, HEAP).unwrap();
    assert_eq!(heap::back_reference(&heap_page).unwrap(), None);
}

#[test]
fn replaying_a_record_twice_is_a_no_op() {
    let engine = mem_engine();
    install(&engine, DIR, &empty_dir_page(DIR, Lsn(5)));
    install(&engine, HEAP, &support::blank_data_page(HEAP));
    let record = AllocateEntry::new(DIR, HEAP, OffsetNumber(1), b"abc")
        .build(Lsn(100))
        .unwrap();

    engine.redo(&record).unwrap();
    let dir_once = page_bytes(&engine, DIR).unwrap();
    let heap_once = page_bytes(&engine, HEAP).unwrap();

    let again = engine.redo(&record).unwrap();
    assert!(again
        .blocks
        .iter()
        .all(|outcome| outcome.action == RedoAction::Skip));
    assert_eq!(page_bytes(&engine, DIR).unwrap(), dir_once);
    assert_eq!(page_bytes(&engine, HEAP).unwrap(), heap_once);
}

#[test]
fn clearing_an_absent_back_reference_leaves_it_absent() {
    let engine = mem_engine();
    install(&engine, HEAP, &support::blank_data_page(HEAP));
    engine.redo(&ClearLocation::new(HEAP).build(Lsn(10))).unwrap();
    engine.redo(&ClearLocation::new(HEAP).build(Lsn(20))).unwrap();
    let heap_page = page_bytes(&engine, HEAP).unwrap();
    assert_eq!(heap::back_reference(&heap_page).unwrap(), None);
    assert_eq!(page::page_lsn(&heap_page), Lsn(20));
}

#[test]
fn reconstructed_pages_take_trailer_values_from_the_record() {
    let engine = mem_engine();
    // stale state: wrong prev link on the directory page, foreign back-reference on the heap page
    let mut stale_dir = empty_dir_page(DIR, Lsn(500));
    dir_page::set_prev(&mut stale_dir, Some(PageId(77))).unwrap();
    install(&engine, DIR, &stale_dir);
    let mut stale_heap = support::blank_data_page(HEAP);
    heap::set_back_reference(&mut stale_heap, SlotLocation::new(PageId(88), OffsetNumber(9)))
        .unwrap();
    install(&engine, HEAP, &stale_heap);

    // post-change images, trailers excluded
    let mut dir_after = empty_dir_page(DIR, Lsn(0));
    dir_page::add_entry(&mut dir_after, b"img", None).unwrap();
    let heap_after = support::blank_data_page(HEAP);

    let mut record = AllocateEntry::new(DIR, HEAP, OffsetNumber(1), b"img")
        .prev_link(Some(PageId(3)))
        .build(Lsn(100))
        .unwrap();
    record
        .attach_image(block::DIRECTORY, PageImage::capture(&dir_after).unwrap())
        .unwrap();
    record
        .attach_image(block::DATA, PageImage::capture(&heap_after).unwrap())
        .unwrap();

    let summary = engine.redo(&record).unwrap();
    assert_eq!(summary.action(block::DIRECTORY), Some(RedoAction::Reconstruct));
    assert_eq!(summary.action(block::DATA), Some(RedoAction::Reconstruct));

    let dir = page_bytes(&engine, DIR).unwrap();
    assert_eq!(dir_page::trailer(&dir).unwrap().prev, Some(PageId(3)));
    assert_eq!(dir_page::entry_count(&dir).unwrap(), 1);
    assert_eq!(page::page_lsn(&dir), Lsn(100));
    let heap_page = page_bytes(&engine, HEAP).unwrap();
    assert_eq!(
        heap::back_reference(&heap_page).unwrap(),
        Some(SlotLocation::new(DIR, OffsetNumber(1)))
    );
}

#[test]
fn reconstructed_previous_tail_gets_next_link() {
    let engine = mem_engine();
    let old_tail = PageId(3);
    let new_page = PageId(4);
    let mut stale_tail = empty_dir_page(old_tail, Lsn(900));
    dir_page::set_next(&mut stale_tail, Some(PageId(66))).unwrap();
    install(&engine, old_tail, &stale_tail);
    install(&engine, HEAP, &support::blank_data_page(HEAP));

    let tail_after = empty_dir_page(old_tail, Lsn(0));
    let mut record = AllocateEntry::new(new_page, HEAP, OffsetNumber(1), b"x")
        .init_page()
        .prev_link(Some(old_tail))
        .next_link(Some(new_page))
        .with_meta(META_PAGE, MetaState::new(Some(old_tail), Some(new_page)))
        .with_prev_tail(old_tail)
        .build(Lsn(1000))
        .unwrap();
    record
        .attach_image(block::PREV_TAIL, PageImage::capture(&tail_after).unwrap())
        .unwrap();

    let summary = engine.redo(&record).unwrap();
    assert_eq!(summary.action(block::PREV_TAIL), Some(RedoAction::Reconstruct));
    let tail = page_bytes(&engine, old_tail).unwrap();
    assert_eq!(dir_page::trailer(&tail).unwrap().next, Some(new_page));
    let anchors = meta::read(&page_bytes(&engine, META_PAGE).unwrap()).unwrap();
    assert_eq!(anchors, MetaState::new(Some(old_tail), Some(new_page)));
}

#[test]
fn init_page_discards_previous_contents() {
    let engine = mem_engine();
    let mut garbage = empty_dir_page(DIR, Lsn(5000));
    dir_page::add_entry(&mut garbage, b"old entry", None).unwrap();
    install(&engine, DIR, &garbage);
    install(&engine, HEAP, &support::blank_data_page(HEAP));

    let record = AllocateEntry::new(DIR, HEAP, OffsetNumber(1), b"new")
        .init_page()
        .build(Lsn(10))
        .unwrap();
    let summary = engine.redo(&record).unwrap();
    assert_eq!(summary.action(block::DIRECTORY), Some(RedoAction::ApplyDelta));
    let dir = page_bytes(&engine, DIR).unwrap();
    assert_eq!(dir_page::entries(&dir).unwrap(), vec![(OffsetNumber(1), &b"new"[..])]);
    assert_eq!(page::page_lsn(&dir), Lsn(10));
}

#[test]
fn blocks_of_one_record_decide_independently() {
    let engine = mem_engine();
    // directory page already carries the change, heap page does not
    let mut dir = empty_dir_page(DIR, Lsn(0));
    dir_page::add_entry(&mut dir, b"abc", None).unwrap();
    page::set_page_lsn(&mut dir, Lsn(100));
    install(&engine, DIR, &dir);
    install(&engine, HEAP, &support::blank_data_page(HEAP));

    let record = AllocateEntry::new(DIR, HEAP, OffsetNumber(1), b"abc")
        .build(Lsn(100))
        .unwrap();
    let summary = engine.redo(&record).unwrap();
    assert_eq!(summary.action(block::DIRECTORY), Some(RedoAction::Skip));
    assert_eq!(summary.action(block::DATA), Some(RedoAction::ApplyDelta));
    assert_eq!(page_bytes(&engine, DIR).unwrap(), dir);
}

#[test]
fn clean_with_image_restores_instead_of_pruning() {
    let engine = mem_engine();
    let mut before = empty_dir_page(DIR, Lsn(5));
    for entry in [&b"a"[..], b"b", b"c"] {
        dir_page::add_entry(&mut before, entry, None).unwrap();
    }
    install(&engine, DIR, &before);

    let mut after = before.clone();
    dir_page::prune(&mut after, &[OffsetNumber(2)]).unwrap();
    let mut record = Clean::new(DIR, &[OffsetNumber(2)]).build(Lsn(50)).unwrap();
    record
        .attach_image(0, PageImage::capture(&after).unwrap())
        .unwrap();

    let summary = engine.redo(&record).unwrap();
    assert_eq!(summary.action(0), Some(RedoAction::Reconstruct));
    let dir = page_bytes(&engine, DIR).unwrap();
    page::set_page_lsn(&mut after, Lsn(50));
    assert_eq!(dir, after);
}

#[test]
fn forward_history_replays_byte_identically() {
    let heaps = [PageId(10), PageId(11), PageId(12)];
    let mut forward = Forward::new(&heaps, 1);
    let a = forward.allocate(heaps[0], b"slot-a");
    forward.allocate(heaps[1], b"slot-b");
    forward.allocate(heaps[2], b"slot-c");
    forward.clean(a.page, &[a.offset]);
    forward.clear(heaps[0]);
    forward.allocate(heaps[0], b"slot-d");

    let engine = mem_engine();
    forward.seed_data_pages(&engine, &heaps);
    for record in &forward.log {
        engine.redo(record).unwrap();
    }
    forward.assert_matches(&engine);
}

#[test]
fn fatal_errors_leave_later_records_unapplied() {
    let engine = mem_engine();
    install(&engine, DIR, &empty_dir_page(DIR, Lsn(5)));
    let bad = Clean::new(DIR, &[OffsetNumber(4)]).build(Lsn(10)).unwrap();
    let err = engine.redo(&bad).unwrap_err();
    assert_eq!(
        err.as_fatal(),
        Some(&FatalError::PruneMissingOffset {
            page: DIR,
            offset: OffsetNumber(4)
        })
    );
    // the failed record did not stamp the page
    assert_eq!(page::page_lsn(&page_bytes(&engine, DIR).unwrap()), Lsn(5));
}
