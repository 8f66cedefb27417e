#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use slotdir::primitives::io::{FileIo, MemFileIo};
use slotdir::storage::{dir_page, heap, meta, MetaState, SlotLocation};
use slotdir::types::page;
use slotdir::wal::{AllocateEntry, Clean, ClearLocation, PageImage, RedoRecord};
use slotdir::{Lsn, OffsetNumber, PageId, RedoEngine, RedoOptions};

pub const PAGE_SIZE: u32 = 512;
pub const META_PAGE: PageId = PageId(0);
/// LSN stamped on data pages before any log record.
pub const BASE_LSN: Lsn = Lsn(1);

pub fn options() -> RedoOptions {
    RedoOptions::default().page_size(PAGE_SIZE).meta_page(META_PAGE)
}

pub fn engine_over(io: Arc<dyn FileIo>) -> RedoEngine {
    RedoEngine::open(io, options()).expect("engine")
}

pub fn mem_engine() -> RedoEngine {
    engine_over(Arc::new(MemFileIo::new()))
}

pub fn blank_data_page(id: PageId) -> Vec<u8> {
    let mut page = vec![0u8; PAGE_SIZE as usize];
    heap::init_data_page(&mut page, id).expect("init data page");
    page::set_page_lsn(&mut page, BASE_LSN);
    page
}

/// Installs raw page bytes into the engine's cache.
pub fn install(engine: &RedoEngine, id: PageId, bytes: &[u8]) {
    let mut page = engine.cache().lock_zeroed(id).expect("lock");
    page.data_mut().copy_from_slice(bytes);
    page.mark_dirty();
}

pub fn page_bytes(engine: &RedoEngine, id: PageId) -> Option<Vec<u8>> {
    engine
        .cache()
        .read(id)
        .expect("read")
        .map(|page| page.data().to_vec())
}

/// Forward-path stand-in: mutates pages the way the live system would and
/// emits the records it would have logged.
pub struct Forward {
    pub pages: BTreeMap<PageId, Vec<u8>>,
    pub meta: MetaState,
    pub log: Vec<RedoRecord>,
    next_page: u64,
    lsn: u64,
    images: bool,
}

impl Forward {
    pub fn new(data_pages: &[PageId], first_dir_page: u64) -> Self {
        let mut pages = BTreeMap::new();
        for &id in data_pages {
            pages.insert(id, blank_data_page(id));
        }
        Self {
            pages,
            meta: MetaState::default(),
            log: Vec::new(),
            next_page: first_dir_page,
            lsn: 10,
            images: false,
        }
    }

    /// Attach a full-page image of every touched directory page from now on.
    pub fn with_images(mut self, images: bool) -> Self {
        self.images = images;
        self
    }

    fn next_lsn(&mut self) -> Lsn {
        self.lsn += 10;
        Lsn(self.lsn)
    }

    fn stamp(&mut self, id: PageId, lsn: Lsn) {
        let page = self.pages.get_mut(&id).expect("page");
        page::set_page_lsn(page, lsn);
    }

    pub fn page(&self, id: PageId) -> &[u8] {
        &self.pages[&id]
    }

    pub fn allocate(&mut self, data_page: PageId, entry: &[u8]) -> SlotLocation {
        let lsn = self.next_lsn();
        if let Some(tail) = self.meta.last_used {
            let page = self.pages.get_mut(&tail).expect("tail page");
            if let Some(offset) = dir_page::add_entry(page, entry, None).expect("add") {
                let prev = dir_page::trailer(page).expect("trailer").prev;
                self.stamp(tail, lsn);
                let location = SlotLocation::new(tail, offset);
                self.link_data_page(data_page, location, lsn);
                let mut record = AllocateEntry::new(tail, data_page, offset, entry)
                    .prev_link(prev)
                    .build(lsn)
                    .expect("record");
                self.maybe_image(&mut record, 0, tail);
                self.log.push(record);
                return location;
            }
        }

        let new_page = PageId(self.next_page);
        self.next_page += 1;
        let old_tail = self.meta.last_used;
        let mut page = vec![0u8; PAGE_SIZE as usize];
        dir_page::init(&mut page, new_page).expect("init");
        let offset = dir_page::add_entry(&mut page, entry, None)
            .expect("add")
            .expect("entry fits on an empty page");
        dir_page::set_prev(&mut page, old_tail).expect("prev");
        self.pages.insert(new_page, page);
        self.stamp(new_page, lsn);
        if let Some(old) = old_tail {
            let tail = self.pages.get_mut(&old).expect("old tail");
            dir_page::set_next(tail, Some(new_page)).expect("next");
            self.stamp(old, lsn);
        }
        self.meta = MetaState::new(self.meta.first_used.or(Some(new_page)), Some(new_page));
        let mut meta_bytes = vec![0u8; PAGE_SIZE as usize];
        meta::init(&mut meta_bytes, META_PAGE, self.meta).expect("meta");
        self.pages.insert(META_PAGE, meta_bytes);
        self.stamp(META_PAGE, lsn);

        let location = SlotLocation::new(new_page, offset);
        self.link_data_page(data_page, location, lsn);

        let mut builder = AllocateEntry::new(new_page, data_page, offset, entry)
            .init_page()
            .prev_link(old_tail)
            .next_link(Some(new_page))
            .with_meta(META_PAGE, self.meta);
        if let Some(old) = old_tail {
            builder = builder.with_prev_tail(old);
        }
        self.log.push(builder.build(lsn).expect("record"));
        location
    }

    fn link_data_page(&mut self, data_page: PageId, location: SlotLocation, lsn: Lsn) {
        let page = self.pages.get_mut(&data_page).expect("data page");
        heap::set_back_reference(page, location).expect("back reference");
        self.stamp(data_page, lsn);
    }

    pub fn clean(&mut self, dir: PageId, unused: &[OffsetNumber]) {
        let lsn = self.next_lsn();
        let page = self.pages.get_mut(&dir).expect("dir page");
        dir_page::prune(page, unused).expect("prune");
        self.stamp(dir, lsn);
        let mut record = Clean::new(dir, unused).build(lsn).expect("record");
        self.maybe_image(&mut record, 0, dir);
        self.log.push(record);
    }

    pub fn clear(&mut self, data_page: PageId) {
        let lsn = self.next_lsn();
        let page = self.pages.get_mut(&data_page).expect("data page");
        heap::clear_back_reference(page).expect("clear");
        self.stamp(data_page, lsn);
        self.log.push(ClearLocation::new(data_page).build(lsn));
    }

    fn maybe_image(&self, record: &mut RedoRecord, block: u8, id: PageId) {
        if self.images {
            let image = PageImage::capture(self.page(id)).expect("capture");
            record.attach_image(block, image).expect("attach");
        }
    }

    /// Installs the data pages as they were before the first record.
    pub fn seed_data_pages(&self, engine: &RedoEngine, data_pages: &[PageId]) {
        for &id in data_pages {
            install(engine, id, &blank_data_page(id));
        }
    }

    /// Asserts every page the forward path touched matches the engine byte for byte.
    pub fn assert_matches(&self, engine: &RedoEngine) {
        for (id, expected) in &self.pages {
            let actual = page_bytes(engine, *id).unwrap_or_else(|| panic!("page {id} missing"));
            assert_eq!(&actual, expected, "page {id} diverged");
        }
    }
}
