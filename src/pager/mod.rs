//! # Pager
//!
//! A fixed-size page cache over a single on-disk file. Every page is exactly
//! [`PAGE_SIZE`] bytes; the file is always a whole multiple of that size
//! while closed cleanly. There is no free list: page numbers only ever go
//! up (§4.1, §9 "Append-only page allocator").
//!
//! Pages are held in a fixed-capacity array of optional buffers, indexed by
//! page number, up to [`TABLE_MAX_PAGES`]. A `None` slot means "not
//! resident" — [`Pager::get_page`] loads it from disk (or zero-fills it, if
//! it lies beyond the current end of the file) the first time it is asked
//! for. Writes only become durable when the caller explicitly
//! [`Pager::flush`]es a page or [`Pager::close`]s the pager.
//!
//! Out-of-range page numbers, a file whose length isn't a page multiple, and
//! flushing a non-resident page are all programmer errors per the design
//! (§7): they indicate a broken invariant the store cannot recover from, so
//! they panic rather than returning a [`Result`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, trace};

use crate::error::Result;

/// Size in bytes of every page, including page 0 (the catalog header).
pub const PAGE_SIZE: usize = 4096;

/// Hard ceiling on the number of pages a single database file may have.
pub const TABLE_MAX_PAGES: usize = 400;

/// A page number. Page 0 is always the catalog header.
pub type PageId = u32;

/// Sentinel meaning "no page" (e.g. an empty internal node's `right_child`,
/// or the catalog header's schema blob pointer before any schema is saved).
pub const INVALID_PAGE_NUM: PageId = u32::MAX;

/// A single in-memory page buffer.
pub type Page = [u8; PAGE_SIZE];

/// The fixed-size page cache described above.
pub struct Pager {
    file: File,
    file_length: u64,
    num_pages: u32,
    pages: Vec<Option<Box<Page>>>,
}

impl Pager {
    /// Open (creating if absent) the database file at `path`.
    ///
    /// Fails hard if the existing file's length is not a whole multiple of
    /// [`PAGE_SIZE`] — a truncated or foreign file is a corruption, not a
    /// recoverable condition.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Pager> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;

        let file_length = file.metadata()?.len();
        if file_length % PAGE_SIZE as u64 != 0 {
            panic!(
                "db file is not a whole number of pages: {} bytes is not a multiple of {}",
                file_length, PAGE_SIZE
            );
        }
        let num_pages = (file_length / PAGE_SIZE as u64) as u32;
        debug!(
            "opened pager at {:?}: {} bytes, {} pages",
            path.as_ref(),
            file_length,
            num_pages
        );

        let mut pages = Vec::with_capacity(TABLE_MAX_PAGES);
        pages.resize_with(TABLE_MAX_PAGES, || None);

        Ok(Pager {
            file,
            file_length,
            num_pages,
            pages,
        })
    }

    /// The current logical page count (may exceed what has actually been
    /// flushed to disk).
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Return a mutable reference to page `n`, loading it from disk (or
    /// zero-filling it, if it lies past the current end of the file) on
    /// first access. Extends the logical page count if `n` is beyond it.
    ///
    /// Panics if `n` exceeds [`TABLE_MAX_PAGES`].
    pub fn get_page(&mut self, n: PageId) -> Result<&mut Page> {
        let idx = n as usize;
        if idx >= TABLE_MAX_PAGES {
            panic!(
                "page number out of bounds: {} (max {})",
                n, TABLE_MAX_PAGES
            );
        }

        if self.pages[idx].is_none() {
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            let page_start = n as u64 * PAGE_SIZE as u64;
            if page_start < self.file_length {
                // Read whatever bytes actually exist; anything past the end
                // of the file stays zeroed (never a partial-read failure).
                self.file.seek(SeekFrom::Start(page_start))?;
                let available = (self.file_length - page_start).min(PAGE_SIZE as u64) as usize;
                self.file.read_exact(&mut buf[..available])?;
                trace!("paged in page {n} from disk ({available} bytes)");
            } else {
                trace!("paged in page {n} as a fresh zero page");
            }
            self.pages[idx] = Some(buf);
        }

        if n >= self.num_pages {
            self.num_pages = n + 1;
        }

        Ok(self.pages[idx].as_mut().unwrap().as_mut())
    }

    /// Persist page `n`'s in-memory buffer to disk at its page-aligned
    /// offset.
    ///
    /// Panics if the page is not currently resident — flushing a page that
    /// was never faulted in is a caller bug.
    pub fn flush(&mut self, n: PageId) -> Result<()> {
        let idx = n as usize;
        let buf = self.pages[idx]
            .as_ref()
            .unwrap_or_else(|| panic!("flush of non-resident page {n}"));

        let offset = n as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf.as_ref())?;
        if offset + PAGE_SIZE as u64 > self.file_length {
            self.file_length = offset + PAGE_SIZE as u64;
        }
        trace!("flushed page {n}");
        Ok(())
    }

    /// The next page number that would be allocated by appending — i.e. the
    /// current page count. There is no free list, so this always grows.
    pub fn unused_page_num(&self) -> PageId {
        self.num_pages
    }

    /// Flush every resident page and close the underlying file.
    pub fn close(mut self) -> Result<()> {
        for n in 0..self.num_pages {
            if self.pages[n as usize].is_some() {
                self.flush(n)?;
            }
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Force the OS to persist all flushed writes (does not flush dirty
    /// in-memory pages that were never explicitly flushed).
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
