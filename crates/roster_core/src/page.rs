//! Page requests, pages and slices.
//!
//! # Invariants
//! - Page numbers are zero-based; `size` is always positive.
//! - `Page::total_pages` is `ceil(total_elements / size)`.

use crate::query::sort::Sort;
use crate::repo::{RepoError, RepoResult};
use serde::{Deserialize, Serialize};

/// Which window of results to load, and in what order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u64,
    size: u64,
    sort: Sort,
}

impl PageRequest {
    /// Unsorted request for page `page` of `size` rows.
    pub fn of(page: u64, size: u64) -> RepoResult<Self> {
        Self::sorted(page, size, Sort::unsorted())
    }

    /// Fails with `InvalidArgument` for a zero size, or when the page ends
    /// beyond the row range SQLite can address.
    pub fn sorted(page: u64, size: u64, sort: Sort) -> RepoResult<Self> {
        if size == 0 {
            return Err(RepoError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }
        // A slice reads one row past the end of its page.
        let end = page
            .checked_add(1)
            .and_then(|pages| pages.checked_mul(size))
            .and_then(|rows| rows.checked_add(1));
        if !end.is_some_and(|end| end <= MAX_ROWS) {
            return Err(out_of_range(page, size));
        }
        Ok(Self { page, size, sort })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }

    /// The following page. Paging past the addressable range fails once the
    /// request is executed.
    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn previous_or_first(&self) -> Self {
        Self {
            page: self.page.saturating_sub(1),
            ..self.clone()
        }
    }

    /// `LIMIT` and `OFFSET` values for reading `limit` rows from the start
    /// of this page.
    pub(crate) fn sql_bounds(&self, limit: u64) -> RepoResult<(i64, i64)> {
        let offset = self
            .page
            .checked_mul(self.size)
            .and_then(|offset| i64::try_from(offset).ok())
            .ok_or_else(|| out_of_range(self.page, self.size))?;
        let limit = i64::try_from(limit).map_err(|_| out_of_range(self.page, self.size))?;
        Ok((limit, offset))
    }
}

/// SQLite binds `LIMIT` and `OFFSET` as signed 64-bit integers.
const MAX_ROWS: u64 = i64::MAX as u64;

fn out_of_range(page: u64, size: u64) -> RepoError {
    RepoError::InvalidArgument(format!("page {page} of size {size} is out of range"))
}

/// Total element count implied by the page content alone, if any.
///
/// A page holding fewer rows than requested is the last one, unless it is an
/// empty page past the first (the total is unknown then).
pub(crate) fn known_total(request: &PageRequest, content_len: usize) -> Option<u64> {
    let len = content_len as u64;
    if len >= request.size() {
        return None;
    }
    if request.offset() == 0 || len > 0 {
        return Some(request.offset().saturating_add(len));
    }
    None
}

/// One page of results with the total count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: u64,
    size: u64,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.page(),
            size: request.size(),
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    /// Zero-based page number.
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(self.size)
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_next(&self) -> bool {
        self.number.saturating_add(1) < self.total_pages()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    /// Maps the content, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }
}

/// One window of results without a total count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice<T> {
    content: Vec<T>,
    number: u64,
    size: u64,
    has_next: bool,
}

impl<T> Slice<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, has_next: bool) -> Self {
        Self {
            content,
            number: request.page(),
            size: request.size(),
            has_next,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            has_next: self.has_next,
        }
    }
}
