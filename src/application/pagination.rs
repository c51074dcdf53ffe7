//! Page-number pagination shared by every post listing.
//!
//! Requested page numbers follow a forgiving policy: a missing or malformed
//! `?page=` value resolves to the first page, and a number outside the valid
//! range resolves to the last page. An empty listing still has one (empty)
//! page so templates never need to special-case it.

use serde::Serialize;

use crate::domain::posts::POSTS_PER_PAGE;

/// Slices ordered collections into fixed-size pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    per_page: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(POSTS_PER_PAGE)
    }
}

impl Paginator {
    /// A page size of zero is treated as one.
    pub const fn new(per_page: usize) -> Self {
        let per_page = if per_page == 0 { 1 } else { per_page };
        Self { per_page }
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// Number of pages needed for `count` items (never less than one).
    pub fn num_pages(&self, count: usize) -> usize {
        if count == 0 {
            1
        } else {
            count.div_ceil(self.per_page)
        }
    }

    /// Resolve the raw `?page=` query value against a collection of `count` items.
    pub fn get_page(&self, count: usize, requested: Option<&str>) -> PageWindow {
        let num_pages = self.num_pages(count);
        let number = match requested.map(str::trim) {
            None => 1,
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) if value < 1 => num_pages,
                Ok(value) => usize::try_from(value)
                    .ok()
                    .filter(|number| *number <= num_pages)
                    .unwrap_or(num_pages),
                Err(_) if is_integer_literal(raw) => num_pages,
                Err(_) => 1,
            },
        };

        PageWindow {
            number,
            num_pages,
            count,
            per_page: self.per_page,
        }
    }

    /// Paginate an in-memory, already ordered sequence.
    pub fn paginate<T>(&self, items: Vec<T>, requested: Option<&str>) -> Page<T> {
        let window = self.get_page(items.len(), requested);
        let request = window.request();
        let object_list = items
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        Page::new(window, object_list)
    }
}

/// An optionally signed run of digits, i.e. a number too wide for `i64`
/// when parsing it failed.
fn is_integer_literal(raw: &str) -> bool {
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit())
}

/// Position of one page inside a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub per_page: usize,
}

impl PageWindow {
    /// Offset/limit pair for fetching this page from a store.
    pub fn request(&self) -> PageRequest {
        let offset = (self.number - 1).saturating_mul(self.per_page);
        let limit = self.per_page.min(self.count.saturating_sub(offset));
        PageRequest { offset, limit }
    }
}

/// Offset-based slice handed to repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// One page of results plus the metadata templates need for navigation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub object_list: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub count: usize,
    pub per_page: usize,
}

impl<T> Page<T> {
    pub fn new(window: PageWindow, object_list: Vec<T>) -> Self {
        Self {
            object_list,
            number: window.number,
            num_pages: window.num_pages,
            count: window.count,
            per_page: window.per_page,
        }
    }

    pub fn len(&self) -> usize {
        self.object_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_list.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.object_list.iter()
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_other_pages(&self) -> bool {
        self.has_next() || self.has_previous()
    }

    pub fn next_page_number(&self) -> Option<usize> {
        self.has_next().then(|| self.number + 1)
    }

    pub fn previous_page_number(&self) -> Option<usize> {
        self.has_previous().then(|| self.number - 1)
    }

    /// 1-based index of the first item on this page, zero for an empty listing.
    pub fn start_index(&self) -> usize {
        if self.count == 0 {
            0
        } else {
            (self.number - 1) * self.per_page + 1
        }
    }

    /// 1-based index of the last item on this page.
    pub fn end_index(&self) -> usize {
        if self.number == self.num_pages {
            self.count
        } else {
            self.number * self.per_page
        }
    }

    pub fn page_range(&self) -> Vec<usize> {
        (1..=self.num_pages).collect()
    }

    /// Numbered navigation links, the current page flagged.
    pub fn page_links(&self) -> Vec<PageLink> {
        self.page_range()
            .into_iter()
            .map(|number| PageLink {
                number,
                current: number == self.number,
            })
            .collect()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            object_list: self.object_list.into_iter().map(f).collect(),
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageLink {
    pub number: usize,
    pub current: bool,
}

impl<'a, T> IntoIterator for &'a Page<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.object_list.iter()
    }
}
