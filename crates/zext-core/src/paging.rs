//! Fixed-size paging over a list of report lines

/// Default number of entries shown per page of a conflict report
pub const DEFAULT_PAGE_SIZE: usize = 4;

/// An ordered list split into pages of a fixed size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedList<T> {
    items: Vec<T>,
    page_size: usize,
}

impl<T> PagedList<T> {
    /// Wrap `items`. A page size of zero is treated as one.
    pub fn new(items: Vec<T>, page_size: usize) -> Self {
        Self {
            items,
            page_size: page_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.items.len().div_ceil(self.page_size)
    }

    /// Zero-based page lookup
    pub fn page(&self, index: usize) -> Option<&[T]> {
        if index >= self.page_count() {
            return None;
        }
        let start = index * self.page_size;
        let end = (start + self.page_size).min(self.items.len());
        Some(&self.items[start..end])
    }

    pub fn pages(&self) -> std::slice::Chunks<'_, T> {
        self.items.chunks(self.page_size)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}
