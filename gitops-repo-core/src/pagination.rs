//! Page slicing and branch ordering helpers

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Default page size
pub const DEFAULT_LIMIT: i64 = 20;

/// Pagination options, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListOptions {
    pub page: i64,
    pub limit: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ListOptions {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }

    /// Reset non-positive values to their defaults
    pub fn correct(&mut self) {
        if self.page <= 0 {
            self.page = 1;
        }
        if self.limit <= 0 {
            self.limit = DEFAULT_LIMIT;
        }
    }

    /// Corrected copy
    pub fn corrected(mut self) -> Self {
        self.correct();
        self
    }
}

/// One page of results plus the total before slicing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: usize,
}

impl<T> Page<T> {
    /// Slice `items` according to `options` (corrected first)
    pub fn from_vec(items: Vec<T>, options: ListOptions) -> Self {
        let options = options.corrected();
        let total_items = items.len();
        let per_page = options.limit as usize;
        let start = (options.page as usize - 1).saturating_mul(per_page);

        let items = if start >= total_items {
            Vec::new()
        } else {
            items.into_iter().skip(start).take(per_page).collect()
        };

        Self { items, total_items }
    }
}

/// Borrowing variant of [`Page::from_vec`]
pub fn get_page<T: Clone>(items: &[T], page: i64, per_page: i64) -> (Vec<T>, usize) {
    let options = ListOptions::new(page, per_page).corrected();
    let start = (options.page as usize - 1).saturating_mul(options.limit as usize);
    if start >= items.len() {
        return (Vec::new(), items.len());
    }
    let end = (start + options.limit as usize).min(items.len());
    (items[start..end].to_vec(), items.len())
}

/// Whether a branch name is one of the conventional default branches
pub fn is_default_branch(name: &str) -> bool {
    name.eq_ignore_ascii_case("main") || name.eq_ignore_ascii_case("master")
}

/// Ordering that puts default branches first, then sorts alphabetically
pub fn compare_branch_names(a: &str, b: &str) -> Ordering {
    match (is_default_branch(a), is_default_branch(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

/// Sort branch names in place with [`compare_branch_names`]
pub fn sort_branch_names<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| compare_branch_names(a.as_ref(), b.as_ref()));
}
