//! Cursor pagination inputs shared by the list reads.

use crate::config::PagingConfig;
use serde::Deserialize;

impl PagingConfig {
    /// Clamps a requested page size into the configured bounds. Absent or
    /// zero falls back to the default.
    pub fn normalize(&self, requested: Option<i64>) -> i64 {
        match requested {
            None | Some(0) => self.default_page_size,
            Some(size) => size.clamp(self.min_page_size, self.max_page_size),
        }
    }
}

/// Newest-first page keyed by row id: `last` items strictly before `before`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub last: Option<i64>,
    #[serde(default)]
    pub before: Option<i64>,
}

impl FeedPage {
    pub fn new(last: Option<i64>, before: Option<i64>) -> Self {
        Self { last, before }
    }
}

/// Alphabetical page keyed by username: `first` users strictly after `after`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub first: Option<i64>,
    #[serde(default)]
    pub after: Option<String>,
}

impl ListingPage {
    pub fn new(first: Option<i64>, after: Option<&str>) -> Self {
        Self {
            first,
            after: after.map(str::to_string),
        }
    }

    /// Trimmed cursor; blank counts as absent.
    pub fn cursor(&self) -> String {
        self.after.as_deref().unwrap_or_default().trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_sizes_clamp_into_bounds() {
        let paging = PagingConfig::default();
        assert_eq!(paging.normalize(None), 10);
        assert_eq!(paging.normalize(Some(0)), 10);
        assert_eq!(paging.normalize(Some(-4)), 1);
        assert_eq!(paging.normalize(Some(25)), 25);
        assert_eq!(paging.normalize(Some(500)), 99);
    }

    #[test]
    fn blank_cursor_is_empty() {
        assert_eq!(ListingPage::new(None, Some("  ")).cursor(), "");
        assert_eq!(ListingPage::new(None, Some(" bob ")).cursor(), "bob");
    }
}
