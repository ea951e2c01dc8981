//! Page-number pagination over a counted result set.
//!
//! Out-of-range and malformed page numbers never fail: anything that is not
//! a positive integer lands on the first page and numbers past the end land
//! on the last one, so stale `?page=` links keep working.

pub const PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub number: i64,
    pub num_pages: i64,
    pub total: i64,
    pub per_page: i64,
}

impl PageInfo {
    /// Resolves the raw `page` query value against `total` items.
    pub fn resolve(raw: Option<&str>, total: i64, per_page: i64) -> Self {
        let per_page = per_page.max(1);
        let num_pages = if total <= 0 { 1 } else { (total + per_page - 1) / per_page };
        let number = match raw.and_then(|r| r.trim().parse::<i64>().ok()) {
            Some(n) if n >= 1 => n.min(num_pages),
            Some(_) => num_pages, // zero and negatives: last page
            None => 1,
        };
        Self { number, num_pages, total: total.max(0), per_page }
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }
}

/// One page of items plus the numbers needed to render navigation.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub info: PageInfo,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_garbage_is_first_page() {
        assert_eq!(PageInfo::resolve(None, 35, 10).number, 1);
        assert_eq!(PageInfo::resolve(Some("abc"), 35, 10).number, 1);
        assert_eq!(PageInfo::resolve(Some(""), 35, 10).number, 1);
    }

    #[test]
    fn past_the_end_is_last_page() {
        let p = PageInfo::resolve(Some("99"), 35, 10);
        assert_eq!(p.num_pages, 4);
        assert_eq!(p.number, 4);
        assert_eq!(p.offset(), 30);
        assert!(p.has_previous());
        assert!(!p.has_next());
        assert_eq!(PageInfo::resolve(Some("0"), 35, 10).number, 4);
    }

    #[test]
    fn empty_set_has_one_page() {
        let p = PageInfo::resolve(Some("3"), 0, 10);
        assert_eq!(p.num_pages, 1);
        assert_eq!(p.number, 1);
        assert_eq!(p.offset(), 0);
        assert!(!p.has_next());
    }

    #[test]
    fn exact_multiple() {
        let p = PageInfo::resolve(Some("2"), 20, 10);
        assert_eq!(p.num_pages, 2);
        assert_eq!(p.offset(), 10);
        assert!(!p.has_next());
    }
}
