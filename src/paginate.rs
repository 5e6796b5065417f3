//! Page arithmetic for list views.

use crate::error::AppError;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: u32,
    pub num_pages: u32,
    pub count: u64,
    pub per_page: u32,
    pub has_next: bool,
    pub has_previous: bool,
    /// 1-based index of the first item on the page; 0 for an empty page.
    pub start_index: u64,
    pub end_index: u64,
}

impl Page {
    pub fn offset(&self) -> u32 {
        (self.number - 1) * self.per_page
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Paginator {
    count: u64,
    per_page: u32,
}

impl Paginator {
    pub fn new(count: u64, per_page: u32) -> Self {
        Paginator {
            count,
            per_page: per_page.max(1),
        }
    }

    /// An empty list still has one (empty) page.
    pub fn num_pages(&self) -> u32 {
        let pages = self.count.div_ceil(self.per_page as u64);
        pages.max(1) as u32
    }

    /// Page from the `page` parameter: a number, `last`, or absent for the first page.
    pub fn page(&self, raw: Option<&str>) -> Result<Page, AppError> {
        let num_pages = self.num_pages();
        let number = match raw.map(str::trim) {
            None | Some("") => 1,
            Some("last") => num_pages,
            Some(s) => s
                .parse::<u32>()
                .map_err(|_| AppError::NotFound(format!("invalid page '{}'", s)))?,
        };
        if number == 0 || number > num_pages {
            return Err(AppError::NotFound(format!("page {} out of range", number)));
        }
        let per_page = self.per_page as u64;
        let start = (number as u64 - 1) * per_page;
        let end = (start + per_page).min(self.count);
        Ok(Page {
            number,
            num_pages,
            count: self.count,
            per_page: self.per_page,
            has_next: number < num_pages,
            has_previous: number > 1,
            start_index: if self.count == 0 { 0 } else { start + 1 },
            end_index: end,
        })
    }
}
