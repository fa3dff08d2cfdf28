use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const MSG_INVALID_PAGE: &str = "Invalid page.";

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// 1-based page number, or `last`.
    pub page: Option<String>,
}

/// One page of a listing, with links to its neighbours.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: usize,
    pub last: usize,
    pub size: usize,
}

impl PageWindow {
    /// Picks the requested page out of `count` items. An empty listing still
    /// has a first page.
    pub fn resolve(requested: Option<&str>, count: usize, size: usize) -> Result<Self, AppError> {
        let size = size.max(1);
        let last = count.div_ceil(size).max(1);

        let number = match requested.map(str::trim) {
            None => 1,
            Some("last") => last,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| invalid_page())?,
        };
        if number == 0 || number > last {
            return Err(invalid_page());
        }

        Ok(Self { number, last, size })
    }

    pub fn offset(&self) -> usize {
        (self.number - 1) * self.size
    }

    pub fn limit(&self) -> usize {
        self.size
    }

    pub fn into_page<T>(self, path: &str, count: usize, results: Vec<T>) -> Page<T> {
        Page {
            count,
            next: (self.number < self.last).then(|| page_link(path, self.number + 1)),
            previous: (self.number > 1).then(|| page_link(path, self.number - 1)),
            results,
        }
    }
}

/// The first page links to the bare path.
fn page_link(path: &str, number: usize) -> String {
    if number == 1 {
        path.to_string()
    } else {
        format!("{}?page={}", path, number)
    }
}

fn invalid_page() -> AppError {
    AppError::NotFound(MSG_INVALID_PAGE.to_string())
}
