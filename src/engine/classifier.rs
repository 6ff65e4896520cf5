use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, Entity, ItemDirectory};

/// Where a booking's window sits relative to `now`.
///
/// Both comparisons are strict, so a booking that starts or ends exactly at
/// `now` has no phase at that instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePhase {
    Past,
    Current,
    Future,
}

impl TimePhase {
    pub fn of(span: &Span, now: Ms) -> Option<Self> {
        if span.end < now {
            Some(TimePhase::Past)
        } else if span.start > now {
            Some(TimePhase::Future)
        } else if span.start < now && span.end > now {
            Some(TimePhase::Current)
        } else {
            None
        }
    }
}

/// Listing filter. Time categories ignore status; `Waiting` and `Rejected`
/// ignore time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Category {
    #[default]
    All,
    Current,
    Past,
    Future,
    Waiting,
    Rejected,
}

impl Category {
    pub const EVERY: [Category; 6] = [
        Category::All,
        Category::Current,
        Category::Past,
        Category::Future,
        Category::Waiting,
        Category::Rejected,
    ];

    pub fn matches(self, booking: &Booking, now: Ms) -> bool {
        let phase = TimePhase::of(&booking.span, now);
        match self {
            Category::All => true,
            Category::Current => phase == Some(TimePhase::Current),
            Category::Past => phase == Some(TimePhase::Past),
            Category::Future => phase == Some(TimePhase::Future),
            Category::Waiting => booking.status == BookingStatus::Waiting,
            Category::Rejected => booking.status == BookingStatus::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::All => "ALL",
            Category::Current => "CURRENT",
            Category::Past => "PAST",
            Category::Future => "FUTURE",
            Category::Waiting => "WAITING",
            Category::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state string that names no category. Reported to clients as `Unknown state: <text>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown state: {}", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::EVERY
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Window over an ordered listing. `from` counts rows but is rounded down to a
/// multiple of `size`, so every window starts on a page boundary: `from = 3,
/// size = 2` yields rows 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub from: usize,
    pub size: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            from: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.size == 0 {
            return Err(EngineError::validation("page size must be positive"));
        }
        if self.size > MAX_PAGE_SIZE {
            return Err(EngineError::validation(format!(
                "page size must not exceed {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    /// First row of the window, `from` rounded down to a page boundary.
    pub fn offset(&self) -> usize {
        (self.from / self.size.max(1)) * self.size
    }
}

/// Newest start first; equal starts fall back to id, newest first.
pub(super) fn sort_newest_first(bookings: &mut [Booking]) {
    bookings.sort_by_key(|b| Reverse((b.span.start, b.id)));
}

impl Engine {
    /// The caller's own bookings in `category`, newest first. An unknown
    /// booker simply has none.
    pub async fn list_booker_bookings(
        &self,
        booker: UserId,
        category: Category,
        page: Page,
    ) -> Result<Vec<BookingView>, EngineError> {
        page.validate()?;
        let ids = self.bookings.ids_of_booker(&booker);
        Ok(self.classify(&ids, category, Some(page)).await)
    }

    /// Bookings on any item the caller owns, newest first. Owning no items at
    /// all is `NotFound`; owning items with no matching bookings is empty.
    pub async fn list_owner_bookings(
        &self,
        owner: UserId,
        category: Category,
    ) -> Result<Vec<BookingView>, EngineError> {
        let items = self.directory.items_of_owner(&owner);
        if items.is_empty() {
            return Err(EngineError::NotFound(Entity::Item, owner.0));
        }
        let ids: Vec<BookingId> = items
            .iter()
            .flat_map(|item| self.bookings.ids_on_item(item))
            .collect();
        Ok(self.classify(&ids, category, None).await)
    }

    async fn classify(&self, ids: &[BookingId], category: Category, page: Option<Page>) -> Vec<BookingView> {
        let now = self.now_ms();
        let mut bookings = self.bookings.read_all(ids).await;
        bookings.retain(|b| category.matches(b, now) && self.directory.find_item(&b.item).is_some());
        sort_newest_first(&mut bookings);

        let (offset, size) = page.map_or((0, usize::MAX), |p| (p.offset(), p.size));
        bookings
            .iter()
            .skip(offset)
            .take(size)
            .filter_map(|b| {
                let item = self.directory.find_item(&b.item)?;
                Some(BookingView::new(b, item.name))
            })
            .collect()
    }
}
