use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single booking may not span more than a year.
pub const MAX_BOOKING_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 512;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_COMMENT_LEN: usize = 4096;
pub const MAX_SEARCH_TEXT_LEN: usize = 255;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 1000;

pub const MAX_USERS: usize = 1_000_000;
pub const MAX_ITEMS_PER_OWNER: usize = 10_000;
pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;
pub const MAX_REQUESTS_PER_USER: usize = 10_000;
