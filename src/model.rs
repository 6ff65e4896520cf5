use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            pub fn generate() -> Self {
                Self(Ulid::new())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s.trim()).map(Self)
            }
        }
    };
}

ulid_id!(
    /// The acting identity on every request, and the key of the user directory.
    UserId
);
ulid_id!(ItemId);
ulid_id!(BookingId);
ulid_id!(CommentId);
ulid_id!(
    /// A user's ask for an item nobody lists yet.
    RequestId
);

/// Booking window. Always `start < end` once constructed through [`Span::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
}

impl BookingStatus {
    /// Status an owner's decision moves a waiting booking into.
    pub fn from_decision(approve: bool) -> Self {
        if approve {
            BookingStatus::Approved
        } else {
            BookingStatus::Rejected
        }
    }

    pub fn is_decidable(self) -> bool {
        matches!(self, BookingStatus::Waiting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub owner: UserId,
    pub name: String,
    pub description: String,
    pub available: bool,
    /// The request this item was listed in answer to, if any.
    pub request: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    pub id: RequestId,
    pub requester: UserId,
    pub description: String,
    pub created: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub item: ItemId,
    pub booker: UserId,
    pub span: Span,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub item: ItemId,
    pub author: UserId,
    pub author_name: String,
    pub text: String,
    pub created: Ms,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: UserId,
        name: String,
        email: String,
    },
    UserUpdated {
        id: UserId,
        name: String,
        email: String,
    },
    /// Also drops the user's items, requests, bookings and comments.
    UserRemoved {
        id: UserId,
    },
    ItemListed {
        id: ItemId,
        owner: UserId,
        name: String,
        description: String,
        available: bool,
        request: Option<RequestId>,
    },
    ItemUpdated {
        id: ItemId,
        name: String,
        description: String,
        available: bool,
    },
    /// Also drops the item's bookings and comments.
    ItemRemoved {
        id: ItemId,
    },
    BookingRequested {
        id: BookingId,
        item: ItemId,
        booker: UserId,
        span: Span,
    },
    BookingDecided {
        id: BookingId,
        status: BookingStatus,
    },
    CommentPosted {
        id: CommentId,
        item: ItemId,
        author: UserId,
        text: String,
        created: Ms,
    },
    RequestPosted {
        id: RequestId,
        requester: UserId,
        description: String,
        created: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserShort {
    pub id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemShort {
    pub id: ItemId,
    pub name: String,
}

/// What callers see of a booking: no owner, no item description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub id: BookingId,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
    pub booker: UserShort,
    pub item: ItemShort,
}

impl BookingView {
    pub fn new(booking: &Booking, item_name: String) -> Self {
        Self {
            id: booking.id,
            start: booking.span.start,
            end: booking.span.end,
            status: booking.status,
            booker: UserShort { id: booking.booker },
            item: ItemShort {
                id: booking.item,
                name: item_name,
            },
        }
    }
}

/// Last/next booking shown on an item's detail view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingShort {
    pub id: BookingId,
    pub booker: UserId,
    pub start: Ms,
    pub end: Ms,
}

impl From<&Booking> for BookingShort {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            booker: b.booker,
            start: b.span.start,
            end: b.span.end,
        }
    }
}

/// An item listed in answer to a request, as the requester sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestItem {
    pub id: ItemId,
    pub name: String,
    pub owner: UserId,
}

impl From<&Item> for RequestItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            owner: item.owner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    pub request: ItemRequest,
    pub items: Vec<RequestItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDetail {
    pub item: Item,
    pub last: Option<BookingShort>,
    pub next: Option<BookingShort>,
    pub comments: Vec<Comment>,
}
