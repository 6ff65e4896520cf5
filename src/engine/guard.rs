use crate::model::*;

/// How the acting user relates to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Booker,
    Owner,
    /// Only reachable through bad data: creation refuses owners booking their own items.
    BookerAndOwner,
    Neither,
}

impl Role {
    pub fn of(booking: &Booking, item_owner: UserId, actor: UserId) -> Self {
        match (booking.booker == actor, item_owner == actor) {
            (true, true) => Role::BookerAndOwner,
            (true, false) => Role::Booker,
            (false, true) => Role::Owner,
            (false, false) => Role::Neither,
        }
    }

    pub fn can_view(self) -> bool {
        !matches!(self, Role::Neither)
    }

    pub fn can_decide(self) -> bool {
        matches!(self, Role::Owner | Role::BookerAndOwner)
    }
}
