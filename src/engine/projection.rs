use crate::model::*;

use super::{Engine, EngineError, Entity, ItemDirectory};

/// Most recent finished approved booking and the soonest upcoming one.
/// Ties go to the larger id so the answer does not depend on input order.
pub fn last_and_next(bookings: &[Booking], now: Ms) -> (Option<BookingShort>, Option<BookingShort>) {
    let approved = || bookings.iter().filter(|b| b.status == BookingStatus::Approved);
    let last = approved()
        .filter(|b| b.span.end < now)
        .max_by_key(|b| (b.span.end, b.id))
        .map(BookingShort::from);
    let next = approved()
        .filter(|b| b.span.start > now)
        .min_by_key(|b| (b.span.start, std::cmp::Reverse(b.id)))
        .map(BookingShort::from);
    (last, next)
}

impl Engine {
    async fn detail_of(&self, item: Item, with_bookings: bool) -> ItemDetail {
        let (last, next) = if with_bookings {
            let ids = self.bookings.ids_on_item(&item.id);
            last_and_next(&self.bookings.read_all(&ids).await, self.now_ms())
        } else {
            (None, None)
        };
        let comments = self.directory.comments_of(&item.id);
        ItemDetail {
            item,
            last,
            next,
            comments,
        }
    }

    /// An item with its comments. Last/next bookings are only filled in for the owner.
    pub async fn item_detail(&self, requester: UserId, item_id: ItemId) -> Result<ItemDetail, EngineError> {
        let item = self
            .directory
            .find_item(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id.0))?;
        let is_owner = item.owner == requester;
        Ok(self.detail_of(item, is_owner).await)
    }

    /// Every item `owner` has listed, oldest listing first, each with last/next.
    pub async fn list_owner_items(&self, owner: UserId) -> Vec<ItemDetail> {
        let mut ids = self.directory.items_of_owner(&owner);
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.directory.find_item(&id) {
                out.push(self.detail_of(item, true).await);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved(start: Ms, end: Ms) -> Booking {
        Booking {
            id: BookingId::generate(),
            item: ItemId::generate(),
            booker: UserId::generate(),
            span: Span::new(start, end),
            status: BookingStatus::Approved,
        }
    }

    #[test]
    fn picks_latest_finished_and_soonest_upcoming() {
        let now = 10_000;
        let old = approved(1_000, 2_000);
        let recent = approved(3_000, 9_000);
        let ongoing = approved(9_500, 11_000);
        let soon = approved(12_000, 13_000);
        let later = approved(20_000, 21_000);
        let list = vec![later.clone(), old, ongoing, soon.clone(), recent.clone()];

        let (last, next) = last_and_next(&list, now);
        assert_eq!(last, Some(BookingShort::from(&recent)));
        assert_eq!(next, Some(BookingShort::from(&soon)));
    }

    #[test]
    fn only_approved_bookings_count() {
        let now = 10_000;
        let mut waiting = approved(1_000, 2_000);
        waiting.status = BookingStatus::Waiting;
        let mut rejected = approved(12_000, 13_000);
        rejected.status = BookingStatus::Rejected;

        assert_eq!(last_and_next(&[waiting, rejected], now), (None, None));
        assert_eq!(last_and_next(&[], now), (None, None));
    }
}
