use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, Entity, ItemDirectory, Role, UserDirectory};

/// Shape and timing checks for a requested window, in the order callers see them.
pub(crate) fn validate_window(start: Ms, end: Ms, now: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::validation("booking end must be after its start"));
    }
    if start < now {
        return Err(EngineError::validation("booking start must not be in the past"));
    }
    if end <= now {
        return Err(EngineError::validation("booking end must be in the future"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(Span::new(start, end))
}

impl Engine {
    /// Request `item` for `[start, end)`. The booking starts out `Waiting`.
    pub async fn create_booking(
        &self,
        booker: UserId,
        item_id: ItemId,
        start: Ms,
        end: Ms,
    ) -> Result<BookingView, EngineError> {
        let result = self.try_create_booking(booker, item_id, start, end).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_create_booking(
        &self,
        booker: UserId,
        item_id: ItemId,
        start: Ms,
        end: Ms,
    ) -> Result<BookingView, EngineError> {
        let span = validate_window(start, end, self.now_ms())?;
        let item = self
            .directory
            .find_item(&item_id)
            .ok_or(EngineError::NotFound(Entity::Item, item_id.0))?;
        if self.directory.find_user(&booker).is_none() {
            return Err(EngineError::NotFound(Entity::User, booker.0));
        }
        if !item.available {
            return Err(EngineError::conflict(format!("item {item_id} is not available")));
        }
        if item.owner == booker {
            // Owners can't book their own things; don't confirm the item to them either.
            return Err(EngineError::NotFound(Entity::Item, item_id.0));
        }
        if self.bookings.count_on_item(&item_id) >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }

        let booking = Booking {
            id: BookingId::generate(),
            item: item_id,
            booker,
            span,
            status: BookingStatus::Waiting,
        };
        self.persist_and_apply(&Event::BookingRequested {
            id: booking.id,
            item: item_id,
            booker,
            span,
        })
        .await?;
        info!(booking = %booking.id, item = %item_id, booker = %booker, "booking requested");
        Ok(BookingView::new(&booking, item.name))
    }

    /// Approve or reject a waiting booking. Only the item's owner may decide;
    /// to anyone else the booking does not exist.
    pub async fn decide_booking(
        &self,
        actor: UserId,
        id: BookingId,
        approve: bool,
    ) -> Result<BookingView, EngineError> {
        let result = self.try_decide_booking(actor, id, approve).await;
        let outcome = match &result {
            Ok(view) => view.status.as_str(),
            Err(e) => e.kind(),
        };
        metrics::counter!(observability::BOOKING_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_decide_booking(
        &self,
        actor: UserId,
        id: BookingId,
        approve: bool,
    ) -> Result<BookingView, EngineError> {
        let not_found = EngineError::NotFound(Entity::Booking, id.0);
        let row = self.bookings.get(&id).ok_or_else(|| not_found.clone())?;

        // Gate before row: compaction takes the gate exclusively and then reads rows.
        let _gate = self.commit_gate.read().await;
        let mut guard = row.cell.write().await;
        if !self.bookings.contains(&id) {
            return Err(not_found);
        }
        let item = self
            .directory
            .find_item(&row.item)
            .ok_or_else(|| not_found.clone())?;
        if !Role::of(&guard, item.owner, actor).can_decide() {
            return Err(not_found);
        }
        if !guard.status.is_decidable() {
            return Err(EngineError::validation("only WAITING bookings can be decided"));
        }

        let status = BookingStatus::from_decision(approve);
        self.wal_append(&Event::BookingDecided { id, status }).await?;
        guard.status = status;
        info!(booking = %id, status = %status, "booking decided");
        Ok(BookingView::new(&guard, item.name))
    }

    /// A booking as seen by its booker or the item's owner. Everyone else gets
    /// the same `NotFound` as for a missing id.
    pub async fn get_booking(&self, actor: UserId, id: BookingId) -> Result<BookingView, EngineError> {
        let not_found = EngineError::NotFound(Entity::Booking, id.0);
        let row = self.bookings.get(&id).ok_or_else(|| not_found.clone())?;
        let item = self
            .directory
            .find_item(&row.item)
            .ok_or_else(|| not_found.clone())?;
        let booking = row.cell.read().await.clone();
        if !Role::of(&booking, item.owner, actor).can_view() {
            debug!(booking = %id, actor = %actor, "booking hidden from caller");
            return Err(not_found);
        }
        Ok(BookingView::new(&booking, item.name))
    }
}
