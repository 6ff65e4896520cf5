use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedBooking = Arc<RwLock<Booking>>;

/// One booking row. `item` and `booker` never change after creation, so they
/// are readable without taking the row lock; `status` lives behind it.
#[derive(Clone)]
pub struct BookingRow {
    pub item: ItemId,
    pub booker: UserId,
    pub cell: SharedBooking,
}

/// Booking rows plus the two indices the classifier and projection query by.
pub struct BookingStore {
    rows: DashMap<BookingId, BookingRow>,
    by_booker: DashMap<UserId, Vec<BookingId>>,
    by_item: DashMap<ItemId, Vec<BookingId>>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            by_booker: DashMap::new(),
            by_item: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &BookingId) -> bool {
        self.rows.contains_key(id)
    }

    /// Clone the row handle out of the map so no shard lock is held across an await.
    pub fn get(&self, id: &BookingId) -> Option<BookingRow> {
        self.rows.get(id).map(|e| e.value().clone())
    }

    pub fn insert(&self, booking: Booking) {
        let id = booking.id;
        let (item, booker) = (booking.item, booking.booker);
        self.rows.insert(
            id,
            BookingRow {
                item,
                booker,
                cell: Arc::new(RwLock::new(booking)),
            },
        );
        self.by_booker.entry(booker).or_default().push(id);
        self.by_item.entry(item).or_default().push(id);
    }

    pub fn remove(&self, id: &BookingId) -> Option<BookingRow> {
        let (_, row) = self.rows.remove(id)?;
        if let Some(mut ids) = self.by_booker.get_mut(&row.booker) {
            ids.retain(|b| b != id);
        }
        self.by_booker.remove_if(&row.booker, |_, ids| ids.is_empty());
        if let Some(mut ids) = self.by_item.get_mut(&row.item) {
            ids.retain(|b| b != id);
        }
        self.by_item.remove_if(&row.item, |_, ids| ids.is_empty());
        Some(row)
    }

    pub fn ids_of_booker(&self, booker: &UserId) -> Vec<BookingId> {
        self.by_booker
            .get(booker)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn ids_on_item(&self, item: &ItemId) -> Vec<BookingId> {
        self.by_item
            .get(item)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn count_on_item(&self, item: &ItemId) -> usize {
        self.by_item.get(item).map_or(0, |e| e.len())
    }

    pub fn all_ids(&self) -> Vec<BookingId> {
        self.rows.iter().map(|e| *e.key()).collect()
    }

    pub fn remove_for_item(&self, item: &ItemId) -> usize {
        let ids = self.by_item.remove(item).map(|(_, ids)| ids).unwrap_or_default();
        ids.iter().filter(|id| self.remove(id).is_some()).count()
    }

    pub fn remove_for_booker(&self, booker: &UserId) -> usize {
        let ids = self
            .by_booker
            .remove(booker)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        ids.iter().filter(|id| self.remove(id).is_some()).count()
    }

    /// Copy the current state of the given rows. Each row is read under its own
    /// lock; rows removed in the meantime are skipped.
    pub async fn read_all(&self, ids: &[BookingId]) -> Vec<Booking> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.get(id) {
                out.push(row.cell.read().await.clone());
            }
        }
        out
    }
}
