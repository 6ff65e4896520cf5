use std::cmp::Reverse;

use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::catalog::required_text;
use super::{Engine, EngineError, Entity};

/// Newest first; requests posted in the same millisecond fall back to id.
fn sort_newest_first(requests: &mut [ItemRequest]) {
    requests.sort_by_key(|r| Reverse((r.created, r.id)));
}

impl Engine {
    /// Ask for an item nobody lists yet. Other users answer by listing an
    /// item with this request's id.
    pub async fn post_request(&self, requester: UserId, description: &str) -> Result<ItemRequest, EngineError> {
        required_text("description", description, MAX_DESCRIPTION_LEN)?;

        let _catalog = self.catalog_lock.lock().await;
        self.get_user(requester)?;
        if self.directory.request_count_of(&requester) >= MAX_REQUESTS_PER_USER {
            return Err(EngineError::LimitExceeded("too many requests for user"));
        }

        let request = ItemRequest {
            id: RequestId::generate(),
            requester,
            description: description.trim().to_string(),
            created: self.now_ms(),
        };
        self.persist_and_apply(&Event::RequestPosted {
            id: request.id,
            requester,
            description: request.description.clone(),
            created: request.created,
        })
        .await?;
        info!(request = %request.id, requester = %requester, "item request posted");
        Ok(request)
    }

    /// The caller's own requests, newest first, each with the items listed
    /// in answer so far.
    pub fn list_own_requests(&self, requester: UserId) -> Vec<RequestView> {
        let mut own: Vec<ItemRequest> = self
            .directory
            .requests()
            .into_iter()
            .filter(|r| r.requester == requester)
            .collect();
        sort_newest_first(&mut own);
        own.into_iter().map(|r| self.request_view(r)).collect()
    }

    /// Everyone else's requests, newest first, without their answers.
    pub fn list_other_requests(&self, actor: UserId) -> Vec<ItemRequest> {
        let mut others: Vec<ItemRequest> = self
            .directory
            .requests()
            .into_iter()
            .filter(|r| r.requester != actor)
            .collect();
        sort_newest_first(&mut others);
        others
    }

    /// Any single request with its answers. Requests are public.
    pub fn get_request(&self, id: RequestId) -> Result<RequestView, EngineError> {
        self.directory
            .find_request(&id)
            .map(|r| self.request_view(r))
            .ok_or(EngineError::NotFound(Entity::Request, id.0))
    }

    fn request_view(&self, request: ItemRequest) -> RequestView {
        let items = self
            .directory
            .answers_to(&request.id)
            .iter()
            .map(RequestItem::from)
            .collect();
        RequestView { request, items }
    }
}
