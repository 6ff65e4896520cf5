use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::directory::email_key;
use super::{Engine, EngineError, Entity, ItemDirectory, UserDirectory};

pub(super) fn required_text(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} must not be blank")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(match field {
            "name" => "name too long",
            "email" => "email too long",
            "description" => "description too long",
            _ => "text too long",
        }));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), EngineError> {
    required_text("email", email, MAX_EMAIL_LEN)?;
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !trimmed.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(EngineError::validation(format!("malformed email: {trimmed}"))),
    }
}

impl Engine {
    // ── Users ────────────────────────────────────────────────

    /// Register `id` (the session identity) with a profile.
    pub async fn register_user(&self, id: UserId, name: &str, email: &str) -> Result<User, EngineError> {
        required_text("name", name, MAX_NAME_LEN)?;
        validate_email(email)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.directory.user_count() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.directory.find_user(&id).is_some() {
            return Err(EngineError::conflict(format!("user {id} is already registered")));
        }
        if self.directory.email_owner(email).is_some() {
            return Err(EngineError::conflict(format!("email {} is already in use", email.trim())));
        }

        let user = User {
            id,
            name: name.trim().to_string(),
            email: email.trim().to_string(),
        };
        self.persist_and_apply(&Event::UserRegistered {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
        })
        .await?;
        info!(user = %id, "user registered");
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User, EngineError> {
        self.directory
            .find_user(&id)
            .ok_or(EngineError::NotFound(Entity::User, id.0))
    }

    pub fn list_users(&self) -> Vec<User> {
        self.directory.users()
    }

    /// Partial profile update. Users may only edit themselves.
    pub async fn update_user(
        &self,
        actor: UserId,
        id: UserId,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, EngineError> {
        if actor != id {
            return Err(EngineError::NotFound(Entity::User, id.0));
        }
        if let Some(n) = name {
            required_text("name", n, MAX_NAME_LEN)?;
        }
        if let Some(e) = email {
            validate_email(e)?;
        }

        let _catalog = self.catalog_lock.lock().await;
        let current = self.get_user(id)?;
        let name = name.map_or(current.name.clone(), |n| n.trim().to_string());
        let email = email.map_or(current.email.clone(), |e| e.trim().to_string());
        if email_key(&email) != email_key(&current.email)
            && self.directory.email_owner(&email).is_some()
        {
            return Err(EngineError::conflict(format!("email {email} is already in use")));
        }

        self.persist_and_apply(&Event::UserUpdated {
            id,
            name: name.clone(),
            email: email.clone(),
        })
        .await?;
        Ok(User { id, name, email })
    }

    /// Delete a profile along with everything it owns.
    pub async fn remove_user(&self, actor: UserId, id: UserId) -> Result<(), EngineError> {
        if actor != id {
            return Err(EngineError::NotFound(Entity::User, id.0));
        }
        let _catalog = self.catalog_lock.lock().await;
        self.get_user(id)?;
        self.persist_and_apply(&Event::UserRemoved { id }).await?;
        info!(user = %id, "user removed");
        Ok(())
    }

    // ── Items ────────────────────────────────────────────────

    /// List a new item, optionally in answer to an existing request.
    pub async fn list_item(
        &self,
        owner: UserId,
        name: &str,
        description: &str,
        available: bool,
        request: Option<RequestId>,
    ) -> Result<Item, EngineError> {
        required_text("name", name, MAX_NAME_LEN)?;
        required_text("description", description, MAX_DESCRIPTION_LEN)?;

        let _catalog = self.catalog_lock.lock().await;
        self.get_user(owner)?;
        if self.directory.items_of_owner(&owner).len() >= MAX_ITEMS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many items for owner"));
        }
        if let Some(id) = request
            && self.directory.find_request(&id).is_none()
        {
            return Err(EngineError::NotFound(Entity::Request, id.0));
        }

        let item = Item {
            id: ItemId::generate(),
            owner,
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            available,
            request,
        };
        self.persist_and_apply(&Event::ItemListed {
            id: item.id,
            owner,
            name: item.name.clone(),
            description: item.description.clone(),
            available,
            request,
        })
        .await?;
        info!(item = %item.id, owner = %owner, "item listed");
        Ok(item)
    }

    /// Partial item update, owner only. Anyone else gets `NotFound`.
    pub async fn update_item(
        &self,
        actor: UserId,
        id: ItemId,
        name: Option<&str>,
        description: Option<&str>,
        available: Option<bool>,
    ) -> Result<Item, EngineError> {
        if let Some(n) = name {
            required_text("name", n, MAX_NAME_LEN)?;
        }
        if let Some(d) = description {
            required_text("description", d, MAX_DESCRIPTION_LEN)?;
        }

        let _catalog = self.catalog_lock.lock().await;
        let mut item = self.owned_item(actor, id)?;
        if let Some(n) = name {
            item.name = n.trim().to_string();
        }
        if let Some(d) = description {
            item.description = d.trim().to_string();
        }
        if let Some(a) = available {
            item.available = a;
        }

        self.persist_and_apply(&Event::ItemUpdated {
            id,
            name: item.name.clone(),
            description: item.description.clone(),
            available: item.available,
        })
        .await?;
        Ok(item)
    }

    pub async fn remove_item(&self, actor: UserId, id: ItemId) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        self.owned_item(actor, id)?;
        self.persist_and_apply(&Event::ItemRemoved { id }).await?;
        info!(item = %id, "item removed");
        Ok(())
    }

    fn owned_item(&self, actor: UserId, id: ItemId) -> Result<Item, EngineError> {
        self.directory
            .find_item(&id)
            .filter(|item| item.owner == actor)
            .ok_or(EngineError::NotFound(Entity::Item, id.0))
    }

    pub fn search_items(&self, text: &str) -> Result<Vec<Item>, EngineError> {
        if text.len() > MAX_SEARCH_TEXT_LEN {
            return Err(EngineError::LimitExceeded("search text too long"));
        }
        Ok(self.directory.search(text))
    }

    // ── Comments ─────────────────────────────────────────────

    /// Comment on an item. The author must have a booking on it that has
    /// already ended; its status does not matter.
    pub async fn post_comment(&self, author: UserId, item_id: ItemId, text: &str) -> Result<Comment, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::validation("comment text must not be blank"));
        }
        if text.len() > MAX_COMMENT_LEN {
            return Err(EngineError::LimitExceeded("comment too long"));
        }
        let user = self.get_user(author)?;
        if self.directory.find_item(&item_id).is_none() {
            return Err(EngineError::NotFound(Entity::Item, item_id.0));
        }

        let now = self.now_ms();
        let ids = self.bookings.ids_of_booker(&author);
        let finished = self
            .bookings
            .read_all(&ids)
            .await
            .iter()
            .any(|b| b.item == item_id && b.span.end < now);
        if !finished {
            return Err(EngineError::validation(
                "only users who finished a booking of this item may comment on it",
            ));
        }

        let comment = Comment {
            id: CommentId::generate(),
            item: item_id,
            author,
            author_name: user.name,
            text: text.trim().to_string(),
            created: now,
        };
        self.persist_and_apply(&Event::CommentPosted {
            id: comment.id,
            item: item_id,
            author,
            text: comment.text.clone(),
            created: now,
        })
        .await?;
        Ok(comment)
    }

    pub fn list_comments(&self, item_id: ItemId) -> Result<Vec<Comment>, EngineError> {
        if self.directory.find_item(&item_id).is_none() {
            return Err(EngineError::NotFound(Entity::Item, item_id.0));
        }
        Ok(self.directory.comments_of(&item_id))
    }
}
