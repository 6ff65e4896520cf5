use dashmap::DashMap;

use crate::model::*;

/// Read side of the user registry, as the booking rules see it.
pub trait UserDirectory {
    fn find_user(&self, id: &UserId) -> Option<User>;
}

/// Read side of the item catalog, as the booking rules see it.
pub trait ItemDirectory {
    fn find_item(&self, id: &ItemId) -> Option<Item>;
    fn items_of_owner(&self, owner: &UserId) -> Vec<ItemId>;
}

#[derive(Debug, Clone)]
struct CommentRecord {
    id: CommentId,
    author: UserId,
    text: String,
    created: Ms,
}

/// In-memory users, items, requests and comments. Mutations here are plain state
/// changes; the engine logs them to the WAL before calling in.
#[derive(Default)]
pub struct Directory {
    users: DashMap<UserId, User>,
    /// Lowercased email → owner. Emails are unique case-insensitively.
    emails: DashMap<String, UserId>,
    items: DashMap<ItemId, Item>,
    items_by_owner: DashMap<UserId, Vec<ItemId>>,
    requests: DashMap<RequestId, ItemRequest>,
    /// Items listed in answer to each request.
    items_by_request: DashMap<RequestId, Vec<ItemId>>,
    comments: DashMap<ItemId, Vec<CommentRecord>>,
}

pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn email_owner(&self, email: &str) -> Option<UserId> {
        self.emails.get(&email_key(email)).map(|e| *e.value())
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|i| i.id);
        items
    }

    pub(crate) fn insert_user(&self, user: User) {
        self.emails.insert(email_key(&user.email), user.id);
        self.users.insert(user.id, user);
    }

    pub(crate) fn update_user(&self, id: UserId, name: &str, email: &str) {
        let Some(mut user) = self.users.get_mut(&id) else {
            return;
        };
        let old_key = email_key(&user.email);
        let new_key = email_key(email);
        if old_key != new_key {
            self.emails.remove(&old_key);
            self.emails.insert(new_key, id);
        }
        user.name = name.to_string();
        user.email = email.to_string();
    }

    /// Drop the user together with their items and requests, the comments on
    /// those items and the comments they wrote elsewhere. Items other users
    /// listed for the dropped requests stay, unlinked. Returns the removed
    /// item ids so the caller can drop bookings on them.
    pub(crate) fn remove_user(&self, id: &UserId) -> Vec<ItemId> {
        if let Some((_, user)) = self.users.remove(id) {
            self.emails.remove(&email_key(&user.email));
        }
        let owned = self
            .items_by_owner
            .remove(id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        for item in &owned {
            if let Some((_, removed)) = self.items.remove(item) {
                self.unlink_from_request(&removed);
            }
            self.comments.remove(item);
        }
        self.comments.retain(|_, records| {
            records.retain(|c| c.author != *id);
            !records.is_empty()
        });

        let asked: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|e| e.value().requester == *id)
            .map(|e| *e.key())
            .collect();
        for request in asked {
            self.requests.remove(&request);
            let answers = self
                .items_by_request
                .remove(&request)
                .map(|(_, ids)| ids)
                .unwrap_or_default();
            for item in answers {
                if let Some(mut item) = self.items.get_mut(&item) {
                    item.request = None;
                }
            }
        }
        owned
    }

    pub(crate) fn insert_item(&self, item: Item) {
        self.items_by_owner.entry(item.owner).or_default().push(item.id);
        if let Some(request) = item.request {
            self.items_by_request.entry(request).or_default().push(item.id);
        }
        self.items.insert(item.id, item);
    }

    pub(crate) fn update_item(&self, id: ItemId, name: &str, description: &str, available: bool) {
        if let Some(mut item) = self.items.get_mut(&id) {
            item.name = name.to_string();
            item.description = description.to_string();
            item.available = available;
        }
    }

    pub(crate) fn remove_item(&self, id: &ItemId) {
        if let Some((_, item)) = self.items.remove(id) {
            if let Some(mut ids) = self.items_by_owner.get_mut(&item.owner) {
                ids.retain(|i| i != id);
            }
            self.items_by_owner.remove_if(&item.owner, |_, ids| ids.is_empty());
            self.unlink_from_request(&item);
        }
        self.comments.remove(id);
    }

    fn unlink_from_request(&self, item: &Item) {
        let Some(request) = item.request else {
            return;
        };
        if let Some(mut ids) = self.items_by_request.get_mut(&request) {
            ids.retain(|i| *i != item.id);
        }
        self.items_by_request.remove_if(&request, |_, ids| ids.is_empty());
    }

    pub(crate) fn insert_request(&self, request: ItemRequest) {
        self.requests.insert(request.id, request);
    }

    pub fn find_request(&self, id: &RequestId) -> Option<ItemRequest> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    /// Every request, ordered by id.
    pub fn requests(&self) -> Vec<ItemRequest> {
        let mut requests: Vec<ItemRequest> = self.requests.iter().map(|e| e.value().clone()).collect();
        requests.sort_by_key(|r| r.id);
        requests
    }

    pub fn request_count_of(&self, requester: &UserId) -> usize {
        self.requests.iter().filter(|e| e.value().requester == *requester).count()
    }

    /// Items listed in answer to `request`, in listing order.
    pub fn answers_to(&self, request: &RequestId) -> Vec<Item> {
        let ids = self
            .items_by_request
            .get(request)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.find_item(id)).collect()
    }

    pub(crate) fn push_comment(&self, id: CommentId, item: ItemId, author: UserId, text: String, created: Ms) {
        self.comments.entry(item).or_default().push(CommentRecord {
            id,
            author,
            text,
            created,
        });
    }

    /// Comments on an item in posting order, with the author's current name.
    pub fn comments_of(&self, item: &ItemId) -> Vec<Comment> {
        let Some(records) = self.comments.get(item).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        records
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                item: *item,
                author: c.author,
                author_name: self
                    .users
                    .get(&c.author)
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                text: c.text,
                created: c.created,
            })
            .collect()
    }

    /// Available items whose name or description contains `text`, ignoring case.
    /// Blank text matches nothing.
    pub fn search(&self, text: &str) -> Vec<Item> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<Item> = self
            .items
            .iter()
            .filter(|e| {
                let item = e.value();
                item.available
                    && (item.name.to_lowercase().contains(&needle)
                        || item.description.to_lowercase().contains(&needle))
            })
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|i| i.id);
        hits
    }
}

impl UserDirectory for Directory {
    fn find_user(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }
}

impl ItemDirectory for Directory {
    fn find_item(&self, id: &ItemId) -> Option<Item> {
        self.items.get(id).map(|e| e.value().clone())
    }

    fn items_of_owner(&self, owner: &UserId) -> Vec<ItemId> {
        self.items_by_owner
            .get(owner)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            id: UserId::generate(),
            name: name.into(),
            email: format!("{name}@Example.com"),
        }
    }

    fn item(owner: UserId, name: &str, available: bool) -> Item {
        Item {
            id: ItemId::generate(),
            owner,
            name: name.into(),
            description: format!("a {name}"),
            available,
            request: None,
        }
    }

    fn request(requester: UserId, created: Ms) -> ItemRequest {
        ItemRequest {
            id: RequestId::generate(),
            requester,
            description: "need a ladder".into(),
            created,
        }
    }

    #[test]
    fn email_index_is_case_insensitive_and_follows_updates() {
        let dir = Directory::new();
        let ann = user("ann");
        dir.insert_user(ann.clone());
        assert_eq!(dir.email_owner("ANN@example.COM"), Some(ann.id));

        dir.update_user(ann.id, "Ann", "ann@new.org");
        assert_eq!(dir.email_owner("ann@example.com"), None);
        assert_eq!(dir.email_owner("Ann@New.org"), Some(ann.id));
        assert_eq!(dir.find_user(&ann.id).unwrap().name, "Ann");
    }

    #[test]
    fn removing_a_user_cascades_to_items_and_comments() {
        let dir = Directory::new();
        let ann = user("ann");
        let bob = user("bob");
        dir.insert_user(ann.clone());
        dir.insert_user(bob.clone());

        let drill = item(ann.id, "drill", true);
        let saw = item(bob.id, "saw", true);
        dir.insert_item(drill.clone());
        dir.insert_item(saw.clone());
        dir.push_comment(CommentId::generate(), saw.id, ann.id, "sharp".into(), 1);
        dir.push_comment(CommentId::generate(), drill.id, bob.id, "loud".into(), 2);

        let removed = dir.remove_user(&ann.id);
        assert_eq!(removed, vec![drill.id]);
        assert!(dir.find_item(&drill.id).is_none());
        assert!(dir.comments_of(&drill.id).is_empty());
        assert!(dir.comments_of(&saw.id).is_empty());
        assert!(dir.items_of_owner(&ann.id).is_empty());
        assert_eq!(dir.email_owner("ann@example.com"), None);
        assert_eq!(dir.item_count(), 1);
    }

    #[test]
    fn emptied_index_entries_are_dropped() {
        let dir = Directory::new();
        let ann = user("ann");
        let bob = user("bob");
        dir.insert_user(ann.clone());
        dir.insert_user(bob.clone());
        let drill = item(ann.id, "drill", true);
        let saw = item(ann.id, "saw", true);
        let tent = item(bob.id, "tent", true);
        for i in [&drill, &saw, &tent] {
            dir.insert_item(i.clone());
        }

        dir.remove_item(&drill.id);
        assert_eq!(dir.items_of_owner(&ann.id), vec![saw.id]);
        dir.remove_item(&saw.id);
        assert!(!dir.items_by_owner.contains_key(&ann.id));
        assert_eq!(dir.items_by_owner.len(), 1);

        // the only comment on the tent goes with its author
        dir.push_comment(CommentId::generate(), tent.id, ann.id, "roomy".into(), 1);
        dir.remove_user(&ann.id);
        assert!(!dir.comments.contains_key(&tent.id));
    }

    #[test]
    fn answers_follow_item_and_requester_removal() {
        let dir = Directory::new();
        let (ann, bob) = (user("ann"), user("bob"));
        dir.insert_user(ann.clone());
        dir.insert_user(bob.clone());
        let asked = request(ann.id, 1);
        dir.insert_request(asked.clone());

        let mut ladder = item(bob.id, "ladder", true);
        ladder.request = Some(asked.id);
        let mut steps = item(bob.id, "steps", true);
        steps.request = Some(asked.id);
        dir.insert_item(ladder.clone());
        dir.insert_item(steps.clone());
        let names: Vec<String> = dir.answers_to(&asked.id).into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["ladder", "steps"]);
        assert_eq!(dir.request_count_of(&ann.id), 1);

        dir.remove_item(&steps.id);
        assert_eq!(dir.answers_to(&asked.id), vec![ladder.clone()]);

        // the requester leaves: the request goes, bob's ladder stays unlinked
        dir.remove_user(&ann.id);
        assert!(dir.find_request(&asked.id).is_none());
        assert!(dir.items_by_request.is_empty());
        assert_eq!(dir.find_item(&ladder.id).unwrap().request, None);
    }

    #[test]
    fn search_matches_name_or_description_of_available_items() {
        let dir = Directory::new();
        let owner = UserId::generate();
        let drill = item(owner, "Power Drill", true);
        let hidden = item(owner, "Drill press", false);
        let mut ladder = item(owner, "Ladder", true);
        ladder.description = "Handy next to a DRILL".into();
        for i in [&drill, &hidden, &ladder] {
            dir.insert_item(i.clone());
        }

        let mut expected = vec![drill.id, ladder.id];
        expected.sort();
        let found: Vec<ItemId> = dir.search("drill").into_iter().map(|i| i.id).collect();
        assert_eq!(found, expected);
        assert!(dir.search("   ").is_empty());
    }

    #[test]
    fn comments_carry_the_current_author_name() {
        let dir = Directory::new();
        let ann = user("ann");
        dir.insert_user(ann.clone());
        let it = item(UserId::generate(), "tent", true);
        dir.insert_item(it.clone());
        dir.push_comment(CommentId::generate(), it.id, ann.id, "dry all night".into(), 5);

        dir.update_user(ann.id, "Annabel", &ann.email);
        let comments = dir.comments_of(&it.id);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].author_name, "Annabel");
        assert_eq!(comments[0].created, 5);
    }
}
