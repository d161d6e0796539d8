//! Exchange posts: a standing offer to trade away a set of items.

use chrono::{DateTime, Utc};
use common::{ItemId, PostId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an exchange post.
///
/// Created `Open`; becomes `Closed` exactly when one of its offers is
/// accepted; the poster may cancel it while it is still `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Open,
    Closed,
    Canceled,
}

impl PostStatus {
    /// Returns true if new offers and negotiations are allowed.
    pub fn is_open(&self) -> bool {
        matches!(self, PostStatus::Open)
    }

    /// Returns true if the poster can still cancel the post.
    pub fn can_cancel(&self) -> bool {
        matches!(self, PostStatus::Open)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Closed | PostStatus::Canceled)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Open => "open",
            PostStatus::Closed => "closed",
            PostStatus::Canceled => "canceled",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PostStatus::Open),
            "closed" => Some(PostStatus::Closed),
            "canceled" => Some(PostStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised by post lifecycle rules.
#[derive(Debug, Error)]
pub enum PostError {
    /// A post must list at least one item.
    #[error("an exchange post must list at least one item")]
    NoItems,

    /// The same item was listed twice.
    #[error("item {item_id} appears more than once in the post")]
    DuplicateItem { item_id: ItemId },

    /// A listed item does not belong to the poster.
    #[error("item {item_id} does not belong to user {user_id}")]
    ItemNotOwned { item_id: ItemId, user_id: UserId },

    /// A listed item is not in the owner's collection.
    #[error("item {item_id} cannot be listed for exchange, current status: {status}")]
    ItemNotListable {
        item_id: ItemId,
        status: crate::item::ItemStatus,
    },

    /// Acting user does not own the post.
    #[error("user {user_id} is not the owner of post {post_id}")]
    NotPoster { post_id: PostId, user_id: UserId },

    /// The post is not open.
    #[error("post {post_id} is not open, current status: {status}")]
    NotOpen { post_id: PostId, status: PostStatus },
}

/// A standing exchange post listing the poster's items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub poster_id: UserId,
    /// Items the poster is willing to trade away.
    pub items: Vec<ItemId>,
    pub content: String,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Creates a new open post.
    ///
    /// The item list must be non-empty and free of duplicates; ownership
    /// and status checks happen against the item registry at service level.
    pub fn new(
        poster_id: UserId,
        items: Vec<ItemId>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, PostError> {
        if items.is_empty() {
            return Err(PostError::NoItems);
        }
        if let Some(item_id) = first_duplicate(&items) {
            return Err(PostError::DuplicateItem { item_id });
        }

        Ok(Self {
            id: PostId::new(),
            poster_id,
            items,
            content: content.into(),
            status: PostStatus::Open,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns true if the item is listed on this post.
    pub fn contains_item(&self, item_id: ItemId) -> bool {
        self.items.contains(&item_id)
    }

    /// Checks that the acting user owns this post.
    pub fn ensure_poster(&self, user_id: UserId) -> Result<(), PostError> {
        if self.poster_id != user_id {
            return Err(PostError::NotPoster {
                post_id: self.id,
                user_id,
            });
        }
        Ok(())
    }

    /// Checks that the post is still open.
    pub fn ensure_open(&self) -> Result<(), PostError> {
        if !self.status.is_open() {
            return Err(PostError::NotOpen {
                post_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Returns the first item id that occurs more than once.
pub(crate) fn first_duplicate(items: &[ItemId]) -> Option<ItemId> {
    let mut seen = std::collections::HashSet::new();
    items.iter().find(|id| !seen.insert(**id)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_post_is_open() {
        let post = Post::new(UserId::new(), vec![ItemId::new()], "two kits for trade", Utc::now())
            .unwrap();
        assert_eq!(post.status, PostStatus::Open);
        assert!(post.status.can_cancel());
    }

    #[test]
    fn empty_item_list_rejected() {
        let result = Post::new(UserId::new(), vec![], "nothing", Utc::now());
        assert!(matches!(result, Err(PostError::NoItems)));
    }

    #[test]
    fn duplicate_item_rejected() {
        let item = ItemId::new();
        let result = Post::new(UserId::new(), vec![item, item], "dup", Utc::now());
        assert!(matches!(result, Err(PostError::DuplicateItem { item_id }) if item_id == item));
    }

    #[test]
    fn ensure_poster_rejects_strangers() {
        let poster = UserId::new();
        let post = Post::new(poster, vec![ItemId::new()], "post", Utc::now()).unwrap();

        assert!(post.ensure_poster(poster).is_ok());
        assert!(matches!(
            post.ensure_poster(UserId::new()),
            Err(PostError::NotPoster { .. })
        ));
    }

    #[test]
    fn ensure_open_rejects_closed_and_canceled() {
        let mut post = Post::new(UserId::new(), vec![ItemId::new()], "post", Utc::now()).unwrap();
        assert!(post.ensure_open().is_ok());

        post.status = PostStatus::Closed;
        assert!(matches!(post.ensure_open(), Err(PostError::NotOpen { .. })));

        post.status = PostStatus::Canceled;
        assert!(matches!(post.ensure_open(), Err(PostError::NotOpen { .. })));
    }

    #[test]
    fn terminal_states() {
        assert!(!PostStatus::Open.is_terminal());
        assert!(PostStatus::Closed.is_terminal());
        assert!(PostStatus::Canceled.is_terminal());
    }
}
