//! Exchange post lifecycle: creation and cancellation.

use chrono::Utc;
use common::{ItemId, PostId, UserId};
use domain::{ItemStatus, Post, PostError, PostStatus};
use store::{TradeStore, TradeTx};

use crate::error::{Result, SagaError};
use crate::services::notification::{Notification, Notifier, notify_best_effort};

/// Service for managing exchange posts.
///
/// Listing items on a post is the only place items enter the exchangeable
/// pool: every listed item flips `InStore → ForExchange` in the same unit
/// of work that persists the post, and cancellation flips them back.
pub struct PostService<S, N> {
    store: S,
    notifier: N,
}

impl<S: TradeStore, N: Notifier> PostService<S, N> {
    /// Creates a new post service.
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    /// Creates an open exchange post listing the poster's items.
    #[tracing::instrument(skip(self, content))]
    pub async fn create_post(
        &self,
        poster_id: UserId,
        item_ids: Vec<ItemId>,
        content: String,
    ) -> Result<Post> {
        let now = Utc::now();
        let post = Post::new(poster_id, item_ids, content, now)?;

        // Fail fast before opening a transaction; the check-and-transition
        // below re-verifies status under the unit of work.
        for item_id in &post.items {
            let item = self
                .store
                .get_item(*item_id)
                .await?
                .ok_or(SagaError::ItemNotFound(*item_id))?;
            if !item.is_owned_by(poster_id) {
                return Err(PostError::ItemNotOwned {
                    item_id: *item_id,
                    user_id: poster_id,
                }
                .into());
            }
            if !item.status.can_list_for_exchange() {
                return Err(PostError::ItemNotListable {
                    item_id: *item_id,
                    status: item.status,
                }
                .into());
            }
        }

        let mut tx = self.store.begin().await?;
        for item_id in &post.items {
            tx.transition_item(*item_id, ItemStatus::InStore, ItemStatus::ForExchange, now)
                .await?;
        }
        tx.insert_post(&post).await?;
        tx.commit().await?;

        metrics::counter!("exchange_posts_created_total").increment(1);
        tracing::info!(post_id = %post.id, items = post.items.len(), "exchange post created");
        Ok(post)
    }

    /// Cancels an open post, returning its items to the owner's collection
    /// and rejecting every pending offer.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_post(&self, actor: UserId, post_id: PostId) -> Result<Post> {
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut post = tx
            .get_post(post_id)
            .await?
            .ok_or(SagaError::PostNotFound(post_id))?;
        post.ensure_poster(actor)?;
        post.ensure_open()?;

        for item_id in &post.items {
            tx.transition_item(*item_id, ItemStatus::ForExchange, ItemStatus::InStore, now)
                .await?;
        }
        let rejected = tx.reject_pending_offers(post_id, None, now).await?;
        tx.update_post_status(post_id, PostStatus::Canceled, now).await?;
        tx.commit().await?;

        post.status = PostStatus::Canceled;
        post.updated_at = now;

        for offer in &rejected {
            notify_best_effort(
                &self.notifier,
                Notification::new(
                    offer.offerer_id,
                    "Exchange post canceled",
                    "The post you made an offer on has been canceled by its owner.",
                    offer.id.to_string(),
                ),
            )
            .await;
        }

        tracing::info!(%post_id, rejected = rejected.len(), "exchange post canceled");
        Ok(post)
    }
}
