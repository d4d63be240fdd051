use anyhow::Result;
use chrono::Utc;
use runningman_db::db::is_transient;
use runningman_db::models::catalog::VideoListing;
use runningman_db::models::user::{Customer, User};
use runningman_db::repositories::catalog_repo::CatalogRepository;
use runningman_db::repositories::collection_repo::CollectionRepository;
use runningman_db::repositories::user_repo::UserRepository;
use runningman_db::sqlx::PgPool;
use runningman_shared::cache::{
    collection_key, video_list_key, CatalogCache, COLLECTION_TTL, LIBRARIES_KEY, LIBRARIES_TTL,
    VIDEO_LIST_TTL,
};
use runningman_shared::link::{LinkSigner, SignedLink};
use runningman_shared::retry::with_retry;
use tracing::warn;

pub enum LinkOutcome {
    Link(SignedLink),
    NoAccess,
    UnknownEpisode,
}

/// Catalog reads go through the cache; access checks always hit the database.
/// Every query is retried while the failure looks like a connection problem.
#[derive(Clone)]
pub struct CatalogService {
    cache: CatalogCache,
    catalog: CatalogRepository,
    collections: CollectionRepository,
    users: UserRepository,
    signer: LinkSigner,
}

impl CatalogService {
    pub fn new(pool: PgPool, cache: CatalogCache, signer: LinkSigner) -> Self {
        Self {
            cache,
            catalog: CatalogRepository::new(pool.clone()),
            collections: CollectionRepository::new(pool.clone()),
            users: UserRepository::new(pool),
            signer,
        }
    }

    pub async fn register(&self, customer: &Customer) -> Result<User> {
        let users = &self.users;
        with_retry(move || users.register(customer), is_transient).await
    }

    pub async fn years(&self) -> Result<Vec<i32>> {
        let catalog = &self.catalog;
        self.cache
            .get_or_load(LIBRARIES_KEY, LIBRARIES_TTL, || {
                with_retry(move || catalog.get_years(), is_transient)
            })
            .await
    }

    pub async fn episodes(&self, year: i32) -> Result<Vec<i32>> {
        let catalog = &self.catalog;
        self.cache
            .get_or_load(&video_list_key(year), VIDEO_LIST_TTL, || {
                with_retry(move || catalog.get_episodes_by_year(year), is_transient)
            })
            .await
    }

    pub async fn collection(&self, user_id: i64) -> Result<Vec<i32>> {
        let collections = &self.collections;
        self.cache
            .get_or_load(&collection_key(user_id), COLLECTION_TTL, || {
                with_retry(move || collections.get_episodes(user_id), is_transient)
            })
            .await
    }

    pub async fn listing(&self, episode: i32) -> Result<Option<VideoListing>> {
        let catalog = &self.catalog;
        with_retry(move || catalog.get_video_listing(episode), is_transient).await
    }

    /// Owners and active subscribers may watch.
    pub async fn has_access(&self, user_id: i64, episode: i32) -> Result<bool> {
        let (collections, users) = (&self.collections, &self.users);
        if with_retry(move || collections.owns(user_id, episode), is_transient).await? {
            return Ok(true);
        }
        let user = with_retry(move || users.get_by_id(user_id), is_transient).await?;
        Ok(user.is_some_and(|u| u.has_active_subscription(Utc::now())))
    }

    pub async fn sign_link(&self, user_id: i64, episode: i32) -> Result<LinkOutcome> {
        let catalog = &self.catalog;
        let Some(video) = with_retry(move || catalog.get_video_ref(episode), is_transient).await?
        else {
            return Ok(LinkOutcome::UnknownEpisode);
        };
        if !self.has_access(user_id, episode).await? {
            warn!(user_id, episode, "Link requested without access");
            return Ok(LinkOutcome::NoAccess);
        }
        Ok(LinkOutcome::Link(self.signer.sign(&video, Utc::now())?))
    }
}
