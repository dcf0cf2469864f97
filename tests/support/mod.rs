//! In-memory fakes of the persistence, identity and broker seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use postline::application::consumer::{BrokerError, Delivery, MessageSource, Settlement};
use postline::application::events::{NotificationPublisher, PostCreatedMessage, PublishError};
use postline::application::profiles::{IdentityError, IdentityProvider};
use postline::application::repos::{
    CreatePostParams, LikesRepo, PostsRepo, PostsWriteRepo, ProfilesRepo, RepoError,
};
use postline::cache::{KeyValueStore, KvError, MemoryStore};
use postline::domain::entities::{AuthorPost, AuthorSummary, CachedProfile, FullPost, PostRecord};
use postline::domain::profile::{ProfileField, ProfileUpdate};
use postline::domain::types::EntityRef;
use time::OffsetDateTime;
use uuid::Uuid;

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(NonZeroUsize::new(1024).expect("non-zero")))
}

pub fn profile(id: Uuid, username: &str) -> CachedProfile {
    CachedProfile {
        id,
        username: username.to_string(),
        display_name: None,
        avatar_url: None,
    }
}

/// Membership rows and counters, with knobs for injected failures.
#[derive(Default)]
pub struct InMemoryLikes {
    members: Mutex<HashSet<(EntityRef, Uuid)>>,
    counters: Mutex<HashMap<EntityRef, i64>>,
    busy_reads: AtomicU32,
    broken_reads: AtomicBool,
    failing_applies: AtomicU32,
    pub exists_calls: AtomicUsize,
    pub apply_calls: AtomicUsize,
}

impl InMemoryLikes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_member(&self, entity: EntityRef, user_id: Uuid) {
        self.members.lock().expect("members").insert((entity, user_id));
    }

    pub fn set_likes(&self, entity: EntityRef, likes: i64) {
        self.counters.lock().expect("counters").insert(entity, likes);
    }

    pub fn likes(&self, entity: EntityRef) -> i64 {
        self.counters
            .lock()
            .expect("counters")
            .get(&entity)
            .copied()
            .unwrap_or(0)
    }

    /// The next `count` membership reads report a busy store.
    pub fn fail_reads_busy(&self, count: u32) {
        self.busy_reads.store(count, Ordering::SeqCst);
    }

    /// Membership reads fail with a non-transient error.
    pub fn break_reads(&self) {
        self.broken_reads.store(true, Ordering::SeqCst);
    }

    /// The next `count` counter updates fail.
    pub fn fail_applies(&self, count: u32) {
        self.failing_applies.store(count, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl LikesRepo for InMemoryLikes {
    async fn insert_like(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        Ok(self.members.lock().expect("members").insert((entity, user_id)))
    }

    async fn delete_like(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        Ok(self.members.lock().expect("members").remove(&(entity, user_id)))
    }

    async fn like_exists(&self, entity: EntityRef, user_id: Uuid) -> Result<bool, RepoError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_reads.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("relation does not exist"));
        }
        if take_one(&self.busy_reads) {
            return Err(RepoError::Busy);
        }
        Ok(self
            .members
            .lock()
            .expect("members")
            .contains(&(entity, user_id)))
    }

    async fn apply_likes_delta(&self, entity: EntityRef, delta: i64) -> Result<(), RepoError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_applies) {
            return Err(RepoError::Timeout);
        }
        let mut counters = self.counters.lock().expect("counters");
        let likes = counters.entry(entity).or_insert(0);
        *likes = (*likes + delta).max(0);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProfiles {
    rows: Mutex<HashMap<Uuid, CachedProfile>>,
    failing_updates: AtomicBool,
    pub find_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
}

impl InMemoryProfiles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, profile: CachedProfile) {
        self.rows.lock().expect("rows").insert(profile.id, profile);
    }

    pub fn get(&self, id: Uuid) -> Option<CachedProfile> {
        self.rows.lock().expect("rows").get(&id).cloned()
    }

    pub fn fail_updates(&self) {
        self.failing_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfilesRepo for InMemoryProfiles {
    async fn find_profile(&self, id: Uuid) -> Result<Option<CachedProfile>, RepoError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(id))
    }

    async fn insert_profile(&self, profile: &CachedProfile) -> Result<(), RepoError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().expect("rows");
        if rows.contains_key(&profile.id) {
            return Err(RepoError::Duplicate {
                constraint: "cached_users_pkey".to_string(),
            });
        }
        rows.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<bool, RepoError> {
        if self.failing_updates.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let mut rows = self.rows.lock().expect("rows");
        match rows.get_mut(&id) {
            Some(row) => {
                for (field, value) in update.changes() {
                    match field {
                        ProfileField::Username => {
                            row.username = value.clone().unwrap_or_default();
                        }
                        ProfileField::DisplayName => row.display_name = value.clone(),
                        ProfileField::AvatarUrl => row.avatar_url = value.clone(),
                    }
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Identity service answering with a fixed profile.
pub struct FakeIdentity {
    answer: Mutex<Option<CachedProfile>>,
    pub calls: AtomicUsize,
}

impl FakeIdentity {
    pub fn answering(profile: CachedProfile) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(profile)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn fetch_current_user(&self, credential: &str) -> Result<CachedProfile, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if credential.is_empty() {
            return Err(IdentityError::Status {
                status: 401,
                detail: Some("missing token".to_string()),
            });
        }
        self.answer
            .lock()
            .expect("answer")
            .clone()
            .ok_or_else(|| IdentityError::Transport("connection refused".to_string()))
    }
}

/// Delivery that records how it was settled.
pub struct FakeDelivery {
    payload: Vec<u8>,
    settled: Arc<Mutex<Vec<Settlement>>>,
}

impl FakeDelivery {
    pub fn new(payload: impl Into<Vec<u8>>, settled: &Arc<Mutex<Vec<Settlement>>>) -> Self {
        Self {
            payload: payload.into(),
            settled: Arc::clone(settled),
        }
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn settle(&self, settlement: Settlement) -> Result<(), BrokerError> {
        self.settled.lock().expect("settled").push(settlement);
        Ok(())
    }
}

/// Hands out queued batches, then idles briefly on every poll.
#[derive(Default)]
pub struct QueueSource {
    batches: Mutex<VecDeque<Vec<Box<dyn Delivery>>>>,
    pub polls: AtomicUsize,
}

impl QueueSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_batch(&self, batch: Vec<Box<dyn Delivery>>) {
        self.batches.lock().expect("batches").push_back(batch);
    }
}

#[async_trait]
impl MessageSource for QueueSource {
    async fn next_batch(&self) -> Result<Vec<Box<dyn Delivery>>, BrokerError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().expect("batches").pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Key-value store whose every command fails.
pub struct BrokenStore;

fn down() -> KvError {
    KvError::Backend("connection refused".to_string())
}

#[async_trait]
impl KeyValueStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(down())
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvError> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> Result<bool, KvError> {
        Err(down())
    }

    async fn incr_by(&self, _key: &str, _delta: i64) -> Result<i64, KvError> {
        Err(down())
    }

    async fn get_del(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(down())
    }

    async fn scan_keys(&self, _pattern: &str) -> Result<Vec<String>, KvError> {
        Err(down())
    }

    async fn set_add(&self, _key: &str, _member: &str) -> Result<(), KvError> {
        Err(down())
    }

    async fn set_pop(&self, _key: &str, _count: usize) -> Result<Vec<String>, KvError> {
        Err(down())
    }

    async fn incr_and_index(
        &self,
        _counter_key: &str,
        _delta: i64,
        _index_key: &str,
        _member: &str,
    ) -> Result<i64, KvError> {
        Err(down())
    }
}

/// Posts keyed by id; listings return every stored post.
#[derive(Default)]
pub struct InMemoryPosts {
    posts: Mutex<HashMap<i64, FullPost>>,
    views: Mutex<HashMap<i64, i64>>,
    next_id: AtomicUsize,
    pub find_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub last_limit: AtomicU32,
    pub search_calls: AtomicUsize,
}

impl InMemoryPosts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, id: i64, title: &str) {
        let post = FullPost {
            post: post_record(id, Uuid::nil(), title),
            author: AuthorSummary {
                username: "author".to_string(),
                display_name: None,
                avatar_url: None,
            },
            tags: Vec::new(),
        };
        self.posts.lock().expect("posts").insert(id, post);
    }

    pub fn views(&self, id: i64) -> i64 {
        self.views
            .lock()
            .expect("views")
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    fn listing(&self, limit: u32) -> Vec<FullPost> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        let mut posts: Vec<FullPost> = self.posts.lock().expect("posts").values().cloned().collect();
        posts.sort_by_key(|post| post.post.id);
        posts.truncate(limit as usize);
        posts
    }
}

pub fn post_record(id: i64, author_id: Uuid, title: &str) -> PostRecord {
    PostRecord {
        id,
        author_id,
        title: title.to_string(),
        content: "content".to_string(),
        feed_view: "content".to_string(),
        views: 0,
        likes: 0,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
        validated: true,
        not_validated_msg: None,
    }
}

#[async_trait]
impl PostsRepo for InMemoryPosts {
    async fn find_post(&self, id: i64) -> Result<Option<FullPost>, RepoError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.posts.lock().expect("posts").get(&id).cloned())
    }

    async fn list_author_posts(
        &self,
        _author_id: Uuid,
        limit: u32,
        _offset: u32,
    ) -> Result<Vec<AuthorPost>, RepoError> {
        Ok(self
            .listing(limit)
            .into_iter()
            .map(|full| AuthorPost {
                post: full.post,
                tags: full.tags,
            })
            .collect())
    }

    async fn list_user_likes(
        &self,
        _user_id: Uuid,
        limit: u32,
        _offset: u32,
    ) -> Result<Vec<FullPost>, RepoError> {
        Ok(self.listing(limit))
    }

    async fn list_trending(
        &self,
        _since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<FullPost>, RepoError> {
        Ok(self.listing(limit))
    }

    async fn search_by_title(
        &self,
        title: &str,
        limit: u32,
        _offset: u32,
    ) -> Result<Vec<FullPost>, RepoError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let needle = title.to_lowercase();
        Ok(self
            .listing(limit)
            .into_iter()
            .filter(|post| post.post.title.to_lowercase().contains(&needle))
            .collect())
    }

    async fn increment_views(&self, id: i64) -> Result<(), RepoError> {
        *self.views.lock().expect("views").entry(id).or_insert(0) += 1;
        Ok(())
    }
}

#[async_trait]
impl PostsWriteRepo for InMemoryPosts {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 100;
        let mut record = post_record(id, params.author_id, &params.title);
        record.content = params.content;
        record.feed_view = params.feed_view;
        let full = FullPost {
            post: record.clone(),
            author: AuthorSummary {
                username: "author".to_string(),
                display_name: None,
                avatar_url: None,
            },
            tags: params.tags,
        };
        self.posts.lock().expect("posts").insert(id, full);
        Ok(record)
    }
}

impl InMemoryPosts {
    pub fn tags(&self, id: i64) -> Vec<String> {
        self.posts
            .lock()
            .expect("posts")
            .get(&id)
            .map(|post| post.tags.clone())
            .unwrap_or_default()
    }
}

/// Publisher that records every notification.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<PostCreatedMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish_post_created(&self, message: &PostCreatedMessage) -> Result<(), PublishError> {
        self.published.lock().expect("published").push(message.clone());
        Ok(())
    }
}

/// Polls `check` until it holds or a second of tokio time passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
