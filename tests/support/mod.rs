//! In-memory repositories and router wiring shared by the integration tests.

#![allow(dead_code)]

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use axum::http::HeaderName;
use sqlx::Error as SqlxError;
use tempfile::TempDir;
use time::{Duration, OffsetDateTime, macros::datetime};
use yatube::{
    application::{
        authoring::AuthoringService,
        feed::FeedService,
        pagination::PageRequest,
        repos::{
            CommentsRepo, CreateCommentParams, CreateGroupParams, CreatePostParams,
            CreateUserParams, FollowsRepo, GroupsRepo, PostQueryFilter, PostsRepo,
            PostsWriteRepo, RepoError, UpdatePostParams, UsersRepo,
        },
    },
    domain::entities::{CommentRecord, FollowRecord, GroupRecord, PostRecord, UserRecord},
    infra::{
        cache::PageCache,
        http::{HealthCheck, HttpState},
        uploads::UploadStorage,
    },
};

pub const USER_HEADER: &str = "x-remote-user";

// 1x1 GIF.
pub const SMALL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x02, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x0C, 0x0A, 0x00, 0x3B,
];

#[derive(Default)]
struct Tables {
    users: Vec<UserRecord>,
    groups: Vec<GroupRecord>,
    posts: Vec<StoredPost>,
    comments: Vec<StoredComment>,
    follows: Vec<FollowRecord>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user(&self, id: i64) -> Result<UserRecord, RepoError> {
        self.users
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or_else(|| RepoError::Integrity {
                message: format!("user {id} does not exist"),
            })
    }

    fn group(&self, id: Option<i64>) -> Result<Option<GroupRecord>, RepoError> {
        match id {
            None => Ok(None),
            Some(id) => self
                .groups
                .iter()
                .find(|group| group.id == id)
                .cloned()
                .map(Some)
                .ok_or_else(|| RepoError::Integrity {
                    message: format!("group {id} does not exist"),
                }),
        }
    }

    fn record(&self, post: &StoredPost) -> Result<PostRecord, RepoError> {
        Ok(PostRecord {
            id: post.id,
            text: post.text.clone(),
            pub_date: post.pub_date,
            author: self.user(post.author_id)?,
            group: self.group(post.group_id)?,
            image: post.image.clone(),
        })
    }

    fn matches(&self, post: &StoredPost, filter: &PostQueryFilter) -> bool {
        filter.group_id.is_none_or(|id| post.group_id == Some(id))
            && filter.author_id.is_none_or(|id| post.author_id == id)
            && filter.followed_by.is_none_or(|user_id| {
                self.follows
                    .iter()
                    .any(|follow| follow.user_id == user_id && follow.author_id == post.author_id)
            })
    }
}

#[derive(Clone)]
struct StoredPost {
    id: i64,
    text: String,
    pub_date: OffsetDateTime,
    author_id: i64,
    group_id: Option<i64>,
    image: Option<String>,
}

#[derive(Clone)]
struct StoredComment {
    id: i64,
    post_id: i64,
    author_id: i64,
    text: String,
    created: OffsetDateTime,
}

/// Thread-safe store standing in for Postgres.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    reject_post_writes: AtomicBool,
}

const EPOCH: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("store lock")
    }

    /// Make every later post insert or update fail as if the database timed out.
    pub fn reject_post_writes(&self) {
        self.reject_post_writes.store(true, Ordering::SeqCst);
    }

    fn check_post_write(&self) -> Result<(), RepoError> {
        if self.reject_post_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }

    pub fn add_user(&self, username: &str) -> UserRecord {
        let mut tables = self.lock();
        let user = UserRecord {
            id: tables.next_id(),
            username: username.to_string(),
            first_name: String::new(),
            last_name: String::new(),
        };
        tables.users.push(user.clone());
        user
    }

    pub fn add_group(&self, slug: &str, title: &str) -> GroupRecord {
        let mut tables = self.lock();
        let group = GroupRecord {
            id: tables.next_id(),
            slug: slug.to_string(),
            title: title.to_string(),
            description: format!("About {title}"),
        };
        tables.groups.push(group.clone());
        group
    }

    /// Insert a post; later inserts get later publication dates.
    pub fn add_post(&self, author: &UserRecord, text: &str, group: Option<&GroupRecord>) -> i64 {
        let mut tables = self.lock();
        let id = tables.next_id();
        tables.posts.push(StoredPost {
            id,
            text: text.to_string(),
            pub_date: EPOCH + Duration::minutes(id),
            author_id: author.id,
            group_id: group.map(|group| group.id),
            image: None,
        });
        id
    }

    pub fn add_follow(&self, user: &UserRecord, author: &UserRecord) {
        let mut tables = self.lock();
        let id = tables.next_id();
        tables.follows.push(FollowRecord {
            id,
            user_id: user.id,
            author_id: author.id,
        });
    }

    /// Rewrite a post behind the services' back.
    pub fn set_post_text(&self, post_id: i64, text: &str) {
        let mut tables = self.lock();
        if let Some(post) = tables.posts.iter_mut().find(|post| post.id == post_id) {
            post.text = text.to_string();
        }
    }

    pub fn post(&self, post_id: i64) -> Option<PostRecord> {
        let tables = self.lock();
        tables
            .posts
            .iter()
            .find(|post| post.id == post_id)
            .and_then(|post| tables.record(post).ok())
    }

    pub fn posts_count(&self) -> usize {
        self.lock().posts.len()
    }

    pub fn latest_post(&self) -> Option<PostRecord> {
        let tables = self.lock();
        tables
            .posts
            .iter()
            .max_by_key(|post| post.id)
            .and_then(|post| tables.record(post).ok())
    }

    pub fn comments_count(&self, post_id: i64) -> usize {
        self.lock()
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .count()
    }

    pub fn follows_count(&self) -> usize {
        self.lock().follows.len()
    }
}

#[async_trait]
impl UsersRepo for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        let mut tables = self.lock();
        if tables
            .users
            .iter()
            .any(|user| user.username == params.username)
        {
            return Err(RepoError::Duplicate {
                constraint: "users_username_key".to_string(),
            });
        }
        let user = UserRecord {
            id: tables.next_id(),
            username: params.username,
            first_name: params.first_name,
            last_name: params.last_name,
        };
        tables.users.push(user.clone());
        Ok(user)
    }
}

#[async_trait]
impl GroupsRepo for MemoryStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self
            .lock()
            .groups
            .iter()
            .find(|group| group.slug == slug)
            .cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let mut groups = self.lock().groups.clone();
        groups.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(groups)
    }

    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
        let mut tables = self.lock();
        if tables.groups.iter().any(|group| group.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "groups_slug_key".to_string(),
            });
        }
        let group = GroupRecord {
            id: tables.next_id(),
            slug: params.slug,
            title: params.title,
            description: params.description,
        };
        tables.groups.push(group.clone());
        Ok(group)
    }
}

#[async_trait]
impl PostsRepo for MemoryStore {
    async fn count_posts(&self, filter: &PostQueryFilter) -> Result<u64, RepoError> {
        let tables = self.lock();
        let count = tables
            .posts
            .iter()
            .filter(|post| tables.matches(post, filter))
            .count();
        Ok(count as u64)
    }

    async fn list_posts(
        &self,
        filter: &PostQueryFilter,
        page: PageRequest,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let tables = self.lock();
        let mut posts: Vec<&StoredPost> = tables
            .posts
            .iter()
            .filter(|post| tables.matches(post, filter))
            .collect();
        posts.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));
        posts
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|post| tables.record(post))
            .collect()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<PostRecord>, RepoError> {
        let tables = self.lock();
        tables
            .posts
            .iter()
            .find(|post| post.id == id)
            .map(|post| tables.record(post))
            .transpose()
    }
}

#[async_trait]
impl PostsWriteRepo for MemoryStore {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        self.check_post_write()?;
        let mut tables = self.lock();
        tables.user(params.author_id)?;
        tables.group(params.group_id)?;
        let id = tables.next_id();
        let post = StoredPost {
            id,
            text: params.text,
            pub_date: EPOCH + Duration::minutes(id),
            author_id: params.author_id,
            group_id: params.group_id,
            image: params.image,
        };
        tables.posts.push(post.clone());
        tables.record(&post)
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        self.check_post_write()?;
        let mut tables = self.lock();
        tables.group(params.group_id)?;
        let post = tables
            .posts
            .iter_mut()
            .find(|post| post.id == params.id)
            .ok_or(RepoError::NotFound)?;
        post.text = params.text;
        post.group_id = params.group_id;
        post.image = params.image;
        let post = post.clone();
        tables.record(&post)
    }

    async fn delete_post(&self, id: i64) -> Result<(), RepoError> {
        let mut tables = self.lock();
        let before = tables.posts.len();
        tables.posts.retain(|post| post.id != id);
        if tables.posts.len() == before {
            return Err(RepoError::NotFound);
        }
        tables.comments.retain(|comment| comment.post_id != id);
        Ok(())
    }
}

#[async_trait]
impl CommentsRepo for MemoryStore {
    async fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentRecord>, RepoError> {
        let tables = self.lock();
        tables
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .map(|comment| -> Result<CommentRecord, RepoError> {
                Ok(CommentRecord {
                    id: comment.id,
                    post_id: comment.post_id,
                    author: tables.user(comment.author_id)?,
                    text: comment.text.clone(),
                    created: comment.created,
                })
            })
            .collect()
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let mut tables = self.lock();
        let author = tables.user(params.author_id)?;
        let id = tables.next_id();
        let comment = StoredComment {
            id,
            post_id: params.post_id,
            author_id: params.author_id,
            text: params.text,
            created: EPOCH + Duration::minutes(id),
        };
        tables.comments.push(comment.clone());
        Ok(CommentRecord {
            id: comment.id,
            post_id: comment.post_id,
            author,
            text: comment.text,
            created: comment.created,
        })
    }
}

#[async_trait]
impl FollowsRepo for MemoryStore {
    async fn find_follow(
        &self,
        user_id: i64,
        author_id: i64,
    ) -> Result<Option<FollowRecord>, RepoError> {
        Ok(self
            .lock()
            .follows
            .iter()
            .find(|follow| follow.user_id == user_id && follow.author_id == author_id)
            .cloned())
    }

    async fn create_follow(
        &self,
        user_id: i64,
        author_id: i64,
    ) -> Result<FollowRecord, RepoError> {
        let mut tables = self.lock();
        if tables
            .follows
            .iter()
            .any(|follow| follow.user_id == user_id && follow.author_id == author_id)
        {
            return Err(RepoError::Duplicate {
                constraint: "follows_user_author_key".to_string(),
            });
        }
        let follow = FollowRecord {
            id: tables.next_id(),
            user_id,
            author_id,
        };
        tables.follows.push(follow.clone());
        Ok(follow)
    }

    async fn delete_follow(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let mut tables = self.lock();
        let before = tables.follows.len();
        tables
            .follows
            .retain(|follow| !(follow.user_id == user_id && follow.author_id == author_id));
        Ok(tables.follows.len() != before)
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health_check(&self) -> Result<(), SqlxError> {
        Ok(())
    }
}

pub fn feed_service(store: &Arc<MemoryStore>) -> FeedService {
    FeedService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
    )
}

pub fn authoring_service(store: &Arc<MemoryStore>, uploads: &TempDir) -> AuthoringService {
    let storage =
        Arc::new(UploadStorage::new(uploads.path().to_path_buf()).expect("upload storage"));
    AuthoringService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        storage,
    )
}

pub fn http_state(
    store: &Arc<MemoryStore>,
    uploads: &TempDir,
    cache: Option<PageCache>,
) -> HttpState {
    let upload_storage =
        Arc::new(UploadStorage::new(uploads.path().to_path_buf()).expect("upload storage"));
    HttpState {
        feed: Arc::new(feed_service(store)),
        authoring: Arc::new(authoring_service(store, uploads)),
        users: store.clone(),
        db: store.clone(),
        upload_storage,
        cache,
        user_header: HeaderName::from_static(USER_HEADER),
        upload_limit_bytes: 5 * 1024 * 1024,
    }
}
