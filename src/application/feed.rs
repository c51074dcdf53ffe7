use std::sync::Arc;

use thiserror::Error;

use crate::application::pagination::{Page, Paginator};
use crate::application::repos::{
    CommentsRepo, FollowsRepo, GroupsRepo, PostQueryFilter, PostsRepo, RepoError, UsersRepo,
};
use crate::domain::entities::UserRecord;
use crate::domain::error::DomainError;
use crate::presentation::views::{
    CommentFormView, CommentView, FollowContext, GroupContext, IndexContext, PostCard,
    PostDetailContext, ProfileContext,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Read side of the site: every listing and the post detail page.
#[derive(Clone)]
pub struct FeedService {
    users: Arc<dyn UsersRepo>,
    groups: Arc<dyn GroupsRepo>,
    posts: Arc<dyn PostsRepo>,
    comments: Arc<dyn CommentsRepo>,
    follows: Arc<dyn FollowsRepo>,
    paginator: Paginator,
}

impl FeedService {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        groups: Arc<dyn GroupsRepo>,
        posts: Arc<dyn PostsRepo>,
        comments: Arc<dyn CommentsRepo>,
        follows: Arc<dyn FollowsRepo>,
    ) -> Self {
        Self {
            users,
            groups,
            posts,
            comments,
            follows,
            paginator: Paginator::default(),
        }
    }

    pub async fn index(&self, page: Option<&str>) -> Result<IndexContext, FeedError> {
        let page_obj = self.paginate_posts(PostQueryFilter::all(), page).await?;
        Ok(IndexContext { page_obj })
    }

    pub async fn group_posts(
        &self,
        slug: &str,
        page: Option<&str>,
    ) -> Result<GroupContext, FeedError> {
        let group = self
            .groups
            .find_by_slug(slug)
            .await?
            .ok_or(DomainError::not_found("group"))?;
        let page_obj = self
            .paginate_posts(PostQueryFilter::group(group.id), page)
            .await?;
        Ok(GroupContext { page_obj, group })
    }

    pub async fn profile(
        &self,
        username: &str,
        page: Option<&str>,
        viewer: Option<&UserRecord>,
    ) -> Result<ProfileContext, FeedError> {
        let author = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(DomainError::not_found("user"))?;
        let page_obj = self
            .paginate_posts(PostQueryFilter::author(author.id), page)
            .await?;

        let (following, can_follow) = match viewer {
            Some(viewer) if viewer.id != author.id => {
                let existing = self.follows.find_follow(viewer.id, author.id).await?;
                (existing.is_some(), true)
            }
            _ => (false, false),
        };

        Ok(ProfileContext {
            page_obj,
            author_name: author.full_name(),
            author,
            following,
            can_follow,
        })
    }

    pub async fn post_detail(
        &self,
        post_id: i64,
        viewer: Option<&UserRecord>,
    ) -> Result<PostDetailContext, FeedError> {
        let post = self
            .posts
            .find_by_id(post_id)
            .await?
            .ok_or(DomainError::not_found("post"))?;
        let author_post_count = self
            .posts
            .count_posts(&PostQueryFilter::author(post.author.id))
            .await?;
        let comments = self
            .comments
            .list_for_post(post.id)
            .await?
            .into_iter()
            .map(CommentView::from_record)
            .collect();

        let can_edit = viewer.is_some_and(|viewer| viewer.id == post.author.id);
        let author = post.author.clone();

        Ok(PostDetailContext {
            post: PostCard::from_record(post),
            author,
            author_post_count,
            comments,
            form: CommentFormView::default(),
            can_edit,
        })
    }

    /// Posts by authors the viewer follows.
    pub async fn follow_index(
        &self,
        viewer: &UserRecord,
        page: Option<&str>,
    ) -> Result<FollowContext, FeedError> {
        let page_obj = self
            .paginate_posts(PostQueryFilter::followed_by(viewer.id), page)
            .await?;
        Ok(FollowContext { page_obj })
    }

    async fn paginate_posts(
        &self,
        filter: PostQueryFilter,
        page: Option<&str>,
    ) -> Result<Page<PostCard>, FeedError> {
        let count = self.posts.count_posts(&filter).await?;
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        let window = self.paginator.get_page(count, page);

        let posts = if window.count == 0 {
            Vec::new()
        } else {
            self.posts.list_posts(&filter, window.request()).await?
        };

        Ok(Page::new(window, posts).map(PostCard::from_record))
    }
}
