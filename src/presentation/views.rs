use crate::application::error::{ErrorReport, HttpError};
use crate::application::forms::FormErrors;
use crate::application::pagination::Page;
use crate::domain::entities::{CommentRecord, GroupRecord, PostRecord, UserRecord};
use crate::domain::posts::{format_human_date, format_iso_date, title_preview};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

/// URL prefix under which stored uploads are served.
pub const MEDIA_URL: &str = "/media/";

const SITE_TITLE: &str = "Yatube";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(viewer: Option<UserRecord>) -> Response {
    let view = LayoutContext::new(viewer, "Page not found", ErrorPageView::not_found());
    let mut response = render_template_response(ErrorTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Shared page frame: who is looking and what the tab is called.
#[derive(Clone)]
pub struct LayoutContext<T> {
    pub site_title: &'static str,
    pub title: String,
    pub viewer: Option<UserRecord>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(viewer: Option<UserRecord>, title: impl Into<String>, content: T) -> Self {
        Self {
            site_title: SITE_TITLE,
            title: title.into(),
            viewer,
            content,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.viewer.is_some()
    }
}

/// A stored post plus the display strings templates need.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCard {
    pub post: PostRecord,
    pub author_name: String,
    pub published: String,
    pub iso_date: String,
    pub image_url: Option<String>,
}

impl PostCard {
    pub fn from_record(post: PostRecord) -> Self {
        Self {
            author_name: post.author.full_name(),
            published: format_human_date(post.pub_date),
            iso_date: format_iso_date(post.pub_date),
            image_url: post.image.as_deref().map(media_url),
            post,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentView {
    pub comment: CommentRecord,
    pub author_name: String,
    pub created: String,
}

impl CommentView {
    pub fn from_record(comment: CommentRecord) -> Self {
        Self {
            author_name: comment.author.full_name(),
            created: format_human_date(comment.created),
            comment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOption {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

/// Post form as rendered: submitted or initial values plus field errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFormView {
    pub text: String,
    pub group: Option<String>,
    pub groups: Vec<GroupOption>,
    pub current_image_url: Option<String>,
    pub errors: FormErrors,
}

impl PostFormView {
    pub fn new(
        text: String,
        group: Option<String>,
        groups: &[GroupRecord],
        current_image: Option<&str>,
        errors: FormErrors,
    ) -> Self {
        let selected = group.as_deref().map(str::trim).unwrap_or_default();
        let groups = groups
            .iter()
            .map(|record| GroupOption {
                id: record.id,
                title: record.title.clone(),
                selected: record.id.to_string() == selected,
            })
            .collect();

        Self {
            text,
            group,
            groups,
            current_image_url: current_image.map(media_url),
            errors,
        }
    }

    pub fn is_bound_with_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn no_group_selected(&self) -> bool {
        !self.groups.iter().any(|option| option.selected)
    }

    pub fn text_errors(&self) -> &[String] {
        self.errors.get("text")
    }

    pub fn group_errors(&self) -> &[String] {
        self.errors.get("group")
    }

    pub fn image_errors(&self) -> &[String] {
        self.errors.get("image")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentFormView {
    pub text: String,
    pub errors: FormErrors,
}

impl CommentFormView {
    pub fn text_errors(&self) -> &[String] {
        self.errors.get("text")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexContext {
    pub page_obj: Page<PostCard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupContext {
    pub page_obj: Page<PostCard>,
    pub group: GroupRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileContext {
    pub page_obj: Page<PostCard>,
    pub author: UserRecord,
    pub author_name: String,
    /// The viewer follows this author.
    pub following: bool,
    /// The viewer is signed in and is not the author.
    pub can_follow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostDetailContext {
    pub post: PostCard,
    pub author: UserRecord,
    pub author_post_count: u64,
    pub comments: Vec<CommentView>,
    pub form: CommentFormView,
    pub can_edit: bool,
}

impl PostDetailContext {
    pub fn title(&self) -> String {
        title_preview(&self.post.post.text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostFormContext {
    pub form: PostFormView,
    pub is_edit: bool,
    pub post_id: Option<i64>,
}

impl PostFormContext {
    pub fn action(&self) -> String {
        match self.post_id {
            Some(id) if self.is_edit => format!("/posts/{id}/edit/"),
            _ => "/create/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FollowContext {
    pub page_obj: Page<PostCard>,
}

/// Every page the site renders, one statically typed context per page.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewContext {
    Index(IndexContext),
    Group(GroupContext),
    Profile(ProfileContext),
    PostDetail(PostDetailContext),
    PostForm(PostFormContext),
    Follow(FollowContext),
}

impl ViewContext {
    pub fn template_name(&self) -> &'static str {
        match self {
            ViewContext::Index(_) => "posts/index.html",
            ViewContext::Group(_) => "posts/group_list.html",
            ViewContext::Profile(_) => "posts/profile.html",
            ViewContext::PostDetail(_) => "posts/post_detail.html",
            ViewContext::PostForm(_) => "posts/create_post.html",
            ViewContext::Follow(_) => "posts/follow.html",
        }
    }

    /// The paginated post listing, for pages that have one.
    pub fn page_obj(&self) -> Option<&Page<PostCard>> {
        match self {
            ViewContext::Index(ctx) => Some(&ctx.page_obj),
            ViewContext::Group(ctx) => Some(&ctx.page_obj),
            ViewContext::Profile(ctx) => Some(&ctx.page_obj),
            ViewContext::Follow(ctx) => Some(&ctx.page_obj),
            ViewContext::PostDetail(_) | ViewContext::PostForm(_) => None,
        }
    }

    pub fn title(&self) -> String {
        match self {
            ViewContext::Index(_) => "Latest posts".to_string(),
            ViewContext::Group(ctx) => format!("Posts of group {}", ctx.group.title),
            ViewContext::Profile(ctx) => format!("Profile of {}", ctx.author_name),
            ViewContext::PostDetail(ctx) => format!("Post {}", ctx.title()),
            ViewContext::PostForm(ctx) if ctx.is_edit => "Edit post".to_string(),
            ViewContext::PostForm(_) => "New post".to_string(),
            ViewContext::Follow(_) => "Posts of followed authors".to_string(),
        }
    }

    pub fn render(self, viewer: Option<UserRecord>) -> Response {
        let title = self.title();
        match self {
            ViewContext::Index(content) => render_template_response(
                IndexTemplate {
                    view: LayoutContext::new(viewer, title, content),
                },
                StatusCode::OK,
            ),
            ViewContext::Group(content) => render_template_response(
                GroupListTemplate {
                    view: LayoutContext::new(viewer, title, content),
                },
                StatusCode::OK,
            ),
            ViewContext::Profile(content) => render_template_response(
                ProfileTemplate {
                    view: LayoutContext::new(viewer, title, content),
                },
                StatusCode::OK,
            ),
            ViewContext::PostDetail(content) => render_template_response(
                PostDetailTemplate {
                    view: LayoutContext::new(viewer, title, content),
                },
                StatusCode::OK,
            ),
            ViewContext::PostForm(content) => render_template_response(
                CreatePostTemplate {
                    view: LayoutContext::new(viewer, title, content),
                },
                StatusCode::OK,
            ),
            ViewContext::Follow(content) => render_template_response(
                FollowTemplate {
                    view: LayoutContext::new(viewer, title, content),
                },
                StatusCode::OK,
            ),
        }
    }
}

#[derive(Template)]
#[template(path = "posts/index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<IndexContext>,
}

#[derive(Template)]
#[template(path = "posts/group_list.html")]
pub struct GroupListTemplate {
    pub view: LayoutContext<GroupContext>,
}

#[derive(Template)]
#[template(path = "posts/profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileContext>,
}

#[derive(Template)]
#[template(path = "posts/post_detail.html")]
pub struct PostDetailTemplate {
    pub view: LayoutContext<PostDetailContext>,
}

#[derive(Template)]
#[template(path = "posts/create_post.html")]
pub struct CreatePostTemplate {
    pub view: LayoutContext<PostFormContext>,
}

#[derive(Template)]
#[template(path = "posts/follow.html")]
pub struct FollowTemplate {
    pub view: LayoutContext<FollowContext>,
}

pub struct ErrorPageView {
    pub heading: String,
    pub message: String,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            heading: "Page not found".to_string(),
            message: "The page you requested does not exist.".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "core/error.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}

pub fn media_url(path: &str) -> String {
    format!("{MEDIA_URL}{}", path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pagination::Paginator;
    use time::macros::datetime;

    fn author() -> UserRecord {
        UserRecord {
            id: 1,
            username: "author".to_string(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    fn post(id: i64) -> PostRecord {
        PostRecord {
            id,
            text: format!("text {id}"),
            pub_date: datetime!(2023-01-02 03:04:05 UTC),
            author: author(),
            group: None,
            image: Some("posts/small.gif".to_string()),
        }
    }

    #[test]
    fn post_card_keeps_record_and_formats_display() {
        let card = PostCard::from_record(post(1));
        assert_eq!(card.post, post(1));
        assert_eq!(card.author_name, "author");
        assert_eq!(card.published, "2 January 2023");
        assert_eq!(card.image_url.as_deref(), Some("/media/posts/small.gif"));
    }

    #[test]
    fn view_contexts_map_to_templates() {
        let page = Paginator::default().paginate(vec![PostCard::from_record(post(1))], None);
        let index = ViewContext::Index(IndexContext {
            page_obj: page.clone(),
        });
        assert_eq!(index.template_name(), "posts/index.html");
        assert_eq!(index.page_obj().map(Page::len), Some(1));

        let form = ViewContext::PostForm(PostFormContext {
            form: PostFormView::default(),
            is_edit: false,
            post_id: None,
        });
        assert_eq!(form.template_name(), "posts/create_post.html");
        assert!(form.page_obj().is_none());
    }

    fn second_page_of_thirteen() -> Page<PostCard> {
        let cards = (1..=13).map(|id| PostCard::from_record(post(id))).collect();
        Paginator::default().paginate(cards, Some("2"))
    }

    #[test]
    fn listing_templates_render_cards_and_page_links() {
        let group = GroupRecord {
            id: 1,
            slug: "cats".to_string(),
            title: "Cats".to_string(),
            description: String::new(),
        };
        let pages = [
            render_template(IndexTemplate {
                view: LayoutContext::new(
                    None,
                    "Latest posts",
                    IndexContext {
                        page_obj: second_page_of_thirteen(),
                    },
                ),
            }),
            render_template(GroupListTemplate {
                view: LayoutContext::new(
                    None,
                    "Posts of group Cats",
                    GroupContext {
                        page_obj: second_page_of_thirteen(),
                        group,
                    },
                ),
            }),
            render_template(ProfileTemplate {
                view: LayoutContext::new(
                    Some(author()),
                    "Profile of author",
                    ProfileContext {
                        page_obj: second_page_of_thirteen(),
                        author: author(),
                        author_name: "author".to_string(),
                        following: false,
                        can_follow: false,
                    },
                ),
            }),
            render_template(FollowTemplate {
                view: LayoutContext::new(
                    Some(author()),
                    "Posts of followed authors",
                    FollowContext {
                        page_obj: second_page_of_thirteen(),
                    },
                ),
            }),
        ];

        for page in pages {
            let Html(body) = page.unwrap_or_else(|_| panic!("listing renders"));
            assert_eq!(body.matches("class=\"post-card\"").count(), 3);
            assert!(body.contains("text 13"));
            assert!(body.contains("<li class=\"active\"><span>2</span></li>"));
            assert!(body.contains("<a href=\"?page=1\">1</a>"));
        }
    }

    #[test]
    fn empty_listing_renders_without_page_links() {
        let empty = Paginator::default().paginate(Vec::<PostCard>::new(), None);
        let Html(body) = render_template(IndexTemplate {
            view: LayoutContext::new(None, "Latest posts", IndexContext { page_obj: empty }),
        })
        .unwrap_or_else(|_| panic!("index renders"));
        assert!(body.contains("No posts yet."));
        assert!(!body.contains("class=\"pagination\""));
    }

    #[test]
    fn form_action_depends_on_mode() {
        let create = PostFormContext {
            form: PostFormView::default(),
            is_edit: false,
            post_id: None,
        };
        let edit = PostFormContext {
            is_edit: true,
            post_id: Some(5),
            ..create.clone()
        };
        assert_eq!(create.action(), "/create/");
        assert_eq!(edit.action(), "/posts/5/edit/");
    }

    #[test]
    fn post_form_view_marks_selected_group() {
        let groups = [
            GroupRecord {
                id: 1,
                slug: "cats".to_string(),
                title: "Cats".to_string(),
                description: String::new(),
            },
            GroupRecord {
                id: 2,
                slug: "dogs".to_string(),
                title: "Dogs".to_string(),
                description: String::new(),
            },
        ];
        let view = PostFormView::new(
            "text".to_string(),
            Some("2".to_string()),
            &groups,
            None,
            FormErrors::new(),
        );
        assert!(!view.groups[0].selected);
        assert!(view.groups[1].selected);
        assert!(!view.no_group_selected());
    }
}
