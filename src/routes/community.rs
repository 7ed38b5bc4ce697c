use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{page_limit, require};
use crate::backend::PostQuery;
use crate::router::{Empty, HandlerError, Reply, RequestContext, Route};
use crate::types::{CommunityPost, PostChanges, PostId, RouteId, UserId};

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

pub struct CreatePost;
pub struct DeletePost;
pub struct ListPosts;
pub struct UpdatePost;

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct DeletePostRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub post_id: PostId,
}

#[derive(Debug, Deserialize)]
pub struct ListPostsRequest {
    #[serde(default)]
    pub user_id: UserId,
    /// RFC3339 cursor: only posts created strictly before it
    #[serde(default)]
    pub before_id: Option<String>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_attachment: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub post_id: PostId,
    #[serde(flatten)]
    pub changes: PostChanges,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub post: CommunityPost,
}

#[derive(Debug, Serialize)]
pub struct ListPostsResponse {
    pub posts: Vec<CommunityPost>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_before: Option<String>,
}

fn parse_cursor(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, HandlerError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|_| HandlerError::invalid("before_id must be an RFC3339 timestamp")),
    }
}

fn normalize_changes(changes: PostChanges) -> Result<PostChanges, HandlerError> {
    if changes.is_empty() {
        return Err(HandlerError::invalid("no fields to update"));
    }
    let title = match changes.title {
        Some(title) if title.trim().is_empty() => {
            return Err(HandlerError::invalid("title cannot be empty"))
        }
        title => title.map(|t| t.trim().to_string()),
    };
    Ok(PostChanges {
        title,
        body: changes.body.map(|b| b.trim().to_string()),
    })
}

#[async_trait]
impl Route for CreatePost {
    const ID: RouteId = 701;
    type Request = CreatePostRequest;
    type Response = PostResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: CreatePostRequest,
    ) -> Result<Reply<PostResponse>, HandlerError> {
        require(&[
            ("user_id", req.user_id.as_str()),
            ("title", req.title.as_str()),
            ("body", req.body.as_str()),
        ])?;
        ctx.authorize(&req.user_id)?;

        let post = ctx
            .state
            .backend
            .create_post(&req.user_id, req.title.trim(), req.body.trim())
            .await
            .map_err(HandlerError::backend("failed to create post"))?;

        Ok(Reply::new("post created", PostResponse { post }))
    }
}

#[async_trait]
impl Route for DeletePost {
    const ID: RouteId = 702;
    type Request = DeletePostRequest;
    type Response = Empty;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: DeletePostRequest,
    ) -> Result<Reply<Empty>, HandlerError> {
        require(&[("user_id", req.user_id.as_str()), ("post_id", req.post_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        ctx.state
            .backend
            .delete_post(&req.post_id, &req.user_id)
            .await
            .map_err(HandlerError::backend("failed to delete post"))?;

        Ok(Reply::new("post deleted", Empty {}))
    }
}

#[async_trait]
impl Route for ListPosts {
    const ID: RouteId = 710;
    type Request = ListPostsRequest;
    type Response = ListPostsResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: ListPostsRequest,
    ) -> Result<Reply<ListPostsResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str())])?;
        ctx.authorize(&req.user_id)?;

        let query = PostQuery {
            before: parse_cursor(req.before_id.as_deref())?,
            limit: page_limit(req.limit, DEFAULT_PAGE, MAX_PAGE),
            include_attachments: req.include_attachment,
        };
        let page = ctx
            .state
            .backend
            .list_posts(&query)
            .await
            .map_err(HandlerError::backend("failed to list posts"))?;

        let next_before = page
            .posts
            .last()
            .map(|post| post.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true));

        Ok(Reply::new(
            "posts fetched",
            ListPostsResponse {
                posts: page.posts,
                has_more: page.has_more,
                next_before,
            },
        ))
    }
}

#[async_trait]
impl Route for UpdatePost {
    const ID: RouteId = 711;
    type Request = UpdatePostRequest;
    type Response = PostResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: UpdatePostRequest,
    ) -> Result<Reply<PostResponse>, HandlerError> {
        require(&[("user_id", req.user_id.as_str()), ("post_id", req.post_id.as_str())])?;
        ctx.authorize(&req.user_id)?;
        let changes = normalize_changes(req.changes)?;

        let post = ctx
            .state
            .backend
            .update_post(&req.post_id, &req.user_id, &changes)
            .await
            .map_err(HandlerError::backend("failed to update post"))?;

        Ok(Reply::new("post updated", PostResponse { post }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::Harness;
    use serde_json::json;

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor(None).unwrap(), None);
        assert_eq!(parse_cursor(Some("  ")).unwrap(), None);

        let at = parse_cursor(Some("2024-05-01T12:00:00+02:00")).unwrap().unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T10:00:00+00:00");

        let err = parse_cursor(Some("yesterday")).unwrap_err();
        assert_eq!(err.client_message(), "before_id must be an RFC3339 timestamp");
    }

    #[tokio::test]
    async fn test_post_lifecycle() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;

        let created = harness
            .call(&alice, 701, json!({"user_id": "alice", "title": " Hi ", "body": "first"}))
            .await;
        assert_eq!(created["message"], "post created");
        assert_eq!(created["post"]["title"], "Hi");
        let post_id = created["post"]["id"].as_str().unwrap().to_string();

        let updated = harness
            .call(
                &alice,
                711,
                json!({"user_id": "alice", "post_id": post_id, "body": "edited"}),
            )
            .await;
        assert_eq!(updated["message"], "post updated");
        assert_eq!(updated["post"]["body"], "edited");
        assert_eq!(updated["post"]["title"], "Hi");

        let deleted = harness
            .call(&alice, 702, json!({"user_id": "alice", "post_id": post_id}))
            .await;
        assert_eq!(deleted, json!({"success": true, "message": "post deleted"}));
    }

    #[tokio::test]
    async fn test_other_authors_post_is_untouched() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;
        let bob = harness.client(Some("bob")).await;
        let created = harness
            .call(&alice, 701, json!({"user_id": "alice", "title": "t", "body": "b"}))
            .await;
        let post_id = created["post"]["id"].as_str().unwrap().to_string();

        let reply = harness
            .call(&bob, 702, json!({"user_id": "bob", "post_id": post_id}))
            .await;
        assert_eq!(reply, json!({"success": false, "message": "failed to delete post"}));

        let reply = harness
            .call(&bob, 711, json!({"user_id": "bob", "post_id": post_id, "title": "mine"}))
            .await;
        assert_eq!(reply["message"], "failed to update post");
    }

    #[tokio::test]
    async fn test_update_needs_a_field() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;
        let reply = harness
            .call(&alice, 711, json!({"user_id": "alice", "post_id": "p1"}))
            .await;
        assert_eq!(reply, json!({"success": false, "message": "no fields to update"}));
        assert_eq!(harness.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_list_posts_cursor() {
        let harness = Harness::new();
        let alice = harness.client(Some("alice")).await;
        for i in 0..3 {
            harness
                .call(
                    &alice,
                    701,
                    json!({"user_id": "alice", "title": format!("t{}", i), "body": "b"}),
                )
                .await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let first = harness
            .call(&alice, 710, json!({"user_id": "alice", "limit": 2}))
            .await;
        assert_eq!(first["message"], "posts fetched");
        assert_eq!(first["has_more"], true);
        assert_eq!(first["posts"][0]["title"], "t2");
        assert_eq!(first["posts"][1]["title"], "t1");

        let cursor = first["next_before"].as_str().unwrap().to_string();
        let rest = harness
            .call(&alice, 710, json!({"user_id": "alice", "before_id": cursor}))
            .await;
        assert_eq!(rest["has_more"], false);
        assert_eq!(rest["posts"].as_array().unwrap().len(), 1);
        assert_eq!(rest["posts"][0]["title"], "t0");

        let bad = harness
            .call(&alice, 710, json!({"user_id": "alice", "before_id": "soon"}))
            .await;
        assert_eq!(bad["message"], "before_id must be an RFC3339 timestamp");
    }
}
