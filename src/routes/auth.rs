use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::router::{Access, HandlerError, Reply, RequestContext, Route};
use crate::types::{RouteId, UserId};

/// Exchange a bearer token for a session identity
pub struct Authenticate;

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateResponse {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[async_trait]
impl Route for Authenticate {
    const ID: RouteId = 101;
    const ACCESS: Access = Access::Public;
    type Request = AuthenticateRequest;
    type Response = AuthenticateResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        request: AuthenticateRequest,
    ) -> Result<Reply<AuthenticateResponse>, HandlerError> {
        if ctx.session.is_authenticated() {
            return Err(HandlerError::AlreadyAuthenticated);
        }
        super::require(&[("token", request.token.as_str())])?;

        let identity = ctx
            .state
            .verifier
            .verify(request.token.trim())
            .await
            .map_err(HandlerError::backend("authentication failed"))?;

        ctx.state
            .sessions
            .authenticate(ctx.session.id(), identity.clone())
            .await?;

        Ok(Reply::new(
            "authenticated",
            AuthenticateResponse {
                user_id: identity.user_id,
                email: identity.email,
            },
        ))
    }
}
