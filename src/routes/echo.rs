use async_trait::async_trait;
use bytes::Bytes;

use crate::router::{Access, Handler, HandlerError, RequestContext};
use crate::types::RouteId;

pub const ROUTE_ID: RouteId = 1;

/// Sends the raw payload straight back; used by clients as a liveness check
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    fn access(&self) -> Access {
        Access::Authenticated
    }

    async fn call(&self, ctx: &mut RequestContext, payload: Bytes) -> Result<Bytes, HandlerError> {
        tracing::debug!("Echo {} bytes for session {}", payload.len(), ctx.session.id());
        Ok(payload)
    }
}
