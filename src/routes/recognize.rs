use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::require;
use crate::router::{HandlerError, Reply, RequestContext, Route};
use crate::types::RouteId;

/// Identify a recorded clip through the configured recognizer
pub struct RecognizeSong;

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    /// Base64-encoded audio (standard alphabet, padded)
    #[serde(default)]
    pub audio_data: String,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub result: serde_json::Value,
}

#[async_trait]
impl Route for RecognizeSong {
    const ID: RouteId = 401;
    type Request = RecognizeRequest;
    type Response = RecognizeResponse;

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: RecognizeRequest,
    ) -> Result<Reply<RecognizeResponse>, HandlerError> {
        require(&[("audio_data", req.audio_data.as_str())])?;
        let audio = req.audio_data.trim();
        if base64::engine::general_purpose::STANDARD.decode(audio).is_err() {
            return Err(HandlerError::invalid("audio_data must be base64"));
        }

        let Some(recognizer) = ctx.state.recognizer.clone() else {
            return Err(HandlerError::Unavailable("song recognition is not configured"));
        };
        let result = recognizer
            .recognize(audio)
            .await
            .map_err(HandlerError::backend("recognition failed"))?;

        Ok(Reply::new("recognition complete", RecognizeResponse { result }))
    }
}
