//! Streaming chat handler
//!
//! POST /api/chat takes the conversation so far and streams assistant
//! token chunks as server-sent events. The per-identifier rate limit is
//! checked before any model work begins; the stream terminates on
//! completion or client disconnect (dropping the SSE body cancels the
//! producer chain).

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use loreforge_common::errors::Result;
use loreforge_common::types::{ChatMessage, Role};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::middleware::rate_limit::check_identifier;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<IncomingMessage>,

    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

impl IncomingMessage {
    fn into_message(self) -> ChatMessage {
        let role = match self.role.as_str() {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        };
        ChatMessage {
            role,
            content: self.content,
        }
    }
}

/// Stream one chat turn
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let identifier = body.session_id.as_deref().unwrap_or("anonymous").to_string();
    check_identifier(state.cache.as_ref(), &state.config.rate_limit, &identifier).await?;

    let messages: Vec<ChatMessage> = body
        .messages
        .into_iter()
        .map(IncomingMessage::into_message)
        .collect();

    let (_setup, receiver) = state.orchestrator.run_turn(messages).await?;

    let stream = ReceiverStream::new(receiver).map(|chunk| {
        let event = match chunk {
            // SSE forbids carriage returns inside data lines
            Ok(text) => Event::default().data(text.replace('\r', "")),
            Err(e) => {
                tracing::warn!(error = %e, "Stream error mid-turn");
                Event::default()
                    .event("error")
                    .data("The answer stream was interrupted.")
            }
        };
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_roles_mapped() {
        let user = IncomingMessage {
            role: "user".into(),
            content: "hi".into(),
        };
        assert_eq!(user.into_message().role, Role::User);

        let assistant = IncomingMessage {
            role: "assistant".into(),
            content: "hello".into(),
        };
        assert_eq!(assistant.into_message().role, Role::Assistant);

        // Unknown roles default to user
        let odd = IncomingMessage {
            role: "narrator".into(),
            content: "…".into(),
        };
        assert_eq!(odd.into_message().role, Role::User);
    }

    #[test]
    fn test_body_deserializes_session_id() {
        let body: ChatBody = serde_json::from_str(
            r#"{"messages": [{"role": "user", "content": "hi"}], "sessionId": "s-1"}"#,
        )
        .unwrap();
        assert_eq!(body.session_id.as_deref(), Some("s-1"));
        assert_eq!(body.messages.len(), 1);
    }
}
