//! Provider abstraction over chat-completion endpoints.
//!
//! Every generative call in the engine funnels through [`Provider`]: the
//! main narrator turn, memory summarization, the intersection precheck, and
//! background NPC simulation. Each call names the endpoint it wants, so
//! settings-level capability overrides resolve outside this module.

use crate::settings::EndpointConfig;
use async_trait::async_trait;
use llm::{AbortHandle, ChatClient, Message, Request, ResponseFormat};
use thiserror::Error;

/// Errors from provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider call failed: {0}")]
    Call(String),

    #[error("Request aborted")]
    Aborted,
}

impl From<llm::Error> for ProviderError {
    fn from(e: llm::Error) -> Self {
        match e {
            llm::Error::Aborted => ProviderError::Aborted,
            other => ProviderError::Call(other.to_string()),
        }
    }
}

/// Per-call options.
pub struct CallOptions<'a> {
    /// Ask the endpoint for a bare JSON object.
    pub json: bool,
    /// Stream the response, surfacing accumulated text through `on_text`.
    pub stream: bool,
    /// Observer for accumulated text so far (streaming calls only).
    pub on_text: Option<&'a (dyn Fn(&str) + Send + Sync)>,
    /// Cooperative cancellation, checked at suspension points.
    pub abort: AbortHandle,
}

impl Default for CallOptions<'_> {
    fn default() -> Self {
        Self {
            json: false,
            stream: false,
            on_text: None,
            abort: AbortHandle::new(),
        }
    }
}

/// A completed provider call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Opaque response id, when the endpoint supplied one.
    pub id: Option<String>,
    pub text: String,
}

/// A chat-completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(
        &self,
        endpoint: &EndpointConfig,
        system: &str,
        user: &str,
        options: CallOptions<'_>,
    ) -> Result<Completion, ProviderError>;
}

/// The production provider, backed by [`llm::ChatClient`].
#[derive(Debug, Default, Clone)]
pub struct ChatProvider;

impl ChatProvider {
    pub fn new() -> Self {
        Self
    }

    fn client(endpoint: &EndpointConfig) -> ChatClient {
        ChatClient::new(endpoint.api_key.clone(), endpoint.model.clone())
            .with_base_url(endpoint.base_url.clone())
    }

    fn request(endpoint: &EndpointConfig, system: &str, user: &str, json: bool) -> Request {
        let mut request = Request::new(vec![Message::user(user)])
            .with_system(system)
            .with_max_tokens(endpoint.max_tokens);
        if let Some(temperature) = endpoint.temperature {
            request = request.with_temperature(temperature);
        }
        if json {
            request = request.with_response_format(ResponseFormat::JsonObject);
        }
        request
    }
}

#[async_trait]
impl Provider for ChatProvider {
    async fn generate(
        &self,
        endpoint: &EndpointConfig,
        system: &str,
        user: &str,
        options: CallOptions<'_>,
    ) -> Result<Completion, ProviderError> {
        if options.abort.is_aborted() {
            return Err(ProviderError::Aborted);
        }
        let client = Self::client(endpoint);
        let request = Self::request(endpoint, system, user, options.json);

        if options.stream {
            let (id, text) = client
                .stream_accumulated(request, &options.abort, |accumulated| {
                    if let Some(on_text) = options.on_text {
                        on_text(accumulated);
                    }
                })
                .await?;
            if options.abort.is_aborted() {
                return Err(ProviderError::Aborted);
            }
            Ok(Completion { id, text })
        } else {
            let response = client.complete(request).await?;
            if options.abort.is_aborted() {
                return Err(ProviderError::Aborted);
            }
            Ok(Completion {
                id: if response.id.is_empty() {
                    None
                } else {
                    Some(response.id)
                },
                text: response.text,
            })
        }
    }
}
