//! Testing utilities.
//!
//! `MockProvider` stands in for a chat-completion backend so session and
//! module tests run deterministically without network access. Scripted
//! responses are returned in order; every call is recorded for assertion.

use crate::provider::{CallOptions, Completion, Provider, ProviderError};
use async_trait::async_trait;
use std::sync::Mutex;

/// One recorded provider call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub system: String,
    pub user: String,
    pub json: bool,
    pub stream: bool,
}

/// A provider that returns scripted responses in order.
pub struct MockProvider {
    responses: Mutex<Vec<String>>,
    calls: Mutex<Vec<RecordedCall>>,
    fail: bool,
}

impl MockProvider {
    /// A provider with no scripted responses. Any call fails.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Scripted responses, returned first to last.
    pub fn with_responses<S: Into<String>>(responses: Vec<S>) -> Self {
        let mut scripted: Vec<String> = responses.into_iter().map(Into::into).collect();
        scripted.reverse();
        Self {
            responses: Mutex::new(scripted),
            calls: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A provider whose every call returns an error.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// How many calls reached the provider.
    pub fn call_count(&self) -> usize {
        match self.calls.lock() {
            Ok(calls) => calls.len(),
            Err(_) => 0,
        }
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(
        &self,
        endpoint: &crate::settings::EndpointConfig,
        system: &str,
        user: &str,
        options: CallOptions<'_>,
    ) -> Result<Completion, ProviderError> {
        if options.abort.is_aborted() {
            return Err(ProviderError::Aborted);
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                model: endpoint.model.clone(),
                system: system.to_string(),
                user: user.to_string(),
                json: options.json,
                stream: options.stream,
            });
        }
        if self.fail {
            return Err(ProviderError::Call("scripted failure".to_string()));
        }
        let next = self.responses.lock().ok().and_then(|mut r| r.pop());
        match next {
            Some(text) => {
                if options.stream {
                    if let Some(on_text) = options.on_text {
                        on_text(&text);
                    }
                }
                Ok(Completion {
                    id: Some(format!("mock-{}", self.call_count())),
                    text,
                })
            }
            None => Err(ProviderError::Call("no scripted response left".to_string())),
        }
    }
}

/// Build a provider reply with one narrative line and no state commands.
pub fn narration_reply(text: &str) -> String {
    serde_json::json!({
        "logs": [{ "sender": "Narrator", "text": text }],
        "shortTerm": text,
        "tavern_commands": [],
        "action_options": []
    })
    .to_string()
}
