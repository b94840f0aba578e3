//! Generative model layer: the Claude Messages API client and the backend
//! trait the agents program against.

pub mod client;

pub use client::ClaudeClient;

use async_trait::async_trait;

use crate::error::PipelineError;
use client::{ApiResponse, Message, Tool};

/// Seam between the agents and the actual generative model.
///
/// The agents only need "send a conversation with optional tools, get a
/// response back". Tests substitute scripted implementations so the
/// orchestration logic stays deterministic.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn send(
        &self,
        system: Option<&str>,
        messages: Vec<Message>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ApiResponse, PipelineError>;
}

#[async_trait]
impl ModelBackend for ClaudeClient {
    async fn send(
        &self,
        system: Option<&str>,
        messages: Vec<Message>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ApiResponse, PipelineError> {
        self.request(system, messages, tools).await
    }
}
