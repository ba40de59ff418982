//! AI Router
//!
//! Generates replies with a local OpenAI-compatible server first and the
//! hosted API second. Each attempt runs with the reasoned prompt and then
//! with the raw message before giving up with a fixed apology.

use crate::config::AiConfig;
use crate::cost_guard::CostGuard;
use crate::llm::{ChatClient, ChatMessage, ChatRequest, Completion, TokenUsage};
use crate::lora::{LoraOptimization, LoraService};
use crate::memory::Memory;
use crate::model_cache::{ModelInfo, ModelManager};
use crate::perf::PerformanceMonitor;
use crate::personality::Tone;
use crate::reasoning::{reason_and_respond, ReasoningService, ReasoningType};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const FALLBACK_RESPONSE: &str =
    "I'm having trouble processing your message right now. Please try again in a moment.";

/// Context items sent along to the hosted model
const HOSTED_CONTEXT_ITEMS: usize = 6;

/// Which backend produced a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResponseSource {
    #[serde(rename = "local_gpu")]
    LocalGpu,
    #[serde(rename = "openai_gpt4o")]
    Hosted,
    #[serde(rename = "fallback")]
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalGpu => "local_gpu",
            Self::Hosted => "openai_gpt4o",
            Self::Fallback => "fallback",
        }
    }
}

/// Generated reply plus how it was produced
#[derive(Debug, Clone, Serialize)]
pub struct AiResponse {
    pub success: bool,
    pub response: String,
    pub source: ResponseSource,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub reasoning_type: Option<ReasoningType>,
    pub complexity: Option<f64>,
    pub lora_adapter: Option<String>,
    pub personality_optimized: bool,
}

impl AiResponse {
    fn fallback() -> Self {
        Self {
            success: false,
            response: FALLBACK_RESPONSE.to_string(),
            source: ResponseSource::Fallback,
            model: None,
            usage: None,
            reasoning_type: None,
            complexity: None,
            lora_adapter: None,
            personality_optimized: false,
        }
    }

    fn from_completion(completion: Completion, source: ResponseSource, model: &str) -> Self {
        Self {
            success: true,
            response: completion.content,
            source,
            model: Some(model.to_string()),
            usage: Some(completion.usage),
            reasoning_type: None,
            complexity: None,
            lora_adapter: None,
            personality_optimized: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub local_ai: &'static str,
    pub openai: &'static str,
    pub lora_enabled: bool,
    pub models: ModelInfo,
}

/// Local-first reply generation
pub struct AiRouter {
    local: ChatClient,
    hosted: Option<ChatClient>,
    local_served_model: String,
    local_model_name: String,
    hosted_model: String,
    max_tokens: u32,
    temperature: f32,
    lora: Arc<LoraService>,
    reasoning: Arc<ReasoningService>,
    cost_guard: Arc<CostGuard>,
    perf: Arc<PerformanceMonitor>,
    models: Arc<ModelManager>,
}

impl AiRouter {
    pub fn new(
        config: &AiConfig,
        lora: Arc<LoraService>,
        reasoning: Arc<ReasoningService>,
        cost_guard: Arc<CostGuard>,
        perf: Arc<PerformanceMonitor>,
        models: Arc<ModelManager>,
    ) -> Result<Self> {
        let local = ChatClient::new(
            &config.vllm_base_url,
            Some(&config.vllm_api_key),
            Duration::from_secs(25),
        )?;
        let hosted = match &config.openai_api_key {
            Some(key) => {
                info!("Hosted AI client initialized ({})", config.openai_model);
                Some(ChatClient::new(&config.openai_base_url, Some(key), Duration::from_secs(30))?)
            }
            None => None,
        };

        Ok(Self {
            local,
            hosted,
            local_served_model: config.local_served_model.clone(),
            local_model_name: config.local_model_name.clone(),
            hosted_model: config.openai_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            lora,
            reasoning,
            cost_guard,
            perf,
            models,
        })
    }

    pub fn hosted_model(&self) -> &str {
        &self.hosted_model
    }

    /// Produce a reply. Never fails: the last resort is `FALLBACK_RESPONSE`.
    pub async fn generate_response(
        &self,
        message: &str,
        user_id: &str,
        context: &[Memory],
        tone: Tone,
    ) -> AiResponse {
        self.perf
            .track("text_response", self.generate(message, user_id, context, tone))
            .await
    }

    async fn generate(&self, message: &str, user_id: &str, context: &[Memory], tone: Tone) -> AiResponse {
        let lora = self.lora.optimize_for_personality(tone, context.len()).await;

        let analysis = self.reasoning.analyze_context(message, context, user_id).await;
        let reasoned = reason_and_respond(message, &analysis);

        if let Some(mut response) = self.try_backends(&reasoned.prompt, user_id, context, tone, &lora).await {
            info!("{} + reasoning for user {}", response.source.as_str(), user_id);
            response.reasoning_type = Some(reasoned.reasoning_type);
            response.complexity = Some(reasoned.complexity);
            response.lora_adapter = lora.adapter.clone();
            response.personality_optimized = lora.success;
            return response;
        }

        if reasoned.prompt != message {
            if let Some(response) = self.try_backends(message, user_id, context, tone, &lora).await {
                info!("{} fallback for user {}", response.source.as_str(), user_id);
                return response;
            }
        }

        warn!("All AI services failed for user {}", user_id);
        AiResponse::fallback()
    }

    async fn try_backends(
        &self,
        prompt: &str,
        user_id: &str,
        context: &[Memory],
        tone: Tone,
        lora: &LoraOptimization,
    ) -> Option<AiResponse> {
        match self.try_local(prompt, tone, lora).await {
            Ok(response) => return Some(response),
            Err(e) => warn!("Local AI request failed: {:#}", e),
        }

        let hosted = self.hosted.as_ref()?;
        match self.try_hosted(hosted, prompt, user_id, context, tone).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!("Hosted AI request failed: {:#}", e);
                None
            }
        }
    }

    /// Adapter and sampling come from this request's optimization, never
    /// from the server-wide current adapter
    async fn try_local(&self, prompt: &str, tone: Tone, lora: &LoraOptimization) -> Result<AiResponse> {
        let (max_tokens, temperature) = match &lora.parameters {
            Some(params) => (params.max_tokens, params.temperature),
            None => (self.max_tokens, self.temperature),
        };
        let request = ChatRequest {
            model: self.local_served_model.clone(),
            messages: local_messages(prompt, tone),
            max_tokens,
            temperature,
            stream: false,
            adapter_name: lora.adapter.clone(),
        };

        let completion = self
            .perf
            .track("model_inference", self.local.complete(&request))
            .await?;
        Ok(AiResponse::from_completion(completion, ResponseSource::LocalGpu, &self.local_model_name))
    }

    async fn try_hosted(
        &self,
        client: &ChatClient,
        prompt: &str,
        user_id: &str,
        context: &[Memory],
        tone: Tone,
    ) -> Result<AiResponse> {
        let request = ChatRequest {
            model: self.hosted_model.clone(),
            messages: hosted_messages(prompt, context, tone),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
            adapter_name: None,
        };

        let completion = client.complete(&request).await?;
        self.cost_guard
            .record_usage(
                user_id,
                &self.hosted_model,
                completion.usage.prompt_tokens,
                completion.usage.completion_tokens,
            )
            .await;
        Ok(AiResponse::from_completion(completion, ResponseSource::Hosted, &self.hosted_model))
    }

    pub async fn service_status(&self) -> ServiceStatus {
        let local_ai = match self.local.models_status().await {
            Ok(status) if status.is_success() => "healthy",
            Ok(_) => "unhealthy",
            Err(_) => "unreachable",
        };
        ServiceStatus {
            local_ai,
            openai: if self.hosted.is_some() { "available" } else { "not_configured" },
            lora_enabled: self.lora.is_enabled(),
            models: self.models.info(),
        }
    }
}

/// Short tone prompt and the message
pub fn local_messages(prompt: &str, tone: Tone) -> Vec<ChatMessage> {
    vec![ChatMessage::system(tone.local_prompt()), ChatMessage::user(prompt)]
}

/// Long tone prompt, recent context oldest first, then the message.
/// `context` is newest first, as recent-context lookups return it.
pub fn hosted_messages(prompt: &str, context: &[Memory], tone: Tone) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(tone.hosted_prompt())];
    let recent: Vec<&Memory> = context
        .iter()
        .filter(|m| !m.text.trim().is_empty())
        .take(HOSTED_CONTEXT_ITEMS)
        .collect();
    for item in recent.into_iter().rev() {
        messages.push(if item.is_bot_response() {
            ChatMessage::assistant(item.text.clone())
        } else {
            ChatMessage::user(item.text.clone())
        });
    }
    messages.push(ChatMessage::user(prompt));
    messages
}
