//! LoRA Personality Adapters
//!
//! Keeps one personality adapter loaded on the inference server and pushes
//! tone-specific generation parameters to it. When the server does not answer
//! its health check at startup the service stays disabled and every call
//! reports "not available".

use crate::personality::Tone;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub const NOT_AVAILABLE: &str = "LoRA service not available";

/// Sampling parameters sent to the server
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

/// Parameters for `tone`, starting from the configured defaults. The tone
/// shifts the configured temperature (friendly +0.1, formal -0.3, gen-z +0.2,
/// clamped to 0..=2). Conversations longer than 10 items cool it by 10%.
pub fn generation_params(tone: Tone, context_len: usize, max_tokens: u32, temperature: f32) -> GenerationParams {
    let (offset, top_p, frequency_penalty, presence_penalty) = match tone {
        Tone::Friendly => (0.1, 0.9, 0.1, 0.1),
        Tone::Formal => (-0.3, 0.8, 0.0, 0.0),
        Tone::GenZ => (0.2, 0.95, 0.2, 0.15),
    };
    let mut temperature = (temperature + offset).clamp(0.0, 2.0);
    if context_len > 10 {
        temperature *= 0.9;
    }
    GenerationParams {
        max_tokens,
        temperature,
        top_p,
        frequency_penalty,
        presence_penalty,
    }
}

/// Result of `optimize_for_personality`
#[derive(Debug, Clone, Serialize)]
pub struct LoraOptimization {
    pub success: bool,
    pub tone: Tone,
    pub adapter: Option<String>,
    pub parameters: Option<GenerationParams>,
    pub error: Option<String>,
}

impl LoraOptimization {
    fn failed(tone: Tone, error: impl Into<String>) -> Self {
        Self {
            success: false,
            tone,
            adapter: None,
            parameters: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterInfo {
    pub tone: Tone,
    pub name: String,
    pub description: String,
    pub loaded: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoraStats {
    pub enabled: bool,
    pub current_adapter: Option<Tone>,
    pub server_url: String,
    pub adapters_path: String,
    pub adapters: Vec<AdapterInfo>,
}

#[derive(Debug, Default)]
struct LoraState {
    current: Option<Tone>,
    loaded: HashSet<Tone>,
}

/// Adapter manager for the inference server
pub struct LoraService {
    client: reqwest::Client,
    server_url: String,
    adapters_path: PathBuf,
    max_tokens: u32,
    temperature: f32,
    enabled: AtomicBool,
    state: Mutex<LoraState>,
}

impl LoraService {
    pub fn new(server_url: &str, adapters_path: impl Into<PathBuf>, max_tokens: u32, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
            adapters_path: adapters_path.into(),
            max_tokens,
            temperature,
            enabled: AtomicBool::new(false),
            state: Mutex::new(LoraState::default()),
        })
    }

    fn adapter_path(&self, tone: Tone) -> PathBuf {
        self.adapters_path.join(tone.adapter_dir())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Health check, placeholder adapters, default adapter. Returns whether
    /// the service is enabled.
    pub async fn initialize(&self) -> bool {
        if let Err(e) = self.check_server().await {
            error!("Failed to initialize LoRA service: {:#}", e);
            warn!("LoRA service disabled - inference server not available");
            self.enabled.store(false, Ordering::Relaxed);
            return false;
        }

        self.verify_adapters().await;
        self.enabled.store(true, Ordering::Relaxed);

        if !self.load_adapter(Tone::default()).await {
            warn!("Default LoRA adapter did not load");
        }
        info!("LoRA service initialized");
        true
    }

    async fn check_server(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.server_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("Inference server not available")?;
        if !response.status().is_success() {
            anyhow::bail!("Inference server unhealthy: {}", response.status());
        }
        Ok(())
    }

    async fn verify_adapters(&self) {
        let mut missing = Vec::new();
        for tone in Tone::ALL {
            if !adapter_exists(&self.adapter_path(tone)).await {
                missing.push(tone);
            }
        }
        if missing.is_empty() {
            return;
        }

        warn!("Missing LoRA adapters: {:?}", missing);
        info!("Creating placeholder adapters for development...");
        for tone in missing {
            match create_placeholder(&self.adapter_path(tone), tone).await {
                Ok(()) => info!("Created placeholder adapter: {}", tone),
                Err(e) => error!("Failed to create placeholder adapter {}: {:#}", tone, e),
            }
        }
    }

    /// Make `tone` the active adapter. Already-active is a no-op.
    pub async fn load_adapter(&self, tone: Tone) -> bool {
        if !self.is_enabled() {
            debug!("LoRA operation skipped - service not available");
            return false;
        }

        let mut state = self.state.lock().await;
        if state.current == Some(tone) && state.loaded.contains(&tone) {
            debug!("LoRA adapter {} already loaded", tone);
            return true;
        }

        if let Some(current) = state.current.filter(|c| *c != tone) {
            match self.unload(current).await {
                Ok(()) => {
                    state.loaded.remove(&current);
                }
                Err(e) => warn!("Failed to unload adapter {}: {:#}", current.adapter_name(), e),
            }
        }

        match self.load_via_api(tone).await {
            Ok(()) => {
                state.loaded.insert(tone);
                state.current = Some(tone);
                info!("LoRA adapter '{}' loaded", tone);
                true
            }
            Err(e) => {
                error!("Failed to load LoRA adapter '{}': {:#}", tone, e);
                false
            }
        }
    }

    async fn load_via_api(&self, tone: Tone) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/adapters", self.server_url))
            .json(&serde_json::json!({
                "adapter_name": tone.adapter_name(),
                "adapter_path": self.adapter_path(tone).to_string_lossy(),
                "adapter_type": "lora"
            }))
            .send()
            .await
            .context("Adapter load request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("adapter load failed: {} - {}", status, body);
        }
        Ok(())
    }

    async fn unload(&self, tone: Tone) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1/adapters/{}", self.server_url, tone.adapter_name()))
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .context("Adapter unload request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("adapter unload failed: {}", response.status());
        }
        debug!("LoRA adapter unloaded: {}", tone.adapter_name());
        Ok(())
    }

    pub async fn current_adapter(&self) -> Option<Tone> {
        self.state.lock().await.current
    }

    /// Load the tone's adapter and push its generation parameters
    pub async fn optimize_for_personality(&self, tone: Tone, context_len: usize) -> LoraOptimization {
        if !self.is_enabled() {
            debug!("LoRA optimization skipped - service not available");
            return LoraOptimization::failed(tone, NOT_AVAILABLE);
        }
        if !self.load_adapter(tone).await {
            return LoraOptimization::failed(tone, format!("Failed to load adapter for {}", tone));
        }

        let params = generation_params(tone, context_len, self.max_tokens, self.temperature);
        let applied = match self.apply_params(&params).await {
            Ok(()) => true,
            Err(e) => {
                error!("Parameter application failed: {:#}", e);
                false
            }
        };

        LoraOptimization {
            success: applied,
            tone,
            adapter: Some(tone.adapter_name().to_string()),
            parameters: Some(params),
            error: None,
        }
    }

    async fn apply_params(&self, params: &GenerationParams) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/config", self.server_url))
            .timeout(Duration::from_secs(10))
            .json(&serde_json::json!({ "generation_params": params }))
            .send()
            .await
            .context("Config request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("config rejected: {}", response.status());
        }
        Ok(())
    }

    pub async fn list_adapters(&self) -> Vec<AdapterInfo> {
        let state = self.state.lock().await;
        let mut adapters = Vec::with_capacity(Tone::ALL.len());
        for tone in Tone::ALL {
            adapters.push(AdapterInfo {
                tone,
                name: tone.adapter_name().to_string(),
                description: tone.description().to_string(),
                loaded: state.loaded.contains(&tone),
                available: adapter_exists(&self.adapter_path(tone)).await,
            });
        }
        adapters
    }

    pub async fn stats(&self) -> LoraStats {
        LoraStats {
            enabled: self.is_enabled(),
            current_adapter: self.current_adapter().await,
            server_url: self.server_url.clone(),
            adapters_path: self.adapters_path.display().to_string(),
            adapters: self.list_adapters().await,
        }
    }
}

async fn adapter_exists(dir: &Path) -> bool {
    let config = tokio::fs::try_exists(dir.join("adapter_config.json")).await.unwrap_or(false);
    let model = tokio::fs::try_exists(dir.join("adapter_model.bin")).await.unwrap_or(false);
    config && model
}

async fn create_placeholder(dir: &Path, tone: Tone) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let config = serde_json::json!({
        "peft_type": "LORA",
        "task_type": "CAUSAL_LM",
        "r": 16,
        "lora_alpha": 32,
        "lora_dropout": 0.1,
        "target_modules": ["q_proj", "v_proj"],
        "personality": tone.as_str(),
        "base_model_name_or_path": "meta-llama/Meta-Llama-3-8B-Instruct"
    });
    tokio::fs::write(dir.join("adapter_config.json"), serde_json::to_vec_pretty(&config)?).await?;
    tokio::fs::write(dir.join("adapter_model.bin"), b"").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn healthy_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/config"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_generation_params_per_tone() {
        let formal = generation_params(Tone::Formal, 0, 800, 0.7);
        assert!((formal.temperature - 0.4).abs() < 1e-6);
        assert_eq!(formal.top_p, 0.8);
        assert_eq!(formal.max_tokens, 800);

        let genz = generation_params(Tone::GenZ, 0, 800, 0.7);
        assert!((genz.temperature - 0.9).abs() < 1e-6);
        assert_eq!((genz.frequency_penalty, genz.presence_penalty), (0.2, 0.15));

        let long = generation_params(Tone::Friendly, 11, 800, 0.7);
        assert!((long.temperature - 0.72).abs() < 1e-6);
        let ten = generation_params(Tone::Friendly, 10, 800, 0.7);
        assert!((ten.temperature - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_generation_params_follow_configured_temperature() {
        let cool = generation_params(Tone::Friendly, 0, 800, 0.2);
        assert!((cool.temperature - 0.3).abs() < 1e-6);
        let hot = generation_params(Tone::Friendly, 0, 800, 1.2);
        assert!((hot.temperature - 1.3).abs() < 1e-6);

        assert_eq!(generation_params(Tone::Formal, 0, 800, 0.1).temperature, 0.0);
        assert_eq!(generation_params(Tone::GenZ, 0, 800, 1.95).temperature, 2.0);
    }

    #[tokio::test]
    async fn test_initialize_creates_placeholders_and_loads_default() {
        let server = healthy_server().await;
        Mock::given(method("POST"))
            .and(path("/v1/adapters"))
            .and(body_partial_json(serde_json::json!({"adapter_name": "eva-friendly-lora", "adapter_type": "lora"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let lora = LoraService::new(&server.uri(), dir.path(), 800, 0.7).unwrap();
        assert!(lora.initialize().await);
        assert_eq!(lora.current_adapter().await, Some(Tone::Friendly));

        for tone in Tone::ALL {
            let adapter = dir.path().join(tone.adapter_dir());
            assert!(adapter.join("adapter_config.json").exists());
            assert!(adapter.join("adapter_model.bin").exists());
        }
        let raw = std::fs::read_to_string(dir.path().join("eva-genz/adapter_config.json")).unwrap();
        let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(config["r"], 16);
        assert_eq!(config["personality"], "gen-z");

        // Already current: no second POST
        assert!(lora.load_adapter(Tone::Friendly).await);
    }

    #[tokio::test]
    async fn test_switch_unloads_previous_adapter() {
        let server = healthy_server().await;
        Mock::given(method("POST"))
            .and(path("/v1/adapters"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/adapters/eva-friendly-lora"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let lora = LoraService::new(&server.uri(), dir.path(), 800, 0.7).unwrap();
        lora.initialize().await;

        let result = lora.optimize_for_personality(Tone::Formal, 2).await;
        assert!(result.success);
        assert_eq!(result.adapter.as_deref(), Some("eva-formal-lora"));
        assert!((result.parameters.unwrap().temperature - 0.4).abs() < 1e-6);
        assert_eq!(lora.current_adapter().await, Some(Tone::Formal));

        let listing = lora.list_adapters().await;
        assert!(listing.iter().all(|a| a.available));
        assert_eq!(listing.iter().filter(|a| a.loaded).count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_when_server_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let lora = LoraService::new(&server.uri(), dir.path(), 800, 0.7).unwrap();
        assert!(!lora.initialize().await);
        assert!(!lora.load_adapter(Tone::Formal).await);

        let result = lora.optimize_for_personality(Tone::Formal, 0).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NOT_AVAILABLE));
        assert!(!lora.stats().await.enabled);
    }
}
