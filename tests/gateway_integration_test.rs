//! Gateway Integration Tests
//!
//! Drives the gateway end to end without Telegram: in-process key-value and
//! vector stores, the hashing embedder and a mocked vLLM server.

use eva_bot::gateway::ReplyFormat;
use eva_bot::{
    ChatUser, Config, Gateway, HashingEmbedder, InMemoryKv, InMemoryVectorStore, KvStore,
    Services, Tone,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestEnvironment {
    _llm: MockServer,
    kv: Arc<InMemoryKv>,
    gateway: Gateway,
}

impl TestEnvironment {
    async fn new() -> Self {
        Self::with_config(Config::for_tests()).await
    }

    async fn with_config(mut config: Config) -> Self {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama-3-8b",
                "choices": [{"message": {"role": "assistant", "content": "Hello from Eva"}}],
                "usage": {"prompt_tokens": 20, "completion_tokens": 5, "total_tokens": 25}
            })))
            .mount(&llm)
            .await;
        config.ai.vllm_base_url = format!("{}/v1", llm.uri());

        let kv = Arc::new(InMemoryKv::new());
        let services = Services::with_backends(
            config,
            kv.clone(),
            Some(Arc::new(InMemoryVectorStore::new())),
            Arc::new(HashingEmbedder::default()),
        )
        .expect("Failed to wire services");

        Self {
            _llm: llm,
            kv,
            gateway: Gateway::new(Arc::new(services)),
        }
    }

    fn services(&self) -> &Arc<Services> {
        self.gateway.services()
    }
}

fn user(id: i64) -> ChatUser {
    ChatUser {
        id,
        first_name: "Asha".to_string(),
        username: Some("asha".to_string()),
    }
}

#[tokio::test]
async fn test_text_message_round_trip() {
    let env = TestEnvironment::new().await;
    let replies = env.gateway.handle_text(&user(1), "hi there").await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].text, "Hello from Eva");
    assert_eq!(replies[0].format, ReplyFormat::Markdown);

    let context = env.services().memory.get_recent_context("1", 5).await;
    assert_eq!(context.len(), 2);
    assert!(context.iter().any(|m| m.text == "hi there" && !m.is_bot_response()));
    assert!(context.iter().any(|m| m.text == "Hello from Eva" && m.is_bot_response()));
}

#[tokio::test]
async fn test_local_replies_cost_nothing() {
    let env = TestEnvironment::new().await;
    env.gateway.handle_text(&user(2), "what's new?").await;

    let costs = env.services().cost_guard.current_costs("2").await;
    assert_eq!(costs.user_daily, 0.0);
    assert_eq!(costs.global_monthly, 0.0);
}

#[tokio::test]
async fn test_tone_persists_per_user() {
    let env = TestEnvironment::new().await;
    let replies = env.gateway.handle_text(&user(3), "/tone gen-z").await;
    assert_eq!(replies[0].text, Tone::GenZ.confirmation());

    assert_eq!(env.gateway.user_tone("3").await, Tone::GenZ);
    assert_eq!(env.gateway.user_tone("4").await, Tone::Friendly);

    let replies = env.gateway.handle_text(&user(3), "/tone pirate").await;
    assert!(replies[0].text.starts_with("Please choose from:"));
    assert_eq!(env.gateway.user_tone("3").await, Tone::GenZ);
}

#[tokio::test]
async fn test_forget_clears_user_data() {
    let env = TestEnvironment::new().await;
    let alice = user(5);
    env.gateway.handle_text(&alice, "/tone formal").await;
    env.gateway.handle_text(&alice, "remember my cat Miso").await;
    env.gateway.handle_text(&user(6), "I am someone else").await;

    let replies = env.gateway.handle_text(&alice, "/forget").await;
    assert!(replies[0].text.contains("Data Cleared"));

    assert!(env.services().memory.get_recent_context("5", 10).await.is_empty());
    assert!(env.services().memory.search_memories("5", "cat", 5, 0.0).await.is_empty());
    assert_eq!(env.gateway.user_tone("5").await, Tone::Friendly);
    assert_eq!(env.services().memory.get_recent_context("6", 10).await.len(), 2);
}

#[tokio::test]
async fn test_rate_limit_denies_eleventh_message() {
    let env = TestEnvironment::new().await;
    let sender = user(7);

    for i in 0..10 {
        let replies = env.gateway.handle_text(&sender, &format!("message {}", i)).await;
        assert_eq!(replies[0].text, "Hello from Eva", "message {} should pass", i);
    }

    let replies = env.gateway.handle_text(&sender, "one more").await;
    assert!(replies[0].text.starts_with("⏰"));
    assert_eq!(replies[0].format, ReplyFormat::Plain);

    // Other users keep their own window
    let replies = env.gateway.handle_text(&user(8), "hello").await;
    assert_eq!(replies[0].text, "Hello from Eva");
}

#[tokio::test]
async fn test_budget_denial_stops_generation() {
    let mut config = Config::for_tests();
    config.performance.max_monthly_cost = 0.0;
    let env = TestEnvironment::with_config(config).await;

    let replies = env
        .gateway
        .handle_text(&user(9), "please write me a long story about dragons")
        .await;
    assert!(replies[0].text.contains("System monthly limit exceeded"));
    assert!(env.services().memory.get_recent_context("9", 5).await.is_empty());
}

#[tokio::test]
async fn test_store_outage_refuses_politely() {
    let env = TestEnvironment::new().await;
    env.kv.set_offline(true);

    // Rate limiter fails open, the budget check fails closed
    let replies = env.gateway.handle_text(&user(10), "are you there?").await;
    assert!(replies[0].text.contains("Budget check failed"));

    env.kv.set_offline(false);
    let replies = env.gateway.handle_text(&user(10), "are you there?").await;
    assert_eq!(replies[0].text, "Hello from Eva");
}

#[tokio::test]
async fn test_recall_and_why_use_history() {
    let env = TestEnvironment::new().await;
    let sender = user(11);

    let replies = env.gateway.handle_text(&sender, "/why").await;
    assert!(replies[0].text.contains("don't have any recent responses"));

    env.gateway.handle_text(&sender, "I love hiking in the Alps").await;

    let replies = env.gateway.handle_text(&sender, "/recall hiking").await;
    assert!(replies[0].text.starts_with("🧠 **Recalling: hiking**"));

    let replies = env.gateway.handle_text(&sender, "/why").await;
    assert!(replies[0].text.contains("My Reasoning Process"));
}

#[tokio::test]
async fn test_analyze_stores_insight() {
    let env = TestEnvironment::new().await;
    let replies = env.gateway.handle_text(&user(12), "/analyze solar power").await;

    assert_eq!(replies.len(), 2);
    assert!(replies[1].text.starts_with("🔍 **Deep Analysis: solar power**"));

    let stored = env.services().memory.get_recent_context("12", 5).await;
    assert!(stored
        .iter()
        .any(|m| m.interaction_type == "analysis" && m.text.starts_with("[Analysis] solar power")));
}

#[tokio::test]
async fn test_inline_query_answer() {
    let env = TestEnvironment::new().await;
    assert!(env.gateway.handle_inline(&user(13), "   ").await.is_none());

    let answer = env
        .gateway
        .handle_inline(&user(13), "what is the capital of France")
        .await
        .expect("inline answer");
    assert_eq!(answer.title, "Eva: what is the capital of France...");
    assert_eq!(answer.message_text, "Hello from Eva");
    assert_eq!(answer.description, "Hello from Eva");
}

#[tokio::test]
async fn test_commands_for_other_bots_are_ignored() {
    let env = TestEnvironment::new().await;
    env.gateway.set_bot_username("EvaBot");

    assert!(env.gateway.handle_text(&user(14), "/help@OtherBot").await.is_empty());
    let replies = env.gateway.handle_text(&user(14), "/help@EvaBot").await;
    assert!(replies[0].text.contains("Eva Help"));
}

#[tokio::test]
async fn test_voice_gets_text_notice() {
    let env = TestEnvironment::new().await;
    let replies = env.gateway.handle_voice(&user(15)).await;
    assert!(replies[0].text.contains("voice messages"));

    let keys = env.kv.keys("rate_limit:voice:*").await.unwrap();
    assert_eq!(keys.len(), 1);
}
