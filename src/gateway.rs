//! Bot Gateway
//!
//! Maps chat events to handlers that compose the services. Nothing here
//! touches Telegram types: handlers take a `ChatUser` and return the replies
//! to send, so the transport in `telegram.rs` stays thin.

use crate::ai::AiResponse;
use crate::memory::{hash_user_id, InteractionType, Memory};
use crate::personality::Tone;
use crate::rate_limit::Action;
use crate::services::Services;
use once_cell::sync::OnceCell;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Telegram's limit is 4096; leave room for formatting
pub const MAX_MESSAGE_LEN: usize = 4000;

const GENERIC_ERROR: &str = "Sorry, I encountered an error. Please try again.";

/// Sender of a chat event
#[derive(Debug, Clone)]
pub struct ChatUser {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

impl ChatUser {
    fn key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    Plain,
    Markdown,
}

/// One outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub format: ReplyFormat,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), format: ReplyFormat::Plain }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self { text: text.into(), format: ReplyFormat::Markdown }
    }
}

/// Answer to an inline query
#[derive(Debug, Clone)]
pub struct InlineAnswer {
    pub id: String,
    pub title: String,
    pub description: String,
    pub message_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Ask(String),
    Recall(String),
    Tone(Option<String>),
    Stats,
    Health,
    Forget,
    Dream,
    Why,
    Analyze(String),
    Summary,
    Usage,
    Unknown(String),
    /// `/cmd@otherbot` in a group
    ForOtherBot,
}

/// Parse `/cmd[@bot] args`. Returns `None` for plain text.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let parts: Vec<&str> = text.splitn(2, char::is_whitespace).collect();
    let head = &parts[0][1..];
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("").to_string();

    let (name, target) = match head.split_once('@') {
        Some((name, target)) => (name, Some(target)),
        None => (head, None),
    };
    if let (Some(target), Some(me)) = (target, bot_username) {
        if !target.eq_ignore_ascii_case(me) {
            return Some(Command::ForOtherBot);
        }
    }

    let command = match name.to_lowercase().as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "ask" => Command::Ask(args),
        "recall" => Command::Recall(args),
        "tone" => Command::Tone(args.split_whitespace().next().map(str::to_string)),
        "stats" => Command::Stats,
        "health" => Command::Health,
        "forget" => Command::Forget,
        "dream" => Command::Dream,
        "why" => Command::Why,
        "analyze" => Command::Analyze(args),
        "summary" => Command::Summary,
        "usage" => Command::Usage,
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

/// Split on char boundaries into pieces of at most `max` bytes
pub fn chunk_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = remaining
            .char_indices()
            .take_while(|(i, c)| i + c.len_utf8() <= max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or_else(|| remaining.chars().next().map(char::len_utf8).unwrap_or(remaining.len()));
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        remaining = rest;
    }
    chunks
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Gateway counters
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub messages: AtomicU64,
    pub commands: AtomicU64,
    pub inline_queries: AtomicU64,
    pub voice_messages: AtomicU64,
    pub rate_limited: AtomicU64,
    pub budget_denied: AtomicU64,
}

pub struct Gateway {
    services: Arc<Services>,
    bot_username: OnceCell<String>,
    stats: GatewayStats,
}

impl Gateway {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            bot_username: OnceCell::new(),
            stats: GatewayStats::default(),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// Set once the bot knows its own handle
    pub fn set_bot_username(&self, username: &str) {
        let _ = self.bot_username.set(username.to_string());
    }

    fn bot_username(&self) -> Option<&str> {
        self.bot_username.get().map(String::as_str)
    }

    // ============ Per-user tone ============

    fn tone_key(user_id: &str) -> String {
        format!("user_tone:{}", hash_user_id(user_id))
    }

    pub async fn user_tone(&self, user_id: &str) -> Tone {
        match self.services.kv.get(&Self::tone_key(user_id)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_default(),
            Ok(None) => Tone::default(),
            Err(e) => {
                warn!("Failed to read tone for {}: {}", user_id, e);
                Tone::default()
            }
        }
    }

    async fn set_user_tone(&self, user_id: &str, tone: Tone) -> bool {
        match self.services.kv.set(&Self::tone_key(user_id), tone.as_str()).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to store tone for {}: {}", user_id, e);
                false
            }
        }
    }

    // ============ Admission ============

    /// Rate limit, then budget. `Some(reply)` means the request is refused.
    async fn admit(&self, user_id: &str, action: Action, wait_message: &str, text: &str) -> Option<Reply> {
        let rate = self.services.rate_limiter.check_action(user_id, action).await;
        if !rate.allowed {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            let mut reply = wait_message.to_string();
            if rate.retry_after_secs > 0 {
                let _ = write!(reply, " (try again in {}s)", rate.retry_after_secs);
            }
            return Some(Reply::plain(reply));
        }

        let estimate = self
            .services
            .cost_guard
            .estimate_cost(text, self.services.ai.hosted_model());
        let budget = self.services.cost_guard.check_budget(user_id, estimate).await;
        if !budget.allowed {
            self.stats.budget_denied.fetch_add(1, Ordering::Relaxed);
            warn!("Budget denied for {}: {}", user_id, budget.reason);
            return Some(Reply::plain(format!("💸 {}. Please try again later.", budget.reason)));
        }
        None
    }

    async fn generate(&self, user_id: &str, message: &str, context_limit: usize) -> AiResponse {
        let context = self.services.memory.get_recent_context(user_id, context_limit).await;
        let tone = self.user_tone(user_id).await;
        self.services.ai.generate_response(message, user_id, &context, tone).await
    }

    /// Store the message, generate, store the reply
    async fn converse(&self, user_id: &str, text: &str) -> Vec<Reply> {
        self.services
            .memory
            .store_memory(user_id, text, InteractionType::UserMessage, 0.5, None)
            .await;

        let response = self.generate(user_id, text, 3).await;
        if !response.success {
            error!("AI response failed for user {}", user_id);
            return vec![Reply::plain(GENERIC_ERROR)];
        }

        self.services
            .memory
            .store_memory(user_id, &response.response, InteractionType::BotResponse, 0.4, None)
            .await;
        info!("Processed message for user {} | Source: {}", user_id, response.source.as_str());
        vec![Reply::markdown(response.response)]
    }

    // ============ Entry points ============

    /// Any text message, commands included
    pub async fn handle_text(&self, user: &ChatUser, text: &str) -> Vec<Reply> {
        if let Some(command) = parse_command(text, self.bot_username()) {
            return self.handle_command(user, command).await;
        }

        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        let user_id = user.key();
        if let Some(refused) = self
            .admit(&user_id, Action::Message, "⏰ Please wait a moment before sending another message.", text)
            .await
        {
            return vec![refused];
        }
        self.converse(&user_id, text).await
    }

    /// Voice and audio get a text notice
    pub async fn handle_voice(&self, user: &ChatUser) -> Vec<Reply> {
        self.stats.voice_messages.fetch_add(1, Ordering::Relaxed);
        let rate = self.services.rate_limiter.check_action(&user.key(), Action::Voice).await;
        if !rate.allowed {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            return vec![Reply::plain("🎤 Please wait before sending another voice message.")];
        }
        vec![Reply::plain(
            "🎤 I can't listen to voice messages yet. Please send me your message as text!",
        )]
    }

    /// One article with the AI answer, or nothing
    pub async fn handle_inline(&self, user: &ChatUser, query: &str) -> Option<InlineAnswer> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        self.stats.inline_queries.fetch_add(1, Ordering::Relaxed);

        let user_id = user.key();
        if self.admit(&user_id, Action::AiCommand, "", query).await.is_some() {
            return None;
        }

        let response = self.generate(&user_id, query, 3).await;
        if !response.success {
            return None;
        }

        let text = response.response;
        let description = if text.chars().count() > 100 {
            format!("{}...", truncate_chars(&text, 100))
        } else {
            text.clone()
        };
        Some(InlineAnswer {
            id: uuid::Uuid::new_v4().to_string(),
            title: format!("Eva: {}...", truncate_chars(query, 50)),
            description,
            message_text: text,
        })
    }

    pub async fn handle_command(&self, user: &ChatUser, command: Command) -> Vec<Reply> {
        self.stats.commands.fetch_add(1, Ordering::Relaxed);
        let user_id = user.key();

        match command {
            Command::Start => self.cmd_start(user).await,
            Command::Help => vec![Reply::markdown(HELP_TEXT)],
            Command::Ask(question) => self.cmd_ask(&user_id, &question).await,
            Command::Recall(topic) => self.cmd_recall(&user_id, &topic).await,
            Command::Tone(tone) => self.cmd_tone(&user_id, tone.as_deref()).await,
            Command::Stats => self.cmd_stats(&user_id).await,
            Command::Health => self.cmd_health().await,
            Command::Forget => self.cmd_forget(&user_id).await,
            Command::Dream => self.cmd_dream(&user_id).await,
            Command::Why => self.cmd_why(&user_id).await,
            Command::Analyze(topic) => self.cmd_analyze(&user_id, &topic).await,
            Command::Summary => self.cmd_summary(&user_id).await,
            Command::Usage => self.cmd_usage(&user_id).await,
            Command::Unknown(name) => vec![Reply::plain(format!("Unknown command /{}. Try /help", name))],
            Command::ForOtherBot => Vec::new(),
        }
    }

    // ============ Commands ============

    async fn cmd_start(&self, user: &ChatUser) -> Vec<Reply> {
        let inline_hint = match self.bot_username() {
            Some(name) => format!("Type `@{} <query>` in any chat!", name),
            None => "Mention me in any chat with a question!".to_string(),
        };
        let welcome = format!(
            "🧠 **Welcome to Eva, {}!**\n\n\
             I'm your intelligent AI assistant with memory.\n\n\
             **💬 Chat Commands:**\n\
             • `/ask <question>` - Ask me anything\n\
             • `/recall <topic>` - Search our conversation history\n\
             • `/tone <style>` - Change my personality (friendly/formal/gen-z)\n\n\
             **🧠 Memory & Stats:**\n\
             • `/stats` - View service status and usage\n\
             • `/health` - Check system health\n\
             • `/forget` - Clear your data (GDPR)\n\n\
             **💡 Inline Mode:**\n\
             {}\n\n\
             Ready to chat? Just send me a message! 🚀",
            user.first_name, inline_hint
        );

        let username = user.username.as_deref().unwrap_or("unknown");
        self.services
            .memory
            .store_memory(
                &user.key(),
                &format!("User started conversation: {} (@{})", user.first_name, username),
                InteractionType::System,
                0.3,
                None,
            )
            .await;
        info!("Start command for user {}", user.id);
        vec![Reply::markdown(welcome)]
    }

    async fn cmd_ask(&self, user_id: &str, question: &str) -> Vec<Reply> {
        if question.is_empty() {
            return vec![Reply::markdown(
                "Please provide a question after /ask\n\nExample: `/ask What is quantum computing?`",
            )];
        }
        if let Some(refused) = self
            .admit(user_id, Action::AiCommand, "⏰ Please wait before asking another question.", question)
            .await
        {
            return vec![refused];
        }
        self.converse(user_id, question).await
    }

    async fn cmd_recall(&self, user_id: &str, topic: &str) -> Vec<Reply> {
        if topic.is_empty() {
            return vec![Reply::markdown(
                "Please specify what to recall.\n\nExample: `/recall our AI discussion`",
            )];
        }

        let memories = self.services.memory.search_memories(user_id, topic, 5, 0.0).await;
        if memories.is_empty() {
            return vec![Reply::plain(format!(
                "I don't recall anything about '{}'. Try a different search term.",
                topic
            ))];
        }

        let mut response = format!("🧠 **Recalling: {}**\n\n", topic);
        for (i, memory) in memories.iter().enumerate() {
            let timestamp = if memory.timestamp.is_empty() { "Unknown time" } else { memory.timestamp.as_str() };
            let _ = write!(
                response,
                "**{}.** {} (similarity: {:.2})\n{}...\n\n",
                i + 1,
                timestamp,
                memory.similarity.unwrap_or(0.0),
                truncate_chars(&memory.text, 200)
            );
        }
        vec![Reply::markdown(response)]
    }

    async fn cmd_tone(&self, user_id: &str, requested: Option<&str>) -> Vec<Reply> {
        let Some(requested) = requested else {
            let current = self.user_tone(user_id).await;
            return vec![Reply::markdown(format!(
                "Current tone: **{}**\n\n\
                 Available tones:\n\
                 • `friendly` - Warm and casual\n\
                 • `formal` - Professional and precise\n\
                 • `gen-z` - Fun and trendy\n\n\
                 Usage: `/tone friendly`",
                current
            ))];
        };

        let tone: Tone = match requested.parse() {
            Ok(tone) => tone,
            Err(_) => {
                let names: Vec<&str> = Tone::ALL.iter().map(Tone::as_str).collect();
                return vec![Reply::plain(format!("Please choose from: {}", names.join(", ")))];
            }
        };

        if !self.set_user_tone(user_id, tone).await {
            return vec![Reply::plain("Sorry, I couldn't change my tone right now.")];
        }
        self.services
            .memory
            .store_memory(
                user_id,
                &format!("User changed tone to: {}", tone),
                InteractionType::ToneChange,
                0.2,
                None,
            )
            .await;
        vec![Reply::plain(tone.confirmation())]
    }

    async fn cmd_stats(&self, user_id: &str) -> Vec<Reply> {
        let ai = self.services.ai.service_status().await;
        let memory = self.services.memory.stats().await;
        let limiter = &self.services.rate_limiter;
        let remaining = limiter.remaining(user_id, Action::Message.limit_type()).await;
        let per_user = limiter.config().user.requests;
        let costs = self.services.cost_guard.current_costs(user_id).await;
        let tone = self.user_tone(user_id).await;

        let text = format!(
            "📊 **Service Status & Your Stats**\n\n\
             **🤖 AI Service:**\n\
             • Local AI: {}\n\
             • OpenAI: {}\n\
             • LoRA adapters: {}\n\n\
             **🧠 Memory Service:**\n\
             • Vector store: {}\n\
             • Collection count: {}\n\
             • Key-value store: {}\n\
             • Embedding model: {}\n\n\
             **📡 You:**\n\
             • Current tone: {} {}\n\
             • Messages left this minute: {}/{}\n\
             • Spent today: ₹{:.2}",
            ai.local_ai,
            ai.openai,
            if ai.lora_enabled { "enabled" } else { "not available" },
            memory.vector_store,
            memory.collection_count,
            memory.kv_backend,
            memory.embedding_model,
            tone,
            tone.emoji(),
            remaining,
            per_user,
            costs.user_daily
        );
        vec![Reply::markdown(text)]
    }

    async fn cmd_health(&self) -> Vec<Reply> {
        let health = self.services.health().await;
        let ai = self.services.ai.service_status().await;
        let mark = |ok: bool| if ok { "✅" } else { "❌" };

        let text = format!(
            "🏥 **System Health Check**\n\n\
             **🤖 AI Service:**\n\
             • Local AI: {} {}\n\
             • OpenAI: {} {}\n\
             • LoRA: {}\n\n\
             **🧠 Storage:**\n\
             • Key-value store: {} {}\n\
             • Vector memory: {}\n\n\
             **Overall:** {}",
            mark(ai.local_ai == "healthy"),
            ai.local_ai,
            mark(ai.openai == "available"),
            ai.openai,
            mark(ai.lora_enabled),
            mark(health.kv_connected),
            health.kv_backend,
            mark(health.memory_enabled),
            if health.status == "healthy" {
                "🟢 All systems operational"
            } else {
                "🟡 Some issues detected"
            }
        );
        vec![Reply::markdown(text)]
    }

    async fn cmd_forget(&self, user_id: &str) -> Vec<Reply> {
        let deleted = self.services.memory.delete_user_data(user_id).await;
        if let Err(e) = self.services.kv.del(&[Self::tone_key(user_id)]).await {
            warn!("Failed to clear tone for {}: {}", user_id, e);
        }
        self.services.rate_limiter.clear_user_limits(user_id).await;
        self.services.cost_guard.reset_user_costs(user_id, user_id).await;

        info!("User {} cleared their data (GDPR)", user_id);
        vec![Reply::markdown(format!(
            "🗑️ **Data Cleared**\n\n\
             Deleted {} memories and cleared all your data.\n\
             Starting fresh! Send me a message to begin a new conversation.",
            deleted
        ))]
    }

    async fn cmd_dream(&self, user_id: &str) -> Vec<Reply> {
        if let Some(refused) = self
            .admit(user_id, Action::AiCommand, "🌙 Please wait before requesting another dream.", "")
            .await
        {
            return vec![refused];
        }

        let memories = self
            .services
            .memory
            .search_memories(user_id, "conversation history insights patterns", 10, 0.0)
            .await;
        if memories.is_empty() {
            return vec![Reply::plain(
                "🌙 I need more conversation history to generate insights. Chat with me more!",
            )];
        }

        let texts: Vec<&str> = memories.iter().take(5).map(|m| m.text.as_str()).collect();
        let prompt = format!(
            "Based on our conversation history, generate meaningful insights about the user's \
             interests, patterns, and preferences. Here are some recent interactions:\n\n{}\n\n\
             Provide 3-4 interesting insights about this user's personality, interests, or \
             conversation patterns. Make it personal and thoughtful.",
            texts.join("\n")
        );

        let mut replies = vec![Reply::plain("🌙 Generating insights from our conversations...")];
        let response = self.generate(user_id, &prompt, 5).await;
        if !response.success {
            replies.push(Reply::plain("🌙 I couldn't generate insights right now. Try again later."));
            return replies;
        }

        self.services
            .memory
            .store_memory(
                user_id,
                &format!("[Dream Insights] {}", response.response),
                InteractionType::Insight,
                0.8,
                None,
            )
            .await;
        replies.push(Reply::markdown(format!("🌙 **Dream Insights**\n\n{}", response.response)));
        replies
    }

    async fn last_bot_response(&self, user_id: &str) -> Option<Memory> {
        let recent = self.services.memory.get_recent_context(user_id, 10).await;
        if let Some(found) = recent.into_iter().find(Memory::is_bot_response) {
            return Some(found);
        }
        self.services
            .memory
            .search_memories(user_id, "bot_response", 3, 0.0)
            .await
            .into_iter()
            .find(Memory::is_bot_response)
    }

    async fn cmd_why(&self, user_id: &str) -> Vec<Reply> {
        let Some(last) = self.last_bot_response(user_id).await else {
            return vec![Reply::plain(
                "🤔 I don't have any recent responses to explain. Ask me something first!",
            )];
        };

        let prompt = format!(
            "Explain the reasoning behind this AI response in a clear, educational way:\n\n\
             Response to explain: \"{}\"\n\n\
             Provide a thoughtful explanation of:\n\
             1. What factors I considered\n\
             2. Why I chose this particular approach\n\
             3. What knowledge or context I used\n\
             4. How I structured my response\n\n\
             Make it insightful and educational.",
            last.text
        );

        let response = self.generate(user_id, &prompt, 5).await;
        if response.success {
            vec![Reply::markdown(format!("🤔 **My Reasoning Process**\n\n{}", response.response))]
        } else {
            vec![Reply::plain("🤔 I couldn't explain my reasoning right now.")]
        }
    }

    async fn cmd_analyze(&self, user_id: &str, topic: &str) -> Vec<Reply> {
        if topic.is_empty() {
            return vec![Reply::markdown(
                "🔍 Please specify what to analyze.\n\nExample: `/analyze artificial intelligence trends`",
            )];
        }
        if let Some(refused) = self
            .admit(user_id, Action::AiCommand, "🔍 Please wait before requesting another analysis.", topic)
            .await
        {
            return vec![refused];
        }

        let prompt = format!(
            "Perform a comprehensive analysis of: {}\n\n\
             Provide a structured analysis covering:\n\
             1. **Overview**: What this topic is and why it matters\n\
             2. **Current State**: Present situation and key developments\n\
             3. **Key Factors**: Important elements and relationships\n\
             4. **Implications**: What this means for the future\n\
             5. **Conclusion**: Main takeaways and recommendations\n\n\
             Make it thorough, insightful, and well-organized.",
            topic
        );

        let mut replies = vec![Reply::plain(format!("🔍 Performing deep analysis of: {}", topic))];
        let response = self.generate(user_id, &prompt, 5).await;
        if !response.success {
            replies.push(Reply::plain("🔍 Analysis failed. Please try again."));
            return replies;
        }

        self.services
            .memory
            .store_memory(
                user_id,
                &format!("[Analysis] {}: {}...", topic, truncate_chars(&response.response, 200)),
                InteractionType::Analysis,
                0.7,
                None,
            )
            .await;
        replies.push(Reply::markdown(format!("🔍 **Deep Analysis: {}**\n\n{}", topic, response.response)));
        replies
    }

    async fn cmd_summary(&self, user_id: &str) -> Vec<Reply> {
        let memories = self
            .services
            .memory
            .search_memories(user_id, "conversation topics discussion", 15, 0.0)
            .await;
        if memories.is_empty() {
            return vec![Reply::plain("📝 No conversation history to summarize yet.")];
        }

        let conversation: Vec<&str> = memories
            .iter()
            .filter(|m| {
                m.interaction_type == InteractionType::UserMessage.as_str() || m.is_bot_response()
            })
            .take(10)
            .map(|m| m.text.as_str())
            .collect();
        if conversation.is_empty() {
            return vec![Reply::plain("📝 No conversations to summarize yet.")];
        }

        let prompt = format!(
            "Summarize our conversation history in a comprehensive way:\n\n\
             Recent conversations:\n{}\n\n\
             Create a summary that includes:\n\
             1. **Main Topics**: What we've discussed most\n\
             2. **Key Insights**: Important points that came up\n\
             3. **User Interests**: What the user seems interested in\n\
             4. **Conversation Pattern**: How our interactions typically go\n\n\
             Make it personal and insightful.",
            conversation.join("\n")
        );

        let response = self.generate(user_id, &prompt, 8).await;
        if response.success {
            vec![Reply::markdown(format!("📝 **Conversation Summary**\n\n{}", response.response))]
        } else {
            vec![Reply::plain("📝 Couldn't generate summary right now.")]
        }
    }

    async fn cmd_usage(&self, user_id: &str) -> Vec<Reply> {
        let stats = match self.services.cost_guard.usage_stats(user_id).await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Usage stats failed for {}: {:#}", user_id, e);
                return vec![Reply::plain("Sorry, couldn't retrieve your usage right now.")];
            }
        };

        let mut text = format!(
            "💰 **Your Usage**\n\n\
             • Today: ₹{:.2} / ₹{:.0} (₹{:.2} left)\n\
             • This month: ₹{:.2} / ₹{:.0} (₹{:.2} left)\n",
            stats.costs.user_daily,
            stats.limits.daily,
            stats.remaining.daily,
            stats.costs.user_monthly,
            stats.limits.monthly,
            stats.remaining.monthly
        );
        if !stats.usage_history.is_empty() {
            text.push_str("\n**Recent requests:**\n");
            for record in &stats.usage_history {
                let _ = writeln!(
                    text,
                    "• {} {} - {} in / {} out - ₹{:.4}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.model,
                    record.input_tokens,
                    record.output_tokens,
                    record.cost_inr
                );
            }
        }
        vec![Reply::markdown(text)]
    }
}

const HELP_TEXT: &str = "🤖 **Eva Help**

**💬 Basic Commands:**
• `/start` - Welcome message
• `/help` - This help message
• `/ask <question>` - Ask me anything
• `/recall <topic>` - Search conversation history

**🎭 Personality & Analysis:**
• `/tone friendly|formal|gen-z` - Change personality (VERY different!)
• `/dream` - Generate insights from our conversations
• `/why` - Explain my last reasoning process
• `/analyze <topic>` - Deep analysis of any topic
• `/summary` - Summarize our conversation history

**📊 System & Data:**
• `/stats` - Service status and usage
• `/usage` - Your AI spend and recent requests
• `/health` - System health check
• `/forget` - Clear your data (GDPR)

**🔒 Privacy:**
• User ids are stored hashed
• Use `/forget` to delete everything

Try different personality modes - they're VERY different! 🎭";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(parse_command("hello there", None), None);
        assert_eq!(parse_command("  ", None), None);
    }

    #[test]
    fn test_parse_commands_with_args() {
        assert_eq!(
            parse_command("/ask what is rust?", None),
            Some(Command::Ask("what is rust?".to_string()))
        );
        assert_eq!(parse_command("/ask", None), Some(Command::Ask(String::new())));
        assert_eq!(
            parse_command("/tone Formal please", None),
            Some(Command::Tone(Some("Formal".to_string())))
        );
        assert_eq!(parse_command("/tone", None), Some(Command::Tone(None)));
        assert_eq!(parse_command("/USAGE", None), Some(Command::Usage));
        assert_eq!(
            parse_command("/search cats", None),
            Some(Command::Unknown("search".to_string()))
        );
    }

    #[test]
    fn test_parse_bot_mentions() {
        assert_eq!(parse_command("/stats@EvaBot", Some("evabot")), Some(Command::Stats));
        assert_eq!(parse_command("/stats@OtherBot", Some("evabot")), Some(Command::ForOtherBot));
        assert_eq!(
            parse_command("/recall@evabot our trip", Some("evabot")),
            Some(Command::Recall("our trip".to_string()))
        );
        // Unknown own name: accept
        assert_eq!(parse_command("/help@whoever", None), Some(Command::Help));
    }

    #[test]
    fn test_chunk_message() {
        assert!(chunk_message("", 10).is_empty());
        assert_eq!(chunk_message("hello", 10), vec!["hello"]);

        let text = "a".repeat(MAX_MESSAGE_LEN * 2 + 1);
        let chunks = chunk_message(&text, MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_MESSAGE_LEN);
        assert_eq!(chunks[2].len(), 1);

        // Multi-byte characters never split
        let emoji = "🔥".repeat(5);
        let chunks = chunk_message(&emoji, 9);
        assert!(chunks.iter().all(|c| c.len() <= 9));
        assert_eq!(chunks.concat(), emoji);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
