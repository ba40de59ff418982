//! Reasoning Layer
//!
//! Keyword-driven classification of a user message: what kind of reasoning
//! it calls for, how complex it is, which entities it mentions and how the
//! conversation has been going. The result selects one of three prompt
//! templates for the model call.

use crate::memory::{Memory, MemoryService};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Kinds of reasoning a prompt can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningType {
    Analytical,
    Creative,
    Logical,
    Intuitive,
    Critical,
}

impl ReasoningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Creative => "creative",
            Self::Logical => "logical",
            Self::Intuitive => "intuitive",
            Self::Critical => "critical",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Analytical => "Break down complex problems step by step",
            Self::Creative => "Generate novel solutions and ideas",
            Self::Logical => "Apply formal logic and deduction",
            Self::Intuitive => "Use pattern recognition and heuristics",
            Self::Critical => "Evaluate arguments and evidence objectively",
        }
    }
}

impl fmt::Display for ReasoningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPattern {
    NewConversation,
    InquiryHeavy,
    ExtendedConversation,
    NormalConversation,
}

impl FlowPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewConversation => "new_conversation",
            Self::InquiryHeavy => "inquiry_heavy",
            Self::ExtendedConversation => "extended_conversation",
            Self::NormalConversation => "normal_conversation",
        }
    }
}

/// How the recent conversation looks
#[derive(Debug, Clone, Serialize)]
pub struct ConversationFlow {
    pub pattern: FlowPattern,
    pub sentiment_flow: Vec<Sentiment>,
    pub current_sentiment: Sentiment,
    pub engagement_level: f64,
    pub message_count: usize,
    pub recent_topics: Vec<String>,
}

/// Everything `reason_and_respond` needs
#[derive(Debug, Clone, Serialize)]
pub struct ContextAnalysis {
    pub reasoning_type: ReasoningType,
    pub complexity: f64,
    pub confidence: f64,
    pub entities: Vec<String>,
    pub memories_found: usize,
    pub flow: ConversationFlow,
}

/// Template chosen for the model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningDepth {
    Deep,
    Structured,
    Quick,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonedPrompt {
    pub prompt: String,
    pub depth: ReasoningDepth,
    pub reasoning_type: ReasoningType,
    pub complexity: f64,
    pub confidence: f64,
}

// Keyword sets
static ANALYTICAL_KEYWORDS: &[&str] = &["analyze", "explain", "why", "how", "because", "reason"];
static CREATIVE_KEYWORDS: &[&str] = &["create", "imagine", "design", "brainstorm", "innovative"];
static LOGICAL_KEYWORDS: &[&str] = &["if", "then", "therefore", "conclude", "prove", "logic"];
static CRITICAL_KEYWORDS: &[&str] = &["evaluate", "judge", "critique", "assess", "compare"];

static TECHNICAL_TERMS: &[&str] = &["api", "database", "algorithm", "function", "class", "method"];

static POSITIVE_WORDS: &[&str] = &["good", "great", "excellent", "amazing", "wonderful", "happy", "love"];
static NEGATIVE_WORDS: &[&str] = &["bad", "terrible", "awful", "hate", "sad", "angry", "frustrated"];

static TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("technology", &["ai", "computer", "software", "code", "programming"]),
    ("personal", &["i", "me", "my", "personal", "life"]),
    ("help", &["help", "how", "question", "problem", "issue"]),
    ("learning", &["learn", "study", "understand", "explain", "teach"]),
];

static PROPER_NOUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\b").unwrap());
static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z]+(?:[A-Z][a-z]*)+\b").unwrap());

/// Lowercased word set of `text`
fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn hits(words: &HashSet<String>, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| words.contains(**k)).count()
}

/// Highest keyword score wins; ties and no hits go to analytical
pub fn determine_reasoning_type(message: &str) -> ReasoningType {
    let words = words(message);
    let scores = [
        (ReasoningType::Analytical, hits(&words, ANALYTICAL_KEYWORDS)),
        (ReasoningType::Creative, hits(&words, CREATIVE_KEYWORDS)),
        (ReasoningType::Logical, hits(&words, LOGICAL_KEYWORDS)),
        (ReasoningType::Critical, hits(&words, CRITICAL_KEYWORDS)),
    ];

    let mut best = (ReasoningType::Analytical, 0);
    for (kind, score) in scores {
        if score > best.1 {
            best = (kind, score);
        }
    }
    best.0
}

/// Capitalised words and camelCase identifiers, first occurrence order
pub fn extract_entities(message: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PROPER_NOUN
        .find_iter(message)
        .chain(CAMEL_CASE.find_iter(message))
        .map(|m| m.as_str().to_string())
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

pub fn calculate_complexity(message: &str, context_len: usize) -> f64 {
    let mut score = (message.chars().count() as f64 / 500.0).min(0.3);
    score += (message.matches('?').count() as f64 * 0.1).min(0.2);
    score += (hits(&words(message), TECHNICAL_TERMS) as f64 * 0.1).min(0.2);
    score += (context_len as f64 * 0.05).min(0.3);
    score.min(1.0)
}

pub fn calculate_confidence(context_len: usize, memories_len: usize) -> f64 {
    let confidence = 0.5 + (context_len as f64 * 0.1).min(0.3) + (memories_len as f64 * 0.05).min(0.2);
    confidence.min(1.0)
}

pub fn analyze_sentiment(text: &str) -> Sentiment {
    let words = words(text);
    let positive = hits(&words, POSITIVE_WORDS);
    let negative = hits(&words, NEGATIVE_WORDS);
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// Flow over the context, which is ordered newest first. Only the newest
/// five items are read; `sentiment_flow` runs oldest to newest among them.
pub fn analyze_conversation_flow(context: &[Memory]) -> ConversationFlow {
    let recent: Vec<&str> = context.iter().take(5).rev().map(|m| m.text.as_str()).collect();
    let sentiment_flow: Vec<Sentiment> = recent.iter().map(|t| analyze_sentiment(t)).collect();

    let pattern = if recent.len() < 2 {
        FlowPattern::NewConversation
    } else if recent.iter().filter(|t| t.contains('?')).count() as f64 > recent.len() as f64 * 0.7 {
        FlowPattern::InquiryHeavy
    } else if context.len() > 10 {
        FlowPattern::ExtendedConversation
    } else {
        FlowPattern::NormalConversation
    };

    let engagement_level = if recent.is_empty() {
        0.5
    } else {
        let avg = recent.iter().map(|t| t.chars().count()).sum::<usize>() as f64 / recent.len() as f64;
        (avg / 100.0).min(1.0)
    };

    let all_words = words(&recent.join(" "));
    let recent_topics = TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| hits(&all_words, keywords) > 0)
        .map(|(topic, _)| topic.to_string())
        .collect();

    ConversationFlow {
        pattern,
        current_sentiment: sentiment_flow.last().copied().unwrap_or(Sentiment::Neutral),
        sentiment_flow,
        engagement_level,
        message_count: context.len(),
        recent_topics,
    }
}

/// Pure analysis over already-fetched context and memories
pub fn analyze(message: &str, context: &[Memory], memories: &[Memory]) -> ContextAnalysis {
    ContextAnalysis {
        reasoning_type: determine_reasoning_type(message),
        complexity: calculate_complexity(message, context.len()),
        confidence: calculate_confidence(context.len(), memories.len()),
        entities: extract_entities(message),
        memories_found: memories.len(),
        flow: analyze_conversation_flow(context),
    }
}

/// Pick the prompt template for `message`
pub fn reason_and_respond(message: &str, analysis: &ContextAnalysis) -> ReasonedPrompt {
    let kind = analysis.reasoning_type;
    let entities = analysis.entities.join(", ");

    let (depth, prompt) = if analysis.complexity > 0.8 {
        let prompt = format!(
            "{}\n\n\
             Context Analysis:\n\
             - Reasoning Type: {}\n\
             - Complexity: High\n\
             - Entities: {}\n\
             - Memories: {} relevant memories found\n\n\
             User Query: {}\n\n\
             Please provide a thorough, well-reasoned response using {} reasoning.\n\
             Consider multiple perspectives and provide step-by-step analysis where appropriate.",
            kind.description(),
            kind,
            entities,
            analysis.memories_found,
            message,
            kind
        );
        (ReasoningDepth::Deep, prompt)
    } else if analysis.complexity > 0.5 {
        let prompt = format!(
            "Using {} reasoning approach:\n\n\
             Query: {}\n\
             Key Entities: {}\n\n\
             Please provide a clear, structured response that addresses the query methodically.",
            kind, message, entities
        );
        (ReasoningDepth::Structured, prompt)
    } else {
        (ReasoningDepth::Quick, message.to_string())
    };

    debug!("Reasoning: {} / {:?} (complexity {:.2})", kind, depth, analysis.complexity);
    ReasonedPrompt {
        prompt,
        depth,
        reasoning_type: kind,
        complexity: analysis.complexity,
        confidence: analysis.confidence,
    }
}

/// Analysis with memory lookup
pub struct ReasoningService {
    memory: Arc<MemoryService>,
}

impl ReasoningService {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }

    pub async fn analyze_context(&self, message: &str, context: &[Memory], user_id: &str) -> ContextAnalysis {
        let memories = self.memory.search_memories(user_id, message, 5, 0.0).await;
        analyze(message, context, &memories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Memory {
        Memory {
            id: String::new(),
            text: text.to_string(),
            interaction_type: "user_message".to_string(),
            importance: 0.5,
            timestamp: String::new(),
            similarity: None,
        }
    }

    #[test]
    fn test_reasoning_type_selection() {
        assert_eq!(determine_reasoning_type("Why does this happen?"), ReasoningType::Analytical);
        assert_eq!(determine_reasoning_type("Imagine and design a logo"), ReasoningType::Creative);
        assert_eq!(determine_reasoning_type("If x then prove y"), ReasoningType::Logical);
        assert_eq!(determine_reasoning_type("Compare and evaluate these"), ReasoningType::Critical);
        assert_eq!(determine_reasoning_type("hello there"), ReasoningType::Analytical);
        // Tie between analytical (why) and creative (create) keeps analytical
        assert_eq!(determine_reasoning_type("why create"), ReasoningType::Analytical);
    }

    #[test]
    fn test_entities() {
        let entities = extract_entities("Tell Alice about getUserName and Alice again");
        assert_eq!(entities, vec!["Tell", "Alice", "getUserName"]);
    }

    #[test]
    fn test_complexity() {
        assert_eq!(calculate_complexity("", 0), 0.0);
        // 2 question marks, api + database, 4 context items
        let score = calculate_complexity("api? database?", 4);
        let expected = 14.0 / 500.0 + 0.2 + 0.2 + 0.2;
        assert!((score - expected).abs() < 1e-9);
        let long = format!("{} ????? api database algorithm", "x".repeat(1000));
        assert!((calculate_complexity(&long, 20) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence() {
        assert_eq!(calculate_confidence(0, 0), 0.5);
        assert!((calculate_confidence(3, 2) - 0.9).abs() < 1e-9);
        assert!((calculate_confidence(10, 10) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flow_patterns() {
        assert_eq!(analyze_conversation_flow(&[]).pattern, FlowPattern::NewConversation);
        assert_eq!(analyze_conversation_flow(&[]).engagement_level, 0.5);

        let questions = vec![msg("what?"), msg("why?"), msg("how?")];
        assert_eq!(analyze_conversation_flow(&questions).pattern, FlowPattern::InquiryHeavy);

        let long: Vec<Memory> = (0..12).map(|i| msg(&format!("statement {}", i))).collect();
        assert_eq!(analyze_conversation_flow(&long).pattern, FlowPattern::ExtendedConversation);

        let normal = vec![msg("I love this great day"), msg("ok")];
        let flow = analyze_conversation_flow(&normal);
        assert_eq!(flow.pattern, FlowPattern::NormalConversation);
        assert_eq!(flow.current_sentiment, Sentiment::Positive);
        assert!(flow.recent_topics.contains(&"personal".to_string()));
    }

    #[test]
    fn test_flow_reads_newest_five() {
        let context = vec![
            msg("this is terrible"),
            msg("ok"),
            msg("sure"),
            msg("fine"),
            msg("a great idea"),
            msg("write some code"),
            msg("more software"),
        ];
        let flow = analyze_conversation_flow(&context);

        assert_eq!(
            flow.sentiment_flow,
            vec![
                Sentiment::Positive,
                Sentiment::Neutral,
                Sentiment::Neutral,
                Sentiment::Neutral,
                Sentiment::Negative,
            ]
        );
        assert_eq!(flow.current_sentiment, Sentiment::Negative);
        assert_eq!(flow.message_count, 7);
        assert!(!flow.recent_topics.contains(&"technology".to_string()));
    }

    #[test]
    fn test_sentiment() {
        assert_eq!(analyze_sentiment("this is awful and sad"), Sentiment::Negative);
        assert_eq!(analyze_sentiment("good but bad"), Sentiment::Neutral);
    }

    #[test]
    fn test_prompt_depths() {
        let simple = analyze("hi", &[], &[]);
        let quick = reason_and_respond("hi", &simple);
        assert_eq!(quick.depth, ReasoningDepth::Quick);
        assert_eq!(quick.prompt, "hi");

        let context: Vec<Memory> = (0..6).map(|_| msg("context")).collect();
        let question = "How does the Postgres database api work?";
        let medium = analyze(question, &context, &[]);
        let structured = reason_and_respond(question, &medium);
        assert_eq!(structured.depth, ReasoningDepth::Structured);
        assert!(structured.prompt.starts_with("Using analytical reasoning approach:"));
        assert!(structured.prompt.contains("Key Entities: How, Postgres"));

        let hard = format!("{} why? api database algorithm", "x".repeat(400));
        let deep = reason_and_respond(&hard, &analyze(&hard, &context, &[msg("m")]));
        assert_eq!(deep.depth, ReasoningDepth::Deep);
        assert!(deep.prompt.starts_with("Break down complex problems step by step"));
        assert!(deep.prompt.contains("- Memories: 1 relevant memories found"));
    }
}
