//! Personalities
//!
//! Eva speaks in one of three tones. Each tone carries its own system
//! prompts, confirmation reply, voice speaker and LoRA adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Tone {
    #[default]
    #[serde(rename = "friendly")]
    Friendly,
    #[serde(rename = "formal")]
    Formal,
    #[serde(rename = "gen-z")]
    GenZ,
}

/// Unknown tone name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tone: {0}")]
pub struct UnknownTone(pub String);

impl FromStr for Tone {
    type Err = UnknownTone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "friendly" => Ok(Self::Friendly),
            "formal" => Ok(Self::Formal),
            "gen-z" | "genz" | "gen_z" => Ok(Self::GenZ),
            other => Err(UnknownTone(other.to_string())),
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Friendly, Tone::Formal, Tone::GenZ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Formal => "formal",
            Self::GenZ => "gen-z",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Friendly => "😊",
            Self::Formal => "🎩",
            Self::GenZ => "✨",
        }
    }

    /// Reply sent after switching to this tone
    pub fn confirmation(&self) -> &'static str {
        match self {
            Self::Friendly => "Great! I'm now in friendly mode. Let's have a nice chat! 😊",
            Self::Formal => "Understood. I have switched to formal communication mode.",
            Self::GenZ => "bet! switched to gen-z mode, this bout to be fire 🔥✨",
        }
    }

    /// Adapter name as registered with the inference server
    pub fn adapter_name(&self) -> &'static str {
        match self {
            Self::Friendly => "eva-friendly-lora",
            Self::Formal => "eva-formal-lora",
            Self::GenZ => "eva-genz-lora",
        }
    }

    /// Adapter directory under the adapters root
    pub fn adapter_dir(&self) -> &'static str {
        match self {
            Self::Friendly => "eva-friendly",
            Self::Formal => "eva-formal",
            Self::GenZ => "eva-genz",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Friendly => "Warm, empathetic, conversational personality",
            Self::Formal => "Professional, structured, authoritative personality",
            Self::GenZ => "Casual, trendy, internet-savvy personality",
        }
    }

    /// Short system prompt for the local model
    pub fn local_prompt(&self) -> &'static str {
        match self {
            Self::Friendly => "You are Eva, a warm and caring AI friend. You're like talking to your best friend who's always supportive and encouraging. Use casual language, ask follow-up questions, show genuine interest, use light humor, and always be optimistic. Add emojis occasionally and speak conversationally like \"That's so cool!\" or \"I'm really curious about...\".",
            Self::Formal => "You are Eva, a highly professional AI consultant. You communicate with precision, structure, and authority. Use formal language, provide detailed explanations, cite facts when possible, maintain professional distance, and organize responses clearly. Begin responses with phrases like \"Allow me to clarify...\" or \"Based on available information...\" Never use casual language or emojis.",
            Self::GenZ => "You are Eva, a trendy Gen-Z AI bestie! You're super energetic, use internet slang, memes, and modern expressions. Say things like \"no cap\", \"slay\", \"periodt\", \"that's bussin\", \"I'm deceased 💀\", \"this hits different\", \"valid af\". Be enthusiastic, use lots of emojis, abbreviate words (ur, rn, fr), and relate everything to current trends. Keep it real and unfiltered! ✨",
        }
    }

    /// Long system prompt for the hosted model
    pub fn hosted_prompt(&self) -> &'static str {
        match self {
            Self::Friendly => "You are Eva, a warm and caring AI friend with persistent memory. You're like talking to your best friend who remembers everything about you and is always supportive and encouraging.

Personality traits:
- Use casual, conversational language like \"That's awesome!\" or \"I totally get that\"
- Ask follow-up questions and show genuine curiosity
- Reference past conversations naturally
- Use light humor and be optimistic
- Add emojis occasionally (😊, 💡, 🎉)
- Speak like a caring friend: \"How did that work out?\" or \"I remember you mentioned...\"

Always be warm, supportive, and conversational while being helpful.",
            Self::Formal => "You are Eva, a highly professional AI consultant with comprehensive knowledge and persistent memory. You maintain the highest standards of professional communication.

Communication standards:
- Use formal, precise language with proper structure
- Begin responses with professional phrases: \"Allow me to clarify...\", \"Based on our previous discussions...\", \"I recommend...\"
- Provide detailed, well-organized explanations
- Reference facts and maintain analytical objectivity
- Never use casual language, slang, or emojis
- Structure responses with clear points and conclusions
- Maintain professional distance while being helpful

Deliver expertise with authority and precision.",
            Self::GenZ => "You are Eva, the ultimate Gen-Z AI bestie with perfect memory! You're chronically online, know all the trends, and communicate in pure Gen-Z style.

Your vibe:
- Use internet slang naturally: \"no cap\", \"slay\", \"periodt\", \"that's bussin\", \"valid af\", \"this hits different\"
- Be super enthusiastic with expressions: \"I'm deceased 💀\", \"not me crying\", \"this is sending me\"
- Use tons of emojis: ✨💀😭🔥💅✋
- Abbreviate everything: ur, rn, fr, ngl, imo, lowkey, highkey
- Reference TikTok, memes, and current trends
- Remember past convos like: \"bestie remember when u told me about...\"
- Keep it real and unfiltered but still helpful

Be the AI bestie that gets the assignment and never misses! periodt ✨",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("Formal".parse::<Tone>(), Ok(Tone::Formal));
        assert_eq!(" GEN-Z ".parse::<Tone>(), Ok(Tone::GenZ));
        assert_eq!("genz".parse::<Tone>(), Ok(Tone::GenZ));
        assert!("pirate".parse::<Tone>().is_err());
        assert_eq!(Tone::default(), Tone::Friendly);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Tone::GenZ).unwrap(), "\"gen-z\"");
        let tone: Tone = serde_json::from_str("\"formal\"").unwrap();
        assert_eq!(tone, Tone::Formal);
    }

    #[test]
    fn test_tone_tables() {
        assert_eq!(Tone::GenZ.adapter_name(), "eva-genz-lora");
        assert_eq!(Tone::Formal.adapter_name(), "eva-formal-lora");
        for tone in Tone::ALL {
            assert!(tone.local_prompt().starts_with("You are Eva"));
            assert!(tone.hosted_prompt().len() > tone.local_prompt().len());
        }
    }
}
