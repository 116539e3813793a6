//! Generation profiles: a temperature and a system preamble per use case.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    General,
    Document,
    Explanatory,
    Code,
    Creative,
}

impl Profile {
    pub const ALL: [Profile; 5] = [
        Profile::General,
        Profile::Document,
        Profile::Explanatory,
        Profile::Code,
        Profile::Creative,
    ];

    pub fn all() -> &'static [Profile] {
        &Self::ALL
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Document => "document",
            Self::Explanatory => "explanatory",
            Self::Code => "code",
            Self::Creative => "creative",
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            Self::General => 0.70,
            Self::Document => 0.30,
            Self::Explanatory => 0.60,
            Self::Code => 0.30,
            Self::Creative => 0.80,
        }
    }

    pub fn preamble(&self) -> &'static str {
        match self {
            Self::General => {
                "You are a helpful assistant. Answer questions clearly and completely. \
                 Do not ask follow-up questions."
            }
            Self::Document => {
                "You are a document analysis assistant. Answer questions based on the learned \
                 knowledge provided in your context. Be precise and reference specific concepts, \
                 facts, or definitions from the learned material. Do not ask follow-up questions."
            }
            Self::Explanatory => {
                "You are a helpful tutor. Explain concepts clearly and encourage learning with \
                 examples. Do not ask follow-up questions."
            }
            Self::Code => {
                "You are a programming assistant. Provide clean, well-commented code with \
                 explanations. Do not ask follow-up questions."
            }
            Self::Creative => {
                "You are a creative writing assistant. Help with storytelling, editing, and \
                 creative expression. Do not ask follow-up questions."
            }
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown profile '{0}' (expected one of: general, document, explanatory, code, creative)")]
pub struct UnknownProfile(pub String);

impl FromStr for Profile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| UnknownProfile(s.to_string()))
    }
}
