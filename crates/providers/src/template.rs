//! Chat templates — how a conversation is flattened into a single prompt for
//! models that only understand raw text.

use localmind_core::message::{Message, Role};
use localmind_core::error::ProviderError;
use std::str::FromStr;

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `### System:\n{content}\n\n### User:\n{content}\n\n### Assistant:\n`
    Instruct,
    /// `<|system|>\n{content}</s>\n<|user|>\n{content}</s>\n<|assistant|>\n`
    TinyLlama,
    /// `<|im_start|>system\n{content}<|im_end|>\n<|im_start|>user\n{content}<|im_end|>\n<|im_start|>assistant\n`
    ChatMl,
    /// `[INST] {content} [/INST]`
    Llama2,
    /// `<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n{content}<|eot_id|>`
    Llama3,
}

/// Turn markers a small instruct model tends to invent once it starts
/// role-playing both sides of the conversation.
const INSTRUCT_STOPS: &[&str] = &[
    "### User:",
    "### Human:",
    "### Assistant:",
    "</s>",
    "\nUser:",
    "\nHuman:",
    "User:",
    "Human:",
    "\n###",
    "Would you like",
    "Yes or No",
];

impl FromStr for ChatTemplate {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instruct" | "alpaca" => Ok(Self::Instruct),
            "tinyllama" | "zephyr" => Ok(Self::TinyLlama),
            "chatml" => Ok(Self::ChatMl),
            "llama2" => Ok(Self::Llama2),
            "llama3" => Ok(Self::Llama3),
            other => Err(ProviderError::NotConfigured(format!(
                "Unknown chat template '{other}'. Available: instruct, tinyllama, chatml, llama2, llama3"
            ))),
        }
    }
}

impl ChatTemplate {
    /// Format messages using this template, ending with an open assistant turn.
    pub fn format(&self, messages: &[Message]) -> String {
        match self {
            Self::Instruct => format_instruct(messages),
            Self::TinyLlama => format_tinyllama(messages),
            Self::ChatMl => format_chatml(messages),
            Self::Llama2 => format_llama2(messages),
            Self::Llama3 => format_llama3(messages),
        }
    }

    /// Stop sequences that end generation for this template.
    pub fn stop_sequences(&self) -> &'static [&'static str] {
        match self {
            Self::Instruct => INSTRUCT_STOPS,
            Self::TinyLlama => &["</s>", "<|user|>"],
            Self::ChatMl => &["<|im_end|>", "<|im_start|>"],
            Self::Llama2 => &["</s>", "[INST]"],
            Self::Llama3 => &["<|eot_id|>", "<|start_header_id|>"],
        }
    }

    /// Special tokens the tokenizer may use as end-of-sequence.
    pub fn eos_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::ChatMl => &["<|im_end|>", "<|endoftext|>", "</s>"],
            Self::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            _ => &["</s>", "<|endoftext|>"],
        }
    }
}

fn format_instruct(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let header = match msg.role {
            Role::System => "### System:\n",
            Role::User => "### User:\n",
            Role::Assistant => "### Assistant:\n",
        };
        prompt.push_str(header);
        prompt.push_str(msg.content.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str("### Assistant:\n");
    prompt
}

fn format_tinyllama(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let tag = match msg.role {
            Role::System => "<|system|>\n",
            Role::User => "<|user|>\n",
            Role::Assistant => "<|assistant|>\n",
        };
        prompt.push_str(tag);
        prompt.push_str(&msg.content);
        prompt.push_str("</s>\n");
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(role_name(msg.role));
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_llama2(messages: &[Message]) -> String {
    let mut prompt = String::new();
    let mut system_prompt = String::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system_prompt = msg.content.clone();
            }
            Role::User => {
                prompt.push_str("[INST] ");
                if !system_prompt.is_empty() {
                    prompt.push_str("<<SYS>>\n");
                    prompt.push_str(&system_prompt);
                    prompt.push_str("\n<</SYS>>\n\n");
                    system_prompt.clear();
                }
                prompt.push_str(&msg.content);
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&msg.content);
                prompt.push_str(" </s>");
            }
        }
    }
    prompt
}

fn format_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(role_name(msg.role));
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(&msg.content);
        prompt.push_str("<|eot_id|>");
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Streams text through while holding back anything that could be the start
/// of a stop sequence, so a stop marker is never partially emitted.
#[derive(Debug)]
pub struct StopScanner {
    stops: Vec<String>,
    pending: String,
}

/// What the scanner decided about newly pushed text.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// Safe to emit; generation continues
    Emit(String),
    /// A stop sequence matched; emit this final text and end generation
    Stop(String),
}

impl StopScanner {
    pub fn new<I, S>(stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stops: stops
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
            pending: String::new(),
        }
    }

    pub fn push(&mut self, text: &str) -> Scan {
        self.pending.push_str(text);

        let earliest = self
            .stops
            .iter()
            .filter_map(|stop| self.pending.find(stop.as_str()))
            .min();
        if let Some(at) = earliest {
            let emitted = self.pending[..at].to_string();
            self.pending.clear();
            return Scan::Stop(emitted);
        }

        // Hold back the longest suffix that is a prefix of some stop
        let held = self
            .stops
            .iter()
            .map(|stop| longest_suffix_prefix(&self.pending, stop))
            .max()
            .unwrap_or(0);
        let cut = self.pending.len() - held;
        let emitted = self.pending[..cut].to_string();
        self.pending.drain(..cut);
        Scan::Emit(emitted)
    }

    /// Release whatever was held back once generation ends normally.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Length in bytes of the longest suffix of `text` that is a proper prefix
/// of `stop`, always on a char boundary.
fn longest_suffix_prefix(text: &str, stop: &str) -> usize {
    let max = text.len().min(stop.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&len| {
            let start = text.len() - len;
            text.is_char_boundary(start)
                && stop.is_char_boundary(len)
                && stop.starts_with(&text[start..])
        })
        .unwrap_or(0)
}
