//! Prompt templates for oracle calls.
//!
//! Templates use `{name}` placeholders filled from [`PromptVars`]. Rendering is
//! a single pass, so placeholder-like text inside a substituted document is
//! left alone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::gateway::Message;

// =============================================================================
// Variables
// =============================================================================

/// Named values substituted into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVars {
    vars: Vec<(&'static str, String)>,
}

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.vars.iter().map(|(n, v)| (*n, v.as_str()))
    }
}

/// Render a list of passages as a numbered block for `{context_list}`.
pub fn format_context_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("[{}] {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// =============================================================================
// Templates
// =============================================================================

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if !self.system.is_empty() {
            messages.push(Message::system(&self.system));
        }
        messages.push(Message::user(&self.user));
        messages
    }

    /// Single string used for cache keys.
    pub fn fingerprint_text(&self) -> String {
        format!("{}\n{}", self.system, self.user)
    }
}

/// A prompt template with placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, vars: &PromptVars) -> PromptInstance {
        PromptInstance {
            template_slug: self.slug.to_string(),
            system: substitute(self.system, vars).trim().to_string(),
            user: substitute(self.user, vars).trim().to_string(),
        }
    }

    /// blake3 hash of the raw template text.
    pub fn template_hash(&self) -> String {
        blake3::hash(format!("{}\n{}", self.system, self.user).as_bytes())
            .to_hex()
            .to_string()
    }
}

/// Replace `{name}` tokens in one pass. Unknown placeholders are kept verbatim.
fn substitute(template: &str, vars: &PromptVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.get(name).map(|value| (value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// Standard prompts
// =============================================================================

/// Prompt language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLanguage {
    En,
    #[default]
    Zh,
}

impl fmt::Display for PromptLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptLanguage::En => f.write_str("en"),
            PromptLanguage::Zh => f.write_str("zh"),
        }
    }
}

impl FromStr for PromptLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(PromptLanguage::En),
            "zh" => Ok(PromptLanguage::Zh),
            other => Err(format!("unknown prompt language: {other} (expected en|zh)")),
        }
    }
}

/// Every template the harness sends, for one language.
#[derive(Debug, Clone, Copy)]
pub struct PromptSet {
    /// Vars: `question`, `context1`, `context2`. Reply "1" or "2".
    pub pairwise: PromptTemplate,
    /// Vars: `question`, `context`. Reply "1" or "0".
    pub answerable: PromptTemplate,
    /// Vars: `question`, `context_list`.
    pub answer: PromptTemplate,
    /// Vars: `question`, `context_list` (partial answers).
    pub merge: PromptTemplate,
    /// Substring marking an answer as "cannot answer".
    pub unknown_marker: &'static str,
}

pub const PAIRWISE_ZH: PromptTemplate = PromptTemplate {
    slug: "pairwise_zh_v1",
    system: "",
    user: r#"有两个给定的背景，请选择一个背景来回答下面的问题。
如果您选择背景1，请输出"1"。如果您选择背景2，请输出"2"。
您必须选择一个背景。
请输出是"1"或"2"。不要输出其他内容。

问题: {question}

背景1: {context1}
背景2: {context2}"#,
};

pub const ANSWERABLE_ZH: PromptTemplate = PromptTemplate {
    slug: "answerable_zh_v1",
    system: "",
    user: r#"请判断使用下面文档中内容是否可以回答问题，如果可以请回答"1"，如果不可以请回答"0"
问题: {question}
文档: {context}
请不要输出"0"或"1"以外的任何内容"#,
};

pub const ANSWER_ZH: PromptTemplate = PromptTemplate {
    slug: "answer_zh_v1",
    system: "",
    user: r#"请根据给定的文档回答问题
如果文档中的内容可以回答问题，请全面详细地回答问题并在回答中使用资料中细节，包括例子，数据等；如果不可以回答问题，请回答不知道
问题: {question}
文档: {context_list}
请不要输出与回答问题无关的任何内容
输出格式：“答案: xxx""#,
};

pub const MERGE_ZH: PromptTemplate = PromptTemplate {
    slug: "merge_zh_v1",
    system: "",
    user: r#"请根据以下给定的背景资料，全面详细地回答问题，请在回答中使用资料中细节，包括例子，数据等
问题: {question}
背景资料: {context_list}
输出格式：“答案: xxx""#,
};

pub const PAIRWISE_EN: PromptTemplate = PromptTemplate {
    slug: "pairwise_en_v1",
    system: "",
    user: r#"You are given two contexts. Pick the one that better answers the question below.
If you pick context 1, output "1". If you pick context 2, output "2".
You must pick one context.
Output "1" or "2" only. Do not output anything else.

Question: {question}

Context 1: {context1}
Context 2: {context2}"#,
};

pub const ANSWERABLE_EN: PromptTemplate = PromptTemplate {
    slug: "answerable_en_v1",
    system: "",
    user: r#"Decide whether the document below can answer the question. If it can, reply "1". If it cannot, reply "0".
Question: {question}
Document: {context}
Do not output anything other than "0" or "1"."#,
};

pub const ANSWER_EN: PromptTemplate = PromptTemplate {
    slug: "answer_en_v1",
    system: "",
    user: r#"Answer the question using the documents provided.
If the documents can answer the question, answer thoroughly and use their details, including examples and figures. If they cannot, reply "I don't know".
Question: {question}
Documents: {context_list}
Do not output anything unrelated to the answer.
Output format: "Answer: xxx""#,
};

pub const MERGE_EN: PromptTemplate = PromptTemplate {
    slug: "merge_en_v1",
    system: "",
    user: r#"Using the background material below, answer the question thoroughly and use its details, including examples and figures.
Question: {question}
Background: {context_list}
Output format: "Answer: xxx""#,
};

pub const PROMPTS_ZH: PromptSet = PromptSet {
    pairwise: PAIRWISE_ZH,
    answerable: ANSWERABLE_ZH,
    answer: ANSWER_ZH,
    merge: MERGE_ZH,
    unknown_marker: "不知道",
};

pub const PROMPTS_EN: PromptSet = PromptSet {
    pairwise: PAIRWISE_EN,
    answerable: ANSWERABLE_EN,
    answer: ANSWER_EN,
    merge: MERGE_EN,
    unknown_marker: "I don't know",
};

pub const PROMPTS: &[PromptTemplate] = &[
    PAIRWISE_ZH,
    ANSWERABLE_ZH,
    ANSWER_ZH,
    MERGE_ZH,
    PAIRWISE_EN,
    ANSWERABLE_EN,
    ANSWER_EN,
    MERGE_EN,
];

pub fn prompt_set(language: PromptLanguage) -> PromptSet {
    match language {
        PromptLanguage::En => PROMPTS_EN,
        PromptLanguage::Zh => PROMPTS_ZH,
    }
}

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// TESTS
// =============================================================================
