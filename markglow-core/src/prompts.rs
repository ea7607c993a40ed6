//! Maps an editing action plus its inputs to the system/user prompt pair sent
//! upstream.

use std::fmt;

use crate::error::{CoreResult, RelayError};

pub const DEFAULT_STYLE: &str = "professional, clear and readable";
pub const DEFAULT_TARGET_LANG: &str = "English";

const BEAUTIFY_SYSTEM: &str = "You are a Markdown formatting expert. Improve the formatting, \
layout and structure of the following Markdown so it is clearer and easier to read. Keep the \
content itself unchanged and only adjust the formatting.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Beautify,
    Generate,
    Improve,
    Summarize,
    Translate,
    Expand,
    Complete,
    CheckGrammar,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Beautify,
        Action::Generate,
        Action::Improve,
        Action::Summarize,
        Action::Translate,
        Action::Expand,
        Action::Complete,
        Action::CheckGrammar,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Beautify => "beautify",
            Self::Generate => "generate",
            Self::Improve => "improve",
            Self::Summarize => "summarize",
            Self::Translate => "translate",
            Self::Expand => "expand",
            Self::Complete => "complete",
            Self::CheckGrammar => "check-grammar",
        }
    }

    /// Exact match on a known name. Accepts `check-grammar`, `check_grammar`
    /// and `checkGrammar`, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Some(match folded.as_str() {
            "beautify" => Self::Beautify,
            "generate" => Self::Generate,
            "improve" => Self::Improve,
            "summarize" => Self::Summarize,
            "translate" => Self::Translate,
            "expand" => Self::Expand,
            "complete" => Self::Complete,
            "checkgrammar" => Self::CheckGrammar,
            _ => return None,
        })
    }

    /// Lenient parse used by the HTTP surface: absent or unknown names become
    /// [`Action::Beautify`].
    pub fn resolve(name: Option<&str>) -> Self {
        match name {
            None => Self::Beautify,
            Some(n) => Self::from_name(n).unwrap_or_else(|| {
                tracing::info!(action = %n, "unknown action, falling back to beautify");
                Self::Beautify
            }),
        }
    }

    /// Whether the action works on the `content` field (everything but generate).
    pub fn needs_content(&self) -> bool {
        !matches!(self, Self::Generate)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Optional fields an action may draw on.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInputs<'a> {
    pub content: Option<&'a str>,
    pub style: Option<&'a str>,
    pub target_lang: Option<&'a str>,
    pub title: Option<&'a str>,
    pub context: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.trim().is_empty())
}

impl PromptPair {
    /// Build the prompts for `action`.
    ///
    /// Fails with [`RelayError::Validation`] when the field the action works
    /// on is missing or blank: `content` for most actions, `title` for generate.
    pub fn build(action: Action, inputs: &PromptInputs<'_>) -> CoreResult<Self> {
        let content = if action.needs_content() {
            non_blank(inputs.content).ok_or_else(|| {
                RelayError::Validation(format!("content is required for {action}"))
            })?
        } else {
            ""
        };

        let (system, user) = match action {
            Action::Beautify => (
                BEAUTIFY_SYSTEM.to_string(),
                format!("Beautify the following Markdown:\n\n{content}"),
            ),
            Action::Generate => {
                let title = non_blank(inputs.title).ok_or_else(|| {
                    RelayError::Validation("title is required for generate".into())
                })?;
                let mut user = format!(
                    "Write a complete Markdown document for the following title:\n\n\
                     Title: {title}\n\n"
                );
                if let Some(ctx) = non_blank(inputs.context) {
                    user.push_str(
                        "Reference material (use it for guidance, the title takes precedence):\n",
                    );
                    user.push_str(ctx);
                    user.push_str("\n\n");
                }
                user.push_str(
                    "Write the full Markdown document, keeping it closely related to the title:",
                );
                (
                    "You are a professional writing assistant. Produce high-quality Markdown \
                     content from the title and context the user provides."
                        .to_string(),
                    user,
                )
            }
            Action::Improve => {
                let style = non_blank(inputs.style).unwrap_or(DEFAULT_STYLE);
                (
                    format!(
                        "You are a professional copy editor. Rework the wording so it is more \
                         {style}."
                    ),
                    format!("Polish the following content so it is more {style}:\n\n{content}"),
                )
            }
            Action::Summarize => (
                "You are a summarization expert. Write a short, clear summary of the document that \
                 highlights the key points."
                    .to_string(),
                format!("Summarize the following document:\n\n{content}"),
            ),
            Action::Translate => {
                let target = non_blank(inputs.target_lang).unwrap_or(DEFAULT_TARGET_LANG);
                (
                    "You are a professional translator. Translate the document accurately and \
                     keep the Markdown formatting unchanged."
                        .to_string(),
                    format!("Translate the following content into {target}:\n\n{content}"),
                )
            }
            Action::Expand => (
                "You are a content expansion expert. Expand short passages into more \
                 detailed, richer text on the same topic."
                    .to_string(),
                format!("Expand the following passage with more detail:\n\n{content}"),
            ),
            Action::Complete => (
                "You are a text completion assistant. Continue the user's text based on its \
                 context."
                    .to_string(),
                format!("Complete the following text:\n\n{content}"),
            ),
            Action::CheckGrammar => (
                "You are a grammar checking expert. Find grammar mistakes, spelling errors and \
                 formatting problems in the following Markdown and suggest fixes."
                    .to_string(),
                format!(
                    "Check the following content for grammar and formatting problems:\n\n\
                     {content}\n\nList the errors and give the corrected content:"
                ),
            ),
        };
        Ok(Self { system, user })
    }
}
