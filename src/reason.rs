//! Access reason validation.
//!
//! A crude nonsense detector for the justification a user types before
//! being let through.  It does not try to understand the text.  Declared
//! content-creation work (recording, editing, publishing, going live) is
//! let through as soon as it is recognised, ahead of every other rule.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::util::ac_for_ci;

/// Reasons shorter than this (in characters, after trimming) are rejected.
pub const MIN_REASON_CHARS: usize = 10;
const MAX_CHAR_RUN: usize = 5;
const MIN_DISTINCT_CHARS: usize = 5;
const MIN_WORDS: usize = 2;

/// Vocabulary that marks a reason as content-creation work.
pub const DEFAULT_CONTENT_KEYWORDS: &[&str] = &[
    // pt-BR
    "criar",
    "criando",
    "criação",
    "criacao",
    "gravar",
    "gravando",
    "gravação",
    "gravacao",
    "editar",
    "editando",
    "edição",
    "edicao",
    "publicar",
    "publicando",
    "postar",
    "postando",
    "vídeo",
    "video",
    "canal",
    "conteúdo",
    "conteudo",
    "roteiro",
    "métricas",
    "metricas",
    "ao vivo",
    "transmissão",
    "transmissao",
    // en
    "create",
    "creating",
    "record",
    "recording",
    "edit video",
    "editing",
    "publish",
    "upload",
    "channel",
    "analytics",
    "thumbnail",
    "tutorial",
    "livestream",
    "live stream",
    "streaming",
    "podcast",
];

static KEYBOARD_MASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:asdf){2}|(?:qwer){2}|(?:zxcv){2}|(?:1234){2}|(?:abcd){2}").unwrap()
});

/// Outcome of validating a reason, naming the rule that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "verdict")]
pub enum ReasonVerdict {
    #[serde(rename_all = "camelCase")]
    Accepted { content_creation: bool },
    TooShort,
    RepeatedCharacters,
    KeyboardMashing,
    LowVariety,
    TooFewWords,
}

impl ReasonVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReasonVerdict::Accepted { .. })
    }

    /// Short identifier used in logs and API errors.
    pub fn code(&self) -> &'static str {
        match self {
            ReasonVerdict::Accepted { .. } => "accepted",
            ReasonVerdict::TooShort => "too_short",
            ReasonVerdict::RepeatedCharacters => "repeated_characters",
            ReasonVerdict::KeyboardMashing => "keyboard_mashing",
            ReasonVerdict::LowVariety => "low_variety",
            ReasonVerdict::TooFewWords => "too_few_words",
        }
    }

    /// Message suitable for showing next to the reason field.
    pub fn message(&self) -> &'static str {
        match self {
            ReasonVerdict::Accepted { .. } => "Reason accepted.",
            ReasonVerdict::TooShort => "Please write at least 10 characters.",
            ReasonVerdict::RepeatedCharacters => "The reason repeats the same character too many times.",
            ReasonVerdict::KeyboardMashing => "The reason looks like keyboard mashing.",
            ReasonVerdict::LowVariety => "The reason uses too few different characters.",
            ReasonVerdict::TooFewWords => "Please describe the reason in at least two words.",
        }
    }
}

type Rule = fn(&str) -> bool;

// Checked in order after the content-creation bypass; the first rule that
// fires decides the verdict.
static RULES: &[(ReasonVerdict, Rule)] = &[
    (ReasonVerdict::RepeatedCharacters, has_long_char_run),
    (ReasonVerdict::KeyboardMashing, has_keyboard_mash),
    (ReasonVerdict::LowVariety, has_low_variety),
    (ReasonVerdict::TooFewWords, has_too_few_words),
];

fn has_long_char_run(text: &str) -> bool {
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run > MAX_CHAR_RUN {
            return true;
        }
    }
    false
}

fn has_keyboard_mash(text: &str) -> bool {
    KEYBOARD_MASH_RE.is_match(text)
}

fn has_low_variety(text: &str) -> bool {
    let distinct: HashSet<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    distinct.len() < MIN_DISTINCT_CHARS
}

fn has_too_few_words(text: &str) -> bool {
    text.split_whitespace().count() < MIN_WORDS
}

#[derive(Debug, Clone)]
pub struct ReasonValidator {
    keywords: Vec<String>,
}

impl Default for ReasonValidator {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONTENT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl ReasonValidator {
    /// Builds a validator with a custom content-creation vocabulary.
    /// Keywords are lower-cased; blank ones are dropped.
    pub fn new(keywords: Vec<String>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn verdict(&self, text: &str) -> ReasonVerdict {
        let normalized = text.trim().to_lowercase();
        if normalized.chars().count() < MIN_REASON_CHARS {
            return ReasonVerdict::TooShort;
        }
        if self.mentions_content_creation(&normalized) {
            return ReasonVerdict::Accepted {
                content_creation: true,
            };
        }
        for (verdict, rule) in RULES {
            if rule(&normalized) {
                tracing::debug!(rule = verdict.code(), "reason rejected");
                return *verdict;
            }
        }
        ReasonVerdict::Accepted {
            content_creation: false,
        }
    }

    pub fn is_valid_reason(&self, text: &str) -> bool {
        self.verdict(text).is_accepted()
    }

    /// Whether the text declares content-creation intent, independent of
    /// the other heuristics.
    pub fn is_content_creation_reason(&self, text: &str) -> bool {
        self.mentions_content_creation(&text.trim().to_lowercase())
    }

    fn mentions_content_creation(&self, lowered: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        match ac_for_ci(&self.keywords) {
            Some(ac) => ac.is_match(lowered),
            None => self.keywords.iter().any(|k| lowered.contains(k.as_str())),
        }
    }
}
