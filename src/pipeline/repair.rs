//! Response repair: find the JSON payload inside the oracle's raw text.
//!
//! Even when told to answer with JSON only, VLMs wrap the payload in a
//! ```` ```json ```` fence, prepend a sentence of commentary, or append a
//! summary. Rather than one clever regex, extraction is an ordered list of
//! strategies. Each strategy either returns a parsed value or `None`; the
//! first success wins.
//!
//! ## Strategy Order
//!
//! 1. [`Strategy::FencedBlock`]: the body of the first fenced code block that
//!    parses. Prose around the fence, including stray braces, is ignored.
//! 2. [`Strategy::BraceSpan`]: the text from the first `{` to the last `}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Which extraction strategy produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    FencedBlock,
    BraceSpan,
}

/// A successfully parsed payload plus the strategy that found it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPayload {
    pub strategy: Strategy,
    pub value: Value,
}

type StrategyFn = fn(&str) -> Option<Value>;

/// Strategies in the order they are tried.
const STRATEGIES: &[(Strategy, StrategyFn)] = &[
    (Strategy::FencedBlock, fenced_block),
    (Strategy::BraceSpan, brace_span),
];

/// Apply every strategy in order and return the first parsable payload.
pub fn extract_json(raw: &str) -> Option<ParsedPayload> {
    STRATEGIES.iter().find_map(|(strategy, apply)| {
        let value = apply(raw)?;
        debug!("Oracle payload extracted via {:?}", strategy);
        Some(ParsedPayload {
            strategy: *strategy,
            value,
        })
    })
}

/// First `n` characters of the reply, for error messages.
pub fn preview(raw: &str, n: usize) -> String {
    raw.trim().chars().take(n).collect()
}

// ── Strategy 1: fenced code block ────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

fn fenced_block(raw: &str) -> Option<Value> {
    RE_FENCE
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| serde_json::from_str(body.as_str().trim()).ok())
}

// ── Strategy 2: outermost brace span ─────────────────────────────────────────

fn brace_span(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
