//! Ordered response grammars.
//!
//! A [`Grammar`] is a list of named, versioned [`GrammarRule`]s evaluated in
//! order against raw vendor text. The first rule whose [`Matcher`] accepts the
//! text extracts the verdict; if none does, the grammar's fallback extractor
//! runs. Adding a new vendor response variant means adding a rule, nothing else.

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::ParsedResponse;

/// How a rule decides whether it applies.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Regular expression; capture groups are exposed to the extractor.
    Pattern(Regex),
    /// Case-sensitive prefix.
    Prefix(&'static str),
    /// Case-sensitive substring anywhere in the text.
    Contains(&'static str),
}

impl Matcher {
    pub fn pattern(re: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Pattern(Regex::new(re)?))
    }

    fn apply<'t>(&self, raw: &'t str) -> Option<RuleMatch<'t>> {
        match self {
            Matcher::Pattern(re) => re.captures(raw).map(|c| RuleMatch {
                raw,
                captures: Some(c),
            }),
            Matcher::Prefix(p) => raw.starts_with(*p).then_some(RuleMatch {
                raw,
                captures: None,
            }),
            Matcher::Contains(s) => raw.contains(*s).then_some(RuleMatch {
                raw,
                captures: None,
            }),
        }
    }
}

/// Text a rule matched, with its capture groups if any.
#[derive(Debug)]
pub struct RuleMatch<'t> {
    raw: &'t str,
    captures: Option<Captures<'t>>,
}

impl<'t> RuleMatch<'t> {
    pub fn raw(&self) -> &'t str {
        self.raw
    }

    /// Capture group `i`, or an empty string if it did not participate.
    pub fn group(&self, i: usize) -> &'t str {
        self.captures
            .as_ref()
            .and_then(|c| c.get(i))
            .map(|m| m.as_str())
            .unwrap_or_default()
    }
}

pub type Extractor = fn(&RuleMatch<'_>) -> ParsedResponse;

#[derive(Debug, Clone)]
pub struct GrammarRule {
    pub name: &'static str,
    pub version: u16,
    pub matcher: Matcher,
    pub extract: Extractor,
}

impl GrammarRule {
    pub fn new(name: &'static str, version: u16, matcher: Matcher, extract: Extractor) -> Self {
        Self {
            name,
            version,
            matcher,
            extract,
        }
    }

    pub fn label(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }
}

#[derive(Debug, Clone)]
pub struct Grammar {
    vendor: &'static str,
    rules: Vec<GrammarRule>,
    fallback: Extractor,
}

impl Grammar {
    /// Empty grammar for `vendor`; `fallback` runs when no rule matches.
    pub fn new(vendor: &'static str, fallback: Extractor) -> Self {
        Self {
            vendor,
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn rule(mut self, rule: GrammarRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn parse(&self, raw: &str) -> ParsedResponse {
        for rule in &self.rules {
            if let Some(m) = rule.matcher.apply(raw) {
                let mut parsed = (rule.extract)(&m);
                parsed.rule = rule.label();
                debug!(vendor = self.vendor, rule = %parsed.rule, "response matched");
                return parsed;
            }
        }
        warn!(vendor = self.vendor, raw, "response matched no grammar rule");
        let mut parsed = (self.fallback)(&RuleMatch {
            raw,
            captures: None,
        });
        parsed.rule = "fallback".to_string();
        parsed
    }
}
