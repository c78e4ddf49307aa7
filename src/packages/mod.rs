//! Package lookup used by coding sessions.
//!
//! The core only depends on [`PackageLookup`]. [`KeywordPackageLookup`] is a
//! small offline implementation that maps topic keywords to well-known crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ThinkingResult;

/// A suggested package and how relevant it looks for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSuggestion {
    /// Package name.
    pub name: String,
    /// Relevance, 0.0-1.0.
    pub relevance_score: f64,
}

/// Score added for each known package a proposal overlaps.
pub const REINVENTION_WEIGHT: f64 = 0.3;
/// Score above which a proposal is flagged as reinvention.
pub const DEFAULT_REINVENTION_THRESHOLD: f64 = 0.8;

const MIN_NAME_TOKEN_LEN: usize = 3;

/// Whether proposed code duplicates packages already known to a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReinventionReport {
    /// `score > threshold`.
    pub reinvention_detected: bool,
    /// Overlap score, 0.0-1.0.
    pub score: f64,
    /// Threshold the score was compared against.
    pub threshold: f64,
    /// Known packages the proposal overlaps.
    pub matching_packages: Vec<String>,
    /// One hint per matching package.
    pub suggestions: Vec<String>,
    /// Overall advice.
    pub recommendation: String,
}

/// Score a proposal against known packages.
///
/// A package overlaps when a part of its name (split on `-` and `_`, at least
/// three characters) occurs in the proposal, case-insensitively.
pub fn detect_reinvention(
    known: &[PackageSuggestion],
    proposal: &str,
    threshold: f64,
) -> ReinventionReport {
    let proposal = proposal.to_lowercase();
    let matching_packages: Vec<String> = known
        .iter()
        .filter(|p| {
            p.name
                .to_lowercase()
                .split(['-', '_'])
                .filter(|part| part.len() >= MIN_NAME_TOKEN_LEN)
                .any(|part| proposal.contains(part))
        })
        .map(|p| p.name.clone())
        .collect();

    let score = (matching_packages.len() as f64 * REINVENTION_WEIGHT).min(1.0);
    let recommendation = if matching_packages.is_empty() {
        "Custom implementation may be needed"
    } else {
        "Use existing packages"
    };

    ReinventionReport {
        reinvention_detected: score > threshold,
        score,
        threshold,
        suggestions: matching_packages
            .iter()
            .map(|name| format!("Consider using {} instead", name))
            .collect(),
        matching_packages,
        recommendation: recommendation.to_string(),
    }
}

/// Suggests packages for a free-text task description.
#[async_trait]
pub trait PackageLookup: Send + Sync {
    /// Suggestions, most relevant first.
    async fn suggest(&self, query: &str) -> ThinkingResult<Vec<PackageSuggestion>>;
}

const KEYWORDS: &[(&str, &[&str])] = &[
    ("http", &["reqwest", "hyper", "ureq"]),
    ("web", &["axum", "actix-web", "warp"]),
    ("data", &["polars", "ndarray", "csv"]),
    ("database", &["sqlx", "rusqlite", "diesel"]),
    ("sql", &["sqlx", "rusqlite"]),
    ("test", &["mockall", "proptest", "rstest"]),
    ("json", &["serde_json", "schemars", "jsonschema"]),
    ("async", &["tokio", "futures", "async-trait"]),
    ("cli", &["clap", "dialoguer"]),
    ("log", &["tracing", "tracing-subscriber", "log"]),
    ("error", &["thiserror", "anyhow"]),
    ("config", &["dotenvy", "config", "toml"]),
    ("time", &["chrono", "time"]),
    ("auth", &["jsonwebtoken", "argon2", "oauth2"]),
    ("cache", &["moka", "lru"]),
];

/// Relevance of a package named in the query itself.
const NAMED_RELEVANCE: f64 = 0.8;
/// Relevance of a package reached through a topic keyword.
const KEYWORD_RELEVANCE: f64 = 0.5;

/// Offline keyword-based package lookup.
#[derive(Debug, Clone, Default)]
pub struct KeywordPackageLookup;

impl KeywordPackageLookup {
    /// Create a new lookup.
    pub fn new() -> Self {
        Self
    }

    fn rank(query: &str) -> Vec<PackageSuggestion> {
        let query = query.to_lowercase();
        let mut suggestions: Vec<PackageSuggestion> = Vec::new();

        for (keyword, packages) in KEYWORDS {
            if !query.contains(keyword) {
                continue;
            }
            for package in *packages {
                let relevance = if query.contains(package) {
                    NAMED_RELEVANCE
                } else {
                    KEYWORD_RELEVANCE
                };
                match suggestions.iter_mut().find(|s| s.name == *package) {
                    Some(existing) => {
                        existing.relevance_score = existing.relevance_score.max(relevance)
                    }
                    None => suggestions.push(PackageSuggestion {
                        name: package.to_string(),
                        relevance_score: relevance,
                    }),
                }
            }
        }

        suggestions.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| a.name.cmp(&b.name))
        });
        suggestions
    }
}

#[async_trait]
impl PackageLookup for KeywordPackageLookup {
    async fn suggest(&self, query: &str) -> ThinkingResult<Vec<PackageSuggestion>> {
        Ok(Self::rank(query))
    }
}
