//! Search request and response types.

use serde::{Deserialize, Serialize};

use lexgraph_store::Subgraph;

use crate::error::{Result, SearchError};

/// Maximum query length in characters.
pub const MAX_QUERY_CHARS: usize = 1000;

/// Maximum result count per request.
pub const MAX_K: usize = 100;

/// Search strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Embedding similarity only
    Vector,
    /// Full-text matching only
    Fulltext,
    /// Vector and fulltext fused by reciprocal rank
    #[default]
    Hybrid,
    /// Intent-anchored expansion
    Intent,
}

impl std::str::FromStr for Strategy {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "fulltext" => Ok(Self::Fulltext),
            "hybrid" => Ok(Self::Hybrid),
            "intent" => Ok(Self::Intent),
            other => Err(SearchError::InvalidInput(format!(
                "unknown strategy '{other}'; valid: vector, fulltext, hybrid, intent"
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Vector => "vector",
            Self::Fulltext => "fulltext",
            Self::Hybrid => "hybrid",
            Self::Intent => "intent",
        };
        write!(f, "{name}")
    }
}

/// Result filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub source_doc: Option<String>,
    pub min_confidence: Option<f32>,
}

/// A search query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default)]
    pub expand_graph: bool,
    #[serde(default = "default_graph_depth")]
    pub graph_depth: usize,
}

fn default_k() -> usize {
    10
}

fn default_graph_depth() -> usize {
    1
}

impl SearchRequest {
    /// A request with defaults: hybrid strategy, k = 10, no expansion.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            language: None,
            k: default_k(),
            strategy: Strategy::default(),
            filters: SearchFilters::default(),
            expand_graph: false,
            graph_depth: default_graph_depth(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_expansion(mut self, depth: usize) -> Self {
        self.expand_graph = true;
        self.graph_depth = depth;
        self
    }

    /// Validate bounds. `depth_max` comes from configuration.
    pub fn validate(&self, depth_max: usize) -> Result<()> {
        let query_chars = self.query.trim().chars().count();
        if query_chars == 0 {
            return Err(SearchError::InvalidInput("query must not be empty".into()));
        }
        if query_chars > MAX_QUERY_CHARS {
            return Err(SearchError::InvalidInput(format!(
                "query length {query_chars} exceeds {MAX_QUERY_CHARS} characters"
            )));
        }
        if self.k == 0 || self.k > MAX_K {
            return Err(SearchError::InvalidInput(format!(
                "k must be within 1..={MAX_K}, got {}",
                self.k
            )));
        }
        if self.expand_graph && !(1..=depth_max).contains(&self.graph_depth) {
            return Err(SearchError::InvalidInput(format!(
                "graph_depth must be within 1..={depth_max}, got {}",
                self.graph_depth
            )));
        }
        if let Some(min_confidence) = self.filters.min_confidence {
            if !(0.0..=1.0).contains(&min_confidence) {
                return Err(SearchError::InvalidInput(format!(
                    "min_confidence must be within [0, 1], got {min_confidence}"
                )));
            }
        }
        Ok(())
    }
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk identifier (its content hash)
    pub chunk_id: String,
    pub content: String,
    pub language: String,
    pub source_doc: String,
    pub position: u32,
    pub score: f32,
    /// Query terms found in the content (fulltext and hybrid only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlights: Option<Vec<String>>,
}

/// Ranked response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub search_time_ms: u64,
    pub strategy_used: String,
    /// True when a hybrid sub-query missed the deadline and results come
    /// from the surviving branch only
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_nodes: Option<Subgraph>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(Strategy::from_str("vector").unwrap(), Strategy::Vector);
        assert_eq!(Strategy::from_str("HYBRID").unwrap(), Strategy::Hybrid);
        assert!(Strategy::from_str("graph").is_err());
    }

    #[test]
    fn test_defaults() {
        let request = SearchRequest::new("hello");
        assert_eq!(request.k, 10);
        assert_eq!(request.strategy, Strategy::Hybrid);
        assert!(!request.expand_graph);
        assert_eq!(request.graph_depth, 1);
    }

    #[test]
    fn test_validate_query_bounds() {
        assert!(SearchRequest::new("").validate(3).is_err());
        assert!(SearchRequest::new("   ").validate(3).is_err());
        assert!(SearchRequest::new("x".repeat(1001)).validate(3).is_err());
        assert!(SearchRequest::new("x".repeat(1000)).validate(3).is_ok());
    }

    #[test]
    fn test_validate_k_bounds() {
        assert!(SearchRequest::new("q").with_k(0).validate(3).is_err());
        assert!(SearchRequest::new("q").with_k(101).validate(3).is_err());
        assert!(SearchRequest::new("q").with_k(100).validate(3).is_ok());
    }

    #[test]
    fn test_validate_depth_bounds() {
        assert!(SearchRequest::new("q").with_expansion(3).validate(3).is_ok());
        assert!(SearchRequest::new("q").with_expansion(4).validate(3).is_err());
        assert!(SearchRequest::new("q").with_expansion(0).validate(3).is_err());
        // Depth only matters when expansion is requested
        let mut request = SearchRequest::new("q");
        request.graph_depth = 9;
        assert!(request.validate(3).is_ok());
    }

    #[test]
    fn test_validate_confidence_range() {
        let mut request = SearchRequest::new("q");
        request.filters.min_confidence = Some(1.5);
        assert!(request.validate(3).is_err());
        request.filters.min_confidence = Some(0.5);
        assert!(request.validate(3).is_ok());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"query": "hello", "strategy": "vector"}"#).unwrap();
        assert_eq!(request.strategy, Strategy::Vector);
        assert_eq!(request.k, 10);
    }
}
