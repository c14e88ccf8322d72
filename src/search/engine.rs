//! File Search Engine (C3): evaluates each streamed file against one of
//! {fuzzy, exact, glob, regex, content} and emits ranked matches through the
//! Priority Stream.

use crate::config::{SearchConfig, WalkerConfig};
use crate::error::SearchError;
use crate::search::cache::ResultCache;
use crate::search::priority_stream::PriorityStream;
use crate::search::walker::{self, SecurityGate, WalkOptions};
use globset::GlobBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Fuzzy,
    Exact,
    Glob,
    Regex,
    Content,
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Fuzzy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Fuzzy,
    Exact,
    Glob,
    Regex,
    Content,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub last_modified: Option<u64>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: String,
    pub score: f64,
    pub match_type: MatchKind,
    #[serde(default)]
    pub line_numbers: Vec<usize>,
    pub preview: Option<String>,
    #[serde(default)]
    pub relevance_factors: HashMap<String, f64>,
    #[serde(default)]
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub pattern: String,
    pub strategy: SearchStrategy,
    pub min_score: f64,
    pub max_results: usize,
    pub max_file_size: u64,
    pub cache_results: bool,
}

impl SearchOptions {
    pub fn from_config(pattern: impl Into<String>, config: &SearchConfig) -> Self {
        Self {
            pattern: pattern.into(),
            strategy: SearchStrategy::default(),
            min_score: config.min_score,
            max_results: config.max_results,
            max_file_size: config.max_file_size,
            cache_results: true,
        }
    }
}

/// Per-operation measurement the engine reports after every `search` call.
/// Kept as a standalone struct (rather than depending on the Performance
/// Monitor's concrete type) so the two components can be wired or omitted
/// independently.
#[derive(Debug, Clone)]
pub struct SearchMetricsEvent {
    pub files_scanned: u64,
    pub results: usize,
    pub duration_ms: u64,
    pub strategy: SearchStrategy,
    pub cache_hit: bool,
}

pub trait SearchMetricsSink: Send + Sync {
    fn record(&self, event: SearchMetricsEvent);
}

fn cache_key(root: &Path, options: &SearchOptions) -> String {
    let fingerprint = crate::job::fingerprint::compute(
        "search",
        &serde_json::to_value(options).unwrap_or(serde_json::Value::Null),
    );
    format!("{}:{}", root.display(), fingerprint)
}

/// Case-insensitive subsequence scoring in [0,1]. `None` when `pattern`'s
/// characters do not all appear, in order, within `candidate`.
fn fuzzy_score(pattern: &str, candidate: &str) -> Option<f64> {
    if pattern.is_empty() {
        return Some(0.0);
    }
    let pattern_lower = pattern.to_lowercase();
    let candidate_lower = candidate.to_lowercase();

    let mut matched = 0usize;
    let mut contiguous_run = 0usize;
    let mut best_run = 0usize;
    let mut chars = pattern_lower.chars().peekable();

    for c in candidate_lower.chars() {
        if let Some(&next) = chars.peek() {
            if c == next {
                chars.next();
                matched += 1;
                contiguous_run += 1;
                best_run = best_run.max(contiguous_run);
                continue;
            }
        }
        contiguous_run = 0;
    }

    if chars.peek().is_some() {
        return None;
    }

    let completeness = matched as f64 / pattern_lower.chars().count() as f64;
    let density = matched as f64 / candidate_lower.chars().count().max(1) as f64;
    let contiguity_bonus = best_run as f64 / pattern_lower.chars().count() as f64 * 0.2;
    Some((completeness * 0.6 + density * 0.2 + contiguity_bonus).min(1.0))
}

fn exact_score(pattern: &str, basename: &str) -> Option<f64> {
    if basename.eq_ignore_ascii_case(pattern) {
        Some(1.0)
    } else if basename.to_lowercase().contains(&pattern.to_lowercase()) {
        Some(0.8)
    } else {
        None
    }
}

fn preview_from_line(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() > 100 {
        trimmed.chars().take(100).collect()
    } else {
        trimmed.to_string()
    }
}

pub struct SearchEngine {
    walker_config: WalkerConfig,
    cache: Arc<ResultCache>,
    gate: Arc<dyn SecurityGate>,
    metrics: Option<Arc<dyn SearchMetricsSink>>,
}

impl SearchEngine {
    pub fn new(walker_config: WalkerConfig, cache: Arc<ResultCache>) -> Self {
        Self {
            walker_config,
            cache,
            gate: Arc::new(walker::AllowAll),
            metrics: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn SecurityGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn SearchMetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn search(&self, root: &Path, options: &SearchOptions) -> Result<Vec<SearchMatch>, SearchError> {
        let start = Instant::now();

        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|_| SearchError::InvalidPath(root.display().to_string()))?;
        if !metadata.is_dir() {
            return Err(SearchError::InvalidPath(root.display().to_string()));
        }
        if !self.gate.allows(root) {
            return Err(SearchError::PathDenied(root.display().to_string()));
        }

        let key = cache_key(root, options);
        if options.cache_results {
            if let Some(cached) = self.cache.get(&key) {
                self.report_metrics(options, 0, cached.len(), start, true);
                return Ok(cached);
            }
        }

        let compiled_regex = match options.strategy {
            SearchStrategy::Regex | SearchStrategy::Content => match Regex::new(&options.pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(pattern = %options.pattern, error = %err, "invalid regex, returning empty result");
                    return Ok(Vec::new());
                }
            },
            _ => None,
        };

        let compiled_glob = if options.strategy == SearchStrategy::Glob {
            match GlobBuilder::new(&options.pattern).literal_separator(true).build() {
                Ok(glob) => Some(glob.compile_matcher()),
                Err(err) => {
                    tracing::warn!(pattern = %options.pattern, error = %err, "invalid glob, returning empty result");
                    return Ok(Vec::new());
                }
            }
        } else {
            None
        };

        let walk_options = WalkOptions::from_config(&self.walker_config).with_gate(self.gate.clone());
        let mut rx = walker::walk(root.to_path_buf(), walk_options);

        let mut stream: PriorityStream<SearchMatch> = PriorityStream::new(options.max_results);
        let mut files_scanned = 0u64;

        while let Some(path) = rx.recv().await {
            files_scanned += 1;
            let candidate = match options.strategy {
                SearchStrategy::Content => self.evaluate_content(&path, options, compiled_regex.as_ref()).await,
                _ => self.evaluate_filename(&path, root, options, compiled_regex.as_ref(), compiled_glob.as_ref()),
            };

            if let Some(candidate) = candidate {
                if candidate.score >= options.min_score {
                    stream.add(candidate.clone(), candidate.score);
                }
            }
        }

        let results = stream.drain();

        if options.cache_results {
            self.cache.put(key, results.clone());
        }
        self.report_metrics(options, files_scanned, results.len(), start, false);
        Ok(results)
    }

    fn evaluate_filename(
        &self,
        path: &Path,
        root: &Path,
        options: &SearchOptions,
        regex: Option<&Regex>,
        glob: Option<&globset::GlobMatcher>,
    ) -> Option<SearchMatch> {
        let basename = path.file_name()?.to_str()?;
        let relative = path.strip_prefix(root).unwrap_or(path);

        let (score, match_type) = match options.strategy {
            SearchStrategy::Fuzzy => (fuzzy_score(&options.pattern, basename)?, MatchKind::Fuzzy),
            SearchStrategy::Exact => (exact_score(&options.pattern, basename)?, MatchKind::Exact),
            SearchStrategy::Glob => {
                if glob?.is_match(relative) {
                    (1.0, MatchKind::Glob)
                } else {
                    return None;
                }
            }
            SearchStrategy::Regex => {
                if regex?.is_match(basename) {
                    (0.9, MatchKind::Regex)
                } else {
                    return None;
                }
            }
            SearchStrategy::Content => unreachable!("content handled separately"),
        };

        Some(SearchMatch {
            path: path.display().to_string(),
            score,
            match_type,
            line_numbers: Vec::new(),
            preview: None,
            relevance_factors: HashMap::new(),
            metadata: file_metadata(path),
        })
    }

    async fn evaluate_content(&self, path: &Path, options: &SearchOptions, regex: Option<&Regex>) -> Option<SearchMatch> {
        let regex = regex?;
        let metadata = tokio::fs::metadata(path).await.ok()?;
        if metadata.len() > options.max_file_size {
            return None;
        }

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unreadable file during content scan");
                return None;
            }
        };

        let mut line_numbers = Vec::new();
        let mut preview = None;
        for (idx, line) in contents.lines().enumerate() {
            if regex.is_match(line) {
                line_numbers.push(idx + 1);
                if preview.is_none() && !line.trim().is_empty() {
                    preview = Some(preview_from_line(line));
                }
            }
        }

        if line_numbers.is_empty() {
            return None;
        }

        let score = (0.8 + 0.01 * line_numbers.len() as f64).min(1.0);
        Some(SearchMatch {
            path: path.display().to_string(),
            score,
            match_type: MatchKind::Content,
            line_numbers,
            preview,
            relevance_factors: HashMap::new(),
            metadata: file_metadata_from(path, &metadata),
        })
    }

    fn report_metrics(&self, options: &SearchOptions, files_scanned: u64, results: usize, start: Instant, cache_hit: bool) {
        if let Some(sink) = &self.metrics {
            sink.record(SearchMetricsEvent {
                files_scanned,
                results,
                duration_ms: start.elapsed().as_millis() as u64,
                strategy: options.strategy,
                cache_hit,
            });
        }
    }
}

fn file_metadata(path: &Path) -> FileMetadata {
    match std::fs::metadata(path) {
        Ok(meta) => file_metadata_from(path, &meta),
        Err(_) => FileMetadata {
            size: 0,
            last_modified: None,
            extension: path.extension().and_then(|e| e.to_str()).map(String::from),
        },
    }
}

fn file_metadata_from(path: &Path, meta: &std::fs::Metadata) -> FileMetadata {
    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64);
    FileMetadata {
        size: meta.len(),
        last_modified,
        extension: path.extension().and_then(|e| e.to_str()).map(String::from),
    }
}
