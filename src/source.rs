//! Work sources: the collaborator that discovers and processes items
//!
//! The orchestrator treats a [`WorkSource`] as opaque, possibly slow and
//! possibly failing. Every call gets a [`WorkContext`] whose cancellation token
//! fires when the task is cancelled or its total timeout elapses, so a source
//! can stop early instead of being killed mid-flight.

use crate::config::HttpSourceConfig;
use crate::error::{Error, Result, WorkError};
use crate::types::{TaskId, WorkItem};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-call context handed to a [`WorkSource`]
#[derive(Clone, Debug)]
pub struct WorkContext {
    /// Task the call belongs to
    pub task_id: TaskId,
    /// Attempt number of this call (1-based; 0 for discovery)
    pub attempt: u32,
    /// Fires when the caller no longer wants the result
    pub cancel: CancellationToken,
}

/// A target found during discovery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredTarget {
    /// The target itself
    pub target: String,
    /// Link hops from the seed (1 = linked directly from the seed)
    pub depth: u32,
}

impl DiscoveredTarget {
    /// A target found `depth` hops away from the seed
    pub fn new(target: impl Into<String>, depth: u32) -> Self {
        Self {
            target: target.into(),
            depth,
        }
    }
}

impl From<String> for DiscoveredTarget {
    fn from(target: String) -> Self {
        Self::new(target, 1)
    }
}

impl From<&str> for DiscoveredTarget {
    fn from(target: &str) -> Self {
        Self::new(target, 1)
    }
}

/// Collaborator that expands a seed into targets and processes one target
///
/// Implementations must be safe to call again for the same target after a
/// failure.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Discover the targets reachable from `seed` within `max_depth` link hops
    ///
    /// Only called with `max_depth >= 1`. The seed itself is not expected in
    /// the result. Each target carries the hop at which it was found.
    async fn discover(
        &self,
        seed: &str,
        max_depth: u32,
        ctx: &WorkContext,
    ) -> std::result::Result<Vec<DiscoveredTarget>, WorkError>;

    /// Fetch one target and extract its content
    async fn fetch_and_extract(
        &self,
        target: &str,
        ctx: &WorkContext,
    ) -> std::result::Result<serde_json::Value, WorkError>;
}

/// Turn a seed into the task's item list
///
/// Depth 0 yields exactly the seed. Otherwise the source's discovery result is
/// de-duplicated, keeping first occurrences in order. Item depths are clamped
/// to `1..=max_depth`.
pub(crate) async fn expand_items(
    source: &dyn WorkSource,
    seed: &str,
    max_depth: u32,
    ctx: &WorkContext,
) -> std::result::Result<Vec<WorkItem>, WorkError> {
    if max_depth == 0 {
        return Ok(vec![WorkItem::new(seed, 0)]);
    }

    let discovered = source.discover(seed, max_depth, ctx).await?;
    let mut seen = HashSet::new();
    Ok(discovered
        .into_iter()
        .filter(|found| !found.target.is_empty() && seen.insert(found.target.clone()))
        .map(|found| WorkItem::new(found.target, found.depth.clamp(1, max_depth)))
        .collect())
}

/// [`WorkSource`] over plain HTTP
///
/// Discovery follows same-host `href` links breadth-first; extraction strips
/// markup and returns the visible text. This is deliberately simple and makes
/// no attempt at robust HTML parsing.
#[derive(Debug)]
pub struct HttpWorkSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
    href: Regex,
    article_path: Regex,
    script_blocks: Regex,
    tags: Regex,
    whitespace: Regex,
}

struct Page {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl HttpWorkSource {
    /// Build the HTTP client and link patterns
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            href: compile(r#"(?i)href\s*=\s*["']([^"']+)["']"#)?,
            article_path: compile(
                r"(?i)/(posts?|articles?|blog|p|s)/|/20\d{2}/|/[a-z0-9][a-z0-9-]{7,}/?$",
            )?,
            script_blocks: compile(r"(?is)<script\b.*?</script>|<style\b.*?</style>")?,
            tags: compile(r"(?s)<[^>]*>")?,
            whitespace: compile(r"\s+")?,
        })
    }

    async fn get_page(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> std::result::Result<Page, WorkError> {
        let request = async {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await?
                .error_for_status()?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let body = response.text().await?;
            Ok::<_, WorkError>(Page {
                status,
                content_type,
                body,
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(WorkError::Cancelled),
            page = request => page,
        }
    }

    /// Same-host links of a page, resolved against `base`, in document order
    fn extract_links(&self, base: &Url, body: &str) -> Vec<Url> {
        self.href
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|href| !href.starts_with('#') && !href.starts_with("javascript:"))
            .filter_map(|href| base.join(href).ok())
            .filter(|link| matches!(link.scheme(), "http" | "https"))
            .filter(|link| link.host_str() == base.host_str() && link.port() == base.port())
            .map(|mut link| {
                link.set_fragment(None);
                link
            })
            .filter(|link| !self.config.article_links_only || self.article_path.is_match(link.path()))
            .collect()
    }

    fn extract_text(&self, body: &str) -> String {
        let without_scripts = self.script_blocks.replace_all(body, " ");
        let without_tags = self.tags.replace_all(&without_scripts, " ");
        let collapsed = self.whitespace.replace_all(&without_tags, " ");
        collapsed.trim().chars().take(self.config.max_text_chars).collect()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Other(format!("Invalid pattern {}: {}", pattern, e)))
}

fn parse_target(target: &str) -> std::result::Result<Url, WorkError> {
    Url::parse(target).map_err(|e| WorkError::Permanent(format!("invalid url {}: {}", target, e)))
}

#[async_trait]
impl WorkSource for HttpWorkSource {
    async fn discover(
        &self,
        seed: &str,
        max_depth: u32,
        ctx: &WorkContext,
    ) -> std::result::Result<Vec<DiscoveredTarget>, WorkError> {
        let seed_url = parse_target(seed)?;
        let mut visited: HashSet<Url> = HashSet::from([seed_url.clone()]);
        let mut found: Vec<DiscoveredTarget> = Vec::new();
        let mut frontier = vec![seed_url];

        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for (index, page_url) in frontier.iter().enumerate() {
                // Only the seed page must load; deeper pages are best-effort.
                let page = match self.get_page(page_url, &ctx.cancel).await {
                    Ok(page) => page,
                    Err(e) if depth == 1 && index == 0 => return Err(e),
                    Err(WorkError::Cancelled) => return Err(WorkError::Cancelled),
                    Err(e) => {
                        tracing::debug!(page = %page_url, error = %e, "Skipping unreachable page during discovery");
                        continue;
                    }
                };

                for link in self.extract_links(page_url, &page.body) {
                    if found.len() >= self.config.max_links {
                        return Ok(found);
                    }
                    if visited.insert(link.clone()) {
                        found.push(DiscoveredTarget::new(link.as_str(), depth));
                        next.push(link);
                    }
                }
            }
            frontier = next;
        }

        tracing::debug!(seed = %seed, found = found.len(), "Discovery finished");
        Ok(found)
    }

    async fn fetch_and_extract(
        &self,
        target: &str,
        ctx: &WorkContext,
    ) -> std::result::Result<serde_json::Value, WorkError> {
        let url = parse_target(target)?;
        let page = self.get_page(&url, &ctx.cancel).await?;
        let text = self.extract_text(&page.body);

        Ok(serde_json::json!({
            "url": url.as_str(),
            "status": page.status,
            "content_type": page.content_type,
            "char_count": text.chars().count(),
            "word_count": text.split_whitespace().count(),
            "text": text,
        }))
    }
}
