//! Tool Dispatcher: executes the tool calls a model requested and turns each outcome into a
//! tool-result message tagged with the originating call id.
//!
//! Calls run sequentially in the order the model listed them. A failing tool never aborts the
//! turn; its error is rendered as the tool-result text so the next inference pass can react.

use crate::config::SearchConfig;
use crate::error::ToolError;
use crate::types::{Message, ToolCall};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tool declaration sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// OpenAI `tools[]` entry.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }
}

/// A capability the model may invoke.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Value;

    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.parameters())
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Executes tool calls against a registry, one at a time.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// One `ToolResult` per call, in call order.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let content = match self.execute_one(call).await {
                Ok(text) => text,
                Err(e) => format!("Error: {}", e),
            };
            results.push(Message::ToolResult {
                content,
                tool_call_id: call.id.clone(),
            });
        }
        results
    }

    async fn execute_one(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.call_timeout, tool.execute(call)).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::Backend(format!(
                "'{}' timed out after {}s",
                call.name,
                self.call_timeout.as_secs()
            ))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(text) => tracing::info!(
                target: "maya::tools",
                tool = %call.name,
                call_id = %call.id,
                elapsed_ms,
                chars = text.len(),
                "Tool call completed"
            ),
            Err(e) => tracing::warn!(
                target: "maya::tools",
                tool = %call.name,
                call_id = %call.id,
                elapsed_ms,
                error = %e,
                "Tool call failed"
            ),
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Web search
// ---------------------------------------------------------------------------

const SEARCH_TOOL_NAME: &str = "search";
const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS_CAP: u32 = 20;

/// One search hit as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
enum SearchBackend {
    Tavily { api_key: String },
    DuckDuckGo,
}

/// Live web search. Tavily when an API key is configured, DuckDuckGo HTML results otherwise.
pub struct WebSearchTool {
    backend: SearchBackend,
    max_results: u32,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn from_config(cfg: &SearchConfig) -> Self {
        let backend = match cfg.tavily_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => SearchBackend::Tavily {
                api_key: key.to_string(),
            },
            _ => SearchBackend::DuckDuckGo,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent("Mozilla/5.0 (compatible; Maya/0.1)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            backend,
            max_results: cfg.max_results.clamp(1, MAX_RESULTS_CAP),
            client,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            SearchBackend::Tavily { .. } => "tavily",
            SearchBackend::DuckDuckGo => "duckduckgo",
        }
    }

    pub async fn search(&self, query: &str) -> Result<String, ToolError> {
        tracing::info!(target: "maya::tools", backend = self.backend_name(), %query, "Searching the web");
        let hits = match &self.backend {
            SearchBackend::Tavily { api_key } => self.search_tavily(api_key, query).await?,
            SearchBackend::DuckDuckGo => self.search_duckduckgo(query).await?,
        };
        Ok(render_hits(query, &hits))
    }

    async fn search_tavily(&self, api_key: &str, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let body = json!({
            "query": query,
            "max_results": self.max_results,
            "search_depth": "basic",
            "include_answer": false,
        });
        let res = self
            .client
            .post(TAVILY_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        let json: Value = res.json().await?;
        if !status.is_success() {
            let err = json
                .get("detail")
                .or_else(|| json.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("Tavily API error");
            return Err(ToolError::Backend(format!("{} ({})", err, status)));
        }
        Ok(parse_tavily(&json, self.max_results as usize))
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<Vec<SearchHit>, ToolError> {
        let res = self
            .client
            .post(DUCKDUCKGO_HTML_URL)
            .form(&[("q", query)])
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(ToolError::Backend(format!("DuckDuckGo returned {}", status)));
        }
        let html = res.text().await?;
        Ok(parse_duckduckgo_html(&html, self.max_results as usize))
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web for real-time or factual information (news, prices, weather, recent events). \
         Input is a concise search query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query" }
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        let query = call
            .str_arg("query")
            .ok_or(ToolError::MissingArgument("query"))?;
        self.search(query).await
    }
}

fn parse_tavily(json: &Value, limit: usize) -> Vec<SearchHit> {
    json.get("results")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    Some(SearchHit {
                        title: r.get("title")?.as_str()?.trim().to_string(),
                        url: r.get("url")?.as_str()?.to_string(),
                        snippet: r
                            .get("content")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .trim()
                            .to_string(),
                    })
                })
                .take(limit)
                .collect()
        })
        .unwrap_or_default()
}

/// Extracts results from the DuckDuckGo HTML endpoint.
pub fn parse_duckduckgo_html(html: &str, limit: usize) -> Vec<SearchHit> {
    let doc = scraper::Html::parse_document(html);
    let result_sel = scraper::Selector::parse(".result").unwrap_or_else(|_| unreachable!());
    let link_sel = scraper::Selector::parse("a.result__a").unwrap_or_else(|_| unreachable!());
    let snippet_sel = scraper::Selector::parse(".result__snippet").unwrap_or_else(|_| unreachable!());

    doc.select(&result_sel)
        .filter_map(|result| {
            let link = result.select(&link_sel).next()?;
            let title = collapse_whitespace(&link.text().collect::<String>());
            if title.is_empty() {
                return None;
            }
            let url = link
                .value()
                .attr("href")
                .map(unwrap_duckduckgo_redirect)
                .unwrap_or_default();
            let snippet = result
                .select(&snippet_sel)
                .next()
                .map(|s| collapse_whitespace(&s.text().collect::<String>()))
                .unwrap_or_default();
            Some(SearchHit { title, url, snippet })
        })
        .take(limit)
        .collect()
}

/// `//duckduckgo.com/l/?uddg=<target>&...` → `<target>`; other hrefs pass through.
fn unwrap_duckduckgo_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numbered `title — snippet (url)` lines, or a no-results sentence.
pub fn render_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{}\".", query);
    }
    hits.iter()
        .enumerate()
        .map(|(i, h)| {
            let mut line = format!("{}. {}", i + 1, h.title);
            if !h.snippet.is_empty() {
                line.push_str(" — ");
                line.push_str(&h.snippet);
            }
            if !h.url.is_empty() {
                line.push_str(&format!(" ({})", h.url));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
