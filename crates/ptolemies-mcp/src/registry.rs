use crate::content::{CallToolResult, TextContent, ToolSpec};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ptolemies_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Search,
    Analytics,
    Knowledge,
    Utilities,
    Integration,
    Custom,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Search => "search",
            ToolCategory::Analytics => "analytics",
            ToolCategory::Knowledge => "knowledge",
            ToolCategory::Utilities => "utilities",
            ToolCategory::Integration => "integration",
            ToolCategory::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Active,
    Inactive,
    Disabled,
    Error,
}

/// Operator-facing metadata attached to a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Calls allowed per sliding minute; None disables rate limiting.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub cache_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_timeout_seconds() -> f64 {
    30.0
}

impl ToolMetadata {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            version: default_version(),
            author: None,
            rate_limit: None,
            timeout_seconds: default_timeout_seconds(),
            cache_ttl_seconds: None,
            requires_auth: false,
            tags: Vec::new(),
        }
    }

    pub fn with_rate_limit(mut self, calls_per_minute: u32) -> Self {
        self.rate_limit = Some(calls_per_minute);
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolUsageStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_execution_time_ms: f64,
    pub avg_execution_time_ms: f64,
    pub last_called: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

/// A tool implementation. `validate_arguments` may reject a call before the
/// handler runs.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, arguments: serde_json::Value) -> Result<Vec<TextContent>>;

    fn validate_arguments(&self, _arguments: &serde_json::Value) -> bool {
        true
    }
}

struct RegisteredTool {
    handler: Arc<dyn ToolHandler>,
    spec: ToolSpec,
    metadata: ToolMetadata,
    status: ToolStatus,
    usage_stats: ToolUsageStats,
    registered_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTool {
    metadata: ToolMetadata,
    status: ToolStatus,
    usage_stats: ToolUsageStats,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedConfig {
    tools: HashMap<String, PersistedTool>,
}

/// Dynamic tool registry with per-tool rate limiting, timeouts, and usage
/// accounting. Handlers live only in memory; `save_configuration` persists
/// metadata and stats as JSON.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    /// Sliding-window call timestamps, one lock per tool so a hot tool does
    /// not serialize the whole registry.
    rate_windows: Mutex<HashMap<String, Arc<Mutex<VecDeque<Instant>>>>>,
    config_file: Option<PathBuf>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            rate_windows: Mutex::new(HashMap::new()),
            config_file: None,
        }
    }

    pub fn with_config_file(path: impl Into<PathBuf>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            rate_windows: Mutex::new(HashMap::new()),
            config_file: Some(path.into()),
        }
    }

    /// Register a tool. Returns false (and changes nothing) when the name is
    /// already taken.
    pub fn register(
        &self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
        spec: ToolSpec,
        metadata: ToolMetadata,
    ) -> bool {
        let mut tools = self.tools.write();
        if tools.contains_key(name) {
            warn!(tool = name, "duplicate tool registration rejected");
            return false;
        }
        tools.insert(
            name.to_string(),
            RegisteredTool {
                handler,
                spec,
                metadata,
                status: ToolStatus::Active,
                usage_stats: ToolUsageStats::default(),
                registered_at: chrono::Utc::now(),
            },
        );
        info!(tool = name, "tool registered");
        true
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().remove(name).is_some();
        if removed {
            self.rate_windows.lock().remove(name);
            info!(tool = name, "tool unregistered");
        }
        removed
    }

    /// Execute a registered tool. All failure paths come back as
    /// error-flagged content; usage stats are updated regardless of outcome.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> CallToolResult {
        let (handler, metadata) = {
            let tools = self.tools.read();
            match tools.get(name) {
                None => {
                    return CallToolResult::error(format!("Tool '{name}' is not registered"));
                }
                Some(tool) if tool.status != ToolStatus::Active => {
                    return CallToolResult::error(format!("Tool '{name}' is not active"));
                }
                Some(tool) => (Arc::clone(&tool.handler), tool.metadata.clone()),
            }
        };

        if let Some(limit) = metadata.rate_limit {
            if !self.check_rate_limit(name, limit) {
                self.record_failure(name, "rate limit exceeded", 0.0);
                return CallToolResult::error(format!(
                    "Tool '{name}' rate limit exceeded ({limit} calls/minute)"
                ));
            }
        }

        if !handler.validate_arguments(&arguments) {
            self.record_failure(name, "invalid arguments", 0.0);
            return CallToolResult::error(format!("Invalid arguments for tool '{name}'"));
        }

        let timeout = Duration::from_secs_f64(metadata.timeout_seconds.max(0.0));
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, handler.execute(arguments)).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(content)) => {
                self.record_success(name, elapsed_ms);
                CallToolResult::ok(content)
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                self.record_failure(name, &message, elapsed_ms);
                CallToolResult::error(format!("Tool '{name}' failed: {message}"))
            }
            Err(_) => {
                let message = format!(
                    "Tool '{name}' execution timed out after {}s",
                    metadata.timeout_seconds
                );
                self.record_failure(name, &message, elapsed_ms);
                CallToolResult::error(message)
            }
        }
    }

    fn check_rate_limit(&self, name: &str, limit: u32) -> bool {
        let window = {
            let mut windows = self.rate_windows.lock();
            Arc::clone(
                windows
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
            )
        };
        let mut window = window.lock();
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= limit as usize {
            warn!(tool = name, limit, "tool rate limited");
            return false;
        }
        window.push_back(now);
        true
    }

    fn record_success(&self, name: &str, elapsed_ms: f64) {
        let mut tools = self.tools.write();
        if let Some(tool) = tools.get_mut(name) {
            let stats = &mut tool.usage_stats;
            stats.total_calls += 1;
            stats.successful_calls += 1;
            stats.total_execution_time_ms += elapsed_ms;
            stats.avg_execution_time_ms =
                stats.total_execution_time_ms / stats.total_calls as f64;
            stats.last_called = Some(chrono::Utc::now());
        }
    }

    fn record_failure(&self, name: &str, error: &str, elapsed_ms: f64) {
        let mut tools = self.tools.write();
        if let Some(tool) = tools.get_mut(name) {
            let stats = &mut tool.usage_stats;
            stats.total_calls += 1;
            stats.failed_calls += 1;
            stats.total_execution_time_ms += elapsed_ms;
            stats.avg_execution_time_ms =
                stats.total_execution_time_ms / stats.total_calls as f64;
            stats.last_called = Some(chrono::Utc::now());
            stats.last_error = Some(error.to_string());
        }
    }

    pub fn set_status(&self, name: &str, status: ToolStatus) -> bool {
        let mut tools = self.tools.write();
        match tools.get_mut(name) {
            Some(tool) => {
                tool.status = status;
                info!(tool = name, status = ?status, "tool status changed");
                true
            }
            None => false,
        }
    }

    /// Specs of active tools, optionally restricted to one category.
    pub fn tool_specs(&self, category: Option<ToolCategory>) -> Vec<ToolSpec> {
        let tools = self.tools.read();
        let mut specs: Vec<ToolSpec> = tools
            .values()
            .filter(|t| t.status == ToolStatus::Active)
            .filter(|t| category.map_or(true, |c| t.metadata.category == c))
            .map(|t| t.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn list_tools(
        &self,
        category: Option<ToolCategory>,
        status: Option<ToolStatus>,
    ) -> Vec<serde_json::Value> {
        let tools = self.tools.read();
        let mut listed: Vec<(String, serde_json::Value)> = tools
            .iter()
            .filter(|(_, t)| category.map_or(true, |c| t.metadata.category == c))
            .filter(|(_, t)| status.map_or(true, |s| t.status == s))
            .map(|(name, t)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "name": name,
                        "description": t.metadata.description,
                        "category": t.metadata.category.as_str(),
                        "status": t.status,
                        "version": t.metadata.version,
                        "total_calls": t.usage_stats.total_calls,
                    }),
                )
            })
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        listed.into_iter().map(|(_, v)| v).collect()
    }

    pub fn tool_info(&self, name: &str) -> Option<serde_json::Value> {
        let tools = self.tools.read();
        tools.get(name).map(|t| {
            serde_json::json!({
                "name": name,
                "metadata": t.metadata,
                "status": t.status,
                "usage_stats": t.usage_stats,
                "registered_at": t.registered_at,
                "input_schema": t.spec.input_schema,
            })
        })
    }

    pub fn usage_stats(&self, name: &str) -> Option<ToolUsageStats> {
        self.tools.read().get(name).map(|t| t.usage_stats.clone())
    }

    pub fn registry_stats(&self) -> serde_json::Value {
        let tools = self.tools.read();
        let total = tools.len();
        let active = tools
            .values()
            .filter(|t| t.status == ToolStatus::Active)
            .count();

        let mut categories: HashMap<&str, usize> = HashMap::new();
        for tool in tools.values() {
            *categories.entry(tool.metadata.category.as_str()).or_insert(0) += 1;
        }

        let total_calls: u64 = tools.values().map(|t| t.usage_stats.total_calls).sum();
        let successful: u64 = tools.values().map(|t| t.usage_stats.successful_calls).sum();
        let failed: u64 = tools.values().map(|t| t.usage_stats.failed_calls).sum();

        serde_json::json!({
            "registry_info": {
                "total_tools": total,
                "active_tools": active,
                "inactive_tools": total - active,
            },
            "category_distribution": categories,
            "usage_summary": {
                "total_calls": total_calls,
                "successful_calls": successful,
                "failed_calls": failed,
            },
        })
    }

    /// Persist metadata, status, and stats (not handlers) as JSON.
    pub fn save_configuration(&self) -> Result<()> {
        let path = self.config_file.as_ref().ok_or_else(|| {
            ptolemies_core::PtolemiesError::InvalidArgument("no config file set".into())
        })?;
        let tools = self.tools.read();
        let config = PersistedConfig {
            tools: tools
                .iter()
                .map(|(name, t)| {
                    (
                        name.clone(),
                        PersistedTool {
                            metadata: t.metadata.clone(),
                            status: t.status,
                            usage_stats: t.usage_stats.clone(),
                        },
                    )
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), tools = config.tools.len(), "registry configuration saved");
        Ok(())
    }

    /// Re-apply persisted metadata and status to currently registered tools.
    /// Entries for tools that are not registered are ignored (handlers are
    /// never persisted).
    pub fn load_configuration(&self) -> Result<usize> {
        let path = self.config_file.as_ref().ok_or_else(|| {
            ptolemies_core::PtolemiesError::InvalidArgument("no config file set".into())
        })?;
        let json = std::fs::read_to_string(path)?;
        let config: PersistedConfig = serde_json::from_str(&json)?;

        let mut tools = self.tools.write();
        let mut applied = 0;
        for (name, persisted) in config.tools {
            if let Some(tool) = tools.get_mut(&name) {
                tool.metadata = persisted.metadata;
                tool.status = persisted.status;
                tool.usage_stats = persisted.usage_stats;
                applied += 1;
            }
        }
        info!(path = %path.display(), applied, "registry configuration loaded");
        Ok(applied)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
