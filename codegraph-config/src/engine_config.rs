//! The typed `EngineConfig` consumed by `codegraph-core`'s Conductor
//! constructor (spec §6's configuration table), assembled in increasing
//! precedence: built-in defaults, an XDG `config.toml`'s typed sections,
//! then the flat `CODEGRAPH_*` environment variables that `load_and_apply`
//! has already resolved from `.env` vs. process env vs. the TOML `[env]`
//! table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::LoadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancingStrategyConfig {
    RoundRobin,
    LeastLoaded,
    HighestPriority,
}

impl Default for LoadBalancingStrategyConfig {
    fn default() -> Self {
        LoadBalancingStrategyConfig::LeastLoaded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Memory,
    Onnx,
    Http,
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        EmbeddingProvider::Memory
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("./codegraph.db") }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpAgentsConfig {
    pub max_concurrent: usize,
}

impl Default for McpAgentsConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

/// One embedding provider's connection block (`ollama`/`openai`/`cloudru`/`memory`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderBlock {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_provider_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub auto_pull: bool,
    pub warmup_text: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_provider_concurrency() -> usize {
    2
}

fn default_max_batch_size() -> usize {
    32
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    pub model: Option<String>,
    #[serde(default)]
    pub ollama: ProviderBlock,
    #[serde(default)]
    pub openai: ProviderBlock,
    #[serde(default)]
    pub cloudru: ProviderBlock,
    #[serde(default)]
    pub memory: ProviderBlock,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: None,
            ollama: ProviderBlock::default(),
            openai: ProviderBlock::default(),
            cloudru: ProviderBlock::default(),
            memory: ProviderBlock::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemanticMcpConfig {
    pub cache_warmup_limit: usize,
    pub popular_entities_topic: String,
}

impl Default for SemanticMcpConfig {
    fn default() -> Self {
        Self { cache_warmup_limit: 50, popular_entities_topic: "semantic:popular".to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub agents: McpAgentsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub semantic: SemanticMcpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConstraints {
    pub max_memory_mb: u64,
    pub max_cpu_percent: u8,
    pub max_concurrent_agents: usize,
    pub max_task_queue_size: usize,
}

impl Default for ResourceConstraints {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048,
            max_cpu_percent: 80,
            max_concurrent_agents: 16,
            max_task_queue_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConductorConfig {
    pub max_concurrency: usize,
    pub memory_limit_mb: u64,
    pub priority: u8,
    pub task_queue_limit: usize,
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategyConfig,
    pub complexity_threshold: u8,
    #[serde(default = "default_true")]
    pub mandatory_delegation: bool,
    #[serde(default)]
    pub resource_constraints: ResourceConstraints,
}

fn default_true() -> bool {
    true
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            memory_limit_mb: 512,
            priority: 5,
            task_queue_limit: 1000,
            load_balancing_strategy: LoadBalancingStrategyConfig::default(),
            complexity_threshold: 8,
            mandatory_delegation: true,
            resource_constraints: ResourceConstraints::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryAgentConfig {
    pub max_concurrency: usize,
    pub memory_limit_mb: u64,
    pub priority: u8,
    pub simple_query_timeout_ms: u64,
    pub complex_query_timeout_ms: u64,
    pub cache_warmup_size: usize,
}

impl Default for QueryAgentConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            memory_limit_mb: 256,
            priority: 5,
            simple_query_timeout_ms: 1_000,
            complex_query_timeout_ms: 10_000,
            cache_warmup_size: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevAgentConfig {
    pub max_concurrency: usize,
    pub memory_limit_mb: u64,
    pub priority: u8,
    pub index_batch_size: usize,
    pub use_parser: bool,
}

impl Default for DevAgentConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            memory_limit_mb: 512,
            priority: 4,
            index_batch_size: 100,
            use_parser: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreeSitterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub language_configs: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub tree_sitter: TreeSitterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategyConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { load_balancing_strategy: LoadBalancingStrategyConfig::default() }
    }
}

/// The fully assembled configuration handed to `codegraph-core`'s
/// Conductor/agent constructors. Every field recognized by spec.md §6.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub conductor: ConductorConfig,
    #[serde(default, rename = "queryAgent")]
    pub query_agent: QueryAgentConfig,
    #[serde(default, rename = "devAgent")]
    pub dev_agent: DevAgentConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            agents: McpAgentsConfig::default(),
            embedding: EmbeddingConfig::default(),
            semantic: SemanticMcpConfig::default(),
        }
    }
}

/// Applies a `CODEGRAPH_<SECTION>_<KEY>` environment variable on top of an
/// already-loaded config value, returning the override if present and
/// parseable. Unparseable values are logged and ignored rather than
/// failing the whole load (matching the teacher's permissive merge).
fn env_override<T: std::str::FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, raw, "ignoring unparseable env override");
                current
            }
        },
        Err(_) => current,
    }
}

fn env_override_string(key: &str, current: Option<String>) -> Option<String> {
    match std::env::var(key) {
        Ok(raw) => Some(raw),
        Err(_) => current,
    }
}

impl EngineConfig {
    /// Loads defaults, overlays the XDG `config.toml`'s typed sections (if
    /// any), then overlays recognized `CODEGRAPH_*` environment variables.
    /// `load_and_apply` must have already run (see [`crate::load_and_apply`])
    /// so that `.env` and the TOML `[env]` table have already been folded
    /// into the process environment at the right precedence.
    pub fn from_sources(app_name: &str, override_dir: Option<&Path>) -> Result<Self, LoadError> {
        crate::load_and_apply(app_name, override_dir)?;

        let mut config = match crate::xdg_toml::xdg_config_contents(app_name)? {
            Some(content) => toml::from_str(&content)?,
            None => EngineConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("CODEGRAPH_DATABASE_PATH") {
            self.database.path = PathBuf::from(raw);
        }
        self.mcp.agents.max_concurrent =
            env_override("CODEGRAPH_MCP_AGENTS_MAX_CONCURRENT", self.mcp.agents.max_concurrent);
        if let Some(model) = env_override_string("CODEGRAPH_MCP_EMBEDDING_MODEL", self.mcp.embedding.model.clone()) {
            self.mcp.embedding.model = Some(model);
        }
        self.conductor.max_concurrency =
            env_override("CODEGRAPH_CONDUCTOR_MAX_CONCURRENCY", self.conductor.max_concurrency);
        self.conductor.complexity_threshold =
            env_override("CODEGRAPH_CONDUCTOR_COMPLEXITY_THRESHOLD", self.conductor.complexity_threshold);
        self.conductor.task_queue_limit =
            env_override("CODEGRAPH_CONDUCTOR_TASK_QUEUE_LIMIT", self.conductor.task_queue_limit);
        self.query_agent.max_concurrency =
            env_override("CODEGRAPH_QUERY_AGENT_MAX_CONCURRENCY", self.query_agent.max_concurrency);
        self.dev_agent.max_concurrency =
            env_override("CODEGRAPH_DEV_AGENT_MAX_CONCURRENCY", self.dev_agent.max_concurrency);
        self.dev_agent.index_batch_size =
            env_override("CODEGRAPH_DEV_AGENT_INDEX_BATCH_SIZE", self.dev_agent.index_batch_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn clear(keys: &[&str]) {
        for k in keys {
            env::remove_var(k);
        }
    }

    #[test]
    fn defaults_are_populated_without_any_source() {
        let config = EngineConfig::default();
        assert_eq!(config.conductor.complexity_threshold, 8);
        assert_eq!(config.mcp.embedding.provider, EmbeddingProvider::Memory);
        assert!(config.conductor.mandatory_delegation);
    }

    #[test]
    fn toml_sections_beyond_env_table_are_read() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("codegraph-test-toml");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[database]\npath = \"/var/lib/codegraph/graph.db\"\n\n[conductor]\nmax_concurrency = 10\nmemory_limit_mb = 1024\npriority = 7\ntask_queue_limit = 500\ncomplexity_threshold = 6\n",
        )
        .unwrap();

        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        clear(&["CODEGRAPH_DATABASE_PATH", "CODEGRAPH_CONDUCTOR_MAX_CONCURRENCY"]);

        let config = EngineConfig::from_sources("codegraph-test-toml", None).unwrap();

        match prev {
            Some(v) => env::set_var("XDG_CONFIG_HOME", v),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }

        assert_eq!(config.database.path, PathBuf::from("/var/lib/codegraph/graph.db"));
        assert_eq!(config.conductor.max_concurrency, 10);
        assert_eq!(config.conductor.complexity_threshold, 6);
    }

    #[test]
    fn env_var_overrides_toml_section() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("codegraph-test-envwins");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[conductor]\nmax_concurrency = 10\nmemory_limit_mb = 1024\npriority = 7\ntask_queue_limit = 500\ncomplexity_threshold = 6\n",
        )
        .unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::set_var("CODEGRAPH_CONDUCTOR_MAX_CONCURRENCY", "99");

        let config = EngineConfig::from_sources("codegraph-test-envwins", None).unwrap();

        match prev_xdg {
            Some(v) => env::set_var("XDG_CONFIG_HOME", v),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        env::remove_var("CODEGRAPH_CONDUCTOR_MAX_CONCURRENCY");

        assert_eq!(config.conductor.max_concurrency, 99);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = EngineConfig::from_sources("codegraph-test-nonexistent-app-xyz", None).unwrap();
        assert_eq!(config.database.path, PathBuf::from("./codegraph.db"));
    }
}
