use std::{collections::HashSet, fs, path::Path, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use hippocrates_knowledge::EmbeddingConfig;
use hippocrates_provider::{parse_provider_model, ProviderConfig};
use hippocrates_schema::BandThresholds;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "hippocrates".to_string(),
            env: "dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub max_concurrent: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// SQLite file holding ingested chunks, relative to the config root.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Source JSON read by `hippocrates ingest`.
    #[serde(default = "default_knowledge_base")]
    pub knowledge_base: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/knowledge.db")
}

fn default_knowledge_base() -> PathBuf {
    PathBuf::from("data/knowledge_base.json")
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            knowledge_base: default_knowledge_base(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DialogueConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Patient turns after which the engine must report.
    #[serde(default = "default_turn_cap")]
    pub turn_cap: usize,
}

fn default_history_limit() -> usize {
    10
}

fn default_turn_cap() -> usize {
    8
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            turn_cap: default_turn_cap(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_report_threshold")]
    pub report_threshold: f32,
    #[serde(default = "default_separation_threshold")]
    pub separation_threshold: f32,
    #[serde(default = "default_confirming_threshold")]
    pub confirming_threshold: f32,
    #[serde(default)]
    pub bands: BandThresholds,
}

fn default_report_threshold() -> f32 {
    0.6
}

fn default_separation_threshold() -> f32 {
    0.2
}

fn default_confirming_threshold() -> f32 {
    0.35
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            report_threshold: default_report_threshold(),
            separation_threshold: default_separation_threshold(),
            confirming_threshold: default_confirming_threshold(),
            bands: BandThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// `provider/model`, e.g. `ollama/llama3`.
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_generation_model() -> String {
    "ollama/llama3".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    768
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: Some(0.2),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone)]
pub struct HippocratesConfig {
    pub main: MainConfig,
    pub providers: Vec<ProviderConfig>,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Load `main.yaml` and `providers.d/*.yaml` from a config directory.
pub fn load_config(root: &Path) -> Result<HippocratesConfig> {
    let mut main: MainConfig = read_yaml_file(&root.join("main.yaml"))?;
    let providers_dir = root.join("providers.d");
    let mut providers = if providers_dir.is_dir() {
        read_yaml_dir::<ProviderConfig>(&providers_dir)?
    } else {
        Vec::new()
    };

    resolve_main_env(&mut main);
    resolve_providers_env(&mut providers);

    let config = HippocratesConfig { main, providers };
    validate_config(&config)?;
    Ok(config)
}

pub const MAX_HISTORY_LIMIT: usize = 1000;

pub fn validate_config(config: &HippocratesConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.id.as_str()) {
            return Err(anyhow!("duplicate provider id: {}", provider.id));
        }
    }

    let (provider_id, _) = parse_provider_model(&config.main.generation.model)?;
    let enabled = config
        .providers
        .iter()
        .any(|p| p.id == provider_id && p.enabled);
    if !enabled {
        return Err(anyhow!(
            "generation model references unknown or disabled provider: {provider_id}"
        ));
    }

    let engine = &config.main.engine;
    for (name, value) in [
        ("engine.report_threshold", engine.report_threshold),
        ("engine.separation_threshold", engine.separation_threshold),
        ("engine.confirming_threshold", engine.confirming_threshold),
        ("engine.bands.high", engine.bands.high),
        ("engine.bands.medium", engine.bands.medium),
        ("retrieval.min_score", config.main.retrieval.min_score),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(anyhow!("{name} must be within [0, 1], got {value}"));
        }
    }
    if engine.bands.medium > engine.bands.high {
        return Err(anyhow!("engine.bands.medium must not exceed engine.bands.high"));
    }

    for (name, value) in [
        ("retrieval.top_k", config.main.retrieval.top_k),
        ("dialogue.history_limit", config.main.dialogue.history_limit),
        ("dialogue.turn_cap", config.main.dialogue.turn_cap),
        ("runtime.max_concurrent", config.main.runtime.max_concurrent),
    ] {
        if value == 0 {
            return Err(anyhow!("{name} must be greater than zero"));
        }
    }

    if config.main.dialogue.history_limit > MAX_HISTORY_LIMIT {
        return Err(anyhow!(
            "dialogue.history_limit must be at most {MAX_HISTORY_LIMIT}, got {}",
            config.main.dialogue.history_limit
        ));
    }

    if config.main.generation.timeout_secs == 0 {
        return Err(anyhow!("generation.timeout_secs must be greater than zero"));
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn read_yaml_dir<T>(dir: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read config dir: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read dir entry: {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("yaml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        items.push(read_yaml_file::<T>(&path)?);
    }
    Ok(items)
}

fn resolve_main_env(main: &mut MainConfig) {
    main.app.name = resolve_env_var(&main.app.name);
    main.app.env = resolve_env_var(&main.app.env);
    main.generation.model = resolve_env_var(&main.generation.model);

    main.embedding.model = resolve_env_var(&main.embedding.model);
    if let Some(key) = &mut main.embedding.api_key {
        *key = resolve_env_var(key);
    }
    if let Some(base_url) = &mut main.embedding.base_url {
        *base_url = resolve_env_var(base_url);
    }
}

fn resolve_providers_env(providers: &mut [ProviderConfig]) {
    for provider in providers {
        provider.id = resolve_env_var(&provider.id);
        // An unset placeholder leaves the field unset rather than empty.
        provider.api_key = provider
            .api_key
            .as_deref()
            .map(resolve_env_var)
            .filter(|v| !v.is_empty());
        provider.base_url = provider
            .base_url
            .as_deref()
            .map(resolve_env_var)
            .filter(|v| !v.is_empty());
    }
}
