//! 容器配置
//!
//! 从 TOML 读取，例如：
//!
//! ```toml
//! allow_circular_references = true
//! active_profiles = ["dev"]
//!
//! [properties]
//! mail.enabled = "true"
//!
//! [logging]
//! level = "debug"
//! format = "pretty"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::condition::ConditionContext;
use crate::logging::LoggingConfig;
use crate::{ContainerError, ContainerResult};

/// 覆盖激活 profile 的环境变量（逗号分隔）
pub const ACTIVE_PROFILES_ENV: &str = "TRELLIS_ACTIVE_PROFILES";

fn default_true() -> bool {
    true
}

/// 容器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    /// 是否允许通过早期引用打破单例之间的循环依赖（默认：true）
    #[serde(default = "default_true")]
    pub allow_circular_references: bool,

    /// 激活的 profile
    #[serde(default)]
    pub active_profiles: Vec<String>,

    /// 条件求值时可见的属性，嵌套表展平为点号分隔的键
    #[serde(default, deserialize_with = "deserialize_properties")]
    pub properties: HashMap<String, String>,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            active_profiles: Vec::new(),
            properties: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> ContainerResult<Self> {
        toml::from_str(content)
            .map_err(|e| ContainerError::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ContainerError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        tracing::debug!("Loaded container configuration from {:?}", path);
        Self::from_toml_str(&content)
    }

    /// 用环境变量覆盖激活的 profile
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(profiles) = std::env::var(ACTIVE_PROFILES_ENV) {
            self.active_profiles = split_list(&profiles);
        }
        self
    }

    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    pub fn active_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.active_profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// 条件求值上下文
    pub fn condition_context(&self) -> ConditionContext {
        ConditionContext::new(self.active_profiles.clone(), self.properties.clone())
    }
}

/// 逗号分隔的列表
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn deserialize_properties<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let table = toml::Table::deserialize(deserializer)?;
    let mut properties = HashMap::new();
    for (key, value) in &table {
        flatten_toml(value, key.clone(), &mut properties);
    }
    Ok(properties)
}

/// 展平 TOML 结构
/// 例如: { mail: { enabled: true } } -> { "mail.enabled": "true" }
fn flatten_toml(value: &toml::Value, prefix: String, result: &mut HashMap<String, String>) {
    match value {
        toml::Value::String(s) => {
            result.insert(prefix, s.clone());
        }
        toml::Value::Integer(i) => {
            result.insert(prefix, i.to_string());
        }
        toml::Value::Float(f) => {
            result.insert(prefix, f.to_string());
        }
        toml::Value::Boolean(b) => {
            result.insert(prefix, b.to_string());
        }
        toml::Value::Datetime(dt) => {
            result.insert(prefix, dt.to_string());
        }
        toml::Value::Array(arr) => {
            let items: Vec<String> = arr
                .iter()
                .map(|v| match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            result.insert(prefix, items.join(","));
        }
        toml::Value::Table(table) => {
            for (key, val) in table {
                flatten_toml(val, format!("{}.{}", prefix, key), result);
            }
        }
    }
}
