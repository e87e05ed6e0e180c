//! 条件注册 - profile 与条件谓词
//!
//! [`ConditionEvaluator`] 是内置的描述符后处理器，在 `refresh` 时最先执行，
//! 移除 profile 不匹配或条件不成立的描述符。

use std::collections::HashMap;

use crate::lifecycle::DescriptorPostProcessor;
use crate::registry::DescriptorRegistry;
use crate::ContainerResult;

/// 没有激活任何 profile 时生效的 profile 名称
pub const DEFAULT_PROFILE: &str = "default";

/// 条件求值上下文：激活的 profile 与配置属性
#[derive(Debug, Clone, Default)]
pub struct ConditionContext {
    active_profiles: Vec<String>,
    properties: HashMap<String, String>,
}

impl ConditionContext {
    pub fn new(active_profiles: Vec<String>, properties: HashMap<String, String>) -> Self {
        Self {
            active_profiles,
            properties,
        }
    }

    pub fn active_profiles(&self) -> &[String] {
        &self.active_profiles
    }

    pub fn is_profile_active(&self, profile: &str) -> bool {
        self.active_profiles.iter().any(|p| p == profile)
    }

    /// 描述符声明的 profile 是否满足
    ///
    /// 没有声明 profile 的组件总是满足；没有激活 profile 时只有声明了 `default`
    /// 的组件满足；否则只要有一个声明的 profile 被激活即可。
    pub fn accepts_profiles(&self, required: &[String]) -> bool {
        if required.is_empty() {
            return true;
        }
        if self.active_profiles.is_empty() {
            return required.iter().any(|p| p == DEFAULT_PROFILE);
        }
        required.iter().any(|p| self.is_profile_active(p))
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// 属性存在且等于给定值
    pub fn property_equals(&self, key: &str, expected: &str) -> bool {
        self.property(key) == Some(expected)
    }

    /// 属性为 `true`（不区分大小写）；缺失时返回 `default`
    pub fn property_enabled(&self, key: &str, default: bool) -> bool {
        match self.property(key) {
            Some(value) => value.eq_ignore_ascii_case("true"),
            None => default,
        }
    }
}

/// 按 profile 与条件过滤描述符
pub struct ConditionEvaluator {
    context: ConditionContext,
}

impl ConditionEvaluator {
    pub fn new(context: ConditionContext) -> Self {
        Self { context }
    }
}

impl DescriptorPostProcessor for ConditionEvaluator {
    fn post_process_descriptors(&self, registry: &DescriptorRegistry) -> ContainerResult<()> {
        for (name, descriptor) in registry.snapshot() {
            if !self.context.accepts_profiles(descriptor.profiles()) {
                tracing::debug!(
                    "Removing component '{}': profiles {:?} not active",
                    name,
                    descriptor.profiles()
                );
                registry.remove(&name);
            } else if !descriptor.condition_matches(&self.context) {
                tracing::debug!("Removing component '{}': condition not met", name);
                registry.remove(&name);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ConditionEvaluator"
    }

    fn order(&self) -> i32 {
        i32::MIN
    }
}
