//! 作用域与作用域缓存
//!
//! - `Singleton`：容器级唯一实例，缓存由 [`Container`](crate::Container) 自己持有
//! - `Prototype`：不缓存，每次解析都重新创建
//! - `Request` / `Session`：按外部提供的关联键（请求 ID / 会话 ID）缓存

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::descriptor::Instance;

/// 组件的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// 单例模式 - 容器中只有一个实例
    #[default]
    Singleton,

    /// 原型模式 - 每次请求都创建新实例
    Prototype,

    /// 请求作用域 - 同一请求内共享
    Request,

    /// 会话作用域 - 同一会话内共享
    Session,
}

impl Scope {
    /// 是否为依赖外部关联键的 Web 作用域
    pub fn is_correlated(&self) -> bool {
        matches!(self, Scope::Request | Scope::Session)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
            Scope::Request => "request",
            Scope::Session => "session",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "singleton" => Ok(Scope::Singleton),
            "prototype" => Ok(Scope::Prototype),
            "request" => Ok(Scope::Request),
            "session" => Ok(Scope::Session),
            _ => Err(format!("Invalid scope: {}", s)),
        }
    }
}

/// 作用域上下文提供者
///
/// 由拥有请求生命周期的外部协作者（例如 Web 层）实现，告诉容器当前的请求 ID 与会话 ID。
pub trait ScopeContextProvider: Send + Sync {
    /// 当前请求的关联键
    fn current_request_id(&self) -> Option<String>;

    /// 当前会话的关联键
    fn current_session_id(&self) -> Option<String>;

    /// 按作用域取关联键
    fn correlation_key(&self, scope: Scope) -> Option<String> {
        match scope {
            Scope::Request => self.current_request_id(),
            Scope::Session => self.current_session_id(),
            Scope::Singleton | Scope::Prototype => None,
        }
    }
}

/// 手动设置关联键的简单实现
#[derive(Debug, Default)]
pub struct ManualScopeContext {
    request_id: RwLock<Option<String>>,
    session_id: RwLock<Option<String>>,
}

impl ManualScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定当前请求
    pub fn bind_request(&self, id: impl Into<String>) {
        *self.request_id.write() = Some(id.into());
    }

    /// 绑定当前会话
    pub fn bind_session(&self, id: impl Into<String>) {
        *self.session_id.write() = Some(id.into());
    }

    /// 解除请求绑定
    pub fn clear_request(&self) {
        *self.request_id.write() = None;
    }

    /// 解除会话绑定
    pub fn clear_session(&self) {
        *self.session_id.write() = None;
    }
}

impl ScopeContextProvider for ManualScopeContext {
    fn current_request_id(&self) -> Option<String> {
        self.request_id.read().clone()
    }

    fn current_session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}

/// 关联作用域中缓存的一个实例
///
/// `instance` 是解析时返回的对象（可能是代理），`target` 是原始对象，销毁方法作用于它。
#[derive(Clone)]
pub struct ScopedEntry {
    pub name: String,
    pub instance: Instance,
    pub target: Instance,
}

/// 一个关联作用域（request 或 session）的实例缓存
///
/// 关联键 -> (组件名称 -> 实例)。实例的创建由容器串行化，这里只负责存取和清理。
#[derive(Default)]
pub struct ScopedInstances {
    caches: Mutex<HashMap<String, HashMap<String, ScopedEntry>>>,
}

impl ScopedInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找已缓存的实例
    pub fn get(&self, key: &str, name: &str) -> Option<Instance> {
        self.caches
            .lock()
            .get(key)
            .and_then(|entries| entries.get(name))
            .map(|entry| entry.instance.clone())
    }

    /// 缓存实例；若已存在则保留旧实例并返回它
    pub fn insert(&self, key: &str, name: &str, instance: Instance, target: Instance) -> Instance {
        let mut caches = self.caches.lock();
        caches
            .entry(key.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| ScopedEntry {
                name: name.to_string(),
                instance,
                target,
            })
            .instance
            .clone()
    }

    /// 移除一个关联键下的全部实例
    pub fn evict(&self, key: &str) -> Vec<ScopedEntry> {
        self.caches
            .lock()
            .remove(key)
            .map(|entries| entries.into_values().collect())
            .unwrap_or_default()
    }

    /// 移除所有关联键
    pub fn drain(&self) -> Vec<(String, Vec<ScopedEntry>)> {
        self.caches
            .lock()
            .drain()
            .map(|(key, entries)| (key, entries.into_values().collect()))
            .collect()
    }

    /// 当前存活的关联键数量
    pub fn active_keys(&self) -> usize {
        self.caches.lock().len()
    }
}

/// Web 作用域管理器：持有 request 与 session 两个缓存
#[derive(Default)]
pub struct ScopeManager {
    request: ScopedInstances,
    session: ScopedInstances,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得指定作用域的缓存；单例与原型没有关联缓存
    pub fn instances(&self, scope: Scope) -> Option<&ScopedInstances> {
        match scope {
            Scope::Request => Some(&self.request),
            Scope::Session => Some(&self.session),
            Scope::Singleton | Scope::Prototype => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_scope_from_str() {
        assert_eq!("singleton".parse::<Scope>().unwrap(), Scope::Singleton);
        assert_eq!("Prototype".parse::<Scope>().unwrap(), Scope::Prototype);
        assert_eq!("request".parse::<Scope>().unwrap(), Scope::Request);
        assert_eq!("SESSION".parse::<Scope>().unwrap(), Scope::Session);
        assert!("global".parse::<Scope>().is_err());
    }

    #[test]
    fn test_manual_scope_context() {
        let context = ManualScopeContext::new();
        assert_eq!(context.correlation_key(Scope::Request), None);

        context.bind_request("req-1");
        context.bind_session("sess-1");
        assert_eq!(context.correlation_key(Scope::Request).as_deref(), Some("req-1"));
        assert_eq!(context.correlation_key(Scope::Session).as_deref(), Some("sess-1"));
        assert_eq!(context.correlation_key(Scope::Singleton), None);

        context.clear_request();
        assert_eq!(context.current_request_id(), None);
    }

    #[test]
    fn test_scoped_instances_keep_first_insert() {
        let instances = ScopedInstances::new();
        let first: Instance = Arc::new(1u32);
        let second: Instance = Arc::new(2u32);

        let kept = instances.insert("req-1", "cart", first.clone(), first);
        let again = instances.insert("req-1", "cart", second.clone(), second);
        assert_eq!(kept.downcast_ref::<u32>(), Some(&1));
        assert_eq!(again.downcast_ref::<u32>(), Some(&1));
        assert!(instances.get("req-2", "cart").is_none());

        let evicted = instances.evict("req-1");
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].name, "cart");
        assert!(instances.get("req-1", "cart").is_none());
        assert_eq!(instances.active_keys(), 0);
    }
}
