//! 统一的错误处理类型
//!
//! 容器内部的所有失败都汇总为 [`ContainerError`]。用户提供的闭包（构造函数、setter、
//! 生命周期方法、切面通知）返回 `anyhow::Result`，其错误作为原因保留在
//! `CreationFailure` 中。

use crate::Scope;

/// 容器操作结果
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 容器错误
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// 找不到指定名称或类型的组件
    #[error("No such component: {0}")]
    NoSuchComponent(String),

    /// 名称已被占用（覆盖只能通过 replace）
    #[error("Component '{0}' is already registered")]
    AlreadyRegistered(String),

    /// 多个候选组件都被标记为 primary
    #[error("More than one primary component of type '{type_name}': {candidates:?}")]
    AmbiguousPrimary {
        type_name: String,
        candidates: Vec<String>,
    },

    /// 多个候选组件且没有 primary
    #[error("Expected a single component of type '{type_name}' but found {}: {candidates:?}", .candidates.len())]
    AmbiguousType {
        type_name: String,
        candidates: Vec<String>,
    },

    /// 无法通过早期引用打破的循环依赖
    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    /// 实例化、注入或生命周期方法失败
    #[error("Failed to create component '{name}': {source}")]
    CreationFailure {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// request / session 作用域没有绑定上下文
    #[error("No active {scope} scope while resolving component '{name}'")]
    NoActiveScope { scope: Scope, name: String },

    /// 通知方法或目标方法无法绑定或调用
    #[error("Cannot bind method '{method}' on '{target}': {reason}")]
    MethodBindingFailure {
        target: String,
        method: String,
        reason: String,
    },

    /// 组件不能转换为请求的类型
    #[error("Component '{name}' cannot be viewed as '{expected}'")]
    TypeMismatch { name: String, expected: String },

    /// 事件监听器处理事件失败，且没有设置错误处理器
    #[error("Listener '{listener}' failed to handle event '{event}': {source}")]
    ListenerFailure {
        listener: String,
        event: String,
        #[source]
        source: anyhow::Error,
    },

    /// 静态依赖校验失败
    #[error("Dependency validation failed: {0}")]
    DependencyValidationFailed(String),

    /// 配置加载失败
    #[error("Configuration error: {0}")]
    Config(String),

    /// 日志系统初始化失败
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}

impl ContainerError {
    /// 包装为指定组件的创建失败
    ///
    /// 循环依赖错误保持原样向上传播，不会被包装
    pub fn creation_failure(name: &str, source: impl Into<anyhow::Error>) -> Self {
        let source = source.into();
        match source.downcast::<ContainerError>() {
            Ok(err @ ContainerError::CircularDependency { .. }) => err,
            Ok(err) => ContainerError::CreationFailure {
                name: name.to_string(),
                source: err.into(),
            },
            Err(source) => ContainerError::CreationFailure {
                name: name.to_string(),
                source,
            },
        }
    }

    /// 是否为循环依赖错误
    pub fn is_circular(&self) -> bool {
        matches!(self, ContainerError::CircularDependency { .. })
    }

    /// 沿着 `CreationFailure` 链找到最内层的容器错误
    pub fn innermost(&self) -> &ContainerError {
        let mut current = self;
        while let ContainerError::CreationFailure { source, .. } = current {
            match source.downcast_ref::<ContainerError>() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }
}
