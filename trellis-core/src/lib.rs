// trellis-core: 组件容器
//
// 提供类型安全的依赖注入与生命周期管理，支持：
// - singleton / prototype / request / session 作用域
// - 构造函数注入与属性（字段 / setter）注入
// - 按名称、按类型、按 qualifier 解析，primary 消歧
// - 通过早期引用解决单例之间的属性循环依赖
// - 生命周期钩子（初始化前后、早期引用）与描述符后处理器
// - 容器启动 / 关闭事件与自定义事件的同步分发

pub mod component;
pub mod condition;
pub mod config;
pub mod container;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod scope;
pub mod utils;

// 重新导出常用类型
pub use component::{Component, ComponentRegistration, DescriptorProvider, InventoryProvider};
pub use condition::{ConditionContext, ConditionEvaluator};
pub use config::ContainerConfig;
pub use container::{Container, CreationState};
pub use descriptor::{
    ArgumentSpec, Autowired, ComponentDescriptor, DescriptorBuilder, Instance, Payload,
    PropertySpec, ResolvedArgs, Stereotype, TypeBinding, TypeKey, ValueSpec,
};
pub use error::{ContainerError, ContainerResult};
pub use event::{
    ApplicationEventMulticaster, ApplicationEventPublisher, ContainerClosedEvent,
    ContainerStartedEvent, ErrorHandler, Event, EventListener, ListenerMethodAdapter,
    SimpleEventMulticaster, TypedEventListener,
};
pub use lifecycle::{ComponentPostProcessor, DescriptorPostProcessor, HookPipeline};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use registry::DescriptorRegistry;
pub use scope::{ManualScopeContext, Scope, ScopeContextProvider};

// 导出 inventory，供 submit_component! 使用
pub use inventory;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::component::{Component, DescriptorProvider};
    pub use crate::condition::ConditionContext;
    pub use crate::config::ContainerConfig;
    pub use crate::container::Container;
    pub use crate::descriptor::{
        ArgumentSpec, Autowired, ComponentDescriptor, Instance, ResolvedArgs, Stereotype,
        ValueSpec,
    };
    pub use crate::error::{ContainerError, ContainerResult};
    pub use crate::event::{
        ApplicationEventPublisher, ContainerClosedEvent, ContainerStartedEvent, Event,
        EventListener, TypedEventListener,
    };
    pub use crate::lifecycle::{ComponentPostProcessor, DescriptorPostProcessor};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::scope::{ManualScopeContext, Scope, ScopeContextProvider};
    pub use crate::utils;
    pub use anyhow::{anyhow, Context};
}
