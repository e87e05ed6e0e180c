//! 生命周期钩子 - 组件初始化前后的扩展点
//!
//! 类似 Spring 的 BeanPostProcessor / BeanFactoryPostProcessor。钩子可以直接替换实例，
//! 拦截代理就是这样叠加在普通实例化之上的，容器本身不需要了解切面。

use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::Instance;
use crate::registry::DescriptorRegistry;
use crate::ContainerResult;

/// 组件后处理器
///
/// # 示例
///
/// ```
/// use trellis_core::prelude::*;
///
/// struct AuditHook;
///
/// impl ComponentPostProcessor for AuditHook {
///     fn post_process_after_initialization(
///         &self,
///         instance: Instance,
///         name: &str,
///     ) -> ContainerResult<Instance> {
///         tracing::info!("Component ready: {}", name);
///         Ok(instance)
///     }
/// }
/// ```
pub trait ComponentPostProcessor: Send + Sync {
    /// 在初始化方法之前调用，可以返回另一个实例
    fn post_process_before_initialization(
        &self,
        instance: Instance,
        _name: &str,
    ) -> ContainerResult<Instance> {
        Ok(instance)
    }

    /// 在初始化方法之后调用，典型用途是创建代理
    fn post_process_after_initialization(
        &self,
        instance: Instance,
        _name: &str,
    ) -> ContainerResult<Instance> {
        Ok(instance)
    }

    /// 为尚在创建中的单例提供早期引用
    ///
    /// 只在循环依赖确实需要该实例时调用。若返回包装后的实例，应保证之后的
    /// `post_process_after_initialization` 对同一名称返回原始实例，否则容器会报错。
    fn early_reference(&self, instance: Instance, _name: &str) -> ContainerResult<Instance> {
        Ok(instance)
    }

    /// 组件创建失败时调用，用于丢弃为该次创建记录的状态
    fn creation_failed(&self, _name: &str) {}

    /// 处理器名称（用于日志）
    fn name(&self) -> &str {
        "ComponentPostProcessor"
    }

    /// 优先级，数字越小越先执行
    fn order(&self) -> i32 {
        1000
    }
}

/// 描述符后处理器：在 `refresh` 时、任何组件创建之前修改描述符存储
pub trait DescriptorPostProcessor: Send + Sync {
    fn post_process_descriptors(&self, registry: &DescriptorRegistry) -> ContainerResult<()>;

    fn name(&self) -> &str {
        "DescriptorPostProcessor"
    }

    fn order(&self) -> i32 {
        1000
    }
}

/// 有序的钩子列表
///
/// 插入时按 `order` 稳定排序，相同优先级保持注册顺序。
pub struct HookPipeline<H: ?Sized> {
    hooks: RwLock<Vec<Arc<H>>>,
}

impl<H: ?Sized> Default for HookPipeline<H> {
    fn default() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> HookPipeline<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加钩子并重新排序
    pub fn add(&self, hook: Arc<H>, order: impl Fn(&H) -> i32) {
        let mut hooks = self.hooks.write();
        hooks.push(hook);
        hooks.sort_by_key(|h| order(h.as_ref()));
    }

    /// 当前钩子的快照；执行钩子时不持有锁
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.hooks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HookPipeline<dyn ComponentPostProcessor> {
    /// 注册组件后处理器
    pub fn register(&self, hook: Arc<dyn ComponentPostProcessor>) {
        tracing::debug!("Registered component post processor: {}", hook.name());
        self.add(hook, |h| h.order());
    }

    /// 依次执行初始化前钩子
    pub fn apply_before_initialization(
        &self,
        mut instance: Instance,
        name: &str,
    ) -> ContainerResult<Instance> {
        for hook in self.snapshot() {
            tracing::trace!("Applying {} before initialization of '{}'", hook.name(), name);
            instance = hook.post_process_before_initialization(instance, name)?;
        }
        Ok(instance)
    }

    /// 依次执行初始化后钩子
    pub fn apply_after_initialization(
        &self,
        mut instance: Instance,
        name: &str,
    ) -> ContainerResult<Instance> {
        for hook in self.snapshot() {
            tracing::trace!("Applying {} after initialization of '{}'", hook.name(), name);
            instance = hook.post_process_after_initialization(instance, name)?;
        }
        Ok(instance)
    }

    /// 依次执行早期引用钩子
    pub fn apply_early_reference(&self, mut instance: Instance, name: &str) -> ContainerResult<Instance> {
        for hook in self.snapshot() {
            instance = hook.early_reference(instance, name)?;
        }
        Ok(instance)
    }

    /// 通知所有钩子某次创建失败
    pub fn apply_creation_failed(&self, name: &str) {
        for hook in self.snapshot() {
            hook.creation_failed(name);
        }
    }
}

impl HookPipeline<dyn DescriptorPostProcessor> {
    /// 注册描述符后处理器
    pub fn register(&self, hook: Arc<dyn DescriptorPostProcessor>) {
        tracing::debug!("Registered descriptor post processor: {}", hook.name());
        self.add(hook, |h| h.order());
    }

    /// 按顺序执行全部描述符后处理器
    pub fn apply(&self, registry: &DescriptorRegistry) -> ContainerResult<()> {
        for hook in self.snapshot() {
            tracing::debug!("Running descriptor post processor: {}", hook.name());
            hook.post_process_descriptors(registry)?;
        }
        Ok(())
    }
}
