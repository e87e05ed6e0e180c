//! AOP 后处理器 - 自动为匹配切点的组件创建代理
//!
//! ## 工作原理
//!
//! 1. 组件初始化后，检查其类型是否声明为可代理（[`AspectRegistry::advise`]）
//! 2. 对调用面上的每个方法求出匹配的通知绑定，没有任何匹配时返回原实例
//! 3. 否则解析切面组件、绑定通知方法，用代理替换实例
//!
//! 单例之间存在循环依赖时，容器会在组件仍在创建中时请求早期引用。此时直接返回
//! 代理（早期代理），并在初始化完成后原样放行该组件，保证所有依赖方与最终
//! 缓存看到的是同一个代理。

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use trellis_core::prelude::*;
use trellis_core::Instance;

use crate::registry::AspectRegistry;

/// AOP 组件后处理器
///
/// ## 使用示例
///
/// ```ignore
/// let container = Arc::new(Container::new());
/// let aspects = Arc::new(AspectRegistry::new());
/// AopPostProcessor::install(&container, Arc::clone(&aspects));
/// ```
pub struct AopPostProcessor {
    container: Weak<Container>,
    registry: Arc<AspectRegistry>,
    /// 已经以早期代理形式暴露过的组件
    early_proxies: Mutex<HashSet<String>>,
}

impl AopPostProcessor {
    pub fn new(container: &Arc<Container>, registry: Arc<AspectRegistry>) -> Self {
        Self {
            container: Arc::downgrade(container),
            registry,
            early_proxies: Mutex::new(HashSet::new()),
        }
    }

    /// 创建并注册到容器
    pub fn install(container: &Arc<Container>, registry: Arc<AspectRegistry>) -> Arc<Self> {
        let processor = Arc::new(Self::new(container, registry));
        container.add_post_processor(Arc::clone(&processor) as Arc<dyn ComponentPostProcessor>);
        tracing::debug!("AOP post processor installed");
        processor
    }

    pub fn registry(&self) -> &Arc<AspectRegistry> {
        &self.registry
    }

    fn wrap_if_necessary(&self, instance: Instance, name: &str) -> ContainerResult<Instance> {
        if self.registry.is_empty() {
            return Ok(instance);
        }
        let Some(container) = self.container.upgrade() else {
            return Ok(instance);
        };
        let Some(descriptor) = container.descriptor(name) else {
            return Ok(instance);
        };

        // 切面组件本身不被代理
        if descriptor.has_stereotype(&Stereotype::Aspect) || self.registry.is_aspect_component(name) {
            tracing::trace!("Component '{}' is an aspect, skipping AOP wrapping", name);
            return Ok(instance);
        }

        let type_id = descriptor.type_key().id();
        if !self.registry.is_advised_type(type_id) {
            return Ok(instance);
        }

        let proxy = self
            .registry
            .build_proxy(name, Arc::clone(&instance), type_id, &container)?;
        Ok(proxy.unwrap_or(instance))
    }
}

impl ComponentPostProcessor for AopPostProcessor {
    fn post_process_after_initialization(
        &self,
        instance: Instance,
        name: &str,
    ) -> ContainerResult<Instance> {
        if self.early_proxies.lock().remove(name) {
            tracing::debug!(
                "Component '{}' was already exposed as an early proxy, keeping the raw instance",
                name
            );
            return Ok(instance);
        }
        self.wrap_if_necessary(instance, name)
    }

    fn early_reference(&self, instance: Instance, name: &str) -> ContainerResult<Instance> {
        let wrapped = self.wrap_if_necessary(Arc::clone(&instance), name)?;
        if !Arc::ptr_eq(&wrapped, &instance) {
            tracing::debug!("Exposing early AOP proxy for component '{}'", name);
            self.early_proxies.lock().insert(name.to_string());
        }
        Ok(wrapped)
    }

    fn creation_failed(&self, name: &str) {
        if self.early_proxies.lock().remove(name) {
            tracing::debug!("Discarding early AOP proxy of failed component '{}'", name);
        }
    }

    fn name(&self) -> &str {
        "AopPostProcessor"
    }

    fn order(&self) -> i32 {
        // 在其他处理器之后执行，代理包住的是已经处理完的对象
        2000
    }
}

impl std::fmt::Debug for AopPostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AopPostProcessor")
            .field("registry", &self.registry)
            .field("early_proxies", &self.early_proxies.lock().len())
            .finish()
    }
}
