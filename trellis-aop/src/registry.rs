//! 切面注册表
//!
//! 保存通知绑定，以及两张类型擦除的表：切面类型 → 通知方法绑定器，
//! 可代理类型 → 代理构建器。注册表由应用持有并交给 [`AopPostProcessor`]，
//! 不存在全局实例。
//!
//! [`AopPostProcessor`]: crate::AopPostProcessor

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use trellis_core::{Container, ContainerError, ContainerResult, Instance};

use crate::advice::{AdviceBinding, Aspect};
use crate::invocation::MethodInterceptor;
use crate::joinpoint::{short_type_name, JoinPoint};
use crate::proxy::{Advised, ProxyFactory};

/// 把切面实例上的通知方法绑定为拦截器
type AspectBinder = fn(Instance, &AdviceBinding) -> Result<Arc<dyn MethodInterceptor>, String>;

/// 为某个可代理类型构建代理；没有匹配的通知时返回 None
type ProxyBuilder =
    fn(&str, Instance, &AspectRegistry, &Container) -> ContainerResult<Option<Instance>>;

/// 切面注册表
#[derive(Default)]
pub struct AspectRegistry {
    bindings: RwLock<Vec<AdviceBinding>>,
    aspects: RwLock<HashMap<TypeId, AspectBinder>>,
    advised: RwLock<HashMap<TypeId, ProxyBuilder>>,
}

impl AspectRegistry {
    /// 创建新的切面注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明切面类型，使其通知方法可以被绑定
    pub fn register_aspect<A: Aspect>(&self) {
        tracing::debug!("Registering aspect type: {}", std::any::type_name::<A>());
        self.aspects
            .write()
            .insert(TypeId::of::<A>(), bind_aspect_method::<A>);
    }

    /// 声明可代理的组件类型
    pub fn advise<T: Advised>(&self) {
        tracing::debug!("Registering advised type: {}", std::any::type_name::<T>());
        self.advised
            .write()
            .insert(TypeId::of::<T>(), build_advised_proxy::<T>);
    }

    /// 注册通知绑定
    pub fn register_binding(&self, binding: AdviceBinding) {
        tracing::debug!(
            "Registering advice binding {} (order {}) with pointcut {:?}",
            binding.label(),
            binding.order_value(),
            binding.pointcut()
        );
        self.bindings.write().push(binding);
    }

    /// 批量注册通知绑定
    pub fn register_bindings(&self, bindings: impl IntoIterator<Item = AdviceBinding>) {
        for binding in bindings {
            self.register_binding(binding);
        }
    }

    /// 所有通知绑定，按注册顺序
    pub fn bindings(&self) -> Vec<AdviceBinding> {
        self.bindings.read().clone()
    }

    /// 该名称是否被某个绑定用作切面组件
    pub fn is_aspect_component(&self, name: &str) -> bool {
        self.bindings
            .read()
            .iter()
            .any(|binding| binding.aspect() == name)
    }

    pub fn is_advised_type(&self, type_id: TypeId) -> bool {
        self.advised.read().contains_key(&type_id)
    }

    /// 匹配连接点的绑定，按拦截器链顺序排列
    ///
    /// 先按通知类型分组（后置类在外，前置其次，环绕在最内），组内按顺序值升序，
    /// 顺序值相同时保持注册顺序。
    pub fn chain_for(&self, join_point: &JoinPoint) -> Vec<AdviceBinding> {
        let bindings = self.bindings.read();
        let mut matched: Vec<(usize, &AdviceBinding)> = bindings
            .iter()
            .enumerate()
            .filter(|(_, binding)| binding.matches(join_point))
            .collect();
        matched.sort_by_key(|(index, binding)| {
            (binding.kind().chain_rank(), binding.order_value(), *index)
        });
        matched
            .into_iter()
            .map(|(_, binding)| binding.clone())
            .collect()
    }

    /// 解析切面组件并把绑定的通知方法转换为拦截器
    pub fn bind(
        &self,
        binding: &AdviceBinding,
        container: &Container,
    ) -> ContainerResult<Arc<dyn MethodInterceptor>> {
        let failure = |reason: String| ContainerError::MethodBindingFailure {
            target: binding.aspect().to_string(),
            method: binding.method().to_string(),
            reason,
        };

        let descriptor = container
            .descriptor(binding.aspect())
            .ok_or_else(|| failure("no aspect component with this name is registered".to_string()))?;
        let binder = self
            .aspects
            .read()
            .get(&descriptor.type_key().id())
            .copied()
            .ok_or_else(|| {
                failure(format!(
                    "'{}' is not registered as an aspect type",
                    short_type_name(descriptor.type_name())
                ))
            })?;

        let aspect = container.resolve(binding.aspect())?;
        binder(aspect, binding).map_err(failure)
    }

    /// 为组件构建代理；类型未声明为可代理或没有匹配的通知时返回 None
    pub fn build_proxy(
        &self,
        name: &str,
        instance: Instance,
        type_id: TypeId,
        container: &Container,
    ) -> ContainerResult<Option<Instance>> {
        let builder = self.advised.read().get(&type_id).copied();
        match builder {
            Some(builder) => builder(name, instance, self, container),
            None => Ok(None),
        }
    }

    /// 通知绑定数量
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

impl std::fmt::Debug for AspectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AspectRegistry")
            .field("bindings", &self.bindings.read().len())
            .field("aspect_types", &self.aspects.read().len())
            .field("advised_types", &self.advised.read().len())
            .finish()
    }
}

fn bind_aspect_method<A: Aspect>(
    instance: Instance,
    binding: &AdviceBinding,
) -> Result<Arc<dyn MethodInterceptor>, String> {
    let aspect = match Arc::clone(&instance).downcast::<A>() {
        Ok(aspect) => aspect,
        Err(_) => instance.downcast_ref::<Arc<A>>().cloned().ok_or_else(|| {
            format!(
                "aspect component is not a '{}'",
                short_type_name(std::any::type_name::<A>())
            )
        })?,
    };

    let methods = A::advice_methods();
    let method = methods.get(binding.method()).ok_or_else(|| {
        format!(
            "'{}' has no advice method named '{}'",
            short_type_name(std::any::type_name::<A>()),
            binding.method()
        )
    })?;
    method.bind(aspect, binding.kind(), binding.label())
}

fn build_advised_proxy<T: Advised>(
    name: &str,
    instance: Instance,
    registry: &AspectRegistry,
    container: &Container,
) -> ContainerResult<Option<Instance>> {
    let Ok(target) = instance.downcast::<T>() else {
        tracing::debug!(
            "Component '{}' was already replaced by another post processor, not proxying it",
            name
        );
        return Ok(None);
    };

    let table = T::method_table();
    let type_name = std::any::type_name::<T>();
    let plan: Vec<(String, Vec<AdviceBinding>)> = table
        .names()
        .map(|method| {
            let join_point = JoinPoint::new(name, type_name, method);
            (method.to_string(), registry.chain_for(&join_point))
        })
        .filter(|(_, chain)| !chain.is_empty())
        .collect();

    if plan.is_empty() {
        tracing::trace!("No advice matches component '{}'", name);
        return Ok(None);
    }

    let mut factory = ProxyFactory::new(name, target, table);
    for (method, chain) in &plan {
        tracing::debug!(
            "Advising {}::{} with {:?}",
            short_type_name(type_name),
            method,
            chain.iter().map(AdviceBinding::label).collect::<Vec<_>>()
        );
        for binding in chain {
            let interceptor = registry.bind(binding, container)?;
            factory.add_interceptor(method, interceptor)?;
        }
    }

    let proxy = Arc::new(factory.build());
    tracing::info!(
        "Created AOP proxy for component '{}' ({} advised method(s))",
        name,
        plan.len()
    );
    Ok(Some(Arc::new(T::proxy_surface(proxy)) as Instance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{AdviceKind, AspectMethods};
    use crate::pointcut::PointcutExpression;

    #[test]
    fn test_chain_order_groups_kinds_then_order_then_registration() {
        let registry = AspectRegistry::new();
        registry.register_bindings([
            AdviceBinding::around("tx", "wrap", PointcutExpression::All).order(1),
            AdviceBinding::before("security", "check", PointcutExpression::All).order(2),
            AdviceBinding::after("audit", "done", PointcutExpression::All).order(2),
            AdviceBinding::before("metrics", "start", PointcutExpression::All).order(1),
            AdviceBinding::after("metrics", "stop", PointcutExpression::All).order(1),
            AdviceBinding::before("tracing", "enter", PointcutExpression::All).order(1),
            AdviceBinding::after_returning("cache", "store", PointcutExpression::method("get_*")),
        ]);

        let labels: Vec<String> = registry
            .chain_for(&JoinPoint::new("orderService", "OrderService", "place_order"))
            .iter()
            .map(AdviceBinding::label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "metrics.stop@After",
                "audit.done@After",
                "metrics.start@Before",
                "tracing.enter@Before",
                "security.check@Before",
                "tx.wrap@Around",
            ]
        );

        let chain = registry.chain_for(&JoinPoint::new("orderService", "OrderService", "get_order"));
        assert_eq!(chain[2].kind(), AdviceKind::AfterReturning);
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn test_aspect_component_names() {
        let registry = AspectRegistry::new();
        assert!(registry.is_empty());
        registry.register_binding(AdviceBinding::before("auditAspect", "record", PointcutExpression::All));
        assert!(registry.is_aspect_component("auditAspect"));
        assert!(!registry.is_aspect_component("orderService"));
    }

    struct Noop;

    impl Aspect for Noop {
        fn advice_methods() -> AspectMethods<Self> {
            AspectMethods::new().join_point("noop", |_: &Noop, _| Ok(()))
        }
    }

    #[test]
    fn test_bind_aspect_method_errors() {
        let instance: Instance = Arc::new(Noop);
        let missing = AdviceBinding::before("noop", "absent", PointcutExpression::All);
        let err = bind_aspect_method::<Noop>(Arc::clone(&instance), &missing).err().unwrap();
        assert_eq!(err, "'Noop' has no advice method named 'absent'");

        let wrong_type: Instance = Arc::new(5u8);
        let binding = AdviceBinding::before("noop", "noop", PointcutExpression::All);
        assert!(bind_aspect_method::<Noop>(wrong_type, &binding).is_err());
        assert!(bind_aspect_method::<Noop>(instance, &binding).is_ok());
    }
}
