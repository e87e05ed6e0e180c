//! 容器 - 组件解析与生命周期引擎
//!
//! 创建流程：解析构造函数参数并实例化 → 注册早期引用 → 属性注入 → 初始化前钩子 →
//! 初始化方法 → 初始化后钩子 → 按作用域缓存。
//!
//! 单例与 request/session 实例的创建由一把可重入锁串行化：同一线程递归创建其他组件不会
//! 阻塞，其他线程等待，因此同一名称至多创建一次。

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::component::{DescriptorProvider, InventoryProvider};
use crate::condition::ConditionEvaluator;
use crate::config::ContainerConfig;
use crate::descriptor::{
    unwrap_payload, ComponentDescriptor, Instance, Payload, ResolvedArgs, Stereotype, TypeKey,
    ValueSpec,
};
use crate::event::{
    ApplicationEventMulticaster, ApplicationEventPublisher, ContainerClosedEvent,
    ContainerStartedEvent, Event, EventListener, ListenerMethodAdapter, SimpleEventMulticaster,
};
use crate::lifecycle::{ComponentPostProcessor, DescriptorPostProcessor, HookPipeline};
use crate::registry::DescriptorRegistry;
use crate::scope::{ScopeContextProvider, ScopeManager, ScopedEntry};
use crate::utils::dependency::{validate_dependency_graph, CreationTracker, DependencyValidationError};
use crate::{ContainerError, ContainerResult, Scope};

/// 组件实例的创建状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationState {
    /// 尚未创建
    NotStarted,
    /// 原始对象已存在，依赖尚未注入完毕
    InProgress,
    /// 已完成注入与初始化
    Ready,
}

/// 尚在创建中的单例
struct EarlyReference {
    raw: Instance,
    /// 早期引用钩子处理后的对象，只在第一次被需要时计算
    resolved: Option<Instance>,
}

/// 需要在关闭时销毁的单例
struct Disposable {
    name: String,
    descriptor: Arc<ComponentDescriptor>,
    target: Instance,
}

/// 两个引用是否指向同一个对象
fn same_instance(a: &Instance, b: &Instance) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// 组件容器
pub struct Container {
    config: ContainerConfig,
    registry: DescriptorRegistry,

    /// 已就绪的单例
    singletons: RwLock<HashMap<String, Instance>>,

    /// 单例与关联作用域实例的创建锁
    creation_lock: ReentrantMutex<()>,

    early_references: Mutex<HashMap<String, EarlyReference>>,
    tracker: Arc<CreationTracker>,

    scopes: ScopeManager,
    scope_context: RwLock<Option<Arc<dyn ScopeContextProvider>>>,

    post_processors: HookPipeline<dyn ComponentPostProcessor>,
    descriptor_post_processors: HookPipeline<dyn DescriptorPostProcessor>,

    /// 按创建顺序记录，关闭时逆序销毁
    disposables: Mutex<Vec<Disposable>>,

    events: Arc<SimpleEventMulticaster>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Self {
        tracing::debug!(
            "Creating container (allow_circular_references={}, active_profiles={:?})",
            config.allow_circular_references,
            config.active_profiles
        );
        Self {
            config,
            registry: DescriptorRegistry::new(),
            singletons: RwLock::new(HashMap::new()),
            creation_lock: ReentrantMutex::new(()),
            early_references: Mutex::new(HashMap::new()),
            tracker: Arc::new(CreationTracker::new()),
            scopes: ScopeManager::new(),
            scope_context: RwLock::new(None),
            post_processors: HookPipeline::new(),
            descriptor_post_processors: HookPipeline::new(),
            disposables: Mutex::new(Vec::new()),
            events: Arc::new(SimpleEventMulticaster::new()),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// 描述符存储
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    // ========== 注册 ==========

    /// 注册组件；名称已存在时失败
    pub fn register(&self, name: &str, descriptor: ComponentDescriptor) -> ContainerResult<()> {
        tracing::trace!(
            "Registering component '{}' (type={}, scope={})",
            name,
            descriptor.type_name(),
            descriptor.scope()
        );
        self.registry.register(name, descriptor)?;
        tracing::debug!("Component registered: '{}'", name);
        Ok(())
    }

    /// 显式覆盖已有描述符，同时销毁已缓存的单例
    pub fn replace(&self, name: &str, descriptor: ComponentDescriptor) {
        self.destroy_singleton(name);
        if self.registry.replace(name, descriptor).is_some() {
            tracing::debug!("Component descriptor replaced: '{}'", name);
        }
    }

    /// 移除组件描述符，并销毁其缓存的单例
    pub fn remove(&self, name: &str) -> ContainerResult<()> {
        if !self.registry.contains(name) {
            return Err(ContainerError::NoSuchComponent(name.to_string()));
        }
        self.destroy_singleton(name);
        self.registry.remove(name);
        tracing::debug!("Component removed: '{}'", name);
        Ok(())
    }

    /// 从缓存中移除单例，并用旧描述符执行其销毁方法
    fn destroy_singleton(&self, name: &str) {
        let _lock = self.creation_lock.lock();
        if self.singletons.write().remove(name).is_none() {
            return;
        }
        let disposable = {
            let mut disposables = self.disposables.lock();
            disposables
                .iter()
                .position(|disposable| disposable.name == name)
                .map(|index| disposables.remove(index))
        };
        if let Some(disposable) = disposable {
            self.destroy(&disposable.name, &disposable.descriptor, &disposable.target);
        }
        tracing::debug!("Singleton '{}' discarded", name);
    }

    pub fn set_primary(&self, name: &str, primary: bool) -> ContainerResult<()> {
        self.registry.set_primary(name, primary)
    }

    /// 注册某个描述符提供者给出的全部组件
    pub fn register_provider(&self, provider: &dyn DescriptorProvider) -> ContainerResult<usize> {
        let descriptors = provider.descriptors()?;
        let count = descriptors.len();
        for (name, descriptor) in descriptors {
            self.register(&name, descriptor)?;
        }
        tracing::debug!("Registered {} component(s) from {}", count, provider.name());
        Ok(count)
    }

    /// 注册通过 `inventory` 提交的全部组件
    pub fn scan_components(&self) -> ContainerResult<usize> {
        self.register_provider(&InventoryProvider)
    }

    pub fn add_post_processor(&self, processor: Arc<dyn ComponentPostProcessor>) {
        self.post_processors.register(processor);
    }

    pub fn add_descriptor_post_processor(&self, processor: Arc<dyn DescriptorPostProcessor>) {
        self.descriptor_post_processors.register(processor);
    }

    // ========== 事件 ==========

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.events.add_listener(listener);
    }

    pub fn remove_listener(&self, listener_name: &str) -> bool {
        self.events.remove_listener(listener_name)
    }

    /// 把组件 `component` 的方法注册为类型 `E` 的监听器
    ///
    /// 组件立即解析，监听器名称为 `component.listener_name`
    pub fn add_listener_method<T, E, F>(
        &self,
        component: &str,
        listener_name: &str,
        method: F,
    ) -> ContainerResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        E: Event,
        F: Fn(&T, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let target = self.resolve_as::<T>(component)?;
        self.events.add_listener(Arc::new(ListenerMethodAdapter::new(
            format!("{}.{}", component, listener_name),
            target,
            method,
        )));
        Ok(())
    }

    /// 设置后监听器失败只交给处理器，不再中断分发
    pub fn set_event_error_handler<F>(&self, handler: F)
    where
        F: Fn(&dyn EventListener, &dyn Event, &anyhow::Error) + Send + Sync + 'static,
    {
        self.events.set_error_handler(handler);
    }

    pub fn publish_event<E: Event>(&self, event: E) -> ContainerResult<()> {
        self.events.multicast_event(Arc::new(event))
    }

    pub fn event_publisher(&self) -> ApplicationEventPublisher {
        let multicaster: Arc<dyn ApplicationEventMulticaster> = self.events.clone();
        ApplicationEventPublisher::new(multicaster)
    }

    /// 设置 request/session 关联键的提供者
    pub fn set_scope_context(&self, provider: Arc<dyn ScopeContextProvider>) {
        *self.scope_context.write() = Some(provider);
    }

    // ========== 查询 ==========

    pub fn contains_component(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// 全部组件名称，按注册顺序
    pub fn component_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ComponentDescriptor>> {
        self.registry.get(name)
    }

    /// 可以赋值给 `T` 的组件名称，按注册顺序
    pub fn names_for_type<T: ?Sized + 'static>(&self) -> Vec<String> {
        self.registry.names_for_type(TypeId::of::<T>())
    }

    /// 带有指定标记的组件名称（例如全部控制器或切面）
    pub fn names_with_marker(&self, stereotype: &Stereotype) -> Vec<String> {
        self.registry.names_with_marker(stereotype)
    }

    pub fn creation_state(&self, name: &str) -> CreationState {
        if self.singletons.read().contains_key(name) {
            CreationState::Ready
        } else if self.early_references.lock().contains_key(name) || self.tracker.is_creating(name) {
            CreationState::InProgress
        } else {
            CreationState::NotStarted
        }
    }

    // ========== 解析 ==========

    /// 按名称解析
    pub fn resolve(&self, name: &str) -> ContainerResult<Instance> {
        tracing::trace!("Resolving component '{}'", name);
        let descriptor = self.registry.get(name).ok_or_else(|| {
            tracing::debug!("Component '{}' not found in container", name);
            ContainerError::NoSuchComponent(name.to_string())
        })?;

        match descriptor.scope() {
            Scope::Singleton => self.resolve_singleton(name, &descriptor),
            Scope::Prototype => {
                tracing::debug!("Creating new instance of prototype component '{}'", name);
                self.create(name, &descriptor, false).map(|(instance, _)| instance)
            }
            scope @ (Scope::Request | Scope::Session) => self.resolve_scoped(name, &descriptor, scope),
        }
    }

    /// 按名称解析并转换为 `T`（具体类型或 `dyn Trait`）
    pub fn resolve_as<T: ?Sized + 'static>(&self, name: &str) -> ContainerResult<Arc<T>> {
        let instance = self.resolve(name)?;
        let payload = self.view(name, &instance, TypeKey::of::<T>())?;
        unwrap_payload::<T>(payload).ok_or_else(|| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>().to_string(),
        })
    }

    /// 按类型解析，按 primary 规则消歧
    pub fn resolve_by_type<T: ?Sized + 'static>(&self) -> ContainerResult<Arc<T>> {
        let name = self.select_candidate(TypeKey::of::<T>(), None)?;
        self.resolve_as::<T>(&name)
    }

    /// 按类型解析，先用 qualifier（组件名称或限定值）缩小候选集
    pub fn resolve_qualified<T: ?Sized + 'static>(&self, qualifier: &str) -> ContainerResult<Arc<T>> {
        let name = self.select_candidate(TypeKey::of::<T>(), Some(qualifier))?;
        self.resolve_as::<T>(&name)
    }

    /// 解析所有可以赋值给 `T` 的组件，按注册顺序
    pub fn resolve_all<T: ?Sized + 'static>(&self) -> ContainerResult<Vec<Arc<T>>> {
        self.names_for_type::<T>()
            .iter()
            .map(|name| self.resolve_as::<T>(name))
            .collect()
    }

    fn resolve_singleton(
        &self,
        name: &str,
        descriptor: &Arc<ComponentDescriptor>,
    ) -> ContainerResult<Instance> {
        if let Some(instance) = self.singletons.read().get(name) {
            tracing::debug!("Returning cached instance of singleton component '{}'", name);
            return Ok(Arc::clone(instance));
        }

        let _lock = self.creation_lock.lock();

        // 等锁期间可能已被其他线程创建
        if let Some(instance) = self.singletons.read().get(name) {
            return Ok(Arc::clone(instance));
        }

        if self.tracker.is_creating(name) {
            if let Some(early) = self.early_reference(name)? {
                return Ok(early);
            }
            let chain = self.tracker.cycle_through(name);
            tracing::error!("Unresolvable circular dependency: {}", chain.join(" -> "));
            return Err(ContainerError::CircularDependency { chain });
        }

        tracing::info!("Creating shared instance of singleton component '{}'", name);
        let allow_early = self.config.allow_circular_references;
        let (instance, target) = self.create(name, descriptor, allow_early)?;

        self.singletons
            .write()
            .insert(name.to_string(), Arc::clone(&instance));
        if descriptor.destroy_method().is_some() {
            self.disposables.lock().push(Disposable {
                name: name.to_string(),
                descriptor: Arc::clone(descriptor),
                target,
            });
        }
        tracing::debug!("Singleton component '{}' created and cached", name);
        Ok(instance)
    }

    fn resolve_scoped(
        &self,
        name: &str,
        descriptor: &Arc<ComponentDescriptor>,
        scope: Scope,
    ) -> ContainerResult<Instance> {
        let key = self
            .scope_context
            .read()
            .as_ref()
            .and_then(|provider| provider.correlation_key(scope))
            .ok_or_else(|| ContainerError::NoActiveScope {
                scope,
                name: name.to_string(),
            })?;
        let Some(instances) = self.scopes.instances(scope) else {
            return Err(ContainerError::NoActiveScope {
                scope,
                name: name.to_string(),
            });
        };

        if let Some(instance) = instances.get(&key, name) {
            tracing::debug!("Returning {} scoped instance of '{}' for '{}'", scope, name, key);
            return Ok(instance);
        }

        let _lock = self.creation_lock.lock();
        if let Some(instance) = instances.get(&key, name) {
            return Ok(instance);
        }

        tracing::debug!("Creating {} scoped instance of '{}' for '{}'", scope, name, key);
        let (instance, target) = self.create(name, descriptor, false)?;
        Ok(instances.insert(&key, name, instance, target))
    }

    /// 按类型选择唯一候选
    fn select_candidate(&self, target: TypeKey, qualifier: Option<&str>) -> ContainerResult<String> {
        let mut candidates = self.registry.candidates(target.id());
        if let Some(qualifier) = qualifier {
            candidates.retain(|(name, descriptor)| descriptor.matches_qualifier(name, qualifier));
        }
        tracing::trace!(
            "Candidates for type '{}': {:?}",
            target.name(),
            candidates.iter().map(|(name, _)| name).collect::<Vec<_>>()
        );

        match candidates.len() {
            0 => Err(ContainerError::NoSuchComponent(match qualifier {
                Some(qualifier) => format!("{} (qualifier '{}')", target.name(), qualifier),
                None => target.name().to_string(),
            })),
            1 => Ok(candidates.remove(0).0),
            _ => {
                let names: Vec<String> = candidates.iter().map(|(name, _)| name.clone()).collect();
                let mut primaries: Vec<String> = candidates
                    .into_iter()
                    .filter(|(_, descriptor)| descriptor.is_primary())
                    .map(|(name, _)| name)
                    .collect();
                match primaries.len() {
                    1 => Ok(primaries.remove(0)),
                    0 => Err(ContainerError::AmbiguousType {
                        type_name: target.name().to_string(),
                        candidates: names,
                    }),
                    _ => Err(ContainerError::AmbiguousPrimary {
                        type_name: target.name().to_string(),
                        candidates: primaries,
                    }),
                }
            }
        }
    }

    /// 把组件实例转换为目标类型
    fn view(&self, name: &str, instance: &Instance, target: TypeKey) -> ContainerResult<Payload> {
        let mismatch = || ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: target.name().to_string(),
        };
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| ContainerError::NoSuchComponent(name.to_string()))?;
        let binding = descriptor.binding_for(target.id()).ok_or_else(mismatch)?;
        binding.cast(instance).ok_or_else(mismatch)
    }

    /// 解析值或引用
    fn resolve_value(&self, value: &ValueSpec, target: TypeKey) -> ContainerResult<Payload> {
        match value {
            ValueSpec::Value(literal) => {
                if literal.key() != target {
                    return Err(ContainerError::TypeMismatch {
                        name: format!("literal {:?}", literal.key()),
                        expected: target.name().to_string(),
                    });
                }
                Ok(literal.payload())
            }
            ValueSpec::Reference(reference) => {
                let instance = self.resolve(reference)?;
                self.view(reference, &instance, target)
            }
            ValueSpec::ByType { qualifier } => {
                let name = self.select_candidate(target, qualifier.as_deref())?;
                let instance = self.resolve(&name)?;
                self.view(&name, &instance, target)
            }
        }
    }

    // ========== 创建 ==========

    /// 创建一个实例，返回 (对外暴露的实例, 原始对象)
    fn create(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        allow_early: bool,
    ) -> ContainerResult<(Instance, Instance)> {
        let _guard = self.tracker.enter(name).ok_or_else(|| {
            let chain = self.tracker.cycle_through(name);
            tracing::error!("Unresolvable circular dependency: {}", chain.join(" -> "));
            ContainerError::CircularDependency { chain }
        })?;

        let result = self.do_create(name, descriptor, allow_early);
        if allow_early {
            self.early_references.lock().remove(name);
        }
        if let Err(err) = &result {
            tracing::debug!("Creation of component '{}' failed: {}", name, err);
            self.post_processors.apply_creation_failed(name);
        }
        result
    }

    fn do_create(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        allow_early: bool,
    ) -> ContainerResult<(Instance, Instance)> {
        // 1. 构造函数注入：此时还没有可以暴露的对象
        let mut args = self.resolve_constructor_args(name, descriptor)?;
        let raw = descriptor
            .instantiate(&mut args)
            .map_err(|e| ContainerError::creation_failure(name, e))?;

        // 2. 早期引用
        if allow_early {
            self.early_references.lock().insert(
                name.to_string(),
                EarlyReference {
                    raw: Arc::clone(&raw),
                    resolved: None,
                },
            );
        }

        // 3. 属性注入
        self.populate(name, descriptor, &raw)?;

        // 4. 初始化
        let exposed = self.initialize(name, descriptor, Arc::clone(&raw))?;

        // 5. 早期引用与最终实例对齐
        let exposed = if allow_early {
            self.reconcile_early_reference(name, &raw, exposed)?
        } else {
            exposed
        };
        Ok((exposed, raw))
    }

    fn resolve_constructor_args(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
    ) -> ContainerResult<ResolvedArgs> {
        let mut values = Vec::with_capacity(descriptor.constructor_args().len());
        for (index, arg) in descriptor.constructor_args().iter().enumerate() {
            tracing::trace!(
                "Resolving constructor argument #{} of '{}': {:?}",
                index,
                name,
                arg.value_spec()
            );
            let payload = self
                .resolve_value(arg.value_spec(), arg.target())
                .map_err(|e| ContainerError::creation_failure(name, e))?;
            values.push((arg.target(), payload));
        }
        Ok(ResolvedArgs::new(name, values))
    }

    fn populate(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        raw: &Instance,
    ) -> ContainerResult<()> {
        for property in descriptor.properties() {
            let setter = descriptor.setter(&property.name).ok_or_else(|| {
                ContainerError::creation_failure(
                    name,
                    anyhow!("no setter named '{}' on '{}'", property.name, descriptor.type_name()),
                )
            })?;
            tracing::trace!("Injecting property '{}' of '{}'", property.name, name);
            let value = self
                .resolve_value(&property.value, setter.target())
                .map_err(|e| ContainerError::creation_failure(name, e))?;
            setter
                .apply(raw, value)
                .map_err(|e| ContainerError::creation_failure(name, e))?;
        }
        Ok(())
    }

    fn initialize(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        raw: Instance,
    ) -> ContainerResult<Instance> {
        let instance = self
            .post_processors
            .apply_before_initialization(Arc::clone(&raw), name)
            .map_err(|e| ContainerError::creation_failure(name, e))?;

        if let Some(method) = descriptor.init_method() {
            // 钩子替换成其他类型时，初始化方法仍作用于原始对象
            let target = if (*instance).type_id() == descriptor.type_key().id() {
                &instance
            } else {
                &raw
            };
            tracing::debug!("Invoking init method '{}' on component '{}'", method, name);
            descriptor
                .invoke_method(method, target)
                .map_err(|e| ContainerError::creation_failure(name, e))?;
        }

        self.post_processors
            .apply_after_initialization(instance, name)
            .map_err(|e| ContainerError::creation_failure(name, e))
    }

    /// 取得早期引用；首次需要时执行早期引用钩子
    fn early_reference(&self, name: &str) -> ContainerResult<Option<Instance>> {
        let raw = {
            let references = self.early_references.lock();
            match references.get(name) {
                None => return Ok(None),
                Some(EarlyReference {
                    resolved: Some(resolved),
                    ..
                }) => return Ok(Some(Arc::clone(resolved))),
                Some(reference) => Arc::clone(&reference.raw),
            }
        };

        tracing::debug!(
            "Exposing early reference of '{}' to resolve a circular dependency",
            name
        );
        let resolved = self
            .post_processors
            .apply_early_reference(raw, name)
            .map_err(|e| ContainerError::creation_failure(name, e))?;

        let mut references = self.early_references.lock();
        Ok(Some(match references.get_mut(name) {
            Some(reference) => Arc::clone(reference.resolved.get_or_insert(resolved)),
            None => resolved,
        }))
    }

    fn reconcile_early_reference(
        &self,
        name: &str,
        raw: &Instance,
        exposed: Instance,
    ) -> ContainerResult<Instance> {
        let early = self
            .early_references
            .lock()
            .get(name)
            .and_then(|reference| reference.resolved.clone());

        match early {
            None => Ok(exposed),
            Some(early) if same_instance(&exposed, raw) => Ok(early),
            Some(early) if same_instance(&exposed, &early) => Ok(exposed),
            Some(_) => Err(ContainerError::creation_failure(
                name,
                anyhow!(
                    "component '{}' was injected into other components as an early reference, \
                     but a post processor wrapped it again after initialization",
                    name
                ),
            )),
        }
    }

    // ========== 容器生命周期 ==========

    /// 执行描述符后处理器，然后按注册顺序预实例化所有非延迟单例，
    /// 最后发布 [`ContainerStartedEvent`]
    pub fn refresh(&self) -> ContainerResult<()> {
        let started = Instant::now();
        tracing::info!(
            "Refreshing container with {} component descriptor(s)",
            self.registry.len()
        );

        ConditionEvaluator::new(self.config.condition_context())
            .post_process_descriptors(&self.registry)?;
        self.descriptor_post_processors.apply(&self.registry)?;

        let mut created = 0;
        for (name, descriptor) in self.registry.snapshot() {
            if descriptor.is_singleton() && !descriptor.is_lazy() {
                self.resolve(&name).map_err(|err| {
                    tracing::error!("Failed to pre-instantiate singleton '{}': {}", name, err);
                    err
                })?;
                created += 1;
            }
        }

        tracing::info!("Container refreshed: {} singleton(s) pre-instantiated", created);
        self.publish_event(ContainerStartedEvent::new(
            self.registry.len(),
            created,
            started.elapsed(),
        ))
    }

    /// 静态检查构造函数依赖图：缺失的组件与构造函数循环
    pub fn validate_dependencies(&self) -> ContainerResult<()> {
        let mut graph = Vec::new();
        for (name, descriptor) in self.registry.snapshot() {
            let mut deps = Vec::new();
            for arg in descriptor.constructor_args() {
                match arg.value_spec() {
                    ValueSpec::Value(_) => {}
                    ValueSpec::Reference(reference) => deps.push(reference.clone()),
                    ValueSpec::ByType { qualifier } => {
                        let dep = self
                            .select_candidate(arg.target(), qualifier.as_deref())
                            .map_err(|e| {
                                ContainerError::DependencyValidationFailed(format!(
                                    "constructor of '{}': {}",
                                    name, e
                                ))
                            })?;
                        deps.push(dep);
                    }
                }
            }
            graph.push((name, deps));
        }

        validate_dependency_graph(&graph).map_err(|err| match err {
            DependencyValidationError::CircularDependency { cycle } => {
                ContainerError::CircularDependency { chain: cycle }
            }
            missing => ContainerError::DependencyValidationFailed(missing.to_string()),
        })
    }

    /// 结束一个请求，销毁其 request 作用域实例
    pub fn evict_request(&self, key: &str) -> usize {
        self.evict_scope(Scope::Request, key)
    }

    /// 结束一个会话，销毁其 session 作用域实例
    pub fn evict_session(&self, key: &str) -> usize {
        self.evict_scope(Scope::Session, key)
    }

    fn evict_scope(&self, scope: Scope, key: &str) -> usize {
        let entries = self
            .scopes
            .instances(scope)
            .map(|instances| instances.evict(key))
            .unwrap_or_default();
        let count = entries.len();
        for entry in entries {
            self.destroy_scoped(entry);
        }
        tracing::debug!("Evicted {} {} scoped instance(s) for '{}'", count, scope, key);
        count
    }

    fn destroy_scoped(&self, entry: ScopedEntry) {
        if let Some(descriptor) = self.registry.get(&entry.name) {
            self.destroy(&entry.name, &descriptor, &entry.target);
        }
    }

    fn destroy(&self, name: &str, descriptor: &ComponentDescriptor, target: &Instance) {
        let Some(method) = descriptor.destroy_method() else {
            return;
        };
        tracing::debug!("Invoking destroy method '{}' on component '{}'", method, name);
        if let Err(err) = descriptor.invoke_method(method, target) {
            tracing::warn!("Destroy method '{}' of '{}' failed: {:#}", method, name, err);
        }
    }

    /// 发布 [`ContainerClosedEvent`] 后逆序销毁单例，然后清空所有 request/session 缓存
    pub fn shutdown(&self) {
        let _lock = self.creation_lock.lock();
        tracing::info!("Shutting down container");

        if let Err(err) = self.publish_event(ContainerClosedEvent::new()) {
            tracing::error!("Failed to publish close event: {:#}", err);
        }

        let disposables = std::mem::take(&mut *self.disposables.lock());
        for disposable in disposables.into_iter().rev() {
            self.destroy(&disposable.name, &disposable.descriptor, &disposable.target);
        }
        self.singletons.write().clear();

        for scope in [Scope::Request, Scope::Session] {
            if let Some(instances) = self.scopes.instances(scope) {
                for (_, entries) in instances.drain() {
                    for entry in entries {
                        self.destroy_scoped(entry);
                    }
                }
            }
        }
        tracing::info!("Container shut down");
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("components", &self.registry.len())
            .field("singletons", &self.singletons.read().len())
            .field("post_processors", &self.post_processors.len())
            .field("listeners", &self.events.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ArgumentSpec, Autowired};
    use crate::scope::ManualScopeContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    // ---------- 循环依赖（字段注入） ----------

    #[derive(Default)]
    struct NodeA {
        b: Autowired<NodeB>,
    }

    #[derive(Default)]
    struct NodeB {
        c: Autowired<NodeC>,
    }

    #[derive(Default)]
    struct NodeC {
        a: Autowired<NodeA>,
    }

    fn register_field_cycle(container: &Container) {
        container
            .register(
                "a",
                ComponentDescriptor::with_default::<NodeA>()
                    .inject_ref("b", "b", |a: &NodeA, b: Arc<NodeB>| a.b.inject(b))
                    .build(),
            )
            .unwrap();
        container
            .register(
                "b",
                ComponentDescriptor::with_default::<NodeB>()
                    .inject_ref("c", "c", |b: &NodeB, c: Arc<NodeC>| b.c.inject(c))
                    .build(),
            )
            .unwrap();
        container
            .register(
                "c",
                ComponentDescriptor::with_default::<NodeC>()
                    .autowire("a", |c: &NodeC, a: Arc<NodeA>| c.a.inject(a))
                    .build(),
            )
            .unwrap();
    }

    #[test]
    fn test_circular_field_injection_closes_cycle() {
        let container = Container::new();
        register_field_cycle(&container);

        let a = container.resolve_as::<NodeA>("a").unwrap();
        let b = a.b.get().unwrap();
        let c = b.c.get().unwrap();
        let back = c.a.get().unwrap();
        assert!(Arc::ptr_eq(&a, back));

        assert_eq!(container.creation_state("a"), CreationState::Ready);
        assert_eq!(container.creation_state("c"), CreationState::Ready);
    }

    #[test]
    fn test_circular_field_injection_fails_when_disallowed() {
        let container =
            Container::with_config(ContainerConfig::new().allow_circular_references(false));
        register_field_cycle(&container);

        let err = container.resolve("a").unwrap_err();
        match err {
            ContainerError::CircularDependency { chain } => {
                assert_eq!(chain, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(container.creation_state("a"), CreationState::NotStarted);
    }

    // ---------- 循环依赖（构造函数注入） ----------

    struct CtorA {
        _b: Arc<CtorB>,
    }

    struct CtorB {
        _c: Arc<CtorC>,
    }

    struct CtorC {
        _a: Arc<CtorA>,
    }

    #[test]
    fn test_circular_constructor_injection_fails() {
        let container = Container::new();
        container
            .register(
                "a",
                ComponentDescriptor::builder(|args| Ok(CtorA { _b: args.next()? }))
                    .constructor_arg(ArgumentSpec::reference::<CtorB>("b"))
                    .build(),
            )
            .unwrap();
        container
            .register(
                "b",
                ComponentDescriptor::builder(|args| Ok(CtorB { _c: args.next()? }))
                    .constructor_arg(ArgumentSpec::by_type::<CtorC>())
                    .build(),
            )
            .unwrap();
        container
            .register(
                "c",
                ComponentDescriptor::builder(|args| Ok(CtorC { _a: args.next()? }))
                    .constructor_arg(ArgumentSpec::reference::<CtorA>("a"))
                    .build(),
            )
            .unwrap();

        let err = container.resolve("a").unwrap_err();
        assert!(err.is_circular(), "unexpected error: {err}");
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: a -> b -> c -> a"
        );

        // 失败不会留下缓存或早期引用
        for name in ["a", "b", "c"] {
            assert_eq!(container.creation_state(name), CreationState::NotStarted);
        }

        let err = container.validate_dependencies().unwrap_err();
        assert!(err.is_circular());
    }

    // ---------- 作用域 ----------

    struct Counter {
        id: usize,
        hits: AtomicUsize,
    }

    fn counter_descriptor(created: Arc<AtomicUsize>) -> crate::descriptor::DescriptorBuilder<Counter> {
        ComponentDescriptor::builder(move |_| {
            Ok(Counter {
                id: created.fetch_add(1, Ordering::SeqCst),
                hits: AtomicUsize::new(0),
            })
        })
    }

    #[test]
    fn test_singleton_returns_identical_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        container
            .register("counter", counter_descriptor(Arc::clone(&created)).build())
            .unwrap();

        let first = container.resolve("counter").unwrap();
        let second = container.resolve("counter").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_prototype_returns_independent_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let container = Container::new();
        container
            .register("counter", counter_descriptor(Arc::clone(&created)).prototype().build())
            .unwrap();

        let first = container.resolve_as::<Counter>("counter").unwrap();
        let second = container.resolve_as::<Counter>("counter").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        first.hits.fetch_add(5, Ordering::SeqCst);
        assert_eq!(second.hits.load(Ordering::SeqCst), 0);
        assert_ne!(first.id, second.id);
    }

    #[derive(Debug)]
    struct Repository;

    struct Handler {
        repository: Arc<Repository>,
    }

    #[test]
    fn test_prototype_shares_singleton_dependency() {
        let container = Container::new();
        container
            .register("repository", ComponentDescriptor::builder(|_| Ok(Repository)).build())
            .unwrap();
        container
            .register(
                "handler",
                ComponentDescriptor::builder(|args| {
                    Ok(Handler {
                        repository: args.next()?,
                    })
                })
                .constructor_arg(ArgumentSpec::reference::<Repository>("repository"))
                .prototype()
                .build(),
            )
            .unwrap();

        let first = container.resolve_as::<Handler>("handler").unwrap();
        let second = container.resolve_as::<Handler>("handler").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first.repository, &second.repository));
    }

    #[derive(Default)]
    struct Looping {
        next: Autowired<Looping>,
    }

    #[test]
    fn test_prototype_cycle_fails_even_with_field_injection() {
        let container = Container::new();
        container
            .register(
                "looping",
                ComponentDescriptor::with_default::<Looping>()
                    .inject_ref("next", "looping", |l: &Looping, next: Arc<Looping>| l.next.inject(next))
                    .prototype()
                    .build(),
            )
            .unwrap();

        let err = container.resolve("looping").unwrap_err();
        assert!(err.is_circular());
    }

    #[test]
    fn test_concurrent_singleton_creation_happens_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let container = Arc::new(Container::new());
        let slow_created = Arc::clone(&created);
        container
            .register(
                "slow",
                ComponentDescriptor::builder(move |_| {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    Ok(Counter {
                        id: slow_created.fetch_add(1, Ordering::SeqCst),
                        hits: AtomicUsize::new(0),
                    })
                })
                .build(),
            )
            .unwrap();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = Arc::clone(&container);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    container.resolve("slow").unwrap()
                })
            })
            .collect();

        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[test]
    fn test_concurrent_resolution_inside_field_cycle() {
        let container = Arc::new(Container::new());
        register_field_cycle(&container);

        let names = ["a", "b", "c"];
        let barrier = Arc::new(Barrier::new(9));
        let handles: Vec<_> = (0..9)
            .map(|index| {
                let container = Arc::clone(&container);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    container.resolve(names[index % names.len()]).unwrap();
                    container.resolve_as::<NodeA>("a").unwrap()
                })
            })
            .collect();

        let resolved: Vec<Arc<NodeA>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let a = &resolved[0];
        for other in &resolved[1..] {
            assert!(Arc::ptr_eq(a, other));
        }
        // 无论哪个线程先进入循环，环都闭合到同一个实例
        let back = a.b.get().unwrap().c.get().unwrap().a.get().unwrap();
        assert!(Arc::ptr_eq(a, back));
        for name in names {
            assert_eq!(container.creation_state(name), CreationState::Ready);
        }
    }

    #[derive(Default)]
    struct Cart {
        closed: AtomicUsize,
    }

    #[test]
    fn test_request_scope_caches_per_key_and_evicts() {
        let container = Container::new();
        container
            .register(
                "cart",
                ComponentDescriptor::with_default::<Cart>()
                    .scope(Scope::Request)
                    .method("close", |cart: &Cart| {
                        cart.closed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .destroy_method("close")
                    .build(),
            )
            .unwrap();

        let err = container.resolve("cart").unwrap_err();
        assert!(matches!(err, ContainerError::NoActiveScope { scope: Scope::Request, .. }));

        let context = Arc::new(ManualScopeContext::new());
        container.set_scope_context(context.clone());
        let err = container.resolve("cart").unwrap_err();
        assert!(matches!(err, ContainerError::NoActiveScope { .. }));

        context.bind_request("req-1");
        let first = container.resolve_as::<Cart>("cart").unwrap();
        let again = container.resolve_as::<Cart>("cart").unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        context.bind_request("req-2");
        let other = container.resolve_as::<Cart>("cart").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));

        assert_eq!(container.evict_request("req-1"), 1);
        assert_eq!(first.closed.load(Ordering::SeqCst), 1);
        assert_eq!(other.closed.load(Ordering::SeqCst), 0);

        container.shutdown();
        assert_eq!(other.closed.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct Preferences {
        saved: AtomicUsize,
    }

    #[test]
    fn test_session_scope_caches_per_key_and_evicts() {
        let container = Container::new();
        container
            .register(
                "preferences",
                ComponentDescriptor::with_default::<Preferences>()
                    .scope(Scope::Session)
                    .method("save", |prefs: &Preferences| {
                        prefs.saved.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .destroy_method("save")
                    .build(),
            )
            .unwrap();

        let context = Arc::new(ManualScopeContext::new());
        container.set_scope_context(context.clone());

        // 只有请求上下文时 session 作用域仍然不可用
        context.bind_request("req-1");
        let err = container.resolve("preferences").unwrap_err();
        assert!(matches!(err, ContainerError::NoActiveScope { scope: Scope::Session, .. }));

        context.bind_session("sess-1");
        let first = container.resolve_as::<Preferences>("preferences").unwrap();
        context.bind_request("req-2");
        let same_session = container.resolve_as::<Preferences>("preferences").unwrap();
        assert!(Arc::ptr_eq(&first, &same_session));

        context.bind_session("sess-2");
        let other = container.resolve_as::<Preferences>("preferences").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));

        assert_eq!(container.evict_session("sess-1"), 1);
        assert_eq!(first.saved.load(Ordering::SeqCst), 1);
        assert_eq!(other.saved.load(Ordering::SeqCst), 0);
        assert_eq!(container.evict_session("sess-1"), 0);

        // 驱逐后同一会话键重新创建
        context.bind_session("sess-1");
        let recreated = container.resolve_as::<Preferences>("preferences").unwrap();
        assert!(!Arc::ptr_eq(&first, &recreated));

        context.clear_session();
        assert!(matches!(
            container.resolve("preferences"),
            Err(ContainerError::NoActiveScope { scope: Scope::Session, .. })
        ));
    }

    // ---------- 按类型解析 ----------

    trait PaymentGateway: std::fmt::Debug + Send + Sync {
        fn provider(&self) -> &'static str;
    }

    #[derive(Debug, Default)]
    struct Stripe;

    #[derive(Debug, Default)]
    struct Adyen;

    impl PaymentGateway for Stripe {
        fn provider(&self) -> &'static str {
            "stripe"
        }
    }

    impl PaymentGateway for Adyen {
        fn provider(&self) -> &'static str {
            "adyen"
        }
    }

    fn gateways(primary_stripe: bool, primary_adyen: bool) -> Container {
        let container = Container::new();
        let mut stripe = ComponentDescriptor::with_default::<Stripe>()
            .exposes::<dyn PaymentGateway, _>(|s| s as Arc<dyn PaymentGateway>)
            .qualifier("cards");
        if primary_stripe {
            stripe = stripe.primary();
        }
        let mut adyen = ComponentDescriptor::with_default::<Adyen>()
            .exposes::<dyn PaymentGateway, _>(|a| a as Arc<dyn PaymentGateway>);
        if primary_adyen {
            adyen = adyen.primary();
        }
        container.register("stripe", stripe.build()).unwrap();
        container.register("adyen", adyen.build()).unwrap();
        container
    }

    #[test]
    fn test_resolve_by_type_without_primary_is_ambiguous() {
        let container = gateways(false, false);
        let err = container.resolve_by_type::<dyn PaymentGateway>().unwrap_err();
        match err {
            ContainerError::AmbiguousType { candidates, .. } => {
                assert_eq!(candidates, vec!["stripe", "adyen"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_by_type_prefers_single_primary() {
        let container = gateways(false, true);
        let gateway = container.resolve_by_type::<dyn PaymentGateway>().unwrap();
        assert_eq!(gateway.provider(), "adyen");

        // 按名称解析不受 primary 影响
        let stripe = container.resolve_as::<dyn PaymentGateway>("stripe").unwrap();
        assert_eq!(stripe.provider(), "stripe");
    }

    #[test]
    fn test_resolve_by_type_with_two_primaries_fails() {
        let container = gateways(true, true);
        let err = container.resolve_by_type::<dyn PaymentGateway>().unwrap_err();
        assert!(matches!(err, ContainerError::AmbiguousPrimary { .. }));
    }

    #[test]
    fn test_qualifier_narrows_before_primary_rule() {
        let container = gateways(false, true);
        let by_label = container.resolve_qualified::<dyn PaymentGateway>("cards").unwrap();
        assert_eq!(by_label.provider(), "stripe");
        let by_name = container.resolve_qualified::<dyn PaymentGateway>("adyen").unwrap();
        assert_eq!(by_name.provider(), "adyen");

        let err = container
            .resolve_qualified::<dyn PaymentGateway>("paypal")
            .unwrap_err();
        assert!(matches!(err, ContainerError::NoSuchComponent(_)));
    }

    #[test]
    fn test_resolve_all_and_type_lookups() {
        let container = gateways(false, false);
        let all = container.resolve_all::<dyn PaymentGateway>().unwrap();
        let providers: Vec<_> = all.iter().map(|g| g.provider()).collect();
        assert_eq!(providers, vec!["stripe", "adyen"]);
        assert_eq!(container.names_for_type::<Stripe>(), vec!["stripe"]);

        assert!(matches!(
            container.resolve_by_type::<Repository>().unwrap_err(),
            ContainerError::NoSuchComponent(_)
        ));
        assert!(matches!(
            container.resolve_as::<Adyen>("stripe").unwrap_err(),
            ContainerError::TypeMismatch { .. }
        ));
        assert!(matches!(
            container.resolve("unknown").unwrap_err(),
            ContainerError::NoSuchComponent(_)
        ));
    }

    // ---------- 生命周期 ----------

    #[derive(Default)]
    struct Pool {
        events: Mutex<Vec<&'static str>>,
    }

    impl Pool {
        fn record(&self, event: &'static str) -> anyhow::Result<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    struct Tagging;

    impl ComponentPostProcessor for Tagging {
        fn post_process_before_initialization(
            &self,
            instance: Instance,
            _name: &str,
        ) -> ContainerResult<Instance> {
            if let Some(pool) = instance.downcast_ref::<Pool>() {
                pool.events.lock().push("before");
            }
            Ok(instance)
        }

        fn post_process_after_initialization(
            &self,
            instance: Instance,
            _name: &str,
        ) -> ContainerResult<Instance> {
            if let Some(pool) = instance.downcast_ref::<Pool>() {
                pool.events.lock().push("after");
            }
            Ok(instance)
        }
    }

    #[test]
    fn test_lifecycle_order_and_shutdown() {
        let container = Container::new();
        container.add_post_processor(Arc::new(Tagging));
        container
            .register(
                "pool",
                ComponentDescriptor::with_default::<Pool>()
                    .method("open", |p: &Pool| p.record("init"))
                    .method("close", |p: &Pool| p.record("destroy"))
                    .init_method("open")
                    .destroy_method("close")
                    .build(),
            )
            .unwrap();

        container.refresh().unwrap();
        let pool = container.resolve_as::<Pool>("pool").unwrap();
        assert_eq!(*pool.events.lock(), vec!["before", "init", "after"]);

        container.shutdown();
        assert_eq!(*pool.events.lock(), vec!["before", "init", "after", "destroy"]);
        assert_eq!(container.creation_state("pool"), CreationState::NotStarted);
    }

    #[test]
    fn test_missing_init_method_is_creation_failure() {
        let container = Container::new();
        container
            .register(
                "pool",
                ComponentDescriptor::with_default::<Pool>()
                    .init_method("warmUp")
                    .build(),
            )
            .unwrap();

        let err = container.resolve("pool").unwrap_err();
        match &err {
            ContainerError::CreationFailure { name, source } => {
                assert_eq!(name, "pool");
                assert!(source.to_string().contains("warmUp"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(container.creation_state("pool"), CreationState::NotStarted);
    }

    struct Service {
        _pool: Arc<Pool>,
    }

    #[test]
    fn test_nested_failure_is_wrapped_with_cause() {
        let container = Container::new();
        container
            .register(
                "pool",
                ComponentDescriptor::builder(|_| -> anyhow::Result<Pool> {
                    Err(anyhow!("connection refused"))
                })
                .build(),
            )
            .unwrap();
        container
            .register(
                "service",
                ComponentDescriptor::builder(|args| Ok(Service { _pool: args.next()? }))
                    .constructor_arg(ArgumentSpec::by_type::<Pool>())
                    .build(),
            )
            .unwrap();

        let err = container.resolve("service").unwrap_err();
        assert!(matches!(&err, ContainerError::CreationFailure { name, .. } if name == "service"));
        match err.innermost() {
            ContainerError::CreationFailure { name, source } => {
                assert_eq!(name, "pool");
                assert_eq!(source.to_string(), "connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// 早期引用被包装后，初始化后钩子又返回了另一个包装
    struct Rewrapping;

    fn wrap_node(instance: Instance) -> Instance {
        match Arc::clone(&instance).downcast::<NodeA>() {
            Ok(node) => Arc::new(node),
            Err(_) => instance,
        }
    }

    impl ComponentPostProcessor for Rewrapping {
        fn early_reference(&self, instance: Instance, _name: &str) -> ContainerResult<Instance> {
            Ok(wrap_node(instance))
        }

        fn post_process_after_initialization(
            &self,
            instance: Instance,
            _name: &str,
        ) -> ContainerResult<Instance> {
            Ok(wrap_node(instance))
        }
    }

    #[test]
    fn test_early_reference_conflict_is_reported() {
        let container = Container::new();
        container.add_post_processor(Arc::new(Rewrapping));
        container
            .register(
                "a",
                ComponentDescriptor::with_default::<NodeA>()
                    .inject_ref("b", "b", |a: &NodeA, b: Arc<NodeB>| a.b.inject(b))
                    .build(),
            )
            .unwrap();
        container
            .register(
                "b",
                ComponentDescriptor::with_default::<NodeB>()
                    .property("a", ValueSpec::reference("a"))
                    .setter("a", |_: &NodeB, _: Arc<NodeA>| Ok(()))
                    .build(),
            )
            .unwrap();

        let err = container.resolve("a").unwrap_err();
        match err {
            ContainerError::CreationFailure { name, source } => {
                assert_eq!(name, "a");
                assert!(source.to_string().contains("early reference"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(container.creation_state("a"), CreationState::NotStarted);
    }

    // ---------- 事件 ----------

    #[test]
    fn test_started_and_closed_events_bracket_lifecycle() {
        use crate::event::TypedEventListener;

        let container = Container::new();
        container
            .register(
                "pool",
                ComponentDescriptor::with_default::<Pool>()
                    .method("close", |p: &Pool| p.record("destroy"))
                    .destroy_method("close")
                    .build(),
            )
            .unwrap();
        container
            .register("lazyCart", ComponentDescriptor::with_default::<Cart>().lazy().build())
            .unwrap();

        let started = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&started);
        container.add_listener(Arc::new(TypedEventListener::new(
            "startup",
            move |event: &ContainerStartedEvent| {
                sink.lock().push((event.components, event.singletons));
                Ok(())
            },
        )));
        container
            .add_listener_method::<Pool, ContainerClosedEvent, _>(
                "pool",
                "onClosed",
                |pool, _event| pool.record("closed"),
            )
            .unwrap();

        container.refresh().unwrap();
        assert_eq!(*started.lock(), vec![(2, 1)]);

        let pool = container.resolve_as::<Pool>("pool").unwrap();
        container.shutdown();
        assert_eq!(*pool.events.lock(), vec!["closed", "destroy"]);
    }

    struct Broken;

    impl EventListener for Broken {
        fn on_event(&self, _event: Arc<dyn Event>) -> anyhow::Result<()> {
            Err(anyhow!("listener offline"))
        }

        fn listener_name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_listener_failure_fails_refresh_but_not_shutdown() {
        let container = Container::new();
        container
            .register(
                "pool",
                ComponentDescriptor::with_default::<Pool>()
                    .method("close", |p: &Pool| p.record("destroy"))
                    .destroy_method("close")
                    .build(),
            )
            .unwrap();
        container.add_listener(Arc::new(Broken));

        let err = container.refresh().unwrap_err();
        assert!(matches!(err, ContainerError::ListenerFailure { ref listener, .. } if listener == "broken"));

        let pool = container.resolve_as::<Pool>("pool").unwrap();
        container.shutdown();
        assert_eq!(*pool.events.lock(), vec!["destroy"]);
    }

    #[test]
    fn test_event_error_handler_keeps_refresh_going() {
        let container = Container::new();
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reported);
        container.set_event_error_handler(move |listener, _event, _err| {
            assert_eq!(listener.listener_name(), "broken");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        container.add_listener(Arc::new(Broken));

        container.refresh().unwrap();
        container.event_publisher().publish_event(ContainerClosedEvent::new()).unwrap();
        assert_eq!(reported.load(Ordering::SeqCst), 2);

        assert!(container.remove_listener("broken"));
        container.shutdown();
        assert_eq!(reported.load(Ordering::SeqCst), 2);
    }

    // ---------- refresh 与条件 ----------

    #[test]
    fn test_refresh_applies_profiles_and_skips_lazy() {
        let created = Arc::new(AtomicUsize::new(0));
        let container = Container::with_config(ContainerConfig::new().active_profiles(["dev"]));
        container
            .register(
                "eager",
                counter_descriptor(Arc::clone(&created)).build(),
            )
            .unwrap();
        container
            .register(
                "lazy",
                counter_descriptor(Arc::clone(&created)).lazy().build(),
            )
            .unwrap();
        container
            .register(
                "prodOnly",
                counter_descriptor(Arc::clone(&created)).profile("prod").build(),
            )
            .unwrap();

        container.refresh().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(!container.contains_component("prodOnly"));
        assert_eq!(container.creation_state("lazy"), CreationState::NotStarted);
        assert_eq!(container.component_names(), vec!["eager", "lazy"]);
    }

    struct PrimaryOverride;

    impl DescriptorPostProcessor for PrimaryOverride {
        fn post_process_descriptors(&self, registry: &DescriptorRegistry) -> ContainerResult<()> {
            registry.set_primary("stripe", true)
        }
    }

    #[test]
    fn test_descriptor_post_processor_runs_on_refresh() {
        let container = gateways(false, false);
        container.add_descriptor_post_processor(Arc::new(PrimaryOverride));
        container.refresh().unwrap();
        let gateway = container.resolve_by_type::<dyn PaymentGateway>().unwrap();
        assert_eq!(gateway.provider(), "stripe");
    }

    #[test]
    fn test_register_replace_remove_and_markers() {
        let container = Container::new();
        container
            .register(
                "repository",
                ComponentDescriptor::builder(|_| Ok(Repository))
                    .stereotype(Stereotype::Repository)
                    .build(),
            )
            .unwrap();
        assert!(matches!(
            container.register("repository", ComponentDescriptor::builder(|_| Ok(Repository)).build()),
            Err(ContainerError::AlreadyRegistered(_))
        ));
        assert_eq!(
            container.names_with_marker(&Stereotype::Repository),
            vec!["repository"]
        );

        let first = container.resolve("repository").unwrap();
        container.replace("repository", ComponentDescriptor::builder(|_| Ok(Repository)).build());
        let second = container.resolve("repository").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(container.names_with_marker(&Stereotype::Repository).is_empty());

        container.remove("repository").unwrap();
        assert!(!container.contains_component("repository"));
        assert!(container.remove("repository").is_err());
    }

    #[test]
    fn test_replace_and_remove_destroy_cached_singleton() {
        let closed = Arc::new(AtomicUsize::new(0));
        let descriptor = |closed: &Arc<AtomicUsize>| {
            let closed = Arc::clone(closed);
            ComponentDescriptor::with_default::<Cart>()
                .method("close", move |_cart: &Cart| {
                    closed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .destroy_method("close")
                .build()
        };

        let container = Container::new();
        container.register("cart", descriptor(&closed)).unwrap();
        container.resolve("cart").unwrap();

        container.replace("cart", descriptor(&closed));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        container.resolve("cart").unwrap();

        container.remove("cart").unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 2);

        // 已经销毁过的实例不会在关闭时再次销毁
        container.shutdown();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_literal_constructor_arguments() {
        struct Endpoint {
            host: String,
            port: u16,
        }

        let container = Container::new();
        container
            .register(
                "endpoint",
                ComponentDescriptor::builder(|args| {
                    Ok(Endpoint {
                        host: args.next_value()?,
                        port: args.next_value()?,
                    })
                })
                .constructor_arg(ArgumentSpec::value("localhost".to_string()))
                .constructor_arg(ArgumentSpec::value(8080u16))
                .build(),
            )
            .unwrap();

        let endpoint = container.resolve_as::<Endpoint>("endpoint").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 8080);
    }

    #[test]
    fn test_validate_dependencies_reports_missing_reference() {
        let container = Container::new();
        container
            .register(
                "handler",
                ComponentDescriptor::builder(|args| Ok(Handler { repository: args.next()? }))
                    .constructor_arg(ArgumentSpec::reference::<Repository>("repository"))
                    .build(),
            )
            .unwrap();
        let err = container.validate_dependencies().unwrap_err();
        assert!(matches!(err, ContainerError::DependencyValidationFailed(_)));

        container
            .register("repository", ComponentDescriptor::builder(|_| Ok(Repository)).build())
            .unwrap();
        assert!(container.validate_dependencies().is_ok());
    }
}
