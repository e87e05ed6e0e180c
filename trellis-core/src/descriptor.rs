//! 组件描述符 - 描述如何创建、装配和管理组件
//!
//! 描述符在注册后不可变（primary 标记除外）。Rust 没有运行时反射，因此描述符在注册时
//! 就携带了全部"委托表"：构造函数、按名称查找的 setter、按名称查找的生命周期方法，
//! 以及把实例视为某个类型（具体类型或 trait 对象）的转换函数。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::OnceCell;

use crate::condition::ConditionContext;
use crate::Scope;

/// 容器管理的类型擦除实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 装着某个 `Arc<I>` 的盒子，用于在引擎内部传递已转换好类型的依赖
pub type Payload = Box<dyn Any + Send + Sync>;

type Caster = Arc<dyn Fn(&Instance) -> Option<Payload> + Send + Sync>;
type Instantiator = Arc<dyn Fn(&mut ResolvedArgs) -> anyhow::Result<Instance> + Send + Sync>;
type SetterFn = Arc<dyn Fn(&Instance, Payload) -> anyhow::Result<()> + Send + Sync>;
type MethodFn = Arc<dyn Fn(&Instance) -> anyhow::Result<()> + Send + Sync>;
type ConditionFn = Arc<dyn Fn(&ConditionContext) -> bool + Send + Sync>;

/// 类型标识，支持具体类型与 `dyn Trait`
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 从 `Payload` 中取出 `Arc<I>`
pub fn unwrap_payload<I: ?Sized + 'static>(payload: Payload) -> Option<Arc<I>> {
    payload.downcast::<Arc<I>>().ok().map(|boxed| *boxed)
}

/// 类型绑定：声明组件"可赋值给"某个类型，并提供转换
///
/// 转换先尝试把实例当作具体类型，再尝试把它当作已经包装好的 `Arc<I>` 视图
/// （生命周期钩子用代理替换实例时就是这种形式）。
#[derive(Clone)]
pub struct TypeBinding {
    key: TypeKey,
    cast: Caster,
}

impl TypeBinding {
    /// 具体类型本身的绑定
    pub fn concrete<T: Any + Send + Sync>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            cast: Arc::new(|instance: &Instance| {
                if let Ok(concrete) = Arc::clone(instance).downcast::<T>() {
                    return Some(Box::new(concrete) as Payload);
                }
                instance
                    .downcast_ref::<Arc<T>>()
                    .map(|view| Box::new(Arc::clone(view)) as Payload)
            }),
        }
    }

    /// 接口视图的绑定，例如 `dyn OrderApi`
    pub fn view<T, I, F>(coerce: F) -> Self
    where
        T: Any + Send + Sync,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        Self {
            key: TypeKey::of::<I>(),
            cast: Arc::new(move |instance: &Instance| {
                if let Ok(concrete) = Arc::clone(instance).downcast::<T>() {
                    return Some(Box::new(coerce(concrete)) as Payload);
                }
                instance
                    .downcast_ref::<Arc<I>>()
                    .map(|view| Box::new(Arc::clone(view)) as Payload)
            }),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// 把实例转换为绑定的类型，结果是装着 `Arc<I>` 的 `Payload`
    pub fn cast(&self, instance: &Instance) -> Option<Payload> {
        (self.cast)(instance)
    }
}

/// 字面量值
#[derive(Clone)]
pub struct LiteralValue {
    key: TypeKey,
    make: Arc<dyn Fn() -> Payload + Send + Sync>,
}

impl LiteralValue {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn payload(&self) -> Payload {
        (self.make)()
    }
}

/// 值或引用
#[derive(Clone)]
pub enum ValueSpec {
    /// 字面量
    Value(LiteralValue),

    /// 按名称引用另一个组件
    Reference(String),

    /// 按目标类型自动装配，可选 qualifier 缩小候选集
    ByType { qualifier: Option<String> },
}

impl ValueSpec {
    pub fn value<V: Any + Send + Sync>(value: V) -> Self {
        let shared = Arc::new(value);
        ValueSpec::Value(LiteralValue {
            key: TypeKey::of::<V>(),
            make: Arc::new(move || Box::new(Arc::clone(&shared)) as Payload),
        })
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ValueSpec::Reference(name.into())
    }

    pub fn by_type() -> Self {
        ValueSpec::ByType { qualifier: None }
    }

    pub fn qualified(qualifier: impl Into<String>) -> Self {
        ValueSpec::ByType {
            qualifier: Some(qualifier.into()),
        }
    }

    /// 按名称引用的组件
    pub fn referenced_name(&self) -> Option<&str> {
        match self {
            ValueSpec::Reference(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Debug for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSpec::Value(literal) => write!(f, "Value<{:?}>", literal.key),
            ValueSpec::Reference(name) => write!(f, "Reference({})", name),
            ValueSpec::ByType { qualifier: None } => write!(f, "ByType"),
            ValueSpec::ByType {
                qualifier: Some(qualifier),
            } => write!(f, "ByType(@{})", qualifier),
        }
    }
}

/// 构造函数参数：值或引用，加上目标类型
#[derive(Clone, Debug)]
pub struct ArgumentSpec {
    value: ValueSpec,
    target: TypeKey,
}

impl ArgumentSpec {
    pub fn value<V: Any + Send + Sync>(value: V) -> Self {
        Self {
            value: ValueSpec::value(value),
            target: TypeKey::of::<V>(),
        }
    }

    pub fn reference<I: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            value: ValueSpec::reference(name),
            target: TypeKey::of::<I>(),
        }
    }

    pub fn by_type<I: ?Sized + 'static>() -> Self {
        Self {
            value: ValueSpec::by_type(),
            target: TypeKey::of::<I>(),
        }
    }

    pub fn qualified<I: ?Sized + 'static>(qualifier: impl Into<String>) -> Self {
        Self {
            value: ValueSpec::qualified(qualifier),
            target: TypeKey::of::<I>(),
        }
    }

    pub fn value_spec(&self) -> &ValueSpec {
        &self.value
    }

    pub fn target(&self) -> TypeKey {
        self.target
    }
}

/// 属性：名称 -> 值或引用；目标类型由同名 setter 决定
#[derive(Clone, Debug)]
pub struct PropertySpec {
    pub name: String,
    pub value: ValueSpec,
}

/// 按名称查找的 setter
#[derive(Clone)]
pub struct Setter {
    target: TypeKey,
    apply: SetterFn,
}

impl Setter {
    pub fn target(&self) -> TypeKey {
        self.target
    }

    pub fn apply(&self, instance: &Instance, value: Payload) -> anyhow::Result<()> {
        (self.apply)(instance, value)
    }
}

/// 组件标记，用于按类别列出组件（控制器、切面等）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stereotype {
    Component,
    Service,
    Repository,
    Controller,
    Configuration,
    Aspect,
    Custom(String),
}

/// 构造函数参数，按声明顺序解析完毕后交给构造函数
pub struct ResolvedArgs {
    component: String,
    values: Vec<Option<(TypeKey, Payload)>>,
    cursor: usize,
}

impl ResolvedArgs {
    pub(crate) fn new(component: &str, values: Vec<(TypeKey, Payload)>) -> Self {
        Self {
            component: component.to_string(),
            values: values.into_iter().map(Some).collect(),
            cursor: 0,
        }
    }

    /// 取出下一个参数
    pub fn next<I: ?Sized + 'static>(&mut self) -> anyhow::Result<Arc<I>> {
        let index = self.cursor;
        self.cursor += 1;
        self.take(index)
    }

    /// 取出下一个字面量参数的副本
    pub fn next_value<V: Clone + 'static>(&mut self) -> anyhow::Result<V> {
        Ok((*self.next::<V>()?).clone())
    }

    /// 按位置取出参数，每个位置只能取一次
    pub fn take<I: ?Sized + 'static>(&mut self, index: usize) -> anyhow::Result<Arc<I>> {
        let total = self.values.len();
        let slot = self.values.get_mut(index).ok_or_else(|| {
            anyhow!(
                "constructor of '{}' asked for argument #{} but only {} declared",
                self.component,
                index,
                total
            )
        })?;
        let (key, payload) = slot.take().ok_or_else(|| {
            anyhow!(
                "constructor argument #{} of '{}' was already taken",
                index,
                self.component
            )
        })?;
        unwrap_payload::<I>(payload).ok_or_else(|| {
            anyhow!(
                "constructor argument #{} of '{}' is '{}', not '{}'",
                index,
                self.component,
                key.name(),
                std::any::type_name::<I>()
            )
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 字段注入槽位
///
/// 只能写入一次，并且通过 `&self` 写入，所以尚在创建中的共享实例也能被填充。
pub struct Autowired<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
}

impl<T: ?Sized> Autowired<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// 写入依赖
    pub fn inject(&self, value: Arc<T>) -> anyhow::Result<()> {
        self.cell.set(value).map_err(|_| {
            anyhow!(
                "dependency of type '{}' was already injected",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        self.cell.get()
    }

    pub fn is_injected(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T: ?Sized> Default for Autowired<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Autowired<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Autowired")
            .field("type", &std::any::type_name::<T>())
            .field("injected", &self.is_injected())
            .finish()
    }
}

/// 组件描述符
#[derive(Clone)]
pub struct ComponentDescriptor {
    type_key: TypeKey,
    scope: Scope,
    constructor_args: Vec<ArgumentSpec>,
    properties: Vec<PropertySpec>,
    init_method: Option<String>,
    destroy_method: Option<String>,
    primary: bool,
    lazy: bool,
    qualifiers: Vec<String>,
    stereotypes: Vec<Stereotype>,
    profiles: Vec<String>,
    condition: Option<ConditionFn>,
    instantiator: Instantiator,
    setters: HashMap<String, Setter>,
    methods: HashMap<String, MethodFn>,
    bindings: Vec<TypeBinding>,
}

impl ComponentDescriptor {
    /// 以构造函数开始构建描述符
    ///
    /// ```
    /// use trellis_core::ComponentDescriptor;
    ///
    /// struct Clock { offset: i64 }
    ///
    /// let descriptor = ComponentDescriptor::builder(|args| Ok(Clock { offset: args.next_value()? }))
    ///     .constructor_arg(trellis_core::ArgumentSpec::value(3600i64))
    ///     .build();
    /// assert_eq!(descriptor.constructor_args().len(), 1);
    /// ```
    pub fn builder<T, F>(constructor: F) -> DescriptorBuilder<T>
    where
        T: Any + Send + Sync,
        F: Fn(&mut ResolvedArgs) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        DescriptorBuilder::from_instantiator(Arc::new(move |args: &mut ResolvedArgs| {
            Ok(Arc::new(constructor(args)?) as Instance)
        }))
    }

    /// 使用 `Default` 构造
    pub fn with_default<T: Any + Send + Sync + Default>() -> DescriptorBuilder<T> {
        Self::builder(|_| Ok(T::default()))
    }

    /// 注册一个已经存在的对象
    pub fn existing<T: Any + Send + Sync>(instance: Arc<T>) -> DescriptorBuilder<T> {
        DescriptorBuilder::from_instantiator(Arc::new(move |_: &mut ResolvedArgs| {
            Ok(Arc::clone(&instance) as Instance)
        }))
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn type_name(&self) -> &'static str {
        self.type_key.name()
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_singleton(&self) -> bool {
        self.scope == Scope::Singleton
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn constructor_args(&self) -> &[ArgumentSpec] {
        &self.constructor_args
    }

    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    pub fn init_method(&self) -> Option<&str> {
        self.init_method.as_deref()
    }

    pub fn destroy_method(&self) -> Option<&str> {
        self.destroy_method.as_deref()
    }

    pub fn qualifiers(&self) -> &[String] {
        &self.qualifiers
    }

    pub fn stereotypes(&self) -> &[Stereotype] {
        &self.stereotypes
    }

    pub fn has_stereotype(&self, stereotype: &Stereotype) -> bool {
        self.stereotypes.contains(stereotype)
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// 条件谓词是否成立；没有条件时恒为真
    pub fn condition_matches(&self, context: &ConditionContext) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(context))
    }

    pub fn bindings(&self) -> &[TypeBinding] {
        &self.bindings
    }

    /// 是否可以赋值给指定类型
    pub fn is_assignable_to(&self, type_id: TypeId) -> bool {
        self.binding_for(type_id).is_some()
    }

    pub fn binding_for(&self, type_id: TypeId) -> Option<&TypeBinding> {
        self.bindings.iter().find(|binding| binding.key().id() == type_id)
    }

    /// qualifier 可以是组件名称，也可以是描述符声明的限定值
    pub fn matches_qualifier(&self, name: &str, qualifier: &str) -> bool {
        name == qualifier || self.qualifiers.iter().any(|q| q == qualifier)
    }

    /// 构造函数参数中按名称引用的组件
    pub fn constructor_references(&self) -> Vec<String> {
        self.constructor_args
            .iter()
            .filter_map(|arg| arg.value_spec().referenced_name())
            .map(str::to_string)
            .collect()
    }

    pub fn setter(&self, name: &str) -> Option<&Setter> {
        self.setters.get(name)
    }

    /// 调用按名称注册的无参方法（init / destroy）
    pub fn invoke_method(&self, method: &str, instance: &Instance) -> anyhow::Result<()> {
        let method_fn = self.methods.get(method).ok_or_else(|| {
            anyhow!(
                "method '{}' not found on '{}'",
                method,
                self.type_key.name()
            )
        })?;
        method_fn(instance)
    }

    pub(crate) fn instantiate(&self, args: &mut ResolvedArgs) -> anyhow::Result<Instance> {
        (self.instantiator)(args)
    }

    pub(crate) fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("type_name", &self.type_key.name())
            .field("scope", &self.scope)
            .field("constructor_args", &self.constructor_args)
            .field("properties", &self.properties)
            .field("init_method", &self.init_method)
            .field("destroy_method", &self.destroy_method)
            .field("primary", &self.primary)
            .field("lazy", &self.lazy)
            .field("qualifiers", &self.qualifiers)
            .field("stereotypes", &self.stereotypes)
            .finish()
    }
}

/// 描述符构建器，`T` 是组件的具体类型
pub struct DescriptorBuilder<T> {
    descriptor: ComponentDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> DescriptorBuilder<T> {
    fn from_instantiator(instantiator: Instantiator) -> Self {
        Self {
            descriptor: ComponentDescriptor {
                type_key: TypeKey::of::<T>(),
                scope: Scope::default(),
                constructor_args: Vec::new(),
                properties: Vec::new(),
                init_method: None,
                destroy_method: None,
                primary: false,
                lazy: false,
                qualifiers: Vec::new(),
                stereotypes: Vec::new(),
                profiles: Vec::new(),
                condition: None,
                instantiator,
                setters: HashMap::new(),
                methods: HashMap::new(),
                bindings: vec![TypeBinding::concrete::<T>()],
            },
            _marker: PhantomData,
        }
    }

    /// 设置作用域
    pub fn scope(mut self, scope: Scope) -> Self {
        self.descriptor.scope = scope;
        self
    }

    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    /// 追加构造函数参数（按顺序）
    pub fn constructor_arg(mut self, arg: ArgumentSpec) -> Self {
        self.descriptor.constructor_args.push(arg);
        self
    }

    /// 追加属性
    pub fn property(mut self, name: impl Into<String>, value: ValueSpec) -> Self {
        self.descriptor.properties.push(PropertySpec {
            name: name.into(),
            value,
        });
        self
    }

    /// 注册按名称查找的 setter
    pub fn setter<I, F>(mut self, name: impl Into<String>, setter: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<I>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let property = name.clone();
        let apply: SetterFn = Arc::new(move |instance: &Instance, value: Payload| {
            let target = instance.downcast_ref::<T>().ok_or_else(|| {
                anyhow!(
                    "setter '{}' expects an instance of '{}'",
                    property,
                    std::any::type_name::<T>()
                )
            })?;
            let value = unwrap_payload::<I>(value).ok_or_else(|| {
                anyhow!(
                    "property '{}' expects a value of type '{}'",
                    property,
                    std::any::type_name::<I>()
                )
            })?;
            setter(target, value)
        });
        self.descriptor.setters.insert(
            name,
            Setter {
                target: TypeKey::of::<I>(),
                apply,
            },
        );
        self
    }

    /// 字段注入：setter + 按类型装配的属性
    pub fn autowire<I, F>(self, name: impl Into<String>, setter: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<I>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        self.setter(name.clone(), setter)
            .property(name, ValueSpec::by_type())
    }

    /// 字段注入：setter + 按名称引用的属性
    pub fn inject_ref<I, F>(self, name: impl Into<String>, reference: impl Into<String>, setter: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<I>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        self.setter(name.clone(), setter)
            .property(name, ValueSpec::reference(reference))
    }

    /// 注册按名称查找的无参方法
    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        let method_name = name.clone();
        self.descriptor.methods.insert(
            name,
            Arc::new(move |instance: &Instance| {
                let target = instance.downcast_ref::<T>().ok_or_else(|| {
                    anyhow!(
                        "method '{}' expects an instance of '{}'",
                        method_name,
                        std::any::type_name::<T>()
                    )
                })?;
                method(target)
            }),
        );
        self
    }

    /// 设置初始化方法名称（@PostConstruct）
    pub fn init_method(mut self, name: impl Into<String>) -> Self {
        self.descriptor.init_method = Some(name.into());
        self
    }

    /// 设置销毁方法名称（@PreDestroy）
    pub fn destroy_method(mut self, name: impl Into<String>) -> Self {
        self.descriptor.destroy_method = Some(name.into());
        self
    }

    /// 声明可以赋值给接口类型 `I`
    pub fn exposes<I, F>(mut self, coerce: F) -> Self
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    {
        self.descriptor.bindings.push(TypeBinding::view::<T, I, F>(coerce));
        self
    }

    pub fn primary(mut self) -> Self {
        self.descriptor.primary = true;
        self
    }

    /// 设置延迟初始化（仅对单例有效）
    pub fn lazy(mut self) -> Self {
        self.descriptor.lazy = true;
        self
    }

    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.descriptor.qualifiers.push(qualifier.into());
        self
    }

    pub fn stereotype(mut self, stereotype: Stereotype) -> Self {
        self.descriptor.stereotypes.push(stereotype);
        self
    }

    /// 仅在指定 profile 激活时注册
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.descriptor.profiles.push(profile.into());
        self
    }

    /// 仅在条件成立时注册
    pub fn condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ConditionContext) -> bool + Send + Sync + 'static,
    {
        self.descriptor.condition = Some(Arc::new(condition));
        self
    }

    pub fn build(self) -> ComponentDescriptor {
        self.descriptor
    }
}
