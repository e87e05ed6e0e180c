//! 代理
//!
//! 没有运行时字节码生成，代理是一个显式的分发结构：组件类型用 [`MethodTable`]
//! 列出自己的调用面（方法名 → 分发闭包），[`AopProxy`] 为每个方法预先构建拦截器链，
//! 再由组件作者为 `AopProxy<T>` 实现与目标相同的 trait，把每个方法转发给
//! [`AopProxy::call`]。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trellis_core::{ContainerError, ContainerResult};

use crate::invocation::{
    downcast_return, Arguments, InterceptorChain, MethodInterceptor, MethodInvocation,
    ReturnValue, TargetFn,
};
use crate::joinpoint::{short_type_name, JoinPoint};

type MethodFn<T> = Arc<dyn Fn(&T, &Arguments) -> anyhow::Result<ReturnValue> + Send + Sync>;

/// 组件的调用面：方法名 → 分发闭包，保持声明顺序
pub struct MethodTable<T> {
    methods: Vec<(String, MethodFn<T>)>,
}

impl<T> Default for MethodTable<T> {
    fn default() -> Self {
        Self {
            methods: Vec::new(),
        }
    }
}

impl<T> Clone for MethodTable<T> {
    fn clone(&self) -> Self {
        Self {
            methods: self.methods.clone(),
        }
    }
}

impl<T> MethodTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明一个方法；同名方法以后声明的为准
    pub fn method<F>(mut self, name: impl Into<String>, dispatch: F) -> Self
    where
        F: Fn(&T, &Arguments) -> anyhow::Result<ReturnValue> + Send + Sync + 'static,
    {
        let name = name.into();
        let dispatch: MethodFn<T> = Arc::new(dispatch);
        match self.methods.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = dispatch,
            None => self.methods.push((name, dispatch)),
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.iter().any(|(existing, _)| existing == name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// 可以被代理的组件类型
///
/// `Surface` 是调用方看到的 trait 对象类型，`AopProxy<Self>` 也必须实现它。
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use trellis_aop::{returned, Advised, AopProxy, Arguments, MethodTable};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self, name: &str) -> anyhow::Result<String>;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self, name: &str) -> anyhow::Result<String> {
///         Ok(format!("Hello, {}", name))
///     }
/// }
///
/// impl Greeter for AopProxy<English> {
///     fn greet(&self, name: &str) -> anyhow::Result<String> {
///         self.call("greet", Arguments::new().with(name.to_string()))
///     }
/// }
///
/// impl Advised for English {
///     type Surface = dyn Greeter;
///
///     fn method_table() -> MethodTable<Self> {
///         MethodTable::new().method("greet", |target: &English, args| {
///             Ok(returned(target.greet(args.get::<String>(0)?)?))
///         })
///     }
///
///     fn proxy_surface(proxy: Arc<AopProxy<Self>>) -> Arc<dyn Greeter> {
///         proxy
///     }
/// }
/// ```
pub trait Advised: Send + Sync + Sized + 'static {
    type Surface: ?Sized + Send + Sync + 'static;

    fn method_table() -> MethodTable<Self>;

    fn proxy_surface(proxy: Arc<AopProxy<Self>>) -> Arc<Self::Surface>;
}

struct ProxyMethod {
    chain: InterceptorChain,
    target: Arc<TargetFn>,
}

/// AOP 代理：每次调用都会沿着该方法的拦截器链新建一次 [`MethodInvocation`]
pub struct AopProxy<T> {
    component: String,
    target_type: &'static str,
    target: Arc<T>,
    methods: HashMap<String, ProxyMethod>,
}

impl<T: Send + Sync + 'static> AopProxy<T> {
    /// 调用方法，返回类型擦除的结果
    pub fn invoke(&self, method: &str, args: Arguments) -> anyhow::Result<ReturnValue> {
        let entry = self.methods.get(method).ok_or_else(|| {
            ContainerError::MethodBindingFailure {
                target: self.component.clone(),
                method: method.to_string(),
                reason: format!("'{}' has no such method", short_type_name(self.target_type)),
            }
        })?;

        let join_point = JoinPoint::new(&self.component, self.target_type, method).with_args(args);
        MethodInvocation::new(join_point, Arc::clone(&entry.chain), Arc::clone(&entry.target))
            .proceed()
    }

    /// 调用方法并把结果转换为 `R`
    pub fn call<R: Any>(&self, method: &str, args: Arguments) -> anyhow::Result<R> {
        downcast_return(method, self.invoke(method, args)?)
    }

    /// 被代理的原始对象
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn component_name(&self) -> &str {
        &self.component
    }

    /// 方法上的拦截器数量；方法不存在时返回 None
    pub fn interceptor_count(&self, method: &str) -> Option<usize> {
        self.methods.get(method).map(|entry| entry.chain.len())
    }

    /// 是否至少有一个方法带有拦截器
    pub fn is_advised(&self) -> bool {
        self.methods.values().any(|entry| !entry.chain.is_empty())
    }
}

impl<T> fmt::Debug for AopProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<(&String, usize)> = self
            .methods
            .iter()
            .map(|(name, entry)| (name, entry.chain.len()))
            .collect();
        methods.sort();
        f.debug_struct("AopProxy")
            .field("component", &self.component)
            .field("target_type", &self.target_type)
            .field("methods", &methods)
            .finish()
    }
}

/// 代理工厂：收集每个方法的拦截器，然后构建代理
pub struct ProxyFactory<T> {
    component: String,
    target: Arc<T>,
    table: MethodTable<T>,
    interceptors: HashMap<String, Vec<Arc<dyn MethodInterceptor>>>,
}

impl<T: Send + Sync + 'static> ProxyFactory<T> {
    pub fn new(component: impl Into<String>, target: Arc<T>, table: MethodTable<T>) -> Self {
        Self {
            component: component.into(),
            target,
            table,
            interceptors: HashMap::new(),
        }
    }

    /// 为某个方法追加拦截器，先追加的在外层
    pub fn add_interceptor(
        &mut self,
        method: &str,
        interceptor: Arc<dyn MethodInterceptor>,
    ) -> ContainerResult<()> {
        if !self.table.contains(method) {
            return Err(ContainerError::MethodBindingFailure {
                target: self.component.clone(),
                method: method.to_string(),
                reason: format!(
                    "'{}' has no such method",
                    short_type_name(std::any::type_name::<T>())
                ),
            });
        }
        self.interceptors
            .entry(method.to_string())
            .or_default()
            .push(interceptor);
        Ok(())
    }

    /// 为所有方法追加同一个拦截器
    pub fn add_interceptor_to_all(&mut self, interceptor: Arc<dyn MethodInterceptor>) {
        for name in self.table.names() {
            self.interceptors
                .entry(name.to_string())
                .or_default()
                .push(Arc::clone(&interceptor));
        }
    }

    pub fn build(self) -> AopProxy<T> {
        let ProxyFactory {
            component,
            target,
            table,
            mut interceptors,
        } = self;

        let methods = table
            .methods
            .into_iter()
            .map(|(name, dispatch)| {
                let chain: InterceptorChain =
                    Arc::from(interceptors.remove(&name).unwrap_or_default());
                let receiver = Arc::clone(&target);
                let target_fn: Arc<TargetFn> =
                    Arc::new(move |args: &Arguments| dispatch(&*receiver, args));
                (
                    name,
                    ProxyMethod {
                        chain,
                        target: target_fn,
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        tracing::debug!(
            "Built AOP proxy for '{}' with {} method(s)",
            component,
            methods.len()
        );
        AopProxy {
            component,
            target_type: std::any::type_name::<T>(),
            target,
            methods,
        }
    }
}
