//! 通知（Advice）与切面定义
//!
//! 切面本身是容器中的普通组件。切面类型通过 [`Aspect::advice_methods`] 按名称公开
//! 自己的通知方法，[`AdviceBinding`] 再用 (切面组件名, 方法名, 类型, 顺序, 切点)
//! 把某个通知方法织入匹配的组件方法。

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::interceptor::{
    AfterAdviceInterceptor, AfterReturningAdviceInterceptor, AfterThrowingAdviceInterceptor,
    AroundAdviceInterceptor, BeforeAdviceInterceptor,
};
use crate::invocation::{MethodInterceptor, ReturnValue};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::pointcut::PointcutExpression;

/// 未声明顺序的通知排在最后
pub const DEFAULT_ORDER: i32 = i32::MAX;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceKind {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 环绕通知（可以控制方法执行）
    Around,
}

impl AdviceKind {
    /// 在拦截器链中的分组位置，数字越小越靠外
    ///
    /// 后置类拦截器在最外层，它们的通知因此在内层全部返回之后才执行；
    /// 同组内按顺序值升序排列，于是后置通知按顺序值降序执行。
    pub fn chain_rank(self) -> u8 {
        match self {
            AdviceKind::After => 0,
            AdviceKind::AfterReturning => 1,
            AdviceKind::AfterThrowing => 2,
            AdviceKind::Before => 3,
            AdviceKind::Around => 4,
        }
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdviceKind::Before => "Before",
            AdviceKind::After => "After",
            AdviceKind::AfterReturning => "AfterReturning",
            AdviceKind::AfterThrowing => "AfterThrowing",
            AdviceKind::Around => "Around",
        })
    }
}

type JoinPointMethod<A> = Arc<dyn Fn(&A, &JoinPoint) -> anyhow::Result<()> + Send + Sync>;
type ReturningMethod<A> = Arc<dyn Fn(&A, &JoinPoint, &ReturnValue) -> anyhow::Result<()> + Send + Sync>;
type ThrowingMethod<A> =
    Arc<dyn Fn(&A, &JoinPoint, &(dyn StdError + 'static)) -> anyhow::Result<()> + Send + Sync>;
type AroundMethod<A> =
    Arc<dyn Fn(&A, &mut ProceedingJoinPoint<'_>) -> anyhow::Result<ReturnValue> + Send + Sync>;

/// 切面上的一个通知方法，按参数形状区分
pub enum AdviceMethod<A> {
    /// `fn(&self, &JoinPoint)`，可用于任何非环绕通知
    JoinPoint(JoinPointMethod<A>),
    /// `fn(&self, &JoinPoint, &ReturnValue)`，只用于返回后通知
    Returning(ReturningMethod<A>),
    /// `fn(&self, &JoinPoint, &dyn Error)`，只用于异常通知
    Throwing(ThrowingMethod<A>),
    /// `fn(&self, &mut ProceedingJoinPoint)`，只用于环绕通知
    Around(AroundMethod<A>),
}

impl<A> Clone for AdviceMethod<A> {
    fn clone(&self) -> Self {
        match self {
            AdviceMethod::JoinPoint(f) => AdviceMethod::JoinPoint(Arc::clone(f)),
            AdviceMethod::Returning(f) => AdviceMethod::Returning(Arc::clone(f)),
            AdviceMethod::Throwing(f) => AdviceMethod::Throwing(Arc::clone(f)),
            AdviceMethod::Around(f) => AdviceMethod::Around(Arc::clone(f)),
        }
    }
}

impl<A: Send + Sync + 'static> AdviceMethod<A> {
    fn shape(&self) -> &'static str {
        match self {
            AdviceMethod::JoinPoint(_) => "join point",
            AdviceMethod::Returning(_) => "returning",
            AdviceMethod::Throwing(_) => "throwing",
            AdviceMethod::Around(_) => "around",
        }
    }

    /// 把通知方法绑定到切面实例上，生成对应类型的拦截器
    ///
    /// 形状与通知类型不匹配时返回原因。
    pub fn bind(
        &self,
        aspect: Arc<A>,
        kind: AdviceKind,
        label: String,
    ) -> Result<Arc<dyn MethodInterceptor>, String> {
        let interceptor: Arc<dyn MethodInterceptor> = match (kind, self) {
            (AdviceKind::Before, AdviceMethod::JoinPoint(f)) => {
                let f = Arc::clone(f);
                Arc::new(BeforeAdviceInterceptor::new(
                    label,
                    Arc::new(move |jp: &JoinPoint| f(&*aspect, jp)),
                ))
            }
            (AdviceKind::After, AdviceMethod::JoinPoint(f)) => {
                let f = Arc::clone(f);
                Arc::new(AfterAdviceInterceptor::new(
                    label,
                    Arc::new(move |jp: &JoinPoint| f(&*aspect, jp)),
                ))
            }
            (AdviceKind::AfterReturning, AdviceMethod::JoinPoint(f)) => {
                let f = Arc::clone(f);
                Arc::new(AfterReturningAdviceInterceptor::new(
                    label,
                    Arc::new(move |jp: &JoinPoint, _value: &ReturnValue| f(&*aspect, jp)),
                ))
            }
            (AdviceKind::AfterReturning, AdviceMethod::Returning(f)) => {
                let f = Arc::clone(f);
                Arc::new(AfterReturningAdviceInterceptor::new(
                    label,
                    Arc::new(move |jp: &JoinPoint, value: &ReturnValue| f(&*aspect, jp, value)),
                ))
            }
            (AdviceKind::AfterThrowing, AdviceMethod::JoinPoint(f)) => {
                let f = Arc::clone(f);
                Arc::new(AfterThrowingAdviceInterceptor::new(
                    label,
                    Arc::new(move |jp: &JoinPoint, _cause: &(dyn StdError + 'static)| f(&*aspect, jp)),
                ))
            }
            (AdviceKind::AfterThrowing, AdviceMethod::Throwing(f)) => {
                let f = Arc::clone(f);
                Arc::new(AfterThrowingAdviceInterceptor::new(
                    label,
                    Arc::new(move |jp: &JoinPoint, cause: &(dyn StdError + 'static)| {
                        f(&*aspect, jp, cause)
                    }),
                ))
            }
            (AdviceKind::Around, AdviceMethod::Around(f)) => {
                let f = Arc::clone(f);
                Arc::new(AroundAdviceInterceptor::new(
                    label,
                    Arc::new(move |pjp: &mut ProceedingJoinPoint<'_>| f(&*aspect, pjp)),
                ))
            }
            (kind, method) => {
                return Err(format!(
                    "{} advice cannot use a method with {} parameters",
                    kind,
                    method.shape()
                ))
            }
        };
        Ok(interceptor)
    }
}

/// 切面公开的通知方法表
pub struct AspectMethods<A> {
    methods: HashMap<String, AdviceMethod<A>>,
}

impl<A> Default for AspectMethods<A> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<A> AspectMethods<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只接收连接点的通知方法
    pub fn join_point<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&A, &JoinPoint) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.methods
            .insert(name.into(), AdviceMethod::JoinPoint(Arc::new(method)));
        self
    }

    /// 接收返回值的通知方法
    pub fn returning<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&A, &JoinPoint, &ReturnValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.methods
            .insert(name.into(), AdviceMethod::Returning(Arc::new(method)));
        self
    }

    /// 接收失败根因的通知方法
    pub fn throwing<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&A, &JoinPoint, &(dyn StdError + 'static)) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.methods
            .insert(name.into(), AdviceMethod::Throwing(Arc::new(method)));
        self
    }

    /// 环绕通知方法
    pub fn around<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&A, &mut ProceedingJoinPoint<'_>) -> anyhow::Result<ReturnValue>
            + Send
            + Sync
            + 'static,
    {
        self.methods
            .insert(name.into(), AdviceMethod::Around(Arc::new(method)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AdviceMethod<A>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// 切面类型
///
/// # 示例
///
/// ```
/// use trellis_aop::{Aspect, AspectMethods};
///
/// struct AuditAspect;
///
/// impl Aspect for AuditAspect {
///     fn advice_methods() -> AspectMethods<Self> {
///         AspectMethods::new().join_point("record", |_aspect: &AuditAspect, jp| {
///             tracing::info!("audit: {}", jp);
///             Ok(())
///         })
///     }
/// }
///
/// assert!(AuditAspect::advice_methods().contains("record"));
/// ```
pub trait Aspect: Send + Sync + Sized + 'static {
    fn advice_methods() -> AspectMethods<Self>;
}

/// 通知绑定：把切面组件上的一个通知方法织入切点选中的方法
#[derive(Debug, Clone)]
pub struct AdviceBinding {
    aspect: String,
    method: String,
    kind: AdviceKind,
    order: i32,
    pointcut: PointcutExpression,
}

impl AdviceBinding {
    pub fn new(
        aspect: impl Into<String>,
        method: impl Into<String>,
        kind: AdviceKind,
        pointcut: PointcutExpression,
    ) -> Self {
        Self {
            aspect: aspect.into(),
            method: method.into(),
            kind,
            order: DEFAULT_ORDER,
            pointcut,
        }
    }

    pub fn before(aspect: impl Into<String>, method: impl Into<String>, pointcut: PointcutExpression) -> Self {
        Self::new(aspect, method, AdviceKind::Before, pointcut)
    }

    pub fn after(aspect: impl Into<String>, method: impl Into<String>, pointcut: PointcutExpression) -> Self {
        Self::new(aspect, method, AdviceKind::After, pointcut)
    }

    pub fn after_returning(
        aspect: impl Into<String>,
        method: impl Into<String>,
        pointcut: PointcutExpression,
    ) -> Self {
        Self::new(aspect, method, AdviceKind::AfterReturning, pointcut)
    }

    pub fn after_throwing(
        aspect: impl Into<String>,
        method: impl Into<String>,
        pointcut: PointcutExpression,
    ) -> Self {
        Self::new(aspect, method, AdviceKind::AfterThrowing, pointcut)
    }

    pub fn around(aspect: impl Into<String>, method: impl Into<String>, pointcut: PointcutExpression) -> Self {
        Self::new(aspect, method, AdviceKind::Around, pointcut)
    }

    /// 设置顺序值，越小优先级越高
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn aspect(&self) -> &str {
        &self.aspect
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn kind(&self) -> AdviceKind {
        self.kind
    }

    pub fn order_value(&self) -> i32 {
        self.order
    }

    pub fn pointcut(&self) -> &PointcutExpression {
        &self.pointcut
    }

    pub fn matches(&self, join_point: &JoinPoint) -> bool {
        self.pointcut.matches(join_point)
    }

    /// 拦截器名称，例如 `auditAspect.record@Before`
    pub fn label(&self) -> String {
        format!("{}.{}@{}", self.aspect, self.method, self.kind)
    }
}
