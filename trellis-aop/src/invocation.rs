//! 方法调用与拦截器链
//!
//! 每次通过代理调用方法都会创建一个新的 [`MethodInvocation`]，它持有本次调用的
//! 连接点、拦截器链和游标。`proceed()` 在游标到达链尾时调用真实目标方法，否则
//! 前进游标并调用下一个拦截器。

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::joinpoint::JoinPoint;

/// 方法返回值
pub type ReturnValue = Box<dyn Any + Send + Sync>;

/// 把返回值装箱
pub fn returned<V: Any + Send + Sync>(value: V) -> ReturnValue {
    Box::new(value)
}

/// 从返回值中取出具体类型
pub fn downcast_return<R: Any>(method: &str, value: ReturnValue) -> anyhow::Result<R> {
    value.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
        anyhow!(
            "method '{}' did not return a value of type '{}'",
            method,
            std::any::type_name::<R>()
        )
    })
}

/// 类型擦除的有序调用参数
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数
    pub fn with<V: Any + Send + Sync>(mut self, value: V) -> Self {
        self.values.push(Arc::new(value));
        self
    }

    /// 按位置取参数
    pub fn get<V: Any>(&self, index: usize) -> anyhow::Result<&V> {
        let value = self
            .values
            .get(index)
            .ok_or_else(|| anyhow!("missing argument #{} (got {})", index, self.values.len()))?;
        value.downcast_ref::<V>().ok_or_else(|| {
            anyhow!(
                "argument #{} is not of type '{}'",
                index,
                std::any::type_name::<V>()
            )
        })
    }

    /// 替换指定位置的参数
    pub fn set<V: Any + Send + Sync>(&mut self, index: usize, value: V) -> anyhow::Result<()> {
        let total = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or_else(|| anyhow!("missing argument #{} (got {})", index, total))?;
        *slot = Arc::new(value);
        Ok(())
    }

    /// 指定位置的参数是否为类型 `V`
    pub fn is<V: Any>(&self, index: usize) -> bool {
        self.values
            .get(index)
            .is_some_and(|value| (**value).type_id() == TypeId::of::<V>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arguments({})", self.values.len())
    }
}

/// 真实目标方法
pub type TargetFn = dyn Fn(&Arguments) -> anyhow::Result<ReturnValue> + Send + Sync;

/// 一条拦截器链
pub type InterceptorChain = Arc<[Arc<dyn MethodInterceptor>]>;

/// 方法拦截器
///
/// 拦截器自行决定是否、何时、调用几次 `proceed()`：可以短路、调用一次，
/// 或者把它包在自己的错误处理里。
pub trait MethodInterceptor: Send + Sync {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue>;

    /// 拦截器名称（用于日志）
    fn name(&self) -> &str {
        "MethodInterceptor"
    }
}

/// 一次方法调用
pub struct MethodInvocation {
    join_point: JoinPoint,
    chain: InterceptorChain,
    cursor: usize,
    target: Arc<TargetFn>,
}

impl MethodInvocation {
    pub fn new(join_point: JoinPoint, chain: InterceptorChain, target: Arc<TargetFn>) -> Self {
        Self {
            join_point,
            chain,
            cursor: 0,
            target,
        }
    }

    /// 继续执行：调用下一个拦截器，链尾时调用目标方法
    ///
    /// 游标只前进不后退。链已走完后再调用 `proceed()` 直接调用目标方法。
    pub fn proceed(&mut self) -> anyhow::Result<ReturnValue> {
        let index = self.cursor;
        let Some(interceptor) = self.chain.get(index).cloned() else {
            tracing::trace!("Invoking target method {}", self.join_point);
            return (self.target)(self.join_point.args());
        };

        self.cursor = index + 1;
        tracing::trace!(
            "Invoking interceptor #{} '{}' for {}",
            index,
            interceptor.name(),
            self.join_point
        );
        interceptor.invoke(self)
    }

    pub fn join_point(&self) -> &JoinPoint {
        &self.join_point
    }

    pub fn args(&self) -> &Arguments {
        self.join_point.args()
    }

    /// 替换本次调用的参数，之后的 `proceed()` 使用新参数
    pub fn set_args(&mut self, args: Arguments) {
        self.join_point.set_args(args);
    }

    /// 当前游标位置
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// 链上拦截器数量
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("join_point", &self.join_point)
            .field("cursor", &self.cursor)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}
