//! 连接点（JoinPoint）定义
//!
//! 连接点表示被代理组件上的一次方法调用

use std::fmt;
use std::time::Instant;

use crate::invocation::{Arguments, MethodInvocation, ReturnValue};

/// 连接点信息
///
/// 包含方法调用时的上下文信息
#[derive(Clone)]
pub struct JoinPoint {
    /// 组件名称
    component: String,

    /// 目标类型名称（不含模块路径）
    target_type: String,

    /// 方法名称
    method_name: String,

    /// 方法参数
    args: Arguments,

    /// 调用时间戳
    timestamp: Instant,
}

impl JoinPoint {
    /// 创建新的连接点
    pub fn new(
        component: impl Into<String>,
        target_type: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            target_type: short_type_name(&target_type.into()).to_string(),
            method_name: method_name.into(),
            args: Arguments::new(),
            timestamp: Instant::now(),
        }
    }

    /// 设置参数
    pub fn with_args(mut self, args: Arguments) -> Self {
        self.args = args;
        self
    }

    pub(crate) fn set_args(&mut self, args: Arguments) {
        self.args = args;
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> String {
        format!("{}::{}", self.target_type, self.method_name)
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn args(&self) -> &Arguments {
        &self.args
    }

    /// 获取调用时间戳
    pub fn timestamp(&self) -> &Instant {
        &self.timestamp
    }
}

/// `a::b::OrderService<T>` -> `OrderService`
pub(crate) fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

impl fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("component", &self.component)
            .field("signature", &self.signature())
            .field("args", &self.args)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

/// 环绕通知拿到的调用句柄
///
/// 通知体自行决定是否、何时调用 `proceed()`，也可以替换参数或改写返回值。
pub struct ProceedingJoinPoint<'a> {
    invocation: &'a mut MethodInvocation,
}

impl<'a> ProceedingJoinPoint<'a> {
    pub fn new(invocation: &'a mut MethodInvocation) -> Self {
        Self { invocation }
    }

    /// 继续执行链上剩余的拦截器与目标方法
    pub fn proceed(&mut self) -> anyhow::Result<ReturnValue> {
        self.invocation.proceed()
    }

    /// 用新参数继续执行，从当前位置开始，之后的拦截器和目标方法都看到新参数
    pub fn proceed_with(&mut self, args: Arguments) -> anyhow::Result<ReturnValue> {
        self.invocation.set_args(args);
        self.invocation.proceed()
    }

    /// 获取连接点信息
    pub fn join_point(&self) -> &JoinPoint {
        self.invocation.join_point()
    }

    pub fn args(&self) -> &Arguments {
        self.invocation.args()
    }
}

impl fmt::Debug for ProceedingJoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedingJoinPoint")
            .field("invocation", &self.invocation)
            .finish()
    }
}
