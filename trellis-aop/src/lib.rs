//! trellis-aop: 面向切面编程支持
//!
//! 提供方法拦截与切面织入：
//! - 五种通知（Before / After / AfterReturning / AfterThrowing / Around）
//! - 切点表达式（通配符、正则、execution、组合）
//! - 显式分发表构建的代理与每次调用独立的拦截器链
//! - 通过组件后处理器自动为匹配的组件创建代理，支持循环依赖中的早期代理
//!
//! ## 使用示例
//!
//! ```ignore
//! let container = Arc::new(Container::new());
//! let aspects = Arc::new(AspectRegistry::new());
//! aspects.register_aspect::<AuditAspect>();
//! aspects.advise::<OrderService>();
//! aspects.register_binding(
//!     AdviceBinding::before("auditAspect", "record", PointcutExpression::execution("* OrderService.*(..)"))
//!         .order(1),
//! );
//! AopPostProcessor::install(&container, aspects);
//! container.refresh()?;
//! ```

pub mod advice;
pub mod interceptor;
pub mod invocation;
pub mod joinpoint;
pub mod pointcut;
pub mod post_processor;
pub mod proxy;
pub mod registry;

// 重新导出常用类型
pub use advice::{AdviceBinding, AdviceKind, AdviceMethod, Aspect, AspectMethods, DEFAULT_ORDER};
pub use interceptor::{
    AfterAdviceInterceptor, AfterReturningAdviceInterceptor, AfterThrowingAdviceInterceptor,
    AroundAdviceInterceptor, BeforeAdviceInterceptor, LoggingInterceptor,
};
pub use invocation::{
    downcast_return, returned, Arguments, InterceptorChain, MethodInterceptor, MethodInvocation,
    ReturnValue,
};
pub use joinpoint::{JoinPoint, ProceedingJoinPoint};
pub use pointcut::PointcutExpression;
pub use post_processor::AopPostProcessor;
pub use proxy::{Advised, AopProxy, MethodTable, ProxyFactory};
pub use registry::AspectRegistry;

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::advice::{AdviceBinding, AdviceKind, Aspect, AspectMethods};
    pub use crate::invocation::{returned, Arguments, MethodInterceptor, ReturnValue};
    pub use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
    pub use crate::pointcut::PointcutExpression;
    pub use crate::post_processor::AopPostProcessor;
    pub use crate::proxy::{Advised, AopProxy, MethodTable};
    pub use crate::registry::AspectRegistry;
}
