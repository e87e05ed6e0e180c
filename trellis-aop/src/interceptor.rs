//! 内置拦截器
//!
//! 每种通知类型对应一个拦截器，它们决定通知相对于 `proceed()` 的执行时机：
//!
//! | 类型 | 时机 |
//! |------|------|
//! | Before | 先执行通知，再继续 |
//! | After | 先继续，无论成功失败都执行一次通知，原错误原样抛出 |
//! | AfterReturning | 成功返回后执行，可以读取返回值 |
//! | AfterThrowing | 失败后执行，拿到根因，再抛出原错误 |
//! | Around | 由通知体自己决定是否以及何时继续 |

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;

use crate::invocation::{MethodInterceptor, MethodInvocation, ReturnValue};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};

/// 只需要连接点的通知
pub type JoinPointAdvice = Arc<dyn Fn(&JoinPoint) -> anyhow::Result<()> + Send + Sync>;

/// 读取返回值的通知
pub type ReturningAdvice =
    Arc<dyn Fn(&JoinPoint, &ReturnValue) -> anyhow::Result<()> + Send + Sync>;

/// 读取失败根因的通知
pub type ThrowingAdvice =
    Arc<dyn Fn(&JoinPoint, &(dyn StdError + 'static)) -> anyhow::Result<()> + Send + Sync>;

/// 环绕通知
pub type AroundAdvice =
    Arc<dyn Fn(&mut ProceedingJoinPoint<'_>) -> anyhow::Result<ReturnValue> + Send + Sync>;

/// 前置通知拦截器
pub struct BeforeAdviceInterceptor {
    name: String,
    advice: JoinPointAdvice,
}

impl BeforeAdviceInterceptor {
    pub fn new(name: impl Into<String>, advice: JoinPointAdvice) -> Self {
        Self {
            name: name.into(),
            advice,
        }
    }
}

impl MethodInterceptor for BeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
        (self.advice)(invocation.join_point())?;
        invocation.proceed()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 后置通知拦截器（finally 语义）
///
/// 目标失败时通知自身的失败只记录日志，调用方拿到的仍是原错误；
/// 目标成功时通知的失败直接返回。
pub struct AfterAdviceInterceptor {
    name: String,
    advice: JoinPointAdvice,
}

impl AfterAdviceInterceptor {
    pub fn new(name: impl Into<String>, advice: JoinPointAdvice) -> Self {
        Self {
            name: name.into(),
            advice,
        }
    }
}

impl MethodInterceptor for AfterAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
        let result = invocation.proceed();
        let advice_result = (self.advice)(invocation.join_point());

        match (result, advice_result) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(advice_err)) => Err(advice_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(advice_err)) => {
                tracing::warn!(
                    "After advice '{}' failed for {} while handling a failure: {:#}; rethrowing the original error",
                    self.name,
                    invocation.join_point(),
                    advice_err
                );
                Err(err)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 返回后通知拦截器
pub struct AfterReturningAdviceInterceptor {
    name: String,
    advice: ReturningAdvice,
}

impl AfterReturningAdviceInterceptor {
    pub fn new(name: impl Into<String>, advice: ReturningAdvice) -> Self {
        Self {
            name: name.into(),
            advice,
        }
    }
}

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
        let value = invocation.proceed()?;
        (self.advice)(invocation.join_point(), &value)?;
        Ok(value)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 异常通知拦截器
///
/// 通知拿到的是错误链最底层的根因，调用方拿到的是原始错误。
pub struct AfterThrowingAdviceInterceptor {
    name: String,
    advice: ThrowingAdvice,
}

impl AfterThrowingAdviceInterceptor {
    pub fn new(name: impl Into<String>, advice: ThrowingAdvice) -> Self {
        Self {
            name: name.into(),
            advice,
        }
    }
}

impl MethodInterceptor for AfterThrowingAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
        let err = match invocation.proceed() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let Err(advice_err) = (self.advice)(invocation.join_point(), err.root_cause()) {
            tracing::warn!(
                "AfterThrowing advice '{}' failed for {}: {:#}; rethrowing the original error",
                self.name,
                invocation.join_point(),
                advice_err
            );
        }
        Err(err)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 环绕通知拦截器
pub struct AroundAdviceInterceptor {
    name: String,
    advice: AroundAdvice,
}

impl AroundAdviceInterceptor {
    pub fn new(name: impl Into<String>, advice: AroundAdvice) -> Self {
        Self {
            name: name.into(),
            advice,
        }
    }
}

impl MethodInterceptor for AroundAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
        (self.advice)(&mut ProceedingJoinPoint::new(invocation))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 记录方法进入、退出、耗时与失败的拦截器
#[derive(Debug, Default)]
pub struct LoggingInterceptor {
    log_args: bool,
}

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同时记录参数个数
    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }
}

impl MethodInterceptor for LoggingInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
        let signature = invocation.join_point().signature();
        let component = invocation.join_point().component().to_string();
        if self.log_args {
            tracing::info!(
                "[{}] Entering {} with {} argument(s)",
                component,
                signature,
                invocation.args().len()
            );
        } else {
            tracing::info!("[{}] Entering {}", component, signature);
        }

        let start = Instant::now();
        let result = invocation.proceed();
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => tracing::info!("[{}] Exiting {} after {:?}", component, signature, elapsed),
            Err(err) => tracing::error!(
                "[{}] {} failed after {:?}: {:#}",
                component,
                signature,
                elapsed,
                err
            ),
        }
        result
    }

    fn name(&self) -> &str {
        "LoggingInterceptor"
    }
}
