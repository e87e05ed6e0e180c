//! 切点（Pointcut）表达式系统
//!
//! 定义了通知绑定选中哪些组件方法。匹配在代理构建时按方法静态进行。

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::joinpoint::JoinPoint;

/// 切点表达式
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有方法
    All,

    /// 匹配特定组件名称的所有方法
    /// 例如：ComponentPattern("order*")
    ComponentPattern(String),

    /// 匹配特定类型的所有方法
    /// 例如：TypePattern("OrderService")
    TypePattern(String),

    /// 匹配特定方法名
    /// 例如：MethodPattern("place_*")
    MethodPattern(String),

    /// 匹配特定类型的特定方法
    /// 例如：execution(* OrderService.place_order(..))
    Execution {
        type_pattern: String,
        method_pattern: String,
    },

    /// 使用正则表达式匹配类型
    TypeRegex(Regex),

    /// 使用正则表达式匹配方法
    MethodRegex(Regex),

    /// 自定义匹配函数
    Custom(Arc<dyn Fn(&JoinPoint) -> bool + Send + Sync>),

    And(Box<PointcutExpression>, Box<PointcutExpression>),

    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    Not(Box<PointcutExpression>),
}

impl PointcutExpression {
    /// 检查连接点是否匹配
    pub fn matches(&self, join_point: &JoinPoint) -> bool {
        match self {
            PointcutExpression::All => true,

            PointcutExpression::ComponentPattern(pattern) => {
                pattern_matches(pattern, join_point.component())
            }

            PointcutExpression::TypePattern(pattern) => {
                pattern_matches(pattern, join_point.target_type())
            }

            PointcutExpression::MethodPattern(pattern) => {
                pattern_matches(pattern, join_point.method_name())
            }

            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                pattern_matches(type_pattern, join_point.target_type())
                    && pattern_matches(method_pattern, join_point.method_name())
            }

            PointcutExpression::TypeRegex(regex) => regex.is_match(join_point.target_type()),

            PointcutExpression::MethodRegex(regex) => regex.is_match(join_point.method_name()),

            PointcutExpression::Custom(func) => func(join_point),

            PointcutExpression::And(left, right) => {
                left.matches(join_point) && right.matches(join_point)
            }

            PointcutExpression::Or(left, right) => {
                left.matches(join_point) || right.matches(join_point)
            }

            PointcutExpression::Not(expr) => !expr.matches(join_point),
        }
    }

    pub fn component(pattern: impl Into<String>) -> Self {
        PointcutExpression::ComponentPattern(pattern.into())
    }

    pub fn target_type(pattern: impl Into<String>) -> Self {
        PointcutExpression::TypePattern(pattern.into())
    }

    pub fn method(pattern: impl Into<String>) -> Self {
        PointcutExpression::MethodPattern(pattern.into())
    }

    /// 正则匹配类型名
    pub fn type_regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(PointcutExpression::TypeRegex)
    }

    /// 正则匹配方法名
    pub fn method_regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(PointcutExpression::MethodRegex)
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&JoinPoint) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Custom(Arc::new(predicate))
    }

    /// 创建 execution 表达式
    ///
    /// 格式：`返回类型 类型名.方法名(参数)`，例如 `"* OrderService.place_order(..)"`。
    /// 只使用类型名与方法名部分；缺少类型部分时只按方法名匹配。
    /// 省略返回类型时把唯一的片段当作方法部分，空表达式不匹配任何方法。
    pub fn execution(expression: &str) -> Self {
        let parts: Vec<&str> = expression.split_whitespace().collect();

        let method_part = match parts.as_slice() {
            [] => return PointcutExpression::MethodPattern(String::new()),
            [only] => *only,
            [_, method_part, ..] => *method_part,
        };
        let method_part = method_part
            .split_once('(')
            .map_or(method_part, |(head, _)| head);

        match method_part.rsplit_once('.') {
            Some((type_pattern, method_pattern)) => PointcutExpression::Execution {
                type_pattern: type_pattern.to_string(),
                method_pattern: method_pattern.to_string(),
            },
            None => PointcutExpression::MethodPattern(method_part.to_string()),
        }
    }

    /// 与运算
    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    /// 或运算
    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    /// 非运算
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }
}

/// 简单的模式匹配（支持 * 通配符）
///
/// 支持的模式：
/// - `*` - 匹配任意字符串
/// - `Order*` - 以 Order 开头
/// - `*Service` - 以 Service 结尾
/// - `*Service*` - 包含 Service
fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if !pattern.contains('*') {
        return pattern == target;
    }

    let regex_pattern = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&format!("^{}$", regex_pattern))
        .map(|regex| regex.is_match(target))
        .unwrap_or(false)
}

impl fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::ComponentPattern(p) => write!(f, "ComponentPattern({})", p),
            PointcutExpression::TypePattern(p) => write!(f, "TypePattern({})", p),
            PointcutExpression::MethodPattern(p) => write!(f, "MethodPattern({})", p),
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                write!(f, "Execution({}.{})", type_pattern, method_pattern)
            }
            PointcutExpression::TypeRegex(r) => write!(f, "TypeRegex({})", r.as_str()),
            PointcutExpression::MethodRegex(r) => write!(f, "MethodRegex({})", r.as_str()),
            PointcutExpression::Custom(_) => write!(f, "Custom(...)"),
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}
