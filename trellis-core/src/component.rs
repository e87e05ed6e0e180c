//! 描述符提供者
//!
//! 容器本身不扫描源码元数据。描述符来自实现了 [`DescriptorProvider`] 的提供者，
//! 内置的 [`InventoryProvider`] 收集通过 `inventory` 在链接期提交的注册项。

use std::any::Any;

use crate::descriptor::ComponentDescriptor;
use crate::utils::naming::default_component_name;
use crate::ContainerResult;

/// 描述符来源
pub trait DescriptorProvider {
    /// 提供 (组件名称, 描述符) 列表
    fn descriptors(&self) -> ContainerResult<Vec<(String, ComponentDescriptor)>>;

    fn name(&self) -> &str {
        "DescriptorProvider"
    }
}

/// 可以自描述的组件类型
///
/// # 示例
///
/// ```
/// use trellis_core::prelude::*;
///
/// #[derive(Default)]
/// struct AuditLog;
///
/// impl Component for AuditLog {
///     fn descriptor() -> ComponentDescriptor {
///         ComponentDescriptor::with_default::<AuditLog>()
///             .stereotype(Stereotype::Service)
///             .build()
///     }
/// }
///
/// assert_eq!(AuditLog::component_name(), "auditLog");
/// ```
///
/// 配合 [`submit_component!`](crate::submit_component) 即可在 `scan_components` 时自动注册。
pub trait Component: Any + Send + Sync + Sized {
    /// 组件名称，默认为类型名的 camelCase 形式
    fn component_name() -> String {
        default_component_name::<Self>()
    }

    fn descriptor() -> ComponentDescriptor;
}

/// 链接期注册项 - 用于 inventory 收集
pub struct ComponentRegistration {
    pub name: fn() -> String,
    pub create: fn() -> ComponentDescriptor,
}

impl ComponentRegistration {
    pub const fn of<T: Component>() -> Self {
        Self {
            name: T::component_name,
            create: T::descriptor,
        }
    }
}

inventory::collect!(ComponentRegistration);

/// 提交一个组件类型，`Container::scan_components` 时注册
#[macro_export]
macro_rules! submit_component {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::component::ComponentRegistration::of::<$ty>()
        }
    };
}

/// 读取全部 inventory 注册项的提供者
pub struct InventoryProvider;

impl DescriptorProvider for InventoryProvider {
    fn descriptors(&self) -> ContainerResult<Vec<(String, ComponentDescriptor)>> {
        let mut descriptors: Vec<(String, ComponentDescriptor)> =
            inventory::iter::<ComponentRegistration>
                .into_iter()
                .map(|registration| ((registration.name)(), (registration.create)()))
                .collect();
        // 链接顺序不确定，按名称排序保证注册顺序稳定
        descriptors.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::debug!("Found {} component(s) in inventory", descriptors.len());
        Ok(descriptors)
    }

    fn name(&self) -> &str {
        "InventoryProvider"
    }
}
