//! 描述符存储 - 按名称保存组件描述符
//!
//! 记录注册顺序：按类型解析时候选集按注册顺序排列，`refresh` 也按注册顺序预实例化单例。

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::{ComponentDescriptor, Stereotype};
use crate::{ContainerError, ContainerResult};

#[derive(Default)]
struct Entries {
    order: Vec<String>,
    descriptors: HashMap<String, Arc<ComponentDescriptor>>,
}

/// 描述符存储
#[derive(Default)]
pub struct DescriptorRegistry {
    entries: RwLock<Entries>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册描述符；名称已存在时失败
    pub fn register(&self, name: &str, descriptor: ComponentDescriptor) -> ContainerResult<()> {
        let mut entries = self.entries.write();
        if entries.descriptors.contains_key(name) {
            return Err(ContainerError::AlreadyRegistered(name.to_string()));
        }
        entries.order.push(name.to_string());
        entries
            .descriptors
            .insert(name.to_string(), Arc::new(descriptor));
        Ok(())
    }

    /// 显式覆盖；保留原来的注册位置，返回被替换的描述符
    pub fn replace(
        &self,
        name: &str,
        descriptor: ComponentDescriptor,
    ) -> Option<Arc<ComponentDescriptor>> {
        let mut entries = self.entries.write();
        let previous = entries
            .descriptors
            .insert(name.to_string(), Arc::new(descriptor));
        if previous.is_none() {
            entries.order.push(name.to_string());
        }
        previous
    }

    /// 移除描述符
    pub fn remove(&self, name: &str) -> Option<Arc<ComponentDescriptor>> {
        let mut entries = self.entries.write();
        let removed = entries.descriptors.remove(name);
        if removed.is_some() {
            entries.order.retain(|n| n != name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<ComponentDescriptor>> {
        self.entries.read().descriptors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().descriptors.contains_key(name)
    }

    /// 修改 primary 标记（描述符唯一可变的属性）
    pub fn set_primary(&self, name: &str, primary: bool) -> ContainerResult<()> {
        let mut entries = self.entries.write();
        let slot = entries
            .descriptors
            .get_mut(name)
            .ok_or_else(|| ContainerError::NoSuchComponent(name.to_string()))?;
        let mut updated = ComponentDescriptor::clone(slot);
        updated.set_primary(primary);
        *slot = Arc::new(updated);
        Ok(())
    }

    /// 按注册顺序列出所有名称
    pub fn names(&self) -> Vec<String> {
        self.entries.read().order.clone()
    }

    /// 按注册顺序列出所有描述符
    pub fn snapshot(&self) -> Vec<(String, Arc<ComponentDescriptor>)> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|name| {
                entries
                    .descriptors
                    .get(name)
                    .map(|descriptor| (name.clone(), Arc::clone(descriptor)))
            })
            .collect()
    }

    /// 可以赋值给指定类型的候选，按注册顺序
    pub fn candidates(&self, type_id: TypeId) -> Vec<(String, Arc<ComponentDescriptor>)> {
        self.snapshot()
            .into_iter()
            .filter(|(_, descriptor)| descriptor.is_assignable_to(type_id))
            .collect()
    }

    pub fn names_for_type(&self, type_id: TypeId) -> Vec<String> {
        self.candidates(type_id)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// 带有指定标记的组件名称
    pub fn names_with_marker(&self, stereotype: &Stereotype) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(_, descriptor)| descriptor.has_stereotype(stereotype))
            .map(|(name, _)| name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
