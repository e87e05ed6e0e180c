//! Utility functions for the container
//!
//! Naming helpers for default component names, creation tracking for cycle detection,
//! and static analysis of the constructor-reference graph.

/// Naming convention utilities for component names
pub mod naming {
    /// Converts a PascalCase type name to camelCase for component naming.
    ///
    /// `OrderService` becomes `orderService`.
    ///
    /// # Examples
    ///
    /// ```
    /// use trellis_core::utils::naming::to_camel_case;
    ///
    /// assert_eq!(to_camel_case("OrderService"), "orderService");
    /// assert_eq!(to_camel_case("A"), "a");
    /// assert_eq!(to_camel_case(""), "");
    /// ```
    pub fn to_camel_case(s: &str) -> String {
        let mut chars = s.chars();
        match chars.next() {
            None => String::new(),
            Some(first) => {
                let mut result = String::with_capacity(s.len());
                result.extend(first.to_lowercase());
                result.push_str(chars.as_str());
                result
            }
        }
    }

    /// Default component name for a Rust type: the last path segment, camelCased,
    /// with generic parameters removed.
    ///
    /// ```
    /// use trellis_core::utils::naming::default_component_name;
    ///
    /// struct InventoryRepository;
    /// assert_eq!(default_component_name::<InventoryRepository>(), "inventoryRepository");
    /// ```
    pub fn default_component_name<T: ?Sized + 'static>() -> String {
        let full = std::any::type_name::<T>();
        let without_generics = full.split('<').next().unwrap_or(full);
        let short = without_generics
            .rsplit("::")
            .next()
            .unwrap_or(without_generics);
        to_camel_case(short)
    }
}

/// Dependency resolution utilities
pub mod dependency {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::thread::{self, ThreadId};

    use parking_lot::Mutex;

    /// Tracks components currently being created, per thread.
    ///
    /// Every thread has its own creation stack, so a name showing up twice on the
    /// same stack is a cycle, while another thread creating the same name is not.
    #[derive(Debug, Default)]
    pub struct CreationTracker {
        creating: Mutex<HashMap<ThreadId, Vec<String>>>,
    }

    impl CreationTracker {
        /// Creates a new empty creation tracker.
        pub fn new() -> Self {
            Self::default()
        }

        /// Checks if a component is currently being created on this thread.
        pub fn is_creating(&self, name: &str) -> bool {
            self.creating
                .lock()
                .get(&thread::current().id())
                .map_or(false, |stack| stack.iter().any(|n| n == name))
        }

        /// Marks a component as being created on this thread.
        ///
        /// Returns `false` if it was already on this thread's creation stack.
        pub fn start_creating(&self, name: &str) -> bool {
            let mut creating = self.creating.lock();
            let stack = creating.entry(thread::current().id()).or_default();
            if stack.iter().any(|n| n == name) {
                return false;
            }
            stack.push(name.to_string());
            true
        }

        /// Marks a component as finished being created on this thread.
        pub fn finish_creating(&self, name: &str) {
            let mut creating = self.creating.lock();
            let id = thread::current().id();
            if let Some(stack) = creating.get_mut(&id) {
                if let Some(pos) = stack.iter().rposition(|n| n == name) {
                    stack.remove(pos);
                }
                if stack.is_empty() {
                    creating.remove(&id);
                }
            }
        }

        /// The creation path of this thread, outermost first.
        pub fn current_chain(&self) -> Vec<String> {
            self.creating
                .lock()
                .get(&thread::current().id())
                .cloned()
                .unwrap_or_default()
        }

        /// Builds the cycle reported when `name` is requested again: the path from the
        /// first occurrence of `name` to the top of the stack, closed with `name`.
        pub fn cycle_through(&self, name: &str) -> Vec<String> {
            let chain = self.current_chain();
            let start = chain.iter().position(|n| n == name).unwrap_or(0);
            let mut cycle = chain[start..].to_vec();
            cycle.push(name.to_string());
            cycle
        }

        /// Starts tracking `name` and returns a guard that stops tracking when dropped.
        ///
        /// Returns `None` if the name is already being created on this thread.
        pub fn enter(self: &Arc<Self>, name: &str) -> Option<CreationGuard> {
            self.start_creating(name).then(|| CreationGuard {
                tracker: Arc::clone(self),
                name: name.to_string(),
            })
        }
    }

    /// RAII guard removing a name from the creation stack, also on failure paths.
    pub struct CreationGuard {
        tracker: Arc<CreationTracker>,
        name: String,
    }

    impl Drop for CreationGuard {
        fn drop(&mut self) {
            self.tracker.finish_creating(&self.name);
        }
    }

    /// Dependency graph analysis result
    #[derive(Debug, PartialEq, Eq)]
    pub enum DependencyValidationError {
        /// Circular dependency detected
        CircularDependency {
            /// The dependency chain forming the cycle
            cycle: Vec<String>,
        },
        /// Missing dependency detected
        MissingDependency {
            /// The component that requires the dependency
            component: String,
            /// The missing dependency
            missing: String,
        },
    }

    impl std::fmt::Display for DependencyValidationError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::CircularDependency { cycle } => {
                    write!(f, "Circular dependency detected: {}", cycle.join(" -> "))
                }
                Self::MissingDependency { component, missing } => {
                    write!(
                        f,
                        "Component '{}' depends on '{}' which is not registered",
                        component, missing
                    )
                }
            }
        }
    }

    /// Validates a dependency graph for cycles and missing components.
    ///
    /// `dependencies` lists, in registration order, each component name with the names
    /// it depends on. The first issue found is returned.
    pub fn validate_dependency_graph(
        dependencies: &[(String, Vec<String>)],
    ) -> Result<(), DependencyValidationError> {
        let graph: HashMap<&str, &[String]> = dependencies
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.as_slice()))
            .collect();

        for (name, deps) in dependencies {
            if let Some(missing) = deps.iter().find(|dep| !graph.contains_key(dep.as_str())) {
                return Err(DependencyValidationError::MissingDependency {
                    component: name.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let mut visited = HashSet::new();
        let mut rec_stack = Vec::new();

        for (name, _) in dependencies {
            if !visited.contains(name.as_str()) {
                if let Some(cycle) = detect_cycle_dfs(name, &graph, &mut visited, &mut rec_stack) {
                    return Err(DependencyValidationError::CircularDependency { cycle });
                }
            }
        }

        Ok(())
    }

    /// DFS-based cycle detection
    fn detect_cycle_dfs<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        rec_stack.push(node);

        if let Some(&deps) = graph.get(node) {
            for dep in deps {
                if let Some(start) = rec_stack.iter().position(|n| *n == dep.as_str()) {
                    let mut cycle: Vec<String> =
                        rec_stack[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep.as_str()) {
                    if let Some(cycle) = detect_cycle_dfs(dep, graph, visited, rec_stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        rec_stack.pop();
        None
    }
}
