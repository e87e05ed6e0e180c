//! 容器事件
//!
//! 容器在 `refresh()` 完成后发布 [`ContainerStartedEvent`]，在 `shutdown()` 销毁组件之前
//! 发布 [`ContainerClosedEvent`]。组件和用户代码也可以通过 [`ApplicationEventPublisher`]
//! 发布自定义事件。监听器按 `order()` 升序同步执行，相同 order 保持注册顺序。

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::{ContainerError, ContainerResult};

/// 监听器的默认顺序
pub const DEFAULT_LISTENER_ORDER: i32 = 1000;

/// 事件
pub trait Event: Any + Send + Sync {
    fn event_name(&self) -> &str;

    fn timestamp(&self) -> SystemTime;

    /// 用于向具体事件类型转换
    fn as_any(&self) -> &dyn Any;
}

/// 所有非延迟单例预实例化完成
#[derive(Debug, Clone)]
pub struct ContainerStartedEvent {
    /// 已注册的组件描述符数量
    pub components: usize,
    /// 预实例化的单例数量
    pub singletons: usize,
    /// refresh 耗时
    pub elapsed: Duration,
    pub timestamp: SystemTime,
}

impl ContainerStartedEvent {
    pub fn new(components: usize, singletons: usize, elapsed: Duration) -> Self {
        Self {
            components,
            singletons,
            elapsed,
            timestamp: SystemTime::now(),
        }
    }
}

impl Event for ContainerStartedEvent {
    fn event_name(&self) -> &str {
        "ContainerStartedEvent"
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 容器开始关闭，此时单例尚未销毁
#[derive(Debug, Clone)]
pub struct ContainerClosedEvent {
    pub timestamp: SystemTime,
}

impl ContainerClosedEvent {
    pub fn new() -> Self {
        Self {
            timestamp: SystemTime::now(),
        }
    }
}

impl Default for ContainerClosedEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Event for ContainerClosedEvent {
    fn event_name(&self) -> &str {
        "ContainerClosedEvent"
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 事件监听器
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()>;

    /// 用于日志和 `remove_listener`
    fn listener_name(&self) -> &str {
        "AnonymousListener"
    }

    /// 返回 false 时该事件不会交给此监听器
    fn supports_event(&self, event: &dyn Event) -> bool {
        let _ = event;
        true
    }

    /// 值越小越先执行
    fn order(&self) -> i32 {
        DEFAULT_LISTENER_ORDER
    }
}

/// 只接收某一种具体事件类型的闭包监听器
pub struct TypedEventListener<E, F> {
    name: String,
    order: i32,
    handler: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> TypedEventListener<E, F>
where
    E: Event,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            order: DEFAULT_LISTENER_ORDER,
            handler,
            _event: PhantomData,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl<E, F> EventListener for TypedEventListener<E, F>
where
    E: Event,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()> {
        match event.as_any().downcast_ref::<E>() {
            Some(typed) => (self.handler)(typed),
            None => Ok(()),
        }
    }

    fn listener_name(&self) -> &str {
        &self.name
    }

    fn supports_event(&self, event: &dyn Event) -> bool {
        event.as_any().is::<E>()
    }

    fn order(&self) -> i32 {
        self.order
    }
}

/// 把组件上的方法适配为监听器
///
/// 组件在注册监听器时解析，事件到达时以组件实例调用方法
pub struct ListenerMethodAdapter<T: ?Sized, E> {
    name: String,
    target: Arc<T>,
    method: Box<dyn Fn(&T, &E) -> anyhow::Result<()> + Send + Sync>,
    _event: PhantomData<fn(&E)>,
}

impl<T, E> ListenerMethodAdapter<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: Event,
{
    pub fn new<F>(name: impl Into<String>, target: Arc<T>, method: F) -> Self
    where
        F: Fn(&T, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target,
            method: Box::new(method),
            _event: PhantomData,
        }
    }
}

impl<T, E> EventListener for ListenerMethodAdapter<T, E>
where
    T: ?Sized + Send + Sync + 'static,
    E: Event,
{
    fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()> {
        match event.as_any().downcast_ref::<E>() {
            Some(typed) => (self.method)(&*self.target, typed),
            None => Ok(()),
        }
    }

    fn listener_name(&self) -> &str {
        &self.name
    }

    fn supports_event(&self, event: &dyn Event) -> bool {
        event.as_any().is::<E>()
    }
}

/// 监听器失败时的处理器，设置后失败不再中断分发
pub type ErrorHandler = Arc<dyn Fn(&dyn EventListener, &dyn Event, &anyhow::Error) + Send + Sync>;

/// 事件多播器
pub trait ApplicationEventMulticaster: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn EventListener>);

    /// 按名称移除，返回是否有监听器被移除
    fn remove_listener(&self, listener_name: &str) -> bool;

    fn remove_all_listeners(&self);

    /// 同步分发事件
    ///
    /// 没有错误处理器时，第一个失败的监听器会中断分发并返回
    /// [`ContainerError::ListenerFailure`]
    fn multicast_event(&self, event: Arc<dyn Event>) -> ContainerResult<()>;

    fn listener_count(&self) -> usize;
}

/// 同步多播器
pub struct SimpleEventMulticaster {
    /// 始终按 order 稳定排序
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    error_handler: RwLock<Option<ErrorHandler>>,
}

impl SimpleEventMulticaster {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            error_handler: RwLock::new(None),
        }
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&dyn EventListener, &dyn Event, &anyhow::Error) + Send + Sync + 'static,
    {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    pub fn remove_error_handler(&self) {
        *self.error_handler.write() = None;
    }
}

impl Default for SimpleEventMulticaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationEventMulticaster for SimpleEventMulticaster {
    fn add_listener(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!(
            "Adding event listener '{}' (order={})",
            listener.listener_name(),
            listener.order()
        );
        let mut listeners = self.listeners.write();
        listeners.push(listener);
        listeners.sort_by_key(|l| l.order());
    }

    fn remove_listener(&self, listener_name: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.listener_name() != listener_name);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!("Removed event listener '{}'", listener_name);
        }
        removed
    }

    fn remove_all_listeners(&self) {
        self.listeners.write().clear();
    }

    fn multicast_event(&self, event: Arc<dyn Event>) -> ContainerResult<()> {
        // 快照后释放锁，监听器内部可以再注册监听器或发布事件
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.supports_event(event.as_ref()))
            .cloned()
            .collect();
        let error_handler = self.error_handler.read().clone();

        tracing::debug!(
            "Multicasting event '{}' to {} listener(s)",
            event.event_name(),
            listeners.len()
        );

        for listener in listeners {
            if let Err(err) = listener.on_event(Arc::clone(&event)) {
                match &error_handler {
                    Some(handler) => {
                        tracing::warn!(
                            "Listener '{}' failed to handle event '{}': {:#}",
                            listener.listener_name(),
                            event.event_name(),
                            err
                        );
                        handler(listener.as_ref(), event.as_ref(), &err);
                    }
                    None => {
                        return Err(ContainerError::ListenerFailure {
                            listener: listener.listener_name().to_string(),
                            event: event.event_name().to_string(),
                            source: err,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

/// 发布事件的入口，通过 [`crate::Container::event_publisher`] 获取
#[derive(Clone)]
pub struct ApplicationEventPublisher {
    multicaster: Arc<dyn ApplicationEventMulticaster>,
}

impl ApplicationEventPublisher {
    pub(crate) fn new(multicaster: Arc<dyn ApplicationEventMulticaster>) -> Self {
        Self { multicaster }
    }

    pub fn publish_event<E: Event>(&self, event: E) -> ContainerResult<()> {
        self.multicaster.multicast_event(Arc::new(event))
    }

    pub fn multicaster(&self) -> &Arc<dyn ApplicationEventMulticaster> {
        &self.multicaster
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.multicaster.add_listener(listener);
    }

    pub fn remove_listener(&self, listener_name: &str) -> bool {
        self.multicaster.remove_listener(listener_name)
    }

    pub fn listener_count(&self) -> usize {
        self.multicaster.listener_count()
    }
}

impl std::fmt::Debug for ApplicationEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationEventPublisher")
            .field("listeners", &self.multicaster.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use parking_lot::Mutex;

    struct OrderPlaced {
        id: u32,
        timestamp: SystemTime,
    }

    impl OrderPlaced {
        fn new(id: u32) -> Self {
            Self {
                id,
                timestamp: SystemTime::now(),
            }
        }
    }

    impl Event for OrderPlaced {
        fn event_name(&self) -> &str {
            "OrderPlaced"
        }

        fn timestamp(&self) -> SystemTime {
            self.timestamp
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: String,
        order: i32,
        fail: bool,
        log: Log,
    }

    impl Recording {
        fn new(name: &str, order: i32, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                order,
                fail: false,
                log: Arc::clone(log),
            })
        }

        fn failing(name: &str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                order: DEFAULT_LISTENER_ORDER,
                fail: true,
                log: Arc::clone(log),
            })
        }
    }

    impl EventListener for Recording {
        fn on_event(&self, event: Arc<dyn Event>) -> anyhow::Result<()> {
            self.log
                .lock()
                .push(format!("{}:{}", self.name, event.event_name()));
            if self.fail {
                bail!("{} is broken", self.name);
            }
            Ok(())
        }

        fn listener_name(&self) -> &str {
            &self.name
        }

        fn order(&self) -> i32 {
            self.order
        }
    }

    #[test]
    fn test_listeners_run_by_order_then_registration() {
        let log: Log = Arc::default();
        let multicaster = SimpleEventMulticaster::new();
        multicaster.add_listener(Recording::new("late", 2000, &log));
        multicaster.add_listener(Recording::new("first", DEFAULT_LISTENER_ORDER, &log));
        multicaster.add_listener(Recording::new("early", -5, &log));
        multicaster.add_listener(Recording::new("second", DEFAULT_LISTENER_ORDER, &log));

        multicaster
            .multicast_event(Arc::new(ContainerClosedEvent::new()))
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "early:ContainerClosedEvent",
                "first:ContainerClosedEvent",
                "second:ContainerClosedEvent",
                "late:ContainerClosedEvent",
            ]
        );
    }

    #[test]
    fn test_typed_listener_only_sees_its_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let multicaster = SimpleEventMulticaster::new();
        multicaster.add_listener(Arc::new(TypedEventListener::new(
            "orders",
            move |event: &OrderPlaced| {
                sink.lock().push(event.id);
                Ok(())
            },
        )));

        multicaster
            .multicast_event(Arc::new(ContainerClosedEvent::new()))
            .unwrap();
        multicaster.multicast_event(Arc::new(OrderPlaced::new(7))).unwrap();

        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_failure_without_handler_stops_dispatch() {
        let log: Log = Arc::default();
        let multicaster = SimpleEventMulticaster::new();
        multicaster.add_listener(Recording::new("audit", 0, &log));
        multicaster.add_listener(Recording::failing("mailer", &log));
        multicaster.add_listener(Recording::new("metrics", 2000, &log));

        let err = multicaster
            .multicast_event(Arc::new(OrderPlaced::new(1)))
            .unwrap_err();

        match &err {
            ContainerError::ListenerFailure { listener, event, .. } => {
                assert_eq!(listener, "mailer");
                assert_eq!(event, "OrderPlaced");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock(), vec!["audit:OrderPlaced", "mailer:OrderPlaced"]);
    }

    #[test]
    fn test_error_handler_lets_dispatch_continue() {
        let log: Log = Arc::default();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let multicaster = SimpleEventMulticaster::new();
        multicaster.set_error_handler(move |listener, event, err| {
            sink.lock().push(format!(
                "{}/{}/{}",
                listener.listener_name(),
                event.event_name(),
                err
            ));
        });
        multicaster.add_listener(Recording::failing("mailer", &log));
        multicaster.add_listener(Recording::new("metrics", 2000, &log));

        multicaster.multicast_event(Arc::new(OrderPlaced::new(1))).unwrap();

        assert_eq!(*log.lock(), vec!["mailer:OrderPlaced", "metrics:OrderPlaced"]);
        assert_eq!(*failures.lock(), vec!["mailer/OrderPlaced/mailer is broken"]);

        multicaster.remove_error_handler();
        assert!(multicaster
            .multicast_event(Arc::new(OrderPlaced::new(2)))
            .is_err());
    }

    #[test]
    fn test_remove_listener_by_name() {
        let log: Log = Arc::default();
        let multicaster = SimpleEventMulticaster::new();
        multicaster.add_listener(Recording::new("audit", 0, &log));
        multicaster.add_listener(Recording::new("metrics", 0, &log));

        assert!(multicaster.remove_listener("audit"));
        assert!(!multicaster.remove_listener("audit"));
        assert_eq!(multicaster.listener_count(), 1);

        multicaster.multicast_event(Arc::new(OrderPlaced::new(1))).unwrap();
        assert_eq!(*log.lock(), vec!["metrics:OrderPlaced"]);

        multicaster.remove_all_listeners();
        assert_eq!(multicaster.listener_count(), 0);
    }

    struct Ledger {
        entries: Mutex<Vec<u32>>,
    }

    impl Ledger {
        fn record(&self, event: &OrderPlaced) -> anyhow::Result<()> {
            self.entries.lock().push(event.id);
            Ok(())
        }
    }

    #[test]
    fn test_method_adapter_calls_component_method() {
        let ledger = Arc::new(Ledger {
            entries: Mutex::new(Vec::new()),
        });
        let multicaster: Arc<dyn ApplicationEventMulticaster> =
            Arc::new(SimpleEventMulticaster::new());
        let publisher = ApplicationEventPublisher::new(Arc::clone(&multicaster));
        publisher.add_listener(Arc::new(ListenerMethodAdapter::new(
            "ledger.record",
            Arc::clone(&ledger),
            Ledger::record,
        )));

        publisher.publish_event(OrderPlaced::new(3)).unwrap();
        publisher.publish_event(ContainerClosedEvent::new()).unwrap();
        publisher.publish_event(OrderPlaced::new(4)).unwrap();

        assert_eq!(*ledger.entries.lock(), vec![3, 4]);
        assert_eq!(publisher.listener_count(), 1);
    }
}
