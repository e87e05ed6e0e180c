use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use trellis_aop::prelude::*;
use trellis_core::prelude::*;

/// 未指定配置文件时使用的配置
const DEFAULT_CONFIG: &str = include_str!("../config/application.toml");

#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error("item '{item}' is out of stock (requested {requested}, available {available})")]
    OutOfStock {
        item: String,
        requested: u32,
        available: u32,
    },

    #[error("payment of {0} cents was declined")]
    PaymentDeclined(u64),
}

// ==================== 仓储 ====================

struct InventoryRepository {
    seed: u32,
    stock: Mutex<HashMap<String, u32>>,
}

impl InventoryRepository {
    fn new(seed: u32) -> Self {
        Self {
            seed,
            stock: Mutex::new(HashMap::new()),
        }
    }

    // 初始化回调
    fn load(&self) -> anyhow::Result<()> {
        let mut stock = self.stock.lock();
        stock.insert("book".to_string(), self.seed);
        stock.insert("pen".to_string(), self.seed * 4);
        tracing::info!("Inventory loaded: {:?}", *stock);
        Ok(())
    }

    // 销毁回调
    fn flush(&self) -> anyhow::Result<()> {
        tracing::info!("Flushing inventory snapshot: {:?}", *self.stock.lock());
        Ok(())
    }

    fn reserve(&self, item: &str, quantity: u32) -> Result<(), OrderError> {
        let mut stock = self.stock.lock();
        let available = stock.get(item).copied().unwrap_or(0);
        if available < quantity {
            return Err(OrderError::OutOfStock {
                item: item.to_string(),
                requested: quantity,
                available,
            });
        }
        stock.insert(item.to_string(), available - quantity);
        Ok(())
    }
}

// ==================== 支付 ====================

trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;
    fn charge(&self, cents: u64) -> Result<(), OrderError>;
}

/// 真实卡支付，超过限额拒绝
struct CardGateway {
    limit: u64,
}

impl PaymentGateway for CardGateway {
    fn name(&self) -> &str {
        "card"
    }

    fn charge(&self, cents: u64) -> Result<(), OrderError> {
        if cents > self.limit {
            return Err(OrderError::PaymentDeclined(cents));
        }
        Ok(())
    }
}

/// 开发环境使用的沙箱支付
#[derive(Default)]
struct SandboxGateway;

impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn charge(&self, cents: u64) -> Result<(), OrderError> {
        tracing::debug!("Sandbox accepted a charge of {} cents", cents);
        Ok(())
    }
}

// ==================== 订单 ====================

trait OrderApi: Send + Sync {
    fn place_order(&self, item: &str, quantity: u32) -> anyhow::Result<u64>;
    fn order_count(&self) -> anyhow::Result<usize>;
}

struct OrderService {
    inventory: Arc<InventoryRepository>,
    payments: Autowired<dyn PaymentGateway>,
    notifications: Autowired<NotificationService>,
    orders: Mutex<Vec<u64>>,
}

fn unit_price(item: &str) -> Option<u64> {
    match item {
        "book" => Some(1_500),
        "pen" => Some(200),
        _ => None,
    }
}

impl OrderApi for OrderService {
    fn place_order(&self, item: &str, quantity: u32) -> anyhow::Result<u64> {
        let price = unit_price(item).ok_or_else(|| anyhow!("unknown item '{}'", item))?;
        self.inventory
            .reserve(item, quantity)
            .with_context(|| format!("placing order for {} x{}", item, quantity))?;

        let payments = self
            .payments
            .get()
            .ok_or_else(|| anyhow!("payment gateway not injected"))?;
        payments.charge(price * u64::from(quantity))?;

        let id = {
            let mut orders = self.orders.lock();
            let id = orders.len() as u64 + 1;
            orders.push(id);
            id
        };
        tracing::info!("Order #{} charged through '{}'", id, payments.name());

        if let Some(notifications) = self.notifications.get() {
            notifications.notify(id);
        }
        Ok(id)
    }

    fn order_count(&self) -> anyhow::Result<usize> {
        Ok(self.orders.lock().len())
    }
}

impl OrderApi for AopProxy<OrderService> {
    fn place_order(&self, item: &str, quantity: u32) -> anyhow::Result<u64> {
        self.call(
            "place_order",
            Arguments::new().with(item.to_string()).with(quantity),
        )
    }

    fn order_count(&self) -> anyhow::Result<usize> {
        self.call("order_count", Arguments::new())
    }
}

impl Advised for OrderService {
    type Surface = dyn OrderApi;

    fn method_table() -> MethodTable<Self> {
        MethodTable::new()
            .method("place_order", |service: &OrderService, args| {
                let item = args.get::<String>(0)?;
                let quantity = *args.get::<u32>(1)?;
                Ok(returned(service.place_order(item, quantity)?))
            })
            .method("order_count", |service: &OrderService, _args| {
                Ok(returned(service.order_count()?))
            })
    }

    fn proxy_surface(proxy: Arc<AopProxy<Self>>) -> Arc<dyn OrderApi> {
        proxy
    }
}

/// 下单后发送通知；反过来依赖订单服务，与之构成循环依赖
#[derive(Default)]
struct NotificationService {
    orders: Autowired<dyn OrderApi>,
    sent: Mutex<Vec<String>>,
}

impl NotificationService {
    fn notify(&self, order_id: u64) {
        let total = self
            .orders
            .get()
            .and_then(|orders| orders.order_count().ok())
            .unwrap_or_default();
        let message = format!("order #{} confirmed ({} so far)", order_id, total);
        tracing::info!("Notification: {}", message);
        self.sent.lock().push(message);
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

// ==================== 请求作用域 ====================

struct RequestContext {
    serial: u64,
}

// ==================== 切面 ====================

/// 审计切面
#[derive(Default)]
struct AuditAspect {
    events: Mutex<Vec<String>>,
}

impl AuditAspect {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Aspect for AuditAspect {
    fn advice_methods() -> AspectMethods<Self> {
        AspectMethods::new()
            .join_point("logCall", |_audit: &AuditAspect, jp| {
                tracing::info!("[audit] -> {} on '{}'", jp, jp.component());
                Ok(())
            })
            .returning("recordOrder", |audit: &AuditAspect, jp, value| {
                if let Some(id) = value.downcast_ref::<u64>() {
                    audit.events.lock().push(format!("{} -> order #{}", jp, id));
                }
                Ok(())
            })
            .throwing("alert", |audit: &AuditAspect, jp, cause| {
                tracing::warn!("[audit] {} failed: {}", jp, cause);
                audit.events.lock().push(format!("{} failed: {}", jp, cause));
                Ok(())
            })
    }
}

/// 计时切面
#[derive(Default)]
struct TimingAspect;

impl Aspect for TimingAspect {
    fn advice_methods() -> AspectMethods<Self> {
        AspectMethods::new().around("time", |_timing: &TimingAspect, pjp| {
            let start = Instant::now();
            let result = pjp.proceed();
            tracing::info!("[timing] {} took {:?}", pjp.join_point(), start.elapsed());
            result
        })
    }
}

// ==================== 装配 ====================

fn register_components(container: &Container, seed: u32) -> ContainerResult<()> {
    container.register(
        "inventoryRepository",
        ComponentDescriptor::builder(|args| Ok(InventoryRepository::new(args.next_value()?)))
            .constructor_arg(ArgumentSpec::value(seed))
            .method("load", InventoryRepository::load)
            .method("flush", InventoryRepository::flush)
            .init_method("load")
            .destroy_method("flush")
            .stereotype(Stereotype::Repository)
            .build(),
    )?;

    container.register(
        "cardGateway",
        ComponentDescriptor::builder(|_| Ok(CardGateway { limit: 5_000 }))
            .exposes::<dyn PaymentGateway, _>(|g| g as Arc<dyn PaymentGateway>)
            .condition(|ctx| ctx.property_enabled("payments.card.enabled", true))
            .build(),
    )?;

    container.register(
        "sandboxGateway",
        ComponentDescriptor::with_default::<SandboxGateway>()
            .exposes::<dyn PaymentGateway, _>(|g| g as Arc<dyn PaymentGateway>)
            .qualifier("sandbox")
            .profile("dev")
            .primary()
            .build(),
    )?;

    container.register(
        "orderService",
        ComponentDescriptor::builder(|args| {
            Ok(OrderService {
                inventory: args.next()?,
                payments: Autowired::new(),
                notifications: Autowired::new(),
                orders: Mutex::new(Vec::new()),
            })
        })
        .constructor_arg(ArgumentSpec::by_type::<InventoryRepository>())
        .autowire("payments", |s: &OrderService, gateway: Arc<dyn PaymentGateway>| {
            s.payments.inject(gateway)
        })
        .inject_ref(
            "notifications",
            "notificationService",
            |s: &OrderService, n: Arc<NotificationService>| s.notifications.inject(n),
        )
        .exposes::<dyn OrderApi, _>(|s| s as Arc<dyn OrderApi>)
        .stereotype(Stereotype::Service)
        .build(),
    )?;

    container.register(
        "notificationService",
        ComponentDescriptor::with_default::<NotificationService>()
            .autowire("orders", |s: &NotificationService, orders: Arc<dyn OrderApi>| {
                s.orders.inject(orders)
            })
            .stereotype(Stereotype::Service)
            .build(),
    )?;

    let serials = Arc::new(AtomicU64::new(0));
    container.register(
        "requestContext",
        ComponentDescriptor::builder(move |_| {
            Ok(RequestContext {
                serial: serials.fetch_add(1, Ordering::SeqCst) + 1,
            })
        })
        .scope(Scope::Request)
        .build(),
    )?;

    container.register(
        "auditAspect",
        ComponentDescriptor::with_default::<AuditAspect>()
            .stereotype(Stereotype::Aspect)
            .build(),
    )?;
    container.register(
        "timingAspect",
        ComponentDescriptor::with_default::<TimingAspect>()
            .stereotype(Stereotype::Aspect)
            .build(),
    )?;
    Ok(())
}

fn configure_aspects(aspects: &AspectRegistry) {
    aspects.register_aspect::<AuditAspect>();
    aspects.register_aspect::<TimingAspect>();
    aspects.advise::<OrderService>();

    let placing = PointcutExpression::execution("* OrderService.place_*(..)");
    aspects.register_bindings([
        AdviceBinding::around("timingAspect", "time", PointcutExpression::target_type("OrderService")).order(1),
        AdviceBinding::before("auditAspect", "logCall", placing.clone()).order(2),
        AdviceBinding::after_returning("auditAspect", "recordOrder", placing.clone()).order(2),
        AdviceBinding::after_throwing("auditAspect", "alert", placing).order(2),
    ]);
}

fn load_config() -> anyhow::Result<ContainerConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => ContainerConfig::from_file(&path)?,
        None => ContainerConfig::from_toml_str(DEFAULT_CONFIG)?,
    };
    Ok(config.with_env_overrides())
}

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    config.logging.clone().with_env_overrides().init()?;

    let seed = config
        .properties
        .get("inventory.seed")
        .and_then(|value| value.parse().ok())
        .unwrap_or(3);

    let container = Arc::new(Container::with_config(config));
    let aspects = Arc::new(AspectRegistry::new());
    configure_aspects(&aspects);
    AopPostProcessor::install(&container, Arc::clone(&aspects));

    register_components(&container, seed)?;
    container.add_listener(Arc::new(TypedEventListener::new(
        "startupReport",
        |event: &ContainerStartedEvent| {
            tracing::info!(
                "Container started: {} component(s), {} singleton(s) in {:?}",
                event.components,
                event.singletons,
                event.elapsed
            );
            Ok(())
        },
    )));
    container.add_listener(Arc::new(TypedEventListener::new(
        "shutdownReport",
        |_: &ContainerClosedEvent| {
            tracing::info!("Container closing");
            Ok(())
        },
    )));
    container.validate_dependencies()?;
    container.refresh()?;

    tracing::info!(
        "Services: {:?}",
        container.names_with_marker(&Stereotype::Service)
    );

    let orders = container.resolve_by_type::<dyn OrderApi>()?;
    for (item, quantity) in [("book", 2), ("pen", 3), ("book", 10), ("lamp", 1)] {
        match orders.place_order(item, quantity) {
            Ok(id) => tracing::info!("Placed order #{} for {} x{}", id, item, quantity),
            Err(err) => tracing::warn!("Order for {} x{} rejected: {:#}", item, quantity, err),
        }
    }
    tracing::info!("Orders placed: {}", orders.order_count()?);

    let notifications = container.resolve_as::<NotificationService>("notificationService")?;
    tracing::info!("Notifications sent: {:?}", notifications.sent());

    let audit = container.resolve_as::<AuditAspect>("auditAspect")?;
    for event in audit.events() {
        tracing::info!("Audit event: {}", event);
    }

    // 请求作用域：同一请求内共享，不同请求各自一个
    let scope = Arc::new(ManualScopeContext::new());
    container.set_scope_context(Arc::clone(&scope) as Arc<dyn ScopeContextProvider>);
    for request in ["req-1", "req-2"] {
        scope.bind_request(request);
        let first = container.resolve_as::<RequestContext>("requestContext")?;
        let second = container.resolve_as::<RequestContext>("requestContext")?;
        tracing::info!(
            "Request '{}' uses context #{} (shared: {})",
            request,
            first.serial,
            Arc::ptr_eq(&first, &second)
        );
        container.evict_request(request);
    }
    scope.clear_request();

    container.shutdown();
    Ok(())
}
