use std::io;
use std::sync::Arc;
use std::thread;

use audit::AuditLog;
use missive::prelude::*;
use rstest::rstest;
use shop::orders::{CancelOrder, OrderStore, PlaceOrder, RefundOrder};
use shop::queries::OrderQueries;
use shop::{OrderHandlers, OrderPlaced, Ping};

mod audit {
    use std::sync::Mutex;

    /// Lines written by event handlers, in call order.
    #[derive(Debug, Default)]
    pub struct AuditLog(Mutex<Vec<String>>);

    impl AuditLog {
        pub fn push(&self, line: String) {
            self.0.lock().unwrap().push(line);
        }

        pub fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }
}

mod shop {
    use std::io;
    use std::sync::Arc;

    use missive::handlers;
    use serde::Serialize;

    use super::AuditLog;

    pub mod orders {
        use std::sync::Mutex;

        use serde::Serialize;

        #[derive(Debug, Serialize)]
        pub struct PlaceOrder {
            pub sku: String,
            pub quantity: u32,
            pub id: Option<u64>,
        }

        impl PlaceOrder {
            pub fn new(sku: &str, quantity: u32) -> Self {
                Self {
                    sku: sku.to_string(),
                    quantity,
                    id: None,
                }
            }
        }

        #[derive(Debug, Serialize)]
        pub struct CancelOrder {
            pub id: u64,
        }

        #[derive(Debug, Serialize)]
        pub struct RefundOrder {
            pub id: u64,
            pub amount: u32,
        }

        #[derive(Debug, Default)]
        pub struct OrderStore {
            orders: Mutex<Vec<(String, u32)>>,
        }

        impl OrderStore {
            pub fn insert(&self, sku: &str, quantity: u32) -> u64 {
                let mut orders = self.orders.lock().unwrap();
                orders.push((sku.to_string(), quantity));
                orders.len() as u64
            }

            pub fn get(&self, id: u64) -> Option<(String, u32)> {
                let index = usize::try_from(id).ok()?.checked_sub(1)?;
                self.orders.lock().unwrap().get(index).cloned()
            }

            pub fn len(&self) -> usize {
                self.orders.lock().unwrap().len()
            }
        }
    }

    pub mod queries {
        use std::sync::Arc;

        use missive::handlers;

        use super::orders::OrderStore;

        pub struct OrderQueries {
            pub store: Arc<OrderStore>,
        }

        #[handlers(query)]
        impl OrderQueries {
            pub fn quantity(&self, id: u64) -> Option<u32> {
                self.store.get(id).map(|(_, quantity)| quantity)
            }

            pub fn total(&self, id: u64, unit_price: i64) -> i64 {
                self.quantity(id).map_or(0, |quantity| i64::from(quantity) * unit_price)
            }

            pub fn count(&self) -> usize {
                self.store.len()
            }

            #[allow(dead_code)]
            fn hidden(&self) -> usize {
                0
            }
        }
    }

    use orders::{CancelOrder, OrderStore, PlaceOrder, RefundOrder};

    #[derive(Debug, Clone, Serialize)]
    pub struct OrderPlaced {
        pub id: u64,
    }

    #[derive(Debug, Serialize)]
    pub struct Ping {
        pub count: u32,
    }

    #[handlers(command, self_handling)]
    impl Ping {
        fn handle(&mut self) {
            self.count += 1;
        }
    }

    #[derive(Default)]
    pub struct OrderHandlers;

    #[handlers(command)]
    impl OrderHandlers {
        fn handle_place(&self, cmd: &mut PlaceOrder, store: Arc<OrderStore>) {
            cmd.id = Some(store.insert(&cmd.sku, cmd.quantity));
        }

        fn handle_refund(&self, cmd: &mut RefundOrder) -> Result<(), io::Error> {
            if cmd.amount > 100 {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("refund of {} on order {} needs approval", cmd.amount, cmd.id),
                ));
            }
            Ok(())
        }

        fn on_cancel(&self, _cmd: &mut CancelOrder) {}
    }

    #[derive(Default)]
    pub struct Mailer;

    #[handlers(event)]
    impl Mailer {
        fn handle_placed(&self, event: &mut OrderPlaced, log: Arc<AuditLog>) {
            log.push(format!("mail #{}", event.id));
        }
    }

    pub mod billing {
        use std::sync::Arc;

        use missive::handlers;

        use super::OrderPlaced;
        use crate::AuditLog;

        #[derive(Default)]
        pub struct Invoicer;

        #[handlers(event, crate = missive::framework)]
        impl Invoicer {
            fn handle_placed(&self, event: &mut OrderPlaced, log: Arc<AuditLog>) {
                log.push(format!("invoice #{}", event.id));
            }
        }
    }
}

struct Fixture {
    store: Arc<OrderStore>,
    log: Arc<AuditLog>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(OrderStore::default()),
            log: Arc::new(AuditLog::default()),
        }
    }

    fn services(&self) -> ServiceMap {
        let store = Arc::clone(&self.store);
        ServiceMap::new()
            .with_default::<OrderHandlers>()
            .with_default::<shop::Mailer>()
            .with_default::<shop::billing::Invoicer>()
            .singleton(Arc::clone(&self.store))
            .singleton(Arc::clone(&self.log))
            .factory(move || OrderQueries {
                store: Arc::clone(&store),
            })
    }

    fn mediator(&self) -> Mediator {
        Mediator::builder()
            .resolver(self.services())
            .discover(Discovery::scoped(["dispatch::shop"]))
            .build()
            .unwrap()
    }
}

#[test]
fn commands_reach_discovered_handlers() {
    let fixture = Fixture::new();
    let mediator = fixture.mediator();

    let first = mediator.handle_command(PlaceOrder::new("A-1", 3)).unwrap();
    let second = mediator.handle_command(PlaceOrder::new("B-7", 1)).unwrap();

    assert_eq!(first.id, Some(1));
    assert_eq!(second.id, Some(2));
    assert_eq!(fixture.store.get(1), Some(("A-1".to_string(), 3)));
}

#[test]
fn self_handling_commands_mutate_themselves() {
    let mediator = Fixture::new().mediator();
    let ping = mediator.handle_command(Ping { count: 41 }).unwrap();
    assert_eq!(ping.count, 42);
}

#[test]
fn events_run_every_handler_in_module_order() {
    let fixture = Fixture::new();
    let mediator = fixture.mediator();

    mediator.raise_event(OrderPlaced { id: 9 }).unwrap();

    // Discovered containers are ordered by module path.
    assert_eq!(fixture.log.lines(), ["mail #9", "invoice #9"]);
}

#[test]
fn queries_evaluate_call_expressions() {
    let fixture = Fixture::new();
    let mediator = fixture.mediator();
    let order = mediator.handle_command(PlaceOrder::new("A-1", 4)).unwrap();
    let id = order.id.unwrap();

    let total: i64 = mediator
        .query_as(CallExpr::on::<OrderQueries>("total").arg(id).arg(250))
        .unwrap();
    assert_eq!(total, 1000);

    let quantity = mediator
        .query(CallExpr::on::<OrderQueries>("quantity").arg(99u64))
        .unwrap();
    assert!(quantity.is_null());

    let count: usize = mediator
        .query_as(CallExpr::on::<OrderQueries>("count"))
        .unwrap();
    assert_eq!(count, 1);

    // One site per query method plus the PlaceOrder handler's.
    let stats = mediator.engine().stats();
    assert_eq!(stats.query_sites, 3);
    assert_eq!(stats.compilations, 4);
}

#[test]
fn private_query_methods_are_not_registered() {
    let mediator = Fixture::new().mediator();
    let err = mediator
        .query(CallExpr::on::<OrderQueries>("hidden"))
        .unwrap_err();
    assert!(err.is_configuration(), "{err}");
}

#[rstest]
#[case::within_limit(50, true)]
#[case::over_limit(500, false)]
fn handler_errors_keep_their_type(#[case] amount: u32, #[case] succeeds: bool) {
    let mediator = Fixture::new().mediator();
    let result = mediator.handle_command(RefundOrder { id: 1, amount });

    match result {
        Ok(refund) => {
            assert!(succeeds);
            assert_eq!(refund.amount, amount);
        }
        Err(err) => {
            assert!(!succeeds);
            let error = err.execution_error().unwrap();
            let io_error = error.downcast_ref::<io::Error>().unwrap();
            assert_eq!(io_error.kind(), io::ErrorKind::PermissionDenied);
            assert!(error.message().contains("needs approval"));
        }
    }
}

#[test]
fn method_prefix_decides_which_methods_handle() {
    let fixture = Fixture::new();

    let default = fixture.mediator();
    let err = default.handle_command(CancelOrder { id: 1 }).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Configuration(ConfigurationError::HandlerNotFound { .. })
    ));

    let prefixed = Mediator::builder()
        .resolver(fixture.services())
        .discover(Discovery::scoped(["dispatch::shop"]))
        .method_prefix("on")
        .build()
        .unwrap();
    prefixed.handle_command(CancelOrder { id: 1 }).unwrap();
    assert!(prefixed.handle_command(PlaceOrder::new("A-1", 1)).is_err());
}

#[test]
fn discovery_scopes_limit_containers() {
    let fixture = Fixture::new();
    let mediator = Mediator::builder()
        .resolver(fixture.services())
        .discover(Discovery::scoped(["dispatch::shop::billing"]))
        .build()
        .unwrap();

    mediator.raise_event(OrderPlaced { id: 3 }).unwrap();
    assert_eq!(fixture.log.lines(), ["invoice #3"]);

    let err = mediator.handle_command(PlaceOrder::new("A-1", 1)).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn runtime_records_history_from_config() {
    let fixture = Fixture::new();
    let mut config = MissiveConfig::default();
    config.dispatch.modules = vec!["dispatch::shop".to_string()];
    config.history.enabled = true;
    config.engine.precompile = true;

    let runtime = MissiveRuntime::builder()
        .config(config)
        .without_logging()
        .resolver(fixture.services())
        .build()
        .unwrap();
    let mediator = runtime.mediator();

    mediator.handle_command(PlaceOrder::new("A-1", 2)).unwrap();
    mediator.handle_command(RefundOrder { id: 1, amount: 900 }).unwrap_err();
    mediator.handle_command(CancelOrder { id: 1 }).unwrap_err();
    mediator.raise_event(OrderPlaced { id: 1 }).unwrap();

    // Every query method was precompiled before any query ran. The command
    // and event sites come from PlaceOrder, RefundOrder and both OrderPlaced
    // handlers; CancelOrder was rejected before reaching a handler.
    let stats = mediator.engine().stats();
    assert_eq!(stats.query_sites, 3);
    assert_eq!(stats.compilations, 7);
    assert_eq!(stats.reflective_calls, 0);

    let history = runtime.history().unwrap();
    assert_eq!(history.len(), 4);

    let failed = history
        .query(&RepositoryMessagesFilter::create().with_status(MessageStatus::Failed))
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].content_type_name.ends_with("RefundOrder"));
    assert_eq!(
        failed[0].error.as_ref().and_then(|error| error.kind()),
        Some("std::io::error::Error")
    );

    let events = history
        .query(&RepositoryMessagesFilter::create().with_kind(MessageKind::Event))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].content.as_ref().unwrap()["id"], 1);
}

#[test]
fn concurrent_dispatch_shares_one_mediator() {
    let fixture = Fixture::new();
    let mediator = fixture.mediator();

    thread::scope(|scope| {
        for worker in 0..8 {
            let mediator = &mediator;
            scope.spawn(move || {
                for n in 0..25 {
                    let order = mediator
                        .handle_command(PlaceOrder::new(&format!("W{worker}-{n}"), 1))
                        .unwrap();
                    let quantity: Option<u32> = mediator
                        .query_as(CallExpr::on::<OrderQueries>("quantity").arg(order.id.unwrap()))
                        .unwrap();
                    assert_eq!(quantity, Some(1));
                }
            });
        }
    });

    assert_eq!(fixture.store.len(), 200);
    let stats = mediator.engine().stats();
    assert_eq!(stats.query_sites, 1);
    assert_eq!(stats.compilations, 2);
    assert_eq!(stats.hits + stats.misses, 400);
}
