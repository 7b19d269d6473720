use super::*;
use crate::config::NestedBeginPolicy;
use crate::datasource::{MemoryDataSource, Query, RowSet, TxOptions, Value, WriteSummary};
use crate::statement::{parse_statement, TransactionControl};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Barrier;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("mock failure: {0}")]
struct MockError(&'static str);

/// Everything the mock store saw, in order
#[derive(Debug, Clone, PartialEq)]
enum Event {
    SourceQuery(Query),
    SourceExec(Query),
    Begin(usize, TxOptions),
    TxQuery(usize, Query),
    TxExec(usize, Query),
    Commit(usize),
    Rollback(usize),
    /// A handle was dropped without commit or rollback
    Abandoned(usize),
}

#[derive(Default)]
struct MockSource {
    events: Arc<Mutex<Vec<Event>>>,
    next_tx: AtomicUsize,
    fail_begin: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
}

impl MockSource {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl DataSource for MockSource {
    fn query(&self, query: Query) -> anyhow::Result<RowSet> {
        self.record(Event::SourceQuery(query));
        Ok(RowSet::from_rows(vec!["source".to_string()], vec![]))
    }

    fn exec(&self, query: Query) -> anyhow::Result<WriteSummary> {
        self.record(Event::SourceExec(query));
        Ok(WriteSummary {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    fn begin_tx(&self, options: TxOptions) -> anyhow::Result<Box<dyn Tx>> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(MockError("begin").into());
        }
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(Event::Begin(id, options));
        Ok(Box::new(MockTx {
            id,
            events: Arc::clone(&self.events),
            fail_commit: self.fail_commit.load(Ordering::SeqCst),
            fail_rollback: self.fail_rollback.load(Ordering::SeqCst),
            finished: false,
        }))
    }
}

struct MockTx {
    id: usize,
    events: Arc<Mutex<Vec<Event>>>,
    fail_commit: bool,
    fail_rollback: bool,
    finished: bool,
}

impl MockTx {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Tx for MockTx {
    fn query(&mut self, query: Query) -> anyhow::Result<RowSet> {
        self.record(Event::TxQuery(self.id, query));
        Ok(RowSet::from_rows(vec!["tx".to_string()], vec![]))
    }

    fn exec(&mut self, query: Query) -> anyhow::Result<WriteSummary> {
        self.record(Event::TxExec(self.id, query));
        Ok(WriteSummary {
            rows_affected: 2,
            last_insert_id: Some(9),
        })
    }

    fn commit(mut self: Box<Self>) -> anyhow::Result<()> {
        self.finished = true;
        self.record(Event::Commit(self.id));
        if self.fail_commit {
            return Err(MockError("commit").into());
        }
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> anyhow::Result<()> {
        self.finished = true;
        self.record(Event::Rollback(self.id));
        if self.fail_rollback {
            return Err(MockError("rollback").into());
        }
        Ok(())
    }
}

impl Drop for MockTx {
    fn drop(&mut self) {
        if !self.finished {
            self.record(Event::Abandoned(self.id));
        }
    }
}

fn setup(config: DispatchConfig) -> (Arc<MockSource>, Dispatcher) {
    let source = Arc::new(MockSource::default());
    let dispatcher = Dispatcher::with_config(source.clone(), config);
    (source, dispatcher)
}

fn ctx(sql: &str) -> RequestContext {
    RequestContext::new(1, parse_statement(sql).unwrap(), sql)
}

fn start() -> RequestContext {
    ctx("START TRANSACTION")
}

fn commit() -> RequestContext {
    ctx("COMMIT")
}

fn rollback() -> RequestContext {
    ctx("ROLLBACK")
}

fn mock_error(err: &DispatchError) -> Option<&MockError> {
    match err {
        DispatchError::Upstream(e) => e.downcast_ref::<MockError>(),
        _ => None,
    }
}

#[test]
fn test_select_without_transaction_goes_to_source() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    let request = ctx("SELECT * FROM users WHERE id = ?").with_args(vec![Value::Integer(5)]);

    let outcome = dispatcher.dispatch(&request).unwrap();
    let rows = outcome.into_rows().unwrap();
    assert_eq!(rows.columns(), ["source".to_string()]);

    assert_eq!(
        source.events(),
        vec![Event::SourceQuery(Query::new(
            "SELECT * FROM users WHERE id = ?",
            vec![Value::Integer(5)]
        ))]
    );
}

#[test]
fn test_writes_without_transaction_go_to_source() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    for sql in [
        "INSERT INTO users VALUES (1)",
        "UPDATE users SET a = 1",
        "DELETE FROM users WHERE a = 1",
    ] {
        let summary = dispatcher.dispatch(&ctx(sql)).unwrap().into_write().unwrap();
        assert_eq!(summary.rows_affected, 1);
    }
    assert!(source
        .events()
        .iter()
        .all(|e| matches!(e, Event::SourceExec(_))));
    assert_eq!(source.events().len(), 3);
}

#[test]
fn test_writes_in_transaction_go_to_handle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();

    for sql in [
        "INSERT INTO users VALUES (?)",
        "UPDATE users SET a = ?",
        "DELETE FROM users WHERE a = ?",
    ] {
        let request = ctx(sql).with_args(vec![Value::Text("x".to_string())]);
        let summary = dispatcher.dispatch(&request).unwrap().into_write().unwrap();
        assert_eq!(summary.last_insert_id, Some(9));
    }

    let events = source.events();
    assert_eq!(events[0], Event::Begin(1, TxOptions::default()));
    assert_eq!(
        events[1],
        Event::TxExec(
            1,
            Query::new("INSERT INTO users VALUES (?)", vec![Value::Text("x".to_string())])
        )
    );
    assert!(events[1..].iter().all(|e| matches!(e, Event::TxExec(1, _))));
    assert!(!events.iter().any(|e| matches!(e, Event::SourceExec(_))));
}

#[test]
fn test_start_from_idle_becomes_active() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    assert!(!dispatcher.in_transaction().unwrap());

    let outcome = dispatcher.dispatch(&start()).unwrap();
    assert!(outcome.is_empty());
    assert!(dispatcher.in_transaction().unwrap());
    assert_eq!(source.events(), vec![Event::Begin(1, TxOptions::default())]);
}

#[test]
fn test_start_forwards_transaction_modes() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher
        .dispatch(&ctx("START TRANSACTION READ ONLY"))
        .unwrap();

    let expected = TxOptions {
        isolation: None,
        read_only: true,
    };
    assert_eq!(source.events(), vec![Event::Begin(1, expected)]);
}

#[test]
fn test_failed_begin_stays_idle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    source.fail_begin.store(true, Ordering::SeqCst);

    let err = dispatcher.dispatch(&start()).unwrap_err();
    assert_eq!(mock_error(&err), Some(&MockError("begin")));
    assert!(!dispatcher.in_transaction().unwrap());
}

#[test]
fn test_commit_returns_to_idle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();
    assert!(dispatcher.dispatch(&commit()).unwrap().is_empty());
    assert!(!dispatcher.in_transaction().unwrap());
    assert_eq!(source.events().last(), Some(&Event::Commit(1)));
}

#[test]
fn test_failed_commit_still_returns_to_idle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    source.fail_commit.store(true, Ordering::SeqCst);
    dispatcher.dispatch(&start()).unwrap();

    let err = dispatcher.dispatch(&commit()).unwrap_err();
    assert!(err.is_upstream());
    assert_eq!(mock_error(&err), Some(&MockError("commit")));
    assert_eq!(err.to_string(), "mock failure: commit");
    assert!(!dispatcher.in_transaction().unwrap());

    // The next statement does not reuse the dead handle
    dispatcher.dispatch(&ctx("SELECT * FROM t")).unwrap();
    assert!(matches!(source.events().last(), Some(Event::SourceQuery(_))));
}

#[test]
fn test_rollback_returns_to_idle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();
    dispatcher.dispatch(&rollback()).unwrap();
    assert!(!dispatcher.in_transaction().unwrap());
    assert_eq!(source.events().last(), Some(&Event::Rollback(1)));
}

#[test]
fn test_failed_rollback_still_returns_to_idle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    source.fail_rollback.store(true, Ordering::SeqCst);
    dispatcher.dispatch(&start()).unwrap();

    let err = dispatcher.dispatch(&rollback()).unwrap_err();
    assert_eq!(mock_error(&err), Some(&MockError("rollback")));
    assert!(!dispatcher.in_transaction().unwrap());
}

#[test]
fn test_select_after_commit_goes_to_source() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();
    dispatcher.dispatch(&ctx("SELECT * FROM t")).unwrap();
    dispatcher.dispatch(&commit()).unwrap();
    let rows = dispatcher
        .dispatch(&ctx("SELECT * FROM t"))
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.columns(), ["source".to_string()]);

    let select = Query::new("SELECT * FROM t", vec![]);
    assert_eq!(
        source.events(),
        vec![
            Event::Begin(1, TxOptions::default()),
            Event::TxQuery(1, select.clone()),
            Event::Commit(1),
            Event::SourceQuery(select),
        ]
    );
}

#[test]
fn test_nested_start_replaces_and_abandons_first_handle() {
    let config = DispatchConfig {
        nested_begin: NestedBeginPolicy::Replace,
        ..DispatchConfig::default()
    };
    let (source, dispatcher) = setup(config);
    dispatcher.dispatch(&start()).unwrap();
    dispatcher.dispatch(&start()).unwrap();
    dispatcher.dispatch(&ctx("DELETE FROM t")).unwrap();

    let events = source.events();
    assert_eq!(
        events,
        vec![
            Event::Begin(1, TxOptions::default()),
            Event::Begin(2, TxOptions::default()),
            Event::Abandoned(1),
            Event::TxExec(2, Query::new("DELETE FROM t", vec![])),
        ]
    );
    assert!(!events.contains(&Event::Commit(1)));
    assert!(!events.contains(&Event::Rollback(1)));
}

#[test]
fn test_nested_start_replace_keeps_old_handle_when_begin_fails() {
    let config = DispatchConfig {
        nested_begin: NestedBeginPolicy::Replace,
        ..DispatchConfig::default()
    };
    let (source, dispatcher) = setup(config);
    dispatcher.dispatch(&start()).unwrap();
    source.fail_begin.store(true, Ordering::SeqCst);

    assert!(dispatcher.dispatch(&start()).is_err());
    dispatcher.dispatch(&commit()).unwrap();
    assert_eq!(source.events().last(), Some(&Event::Commit(1)));
}

#[test]
fn test_nested_start_rejected_by_default() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();

    let err = dispatcher.dispatch(&start()).unwrap_err();
    assert!(matches!(err, DispatchError::TransactionConflict));
    assert!(dispatcher.in_transaction().unwrap());
    assert_eq!(source.events(), vec![Event::Begin(1, TxOptions::default())]);

    dispatcher.dispatch(&commit()).unwrap();
    assert_eq!(source.events().last(), Some(&Event::Commit(1)));
}

#[test]
fn test_commit_or_rollback_while_idle() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    assert!(matches!(
        dispatcher.dispatch(&commit()),
        Err(DispatchError::NoActiveTransaction)
    ));
    assert!(matches!(
        dispatcher.dispatch(&rollback()),
        Err(DispatchError::NoActiveTransaction)
    ));
    assert!(source.events().is_empty());
}

#[test]
fn test_unsupported_statement_policies() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    let err = dispatcher
        .dispatch(&ctx("CREATE TABLE t (a INTEGER)"))
        .unwrap_err();
    match err {
        DispatchError::UnsupportedStatement { kind } => assert_eq!(kind, "CREATE TABLE"),
        other => panic!("unexpected error: {:?}", other),
    }

    let config = DispatchConfig {
        unsupported: UnsupportedPolicy::Ignore,
        ..DispatchConfig::default()
    };
    let (_, permissive) = setup(config);
    assert!(permissive
        .dispatch(&ctx("CREATE TABLE t (a INTEGER)"))
        .unwrap()
        .is_empty());
    assert!(source.events().is_empty());
}

#[test]
fn test_expired_deadline_skips_dml_but_not_commit() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();

    let past = Instant::now() - Duration::from_millis(5);
    let select = ctx("SELECT * FROM t").with_deadline(past);
    assert!(matches!(
        dispatcher.dispatch(&select),
        Err(DispatchError::DeadlineExceeded)
    ));
    assert!(matches!(
        dispatcher.dispatch(&start().with_deadline(past)),
        Err(DispatchError::DeadlineExceeded)
    ));

    dispatcher.dispatch(&commit().with_deadline(past)).unwrap();
    assert_eq!(
        source.events(),
        vec![Event::Begin(1, TxOptions::default()), Event::Commit(1)]
    );
}

#[test]
fn test_deadline_is_forwarded_to_the_store() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    let deadline = Instant::now() + Duration::from_secs(30);
    dispatcher
        .dispatch(&ctx("SELECT * FROM t").with_deadline(deadline))
        .unwrap();
    match &source.events()[0] {
        Event::SourceQuery(query) => assert_eq!(query.deadline, Some(deadline)),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_close_rolls_back_open_transaction() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();
    dispatcher.close().unwrap();
    assert_eq!(source.events().last(), Some(&Event::Rollback(1)));
}

#[test]
fn test_drop_rolls_back_open_transaction() {
    let (source, dispatcher) = setup(DispatchConfig::default());
    dispatcher.dispatch(&start()).unwrap();
    drop(dispatcher);
    assert_eq!(source.events().last(), Some(&Event::Rollback(1)));
}

/// Blocks inside `query` until released, so a second call can overlap it
struct BlockingSource {
    barrier: Arc<Barrier>,
}

impl DataSource for BlockingSource {
    fn query(&self, _query: Query) -> anyhow::Result<RowSet> {
        self.barrier.wait();
        self.barrier.wait();
        Ok(RowSet::empty())
    }

    fn exec(&self, _query: Query) -> anyhow::Result<WriteSummary> {
        Ok(WriteSummary::default())
    }

    fn begin_tx(&self, _options: TxOptions) -> anyhow::Result<Box<dyn Tx>> {
        Err(anyhow::anyhow!("not supported"))
    }
}

#[test]
fn test_concurrent_dispatch_fails_fast() {
    let barrier = Arc::new(Barrier::new(2));
    let source = Arc::new(BlockingSource {
        barrier: Arc::clone(&barrier),
    });
    let dispatcher = Arc::new(Dispatcher::new(source));

    let in_flight = {
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::spawn(move || dispatcher.dispatch(&ctx("SELECT * FROM t")).map(|_| ()))
    };

    // First call is now inside the store
    barrier.wait();
    assert!(matches!(
        dispatcher.dispatch(&ctx("SELECT * FROM t")),
        Err(DispatchError::ConcurrentDispatch)
    ));
    assert!(matches!(
        dispatcher.in_transaction(),
        Err(DispatchError::ConcurrentDispatch)
    ));
    barrier.wait();

    in_flight.join().unwrap().unwrap();
    assert!(!dispatcher.in_transaction().unwrap());
}

#[test]
fn test_end_to_end_with_memory_store() {
    let store = MemoryDataSource::new();
    let dispatcher = Dispatcher::new(Arc::new(store.clone()));
    let run = |sql: &str, args: Vec<Value>| dispatcher.dispatch(&ctx(sql).with_args(args));

    store
        .exec(Query::new(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
            vec![],
        ))
        .unwrap();

    run("BEGIN", vec![]).unwrap();
    let summary = run(
        "INSERT INTO users VALUES (?, ?)",
        vec![Value::Integer(1), Value::Text("Alice".to_string())],
    )
    .unwrap()
    .into_write()
    .unwrap();
    assert_eq!(summary.last_insert_id, Some(1));

    let inside = run("SELECT * FROM users", vec![])
        .unwrap()
        .into_rows()
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(inside.len(), 1);
    assert_eq!(store.row_count("users").unwrap(), Some(0));

    run("ROLLBACK", vec![]).unwrap();
    assert_eq!(store.row_count("users").unwrap(), Some(0));

    run("START TRANSACTION", vec![]).unwrap();
    run(
        "INSERT INTO users VALUES (?, ?)",
        vec![Value::Integer(2), Value::Text("Bob".to_string())],
    )
    .unwrap();
    run("COMMIT", vec![]).unwrap();
    assert_eq!(store.row_count("users").unwrap(), Some(1));

    let err = run("SELECT * FROM missing", vec![]).unwrap_err();
    assert!(err.is_upstream());
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_statement_kinds_route_exhaustively() {
    // Transaction control never reaches the query/exec operations
    let (source, dispatcher) = setup(DispatchConfig::default());
    for control in [TransactionControl::Start(TxOptions::default()), TransactionControl::Commit] {
        let request = RequestContext::new(
            3,
            ParsedStatement::TransactionControl(control),
            "-- transaction control",
        );
        dispatcher.dispatch(&request).unwrap();
    }
    assert_eq!(
        source.events(),
        vec![Event::Begin(1, TxOptions::default()), Event::Commit(1)]
    );
}
