use super::*;

use async_trait::async_trait;
use cadence_core::model::{Connection, SourceType};
use uuid::Uuid;

/// Records start order and blocks each query until the test releases it.
struct GateExecutor {
    started: Mutex<Vec<String>>,
    gate: Semaphore,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl GateExecutor {
    fn new() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl QueryExecutor for GateExecutor {
    async fn execute(&self, request: &QueryRequest, _cancel: &CancellationToken) -> QueryResult {
        self.started.lock().unwrap().push(request.sql.clone());
        let now = self.running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.peak.fetch_max(now, AtomicOrdering::SeqCst);

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.running.fetch_sub(1, AtomicOrdering::SeqCst);

        if request.sql.starts_with("fail") {
            return QueryResult::failed("syntax error at or near \"fail\"", 1);
        }
        QueryResult::from_rows(vec!["n".into()], Vec::new(), 0)
    }
}

fn connection() -> Connection {
    Connection {
        id: Uuid::new_v4(),
        kind: SourceType::Postgres,
        host: "localhost".into(),
        port: 5432,
        database: "app".into(),
        username: "app".into(),
        password: String::new(),
        options: serde_json::json!({}),
    }
}

fn request(sql: &str) -> QueryRequest {
    QueryRequest::new(connection(), sql)
}

fn queue(exec: &Arc<GateExecutor>, max_concurrent: usize) -> AdmissionQueue {
    let config = QueueConfig {
        max_concurrent,
        tick_ms: 50,
    };
    AdmissionQueue::new(exec.clone(), &config)
}

async fn wait_for_started(exec: &GateExecutor, n: usize) {
    for _ in 0..1_000 {
        if exec.started().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {n} started jobs, got {:?}", exec.started());
}

#[tokio::test(start_paused = true)]
async fn critical_overtakes_waiting_normals_and_low_runs_last() {
    let exec = Arc::new(GateExecutor::new());
    let q = queue(&exec, 2);
    let shutdown = CancellationToken::new();
    q.start(shutdown.clone());
    let token = CancellationToken::new();

    let mut tickets = Vec::new();
    tickets.push(q.submit(request("normal-0"), Priority::Normal, &token).unwrap());
    tickets.push(q.submit(request("normal-1"), Priority::Normal, &token).unwrap());
    wait_for_started(&exec, 2).await;

    for i in 2..10 {
        let sql = format!("normal-{i}");
        tickets.push(q.submit(request(&sql), Priority::Normal, &token).unwrap());
    }
    tickets.push(q.submit(request("low"), Priority::Low, &token).unwrap());
    tickets.push(q.submit(request("critical"), Priority::Critical, &token).unwrap());

    exec.release(1);
    wait_for_started(&exec, 3).await;
    assert_eq!(exec.started()[2], "critical");

    exec.release(100);
    for t in tickets {
        assert!(t.wait().await.unwrap().error.is_none());
    }

    let started = exec.started();
    assert_eq!(started.len(), 12);
    assert_eq!(started[0..2], ["normal-0", "normal-1"]);
    let middle: Vec<String> = (2..10).map(|i| format!("normal-{i}")).collect();
    assert_eq!(started[3..11], middle[..]);
    assert_eq!(started[11], "low");
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn never_exceeds_max_concurrent() {
    let exec = Arc::new(GateExecutor::new());
    let q = queue(&exec, 3);
    q.start(CancellationToken::new());
    let token = CancellationToken::new();

    let tickets: Vec<Ticket> = (0..20)
        .map(|i| {
            q.submit(request(&format!("q{i}")), Priority::Normal, &token)
                .unwrap()
        })
        .collect();

    wait_for_started(&exec, 3).await;
    assert_eq!(q.stats().in_flight, 3);
    assert_eq!(q.stats().pending, 17);

    exec.release(20);
    for t in tickets {
        t.wait().await.unwrap();
    }
    assert_eq!(exec.peak.load(AtomicOrdering::SeqCst), 3);
    assert_eq!(q.stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_dispatch_is_dropped() {
    let exec = Arc::new(GateExecutor::new());
    let q = queue(&exec, 1);
    let token = CancellationToken::new();
    let ticket = q.submit(request("never"), Priority::Normal, &token).unwrap();
    token.cancel();

    q.start(CancellationToken::new());
    assert!(ticket.wait().await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(exec.started().is_empty());
    assert_eq!(q.stats().pending, 0);
}

#[tokio::test]
async fn submit_with_cancelled_token_fails_fast() {
    let exec = Arc::new(GateExecutor::new());
    let q = queue(&exec, 1);
    let token = CancellationToken::new();
    token.cancel();
    let err = q.enqueue(request("x"), Priority::High, &token).await.unwrap_err();
    assert!(matches!(err, QueueError::Cancelled));
    assert_eq!(err.to_string(), "cancelled or timed out");
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_execution_releases_slot() {
    let exec = Arc::new(GateExecutor::new());
    let q = queue(&exec, 1);
    q.start(CancellationToken::new());

    let hung = CancellationToken::new();
    let first = q.submit(request("hangs"), Priority::Normal, &hung).unwrap();
    wait_for_started(&exec, 1).await;

    let other = CancellationToken::new();
    let second = q.submit(request("next"), Priority::Normal, &other).unwrap();

    hung.cancel();
    assert!(first.wait().await.unwrap_err().is_cancelled());

    wait_for_started(&exec, 2).await;
    exec.release(1);
    assert!(second.wait().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn execution_errors_ride_the_result() {
    let exec = Arc::new(GateExecutor::new());
    exec.release(1);
    let q = queue(&exec, 1);
    q.start(CancellationToken::new());

    let res = q
        .enqueue(request("fail here"), Priority::Normal, &CancellationToken::new())
        .await
        .unwrap();
    assert!(res.error.as_deref().unwrap().contains("syntax error"));
    assert!(res.into_result().is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_pending_jobs() {
    let exec = Arc::new(GateExecutor::new());
    let q = queue(&exec, 1);
    let shutdown = CancellationToken::new();
    let handle = q.start(shutdown.clone());
    let token = CancellationToken::new();

    let running = q.submit(request("a"), Priority::Normal, &token).unwrap();
    wait_for_started(&exec, 1).await;
    let waiting = q.submit(request("b"), Priority::Normal, &token).unwrap();

    shutdown.cancel();
    handle.await.unwrap();
    assert!(matches!(waiting.wait().await, Err(QueueError::Closed)));

    exec.release(1);
    assert!(running.wait().await.is_ok());
}
