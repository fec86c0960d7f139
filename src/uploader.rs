//! Upload scheduler: the periodic task that drains the record buffer and
//! delivers batches to the collector.
//!
//! One scheduler instance handles one measurement stream. Each cycle drains
//! the buffer (retry records first), sends records sequentially through a
//! [`RecordSink`], and requeues failures for the next cycle. Shutdown
//! interrupts the periodic wait and performs exactly one final, uncapped
//! drain-and-send.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::RecordBuffer;
use crate::client::{SendOutcome, UploadClient};
use crate::config::Config;
use crate::record::EventRecord;

/// How long `stop` waits for an in-flight cycle before the final flush.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Where cycle batches are delivered, one record at a time.
///
/// Implemented by [`UploadClient`] for the real collector; tests substitute
/// a scripted sink. The sink owns all retry/backoff behavior for a single
/// record and reports only the classified outcome.
pub trait RecordSink {
    fn send(&self, record: &EventRecord) -> impl Future<Output = SendOutcome> + Send;
}

impl RecordSink for UploadClient {
    fn send(&self, record: &EventRecord) -> impl Future<Output = SendOutcome> + Send {
        self.send_record(record)
    }
}

/// Running delivery totals.
///
/// `sent` and `failed` only ever grow; current buffer depth is read from the
/// buffer itself. Written by the scheduler task, read anywhere; display
/// reads may race benignly with writes.
#[derive(Debug, Default)]
pub struct UploaderStats {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl UploaderStats {
    /// Total records delivered successfully.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Total failed delivery outcomes (transient exhaustion or auth).
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn add_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn add_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// What one upload cycle did.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    /// Records drained into this cycle's batch
    pub drained: usize,

    /// Records the collector accepted
    pub delivered: usize,

    /// Records handed back to the retry queue
    pub requeued: usize,

    /// Whether the collector rejected our credentials this cycle
    pub auth_expired: bool,
}

/// Run one upload cycle: drain, send sequentially, requeue failures.
///
/// An empty drain returns without touching the network. On the first
/// authentication rejection the rest of the batch is requeued unattempted
/// (the token is equally dead for every record) and the token-expired
/// signal is raised for the composition root.
pub(crate) async fn run_cycle<S: RecordSink>(
    buffer: &RecordBuffer,
    sink: &S,
    limit: Option<usize>,
    stats: &UploaderStats,
    token_expired: &watch::Sender<bool>,
) -> CycleSummary {
    let batch = buffer.drain(limit);
    if batch.is_empty() {
        debug!("Nothing buffered; skipping upload cycle");
        return CycleSummary::default();
    }

    let cycle = Uuid::new_v4();
    let drained = batch.len();
    info!(cycle = %cycle, records = drained, "Uploading buffered records");

    let mut delivered = 0usize;
    let mut to_requeue = Vec::new();
    let mut auth_expired = false;

    for record in batch {
        if auth_expired {
            to_requeue.push(record);
            continue;
        }

        match sink.send(&record).await {
            SendOutcome::Delivered => {
                delivered += 1;
                stats.add_sent();
            }
            SendOutcome::AuthRejected => {
                stats.add_failed();
                auth_expired = true;
                to_requeue.push(record);
            }
            SendOutcome::Failed => {
                stats.add_failed();
                to_requeue.push(record);
            }
        }
    }

    let requeued = to_requeue.len();
    buffer.requeue_failed(to_requeue);

    if auth_expired {
        error!(
            cycle = %cycle,
            "Authentication token expired; re-enroll and restart the uplink"
        );
        let _ = token_expired.send(true);
    }

    info!(
        cycle = %cycle,
        delivered = delivered,
        drained = drained,
        sent_total = stats.sent(),
        failed_total = stats.failed(),
        buffered = buffer.len(),
        "Upload cycle complete"
    );

    CycleSummary {
        drained,
        delivered,
        requeued,
        auth_expired,
    }
}

/// Periodic upload task plus its control handles.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cosmic_uplink::buffer::RecordBuffer;
/// use cosmic_uplink::client::UploadClient;
/// use cosmic_uplink::config::Config;
/// use cosmic_uplink::uploader::UploadScheduler;
///
/// #[tokio::main]
/// async fn main() {
///     let config = Config::from_env().expect("config");
///     let buffer = Arc::new(RecordBuffer::new());
///     let client = UploadClient::new(&config).expect("client");
///
///     let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), client);
///
///     // ... producer pushes records into `buffer` ...
///
///     scheduler.stop().await;
/// }
/// ```
pub struct UploadScheduler<S: RecordSink> {
    buffer: Arc<RecordBuffer>,
    sink: Arc<S>,
    stats: Arc<UploaderStats>,
    shutdown: watch::Sender<bool>,
    token_expired: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<S> UploadScheduler<S>
where
    S: RecordSink + Send + Sync + 'static,
{
    /// Spawn the periodic upload task.
    ///
    /// The task drains up to `config.batch_size` records every
    /// `config.upload_interval` until stopped or until the token expires.
    pub fn start(config: &Config, buffer: Arc<RecordBuffer>, sink: S) -> Self {
        let sink = Arc::new(sink);
        let stats = Arc::new(UploaderStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (token_tx, _) = watch::channel(false);

        let handle = tokio::spawn(run_loop(
            Arc::clone(&buffer),
            Arc::clone(&sink),
            Arc::clone(&stats),
            shutdown_rx,
            token_tx.clone(),
            config.upload_interval,
            config.batch_size,
        ));

        info!(
            interval_secs = config.upload_interval.as_secs(),
            batch_size = config.batch_size,
            "Upload scheduler started"
        );

        Self {
            buffer,
            sink,
            stats,
            shutdown: shutdown_tx,
            token_expired: token_tx,
            handle,
        }
    }

    /// Handle to the running delivery totals.
    pub fn stats(&self) -> Arc<UploaderStats> {
        Arc::clone(&self.stats)
    }

    /// Receiver that flips to `true` when the collector rejects the token.
    ///
    /// The composition root watches this and initiates shutdown; the
    /// scheduler does not attempt token renewal.
    pub fn token_expired(&self) -> watch::Receiver<bool> {
        self.token_expired.subscribe()
    }

    /// Stop the periodic loop and flush whatever is still buffered.
    ///
    /// Signals the loop (interrupting its wait), waits up to a grace period
    /// for any in-flight cycle, then performs exactly one final uncapped
    /// drain-and-send. The final send is best-effort: records that still
    /// fail are accepted as lost at process exit. Consuming `self` makes a
    /// second stop impossible.
    pub async fn stop(self) -> CycleSummary {
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(SHUTDOWN_GRACE, self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Upload loop panicked before shutdown"),
            Err(_) => warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Upload loop still busy after grace period; flushing anyway"
            ),
        }

        let remaining = self.buffer.len();
        if remaining > 0 {
            info!(remaining = remaining, "Final flush of buffered records");
        }

        let summary = run_cycle(
            &self.buffer,
            self.sink.as_ref(),
            None,
            &self.stats,
            &self.token_expired,
        )
        .await;

        info!(
            sent = self.stats.sent(),
            failed = self.stats.failed(),
            lost = self.buffer.len(),
            "Upload scheduler stopped"
        );

        summary
    }
}

/// The periodic loop. Waits are interruptible: a shutdown signal returns
/// immediately instead of completing the remaining period, so shutdown
/// latency is bounded by in-flight send time.
async fn run_loop<S: RecordSink>(
    buffer: Arc<RecordBuffer>,
    sink: Arc<S>,
    stats: Arc<UploaderStats>,
    mut shutdown: watch::Receiver<bool>,
    token_expired: watch::Sender<bool>,
    interval: Duration,
    batch_size: usize,
) {
    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Upload loop received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                let summary = run_cycle(
                    &buffer,
                    sink.as_ref(),
                    Some(batch_size),
                    &stats,
                    &token_expired,
                )
                .await;

                if summary.auth_expired {
                    // No further cycle can succeed with this token.
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DetectorReading;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn record(sequence: u64) -> EventRecord {
        EventRecord::capture(
            sequence,
            DetectorReading {
                adc: "512".to_string(),
                sipm: "34.1".to_string(),
                deadtime: "12".to_string(),
                temperature: "24.8".to_string(),
            },
        )
    }

    /// Sink that replays a scripted outcome per call, then delivers.
    #[derive(Clone, Default)]
    struct StubSink {
        script: Arc<Mutex<VecDeque<SendOutcome>>>,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl StubSink {
        fn with_script(outcomes: Vec<SendOutcome>) -> Self {
            Self {
                script: Arc::new(Mutex::new(outcomes.into())),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl RecordSink for StubSink {
        fn send(&self, record: &EventRecord) -> impl Future<Output = SendOutcome> + Send {
            self.seen.lock().unwrap().push(record.sequence);
            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SendOutcome::Delivered);
            std::future::ready(outcome)
        }
    }

    fn token_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_cycle_delivers_everything_on_success() {
        let buffer = RecordBuffer::new();
        let stats = UploaderStats::default();
        let sink = StubSink::default();
        let (token_tx, _token_rx) = token_channel();

        for i in 1..=5 {
            buffer.push(record(i));
        }

        let summary = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;

        assert_eq!(summary.drained, 5);
        assert_eq!(summary.delivered, 5);
        assert_eq!(summary.requeued, 0);
        assert!(buffer.is_empty());
        assert_eq!(stats.sent(), 5);
        assert_eq!(stats.failed(), 0);
        assert_eq!(sink.seen(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cycle_requeues_transient_failures_in_order() {
        let buffer = RecordBuffer::new();
        let stats = UploaderStats::default();
        let sink = StubSink::with_script(vec![SendOutcome::Failed; 5]);
        let (token_tx, _token_rx) = token_channel();

        for i in 1..=5 {
            buffer.push(record(i));
        }

        let summary = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;

        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.requeued, 5);
        assert_eq!(stats.sent(), 0);
        assert_eq!(stats.failed(), 5);

        // All five live in the retry queue, original order intact
        assert_eq!(buffer.depths(), (0, 5));
        let requeued: Vec<u64> = buffer.drain(None).iter().map(|r| r.sequence).collect();
        assert_eq!(requeued, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_retry_records_lead_the_next_cycle() {
        let buffer = RecordBuffer::new();
        let stats = UploaderStats::default();
        let sink = StubSink::with_script(vec![SendOutcome::Failed, SendOutcome::Failed]);
        let (token_tx, _token_rx) = token_channel();

        buffer.push(record(1));
        buffer.push(record(2));
        run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;

        // New backlog arrives between cycles
        buffer.push(record(3));
        buffer.push(record(4));
        let summary = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;

        assert_eq!(summary.delivered, 4);
        assert!(buffer.is_empty());
        // Failed records retried ahead of the fresh backlog
        assert_eq!(sink.seen(), vec![1, 2, 1, 2, 3, 4]);
        assert_eq!(stats.sent(), 4);
        assert_eq!(stats.failed(), 2);
    }

    #[tokio::test]
    async fn test_auth_rejection_aborts_the_cycle() {
        let buffer = RecordBuffer::new();
        let stats = UploaderStats::default();
        let sink = StubSink::with_script(vec![SendOutcome::Delivered, SendOutcome::AuthRejected]);
        let (token_tx, token_rx) = token_channel();

        for i in 1..=4 {
            buffer.push(record(i));
        }

        let summary = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;

        assert!(summary.auth_expired);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.requeued, 3);
        // The rejected record was not retried and counted failed exactly once;
        // records 3 and 4 were never attempted
        assert_eq!(sink.seen(), vec![1, 2]);
        assert_eq!(stats.sent(), 1);
        assert_eq!(stats.failed(), 1);
        assert!(*token_rx.borrow());

        let kept: Vec<u64> = buffer.drain(None).iter().map(|r| r.sequence).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cycle_cap_leaves_remainder_for_next_cycle() {
        let buffer = RecordBuffer::new();
        let stats = UploaderStats::default();
        let sink = StubSink::default();
        let (token_tx, _token_rx) = token_channel();

        for i in 1..=150 {
            buffer.push(record(i));
        }

        let first = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;
        assert_eq!(first.drained, 100);
        assert_eq!(buffer.len(), 50);

        let second = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;
        assert_eq!(second.drained, 50);
        assert!(buffer.is_empty());

        assert_eq!(sink.seen(), (1..=150).collect::<Vec<u64>>());
        assert_eq!(stats.sent(), 150);
    }

    #[tokio::test]
    async fn test_empty_cycle_makes_no_network_contact() {
        let buffer = RecordBuffer::new();
        let stats = UploaderStats::default();
        let sink = StubSink::default();
        let (token_tx, _token_rx) = token_channel();

        let summary = run_cycle(&buffer, &sink, Some(100), &stats, &token_tx).await;

        assert_eq!(summary.drained, 0);
        assert!(sink.seen().is_empty());
    }

    #[tokio::test]
    async fn test_stop_interrupts_wait_and_flushes() {
        let config = Config {
            upload_interval: Duration::from_secs(60),
            ..Config::default()
        };
        let buffer = Arc::new(RecordBuffer::new());
        let sink = StubSink::default();

        for i in 1..=3 {
            buffer.push(record(i));
        }

        let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), sink.clone());
        let stats = scheduler.stats();

        // Returns long before the 60s period would have elapsed
        let summary = scheduler.stop().await;

        assert_eq!(summary.drained, 3);
        assert_eq!(summary.delivered, 3);
        assert!(buffer.is_empty());
        assert_eq!(sink.seen(), vec![1, 2, 3]);
        assert_eq!(stats.sent(), 3);
    }

    #[tokio::test]
    async fn test_stop_with_empty_buffer_is_a_noop_flush() {
        let config = Config {
            upload_interval: Duration::from_secs(60),
            ..Config::default()
        };
        let buffer = Arc::new(RecordBuffer::new());
        let sink = StubSink::default();

        let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), sink.clone());
        let summary = scheduler.stop().await;

        assert_eq!(summary.drained, 0);
        assert!(sink.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_cycle_fires_on_interval() {
        let config = Config {
            upload_interval: Duration::from_secs(60),
            ..Config::default()
        };
        let buffer = Arc::new(RecordBuffer::new());
        let sink = StubSink::default();

        buffer.push(record(1));
        buffer.push(record(2));

        let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), sink.clone());

        // Past the first period: one regular cycle should have run
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.seen(), vec![1, 2]);
        assert!(buffer.is_empty());

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_expiry_halts_the_periodic_loop() {
        let config = Config {
            upload_interval: Duration::from_secs(60),
            ..Config::default()
        };
        let buffer = Arc::new(RecordBuffer::new());
        let sink = StubSink::with_script(vec![SendOutcome::AuthRejected]);

        buffer.push(record(1));

        let scheduler = UploadScheduler::start(&config, Arc::clone(&buffer), sink.clone());
        let mut token_rx = scheduler.token_expired();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(token_rx.has_changed().unwrap());
        assert!(*token_rx.borrow_and_update());

        // A later period must not retry with the dead token
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.seen(), vec![1]);

        scheduler.stop().await;
    }
}
