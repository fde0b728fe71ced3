//! Async service layer over the wager engine.
//!
//! Goals:
//! - Keep engine calls serialized and short; nothing awaits under the lock.
//! - Let callers wait for a settlement without polling.
//! - Keep expiry refunds and payout delivery moving even when no caller is
//!   driving the engine.

use crate::config::ServiceConfig;
use crate::engine::{
    EngineContext, PlacedWager, RefundRecord, SettlementRecord, WagerEngine, WagerRequest,
};
use crate::errors::{EngineError, EngineResult};
use crate::oracle::RequestToken;
use crate::payouts::PendingPayout;
use crate::wager::{WagerId, WagerStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, warn};

/// Emitted on the service event stream after each lifecycle transition.
#[derive(Clone, Debug)]
pub enum WagerEvent {
    Placed(PlacedWager),
    Settled(SettlementRecord),
    Refunded(RefundRecord),
}

/// Supplies the ambient facts for each engine call.
pub trait ContextProvider: Send + Sync {
    fn current(&self) -> EngineContext;
}

/// Externally driven context for demos and tests.
pub struct ManualContext {
    now: AtomicU64,
    marker: AtomicU64,
    gas_price: AtomicU64,
}

impl ManualContext {
    pub fn new(now: u64, marker: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
            marker: AtomicU64::new(marker),
            gas_price: AtomicU64::new(0),
        }
    }

    pub fn advance_time(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn advance_marker(&self, steps: u64) {
        self.marker.fetch_add(steps, Ordering::SeqCst);
    }

    pub fn set_gas_price(&self, gas_price: u64) {
        self.gas_price.store(gas_price, Ordering::SeqCst);
    }
}

impl ContextProvider for ManualContext {
    fn current(&self) -> EngineContext {
        EngineContext {
            now: self.now.load(Ordering::SeqCst),
            marker: self.marker.load(Ordering::SeqCst),
            gas_price: self.gas_price.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("settlement of wager {wager_id} not available within {timeout_ms}ms")]
    Timeout { wager_id: u64, timeout_ms: u64 },

    #[error("settlement waiter cancelled")]
    Cancelled,

    #[error("wager {wager_id} was refunded while awaiting settlement")]
    RefundedWhileWaiting { wager_id: u64 },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure reported by a payout sink. The pending ledger retries with
/// backoff until delivery succeeds or the payout parks.
#[derive(Debug, Clone, thiserror::Error)]
#[error("payout delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Destination for won and refunded funds.
#[async_trait]
pub trait PayoutSink: Send + Sync {
    async fn deliver(&self, payout: &PendingPayout) -> Result<(), DeliveryError>;
}

/// Concurrency-safe service handle around a single serialized engine.
#[derive(Clone)]
pub struct CasinoService {
    engine: Arc<Mutex<WagerEngine>>,
    context: Arc<dyn ContextProvider>,
    events: broadcast::Sender<WagerEvent>,
    pending: Arc<dashmap::DashMap<u64, Vec<(u64, oneshot::Sender<WagerEvent>)>>>,
    waiter_seq: Arc<AtomicU64>,
    tuning: ServiceConfig,
}

impl CasinoService {
    pub fn new(engine: WagerEngine, context: Arc<dyn ContextProvider>) -> Self {
        let tuning = engine.config().service.clone();
        let (events, _) = broadcast::channel(tuning.event_channel_capacity);
        let service = Self {
            engine: Arc::new(Mutex::new(engine)),
            context,
            events,
            pending: Arc::new(dashmap::DashMap::new()),
            waiter_seq: Arc::new(AtomicU64::new(0)),
            tuning,
        };
        service.spawn_event_processor();
        service
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WagerEvent> {
        self.events.subscribe()
    }

    pub fn engine(&self) -> Arc<Mutex<WagerEngine>> {
        self.engine.clone()
    }

    fn spawn_event_processor(&self) {
        let mut rx = self.events.subscribe();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let wager_id = match &event {
                            WagerEvent::Settled(record) => Some(record.wager_id.0),
                            WagerEvent::Refunded(record) => Some(record.wager_id.0),
                            WagerEvent::Placed(_) => None,
                        };
                        if let Some(id) = wager_id {
                            if let Some((_, senders)) = pending.remove(&id) {
                                for (_, sender) in senders {
                                    let _ = sender.send(event.clone());
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "settlement waiter lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub async fn place_wager(&self, request: &WagerRequest) -> EngineResult<PlacedWager> {
        let ctx = self.context.current();
        let receipt = self.engine.lock().await.place_wager(request, &ctx)?;
        let _ = self.events.send(WagerEvent::Placed(receipt.clone()));
        Ok(receipt)
    }

    pub async fn fulfill(
        &self,
        token: RequestToken,
        random_value: [u8; 32],
    ) -> EngineResult<SettlementRecord> {
        let ctx = self.context.current();
        let record = self.engine.lock().await.fulfill(token, random_value, &ctx)?;
        let _ = self.events.send(WagerEvent::Settled(record.clone()));
        Ok(record)
    }

    pub async fn refund_wager(&self, wager_id: WagerId) -> EngineResult<RefundRecord> {
        let ctx = self.context.current();
        let record = self.engine.lock().await.refund_wager(wager_id, &ctx)?;
        let _ = self.events.send(WagerEvent::Refunded(record.clone()));
        Ok(record)
    }

    /// Run one expiry sweep, publishing an event per refunded wager.
    pub async fn sweep_expired(&self) -> usize {
        let ctx = self.context.current();
        let refunded = self.engine.lock().await.sweep_expired(&ctx);
        let count = refunded.len();
        for record in refunded {
            let _ = self.events.send(WagerEvent::Refunded(record));
        }
        count
    }

    /// Deliver every due pending payout once. Failures are recorded for
    /// backoff retry; the engine lock is never held across a delivery.
    pub async fn drain_payouts_once(&self, sink: &dyn PayoutSink) -> usize {
        let now_ms = self.context.current().now.saturating_mul(1_000);
        let due = self.engine.lock().await.due_payouts(now_ms);

        let mut delivered = 0;
        for payout in due {
            match sink.deliver(&payout).await {
                Ok(()) => {
                    self.engine.lock().await.payout_delivered(payout.wager_id);
                    delivered += 1;
                }
                Err(err) => {
                    warn!(
                        wager_id = payout.wager_id.0,
                        amount = payout.amount,
                        error = %err,
                        "payout delivery failed"
                    );
                    self.engine
                        .lock()
                        .await
                        .payout_failed(payout.wager_id, now_ms);
                }
            }
        }
        delivered
    }

    /// Wait until the wager settles, checking the store before parking.
    ///
    /// The engine record is the source of truth; events are only a wake-up
    /// mechanism.
    pub async fn wait_for_settlement(
        &self,
        wager_id: WagerId,
        timeout: Duration,
    ) -> ServiceResult<SettlementRecord> {
        {
            let engine = self.engine.lock().await;
            if let Some(record) = engine.settled_record(wager_id)? {
                return Ok(record);
            }
            if engine.wager(wager_id)?.status == WagerStatus::Refunded {
                return Err(ServiceError::RefundedWhileWaiting {
                    wager_id: wager_id.0,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        let waiter = self.waiter_seq.fetch_add(1, Ordering::SeqCst);
        self.pending
            .entry(wager_id.0)
            .or_insert_with(Vec::new)
            .push((waiter, tx));

        // The wager may have finalized between the check and registration.
        {
            let engine = self.engine.lock().await;
            if let Some(record) = engine.settled_record(wager_id)? {
                self.unregister_waiter(wager_id, waiter);
                return Ok(record);
            }
            if engine.wager(wager_id)?.status == WagerStatus::Refunded {
                self.unregister_waiter(wager_id, waiter);
                return Err(ServiceError::RefundedWhileWaiting {
                    wager_id: wager_id.0,
                });
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(WagerEvent::Settled(record))) => Ok(record),
            Ok(Ok(WagerEvent::Refunded(_))) => Err(ServiceError::RefundedWhileWaiting {
                wager_id: wager_id.0,
            }),
            Ok(Ok(WagerEvent::Placed(_))) | Ok(Err(_)) => Err(ServiceError::Cancelled),
            Err(_) => {
                self.unregister_waiter(wager_id, waiter);
                Err(ServiceError::Timeout {
                    wager_id: wager_id.0,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Drop one waiter's registration, leaving other waiters parked on the
    /// same wager undisturbed.
    fn unregister_waiter(&self, wager_id: WagerId, waiter: u64) {
        if let Some(mut senders) = self.pending.get_mut(&wager_id.0) {
            senders.retain(|(token, _)| *token != waiter);
        }
        self.pending
            .remove_if(&wager_id.0, |_, senders| senders.is_empty());
    }

    // ---- engine passthroughs ----

    pub async fn deposit_bankroll(&self, amount: u64) -> EngineResult<()> {
        self.engine.lock().await.deposit_bankroll(amount)
    }

    pub async fn stats(&self) -> crate::engine::HouseStats {
        self.engine.lock().await.stats()
    }

    pub async fn audit(&self) -> bool {
        self.engine.lock().await.audit()
    }

    pub async fn total_payouts_owed(&self) -> u128 {
        self.engine.lock().await.total_payouts_owed()
    }
}

/// Background workers for expiry refunds and payout delivery.
///
/// Off the request path. `stop` flips the running flag; each loop exits on
/// its next tick.
pub struct ServiceWorkers {
    service: CasinoService,
    sink: Arc<dyn PayoutSink>,
    running: Arc<AtomicBool>,
}

impl ServiceWorkers {
    pub fn spawn(service: CasinoService, sink: Arc<dyn PayoutSink>) -> Arc<Self> {
        let workers = Arc::new(Self {
            service,
            sink,
            running: Arc::new(AtomicBool::new(true)),
        });

        workers.clone().spawn_sweeper();
        workers.clone().spawn_payout_drain();
        workers
    }

    fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_millis(self.service.tuning.sweep_interval_ms));

            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                let refunded = self.service.sweep_expired().await;
                if refunded > 0 {
                    debug!(refunded, "expiry sweep refunded wagers");
                }
            }
        });
    }

    fn spawn_payout_drain(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(
                self.service.tuning.payout_drain_interval_ms,
            ));

            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                self.service.drain_payouts_once(self.sink.as_ref()).await;
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Sink that records deliveries in memory, with optional injected failures.
/// Used by the demo binary and tests.
pub struct RecordingSink {
    delivered: StdMutex<Vec<PendingPayout>>,
    fail_remaining: AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::failing_times(0)
    }

    /// Fail the first `failures` deliveries before accepting the rest.
    pub fn failing_times(failures: u64) -> Self {
        Self {
            delivered: StdMutex::new(Vec::new()),
            fail_remaining: AtomicU64::new(failures),
        }
    }

    pub fn delivered(&self) -> Vec<PendingPayout> {
        lock_entries(&self.delivered).clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_entries(
    mutex: &StdMutex<Vec<PendingPayout>>,
) -> std::sync::MutexGuard<'_, Vec<PendingPayout>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl PayoutSink for RecordingSink {
    async fn deliver(&self, payout: &PendingPayout) -> Result<(), DeliveryError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError("injected delivery failure".to_string()));
        }
        lock_entries(&self.delivered).push(payout.clone());
        Ok(())
    }
}
