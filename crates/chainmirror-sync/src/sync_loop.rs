//! Per-stream sync loop.
//!
//! Each pass scans one window past the stream's cursor, applies the decoded
//! events and advances the cursor past the last block that was fully applied.
//!
//! # Failure handling
//! - Undecodable log: skipped.
//! - Retryable failure or deferred transaction: the cursor stops just before
//!   the failing event's block, so the next pass re-applies from there. After
//!   `max_event_attempts` passes the event is skipped.
//! - Non-retryable failure: logged, event skipped.
//!
//! Shutdown is observed between windows only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chainmirror_core::{
    Address, BlockRef, Cursor, CursorStore, MarketStore, MirrorError, TokenKey, TransferEvent, B256,
};
use chainmirror_evm::{decode, LogScanner, RawLog, ScanRequest};

use crate::config::{ExecutionMode, StreamConfig};
use crate::pipeline::{ApplyOutcome, EventPipeline};

/// Identity of one transfer across passes.
type EventId = (B256, BlockRef);

/// Summary of one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowReport {
    pub from: u64,
    /// Requested end of the window.
    pub to: u64,
    /// Confirmed head the window was cut against.
    pub head: u64,
    /// Cursor position after the window: the next block to scan.
    pub next_block: u64,
    pub events: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Failed this pass, will be retried.
    pub retrying: usize,
    /// Failed too often and skipped.
    pub abandoned: usize,
}

impl WindowReport {
    pub fn made_progress(&self) -> bool {
        self.next_block > self.from
    }

    pub fn caught_up(&self) -> bool {
        self.next_block > self.head
    }
}

#[derive(Default)]
struct GroupResult {
    applied: usize,
    skipped: usize,
    abandoned: usize,
    done: Vec<EventId>,
    retry: Option<(EventId, u64)>,
}

pub struct SyncLoop {
    config: StreamConfig,
    scanner: LogScanner,
    pipeline: Arc<EventPipeline>,
    store: Arc<dyn MarketStore>,
    cursors: Arc<dyn CursorStore>,
    attempts: HashMap<EventId, u32>,
}

impl SyncLoop {
    pub fn new(
        config: StreamConfig,
        scanner: LogScanner,
        pipeline: Arc<EventPipeline>,
        store: Arc<dyn MarketStore>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            config,
            scanner,
            pipeline,
            store,
            cursors,
            attempts: HashMap::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.config.id
    }

    /// Poll windows until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(stream = %self.config.id, chain = %self.config.chain, "stream started");
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_window().await {
                Ok(Some(report)) => {
                    info!(
                        stream = %self.config.id,
                        from = report.from,
                        next_block = report.next_block,
                        head = report.head,
                        events = report.events,
                        applied = report.applied,
                        retrying = report.retrying,
                        "window applied"
                    );
                    !report.made_progress() || report.caught_up()
                }
                Ok(None) => true,
                Err(e) => {
                    error!(stream = %self.config.id, error = %e, "window failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(stream = %self.config.id, "stream stopped");
    }

    /// Scan and apply one window. `None` when there is nothing new to scan.
    pub async fn run_window(&mut self) -> Result<Option<WindowReport>, MirrorError> {
        let mut cursor = self.load_cursor().await?;
        let head = self.scanner.head().await?.saturating_sub(self.config.confirmations);
        let from = cursor.next_block;
        if from > head {
            return Ok(None);
        }
        let to = head.min(from.saturating_add(self.config.window_size.max(1) - 1));

        let addresses = self.addresses().await?;
        // Exclusive: every block below `covered` is applied once the window ends.
        let (events, mut covered) = if addresses.is_empty() {
            debug!(stream = %self.config.id, "no approved contracts, skipping scan");
            (Vec::new(), to.saturating_add(1))
        } else {
            let request = ScanRequest {
                from_block: from,
                to_block: to,
                addresses,
                topics: self.config.topics(),
            };
            let outcome = self.scanner.scan(&request).await?;
            let covered = outcome.next_from;
            let mut events = decode_logs(&outcome.logs);
            events.retain(|e| e.block.number < covered);
            (events, covered)
        };

        let mut report = WindowReport {
            from,
            to,
            head,
            events: events.len(),
            ..WindowReport::default()
        };

        let workers = match self.config.execution {
            ExecutionMode::Inline => 1,
            ExecutionMode::Queued { workers } => workers.max(1),
        };
        let groups = group_events(events, self.config.execution);
        let pipeline = &self.pipeline;
        let attempts = &self.attempts;
        let max_attempts = self.config.max_event_attempts.max(1);
        let results: Vec<GroupResult> = stream::iter(groups)
            .map(|group| apply_group(pipeline, group, attempts, max_attempts))
            .buffer_unordered(workers)
            .collect()
            .await;

        for result in results {
            report.applied += result.applied;
            report.skipped += result.skipped;
            report.abandoned += result.abandoned;
            for id in result.done {
                self.attempts.remove(&id);
            }
            if let Some((id, block)) = result.retry {
                *self.attempts.entry(id).or_default() += 1;
                report.retrying += 1;
                covered = covered.min(block);
            }
        }

        if covered > from {
            cursor.advance(covered - 1);
            self.cursors.save(&cursor).await?;
        }
        report.next_block = cursor.next_block;
        Ok(Some(report))
    }

    async fn load_cursor(&self) -> Result<Cursor, MirrorError> {
        if let Some(cursor) = self.cursors.load(&self.config.id).await? {
            return Ok(cursor);
        }
        let cursor = Cursor::starting_at(self.config.id.clone(), self.config.start_block);
        self.cursors.save(&cursor).await?;
        info!(stream = %self.config.id, start_block = self.config.start_block, "cursor created");
        Ok(cursor)
    }

    async fn addresses(&self) -> Result<Vec<Address>, MirrorError> {
        Ok(self
            .store
            .approved_contracts(&self.config.chain)
            .await?
            .into_iter()
            .filter(|c| self.config.standard.map_or(true, |s| s == c.standard))
            .map(|c| c.address)
            .collect())
    }
}

/// Decode logs into transfers in block order. Unrecognized logs are skipped.
fn decode_logs(logs: &[RawLog]) -> Vec<TransferEvent> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        match decode(log) {
            Ok(decoded) => events.extend(decoded.into_events()),
            Err(e) => {
                let (block, index) = log.position();
                debug!(block, index, address = %log.address, error = %e, "log skipped");
            }
        }
    }
    events.sort_by_key(|e| e.block);
    events
}

/// Inline mode keeps one group; queued mode groups by token, each group in
/// block order.
fn group_events(events: Vec<TransferEvent>, mode: ExecutionMode) -> Vec<Vec<TransferEvent>> {
    match mode {
        ExecutionMode::Inline => {
            if events.is_empty() {
                vec![]
            } else {
                vec![events]
            }
        }
        ExecutionMode::Queued { .. } => {
            let mut index: HashMap<TokenKey, usize> = HashMap::new();
            let mut groups: Vec<Vec<TransferEvent>> = Vec::new();
            for event in events {
                let slot = *index.entry(event.token_key()).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[slot].push(event);
            }
            groups
        }
    }
}

async fn apply_group(
    pipeline: &EventPipeline,
    events: Vec<TransferEvent>,
    attempts: &HashMap<EventId, u32>,
    max_attempts: u32,
) -> GroupResult {
    let mut result = GroupResult::default();
    for event in events {
        let id = (event.tx_hash, event.block);
        let failure = match pipeline.apply(&event).await {
            Ok(ApplyOutcome::Applied { .. }) => {
                result.applied += 1;
                result.done.push(id);
                continue;
            }
            Ok(ApplyOutcome::Skipped { reason }) => {
                debug!(tx = %event.tx_hash, token = %event.token_key(), reason, "event skipped");
                result.skipped += 1;
                result.done.push(id);
                continue;
            }
            Ok(ApplyOutcome::Deferred) => "transaction not visible".to_string(),
            Err(e) if e.is_retryable() => e.to_string(),
            Err(e) => {
                error!(tx = %event.tx_hash, token = %event.token_key(), error = %e, "event failed, skipping");
                result.abandoned += 1;
                result.done.push(id);
                continue;
            }
        };

        let attempt = attempts.get(&id).copied().unwrap_or(0) + 1;
        if attempt >= max_attempts {
            error!(
                tx = %event.tx_hash,
                token = %event.token_key(),
                attempt,
                error = %failure,
                "event failed too often, skipping"
            );
            result.abandoned += 1;
            result.done.push(id);
            continue;
        }
        warn!(
            tx = %event.tx_hash,
            block = event.block.number,
            attempt,
            error = %failure,
            "event will be retried"
        );
        result.retry = Some((id, event.block.number));
        break;
    }
    result
}
