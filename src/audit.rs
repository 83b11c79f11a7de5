// History Recorder
//
// Records calculations and price changes to the append-only history tables.
// Writes are queued to a background worker so a calculation never waits on
// the audit store; failures are logged and counted, never returned.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{PricingError, PricingResult};
use crate::metrics::PerformanceMetrics;
use crate::models::{
    CalculationHistoryRecord, CalculationInput, PriceCalculationResult, PriceChange,
    PriceHistoryRecord,
};
use crate::query::{CalculationQuery, HistoryQuery};
use crate::store::AuditStore;
use crate::types::EntityType;

#[derive(Debug)]
enum AuditCommand {
    Calculation(CalculationHistoryRecord),
    PriceChange(PriceHistoryRecord),
    /// Acknowledged once everything queued before it is written
    Flush(oneshot::Sender<()>),
}

impl AuditCommand {
    fn kind(&self) -> &'static str {
        match self {
            AuditCommand::Calculation(_) => "calculation",
            AuditCommand::PriceChange(_) => "price_change",
            AuditCommand::Flush(_) => "flush",
        }
    }
}

/// Fire-and-forget audit writer plus history reads
pub struct HistoryRecorder {
    store: Arc<dyn AuditStore>,
    sender: mpsc::Sender<AuditCommand>,
    metrics: PerformanceMetrics,
}

impl HistoryRecorder {
    /// Start the background writer
    ///
    /// Must be called from inside a tokio runtime.
    pub fn spawn(store: Arc<dyn AuditStore>, capacity: usize, metrics: PerformanceMetrics) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        tokio::spawn(run_worker(store.clone(), receiver, metrics.clone()));

        Self {
            store,
            sender,
            metrics,
        }
    }

    /// Queue a calculation snapshot; returns immediately
    pub fn record_calculation(&self, input: &CalculationInput, result: &PriceCalculationResult) {
        match CalculationHistoryRecord::from_calculation(input, result) {
            Ok(record) => self.enqueue(AuditCommand::Calculation(record)),
            Err(e) => {
                let err = PricingError::AuditWrite(format!("could not snapshot input: {}", e));
                error!(error = %err, package_id = input.package_id, "Failed to record calculation");
                self.metrics.record_audit_failed();
            }
        }
    }

    /// Queue a price change; returns the id the record will carry
    pub fn record_price_change(&self, change: PriceChange) -> Uuid {
        self.record_price_change_at(change, Utc::now())
    }

    pub fn record_price_change_at(&self, change: PriceChange, changed_at: DateTime<Utc>) -> Uuid {
        let record = change.into_record(changed_at);
        let id = record.id;
        self.enqueue(AuditCommand::PriceChange(record));
        id
    }

    fn enqueue(&self, command: AuditCommand) {
        let kind = command.kind();
        match self.sender.try_send(command) {
            Ok(()) => self.metrics.record_audit_queued(),
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "writer stopped",
                };
                let err = PricingError::AuditWrite(reason.to_string());
                error!(error = %err, kind, "Dropping audit record");
                self.metrics.record_audit_dropped();
            }
        }
    }

    /// Wait until every record queued before this call has been handled
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(AuditCommand::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Price changes matching the query
    ///
    /// An invalid query or a store failure yields an empty list.
    pub async fn query_history(&self, query: &HistoryQuery) -> Vec<PriceHistoryRecord> {
        if let Err(e) = query.validate() {
            error!(error = %e, "Rejected price history query");
            return Vec::new();
        }

        match self.store.query_price_history(query).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to query price history");
                Vec::new()
            }
        }
    }

    pub async fn query_calculations(
        &self,
        query: &CalculationQuery,
    ) -> PricingResult<Vec<CalculationHistoryRecord>> {
        self.store.query_calculations(query).await
    }

    pub async fn list_price_changes(
        &self,
        entity_type: Option<EntityType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PricingResult<Vec<PriceHistoryRecord>> {
        self.store.list_price_changes(entity_type, start, end).await
    }
}

async fn run_worker(
    store: Arc<dyn AuditStore>,
    mut receiver: mpsc::Receiver<AuditCommand>,
    metrics: PerformanceMetrics,
) {
    debug!("Audit writer started");

    while let Some(command) = receiver.recv().await {
        let kind = command.kind();
        let outcome = match command {
            AuditCommand::Calculation(record) => store.insert_calculation(&record).await,
            AuditCommand::PriceChange(record) => store.insert_price_change(&record).await,
            AuditCommand::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        match outcome {
            Ok(()) => metrics.record_audit_written(),
            Err(e) => {
                let err = match e {
                    PricingError::AuditWrite(_) => e,
                    other => PricingError::AuditWrite(other.to_string()),
                };
                error!(error = %err, kind, "Failed to persist audit record");
                metrics.record_audit_failed();
            }
        }
    }

    info!("Audit channel closed, writer shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn change(entity_id: i32, old: rust_decimal::Decimal, new: rust_decimal::Decimal) -> PriceChange {
        PriceChange {
            entity_type: EntityType::Bot,
            entity_id,
            old_price: old,
            new_price: new,
            reason: "repricing".to_string(),
            actor: "ops".to_string(),
            metadata: None,
        }
    }

    fn metrics() -> PerformanceMetrics {
        PerformanceMetrics::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_price_changes_written_after_flush() {
        let store = Arc::new(MemoryStore::new());
        let recorder = HistoryRecorder::spawn(store.clone(), 16, metrics());

        let id = recorder.record_price_change(change(1, dec!(10), dec!(12)));
        recorder.flush().await;

        let records = store.price_change_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].price_change(), dec!(2));
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed_and_counted() {
        let store = Arc::new(MemoryStore::new());
        store.fail_audit_writes(true);
        let metrics = metrics();
        let recorder = HistoryRecorder::spawn(store.clone(), 16, metrics.clone());

        recorder.record_price_change(change(1, dec!(10), dec!(12)));
        recorder.flush().await;

        let summary = metrics.summary();
        assert_eq!(summary.audit_queued, 1);
        assert_eq!(summary.audit_failed, 1);
        assert_eq!(summary.audit_written, 0);
        assert!(store.price_change_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_query_history_filters_and_validates() {
        let store = Arc::new(MemoryStore::new());
        let recorder = HistoryRecorder::spawn(store.clone(), 16, metrics());

        recorder.record_price_change(change(1, dec!(10), dec!(12)));
        recorder.record_price_change(change(2, dec!(5), dec!(4)));
        recorder.flush().await;

        let query = HistoryQuery::for_entity(EntityType::Bot, 1);
        let first = recorder.query_history(&query).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first, recorder.query_history(&query).await);

        let invalid = HistoryQuery::default().paginate(0, 0);
        assert!(recorder.query_history(&invalid).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let store = Arc::new(MemoryStore::new());
        let metrics = metrics();
        let (sender, _receiver) = mpsc::channel(1);
        let recorder = HistoryRecorder {
            store,
            sender,
            metrics: metrics.clone(),
        };

        recorder.record_price_change(change(1, dec!(1), dec!(2)));
        recorder.record_price_change(change(1, dec!(2), dec!(3)));

        let summary = metrics.summary();
        assert_eq!(summary.audit_queued, 1);
        assert_eq!(summary.audit_dropped, 1);
    }
}
