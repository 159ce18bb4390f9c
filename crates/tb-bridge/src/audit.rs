//! Best-effort audit logging
//!
//! Writes never fail the caller: a missing store is a silent no-op, write
//! errors and timeouts are logged and counted.

use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tb_audit::{AuditError, AuditStore, StoreHandle};
use tb_common::{AuditRecord, EventLogRecord, MessageLogRecord};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AuditLogger {
    handle: Arc<StoreHandle>,
    write_timeout: Duration,
}

impl AuditLogger {
    pub fn new(handle: Arc<StoreHandle>, write_timeout: Duration) -> Self {
        Self {
            handle,
            write_timeout,
        }
    }

    /// Record the outcome of one API invocation
    pub async fn record(
        &self,
        endpoint: &str,
        params: &Map<String, Value>,
        response_data: Option<&Value>,
        status_code: u16,
        error_message: Option<&str>,
    ) {
        let record = AuditRecord::new(
            endpoint,
            Value::Object(params.clone()),
            response_data.cloned(),
            i32::from(status_code),
            error_message.map(str::to_string),
        );

        self.write("api_response", |store| async move {
            store.append_api_response(&record).await
        })
        .await;
    }

    pub async fn record_message(&self, record: MessageLogRecord) {
        self.write("message", |store| async move {
            store.append_message_log(&record).await
        })
        .await;
    }

    pub async fn record_event(&self, record: EventLogRecord) {
        self.write("event", |store| async move {
            store.append_event_log(&record).await
        })
        .await;
    }

    async fn write<F, Fut>(&self, kind: &'static str, op: F)
    where
        F: FnOnce(Arc<dyn AuditStore>) -> Fut,
        Fut: Future<Output = tb_audit::Result<()>>,
    {
        let Some(store) = self.handle.current() else {
            debug!(kind, state = %self.handle.state(), "No audit store connected, skipping write");
            return;
        };

        let result = match tokio::time::timeout(self.write_timeout, op(store)).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(self.write_timeout)),
        };

        match result {
            Ok(()) => debug!(kind, "Audit record written"),
            Err(e) => {
                metrics::counter!("bridge.audit.write_errors_total").increment(1);
                warn!(kind, error = %e, "Failed to write audit record");
            }
        }
    }
}
