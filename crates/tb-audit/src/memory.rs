//! In-memory audit store for tests and dry runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tb_common::{AuditRecord, EventLogRecord, MessageLogRecord};

use crate::{AuditError, AuditStore, Result};

#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    api_responses: Mutex<Vec<AuditRecord>>,
    messages: Mutex<Vec<MessageLogRecord>>,
    events: Mutex<Vec<EventLogRecord>>,
    fail_writes: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of write attempts, failed ones included
    pub fn write_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn api_responses(&self) -> Vec<AuditRecord> {
        self.api_responses.lock().clone()
    }

    pub fn messages(&self) -> Vec<MessageLogRecord> {
        self.messages.lock().clone()
    }

    pub fn events(&self) -> Vec<EventLogRecord> {
        self.events.lock().clone()
    }

    fn check_writable(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuditError::Database("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn append_api_response(&self, record: &AuditRecord) -> Result<()> {
        self.check_writable()?;
        self.api_responses.lock().push(record.clone());
        Ok(())
    }

    async fn append_message_log(&self, record: &MessageLogRecord) -> Result<()> {
        self.check_writable()?;
        self.messages.lock().push(record.clone());
        Ok(())
    }

    async fn append_event_log(&self, record: &EventLogRecord) -> Result<()> {
        self.check_writable()?;
        self.events.lock().push(record.clone());
        Ok(())
    }
}
