// master/src/state.rs

use common::{CompletionRecord, Error, RecordTemplate, Result};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::Notify;

/// Almacén de resultados compartido entre los handlers HTTP (muchos
/// escritores) y el loop del orquestador (un único consumidor).
#[derive(Clone, Default)]
pub struct ResultStore {
    records: Arc<Mutex<Vec<CompletionRecord>>>,
    notify: Arc<Notify>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, record: CompletionRecord) {
        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.push(record);
        }
        self.notify.notify_waiters();
    }

    /// Saca el registro más viejo que matchee la plantilla, esperando como
    /// máximo `timeout`. Cada registro se entrega a un solo `take`.
    pub async fn take(&self, template: &RecordTemplate, timeout: Duration) -> Result<CompletionRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // registrarse antes de mirar el vector para no perder un notify
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_take(template) {
                return Ok(record);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(Error::CollectionTimeout(timeout));
            }
        }
    }

    pub fn try_take(&self, template: &RecordTemplate) -> Option<CompletionRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let pos = records.iter().position(|r| template.matches(r))?;
        Some(records.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
