//! In-memory `ImportStore` used by the pipeline's unit tests.

use crate::error::ImportError;
use crate::ingest::row_loader::convert_row;
use crate::ingest::source::CsvSource;
use crate::ingest::store::{BackendCapabilities, ImportStore, ShipmentsData};
use crate::models::{CsvImport, Customer, ImportProgress, ImportStatus, Shipment};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    next_id: i32,
    imports: BTreeMap<i32, CsvImport>,
    customers: BTreeSet<String>,
    customer_resolutions: usize,
    shipments: BTreeMap<String, Shipment>,
    checkpoints: Vec<u64>,
    copy_calls: usize,
}

pub struct MemoryStore {
    state: Mutex<State>,
    capabilities: BackendCapabilities,
    copy_failure: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities {
            bulk_copy: false,
            customer_foreign_key: true,
        })
    }

    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capabilities,
            copy_failure: None,
        }
    }

    /// Make every bulk copy fail with `message`.
    pub fn failing_copy(mut self, message: &str) -> Self {
        self.copy_failure = Some(message.to_string());
        self
    }

    pub fn capabilities_snapshot(&self) -> BackendCapabilities {
        self.capabilities
    }

    pub async fn seed_shipment(&self, shipment: Shipment) {
        let mut state = self.state.lock().await;
        state.shipments.insert(shipment.shipment_id.clone(), shipment);
    }

    pub async fn shipment(&self, shipment_id: &str) -> Option<Shipment> {
        self.state.lock().await.shipments.get(shipment_id).cloned()
    }

    pub async fn shipment_count(&self) -> usize {
        self.state.lock().await.shipments.len()
    }

    pub async fn customer_ids(&self) -> Vec<String> {
        self.state.lock().await.customers.iter().cloned().collect()
    }

    pub async fn customer_resolutions(&self) -> usize {
        self.state.lock().await.customer_resolutions
    }

    /// Every processed count passed to `record_progress`, in call order.
    pub async fn checkpoints(&self) -> Vec<u64> {
        self.state.lock().await.checkpoints.clone()
    }

    pub async fn copy_calls(&self) -> usize {
        self.state.lock().await.copy_calls
    }

    async fn transition(
        &self,
        import_id: i32,
        to: ImportStatus,
        processed: Option<u64>,
        error: Option<&str>,
    ) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        let import = state
            .imports
            .get_mut(&import_id)
            .ok_or(ImportError::NotFound(import_id))?;

        if !import.status.can_transition_to(to) {
            return Err(ImportError::InvalidTransition {
                id: import_id,
                from: import.status,
                to,
            });
        }

        import.status = to;
        if let Some(processed) = processed {
            import.processed_rows = (processed as i64).min(import.total_rows);
        }
        if let Some(error) = error {
            import.error_log = error.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn create_import(
        &self,
        file_path: &str,
        file_name: &str,
        total_rows: u64,
    ) -> Result<CsvImport, ImportError> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let import = CsvImport {
            id: state.next_id,
            file_path: file_path.to_string(),
            file_name: file_name.to_string(),
            uploaded_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: ImportStatus::Pending,
            total_rows: total_rows as i64,
            processed_rows: 0,
            error_log: String::new(),
        };
        state.imports.insert(import.id, import.clone());
        Ok(import)
    }

    async fn load_import(&self, import_id: i32) -> Result<CsvImport, ImportError> {
        self.state
            .lock()
            .await
            .imports
            .get(&import_id)
            .cloned()
            .ok_or(ImportError::NotFound(import_id))
    }

    async fn progress(&self, import_id: i32) -> Result<ImportProgress, ImportError> {
        let import = self.load_import(import_id).await?;
        Ok(ImportProgress {
            processed_rows: import.processed_rows,
            total_rows: import.total_rows,
            status: import.status,
            error_log: import.error_log,
        })
    }

    async fn begin_processing(&self, import_id: i32) -> Result<(), ImportError> {
        self.transition(import_id, ImportStatus::Processing, None, None)
            .await
    }

    async fn record_progress(&self, import_id: i32, processed: u64) -> Result<(), ImportError> {
        let mut state = self.state.lock().await;
        state.checkpoints.push(processed);
        if let Some(import) = state.imports.get_mut(&import_id) {
            if import.status == ImportStatus::Processing {
                let clamped = (processed as i64).min(import.total_rows);
                import.processed_rows = import.processed_rows.max(clamped);
            }
        }
        Ok(())
    }

    async fn complete(&self, import_id: i32, processed: u64) -> Result<(), ImportError> {
        self.transition(import_id, ImportStatus::Completed, Some(processed), None)
            .await
    }

    async fn fail(&self, import_id: i32, error: &str) -> Result<(), ImportError> {
        self.transition(import_id, ImportStatus::Failed, None, Some(error))
            .await
    }

    async fn capabilities(&self) -> Result<BackendCapabilities, ImportError> {
        Ok(self.capabilities)
    }

    async fn resolve_or_create_customer(
        &self,
        customer_id: &str,
    ) -> Result<Customer, ImportError> {
        let mut state = self.state.lock().await;
        state.customer_resolutions += 1;
        state.customers.insert(customer_id.to_string());
        Ok(Customer {
            customer_id: customer_id.to_string(),
            name: customer_id.to_string(),
            email: String::new(),
        })
    }

    async fn insert_shipments(&self, batch: &ShipmentsData) -> Result<u64, ImportError> {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for shipment in batch.rows() {
            if !state.shipments.contains_key(&shipment.shipment_id) {
                state.shipments.insert(shipment.shipment_id.clone(), shipment);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn copy_csv(&self, source: &CsvSource) -> Result<u64, ImportError> {
        self.state.lock().await.copy_calls += 1;
        if let Some(message) = &self.copy_failure {
            return Err(ImportError::BulkTransfer(message.clone()));
        }

        let mut rows = source.rows().await?;
        let mut converted = Vec::new();
        while let Some(row) = rows.next_row().await? {
            converted.push(convert_row(&row)?);
        }

        let mut state = self.state.lock().await;
        for shipment in &converted {
            if let Some(customer_id) = &shipment.customer_id {
                state.customers.insert(customer_id.clone());
            }
        }
        for shipment in converted.iter().cloned() {
            state
                .shipments
                .entry(shipment.shipment_id.clone())
                .or_insert(shipment);
        }
        Ok(converted.len() as u64)
    }
}
