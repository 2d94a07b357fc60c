//! Copies reservation assignments from the query service into the store.

use runwatch_protocol::remote::TableRow;
use runwatch_protocol::{QueryResponse, Reservation};
use runwatch_store::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::remote::QueryService;

/// Accepted column names for the slot count.
const SLOT_COLUMNS: [&str; 2] = ["slot_count", "reservation_slot"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub rows: usize,
    pub written: usize,
    /// Rows missing a field or carrying an unparseable slot count.
    pub skipped: usize,
    /// Rows the store refused.
    pub failed: usize,
}

pub struct ReservationSync {
    remote: Arc<dyn QueryService>,
    store: StateStore,
    billing_project: String,
    query: String,
}

impl ReservationSync {
    pub fn new(
        remote: Arc<dyn QueryService>,
        store: StateStore,
        billing_project: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            store,
            billing_project: billing_project.into(),
            query: query.into(),
        }
    }

    /// Run the reservation query and upsert one record per project.
    pub async fn sync(&self) -> Result<SyncSummary> {
        let response = self
            .remote
            .run_query(&self.billing_project, &self.query)
            .await?;

        let mut summary = SyncSummary {
            rows: response.rows.len(),
            ..Default::default()
        };
        for (index, row) in response.rows.iter().enumerate() {
            let Some(reservation) = reservation_from_row(&response, row) else {
                warn!(row = index, "Skipping malformed reservation row");
                summary.skipped += 1;
                continue;
            };
            match self.store.reservations().put(&reservation).await {
                Ok(()) => {
                    debug!(
                        project_id = %reservation.project_id,
                        reservation_id = %reservation.reservation_id,
                        "Reservation stored"
                    );
                    summary.written += 1;
                }
                Err(err) => {
                    warn!(project_id = %reservation.project_id, error = %err, "Reservation write failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            rows = summary.rows,
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            "Reservation sync finished"
        );
        Ok(summary)
    }
}

fn reservation_from_row(response: &QueryResponse, row: &TableRow) -> Option<Reservation> {
    let reservation_id = response
        .cell(row, "reservation_id")
        .filter(|id| !id.is_empty())?;
    let project_id = response.cell(row, "project_id").filter(|id| !id.is_empty())?;
    let slots = SLOT_COLUMNS
        .iter()
        .find_map(|column| response.cell(row, column))?;
    // Slot counts may come back as FLOAT64 text.
    let slot_count = slots
        .parse::<i64>()
        .ok()
        .or_else(|| slots.parse::<f64>().ok().map(|v| v as i64))?;
    Some(Reservation {
        reservation_id,
        project_id,
        slot_count,
    })
}
