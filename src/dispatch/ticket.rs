use anyhow::Result;

use crate::storage::{
    InMemoryWorkOrderStore, NewWorkOrder, SqliteWorkOrderStore, TicketId, WorkOrderStore,
};
use crate::DetectionResult;

/// Ticketing collaborator: one work order per dispatched detection.
pub trait TicketSink {
    fn name(&self) -> &'static str;

    fn create_ticket(&mut self, result: &DetectionResult, evidence: Option<&str>)
        -> Result<TicketId>;
}

/// Work order fields derived from a detection.
pub fn work_order_for(result: &DetectionResult, evidence: Option<&str>) -> NewWorkOrder {
    NewWorkOrder {
        title: format!("Encroachment detected: {}", result.encroachment_type),
        description: format!(
            "{} [run {} candidate {}; {}]",
            result.headline(),
            result.run_id,
            result.candidate.id,
            result.compliance.details()
        ),
        priority: result.assessment.level,
        latitude: result.geocoordinates.map(|p| p.lat),
        longitude: result.geocoordinates.map(|p| p.lon),
        evidence: evidence.map(str::to_string),
    }
}

impl TicketSink for SqliteWorkOrderStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn create_ticket(
        &mut self,
        result: &DetectionResult,
        evidence: Option<&str>,
    ) -> Result<TicketId> {
        let id = self.create(&work_order_for(result, evidence), result.timestamp_s)?;
        log::info!("created work order {} for candidate {}", id, result.candidate.id);
        Ok(id)
    }
}

impl TicketSink for InMemoryWorkOrderStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_ticket(
        &mut self,
        result: &DetectionResult,
        evidence: Option<&str>,
    ) -> Result<TicketId> {
        self.create(&work_order_for(result, evidence), result.timestamp_s)
    }
}
