//! Alert and ticket dispatch for assessed detections.
//!
//! Dispatch failures are captured as [`StageFailure`] records on the
//! returned [`DispatchRecord`]; they never abort a run and are never retried.

mod alert;
mod ticket;

pub use alert::{
    AlertChannel, AlertSettings, ChannelSettings, DeliveryState, DeliveryStatus, LogNotifier,
    Notifier, Recipient, ALERT_SUBJECT,
};
pub use ticket::{work_order_for, TicketSink};

use serde::{Deserialize, Serialize};

use crate::error::{Stage, StageFailure};
use crate::scoring::ThreatLevel;
use crate::storage::TicketId;
use crate::{CandidateId, DetectionResult};

/// Minimum threat levels that trigger each dispatch action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    pub alert_min_level: ThreatLevel,
    pub ticket_min_level: ThreatLevel,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            alert_min_level: ThreatLevel::High,
            ticket_min_level: ThreatLevel::High,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub candidate_id: CandidateId,
    pub level: ThreatLevel,
    pub alerted: bool,
    pub deliveries: Vec<DeliveryStatus>,
    pub ticket: Option<TicketId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StageFailure>,
}

pub struct Dispatcher {
    settings: DispatchSettings,
    recipients: Vec<Recipient>,
    notifier: Box<dyn Notifier>,
    tickets: Option<Box<dyn TicketSink>>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        recipients: Vec<Recipient>,
        notifier: Box<dyn Notifier>,
        tickets: Option<Box<dyn TicketSink>>,
    ) -> Self {
        Self {
            settings,
            recipients,
            notifier,
            tickets,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Alert and/or ticket one result. `None` when it is below both levels.
    pub fn dispatch(
        &mut self,
        result: &DetectionResult,
        evidence: Option<&str>,
    ) -> Option<DispatchRecord> {
        let level = result.assessment.level;
        let wants_alert = level >= self.settings.alert_min_level;
        let wants_ticket = level >= self.settings.ticket_min_level && self.tickets.is_some();
        if !wants_alert && !wants_ticket {
            return None;
        }

        let mut record = DispatchRecord {
            candidate_id: result.candidate.id,
            level,
            alerted: false,
            deliveries: Vec::new(),
            ticket: None,
            failures: Vec::new(),
        };

        if wants_alert {
            let message = result.headline();
            match self.notifier.notify(&message, &self.recipients, evidence) {
                Ok(deliveries) => {
                    for d in deliveries.iter().filter(|d| d.state == DeliveryState::Failed) {
                        log::warn!(
                            "alert via {} failed for candidate {}: {}",
                            d.channel,
                            result.candidate.id,
                            d.detail.as_deref().unwrap_or("no detail")
                        );
                    }
                    record.alerted = deliveries
                        .iter()
                        .any(|d| d.state == DeliveryState::Delivered);
                    record.deliveries = deliveries;
                }
                Err(e) => {
                    log::warn!(
                        "notifier {} failed for candidate {}: {:#}",
                        self.notifier.name(),
                        result.candidate.id,
                        e
                    );
                    record.failures.push(StageFailure::new(
                        &result.run_id,
                        Some(result.candidate.id),
                        Stage::Alert,
                        &e,
                    ));
                }
            }
        }

        if wants_ticket {
            if let Some(sink) = self.tickets.as_mut() {
                match sink.create_ticket(result, evidence) {
                    Ok(id) => record.ticket = Some(id),
                    Err(e) => {
                        log::warn!(
                            "ticket sink {} failed for candidate {}: {:#}",
                            sink.name(),
                            result.candidate.id,
                            e
                        );
                        record.failures.push(StageFailure::new(
                            &result.run_id,
                            Some(result.candidate.id),
                            Stage::Ticket,
                            &e,
                        ));
                    }
                }
            }
        }

        Some(record)
    }
}
