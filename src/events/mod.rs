use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted after a workflow transaction commits.
///
/// Delivery is best effort: a full or closed channel never fails the
/// operation that produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    EnrollmentCreated {
        enrollment_id: Uuid,
        student_id: Uuid,
        subject_count: usize,
        total_units: i32,
    },
    EnrollmentApproved {
        enrollment_id: Uuid,
        approved_by: Uuid,
    },
    EnrollmentRejected {
        enrollment_id: Uuid,
        reason: String,
    },
    SubjectDropped {
        enrollment_id: Uuid,
        schedule_id: Uuid,
    },
    AssessmentCreated {
        assessment_id: Uuid,
        enrollment_id: Uuid,
        net_amount: Decimal,
    },
    AssessmentApproved(Uuid),
    AssessmentPaid {
        assessment_id: Uuid,
        total_paid: Decimal,
    },
    PaymentRecorded {
        payment_id: Uuid,
        assessment_id: Uuid,
        amount: Decimal,
    },
    PaymentConfirmed {
        payment_id: Uuid,
        assessment_id: Uuid,
    },
    PaymentCancelled {
        payment_id: Uuid,
        assessment_id: Uuid,
    },
}

impl Event {
    /// Stable name used for logging and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            Event::EnrollmentCreated { .. } => "enrollment_created",
            Event::EnrollmentApproved { .. } => "enrollment_approved",
            Event::EnrollmentRejected { .. } => "enrollment_rejected",
            Event::SubjectDropped { .. } => "subject_dropped",
            Event::AssessmentCreated { .. } => "assessment_created",
            Event::AssessmentApproved(_) => "assessment_approved",
            Event::AssessmentPaid { .. } => "assessment_paid",
            Event::PaymentRecorded { .. } => "payment_recorded",
            Event::PaymentConfirmed { .. } => "payment_confirmed",
            Event::PaymentCancelled { .. } => "payment_cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when nobody is listening
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "event dropped");
            counter!("enrollment_events.dropped", 1);
        }
    }
}

/// Drains the event channel until every sender is gone
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("enrollment_events.processed", 1, "event" => event.name());

        match &event {
            Event::AssessmentPaid {
                assessment_id,
                total_paid,
            } => {
                info!(%assessment_id, %total_paid, "assessment fully paid");
            }
            Event::EnrollmentRejected {
                enrollment_id,
                reason,
            } => {
                info!(%enrollment_id, reason = reason.as_str(), "enrollment rejected");
            }
            other => info!(event = other.name(), payload = ?other, "event received"),
        }
    }

    info!("Event processing loop stopped");
}
