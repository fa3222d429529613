//! HTTP handlers. Each module exposes its routes grouped by the access
//! categories they require; the workflow rules themselves live in
//! `crate::services`.

pub mod assessments;
pub mod catalog;
pub mod common;
pub mod enrollments;
pub mod payments;

use crate::config::WorkflowConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{AssessmentService, CatalogService, EnrollmentService, PaymentService};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub enrollments: Arc<EnrollmentService>,
    pub assessments: Arc<AssessmentService>,
    pub payments: Arc<PaymentService>,
    pub catalog: Arc<CatalogService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            enrollments: Arc::new(EnrollmentService::new(
                db_pool.clone(),
                event_sender.clone(),
                workflow.clone(),
            )),
            assessments: Arc::new(AssessmentService::new(
                db_pool.clone(),
                event_sender.clone(),
                workflow.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool.clone(),
                event_sender,
                workflow,
            )),
            catalog: Arc::new(CatalogService::new(db_pool)),
        }
    }
}
