//! Payment ledger.
//!
//! Payments are recorded as `pending` by whoever receives them and confirmed
//! or cancelled by a cashier. Confirmation re-sums the confirmed payments of
//! the parent assessment and closes it as `paid` once the net amount is
//! covered. Closing is one-directional.

use crate::auth::{AuthUser, Role};
use crate::config::WorkflowConfig;
use crate::entities::{
    assessment::{self, AssessmentStatus},
    payment::{self, PaymentMethod, PaymentStatus},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::scope::{assessment_scope_condition, payment_scope_condition, RecordScope};
use crate::services::{check_money, ensure_transitioned, Page};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    pub assessment: Uuid,
    #[schema(value_type = String, example = "3000.00")]
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub reference_number: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct PaymentFilter {
    /// Only payments for this assessment
    pub assessment: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub assessment_id: Uuid,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub reference_number: String,
    pub status: PaymentStatus,
    pub received_by: Uuid,
    pub notes: String,
    pub payment_date: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<payment::Model> for PaymentResponse {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            assessment_id: model.assessment_id,
            amount: model.amount,
            payment_method: model.payment_method,
            reference_number: model.reference_number,
            status: model.status,
            received_by: model.received_by,
            notes: model.notes,
            payment_date: model.payment_date,
            confirmed_at: model.confirmed_at,
            cancelled_at: model.cancelled_at,
        }
    }
}

/// Whether the confirmed total covers the bill. Overpayment also settles it.
pub fn is_settled(confirmed_total: Decimal, net_amount: Decimal) -> bool {
    confirmed_total >= net_amount
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    workflow: WorkflowConfig,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            workflow,
        }
    }

    /// Records a pending payment; `received_by` is the caller. Students can
    /// only pay toward their own assessments.
    #[instrument(skip(self, request), fields(user_id = %caller.user_id))]
    pub async fn create_payment(
        &self,
        caller: &AuthUser,
        request: CreatePaymentRequest,
    ) -> Result<PaymentResponse, ServiceError> {
        let amount = check_money("amount", request.amount)?;
        if amount.is_zero() {
            return Err(ServiceError::ValidationError(
                "amount must be greater than zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let scope = RecordScope::resolve(&txn, caller).await?;

        let target = assessment::Entity::find_by_id(request.assessment)
            .filter(assessment_scope_condition(&scope))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Assessment {} not found", request.assessment))
            })?;

        let payment_id = Uuid::new_v4();
        let created = payment::ActiveModel {
            id: Set(payment_id),
            assessment_id: Set(target.id),
            amount: Set(amount),
            payment_method: Set(request.payment_method),
            reference_number: Set(request.reference_number),
            status: Set(PaymentStatus::Pending),
            received_by: Set(caller.user_id),
            notes: Set(request.notes),
            payment_date: Set(Utc::now()),
            confirmed_at: Set(None),
            cancelled_at: Set(None),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        counter!("enrollment_workflow.payments_recorded", 1);
        self.event_sender
            .send_or_log(Event::PaymentRecorded {
                payment_id,
                assessment_id: target.id,
                amount,
            })
            .await;
        info!(%payment_id, assessment_id = %target.id, %amount, "Payment recorded");

        Ok(created.into())
    }

    /// Cashier confirmation, possibly closing the parent assessment
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn confirm_payment(
        &self,
        caller: &AuthUser,
        payment_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        require_cashier(caller, "confirm")?;

        let txn = self.db.begin().await?;
        let current = find_payment(&txn, payment_id).await?;

        if self.workflow.guard_transitions && current.status != PaymentStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Payment {} is {:?}, expected Pending",
                payment_id, current.status
            )));
        }

        // Confirmations of sibling payments serialize on the assessment row,
        // so each one sums the others' committed confirmations.
        let assessment_id = current.assessment_id;
        let parent = assessment::Entity::find_by_id(assessment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Assessment {} not found", assessment_id)))?;

        let now = Utc::now();
        let mut flip = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Confirmed))
            .col_expr(payment::Column::ConfirmedAt, Expr::value(Some(now)))
            .filter(payment::Column::Id.eq(payment_id));
        if self.workflow.guard_transitions {
            flip = flip.filter(payment::Column::Status.eq(PaymentStatus::Pending));
        }
        ensure_transitioned(flip.exec(&txn).await?, "Payment")?;

        let confirmed_total: Decimal = payment::Entity::find()
            .filter(payment::Column::AssessmentId.eq(assessment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Confirmed))
            .all(&txn)
            .await?
            .iter()
            .map(|p| p.amount)
            .sum();

        let closes = is_settled(confirmed_total, parent.net_amount)
            && parent.status != AssessmentStatus::Paid;
        if closes {
            let mut active: assessment::ActiveModel = parent.into();
            active.status = Set(AssessmentStatus::Paid);
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }

        let confirmed = find_payment(&txn, payment_id).await?;
        txn.commit().await?;

        counter!("enrollment_workflow.payments_confirmed", 1);
        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                payment_id,
                assessment_id,
            })
            .await;
        info!(%payment_id, %assessment_id, %confirmed_total, "Payment confirmed");

        if closes {
            counter!("enrollment_workflow.assessments_paid", 1);
            self.event_sender
                .send_or_log(Event::AssessmentPaid {
                    assessment_id,
                    total_paid: confirmed_total,
                })
                .await;
            info!(%assessment_id, %confirmed_total, "Assessment fully paid");
        }

        Ok(confirmed.into())
    }

    /// Cashier cancellation of a payment that has not been confirmed
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn cancel_payment(
        &self,
        caller: &AuthUser,
        payment_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        require_cashier(caller, "cancel")?;

        let txn = self.db.begin().await?;
        let current = find_payment(&txn, payment_id).await?;

        if current.status != PaymentStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Payment {} is {:?}; only pending payments can be cancelled",
                payment_id, current.status
            )));
        }

        let assessment_id = current.assessment_id;
        let flip = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Cancelled))
            .col_expr(payment::Column::CancelledAt, Expr::value(Some(Utc::now())))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;
        ensure_transitioned(flip, "Payment")?;
        let cancelled = find_payment(&txn, payment_id).await?;

        txn.commit().await?;

        counter!("enrollment_workflow.payments_cancelled", 1);
        self.event_sender
            .send_or_log(Event::PaymentCancelled {
                payment_id,
                assessment_id,
            })
            .await;
        info!(%payment_id, %assessment_id, "Payment cancelled");

        Ok(cancelled.into())
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_payment(
        &self,
        caller: &AuthUser,
        payment_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        payment::Entity::find_by_id(payment_id)
            .filter(payment_scope_condition(&scope))
            .one(db)
            .await?
            .map(PaymentResponse::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_payments(
        &self,
        caller: &AuthUser,
        filter: PaymentFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Page<PaymentResponse>, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        let mut query = payment::Entity::find().filter(payment_scope_condition(&scope));
        if let Some(assessment_id) = filter.assessment {
            query = query.filter(payment::Column::AssessmentId.eq(assessment_id));
        }

        let paginator = query
            .order_by_desc(payment::Column::PaymentDate)
            .paginate(db, per_page);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(Page::new(
            rows.into_iter().map(PaymentResponse::from).collect(),
            total,
            page,
            per_page,
        ))
    }
}

fn require_cashier(caller: &AuthUser, action: &str) -> Result<(), ServiceError> {
    if caller.has_role(Role::Cashier) {
        return Ok(());
    }
    warn!(user_id = %caller.user_id, role = ?caller.role, action, "payment transition denied");
    Err(ServiceError::Forbidden(format!(
        "only cashiers can {} payments",
        action
    )))
}

async fn find_payment<C>(conn: &C, payment_id: Uuid) -> Result<payment::Model, ServiceError>
where
    C: ConnectionTrait,
{
    payment::Entity::find_by_id(payment_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
}
