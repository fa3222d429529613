//! Assessment workflow: the fee bill for one approved enrollment.
//!
//! `pending -> approved -> paid`. `paid` is normally reached through payment
//! confirmation rather than an explicit call.

use crate::auth::{AuthUser, Role};
use crate::config::WorkflowConfig;
use crate::entities::{
    assessment::{self, AssessmentStatus},
    assessment_item,
    enrollment::{self, EnrollmentStatus},
    fee_item,
    payment::{self, PaymentStatus},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::scope::{assessment_scope_condition, enrollment_scope_condition, RecordScope};
use crate::services::{check_money, ensure_transitioned, Page};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const MAX_ITEM_QUANTITY: i32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssessmentItemRequest {
    pub fee_item_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateAssessmentRequest {
    pub enrollment: Uuid,
    /// Defaults to the sum of `items` when omitted
    #[schema(value_type = Option<String>, example = "5000.00")]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    #[schema(value_type = String, example = "0.00")]
    pub discount_amount: Decimal,
    /// Must equal total minus discount when given
    #[schema(value_type = Option<String>)]
    pub net_amount: Option<Decimal>,
    #[serde(default)]
    #[validate(length(max = 100, message = "at most 100 line items"))]
    pub items: Vec<AssessmentItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssessmentItemResponse {
    pub id: Uuid,
    pub fee_item_id: Uuid,
    pub fee_item_name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssessmentResponse {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    #[schema(value_type = String)]
    pub discount_amount: Decimal,
    #[schema(value_type = String)]
    pub net_amount: Decimal,
    /// Sum of confirmed payments
    #[schema(value_type = String)]
    pub amount_paid: Decimal,
    pub status: AssessmentStatus,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub items: Vec<AssessmentItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Price of one line: fee amount, times units for per-unit fees, times quantity
pub fn line_amount(fee: &fee_item::Model, total_units: i32, quantity: i32) -> Decimal {
    let multiplier = if fee.per_unit {
        Decimal::from(total_units)
    } else {
        Decimal::ONE
    };
    (fee.amount * multiplier * Decimal::from(quantity)).round_dp(2)
}

/// Settles total, discount and net from the request and the priced items.
///
/// Returns `(total, discount, net)`.
pub fn settle_amounts(
    requested_total: Option<Decimal>,
    discount: Decimal,
    requested_net: Option<Decimal>,
    item_sum: Option<Decimal>,
) -> Result<(Decimal, Decimal, Decimal), ServiceError> {
    let requested_total = requested_total
        .map(|total| check_money("total_amount", total))
        .transpose()?;
    let requested_net = requested_net
        .map(|net| check_money("net_amount", net))
        .transpose()?;
    let item_sum = item_sum
        .map(|sum| check_money("line item total", sum))
        .transpose()?;
    let discount = check_money("discount_amount", discount)?;

    let total = match (requested_total, item_sum) {
        (Some(total), Some(sum)) if total != sum => {
            return Err(ServiceError::ValidationError(format!(
                "total_amount {} does not match line item sum {}",
                total, sum
            )))
        }
        (Some(total), _) => total,
        (None, Some(sum)) => sum,
        (None, None) => {
            return Err(ServiceError::ValidationError(
                "total_amount is required when no items are given".to_string(),
            ))
        }
    };

    if discount > total {
        return Err(ServiceError::ValidationError(
            "discount_amount must be between 0 and total_amount".to_string(),
        ));
    }

    let net = total - discount;
    if let Some(requested) = requested_net {
        if requested != net {
            return Err(ServiceError::ValidationError(format!(
                "net_amount {} must equal total_amount - discount_amount ({})",
                requested, net
            )));
        }
    }

    Ok((total, discount, net))
}

#[derive(Clone)]
pub struct AssessmentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    workflow: WorkflowConfig,
}

impl AssessmentService {
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

    #[instrument(skip(self, request), fields(user_id = %caller.user_id))]
    pub async fn create_assessment(
        &self,
        caller: &AuthUser,
        request: CreateAssessmentRequest,
    ) -> Result<AssessmentResponse, ServiceError> {
        if !caller.is_staff() {
            return Err(ServiceError::Forbidden(
                "only staff can create assessments".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let parent = enrollment::Entity::find_by_id(request.enrollment)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Enrollment {} not found", request.enrollment))
            })?;

        if self.workflow.guard_transitions && parent.status != EnrollmentStatus::Approved {
            return Err(ServiceError::InvalidStatus(format!(
                "Enrollment {} is {:?}; only approved enrollments can be assessed",
                parent.id, parent.status
            )));
        }

        let conflict_msg = "An assessment already exists for this enrollment";
        let existing = assessment::Entity::find()
            .filter(assessment::Column::EnrollmentId.eq(parent.id))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(conflict_msg.to_string()));
        }

        let mut priced = Vec::with_capacity(request.items.len());
        for item in &request.items {
            if !(1..=MAX_ITEM_QUANTITY).contains(&item.quantity) {
                return Err(ServiceError::ValidationError(format!(
                    "quantity must be between 1 and {}",
                    MAX_ITEM_QUANTITY
                )));
            }
            let fee = fee_item::Entity::find_by_id(item.fee_item_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Fee item {} not found", item.fee_item_id))
                })?;
            if !fee.is_active {
                return Err(ServiceError::ValidationError(format!(
                    "Fee item {} is inactive",
                    fee.name
                )));
            }
            let amount = line_amount(&fee, parent.total_units, item.quantity);
            priced.push((fee.id, item.quantity, amount));
        }

        let item_sum: Option<Decimal> =
            (!priced.is_empty()).then(|| priced.iter().map(|(_, _, a)| *a).sum());
        let (total, discount, net) = settle_amounts(
            request.total_amount,
            request.discount_amount,
            request.net_amount,
            item_sum,
        )?;

        let now = Utc::now();
        let assessment_id = Uuid::new_v4();
        assessment::ActiveModel {
            id: Set(assessment_id),
            enrollment_id: Set(parent.id),
            total_amount: Set(total),
            discount_amount: Set(discount),
            net_amount: Set(net),
            status: Set(AssessmentStatus::Pending),
            created_by: Set(caller.user_id),
            approved_by: Set(None),
            approved_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_db_with_conflict(e, conflict_msg))?;

        for (fee_item_id, quantity, amount) in priced {
            assessment_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                assessment_id: Set(assessment_id),
                fee_item_id: Set(fee_item_id),
                quantity: Set(quantity),
                amount: Set(amount),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit()
            .await
            .map_err(|e| ServiceError::from_db_with_conflict(e, conflict_msg))?;

        counter!("enrollment_workflow.assessments_created", 1);
        self.event_sender
            .send_or_log(Event::AssessmentCreated {
                assessment_id,
                enrollment_id: parent.id,
                net_amount: net,
            })
            .await;
        info!(%assessment_id, enrollment_id = %parent.id, %net, "Assessment created");

        self.load(assessment_id).await
    }

    /// Registrar or cashier approval
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn approve_assessment(
        &self,
        caller: &AuthUser,
        assessment_id: Uuid,
    ) -> Result<AssessmentResponse, ServiceError> {
        if !(caller.has_role(Role::Registrar) || caller.has_role(Role::Cashier)) {
            warn!(user_id = %caller.user_id, role = ?caller.role, "assessment approval denied");
            return Err(ServiceError::Forbidden(
                "only registrars or cashiers can approve assessments".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let current = assessment::Entity::find_by_id(assessment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Assessment {} not found", assessment_id)))?;

        if self.workflow.guard_transitions && current.status != AssessmentStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Assessment {} is {:?}, expected Pending",
                assessment_id, current.status
            )));
        }

        let now = Utc::now();
        let mut flip = assessment::Entity::update_many()
            .col_expr(assessment::Column::Status, Expr::value(AssessmentStatus::Approved))
            .col_expr(assessment::Column::ApprovedBy, Expr::value(Some(caller.user_id)))
            .col_expr(assessment::Column::ApprovedAt, Expr::value(Some(now)))
            .col_expr(assessment::Column::UpdatedAt, Expr::value(now))
            .filter(assessment::Column::Id.eq(current.id));
        if self.workflow.guard_transitions {
            flip = flip.filter(assessment::Column::Status.eq(AssessmentStatus::Pending));
        }
        ensure_transitioned(flip.exec(&txn).await?, "Assessment")?;

        txn.commit().await?;

        counter!("enrollment_workflow.assessments_approved", 1);
        self.event_sender
            .send_or_log(Event::AssessmentApproved(assessment_id))
            .await;
        info!(%assessment_id, approved_by = %caller.user_id, "Assessment approved");

        self.load(assessment_id).await
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_assessment(
        &self,
        caller: &AuthUser,
        assessment_id: Uuid,
    ) -> Result<AssessmentResponse, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        let found = assessment::Entity::find_by_id(assessment_id)
            .filter(assessment_scope_condition(&scope))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Assessment {} not found", assessment_id)))?;

        single(hydrate(db, vec![found]).await?)
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_by_enrollment(
        &self,
        caller: &AuthUser,
        enrollment_id: Uuid,
    ) -> Result<AssessmentResponse, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        // ownership is checked on the enrollment first so a foreign id and a
        // missing assessment look the same to students
        enrollment::Entity::find_by_id(enrollment_id)
            .filter(enrollment_scope_condition(&scope))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Enrollment {} not found", enrollment_id)))?;

        let found = assessment::Entity::find()
            .filter(assessment::Column::EnrollmentId.eq(enrollment_id))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No assessment for enrollment {}", enrollment_id))
            })?;

        single(hydrate(db, vec![found]).await?)
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_assessments(
        &self,
        caller: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<Page<AssessmentResponse>, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        let paginator = assessment::Entity::find()
            .filter(assessment_scope_condition(&scope))
            .order_by_desc(assessment::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(Page::new(hydrate(db, rows).await?, total, page, per_page))
    }

    async fn load(&self, assessment_id: Uuid) -> Result<AssessmentResponse, ServiceError> {
        let db = &*self.db;
        let found = assessment::Entity::find_by_id(assessment_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Assessment {} not found", assessment_id)))?;
        single(hydrate(db, vec![found]).await?)
    }
}

fn single(mut items: Vec<AssessmentResponse>) -> Result<AssessmentResponse, ServiceError> {
    items
        .pop()
        .ok_or_else(|| ServiceError::InternalError("assessment vanished".to_string()))
}

async fn hydrate<C>(
    conn: &C,
    assessments: Vec<assessment::Model>,
) -> Result<Vec<AssessmentResponse>, ServiceError>
where
    C: ConnectionTrait,
{
    let ids: Vec<Uuid> = assessments.iter().map(|a| a.id).collect();

    let mut items: HashMap<Uuid, Vec<AssessmentItemResponse>> = HashMap::new();
    for (item, fee) in assessment_item::Entity::find()
        .filter(assessment_item::Column::AssessmentId.is_in(ids.clone()))
        .find_also_related(fee_item::Entity)
        .all(conn)
        .await?
    {
        items
            .entry(item.assessment_id)
            .or_default()
            .push(AssessmentItemResponse {
                id: item.id,
                fee_item_id: item.fee_item_id,
                fee_item_name: fee.map(|f| f.name).unwrap_or_default(),
                quantity: item.quantity,
                amount: item.amount,
            });
    }

    let mut paid: HashMap<Uuid, Decimal> = HashMap::new();
    for p in payment::Entity::find()
        .filter(payment::Column::AssessmentId.is_in(ids))
        .filter(payment::Column::Status.eq(PaymentStatus::Confirmed))
        .all(conn)
        .await?
    {
        *paid.entry(p.assessment_id).or_default() += p.amount;
    }

    Ok(assessments
        .into_iter()
        .map(|a| AssessmentResponse {
            items: items.remove(&a.id).unwrap_or_default(),
            amount_paid: paid.get(&a.id).copied().unwrap_or_default(),
            id: a.id,
            enrollment_id: a.enrollment_id,
            total_amount: a.total_amount,
            discount_amount: a.discount_amount,
            net_amount: a.net_amount,
            status: a.status,
            created_by: a.created_by,
            approved_by: a.approved_by,
            approved_at: a.approved_at,
            created_at: a.created_at,
            updated_at: a.updated_at,
        })
        .collect())
}
