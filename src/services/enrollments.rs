//! Enrollment workflow: a student's subject selection for one term.
//!
//! ```text
//! pending --approve--> approved
//!    \----reject-----> rejected
//! ```
//! `completed` is set by end-of-term processing elsewhere. Each enrolled
//! subject has its own `enrolled -> dropped` lifecycle, and every join or drop
//! moves the schedule's seat count in the same transaction.

use crate::auth::{AuthUser, Role};
use crate::config::WorkflowConfig;
use crate::entities::{
    enrolled_subject::{self, EnrolledSubjectStatus},
    enrollment::{self, EnrollmentStatus},
    schedule, student, subject,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::capacity;
use crate::services::scope::{enrollment_scope_condition, student_profile, RecordScope};
use crate::services::{ensure_transitioned, Page};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait, UpdateMany,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateEnrollmentRequest {
    /// Student profile id. Required for staff, ignored for students.
    pub student: Option<Uuid>,
    #[validate(length(min = 4, max = 20, message = "academic_year must be 4 to 20 characters"))]
    #[schema(example = "2024-2025")]
    pub academic_year: String,
    #[validate(range(min = 1, max = 2, message = "semester must be 1 or 2"))]
    pub semester: i32,
    #[serde(default)]
    pub schedule_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct RejectEnrollmentRequest {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnrolledSubjectResponse {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub subject_code: String,
    pub subject_title: String,
    pub units: i32,
    pub section: String,
    pub status: EnrolledSubjectStatus,
    pub grade: Option<Decimal>,
    pub enrolled_at: DateTime<Utc>,
    pub dropped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnrollmentResponse {
    pub id: Uuid,
    pub student_id: Uuid,
    pub academic_year: String,
    pub semester: i32,
    pub status: EnrollmentStatus,
    pub total_units: i32,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: String,
    pub subjects: Vec<EnrolledSubjectResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Drops repeated ids while keeping the caller's order
fn unique_schedule_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[derive(Clone)]
pub struct EnrollmentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    workflow: WorkflowConfig,
}

impl EnrollmentService {
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

    /// Creates an enrollment and seats the student in each listed schedule.
    ///
    /// Unknown schedule ids are skipped unless `strict_schedule_ids` is set,
    /// in which case the whole creation fails and nothing is written.
    #[instrument(skip(self, request), fields(user_id = %caller.user_id))]
    pub async fn create_enrollment(
        &self,
        caller: &AuthUser,
        request: CreateEnrollmentRequest,
    ) -> Result<EnrollmentResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let student_id = match caller.role {
            Some(Role::Student) => student_profile(&txn, caller.user_id)
                .await?
                .map(|p| p.id)
                .ok_or_else(|| ServiceError::NotFound("Student profile not found".to_string()))?,
            _ => {
                let id = request.student.ok_or_else(|| {
                    ServiceError::ValidationError("student is required".to_string())
                })?;
                student::Entity::find_by_id(id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("Student {} not found", id)))?
                    .id
            }
        };

        let duplicate = enrollment::Entity::find()
            .filter(enrollment::Column::StudentId.eq(student_id))
            .filter(enrollment::Column::AcademicYear.eq(request.academic_year.as_str()))
            .filter(enrollment::Column::Semester.eq(request.semester))
            .one(&txn)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Student already has an enrollment for {} semester {}",
                request.academic_year, request.semester
            )));
        }

        let now = Utc::now();
        let enrollment_id = Uuid::new_v4();
        let conflict_msg = "Enrollment for this term already exists";

        let created = enrollment::ActiveModel {
            id: Set(enrollment_id),
            student_id: Set(student_id),
            academic_year: Set(request.academic_year.clone()),
            semester: Set(request.semester),
            status: Set(EnrollmentStatus::Pending),
            total_units: Set(0),
            approved_by: Set(None),
            approved_at: Set(None),
            rejection_reason: Set(String::new()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::from_db_with_conflict(e, conflict_msg))?;

        let mut total_units = 0;
        let mut seated = 0usize;

        for schedule_id in unique_schedule_ids(&request.schedule_ids) {
            let Some((offering, Some(course))) = schedule::Entity::find_by_id(schedule_id)
                .find_also_related(subject::Entity)
                .one(&txn)
                .await?
            else {
                if self.workflow.strict_schedule_ids {
                    return Err(ServiceError::NotFound(format!(
                        "Schedule {} not found",
                        schedule_id
                    )));
                }
                warn!(%enrollment_id, %schedule_id, "skipping unknown schedule");
                continue;
            };

            enrolled_subject::ActiveModel {
                id: Set(Uuid::new_v4()),
                enrollment_id: Set(enrollment_id),
                schedule_id: Set(offering.id),
                status: Set(EnrolledSubjectStatus::Enrolled),
                grade: Set(None),
                enrolled_at: Set(now),
                dropped_at: Set(None),
            }
            .insert(&txn)
            .await?;

            capacity::join(&txn, offering.id, self.workflow.enforce_capacity).await?;

            total_units += course.units;
            seated += 1;
        }

        let mut active: enrollment::ActiveModel = created.into();
        active.total_units = Set(total_units);
        active.update(&txn).await?;

        txn.commit()
            .await
            .map_err(|e| ServiceError::from_db_with_conflict(e, conflict_msg))?;

        counter!("enrollment_workflow.enrollments_created", 1);
        self.event_sender
            .send_or_log(Event::EnrollmentCreated {
                enrollment_id,
                student_id,
                subject_count: seated,
                total_units,
            })
            .await;

        info!(
            %enrollment_id,
            %student_id,
            subjects = seated,
            total_units,
            "Enrollment created"
        );

        self.load(enrollment_id).await
    }

    /// Registrar approval; `approved_by` is the caller.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn approve_enrollment(
        &self,
        caller: &AuthUser,
        enrollment_id: Uuid,
    ) -> Result<EnrollmentResponse, ServiceError> {
        require_registrar(caller, "approve")?;

        let txn = self.db.begin().await?;
        let current = find_enrollment(&txn, enrollment_id).await?;
        self.guard_pending(&current)?;

        let now = Utc::now();
        let flip = self
            .status_update(current.id)
            .col_expr(enrollment::Column::Status, Expr::value(EnrollmentStatus::Approved))
            .col_expr(enrollment::Column::ApprovedBy, Expr::value(Some(caller.user_id)))
            .col_expr(enrollment::Column::ApprovedAt, Expr::value(Some(now)))
            .col_expr(enrollment::Column::UpdatedAt, Expr::value(now))
            .exec(&txn)
            .await?;
        ensure_transitioned(flip, "Enrollment")?;

        txn.commit().await?;

        counter!("enrollment_workflow.enrollments_approved", 1);
        self.event_sender
            .send_or_log(Event::EnrollmentApproved {
                enrollment_id,
                approved_by: caller.user_id,
            })
            .await;
        info!(%enrollment_id, approved_by = %caller.user_id, "Enrollment approved");

        self.load(enrollment_id).await
    }

    #[instrument(skip(self, request), fields(user_id = %caller.user_id))]
    pub async fn reject_enrollment(
        &self,
        caller: &AuthUser,
        enrollment_id: Uuid,
        request: RejectEnrollmentRequest,
    ) -> Result<EnrollmentResponse, ServiceError> {
        require_registrar(caller, "reject")?;

        let txn = self.db.begin().await?;
        let current = find_enrollment(&txn, enrollment_id).await?;
        self.guard_pending(&current)?;

        let flip = self
            .status_update(current.id)
            .col_expr(enrollment::Column::Status, Expr::value(EnrollmentStatus::Rejected))
            .col_expr(
                enrollment::Column::RejectionReason,
                Expr::value(request.reason.clone()),
            )
            .col_expr(enrollment::Column::UpdatedAt, Expr::value(Utc::now()))
            .exec(&txn)
            .await?;
        ensure_transitioned(flip, "Enrollment")?;

        txn.commit().await?;

        counter!("enrollment_workflow.enrollments_rejected", 1);
        self.event_sender
            .send_or_log(Event::EnrollmentRejected {
                enrollment_id,
                reason: request.reason,
            })
            .await;
        info!(%enrollment_id, "Enrollment rejected");

        self.load(enrollment_id).await
    }

    /// Drops one enrolled subject, frees its seat and removes its units from
    /// the enrollment total. The enrollment's own status is not consulted.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn drop_subject(
        &self,
        caller: &AuthUser,
        enrollment_id: Uuid,
        enrolled_subject_id: Uuid,
    ) -> Result<EnrollmentResponse, ServiceError> {
        let txn = self.db.begin().await?;
        let scope = RecordScope::resolve(&txn, caller).await?;

        let parent = enrollment::Entity::find_by_id(enrollment_id)
            .filter(enrollment_scope_condition(&scope))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Enrollment {} not found", enrollment_id)))?;

        let row = enrolled_subject::Entity::find_by_id(enrolled_subject_id)
            .filter(enrolled_subject::Column::EnrollmentId.eq(parent.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Enrolled subject not found".to_string()))?;

        if self.workflow.guard_transitions && row.status != EnrolledSubjectStatus::Enrolled {
            return Err(ServiceError::InvalidStatus(format!(
                "Subject is {:?} and cannot be dropped",
                row.status
            )));
        }

        let units = schedule::Entity::find_by_id(row.schedule_id)
            .find_also_related(subject::Entity)
            .one(&txn)
            .await?
            .and_then(|(_, course)| course)
            .map(|course| course.units)
            .ok_or_else(|| {
                ServiceError::InternalError(format!("Schedule {} has no subject", row.schedule_id))
            })?;

        // Only the transaction whose guarded UPDATE flips the row may free the
        // seat and the units.
        let schedule_id = row.schedule_id;
        let now = Utc::now();
        let mut flip = enrolled_subject::Entity::update_many()
            .col_expr(
                enrolled_subject::Column::Status,
                Expr::value(EnrolledSubjectStatus::Dropped),
            )
            .col_expr(enrolled_subject::Column::DroppedAt, Expr::value(Some(now)))
            .filter(enrolled_subject::Column::Id.eq(row.id));
        if self.workflow.guard_transitions {
            flip = flip
                .filter(enrolled_subject::Column::Status.eq(EnrolledSubjectStatus::Enrolled));
        }
        ensure_transitioned(flip.exec(&txn).await?, "Enrolled subject")?;

        capacity::leave(&txn, schedule_id).await?;

        enrollment::Entity::update_many()
            .col_expr(
                enrollment::Column::TotalUnits,
                Expr::col(enrollment::Column::TotalUnits).sub(units),
            )
            .col_expr(enrollment::Column::UpdatedAt, Expr::value(now))
            .filter(enrollment::Column::Id.eq(parent.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        counter!("enrollment_workflow.subjects_dropped", 1);
        self.event_sender
            .send_or_log(Event::SubjectDropped {
                enrollment_id,
                schedule_id,
            })
            .await;
        info!(%enrollment_id, %schedule_id, units, "Subject dropped");

        self.load(enrollment_id).await
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_enrollment(
        &self,
        caller: &AuthUser,
        enrollment_id: Uuid,
    ) -> Result<EnrollmentResponse, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        let found = enrollment::Entity::find_by_id(enrollment_id)
            .filter(enrollment_scope_condition(&scope))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Enrollment {} not found", enrollment_id)))?;

        hydrate(db, vec![found])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InternalError("enrollment vanished".to_string()))
    }

    /// The caller's pending or approved enrollment
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn current_enrollment(
        &self,
        caller: &AuthUser,
    ) -> Result<EnrollmentResponse, ServiceError> {
        let db = &*self.db;
        let profile = student_profile(db, caller.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Student profile not found".to_string()))?;

        let found = enrollment::Entity::find()
            .filter(enrollment::Column::StudentId.eq(profile.id))
            .filter(
                enrollment::Column::Status
                    .is_in([EnrollmentStatus::Pending, EnrollmentStatus::Approved]),
            )
            .order_by_desc(enrollment::Column::CreatedAt)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active enrollment found".to_string()))?;

        hydrate(db, vec![found])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InternalError("enrollment vanished".to_string()))
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_enrollments(
        &self,
        caller: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<Page<EnrollmentResponse>, ServiceError> {
        let db = &*self.db;
        let scope = RecordScope::resolve(db, caller).await?;

        let paginator = enrollment::Entity::find()
            .filter(enrollment_scope_condition(&scope))
            .order_by_desc(enrollment::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(Page::new(hydrate(db, rows).await?, total, page, per_page))
    }

    async fn load(&self, enrollment_id: Uuid) -> Result<EnrollmentResponse, ServiceError> {
        let db = &*self.db;
        let found = find_enrollment(db, enrollment_id).await?;
        hydrate(db, vec![found])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InternalError("enrollment vanished".to_string()))
    }

    /// `UPDATE enrollments` for one row, restricted to `pending` while
    /// transitions are guarded
    fn status_update(&self, enrollment_id: Uuid) -> UpdateMany<enrollment::Entity> {
        let update =
            enrollment::Entity::update_many().filter(enrollment::Column::Id.eq(enrollment_id));
        if self.workflow.guard_transitions {
            update.filter(enrollment::Column::Status.eq(EnrollmentStatus::Pending))
        } else {
            update
        }
    }

    fn guard_pending(&self, current: &enrollment::Model) -> Result<(), ServiceError> {
        if self.workflow.guard_transitions && current.status != EnrollmentStatus::Pending {
            return Err(ServiceError::InvalidStatus(format!(
                "Enrollment {} is {:?}, expected Pending",
                current.id, current.status
            )));
        }
        Ok(())
    }
}

fn require_registrar(caller: &AuthUser, action: &str) -> Result<(), ServiceError> {
    if caller.has_role(Role::Registrar) {
        return Ok(());
    }
    warn!(user_id = %caller.user_id, role = ?caller.role, action, "enrollment transition denied");
    Err(ServiceError::Forbidden(format!(
        "only the registrar can {} enrollments",
        action
    )))
}

async fn find_enrollment<C>(conn: &C, enrollment_id: Uuid) -> Result<enrollment::Model, ServiceError>
where
    C: ConnectionTrait,
{
    enrollment::Entity::find_by_id(enrollment_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Enrollment {} not found", enrollment_id)))
}

/// Attaches subject rows to a batch of enrollments with three queries total
async fn hydrate<C>(
    conn: &C,
    enrollments: Vec<enrollment::Model>,
) -> Result<Vec<EnrollmentResponse>, ServiceError>
where
    C: ConnectionTrait,
{
    let ids: Vec<Uuid> = enrollments.iter().map(|e| e.id).collect();

    let rows = enrolled_subject::Entity::find()
        .filter(enrolled_subject::Column::EnrollmentId.is_in(ids))
        .order_by_asc(enrolled_subject::Column::EnrolledAt)
        .find_also_related(schedule::Entity)
        .all(conn)
        .await?;

    let subject_ids: HashSet<Uuid> = rows
        .iter()
        .filter_map(|(_, offering)| offering.as_ref().map(|s| s.subject_id))
        .collect();
    let courses: HashMap<Uuid, subject::Model> = subject::Entity::find()
        .filter(subject::Column::Id.is_in(subject_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut by_enrollment: HashMap<Uuid, Vec<EnrolledSubjectResponse>> = HashMap::new();
    for (row, offering) in rows {
        let offering = offering.ok_or_else(|| {
            ServiceError::InternalError(format!("Schedule {} missing", row.schedule_id))
        })?;
        let course = courses.get(&offering.subject_id).ok_or_else(|| {
            ServiceError::InternalError(format!("Subject {} missing", offering.subject_id))
        })?;

        by_enrollment
            .entry(row.enrollment_id)
            .or_default()
            .push(EnrolledSubjectResponse {
                id: row.id,
                schedule_id: row.schedule_id,
                subject_code: course.code.clone(),
                subject_title: course.title.clone(),
                units: course.units,
                section: offering.section.clone(),
                status: row.status,
                grade: row.grade,
                enrolled_at: row.enrolled_at,
                dropped_at: row.dropped_at,
            });
    }

    Ok(enrollments
        .into_iter()
        .map(|e| EnrollmentResponse {
            subjects: by_enrollment.remove(&e.id).unwrap_or_default(),
            id: e.id,
            student_id: e.student_id,
            academic_year: e.academic_year,
            semester: e.semester,
            status: e.status,
            total_units: e.total_units,
            approved_by: e.approved_by,
            approved_at: e.approved_at,
            rejection_reason: e.rejection_reason,
            created_at: e.created_at,
            updated_at: e.updated_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_schedule_ids_are_collapsed_in_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(unique_schedule_ids(&[a, b, a, a, b]), vec![a, b]);
        assert!(unique_schedule_ids(&[]).is_empty());
    }

    #[test]
    fn only_registrar_passes_the_transition_check() {
        let mut caller = AuthUser {
            user_id: Uuid::new_v4(),
            name: None,
            role: Some(Role::Registrar),
            token_id: "t".into(),
        };
        assert!(require_registrar(&caller, "approve").is_ok());

        for role in [Role::Admin, Role::Cashier, Role::Faculty, Role::Student] {
            caller.role = Some(role);
            assert!(matches!(
                require_registrar(&caller, "approve"),
                Err(ServiceError::Forbidden(_))
            ));
        }
    }
}
