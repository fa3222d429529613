//! Reference data the workflow reads: student profiles, subjects, schedules
//! and fee items. Creation only, plus the open-seat listing students use to
//! pick schedules.

use crate::entities::{
    fee_item::{self, FeeCategory},
    schedule,
    student::{self, StudentStatus},
    subject,
};
use crate::errors::ServiceError;
use crate::services::{capacity, check_money};
use chrono::{NaiveTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Day codes accepted in a schedule's meeting pattern
pub const DAY_CODES: [&str; 6] = ["M", "T", "W", "Th", "F", "S"];

fn validate_days(days: &Vec<String>) -> Result<(), ValidationError> {
    if days.is_empty() {
        let mut err = ValidationError::new("days");
        err.message = Some("at least one meeting day is required".into());
        return Err(err);
    }
    if let Some(bad) = days.iter().find(|d| !DAY_CODES.contains(&d.as_str())) {
        let mut err = ValidationError::new("days");
        err.message = Some(format!("unknown day code '{}'; use M, T, W, Th, F or S", bad).into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateStudentRequest {
    /// Account the profile belongs to
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 20))]
    #[schema(example = "2024-00123")]
    pub student_number: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub middle_name: Option<String>,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub program: String,
    #[serde(default = "default_year_level")]
    #[validate(range(min = 1, max = 5))]
    pub year_level: i32,
}

fn default_year_level() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateSubjectRequest {
    #[validate(length(min = 1, max = 20))]
    #[schema(example = "CS101")]
    pub code: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 1, max = 6))]
    pub units: i32,
    #[validate(range(min = 1, max = 5))]
    pub year_level: i32,
    #[validate(range(min = 1, max = 2))]
    pub semester: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateScheduleRequest {
    pub subject_id: Uuid,
    #[validate(length(min = 1, max = 10))]
    pub section: String,
    #[validate(length(min = 1, max = 200))]
    pub instructor: String,
    #[validate(length(min = 4, max = 20))]
    pub academic_year: String,
    #[validate(range(min = 1, max = 2))]
    pub semester: i32,
    #[validate(custom = "validate_days")]
    #[schema(example = json!(["M", "W", "F"]))]
    pub days: Vec<String>,
    #[schema(value_type = String, example = "08:00:00")]
    pub time_start: NaiveTime,
    #[schema(value_type = String, example = "09:30:00")]
    pub time_end: NaiveTime,
    #[validate(length(min = 1, max = 50))]
    pub room: String,
    #[serde(default = "default_max_slots")]
    #[validate(range(min = 1, max = 500))]
    pub max_slots: i32,
}

fn default_max_slots() -> i32 {
    40
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateFeeItemRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: FeeCategory,
    #[schema(value_type = String, example = "250.00")]
    pub amount: Decimal,
    #[serde(default)]
    pub per_unit: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct AvailableSchedulesQuery {
    pub academic_year: Option<String>,
    pub semester: Option<i32>,
    pub year_level: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduleResponse {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub subject_code: String,
    pub subject_title: String,
    pub units: i32,
    pub section: String,
    pub instructor: String,
    pub academic_year: String,
    pub semester: i32,
    pub days: Vec<String>,
    #[schema(value_type = String)]
    pub time_start: NaiveTime,
    #[schema(value_type = String)]
    pub time_end: NaiveTime,
    pub room: String,
    pub max_slots: i32,
    pub enrolled_count: i32,
    pub available_slots: i32,
}

impl ScheduleResponse {
    fn new(offering: schedule::Model, course: &subject::Model) -> Self {
        Self {
            available_slots: capacity::available_slots(&offering),
            days: offering.day_codes(),
            id: offering.id,
            subject_id: offering.subject_id,
            subject_code: course.code.clone(),
            subject_title: course.title.clone(),
            units: course.units,
            section: offering.section,
            instructor: offering.instructor,
            academic_year: offering.academic_year,
            semester: offering.semester,
            time_start: offering.time_start,
            time_end: offering.time_end,
            room: offering.room,
            max_slots: offering.max_slots,
            enrolled_count: offering.enrolled_count,
        }
    }
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request))]
    pub async fn create_student(
        &self,
        request: CreateStudentRequest,
    ) -> Result<student::Model, ServiceError> {
        let db = &*self.db;

        let taken = student::Entity::find()
            .filter(
                student::Column::UserId
                    .eq(request.user_id)
                    .or(student::Column::StudentNumber.eq(request.student_number.as_str())),
            )
            .one(db)
            .await?;
        if taken.is_some() {
            return Err(ServiceError::Conflict(
                "A student profile with this user or student number already exists".to_string(),
            ));
        }

        let now = Utc::now();
        let created = student::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(request.user_id),
            student_number: Set(request.student_number),
            first_name: Set(request.first_name),
            last_name: Set(request.last_name),
            middle_name: Set(request.middle_name),
            email: Set(request.email),
            program: Set(request.program),
            year_level: Set(request.year_level),
            status: Set(StudentStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| ServiceError::from_db_with_conflict(e, "Student profile already exists"))?;

        counter!("enrollment_catalog.students_created", 1);
        info!(student_id = %created.id, user_id = %created.user_id, "Student profile created");
        Ok(created)
    }

    #[instrument(skip(self, request))]
    pub async fn create_subject(
        &self,
        request: CreateSubjectRequest,
    ) -> Result<subject::Model, ServiceError> {
        let db = &*self.db;
        let code = request.code.trim().to_uppercase();

        let taken = subject::Entity::find()
            .filter(subject::Column::Code.eq(code.as_str()))
            .one(db)
            .await?;
        if taken.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Subject code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let created = subject::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            title: Set(request.title),
            description: Set(request.description),
            units: Set(request.units),
            year_level: Set(request.year_level),
            semester: Set(request.semester),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| ServiceError::from_db_with_conflict(e, "Subject code already exists"))?;

        info!(subject_id = %created.id, code = %created.code, "Subject created");
        Ok(created)
    }

    #[instrument(skip(self, request))]
    pub async fn create_schedule(
        &self,
        request: CreateScheduleRequest,
    ) -> Result<ScheduleResponse, ServiceError> {
        if request.time_end <= request.time_start {
            return Err(ServiceError::ValidationError(
                "time_end must be after time_start".to_string(),
            ));
        }

        let db = &*self.db;
        let course = subject::Entity::find_by_id(request.subject_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Subject {} not found", request.subject_id))
            })?;

        let now = Utc::now();
        let created = schedule::ActiveModel {
            id: Set(Uuid::new_v4()),
            subject_id: Set(course.id),
            section: Set(request.section),
            instructor: Set(request.instructor),
            academic_year: Set(request.academic_year),
            semester: Set(request.semester),
            days: Set(request.days.join(",")),
            time_start: Set(request.time_start),
            time_end: Set(request.time_end),
            room: Set(request.room),
            max_slots: Set(request.max_slots),
            enrolled_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(schedule_id = %created.id, subject = %course.code, "Schedule created");
        Ok(ScheduleResponse::new(created, &course))
    }

    #[instrument(skip(self, request))]
    pub async fn create_fee_item(
        &self,
        request: CreateFeeItemRequest,
    ) -> Result<fee_item::Model, ServiceError> {
        let amount = check_money("amount", request.amount)?;

        let now = Utc::now();
        let created = fee_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            description: Set(request.description),
            category: Set(request.category),
            amount: Set(amount),
            per_unit: Set(request.per_unit),
            is_active: Set(request.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(fee_item_id = %created.id, name = %created.name, "Fee item created");
        Ok(created)
    }

    /// Schedules that still have open seats
    #[instrument(skip(self))]
    pub async fn available_schedules(
        &self,
        query: AvailableSchedulesQuery,
    ) -> Result<Vec<ScheduleResponse>, ServiceError> {
        let mut select = schedule::Entity::find()
            .filter(
                Expr::col((schedule::Entity, schedule::Column::EnrolledCount))
                    .lt(Expr::col((schedule::Entity, schedule::Column::MaxSlots))),
            )
            .find_also_related(subject::Entity);

        if let Some(year) = query.academic_year {
            select = select.filter(schedule::Column::AcademicYear.eq(year));
        }
        if let Some(semester) = query.semester {
            select = select.filter(schedule::Column::Semester.eq(semester));
        }
        if let Some(level) = query.year_level {
            select = select.filter(subject::Column::YearLevel.eq(level));
        }

        let rows = select
            .order_by_asc(schedule::Column::Section)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(offering, course)| {
                course.map(|course| ScheduleResponse::new(offering, &course))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_codes_are_checked() {
        assert!(validate_days(&vec!["M".into(), "Th".into(), "S".into()]).is_ok());
        assert!(validate_days(&vec![]).is_err());
        assert!(validate_days(&vec!["Mon".into()]).is_err());
        assert!(validate_days(&vec!["TH".into()]).is_err());
    }

    #[test]
    fn schedule_request_defaults() {
        let request: CreateScheduleRequest = serde_json::from_value(serde_json::json!({
            "subject_id": Uuid::nil(),
            "section": "A",
            "instructor": "Prof. Cruz",
            "academic_year": "2024-2025",
            "semester": 1,
            "days": ["M", "W"],
            "time_start": "08:00:00",
            "time_end": "09:30:00",
            "room": "R101"
        }))
        .unwrap();
        assert_eq!(request.max_slots, 40);
        assert!(request.validate().is_ok());
    }
}
