#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::NaiveTime;
use enrollment_api::{
    auth::{AuthUser, Role},
    build_router,
    config::{AppConfig, WorkflowConfig},
    db::{self, DbConfig},
    entities::{fee_item, fee_item::FeeCategory, schedule, student, subject},
    events::{self, EventSender},
    services::{
        catalog::{
            CreateFeeItemRequest, CreateScheduleRequest, CreateStudentRequest,
            CreateSubjectRequest,
        },
        enrollments::{CreateEnrollmentRequest, EnrollmentResponse},
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ACADEMIC_YEAR: &str = "2024-2025";

const TEST_JWT_SECRET: &str =
    "q8Vn3Lz5Rk1Wx7Tb2Hm9Jc4Pf6Ds0Ga8Ye3Uo5Ni7Ql1Zt9Xv2Bw4Mr6Ek8Cj0Hs3Fy5Dp7Lg";

/// Full router over a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    event_task: tokio::task::JoinHandle<()>,
}

/// A token bearer plus the identity it carries
pub struct Caller {
    pub user: AuthUser,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_workflow(WorkflowConfig::default()).await
    }

    pub async fn with_workflow(workflow: WorkflowConfig) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.workflow = workflow;

        let pool = db::establish_connection_with_config(&DbConfig::in_memory())
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state =
            AppState::new(Arc::new(pool), cfg, event_sender).expect("default access policy");
        let router = build_router(state.clone());

        Self {
            router,
            state,
            event_task,
        }
    }

    /// Identity with a freshly issued token for `role`
    pub fn caller(&self, role: Role) -> Caller {
        self.caller_for(role, Uuid::new_v4())
    }

    pub fn caller_for(&self, role: Role, user_id: Uuid) -> Caller {
        let token = self
            .state
            .auth
            .generate_token(user_id, role.as_str(), Some(format!("{} user", role)))
            .expect("token");
        let user = self.state.auth.authenticate(&token).expect("fresh token");
        Caller { user, token }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    /// Sends the request as `caller` and returns status plus parsed body
    pub async fn call(
        &self,
        caller: &Caller,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, Some(&caller.token)).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    // Seed helpers go straight to the services so each test only exercises
    // the endpoints it is about.

    pub async fn seed_student(&self, user_id: Uuid) -> student::Model {
        let n = &user_id.simple().to_string()[..8];
        self.state
            .services
            .catalog
            .create_student(CreateStudentRequest {
                user_id,
                student_number: format!("2024-{}", n),
                first_name: "Ana".to_string(),
                last_name: "Reyes".to_string(),
                middle_name: None,
                email: format!("{}@example.edu", n),
                program: "BSCS".to_string(),
                year_level: 1,
            })
            .await
            .expect("seed student")
    }

    /// A student account together with its profile
    pub async fn student(&self) -> (Caller, student::Model) {
        let caller = self.caller(Role::Student);
        let profile = self.seed_student(caller.user.user_id).await;
        (caller, profile)
    }

    pub async fn seed_subject(&self, units: i32) -> subject::Model {
        let code = format!("S{}", &Uuid::new_v4().simple().to_string()[..7]);
        self.state
            .services
            .catalog
            .create_subject(CreateSubjectRequest {
                code,
                title: "Seeded Subject".to_string(),
                description: String::new(),
                units,
                year_level: 1,
                semester: 1,
            })
            .await
            .expect("seed subject")
    }

    /// A schedule with `units`-unit subject, `max_slots` seats and
    /// `enrolled_count` seats already taken
    pub async fn seed_schedule(&self, units: i32, max_slots: i32, enrolled_count: i32) -> Uuid {
        let subject = self.seed_subject(units).await;
        let created = self
            .state
            .services
            .catalog
            .create_schedule(CreateScheduleRequest {
                subject_id: subject.id,
                section: "A".to_string(),
                instructor: "Prof. Cruz".to_string(),
                academic_year: ACADEMIC_YEAR.to_string(),
                semester: 1,
                days: vec!["M".to_string(), "W".to_string()],
                time_start: NaiveTime::from_hms_opt(8, 0, 0).expect("time"),
                time_end: NaiveTime::from_hms_opt(9, 30, 0).expect("time"),
                room: "R101".to_string(),
                max_slots,
            })
            .await
            .expect("seed schedule");

        if enrolled_count != 0 {
            self.set_enrolled_count(created.id, enrolled_count).await;
        }
        created.id
    }

    pub async fn set_enrolled_count(&self, schedule_id: Uuid, count: i32) {
        schedule::Entity::update_many()
            .col_expr(schedule::Column::EnrolledCount, Expr::value(count))
            .filter(schedule::Column::Id.eq(schedule_id))
            .exec(&*self.state.db)
            .await
            .expect("set enrolled_count");
    }

    pub async fn schedule(&self, schedule_id: Uuid) -> schedule::Model {
        schedule::Entity::find_by_id(schedule_id)
            .one(&*self.state.db)
            .await
            .expect("query schedule")
            .expect("schedule exists")
    }

    pub async fn seed_fee_item(&self, amount: Decimal, per_unit: bool) -> fee_item::Model {
        self.state
            .services
            .catalog
            .create_fee_item(CreateFeeItemRequest {
                name: if per_unit { "Tuition" } else { "Miscellaneous" }.to_string(),
                description: String::new(),
                category: if per_unit {
                    FeeCategory::Tuition
                } else {
                    FeeCategory::Miscellaneous
                },
                amount,
                per_unit,
                is_active: true,
            })
            .await
            .expect("seed fee item")
    }

    /// Pending enrollment submitted by a registrar for `student_id`
    pub async fn seed_enrollment(
        &self,
        student_id: Uuid,
        schedule_ids: Vec<Uuid>,
    ) -> EnrollmentResponse {
        let registrar = self.caller(Role::Registrar);
        self.state
            .services
            .enrollments
            .create_enrollment(
                &registrar.user,
                CreateEnrollmentRequest {
                    student: Some(student_id),
                    academic_year: ACADEMIC_YEAR.to_string(),
                    semester: 1,
                    schedule_ids,
                },
            )
            .await
            .expect("seed enrollment")
    }

    pub async fn seed_approved_enrollment(
        &self,
        student_id: Uuid,
        schedule_ids: Vec<Uuid>,
    ) -> EnrollmentResponse {
        let pending = self.seed_enrollment(student_id, schedule_ids).await;
        let registrar = self.caller(Role::Registrar);
        self.state
            .services
            .enrollments
            .approve_enrollment(&registrar.user, pending.id)
            .await
            .expect("approve seeded enrollment")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    })
}

/// Decimal fields are serialized as strings
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .expect("decimal serialized as string")
        .parse()
        .expect("valid decimal")
}

pub fn uuid(value: &Value) -> Uuid {
    value
        .as_str()
        .expect("uuid serialized as string")
        .parse()
        .expect("valid uuid")
}
