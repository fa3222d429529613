use crate::{
    auth::{AuthRouterExt, Category},
    entities::{fee_item, student, subject},
    errors::{ErrorResponse, ServiceError},
    services::catalog::{
        AvailableSchedulesQuery, CreateFeeItemRequest, CreateScheduleRequest,
        CreateStudentRequest, CreateSubjectRequest, ScheduleResponse,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use validator::Validate;

/// Reference data routes. Mounted at the API root since each resource has
/// its own prefix.
pub fn catalog_routes() -> Router<AppState> {
    let students = Router::new()
        .route("/students", post(create_student))
        .with_access(&[Category::Enrollment]);

    let classes = Router::new()
        .route("/subjects", post(create_subject))
        .route("/schedules", post(create_schedule))
        .with_access(&[Category::Class]);

    let fees = Router::new()
        .route("/fee-items", post(create_fee_item))
        .with_access(&[Category::Payment]);

    let browse = Router::new()
        .route("/schedules/available", get(available_schedules))
        .with_access(&[
            Category::SelfService,
            Category::Enrollment,
            Category::Class,
        ]);

    students.merge(classes).merge(fees).merge(browse)
}

/// Register a student profile for an existing account
#[utoipa::path(
    post,
    path = "/api/v1/students",
    request_body = CreateStudentRequest,
    responses(
        (status = 201, description = "Student profile created", body = ApiResponse<student::Model>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 409, description = "Account or student number already registered", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_student(
    State(state): State<AppState>,
    Json(request): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<student::Model>>), ServiceError> {
    request.validate()?;
    let created = state.services.catalog.create_student(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    post,
    path = "/api/v1/subjects",
    request_body = CreateSubjectRequest,
    responses(
        (status = 201, description = "Subject created", body = ApiResponse<subject::Model>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 409, description = "Subject code already exists", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_subject(
    State(state): State<AppState>,
    Json(request): Json<CreateSubjectRequest>,
) -> Result<(StatusCode, Json<ApiResponse<subject::Model>>), ServiceError> {
    request.validate()?;
    let created = state.services.catalog.create_subject(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Open a section of a subject for a term
#[utoipa::path(
    post,
    path = "/api/v1/schedules",
    request_body = CreateScheduleRequest,
    responses(
        (status = 201, description = "Schedule created", body = ApiResponse<ScheduleResponse>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "Subject not found", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduleResponse>>), ServiceError> {
    request.validate()?;
    let created = state.services.catalog.create_schedule(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    post,
    path = "/api/v1/fee-items",
    request_body = CreateFeeItemRequest,
    responses(
        (status = 201, description = "Fee item created", body = ApiResponse<fee_item::Model>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_fee_item(
    State(state): State<AppState>,
    Json(request): Json<CreateFeeItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<fee_item::Model>>), ServiceError> {
    request.validate()?;
    let created = state.services.catalog.create_fee_item(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Schedules that still have open seats
#[utoipa::path(
    get,
    path = "/api/v1/schedules/available",
    params(AvailableSchedulesQuery),
    responses(
        (status = 200, description = "Schedules with open seats", body = ApiResponse<Vec<ScheduleResponse>>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn available_schedules(
    State(state): State<AppState>,
    Query(query): Query<AvailableSchedulesQuery>,
) -> Result<Json<ApiResponse<Vec<ScheduleResponse>>>, ServiceError> {
    let schedules = state.services.catalog.available_schedules(query).await?;
    Ok(Json(ApiResponse::success(schedules)))
}
