use super::common::PaginationParams;
use crate::{
    auth::{AuthRouterExt, AuthUser, Category},
    errors::{ErrorResponse, ServiceError},
    services::enrollments::{CreateEnrollmentRequest, EnrollmentResponse, RejectEnrollmentRequest},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use uuid::Uuid;
use validator::Validate;

/// Enrollment routes, grouped by the categories each action needs
pub fn enrollment_routes() -> Router<AppState> {
    let submit = Router::new()
        .route("/", post(create_enrollment))
        .route(
            "/:id/subjects/:enrolled_subject_id",
            delete(drop_subject),
        )
        .with_access(&[Category::Enrollment]);

    let review = Router::new()
        .route("/:id/approve", post(approve_enrollment))
        .route("/:id/reject", post(reject_enrollment))
        .with_access(&[Category::Enrollment]);

    let read = Router::new()
        .route("/", get(list_enrollments))
        .route("/current", get(current_enrollment))
        .route("/:id", get(get_enrollment))
        .with_access(&[Category::Enrollment, Category::SelfService]);

    submit.merge(review).merge(read)
}

/// Submit an enrollment for a term
#[utoipa::path(
    post,
    path = "/api/v1/enrollments",
    request_body = CreateEnrollmentRequest,
    responses(
        (status = 201, description = "Enrollment created as pending", body = ApiResponse<EnrollmentResponse>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "Student profile or schedule not found", body = ErrorResponse),
        (status = 409, description = "Enrollment for this term already exists, or schedule is full", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn create_enrollment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateEnrollmentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<EnrollmentResponse>>), ServiceError> {
    request.validate()?;

    let enrollment = state
        .services
        .enrollments
        .create_enrollment(&user, request)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(enrollment))))
}

/// List enrollments visible to the caller, newest first
#[utoipa::path(
    get,
    path = "/api/v1/enrollments",
    params(PaginationParams),
    responses(
        (status = 200, description = "Enrollments retrieved", body = ApiResponse<PaginatedResponse<EnrollmentResponse>>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn list_enrollments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<EnrollmentResponse>>>, ServiceError> {
    let (page, per_page) = params.resolve(&state.config);

    let result = state
        .services
        .enrollments
        .list_enrollments(&user, page, per_page)
        .await?;

    Ok(Json(ApiResponse::success(result.into())))
}

/// The calling student's pending or approved enrollment
#[utoipa::path(
    get,
    path = "/api/v1/enrollments/current",
    responses(
        (status = 200, description = "Current enrollment", body = ApiResponse<EnrollmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "No student profile or no active enrollment", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn current_enrollment(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<EnrollmentResponse>>, ServiceError> {
    let enrollment = state.services.enrollments.current_enrollment(&user).await?;
    Ok(Json(ApiResponse::success(enrollment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/enrollments/{id}",
    params(("id" = Uuid, Path, description = "Enrollment id")),
    responses(
        (status = 200, description = "Enrollment with its subjects", body = ApiResponse<EnrollmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn get_enrollment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<EnrollmentResponse>>, ServiceError> {
    let enrollment = state.services.enrollments.get_enrollment(&user, id).await?;
    Ok(Json(ApiResponse::success(enrollment)))
}

/// Registrar approval of a pending enrollment
#[utoipa::path(
    post,
    path = "/api/v1/enrollments/{id}/approve",
    params(("id" = Uuid, Path, description = "Enrollment id")),
    responses(
        (status = 200, description = "Enrollment approved", body = ApiResponse<EnrollmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Caller is not a registrar", body = ErrorResponse),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 409, description = "Enrollment is not pending", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn approve_enrollment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<EnrollmentResponse>>, ServiceError> {
    let enrollment = state
        .services
        .enrollments
        .approve_enrollment(&user, id)
        .await?;
    Ok(Json(ApiResponse::success(enrollment)))
}

/// Registrar rejection; the body is optional
#[utoipa::path(
    post,
    path = "/api/v1/enrollments/{id}/reject",
    params(("id" = Uuid, Path, description = "Enrollment id")),
    request_body(content = RejectEnrollmentRequest, description = "Optional rejection reason"),
    responses(
        (status = 200, description = "Enrollment rejected", body = ApiResponse<EnrollmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Caller is not a registrar", body = ErrorResponse),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 409, description = "Enrollment is not pending", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn reject_enrollment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<RejectEnrollmentRequest>>,
) -> Result<Json<ApiResponse<EnrollmentResponse>>, ServiceError> {
    let request = request.map(|Json(body)| body).unwrap_or_default();
    request.validate()?;

    let enrollment = state
        .services
        .enrollments
        .reject_enrollment(&user, id, request)
        .await?;
    Ok(Json(ApiResponse::success(enrollment)))
}

/// Drop one enrolled subject and free its seat
#[utoipa::path(
    delete,
    path = "/api/v1/enrollments/{id}/subjects/{enrolled_subject_id}",
    params(
        ("id" = Uuid, Path, description = "Enrollment id"),
        ("enrolled_subject_id" = Uuid, Path, description = "Enrolled subject id"),
    ),
    responses(
        (status = 200, description = "Subject dropped; updated enrollment returned", body = ApiResponse<EnrollmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Enrollment or enrolled subject not found", body = ErrorResponse),
        (status = 409, description = "Subject is not currently enrolled", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enrollments"
)]
pub async fn drop_subject(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, enrolled_subject_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<EnrollmentResponse>>, ServiceError> {
    let enrollment = state
        .services
        .enrollments
        .drop_subject(&user, id, enrolled_subject_id)
        .await?;
    Ok(Json(ApiResponse::success(enrollment)))
}
