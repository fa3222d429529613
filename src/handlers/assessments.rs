use super::common::PaginationParams;
use crate::{
    auth::{AuthRouterExt, AuthUser, Category},
    errors::{ErrorResponse, ServiceError},
    services::assessments::{AssessmentResponse, CreateAssessmentRequest},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;
use validator::Validate;

pub fn assessment_routes() -> Router<AppState> {
    let billing = Router::new()
        .route("/", post(create_assessment))
        .route("/:id/approve", post(approve_assessment))
        .with_access(&[Category::Enrollment, Category::Payment]);

    let read = Router::new()
        .route("/", get(list_assessments))
        .route("/:id", get(get_assessment))
        .route("/enrollment/:enrollment_id", get(get_assessment_by_enrollment))
        .with_access(&[
            Category::SelfService,
            Category::Enrollment,
            Category::Payment,
        ]);

    billing.merge(read)
}

/// Bill an approved enrollment
#[utoipa::path(
    post,
    path = "/api/v1/assessments",
    request_body = CreateAssessmentRequest,
    responses(
        (status = 201, description = "Assessment created as pending", body = ApiResponse<AssessmentResponse>),
        (status = 400, description = "Invalid amounts or fee items", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Students cannot create assessments", body = ErrorResponse),
        (status = 404, description = "Enrollment not found", body = ErrorResponse),
        (status = 409, description = "Enrollment already assessed or not approved", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "assessments"
)]
pub async fn create_assessment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateAssessmentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AssessmentResponse>>), ServiceError> {
    request.validate()?;

    let assessment = state
        .services
        .assessments
        .create_assessment(&user, request)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(assessment))))
}

#[utoipa::path(
    post,
    path = "/api/v1/assessments/{id}/approve",
    params(("id" = Uuid, Path, description = "Assessment id")),
    responses(
        (status = 200, description = "Assessment approved", body = ApiResponse<AssessmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Caller is neither registrar nor cashier", body = ErrorResponse),
        (status = 404, description = "Assessment not found", body = ErrorResponse),
        (status = 409, description = "Assessment is not pending", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "assessments"
)]
pub async fn approve_assessment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AssessmentResponse>>, ServiceError> {
    let assessment = state
        .services
        .assessments
        .approve_assessment(&user, id)
        .await?;
    Ok(Json(ApiResponse::success(assessment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/assessments",
    params(PaginationParams),
    responses(
        (status = 200, description = "Assessments retrieved", body = ApiResponse<PaginatedResponse<AssessmentResponse>>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "assessments"
)]
pub async fn list_assessments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<AssessmentResponse>>>, ServiceError> {
    let (page, per_page) = params.resolve(&state.config);

    let result = state
        .services
        .assessments
        .list_assessments(&user, page, per_page)
        .await?;

    Ok(Json(ApiResponse::success(result.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/assessments/{id}",
    params(("id" = Uuid, Path, description = "Assessment id")),
    responses(
        (status = 200, description = "Assessment with line items", body = ApiResponse<AssessmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Assessment not found", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "assessments"
)]
pub async fn get_assessment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AssessmentResponse>>, ServiceError> {
    let assessment = state.services.assessments.get_assessment(&user, id).await?;
    Ok(Json(ApiResponse::success(assessment)))
}

/// The assessment billed against an enrollment
#[utoipa::path(
    get,
    path = "/api/v1/assessments/enrollment/{enrollment_id}",
    params(("enrollment_id" = Uuid, Path, description = "Enrollment id")),
    responses(
        (status = 200, description = "Assessment for the enrollment", body = ApiResponse<AssessmentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Enrollment not found or not yet assessed", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "assessments"
)]
pub async fn get_assessment_by_enrollment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(enrollment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<AssessmentResponse>>, ServiceError> {
    let assessment = state
        .services
        .assessments
        .get_by_enrollment(&user, enrollment_id)
        .await?;
    Ok(Json(ApiResponse::success(assessment)))
}
