use super::common::PaginationParams;
use crate::{
    auth::{AuthRouterExt, AuthUser, Category},
    errors::{ErrorResponse, ServiceError},
    services::payments::{CreatePaymentRequest, PaymentFilter, PaymentResponse},
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

pub fn payment_routes() -> Router<AppState> {
    let ledger = Router::new()
        .route("/", post(create_payment).get(list_payments))
        .route("/:id", get(get_payment))
        .with_access(&[Category::Payment, Category::SelfService]);

    let cashier = Router::new()
        .route("/:id/confirm", post(confirm_payment))
        .route("/:id/cancel", post(cancel_payment))
        .with_access(&[Category::Payment]);

    ledger.merge(cashier)
}

/// Record a pending payment against an assessment
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Payment recorded as pending", body = ApiResponse<PaymentResponse>),
        (status = 400, description = "Amount must be positive", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "Assessment not found", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentResponse>>), ServiceError> {
    request.validate()?;

    let payment = state.services.payments.create_payment(&user, request).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(PaginationParams, PaymentFilter),
    responses(
        (status = 200, description = "Payments retrieved", body = ApiResponse<PaginatedResponse<PaymentResponse>>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<PaymentFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<PaymentResponse>>>, ServiceError> {
    let (page, per_page) = params.resolve(&state.config);

    let result = state
        .services
        .payments
        .list_payments(&user, filter, page, per_page)
        .await?;

    Ok(Json(ApiResponse::success(result.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.services.payments.get_payment(&user, id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Cashier confirmation; settles the assessment once fully covered
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/confirm",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Caller is not a cashier", body = ErrorResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Payment is not pending", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.services.payments.confirm_payment(&user, id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/cancel",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment cancelled", body = ApiResponse<PaymentResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Caller is not a cashier", body = ErrorResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Only pending payments can be cancelled", body = ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn cancel_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.services.payments.cancel_payment(&user, id).await?;
    Ok(Json(ApiResponse::success(payment)))
}
