use axum::{routing::get, Json, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Enrollment API",
        version = "1.0.0",
        description = r#"
# Enrollment API

Term enrollment, fee assessment and payment tracking for a school registrar.

## Workflow

1. A student (or a registrar on their behalf) submits an enrollment listing schedule ids.
2. A registrar approves or rejects it.
3. Staff bill the approved enrollment with an assessment.
4. Payments are recorded and confirmed by a cashier; the assessment is marked paid once confirmed payments cover its net amount.

## Authentication

Every endpoint except health checks requires a bearer token whose `role` claim is one of
`admin`, `registrar`, `cashier`, `faculty` or `student`:

```
Authorization: Bearer <your-jwt-token>
```

Students only ever see their own enrollments, assessments and payments.

## Pagination

List endpoints accept `page` (default 1) and `per_page` (clamped to the configured maximum).
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    modifiers(&SecurityAddon),
    tags(
        (name = "enrollments", description = "Term enrollment and registrar review"),
        (name = "assessments", description = "Fee assessment of approved enrollments"),
        (name = "payments", description = "Payment recording and cashier confirmation"),
        (name = "catalog", description = "Students, subjects, schedules and fee items")
    ),
    paths(
        crate::handlers::enrollments::create_enrollment,
        crate::handlers::enrollments::list_enrollments,
        crate::handlers::enrollments::current_enrollment,
        crate::handlers::enrollments::get_enrollment,
        crate::handlers::enrollments::approve_enrollment,
        crate::handlers::enrollments::reject_enrollment,
        crate::handlers::enrollments::drop_subject,

        crate::handlers::assessments::create_assessment,
        crate::handlers::assessments::approve_assessment,
        crate::handlers::assessments::list_assessments,
        crate::handlers::assessments::get_assessment,
        crate::handlers::assessments::get_assessment_by_enrollment,

        crate::handlers::payments::create_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::cancel_payment,

        crate::handlers::catalog::create_student,
        crate::handlers::catalog::create_subject,
        crate::handlers::catalog::create_schedule,
        crate::handlers::catalog::create_fee_item,
        crate::handlers::catalog::available_schedules,
    ),
    components(
        schemas(
            crate::services::enrollments::CreateEnrollmentRequest,
            crate::services::enrollments::RejectEnrollmentRequest,
            crate::services::enrollments::EnrollmentResponse,
            crate::services::enrollments::EnrolledSubjectResponse,
            crate::services::assessments::CreateAssessmentRequest,
            crate::services::assessments::AssessmentItemRequest,
            crate::services::assessments::AssessmentResponse,
            crate::services::assessments::AssessmentItemResponse,
            crate::services::payments::CreatePaymentRequest,
            crate::services::payments::PaymentResponse,
            crate::services::catalog::ScheduleResponse,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the generated document at `/api-docs/openapi.json`
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
