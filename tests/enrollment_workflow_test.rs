mod common;

use axum::http::{Method, StatusCode};
use common::{uuid, TestApp, ACADEMIC_YEAR};
use enrollment_api::{auth::Role, config::WorkflowConfig};
use rstest::rstest;
use serde_json::json;
use uuid::Uuid;

fn enrollment_body(schedule_ids: &[Uuid]) -> serde_json::Value {
    json!({
        "academic_year": ACADEMIC_YEAR,
        "semester": 1,
        "schedule_ids": schedule_ids,
    })
}

#[rstest]
#[case(3, 0)]
#[case(2, 2)]
#[case(0, 3)]
#[case(1, 5)]
#[tokio::test]
async fn unknown_schedules_are_skipped_and_units_counted(
    #[case] valid: usize,
    #[case] missing: usize,
) {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;

    let mut schedule_ids = Vec::new();
    for _ in 0..valid {
        schedule_ids.push(app.seed_schedule(3, 40, 0).await);
    }
    let seated = schedule_ids.clone();
    schedule_ids.extend((0..missing).map(|_| Uuid::new_v4()));

    let (status, body) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&schedule_ids)),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    let data = &body["data"];
    assert_eq!(data["status"], "pending");
    assert_eq!(data["subjects"].as_array().map(Vec::len), Some(valid));
    assert_eq!(data["total_units"], json!(3 * valid as i64));

    for id in seated {
        assert_eq!(app.schedule(id).await.enrolled_count, 1);
    }
}

#[tokio::test]
async fn repeated_schedule_ids_seat_once() {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;
    let schedule_id = app.seed_schedule(4, 40, 0).await;

    let (status, body) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[schedule_id, schedule_id])),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["total_units"], 4);
    assert_eq!(app.schedule(schedule_id).await.enrolled_count, 1);
}

#[tokio::test]
async fn last_seat_is_taken_then_overbooking_is_allowed_by_default() {
    let app = TestApp::new().await;
    let schedule_id = app.seed_schedule(3, 40, 39).await;

    let (first, _) = app.student().await;
    let (status, _) = app
        .call(
            &first,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[schedule_id])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.schedule(schedule_id).await.enrolled_count, 40);

    let (status, body) = app
        .call(
            &first,
            Method::GET,
            "/api/v1/schedules/available",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]
        .as_array()
        .expect("list")
        .iter()
        .all(|s| s["id"] != json!(schedule_id)));

    let (second, _) = app.student().await;
    let (status, _) = app
        .call(
            &second,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[schedule_id])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.schedule(schedule_id).await.enrolled_count, 41);
}

#[tokio::test]
async fn full_schedule_is_refused_when_capacity_is_enforced() {
    let app = TestApp::with_workflow(WorkflowConfig {
        enforce_capacity: true,
        ..WorkflowConfig::default()
    })
    .await;
    let schedule_id = app.seed_schedule(3, 40, 40).await;
    let other = app.seed_schedule(3, 40, 0).await;
    let (student, _) = app.student().await;

    let (status, body) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[other, schedule_id])),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(app.schedule(schedule_id).await.enrolled_count, 40);
    // the earlier seat in the same request is rolled back too
    assert_eq!(app.schedule(other).await.enrolled_count, 0);
}

#[tokio::test]
async fn strict_mode_rejects_unknown_schedules_without_writing() {
    let app = TestApp::with_workflow(WorkflowConfig {
        strict_schedule_ids: true,
        ..WorkflowConfig::default()
    })
    .await;
    let (student, _) = app.student().await;
    let known = app.seed_schedule(3, 40, 0).await;

    let (status, _) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[known, Uuid::new_v4()])),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.schedule(known).await.enrolled_count, 0);

    let (status, body) = app
        .call(&student, Method::GET, "/api/v1/enrollments", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn second_enrollment_for_the_same_term_conflicts() {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;
    let schedule_id = app.seed_schedule(3, 40, 0).await;

    let (status, _) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[schedule_id])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[schedule_id])),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");
    assert_eq!(app.schedule(schedule_id).await.enrolled_count, 1);
}

#[tokio::test]
async fn staff_must_name_the_student() {
    let app = TestApp::new().await;
    let registrar = app.caller(Role::Registrar);
    let (_, profile) = app.student().await;

    let (status, _) = app
        .call(
            &registrar,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = enrollment_body(&[]);
    body["student"] = json!(profile.id);
    let (status, created) = app
        .call(&registrar, Method::POST, "/api/v1/enrollments", Some(body))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(uuid(&created["data"]["student_id"]), profile.id);
    assert_eq!(created["data"]["total_units"], 0);
}

#[tokio::test]
async fn student_without_profile_cannot_enroll() {
    let app = TestApp::new().await;
    let orphan = app.caller(Role::Student);

    let (status, _) = app
        .call(
            &orphan,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[])),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_semester_reports_field_details() {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;

    let (status, body) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(json!({ "academic_year": ACADEMIC_YEAR, "semester": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"]["semester"].is_array(), "{body}");
}

#[rstest]
#[case(Role::Admin)]
#[case(Role::Student)]
#[case(Role::Cashier)]
#[case(Role::Faculty)]
#[tokio::test]
async fn only_registrar_can_approve(#[case] role: Role) {
    let app = TestApp::new().await;
    let (_, profile) = app.student().await;
    let pending = app.seed_enrollment(profile.id, vec![]).await;
    let caller = app.caller(role);

    let (status, _) = app
        .call(
            &caller,
            Method::POST,
            &format!("/api/v1/enrollments/{}/approve", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let registrar = app.caller(Role::Registrar);
    let (status, body) = app
        .call(
            &registrar,
            Method::GET,
            &format!("/api/v1/enrollments/{}", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["approved_by"].is_null());
}

#[tokio::test]
async fn registrar_approval_records_approver() {
    let app = TestApp::new().await;
    let (_, profile) = app.student().await;
    let pending = app.seed_enrollment(profile.id, vec![]).await;
    let registrar = app.caller(Role::Registrar);

    let (status, body) = app
        .call(
            &registrar,
            Method::POST,
            &format!("/api/v1/enrollments/{}/approve", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(uuid(&body["data"]["approved_by"]), registrar.user.user_id);
    assert!(body["data"]["approved_at"].is_string());

    // approving again is a status error while transitions are guarded
    let (status, _) = app
        .call(
            &registrar,
            Method::POST,
            &format!("/api/v1/enrollments/{}/approve", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn rejection_keeps_the_reason_and_body_is_optional() {
    let app = TestApp::new().await;
    let registrar = app.caller(Role::Registrar);

    let (_, first) = app.student().await;
    let pending = app.seed_enrollment(first.id, vec![]).await;
    let (status, body) = app
        .call(
            &registrar,
            Method::POST,
            &format!("/api/v1/enrollments/{}/reject", pending.id),
            Some(json!({ "reason": "Missing prerequisites" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejection_reason"], "Missing prerequisites");

    let (_, second) = app.student().await;
    let pending = app.seed_enrollment(second.id, vec![]).await;
    let (status, body) = app
        .call(
            &registrar,
            Method::POST,
            &format!("/api/v1/enrollments/{}/reject", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rejection_reason"], "");
}

#[tokio::test]
async fn unguarded_transitions_allow_approving_a_rejected_enrollment() {
    let app = TestApp::with_workflow(WorkflowConfig {
        guard_transitions: false,
        ..WorkflowConfig::default()
    })
    .await;
    let registrar = app.caller(Role::Registrar);
    let (_, profile) = app.student().await;
    let pending = app.seed_enrollment(profile.id, vec![]).await;

    let (status, _) = app
        .call(
            &registrar,
            Method::POST,
            &format!("/api/v1/enrollments/{}/reject", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            &registrar,
            Method::POST,
            &format!("/api/v1/enrollments/{}/approve", pending.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
}

#[tokio::test]
async fn dropping_a_subject_frees_the_seat_and_units() {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;
    let keep = app.seed_schedule(3, 40, 0).await;
    let drop = app.seed_schedule(2, 40, 0).await;

    let (_, created) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[keep, drop])),
        )
        .await;
    let enrollment_id = uuid(&created["data"]["id"]);
    assert_eq!(created["data"]["total_units"], 5);

    let row = created["data"]["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .find(|s| s["schedule_id"] == json!(drop))
        .map(|s| uuid(&s["id"]))
        .expect("dropped row");

    let uri = format!("/api/v1/enrollments/{}/subjects/{}", enrollment_id, row);
    let (status, body) = app.call(&student, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["total_units"], 3);
    assert_eq!(app.schedule(drop).await.enrolled_count, 0);
    assert_eq!(app.schedule(keep).await.enrolled_count, 1);

    let dropped = body["data"]["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .find(|s| uuid(&s["id"]) == row)
        .cloned()
        .expect("row still listed");
    assert_eq!(dropped["status"], "dropped");
    assert!(dropped["dropped_at"].is_string());

    // a dropped row cannot be dropped again
    let (status, _) = app.call(&student, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.schedule(drop).await.enrolled_count, 0);
}

#[tokio::test]
async fn simultaneous_drops_free_the_seat_once() {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;
    let keep = app.seed_schedule(3, 40, 0).await;
    let drop = app.seed_schedule(2, 40, 0).await;

    let (_, created) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[keep, drop])),
        )
        .await;
    let enrollment_id = uuid(&created["data"]["id"]);
    let row = created["data"]["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .find(|s| s["schedule_id"] == json!(drop))
        .map(|s| uuid(&s["id"]))
        .expect("row to drop");

    let uri = format!("/api/v1/enrollments/{}/subjects/{}", enrollment_id, row);
    let ((a, _), (b, _)) = tokio::join!(
        app.call(&student, Method::DELETE, &uri, None),
        app.call(&student, Method::DELETE, &uri, None),
    );
    let mut statuses = [a, b];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    assert_eq!(app.schedule(drop).await.enrolled_count, 0);
    let (_, current) = app
        .call(
            &student,
            Method::GET,
            &format!("/api/v1/enrollments/{}", enrollment_id),
            None,
        )
        .await;
    assert_eq!(current["data"]["total_units"], 3);
}

#[tokio::test]
async fn a_pending_enrollment_is_decided_once() {
    let app = TestApp::new().await;
    let (student, _) = app.student().await;
    let schedule_id = app.seed_schedule(3, 40, 0).await;
    let (_, created) = app
        .call(
            &student,
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[schedule_id])),
        )
        .await;
    let enrollment_id = uuid(&created["data"]["id"]);

    let registrar = app.caller(Role::Registrar);
    let approve = format!("/api/v1/enrollments/{}/approve", enrollment_id);
    let reject = format!("/api/v1/enrollments/{}/reject", enrollment_id);
    let ((a, _), (b, _)) = tokio::join!(
        app.call(&registrar, Method::POST, &approve, None),
        app.call(
            &registrar,
            Method::POST,
            &reject,
            Some(json!({ "reason": "late" }))
        ),
    );
    let mut statuses = [a, b];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
}

#[tokio::test]
async fn seat_count_never_goes_below_zero() {
    let app = TestApp::new().await;
    let (student, profile) = app.student().await;
    let schedule_id = app.seed_schedule(3, 40, 0).await;
    let enrollment = app.seed_enrollment(profile.id, vec![schedule_id]).await;
    app.set_enrolled_count(schedule_id, 0).await;

    let row = enrollment.subjects[0].id;
    let (status, _) = app
        .call(
            &student,
            Method::DELETE,
            &format!("/api/v1/enrollments/{}/subjects/{}", enrollment.id, row),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.schedule(schedule_id).await.enrolled_count, 0);
}

#[tokio::test]
async fn current_enrollment_is_the_students_active_one() {
    let app = TestApp::new().await;
    let (student, profile) = app.student().await;

    let (status, _) = app
        .call(&student, Method::GET, "/api/v1/enrollments/current", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let pending = app.seed_enrollment(profile.id, vec![]).await;
    let (status, body) = app
        .call(&student, Method::GET, "/api/v1/enrollments/current", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(uuid(&body["data"]["id"]), pending.id);
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/enrollments", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/api/v1/enrollments",
            Some(enrollment_body(&[])),
            Some("not-a-jwt"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
