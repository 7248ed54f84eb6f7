use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{Duration, Utc};
use headers::{authorization::Bearer, Authorization};
use serde_json::json;
use uuid::Uuid;

use appointment_cell::handlers::*;
use appointment_cell::models::BookAppointmentRequest;
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn create_user_extension(user: &TestUser) -> Extension<shared_models::auth::User> {
    Extension(user.to_user())
}

fn create_auth_header(token: &str) -> TypedHeader<Authorization<Bearer>> {
    let auth = Authorization::bearer(token).unwrap();
    TypedHeader(auth)
}

#[tokio::test]
async fn booking_for_another_patient_is_rejected_before_any_store_call() {
    let config = TestConfig::default();
    let user = TestUser::patient("pat@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    // Request carries a different patient id than the actor
    let request = BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::new_v4(),
        appointment_date: Utc::now().date_naive() + Duration::days(3),
        details: "Recurring migraines".to_string(),
    };

    let result = book_appointment(
        State(config.to_arc()),
        create_auth_header(&token),
        create_user_extension(&user),
        Json(request),
    )
    .await;

    assert!(matches!(result, Err(AppError::Auth(_))));
}

#[tokio::test]
async fn booking_with_empty_details_is_a_validation_error() {
    let config = TestConfig::default();
    let patient_id = Uuid::new_v4();
    let user = TestUser::patient("pat@example.com").with_id(patient_id);
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    let request = BookAppointmentRequest {
        patient_id,
        doctor_id: Uuid::new_v4(),
        appointment_date: Utc::now().date_naive() + Duration::days(3),
        details: "   ".to_string(),
    };

    let result = book_appointment(
        State(config.to_arc()),
        create_auth_header(&token),
        create_user_extension(&user),
        Json(request),
    )
    .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn booking_with_identical_participants_is_a_validation_error() {
    let config = TestConfig::default();
    let patient_id = Uuid::new_v4();
    let user = TestUser::patient("pat@example.com").with_id(patient_id);
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    let request = BookAppointmentRequest {
        patient_id,
        doctor_id: patient_id,
        appointment_date: Utc::now().date_naive() + Duration::days(3),
        details: "Self-referral".to_string(),
    };

    let result = book_appointment(
        State(config.to_arc()),
        create_auth_header(&token),
        create_user_extension(&user),
        Json(request),
    )
    .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn provider_cannot_book_appointments() {
    let config = TestConfig::default();
    let user = TestUser::doctor("doc@example.com");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    let request = BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        doctor_id: Uuid::parse_str(&user.id).unwrap(),
        appointment_date: Utc::now().date_naive() + Duration::days(3),
        details: "Provider-initiated booking".to_string(),
    };

    let result = book_appointment(
        State(config.to_arc()),
        create_auth_header(&token),
        create_user_extension(&user),
        Json(request),
    )
    .await;

    assert!(matches!(result, Err(AppError::Auth(_))));
}

#[tokio::test]
async fn unknown_role_claims_never_resolve_to_an_actor() {
    let config = TestConfig::default();
    let user = TestUser::new("ops@example.com", "admin");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    let result = delete_appointment(
        State(config.to_arc()),
        Path(Uuid::new_v4()),
        create_auth_header(&token),
        create_user_extension(&user),
    )
    .await;

    // Unknown role claims never resolve to an actor
    assert!(matches!(result, Err(AppError::Auth(_))));
}

#[tokio::test]
async fn booking_yesterday_is_rejected_with_the_past_date_message() {
    let config = TestConfig::default();
    let patient_id = Uuid::new_v4();
    let user = TestUser::patient("pat@example.com").with_id(patient_id);
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    let request = BookAppointmentRequest {
        patient_id,
        doctor_id: Uuid::new_v4(),
        appointment_date: Utc::now().date_naive() - Duration::days(1),
        details: "Too late".to_string(),
    };

    let result = book_appointment(
        State(config.to_arc()),
        create_auth_header(&token),
        create_user_extension(&user),
        Json(request),
    )
    .await;

    match result {
        Err(AppError::BadRequest(msg)) => {
            assert!(msg.contains("past dates"), "unexpected message: {}", msg)
        }
        other => panic!("expected BadRequest, got {:?}", other.map(|_| json!("ok"))),
    }
}
