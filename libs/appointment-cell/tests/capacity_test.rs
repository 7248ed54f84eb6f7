use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{AppointmentError, BookAppointmentRequest};
use appointment_cell::services::capacity::{CapacityGuard, DAILY_APPOINTMENT_CAPACITY};
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockStoreRows, TestConfig};

fn create_guard(mock_server: &MockServer) -> CapacityGuard {
    let config = TestConfig::with_store_url(&mock_server.uri()).to_app_config();
    CapacityGuard::new(Arc::new(SupabaseClient::new(&config)))
}

fn booking_request(doctor_id: Uuid) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Uuid::new_v4(),
        doctor_id,
        appointment_date: Utc::now().date_naive() + Duration::days(5),
        details: "Annual check-up".to_string(),
    }
}

fn scheduled_rows(count: usize) -> Value {
    let rows: Vec<Value> = (0..count).map(|_| json!({"id": Uuid::new_v4()})).collect();
    json!(rows)
}

async fn mount_count_mock(mock_server: &MockServer, doctor_id: Uuid, count: usize) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "eq.Scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scheduled_rows(count)))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn can_admit_below_the_daily_capacity() {
    let mock_server = MockServer::start().await;
    let guard = create_guard(&mock_server);
    let doctor_id = Uuid::new_v4();

    mount_count_mock(&mock_server, doctor_id, DAILY_APPOINTMENT_CAPACITY - 1).await;

    let date = Utc::now().date_naive() + Duration::days(5);
    assert!(guard.can_admit(doctor_id, date, "token").await.unwrap());
}

#[tokio::test]
async fn cannot_admit_once_the_daily_capacity_is_reached() {
    let mock_server = MockServer::start().await;
    let guard = create_guard(&mock_server);
    let doctor_id = Uuid::new_v4();

    mount_count_mock(&mock_server, doctor_id, DAILY_APPOINTMENT_CAPACITY).await;

    let date = Utc::now().date_naive() + Duration::days(5);
    assert!(!guard.can_admit(doctor_id, date, "token").await.unwrap());
}

#[tokio::test]
async fn admission_counts_and_inserts_under_the_lock() {
    let mock_server = MockServer::start().await;
    let guard = create_guard(&mock_server);
    let doctor_id = Uuid::new_v4();
    let request = booking_request(doctor_id);

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::scheduling_lock_row("cap_test", doctor_id)
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    mount_count_mock(&mock_server, doctor_id, 3).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::appointment_row(
                Uuid::new_v4(),
                request.patient_id,
                doctor_id,
                &request.appointment_date.format("%Y-%m-%d").to_string(),
                &request.details,
                "Scheduled",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let appointment = guard.admit(&request, "token").await.unwrap();
    assert_eq!(appointment.doctor_id, doctor_id);
    assert_eq!(appointment.appointment_date, request.appointment_date);
}

#[tokio::test]
async fn admission_at_capacity_inserts_nothing() {
    let mock_server = MockServer::start().await;
    let guard = create_guard(&mock_server);
    let doctor_id = Uuid::new_v4();
    let request = booking_request(doctor_id);

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::scheduling_lock_row("cap_test", doctor_id)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    mount_count_mock(&mock_server, doctor_id, DAILY_APPOINTMENT_CAPACITY).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let result = guard.admit(&request, "token").await;
    assert_matches!(result, Err(AppointmentError::CapacityExceeded));
}

#[tokio::test]
async fn contended_lock_exhausts_retries() {
    let mock_server = MockServer::start().await;
    let guard = create_guard(&mock_server);
    let doctor_id = Uuid::new_v4();
    let request = booking_request(doctor_id);

    // Another admission holds a live lock for the slot
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockStoreRows::scheduling_lock_row("cap_live", doctor_id)
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let result = guard.admit(&request, "token").await;
    assert_matches!(result, Err(AppointmentError::DatabaseError(_)));
}

#[tokio::test]
async fn expired_lock_is_cleaned_up_and_admission_proceeds() {
    let mock_server = MockServer::start().await;
    let guard = create_guard(&mock_server);
    let doctor_id = Uuid::new_v4();
    let request = booking_request(doctor_id);

    // First acquisition attempt collides with a stale lock row
    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::scheduling_lock_row("cap_stale", doctor_id)
        ])))
        .mount(&mock_server)
        .await;

    let expired_lock = json!([{
        "id": Uuid::new_v4(),
        "lock_key": "cap_stale",
        "doctor_id": doctor_id,
        "acquired_at": (Utc::now() - Duration::minutes(5)).to_rfc3339(),
        "expires_at": (Utc::now() - Duration::minutes(4)).to_rfc3339(),
        "process_id": "scheduler_stale"
    }]);

    Mock::given(method("GET"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(expired_lock))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    mount_count_mock(&mock_server, doctor_id, 0).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockStoreRows::appointment_row(
                Uuid::new_v4(),
                request.patient_id,
                doctor_id,
                &request.appointment_date.format("%Y-%m-%d").to_string(),
                &request.details,
                "Scheduled",
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let appointment = guard.admit(&request, "token").await.unwrap();
    assert_eq!(appointment.doctor_id, doctor_id);
}
