use crate::helpers::{staged_row, test_logger};
use meteo_etl::{
    daily_partitioning, weather_table_schema, BigQueryClient, TableState, Warehouse,
    WarehouseError, WarehouseTarget,
};
use serde_json::json;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const TABLE_PATH: &str = "/bigquery/v2/projects/weather-prj/datasets/open_meteo/tables/weather_data";
const TABLES_PATH: &str = "/bigquery/v2/projects/weather-prj/datasets/open_meteo/tables";
const UPLOAD_PATH: &str = "/upload/bigquery/v2/projects/weather-prj/jobs";
const JOB_PATH: &str = "/bigquery/v2/projects/weather-prj/jobs/job-1";

fn client(server: &MockServer, token: Option<&str>) -> BigQueryClient {
    BigQueryClient::new(
        test_logger(),
        &server.uri(),
        WarehouseTarget {
            project_id: String::from("weather-prj"),
            dataset_id: String::from("open_meteo"),
            table_id: String::from("weather_data"),
        },
        token.map(String::from),
        Duration::from_millis(10),
    )
}

fn job(state: &str) -> serde_json::Value {
    json!({
        "jobReference": { "projectId": "weather-prj", "jobId": "job-1", "location": "US" },
        "status": { "state": state }
    })
}

async fn reconcile(client: &BigQueryClient) -> Result<TableState, WarehouseError> {
    client
        .reconcile_schema(&weather_table_schema(), &daily_partitioning())
        .await
}

#[tokio::test]
async fn missing_table_is_created_with_daily_partitioning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "status": "NOT_FOUND" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TABLES_PATH))
        .and(body_partial_json(json!({
            "tableReference": { "tableId": "weather_data" },
            "timePartitioning": { "type": "DAY", "field": "collection_timestamp" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert_eq!(reconcile(&client(&server, None)).await.unwrap(), TableState::Created);
}

#[tokio::test]
async fn existing_table_is_updated_in_place_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "weather_data" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(TABLE_PATH))
        .and(body_partial_json(json!({
            "schema": { "fields": [{ "name": "city_name", "type": "STRING" }] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, None);
    assert_eq!(reconcile(&client).await.unwrap(), TableState::Updated);
    assert_eq!(reconcile(&client).await.unwrap(), TableState::Updated);
}

#[tokio::test]
async fn created_table_is_updated_on_the_next_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "weather_data" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TABLES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, None);
    assert_eq!(reconcile(&client).await.unwrap(), TableState::Created);
    assert_eq!(reconcile(&client).await.unwrap(), TableState::Updated);
}

#[tokio::test]
async fn failed_existence_check_is_not_treated_as_absence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = reconcile(&client(&server, None)).await.unwrap_err();
    assert!(matches!(
        err,
        WarehouseError::Status { status: 403, .. }
    ));
}

#[tokio::test]
async fn concurrent_create_falls_back_to_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TABLES_PATH))
        .respond_with(ResponseTemplate::new(409).set_body_string("Already Exists"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(reconcile(&client(&server, None)).await.unwrap(), TableState::Updated);
}

#[tokio::test]
async fn bulk_load_appends_rows_and_waits_for_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .and(query_param("uploadType", "multipart"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job("RUNNING")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JOB_PATH))
        .and(query_param("location", "US"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "projectId": "weather-prj", "jobId": "job-1", "location": "US" },
            "status": { "state": "DONE" },
            "statistics": { "load": { "outputRows": "2" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rows = vec![staged_row("Cali"), staged_row("Bogota")];
    let summary = client(&server, Some("test-token"))
        .bulk_load(&rows)
        .await
        .unwrap();
    assert_eq!(summary.job_id.as_deref(), Some("job-1"));
    assert_eq!(summary.rows_submitted, 2);
    assert_eq!(summary.output_rows, Some(2));

    let requests = server.received_requests().await.unwrap();
    let upload = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(upload.contains("\"writeDisposition\":\"WRITE_APPEND\""));
    assert!(upload.contains("\"sourceFormat\":\"NEWLINE_DELIMITED_JSON\""));
    assert!(upload.contains("\"schema\":{\"fields\":[{\"name\":\"city_name\",\"type\":\"STRING\"}"));
    assert_eq!(upload.matches("\"city_name\":").count(), 2);
    assert!(upload.contains("\"collection_timestamp\":\"2024-01-01 06:00:00.000000\""));
}

#[tokio::test]
async fn failed_load_job_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": { "projectId": "weather-prj", "jobId": "job-1" },
            "status": {
                "state": "DONE",
                "errorResult": { "reason": "invalid", "message": "Invalid timestamp" }
            }
        })))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .bulk_load(&[staged_row("Cali")])
        .await
        .unwrap_err();
    match err {
        WarehouseError::LoadJob { job_id, reason } => {
            assert_eq!(job_id, "job-1");
            assert!(reason.contains("Invalid timestamp"));
        }
        other => panic!("expected load job error, got {:?}", other),
    }
}

#[tokio::test]
async fn rejected_load_request_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .bulk_load(&[staged_row("Cali")])
        .await
        .unwrap_err();
    assert!(matches!(err, WarehouseError::Status { status: 400, .. }));
}

#[tokio::test]
async fn unreadable_job_response_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(UPLOAD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .bulk_load(&[staged_row("Cali")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WarehouseError::Decode { operation: "insert load job", .. }
    ));
    assert!(err.to_string().starts_with("unreadable insert load job response"));
}

#[tokio::test]
async fn empty_load_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let summary = client(&server, None).bulk_load(&[]).await.unwrap();
    assert_eq!(summary.rows_submitted, 0);
    assert!(summary.job_id.is_none());
}
