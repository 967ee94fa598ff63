use crate::helpers::{forecast_body, test_locations, test_logger};
use meteo_etl::{
    BigQueryClient, LocationOutcome, OpenMeteoClient, Pipeline, SqliteStager, StageOutcome,
    Staging, WarehouseTarget,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

struct TestEtl {
    provider: MockServer,
    bigquery: MockServer,
    stager: Arc<SqliteStager>,
    _store_dir: TempDir,
}

impl TestEtl {
    async fn spawn() -> Self {
        let provider = MockServer::start().await;
        let bigquery = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/bigquery/v2/projects/weather-prj/datasets/open_meteo/tables/weather_data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&bigquery)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/bigquery/v2/projects/weather-prj/datasets/open_meteo/tables/weather_data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&bigquery)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/bigquery/v2/projects/weather-prj/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobReference": { "projectId": "weather-prj", "jobId": "job-1" },
                "status": { "state": "DONE" }
            })))
            .mount(&bigquery)
            .await;

        let store_dir = tempfile::tempdir().unwrap();
        let stager = Arc::new(
            SqliteStager::new(
                test_logger(),
                store_dir.path().join("data/sqlite_database.db"),
                "weather_data",
            )
            .unwrap(),
        );

        Self {
            provider,
            bigquery,
            stager,
            _store_dir: store_dir,
        }
    }

    fn pipeline(&self) -> Pipeline {
        let source =
            OpenMeteoClient::new(test_logger(), &self.provider.uri(), "meteo-etl-test").unwrap();
        let warehouse = BigQueryClient::new(
            test_logger(),
            &self.bigquery.uri(),
            WarehouseTarget {
                project_id: String::from("weather-prj"),
                dataset_id: String::from("open_meteo"),
                table_id: String::from("weather_data"),
            },
            None,
            Duration::from_millis(10),
        );
        Pipeline::new(
            test_logger(),
            Arc::new(source),
            self.stager.clone(),
            Arc::new(warehouse),
            test_locations(),
        )
    }

    async fn uploaded_rows(&self) -> usize {
        self.bigquery
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().starts_with("/upload/"))
            .map(|r| String::from_utf8_lossy(&r.body).matches("\"city_name\":").count())
            .sum()
    }
}

#[tokio::test]
async fn three_cities_load_720_rows() {
    let etl = TestEtl::spawn().await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(240)))
        .expect(3)
        .mount(&etl.provider)
        .await;

    let report = etl.pipeline().run().await;

    assert_eq!(report.records, 720);
    assert_eq!(report.stage, StageOutcome::Succeeded { rows: 720 });
    assert_eq!(report.read_back, StageOutcome::Succeeded { rows: 720 });
    assert_eq!(report.warehouse, StageOutcome::Succeeded { rows: 720 });
    assert_eq!(etl.stager.export_all().await.unwrap().len(), 720);
    assert_eq!(etl.uploaded_rows().await, 720);
}

#[tokio::test]
async fn one_failing_city_does_not_block_the_others() {
    let etl = TestEtl::spawn().await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .and(query_param("latitude", "4.6097"))
        .respond_with(ResponseTemplate::new(502))
        .with_priority(1)
        .mount(&etl.provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(240)))
        .mount(&etl.provider)
        .await;

    let report = etl.pipeline().run().await;

    assert!(matches!(
        &report.locations[1],
        LocationOutcome::ExtractFailed { city, .. } if city == "Bogota"
    ));
    assert_eq!(report.records, 480);
    let staged = etl.stager.export_all().await.unwrap();
    assert_eq!(staged.len(), 480);
    assert!(staged.iter().all(|row| row.city_name != "Bogota"));
    assert_eq!(etl.uploaded_rows().await, 480);
}

#[tokio::test]
async fn rerun_replaces_staging_but_appends_to_warehouse() {
    let etl = TestEtl::spawn().await;
    Mock::given(method("GET"))
        .and(path("/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body(24)))
        .mount(&etl.provider)
        .await;

    etl.pipeline().run().await;
    etl.pipeline().run().await;

    assert_eq!(etl.stager.export_all().await.unwrap().len(), 72);
    assert_eq!(etl.uploaded_rows().await, 144);
}
