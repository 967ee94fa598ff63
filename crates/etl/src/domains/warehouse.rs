use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use slog::{debug, info, warn, Logger};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use crate::StagedRow;

#[derive(thiserror::Error, Debug)]
pub enum WarehouseError {
    #[error("error sending {operation} request: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("unreadable {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to encode rows for load: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("load job {job_id} failed: {reason}")]
    LoadJob { job_id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Timestamp,
    Float,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldSchema {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionType {
    Day,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePartitioning {
    #[serde(rename = "type")]
    pub partition_type: PartitionType,
    pub field: String,
}

/// Columns of the warehouse table, matching the staging table one to one
pub fn weather_table_schema() -> TableSchema {
    TableSchema {
        fields: vec![
            FieldSchema::new("city_name", FieldType::String),
            FieldSchema::new("collection_timestamp", FieldType::Timestamp),
            FieldSchema::new("measure_datetime", FieldType::Timestamp),
            FieldSchema::new("temperature_celsius", FieldType::Float),
            FieldSchema::new("temperature_fahrenheit", FieldType::Float),
            FieldSchema::new("temperature_kelvin", FieldType::Float),
            FieldSchema::new("humidity", FieldType::Float),
            FieldSchema::new("wind_speed_m_s", FieldType::Float),
        ],
    }
}

pub fn daily_partitioning() -> TimePartitioning {
    TimePartitioning {
        partition_type: PartitionType::Day,
        field: String::from("collection_timestamp"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub job_id: Option<String>,
    pub rows_submitted: usize,
    /// Row count reported by the finished job, when the backend includes it
    pub output_rows: Option<u64>,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn reconcile_schema(
        &self,
        schema: &TableSchema,
        partitioning: &TimePartitioning,
    ) -> Result<TableState, WarehouseError>;
    /// Append `rows` to the table and wait for the backend to finish the load
    async fn bulk_load(&self, rows: &[StagedRow]) -> Result<LoadSummary, WarehouseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTarget {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: Option<JobStatus>,
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    // int64 values come back as JSON strings
    output_rows: Option<String>,
}

impl Job {
    fn is_done(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "DONE")
    }

    fn output_rows(&self) -> Option<u64> {
        self.statistics
            .as_ref()
            .and_then(|s| s.load.as_ref())
            .and_then(|l| l.output_rows.as_ref())
            .and_then(|rows| rows.parse().ok())
    }
}

enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// BigQuery v2 REST client for one table
pub struct BigQueryClient {
    logger: Logger,
    client: Client,
    base_url: String,
    target: WarehouseTarget,
    access_token: Option<String>,
    poll_interval: Duration,
}

impl BigQueryClient {
    pub fn new(
        logger: Logger,
        base_url: &str,
        target: WarehouseTarget,
        access_token: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            logger,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            target,
            access_token,
            poll_interval,
        }
    }

    fn tables_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables",
            self.base_url, self.target.project_id, self.target.dataset_id
        )
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.tables_url(), self.target.table_id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn table_resource(&self, schema: &TableSchema, partitioning: &TimePartitioning) -> serde_json::Value {
        json!({
            "tableReference": {
                "projectId": self.target.project_id,
                "datasetId": self.target.dataset_id,
                "tableId": self.target.table_id,
            },
            "schema": schema,
            "timePartitioning": partitioning,
        })
    }

    /// `Ok(false)` only for a genuine not-found, anything else unexpected is an error
    async fn table_exists(&self) -> Result<bool, WarehouseError> {
        let response = send(self.request(Method::GET, &self.table_url()), "get table").await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error("get table", response).await),
        }
    }

    async fn create_table(
        &self,
        schema: &TableSchema,
        partitioning: &TimePartitioning,
    ) -> Result<CreateOutcome, WarehouseError> {
        let request = self
            .request(Method::POST, &self.tables_url())
            .json(&self.table_resource(schema, partitioning));
        let response = send(request, "create table").await?;
        match response.status() {
            status if status.is_success() => Ok(CreateOutcome::Created),
            StatusCode::CONFLICT => Ok(CreateOutcome::AlreadyExists),
            _ => Err(status_error("create table", response).await),
        }
    }

    async fn patch_table(
        &self,
        schema: &TableSchema,
        partitioning: &TimePartitioning,
    ) -> Result<(), WarehouseError> {
        let body = json!({ "schema": schema, "timePartitioning": partitioning });
        let request = self.request(Method::PATCH, &self.table_url()).json(&body);
        let response = send(request, "update table").await?;
        if !response.status().is_success() {
            return Err(status_error("update table", response).await);
        }
        Ok(())
    }

    async fn start_load_job(&self, rows: &[StagedRow]) -> Result<Job, WarehouseError> {
        let job_id = format!("meteo_etl_{}", Uuid::now_v7().simple());
        let metadata = json!({
            "jobReference": {
                "projectId": self.target.project_id,
                "jobId": job_id,
            },
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.target.project_id,
                        "datasetId": self.target.dataset_id,
                        "tableId": self.target.table_id,
                    },
                    "schema": weather_table_schema(),
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_APPEND",
                    "createDisposition": "CREATE_NEVER",
                }
            }
        });

        let mut data = String::new();
        for row in rows {
            data.push_str(&serde_json::to_string(row)?);
            data.push('\n');
        }

        let boundary = format!("meteo_etl_{}", Uuid::now_v7().simple());
        let body = multipart_related(&boundary, &metadata.to_string(), &data);
        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.base_url, self.target.project_id
        );

        debug!(self.logger, "starting load job {} with {} rows", job_id, rows.len());
        let request = self
            .request(Method::POST, &url)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let response = send(request, "insert load job").await?;
        if !response.status().is_success() {
            return Err(status_error("insert load job", response).await);
        }
        read_job(response, "insert load job").await
    }

    async fn wait_for_job(&self, mut job: Job) -> Result<Job, WarehouseError> {
        while !job.is_done() {
            sleep(self.poll_interval).await;
            let mut url = format!(
                "{}/bigquery/v2/projects/{}/jobs/{}",
                self.base_url, self.target.project_id, job.job_reference.job_id
            );
            if let Some(location) = &job.job_reference.location {
                url.push_str(&format!("?location={}", location));
            }
            let response = send(self.request(Method::GET, &url), "get load job").await?;
            if !response.status().is_success() {
                return Err(status_error("get load job", response).await);
            }
            job = read_job(response, "get load job").await?;
            debug!(
                self.logger,
                "load job {} state: {:?}",
                job.job_reference.job_id,
                job.status.as_ref().map(|s| s.state.as_str())
            );
        }
        Ok(job)
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn reconcile_schema(
        &self,
        schema: &TableSchema,
        partitioning: &TimePartitioning,
    ) -> Result<TableState, WarehouseError> {
        if self.table_exists().await? {
            self.patch_table(schema, partitioning).await?;
            info!(self.logger, "updated schema of table {}", self.target.table_id);
            return Ok(TableState::Updated);
        }

        match self.create_table(schema, partitioning).await? {
            CreateOutcome::Created => {
                info!(self.logger, "created table {}", self.target.table_id);
                Ok(TableState::Created)
            }
            CreateOutcome::AlreadyExists => {
                warn!(
                    self.logger,
                    "table {} was created concurrently, updating it instead", self.target.table_id
                );
                self.patch_table(schema, partitioning).await?;
                Ok(TableState::Updated)
            }
        }
    }

    async fn bulk_load(&self, rows: &[StagedRow]) -> Result<LoadSummary, WarehouseError> {
        if rows.is_empty() {
            debug!(self.logger, "no rows to load into {}", self.target.table_id);
            return Ok(LoadSummary {
                job_id: None,
                rows_submitted: 0,
                output_rows: None,
            });
        }

        let job = self.start_load_job(rows).await?;
        let job = self.wait_for_job(job).await?;
        let job_id = job.job_reference.job_id.clone();

        if let Some(error) = job.status.as_ref().and_then(|s| s.error_result.as_ref()) {
            return Err(WarehouseError::LoadJob {
                job_id,
                reason: format!(
                    "{}: {}",
                    error.reason.as_deref().unwrap_or("unknown"),
                    error.message.as_deref().unwrap_or("no message")
                ),
            });
        }

        info!(
            self.logger,
            "loaded {} rows into {}.{} (job {})",
            rows.len(),
            self.target.dataset_id,
            self.target.table_id,
            job_id
        );
        Ok(LoadSummary {
            output_rows: job.output_rows(),
            job_id: Some(job_id),
            rows_submitted: rows.len(),
        })
    }
}

async fn send(request: RequestBuilder, operation: &'static str) -> Result<Response, WarehouseError> {
    request
        .send()
        .await
        .map_err(|source| WarehouseError::Request { operation, source })
}

async fn status_error(operation: &'static str, response: Response) -> WarehouseError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    WarehouseError::Status {
        operation,
        status,
        body,
    }
}

async fn read_job(response: Response, operation: &'static str) -> Result<Job, WarehouseError> {
    response
        .json::<Job>()
        .await
        .map_err(|source| WarehouseError::Decode { operation, source })
}

fn multipart_related(boundary: &str, metadata: &str, data: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n{data}\r\n--{b}--\r\n",
        b = boundary,
        metadata = metadata,
        data = data
    )
}
