use slog::{error, info, warn, Logger};
use std::sync::Arc;

use crate::{
    daily_partitioning, transform, weather_table_schema, ForecastSource, HourlyRecord, Location,
    StagedRow, Staging, Warehouse,
};

/// Result of running extract + transform for one location
#[derive(Debug, Clone, PartialEq)]
pub enum LocationOutcome {
    Transformed { city: String, records: usize },
    ExtractFailed { city: String, error: String },
    TransformFailed { city: String, error: String },
}

impl LocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LocationOutcome::Transformed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Succeeded { rows: usize },
    /// Not attempted because an upstream stage failed or had nothing to pass on
    Skipped { reason: String },
    Failed { error: String },
}

impl StageOutcome {
    fn skipped(reason: &str) -> Self {
        StageOutcome::Skipped {
            reason: reason.to_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub locations: Vec<LocationOutcome>,
    pub records: usize,
    pub stage: StageOutcome,
    pub read_back: StageOutcome,
    pub warehouse: StageOutcome,
}

impl RunReport {
    /// True when every location and every stage succeeded
    pub fn is_complete_success(&self) -> bool {
        self.locations.iter().all(LocationOutcome::is_success)
            && self.stage.is_success()
            && self.read_back.is_success()
            && self.warehouse.is_success()
    }
}

/// Runs extract -> transform per location, then stage -> read back -> warehouse load
pub struct Pipeline {
    logger: Logger,
    source: Arc<dyn ForecastSource>,
    staging: Arc<dyn Staging>,
    warehouse: Arc<dyn Warehouse>,
    locations: Vec<Location>,
}

impl Pipeline {
    pub fn new(
        logger: Logger,
        source: Arc<dyn ForecastSource>,
        staging: Arc<dyn Staging>,
        warehouse: Arc<dyn Warehouse>,
        locations: Vec<Location>,
    ) -> Self {
        Self {
            logger,
            source,
            staging,
            warehouse,
            locations,
        }
    }

    pub async fn run(&self) -> RunReport {
        let (records, locations) = self.extract_and_transform().await;
        let total = records.len();
        info!(self.logger, "transformed {} records from {} locations", total, self.locations.len());

        let (stage, read_back, warehouse) = match self.stage(&records).await {
            StageOutcome::Succeeded { rows: 0 } => (
                StageOutcome::Succeeded { rows: 0 },
                StageOutcome::skipped("nothing was staged"),
                StageOutcome::skipped("nothing was staged"),
            ),
            stage @ StageOutcome::Succeeded { .. } => {
                let (read_back, rows) = self.read_back().await;
                let warehouse = match rows {
                    Some(rows) if !rows.is_empty() => self.load_warehouse(&rows).await,
                    Some(_) => StageOutcome::skipped("read back returned no rows"),
                    None => StageOutcome::skipped("read back failed"),
                };
                (stage, read_back, warehouse)
            }
            stage => (
                stage,
                StageOutcome::skipped("staging failed"),
                StageOutcome::skipped("staging failed"),
            ),
        };

        let report = RunReport {
            locations,
            records: total,
            stage,
            read_back,
            warehouse,
        };
        if report.is_complete_success() {
            info!(self.logger, "ETL process completed");
        } else {
            warn!(self.logger, "ETL process completed with failures"; "report" => format!("{:?}", report));
        }
        report
    }

    async fn extract_and_transform(&self) -> (Vec<HourlyRecord>, Vec<LocationOutcome>) {
        let mut records = Vec::new();
        let mut outcomes = Vec::with_capacity(self.locations.len());

        for location in &self.locations {
            let city = location.name.clone();
            let document = match self.source.extract(location).await {
                Ok(document) => document,
                Err(e) => {
                    error!(self.logger, "skipping {}: {}", location, e);
                    outcomes.push(LocationOutcome::ExtractFailed {
                        city,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match transform(Some(&document), &location.name) {
                Ok(transformed) => {
                    outcomes.push(LocationOutcome::Transformed {
                        city,
                        records: transformed.len(),
                    });
                    records.extend(transformed);
                }
                Err(e) => {
                    error!(self.logger, "skipping {}: {}", location, e);
                    outcomes.push(LocationOutcome::TransformFailed {
                        city,
                        error: e.to_string(),
                    });
                }
            }
        }
        (records, outcomes)
    }

    async fn stage(&self, records: &[HourlyRecord]) -> StageOutcome {
        match self.staging.stage(records).await {
            Ok(rows) => StageOutcome::Succeeded { rows },
            Err(e) => {
                error!(self.logger, "error loading data into staging: {}", e);
                StageOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn read_back(&self) -> (StageOutcome, Option<Vec<StagedRow>>) {
        match self.staging.export_all().await {
            Ok(rows) => (StageOutcome::Succeeded { rows: rows.len() }, Some(rows)),
            Err(e) => {
                error!(self.logger, "error exporting staged data: {}", e);
                (
                    StageOutcome::Failed {
                        error: e.to_string(),
                    },
                    None,
                )
            }
        }
    }

    async fn load_warehouse(&self, rows: &[StagedRow]) -> StageOutcome {
        let schema = weather_table_schema();
        let partitioning = daily_partitioning();

        if let Err(e) = self.warehouse.reconcile_schema(&schema, &partitioning).await {
            error!(self.logger, "error reconciling warehouse table: {}", e);
            return StageOutcome::Failed {
                error: e.to_string(),
            };
        }
        match self.warehouse.bulk_load(rows).await {
            Ok(summary) => StageOutcome::Succeeded {
                rows: summary.rows_submitted,
            },
            Err(e) => {
                error!(self.logger, "error loading data into warehouse: {}", e);
                StageOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
