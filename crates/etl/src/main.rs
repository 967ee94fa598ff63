use meteo_etl::{
    get_config_info, setup_logger, BigQueryClient, OpenMeteoClient, Pipeline, SqliteStager,
};
use slog::{debug, info};
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let (cli, config_source) = get_config_info()?;
    let logger = setup_logger(&cli);

    let locations = cli.locations();
    let target = cli.warehouse_target()?;

    info!(logger, "meteo-etl starting...");
    info!(logger, "  Config: {}", config_source);
    info!(logger, "  Provider URL: {}", cli.base_url());
    info!(logger, "  Staging store: {}", cli.store_path());
    info!(
        logger,
        "  Warehouse table: {}.{}.{}", target.project_id, target.dataset_id, target.table_id
    );
    debug!(logger, "locations: {:?}", locations);

    let source = OpenMeteoClient::new(logger.clone(), &cli.base_url(), &cli.user_agent())?;
    let staging = SqliteStager::new(logger.clone(), cli.store_path(), &cli.staging_table())?;
    let warehouse = BigQueryClient::new(
        logger.clone(),
        &cli.warehouse_url(),
        target,
        cli.access_token.clone(),
        cli.poll_interval(),
    );

    let pipeline = Pipeline::new(
        logger.clone(),
        Arc::new(source),
        Arc::new(staging),
        Arc::new(warehouse),
        locations,
    );
    let report = pipeline.run().await;
    debug!(logger, "run report: {:?}", report);
    Ok(())
}
