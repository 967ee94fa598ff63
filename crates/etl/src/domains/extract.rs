use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use slog::{debug, info, Logger};

use crate::Location;

/// Measurements requested per hour, in the order the provider expects them
pub const HOURLY_SERIES: [&str; 3] = ["temperature_2m", "relativehumidity_2m", "windspeed_10m"];

/// Forecast horizon requested from the provider, in days
pub const FORECAST_DAYS: u8 = 10;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("failed to retrieve data for {city}, status code: {status}")]
    Network { city: String, status: u16 },
    #[error("error sending forecast request for {city}: {source}")]
    Transport {
        city: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid forecast response for {city}: {reason}")]
    DataValidation { city: String, reason: String },
}

impl ExtractError {
    pub fn city(&self) -> &str {
        match self {
            ExtractError::Network { city, .. }
            | ExtractError::Transport { city, .. }
            | ExtractError::DataValidation { city, .. } => city,
        }
    }

    fn invalid(city: &str, reason: impl Into<String>) -> Self {
        ExtractError::DataValidation {
            city: city.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Provider response for one location, shape-checked but otherwise untouched
#[derive(Debug, Clone, PartialEq)]
pub struct RawForecastDocument {
    pub hourly: Map<String, Value>,
    pub hourly_units: Map<String, Value>,
}

impl RawForecastDocument {
    /// Validates the parsed body: `hourly` and `hourly_units` must be objects and every
    /// entry of [`HOURLY_SERIES`] must be an array.
    pub fn from_value(city: &str, body: Value) -> Result<Self, ExtractError> {
        let Value::Object(mut body) = body else {
            return Err(ExtractError::invalid(city, "response body is not an object"));
        };

        let hourly = match body.remove("hourly") {
            Some(Value::Object(hourly)) => hourly,
            Some(_) => return Err(ExtractError::invalid(city, "'hourly' is not an object")),
            None => return Err(ExtractError::invalid(city, "missing 'hourly'")),
        };
        let hourly_units = match body.remove("hourly_units") {
            Some(Value::Object(units)) => units,
            Some(_) => return Err(ExtractError::invalid(city, "'hourly_units' is not an object")),
            None => return Err(ExtractError::invalid(city, "missing 'hourly_units'")),
        };

        for key in HOURLY_SERIES {
            match hourly.get(key) {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(ExtractError::invalid(
                        city,
                        format!("hourly '{}' is not a list", key),
                    ))
                }
                None => {
                    return Err(ExtractError::invalid(
                        city,
                        format!("hourly '{}' is missing", key),
                    ))
                }
            }
        }

        Ok(Self {
            hourly,
            hourly_units,
        })
    }

    pub fn unit(&self, series: &str) -> Option<&str> {
        self.hourly_units.get(series).and_then(Value::as_str)
    }
}

#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn extract(&self, location: &Location) -> Result<RawForecastDocument, ExtractError>;
}

pub struct OpenMeteoClient {
    logger: Logger,
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(logger: Logger, base_url: &str, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            logger,
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn forecast_url(&self, location: &Location) -> String {
        format!(
            "{}/forecast?latitude={}&longitude={}&hourly={}&forecast_days={}",
            self.base_url,
            location.latitude,
            location.longitude,
            HOURLY_SERIES.join(","),
            FORECAST_DAYS
        )
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoClient {
    async fn extract(&self, location: &Location) -> Result<RawForecastDocument, ExtractError> {
        let url = self.forecast_url(location);
        debug!(self.logger, "requesting: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ExtractError::Transport {
                city: location.name.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Network {
                city: location.name.clone(),
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            ExtractError::invalid(&location.name, format!("body is not valid json: {}", e))
        })?;
        let document = RawForecastDocument::from_value(&location.name, body)?;

        debug!(
            self.logger,
            "units for {}: temperature {:?}, humidity {:?}, wind {:?}",
            location.name,
            document.unit("temperature_2m"),
            document.unit("relativehumidity_2m"),
            document.unit("windspeed_10m")
        );
        info!(self.logger, "successfully extracted data for {}", location.name);
        Ok(document)
    }
}
