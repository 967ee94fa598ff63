use serde_json::Value;
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};

use crate::RawForecastDocument;

/// One forecast hour for one city, in canonical units
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRecord {
    pub city_name: String,
    /// Shared by every record produced from the same document
    pub collection_timestamp: OffsetDateTime,
    /// Provider's local wall-clock hour, no offset attached
    pub measure_datetime: PrimitiveDateTime,
    pub temperature_celsius: f64,
    pub temperature_fahrenheit: f64,
    pub temperature_kelvin: f64,
    pub humidity: f64,
    pub wind_speed_m_s: f64,
}

#[derive(thiserror::Error, Debug)]
#[error("error transforming data for {city}: {cause}")]
pub struct TransformError {
    pub city: String,
    #[source]
    pub cause: TransformCause,
}

#[derive(thiserror::Error, Debug)]
pub enum TransformCause {
    #[error("hourly '{0}' is missing")]
    MissingSeries(String),
    #[error("hourly '{0}' is not a list")]
    NotAList(String),
    #[error("hourly '{series}' has {found} entries, expected {expected}")]
    LengthMismatch {
        series: String,
        expected: usize,
        found: usize,
    },
    #[error("hourly '{series}' entry {index} is not numeric: {value}")]
    NotNumeric {
        series: String,
        index: usize,
        value: Value,
    },
    #[error("time entry {index} is not a string: {value}")]
    TimeNotString { index: usize, value: Value },
    #[error("failed to parse time '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: time::error::Parse,
    },
}

/// Transform a provider document into hourly records, stamped with the current UTC time
pub fn transform(
    document: Option<&RawForecastDocument>,
    city_name: &str,
) -> Result<Vec<HourlyRecord>, TransformError> {
    transform_at(document, city_name, OffsetDateTime::now_utc())
}

/// Same as [`transform`] with an explicit collection instant
pub fn transform_at(
    document: Option<&RawForecastDocument>,
    city_name: &str,
    collected_at: OffsetDateTime,
) -> Result<Vec<HourlyRecord>, TransformError> {
    let Some(document) = document else {
        return Ok(vec![]);
    };
    build_records(document, city_name, collected_at).map_err(|cause| TransformError {
        city: city_name.to_owned(),
        cause,
    })
}

fn build_records(
    document: &RawForecastDocument,
    city_name: &str,
    collected_at: OffsetDateTime,
) -> Result<Vec<HourlyRecord>, TransformCause> {
    let times = match document.hourly.get("time") {
        None => return Ok(vec![]),
        Some(Value::Array(times)) => times,
        Some(_) => return Err(TransformCause::NotAList(String::from("time"))),
    };

    let temperatures = series(document, "temperature_2m", times.len())?;
    let humidities = series(document, "relativehumidity_2m", times.len())?;
    let wind_speeds = series(document, "windspeed_10m", times.len())?;

    let hours = times.iter().zip(temperatures).zip(humidities).zip(wind_speeds);
    let mut records = Vec::with_capacity(times.len());
    for (i, (((time, temperature), humidity), wind_speed)) in hours.enumerate() {
        let temperature_celsius = number_at(temperature, "temperature_2m", i)?;
        let humidity = number_at(humidity, "relativehumidity_2m", i)?;
        let wind_speed_km_h = number_at(wind_speed, "windspeed_10m", i)?;

        records.push(HourlyRecord {
            city_name: city_name.to_owned(),
            collection_timestamp: collected_at,
            measure_datetime: parse_measure_datetime(i, time)?,
            temperature_celsius: round2(temperature_celsius),
            temperature_fahrenheit: round2(celsius_to_fahrenheit(temperature_celsius)),
            temperature_kelvin: round2(celsius_to_kelvin(temperature_celsius)),
            humidity: round2(humidity),
            wind_speed_m_s: round2(km_h_to_m_s(wind_speed_km_h)),
        });
    }
    Ok(records)
}

fn series<'a>(
    document: &'a RawForecastDocument,
    key: &str,
    expected: usize,
) -> Result<&'a [Value], TransformCause> {
    match document.hourly.get(key) {
        Some(Value::Array(values)) if values.len() == expected => Ok(values),
        Some(Value::Array(values)) => Err(TransformCause::LengthMismatch {
            series: key.to_owned(),
            expected,
            found: values.len(),
        }),
        Some(_) => Err(TransformCause::NotAList(key.to_owned())),
        None => Err(TransformCause::MissingSeries(key.to_owned())),
    }
}

fn number_at(value: &Value, series: &str, index: usize) -> Result<f64, TransformCause> {
    value.as_f64().ok_or_else(|| TransformCause::NotNumeric {
        series: series.to_owned(),
        index,
        value: value.clone(),
    })
}

fn parse_measure_datetime(index: usize, value: &Value) -> Result<PrimitiveDateTime, TransformCause> {
    let raw = value.as_str().ok_or_else(|| TransformCause::TimeNotString {
        index,
        value: value.clone(),
    })?;
    PrimitiveDateTime::parse(raw, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
        .map_err(|source| TransformCause::InvalidTimestamp {
            value: raw.to_owned(),
            source,
        })
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn celsius_to_kelvin(celsius: f64) -> f64 {
    celsius + 273.15
}

pub fn km_h_to_m_s(km_h: f64) -> f64 {
    km_h * 1000.0 / 3600.0
}

/// Two decimals, exact halves go to the even neighbour
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
