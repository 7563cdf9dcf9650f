use crate::SharedClient;
use chrono::{Local, NaiveDate, TimeZone};
use deo_rs::api::Error;
use deo_rs::model::{latest_per_sensor, Quantity, Reading, ReadingDate};
use prometheus::{Encoder, GaugeVec, IntCounter, TextEncoder};

lazy_static! {
    static ref METER_INDEX_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("deo_meter_index", "latest meter index reported by the portal"),
        &["serial", "register"],
    )
    .unwrap();
    static ref METER_CONSUMPTION_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "deo_meter_consumption",
            "consumption of the latest reading period",
        ),
        &["serial", "register"],
    )
    .unwrap();
    static ref METER_READING_DATE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "deo_meter_reading_date",
            "date of the latest reading (unix seconds of local midnight)",
        ),
        &["serial", "register"],
    )
    .unwrap();
    static ref FETCH_FAILURES: IntCounter = register_int_counter!(
        "deo_fetch_failures_total",
        "collection cycles that ended without readings"
    )
    .unwrap();
}

fn local_midnight(date: NaiveDate) -> Option<i64> {
    Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Feed the latest reading of every (serial, register) pair to the gauges.
fn publish(readings: &[Reading]) {
    for reading in latest_per_sensor(readings) {
        let (serial, register) = match reading.sensor_key() {
            Some(key) => key,
            None => continue,
        };

        if let Some(index) = reading.index.as_ref().and_then(Quantity::as_f64) {
            METER_INDEX_GAUGE
                .with_label_values(&[serial, register])
                .set(index);
        }

        match reading.consumption.as_ref() {
            Some(Quantity::Number(consumption)) => {
                METER_CONSUMPTION_GAUGE
                    .with_label_values(&[serial, register])
                    .set(*consumption);
            }
            Some(Quantity::Raw(raw)) => {
                log::warn!(
                    "Consumption of {} {} is not a number: {}",
                    serial,
                    register,
                    raw
                );
            }
            None => {}
        }

        if let Some(timestamp) = reading
            .reading_date
            .as_ref()
            .and_then(ReadingDate::date)
            .and_then(local_midnight)
        {
            METER_READING_DATE_GAUGE
                .with_label_values(&[serial, register])
                .set(timestamp as f64);
        }
    }
}

/// Fetch readings; when that fails, log in from scratch once more before giving up.
fn fetch_with_relogin(client: &SharedClient) -> Result<Vec<Reading>, Error> {
    let mut client = client
        .lock()
        .map_err(|_| Error::InternalError(String::from("portal client lock poisoned")))?;

    client.fetch_readings().or_else(|e| {
        log::warn!("Fetching readings failed ({}), forcing a new login", e);
        client.reauthenticate()?;
        client.fetch_readings()
    })
}

/// Collect readings on a blocking worker and update the Prometheus exporter registry.
pub async fn collect(client: SharedClient) -> Result<Vec<Reading>, Error> {
    let result = tokio::task::spawn_blocking(move || fetch_with_relogin(&client))
        .await
        .map_err(|e| Error::InternalError(format!("collection task failed: {}", e)))?;

    match result {
        Ok(readings) => {
            publish(&readings);
            Ok(readings)
        }
        Err(e) => {
            FETCH_FAILURES.inc();
            Err(e)
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::InternalError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::InternalError(e.to_string()))
}
