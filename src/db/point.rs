//! Conversion from Kiezbox status updates to store points.
//!
//! Every present meta field becomes a tag named after its schema field;
//! every present, non-zero integer reading becomes a float field scaled
//! from milli-units (divided by 1000). The point timestamp is the device's
//! own clock, while `time_arrival` records when the gateway saw the update.

use anyhow::{bail, Context, Result};
use chrono::DateTime;

use crate::protobuf::meshtastic::kiezbox_message::{update, CoreValues, Meta, SensorValues};
use crate::protobuf::meshtastic::KiezboxMessage;

use super::{FieldValue, Point};

/// Measurement name for core board updates.
pub const CORE_MEASUREMENT: &str = "core_values";
/// Measurement name for sensor node updates.
pub const SENSOR_MEASUREMENT: &str = "sensor_values";

/// Build a store point from a status update. Fails on messages without an
/// update or without a values payload; those are permanent rejections, not
/// retry candidates.
pub fn update_to_point(message: &KiezboxMessage) -> Result<Point> {
    let update = message
        .update
        .as_ref()
        .context("message carries no update")?;

    let mut point = match update.values.as_ref() {
        Some(update::Values::Core(core)) => {
            let mut point = Point::new(CORE_MEASUREMENT, update.unix_time);
            if let Some(router) = core.router.as_ref() {
                point
                    .fields
                    .insert("router_powered".into(), FieldValue::Bool(router.powered));
            }
            if let Some(values) = core.values.as_ref() {
                core_fields(values, &mut point);
            }
            point
        }
        Some(update::Values::Sensor(sensor)) => {
            let mut point = Point::new(SENSOR_MEASUREMENT, update.unix_time);
            if let Some(values) = sensor.values.as_ref() {
                sensor_fields(values, &mut point);
            }
            point
        }
        None => bail!("update carries no values payload"),
    };

    if let Some(meta) = update.meta.as_ref() {
        meta_tags(meta, &mut point);
    }

    let arrival = update.arrival_time.unwrap_or(update.unix_time);
    let arrival = DateTime::from_timestamp(arrival, 0)
        .context("arrival time out of range")?
        .to_rfc3339();
    point
        .fields
        .insert("time_arrival".into(), FieldValue::Str(arrival));

    Ok(point)
}

fn meta_tags(meta: &Meta, point: &mut Point) {
    let pairs: [(&str, Option<u32>); 4] = [
        ("box_id", meta.box_id),
        ("dist_id", meta.dist_id),
        ("sens_id", meta.sens_id),
        ("dev_type", meta.dev_type),
    ];
    for (name, value) in pairs {
        if let Some(value) = value {
            point.tags.insert(name.into(), value.to_string());
        }
    }
}

fn core_fields(values: &CoreValues, point: &mut Point) {
    milli(point, "temperature_out", values.temperature_out);
    milli(point, "temperature_in", values.temperature_in);
    milli(point, "humidity_in", values.humidity_in);
    milli(point, "solar_voltage", values.solar_voltage);
    milli(point, "solar_power", values.solar_power);
    milli(point, "solar_energy_day", values.solar_energy_day);
    milli(point, "solar_energy_total", values.solar_energy_total);
    milli(point, "battery_voltage", values.battery_voltage);
    milli(point, "battery_current", values.battery_current);
    milli(point, "temperature_rtc", values.temperature_rtc);
}

fn sensor_fields(values: &SensorValues, point: &mut Point) {
    milli(point, "temperature", values.temperature);
    milli(point, "humidity", values.humidity);
    milli(point, "pressure", values.pressure);
    milli(point, "battery_voltage", values.battery_voltage);
}

fn milli<T: Into<i64>>(point: &mut Point, name: &str, value: Option<T>) {
    if let Some(value) = value {
        let raw = value.into();
        // A present-but-zero reading contributes no field.
        if raw != 0 {
            point
                .fields
                .insert(name.into(), FieldValue::Float(raw as f64 / 1000.0));
        }
    }
}
