use crate::model::{Quantity, Reading, ReadingDate};
use serde::Deserialize;
use serde_json::Value;

/* One row of the `data` array embedded in the history page */
#[derive(Debug, Deserialize)]
pub struct HistoryRow {
    #[serde(rename = "REGISTER", default)]
    pub register: Value,
    #[serde(rename = "SERIAL", default)]
    pub serial: Value,
    #[serde(rename = "REGISTER_DESC", default)]
    pub register_desc: Value,
    #[serde(rename = "MRINDEX", default)]
    pub index: Value,
    #[serde(rename = "CONSUMPTION", default)]
    pub consumption: Value,
    #[serde(rename = "BILLING_CONSTANT", default)]
    pub billing_constant: Value,
    #[serde(rename = "READING_TYPE", default)]
    pub reading_type: Value,
    #[serde(rename = "READING_DATE", default)]
    pub reading_date: Value,
}

/// Text of a scalar field. Numbers keep their JSON spelling; null and empty strings are absent.
fn text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

impl From<HistoryRow> for Reading {
    fn from(row: HistoryRow) -> Self {
        let register = text(&row.register).unwrap_or_default();
        Reading {
            serial: text(&row.serial).unwrap_or_default(),
            description: text(&row.register_desc).unwrap_or_else(|| register.clone()),
            register,
            index: text(&row.index).map(|raw| Quantity::from_index(&raw)),
            consumption: text(&row.consumption).map(|raw| Quantity::from_locale(&raw)),
            billing_constant: text(&row.billing_constant),
            reading_type: text(&row.reading_type),
            reading_date: text(&row.reading_date).map(|raw| ReadingDate::parse(&raw)),
        }
    }
}
