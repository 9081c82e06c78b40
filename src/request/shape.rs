//! Request shapes and their fixed layouts.

use crate::types::FieldType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity column of every table.
pub const ID_COLUMN: &str = "ID";
pub const RELATIVE_DATE_COLUMN: &str = "RELATIVE_DATE";
pub const DATE_COLUMN: &str = "DATE";

/// Columns every table starts with, in order.
pub const LEADING_COLUMNS: [(&str, FieldType); 3] = [
    (ID_COLUMN, FieldType::String),
    (RELATIVE_DATE_COLUMN, FieldType::DateTime),
    (DATE_COLUMN, FieldType::DateTime),
];

/// Response error code meaning the entity of a per-entity sub-request is unknown.
pub const ENTITY_NOT_FOUND_CODE: &str = "15";

const BAR_FIELDS: &[(&str, FieldType)] = &[
    ("OPEN", FieldType::Float64),
    ("HIGH", FieldType::Float64),
    ("LOW", FieldType::Float64),
    ("CLOSE", FieldType::Float64),
    ("VOLUME", FieldType::Int64),
    ("NUM_EVENTS", FieldType::Int64),
    ("VALUE", FieldType::Float64),
];

const TICK_FIELDS: &[(&str, FieldType)] = &[
    ("TYPE", FieldType::String),
    ("VALUE", FieldType::Float64),
    ("SIZE", FieldType::Int32),
    ("CONDITION_CODE", FieldType::String),
    ("EXCHANGE_CODE", FieldType::String),
    ("MIC_CODE", FieldType::String),
    ("BROKER_BUY_CODE", FieldType::String),
    ("BROKER_SELL_CODE", FieldType::String),
    ("RPS_CODE", FieldType::String),
];

/// Kind of logical call a requester drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestShape {
    /// Current values of fields for a set of entities.
    ReferenceData,
    /// Time series of fields for a set of entities.
    HistoricalData,
    /// Intraday bars, one sub-request per entity.
    IntradayBar,
    /// Intraday ticks, one sub-request per entity.
    IntradayTick,
}

impl RequestShape {
    pub const fn operation(self) -> &'static str {
        match self {
            RequestShape::ReferenceData => "ReferenceDataRequest",
            RequestShape::HistoricalData => "HistoricalDataRequest",
            RequestShape::IntradayBar => "IntradayBarRequest",
            RequestShape::IntradayTick => "IntradayTickRequest",
        }
    }

    /// Whether the call fans out into one sub-request per entity.
    pub const fn is_per_entity(self) -> bool {
        matches!(self, RequestShape::IntradayBar | RequestShape::IntradayTick)
    }

    /// Whether caller-declared fields and overrides apply.
    pub const fn accepts_fields(self) -> bool {
        !self.is_per_entity()
    }

    pub const fn accepts_event_types(self) -> bool {
        self.is_per_entity()
    }

    pub fn sub_request_count(self, entities: usize) -> usize {
        if self.is_per_entity() {
            entities
        } else {
            1
        }
    }

    /// Columns the shape always produces after the leading ones.
    pub const fn fixed_fields(self) -> &'static [(&'static str, FieldType)] {
        match self {
            RequestShape::ReferenceData | RequestShape::HistoricalData => &[],
            RequestShape::IntradayBar => BAR_FIELDS,
            RequestShape::IntradayTick => TICK_FIELDS,
        }
    }
}

impl fmt::Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// Whether `name` collides with a leading column.
pub fn is_reserved(name: &str) -> bool {
    LEADING_COLUMNS.iter().any(|(column, _)| *column == name)
}

/// Column a response element name lands in.
///
/// Known response names map to their column; anything else is taken to be
/// a requested field mnemonic and used verbatim.
pub fn column_name(response_name: &str) -> &str {
    match response_name {
        "brokerBuyCode" => "BROKER_BUY_CODE",
        "brokerSellCode" => "BROKER_SELL_CODE",
        "close" => "CLOSE",
        "conditionCode" => "CONDITION_CODE",
        "date" | "time" => DATE_COLUMN,
        "exchangeCode" => "EXCHANGE_CODE",
        "high" => "HIGH",
        "low" => "LOW",
        "micCode" => "MIC_CODE",
        "numEvents" => "NUM_EVENTS",
        "open" => "OPEN",
        "relativeDate" => RELATIVE_DATE_COLUMN,
        "rpsCode" => "RPS_CODE",
        "size" => "SIZE",
        "type" => "TYPE",
        "value" => "VALUE",
        "volume" => "VOLUME",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_properties() {
        assert_eq!(RequestShape::ReferenceData.sub_request_count(5), 1);
        assert_eq!(RequestShape::IntradayTick.sub_request_count(5), 5);
        assert!(RequestShape::HistoricalData.accepts_fields());
        assert!(!RequestShape::IntradayBar.accepts_fields());
        assert!(RequestShape::IntradayBar.accepts_event_types());
        assert_eq!(RequestShape::IntradayBar.fixed_fields().len(), 7);
        assert_eq!(RequestShape::IntradayTick.fixed_fields()[2], ("SIZE", FieldType::Int32));
    }

    #[test]
    fn test_column_mapping() {
        assert_eq!(column_name("numEvents"), "NUM_EVENTS");
        assert_eq!(column_name("time"), "DATE");
        assert_eq!(column_name("relativeDate"), "RELATIVE_DATE");
        assert_eq!(column_name("PX_LAST"), "PX_LAST");
        assert!(is_reserved("DATE"));
        assert!(!is_reserved("PX_LAST"));
    }
}
