//! Request/response calls assembled from one or more sub-requests.
//!
//! A [`Requester`] drives one logical call of a given [`RequestShape`]:
//! reference data and historical series go out as a single sub-request,
//! intraday bars and ticks as one sub-request per entity. The calling
//! thread blocks until every sub-request has delivered its terminal chunk
//! (or the configured timeout passes) and gets back a [`TabularResult`].
//!
//! Failures are scoped:
//! - a value that does not decode marks only its column in that row
//! - an entity-level failure marks its row, sibling entities are unaffected
//! - a response-level failure fails only its sub-request; the rest still run
//! - a transport failure aborts the call
//!
//! # Example
//!
//! ```ignore
//! let mut requester = session.reference_data();
//! requester.add_securities(["IBM US Equity", "MSFT US Equity"]);
//! requester.add_typed_field("px last", FieldType::Float64)?;
//!
//! let result = requester.send()?;
//! let ibm = result.get("IBM US EQUITY").unwrap();
//! println!("{:?}", ibm.value(0, "PX_LAST"));
//! ```

pub(crate) mod cycle;
mod requester;
mod shape;
mod table;

pub use requester::{CycleOutcome, RequestInputs, Requester};
pub use shape::{
    column_name, is_reserved, RequestShape, DATE_COLUMN, ENTITY_NOT_FOUND_CODE, ID_COLUMN,
    LEADING_COLUMNS, RELATIVE_DATE_COLUMN,
};
pub use table::{Column, Row, TabularResult, Table};
