//! Live subscriptions with change-only notifications.
//!
//! A [`SubscriptionRegistry`] tracks a set of entities and their fields.
//! Incoming values are compared as raw text against the cached value of
//! each field; only differences produce a [`FieldChange`]. Field-level
//! errors always produce one.
//!
//! Registries support:
//! - adding entities or replacing their field sets
//! - removing entities one by one or all at once
//! - pausing live delivery while keeping definitions, and resuming it
//!
//! # Example
//!
//! ```ignore
//! let registry = session.subscriptions();
//! let updates = registry.updates();
//!
//! registry.add([SubscriptionSpec::new("IBM US Equity")
//!     .with_typed_field("last price", FieldType::Float64)])?;
//!
//! for change in updates.iter() {
//!     match change.error {
//!         Some(ref e) => eprintln!("{} {}: {}", change.ticker, change.field, e),
//!         None => println!("{} {} -> {:?}", change.ticker, change.field, change.new_value()),
//!     }
//! }
//! ```

mod registry;
mod types;

pub(crate) use registry::RegistryShared;
pub use registry::{SubscriptionRegistry, UNKNOWN_SECURITY_CODE};
pub use types::{FieldChange, SubscribedField, SubscriptionSpec};
