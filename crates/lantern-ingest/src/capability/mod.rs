//! Capability receiver
//!
//! Consumes query results for FHIR endpoints. Each message either creates
//! the endpoint's info row, replaces its identity fields under a new
//! validation lineage, or only writes a fresh metadata snapshot.

pub mod message;
pub mod receiver;
pub mod selective;
pub mod validation;

pub use message::CapabilityMessage;
pub use receiver::{CapabilityReceiver, EndpointPersister};
pub use selective::persist_selective;
pub use validation::validate;
