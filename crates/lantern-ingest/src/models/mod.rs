//! Domain models shared by the store, the reconciler and the pipelines

pub mod endpoint;
pub mod history;
pub mod product;

pub use endpoint::{
    AvailabilityCounts, CapabilityStatement, EndpointInfoRecord, EndpointListing, FhirEndpoint,
    FhirEndpointInfo, FhirEndpointMetadata, ObservationRecord, Validation,
};
pub use history::{EndpointInfoHistory, HistoryOperation, ProductHistory};
pub use product::{same_criteria, HealthItProduct, ProductKey, ProductRecord};
