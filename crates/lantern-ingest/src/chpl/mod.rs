// CHPL (Certified Health IT Product List) ingestion
//
// The registry publishes every certified product as one JSON collection.
// The flow mirrors the other ingestion paths in this crate:
// - Client: HTTP download of the collection (cancellable mid-request)
// - Wire: decoding into ChplCertifiedProduct
// - Parse/Normalize: composite fields into a canonical ProductRecord
// - Persist: reconcile against the store through the batch pipeline

pub mod client;
pub mod normalize;
pub mod parse;
pub mod persist;
pub mod wire;

pub use client::ChplClient;
pub use normalize::normalize_product;
pub use parse::{api_documentation_url, criteria_list, FormatError};
pub use persist::{ProductIngestor, ProductPersister};
pub use wire::{decode_product_list, ChplCertifiedProduct, PRODUCT_FIELDS};
