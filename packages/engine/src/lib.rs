mod apply;
mod backend;
pub mod backends;
pub mod combine;
mod config;
mod error;
mod error_classification;
pub mod errors;
pub mod geometry;
pub mod history;
mod layer;
pub mod mv;
mod notify;
mod request;
pub mod sql;
#[cfg(test)]
mod testing;
mod types;

pub use apply::{FilterOutcome, FilterSession};
pub use backend::{ConnectionProvider, LayerConnection, SqlConnection};
pub use backends::{BuildOutcome, EngineServices, FallbackReason, FilterBackend};
pub use combine::{SubsetCombiner, SubsetState};
pub use config::FilterEngineConfig;
pub use error::FilterMateError;
pub use history::{HistoryEntry, SubsetHistory};
pub use layer::{FieldInfo, FieldKind, LayerProps, ProviderType, VectorLayer};
pub use mv::MvReferenceTracker;
pub use notify::{TracingNotifier, UserNotifier};
pub use request::{
    ordered_predicates, BufferSpec, CombineOperator, EndCapStyle, FilterRequest, SourceGeometry,
    SourceTable, SpatialPredicate, WktGeometry,
};
pub use types::{QueryResult, Value};
