pub mod source;
pub mod store;

pub use source::{HttpMetricSource, InMemorySource, LocalProbeSource, MetricSource};
pub use store::MetricStore;
