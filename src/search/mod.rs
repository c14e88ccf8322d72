pub mod cache;
pub mod engine;
pub mod priority_stream;
pub mod walker;

pub use cache::ResultCache;
pub use engine::{MatchKind, SearchEngine, SearchMatch, SearchMetricsEvent, SearchMetricsSink, SearchOptions, SearchStrategy};
pub use priority_stream::PriorityStream;
pub use walker::{SecurityGate, WalkOptions};
