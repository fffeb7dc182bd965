pub mod cache;
pub mod engine;
pub mod http;
pub mod providers;
pub mod registry;
pub mod traits;

pub use cache::SearchCache;
pub use engine::{SearchEntry, SmartSearchEngine};
pub use http::*;
pub use providers::*;
pub use registry::{CatalogSource, RateLimiter, SourceManager};
pub use traits::*;
