pub mod fake;
pub mod json_api;

pub use fake::{ConcurrencyProbe, FakeSource};
pub use json_api::JsonApiSource;
