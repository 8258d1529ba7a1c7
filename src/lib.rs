pub mod api;
pub mod config;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod query;
pub mod scrape;
pub mod tags;
pub mod watcher;

pub use error::{BridgeError, Result};
pub use models::{QueryResult, Response, ResultValue, Series};
pub use query::{parse_filters, Filter, Filters, Query, RateOptions};
pub use scrape::{ScrapeTarget, Scraper};
pub use tags::TagSet;
