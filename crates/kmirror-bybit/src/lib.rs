pub mod adapter;
pub mod endpoints;
pub mod error;
pub mod history;
pub mod normalize;
pub mod source;

pub use adapter::{BybitAdapter, Instrument, Trade};
pub use endpoints::KlineEndpoint;
pub use error::AdapterError;
pub use history::HistoryWalk;
pub use source::KlineSource;
