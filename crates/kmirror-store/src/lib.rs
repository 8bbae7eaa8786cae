pub mod error;
pub mod reader;
pub mod repository;
pub mod store;
pub mod writer;

pub use error::StoreError;
pub use reader::{Coverage, KlineReader, PairSummary};
pub use repository::Repository;
pub use store::{KlineStore, StoreStats};
pub use writer::{FlushOutcome, SqliteWriter};
