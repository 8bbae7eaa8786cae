pub mod candle;
pub mod config;
pub mod interval;
pub mod market;
pub mod progress;
pub mod quality;
pub mod schema;

pub use candle::{Candle, KlineRecord};
pub use config::{
    AdapterConfig, MirrorConfig, MonitorConfig, RepairConfig, RetentionConfig, ServiceConfig,
    StoreConfig,
};
pub use interval::{Interval, ParseIntervalError};
pub use market::MarketType;
pub use progress::{LoadStatus, LoadingProgress, SymbolState};
pub use quality::{gap_severity, AnomalyKind, AnomalyReport, Gap, QualityCheckResult, Severity};
pub use schema::{pair_key, KLINE_TABLE_DDL};
