pub mod continuity;
pub mod error;
pub mod outlier;
pub mod quality;
pub mod repair;
pub mod smart;
pub mod test_support;
pub mod working_set;

pub use continuity::{detect_price_gaps, PriceGap};
pub use error::ServiceError;
pub use outlier::{candle_features, detect_outliers, IsolationForest};
pub use quality::{DataQualityMonitor, StaleDataHandler};
pub use repair::{GapRepairEngine, RepairOutcome, RepairRun, RepairSummary};
pub use smart::{InitStatus, ServiceStatus, SmartKlineService};
pub use working_set::WorkingSet;
