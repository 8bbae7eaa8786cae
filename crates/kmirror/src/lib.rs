//! kmirror - a self-healing local mirror of Bybit OHLCV data.
//!
//! Wires the layers together, one owner struct per dependency level:
//! store, venue adapter, gap repair engine, quality monitor, smart service.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use kmirror::models::MirrorConfig;
//!
//! # async fn run() -> Result<(), anyhow::Error> {
//! let config = MirrorConfig::default();
//! let mirror = kmirror::build_mirror(&config)?;
//! let candles = mirror.service.get_candles("BTCUSDT", "15", 200, false).await;
//! # Ok(())
//! # }
//! ```

pub use kmirror_bybit as bybit;
pub use kmirror_models as models;
pub use kmirror_service as service;
pub use kmirror_store as store;

use std::sync::Arc;

use kmirror_bybit::BybitAdapter;
use kmirror_models::MirrorConfig;
use kmirror_service::{DataQualityMonitor, GapRepairEngine, SmartKlineService};
use kmirror_store::KlineStore;

/// The assembled mirror. Everything hangs off `service` for reads; the
/// other handles exist for maintenance commands and shutdown.
pub struct Mirror {
    pub store: Arc<KlineStore>,
    pub adapter: Arc<BybitAdapter>,
    pub repair: Arc<GapRepairEngine>,
    pub quality: Arc<DataQualityMonitor>,
    pub service: Arc<SmartKlineService>,
}

/// Build the full stack from configuration. Must be called from within a
/// tokio runtime (the store spawns its writer task).
pub fn build_mirror(config: &MirrorConfig) -> Result<Mirror, anyhow::Error> {
    let market = config.service.market_type;

    let store = Arc::new(KlineStore::open(config.store.clone())?);
    let adapter = Arc::new(BybitAdapter::new(config.adapter.clone())?);
    let repair = Arc::new(GapRepairEngine::new(
        store.clone(),
        adapter.clone(),
        config.repair.clone(),
        market,
    ));
    let quality = Arc::new(DataQualityMonitor::new(
        store.clone(),
        adapter.clone(),
        repair.clone(),
        config.monitor.clone(),
        market,
    ));
    let service = SmartKlineService::new(
        store.clone(),
        adapter.clone(),
        repair.clone(),
        quality.clone(),
        config.service.clone(),
        config.retention.clone(),
    );

    Ok(Mirror {
        store,
        adapter,
        repair,
        quality,
        service,
    })
}

impl Mirror {
    /// Orderly shutdown: stop the loops, then drain the store writer.
    pub async fn shutdown(&self) {
        self.service.stop_update_service().await;
        self.quality.stop().await;
        self.store.stop().await;
    }
}
