use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] kmirror_store::StoreError),

    #[error("adapter error: {0}")]
    Adapter(#[from] kmirror_bybit::AdapterError),
}
