use thiserror::Error;

/// Errors raised by the tiled pixel store and its swap backing.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("allocation of {bytes} bytes refused")]
    OutOfMemory { bytes: usize },

    #[error("swap i/o failed: {0}")]
    Swap(#[from] std::io::Error),

    #[error("tile is swapped out but owns no swap slot")]
    NoSwapSlot,
}

/// Errors raised by region construction from curves.
#[derive(Error, Debug)]
pub enum RegionError {
    #[error("curve is not closed")]
    OpenCurve,

    #[error("curve has {points} points, expected a multiple of 3 and at least 6")]
    MalformedCurve { points: usize },
}

/// Errors raised while saving or loading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("tile store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid snapshot: {0}")]
    InvalidFormat(String),
}
