#![warn(clippy::all, rust_2018_idioms)]

pub mod bezier;
pub mod boundary;
pub mod error;
pub mod history;
pub mod io;
pub mod ops;
pub mod region;
pub mod swap;
pub mod temp_buf;
pub mod tiles;

pub use bezier::{
    BezierCurve, BezierPoint, BezierTool, PointConsumer, PointKind, PressOutcome, ToolState,
};
pub use boundary::{BoundarySeg, trace, trace_with};
pub use error::{RegionError, SnapshotError, StoreError};
pub use history::{Command, EditTarget, HistoryManager, RegionCommand, TilePatch};
pub use io::{load_region, load_store, save_region, save_store};
pub use ops::shapes::{combine_ellipse, combine_rect};
pub use region::{CombineMode, HALF_WAY, Region, Segment};
pub use swap::{BufSwapper, SwapFile};
pub use temp_buf::TempBuf;
pub use tiles::{AccessMode, TILE_HEIGHT, TILE_WIDTH, Tile, TileManager, TileRef};
