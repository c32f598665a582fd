// ============================================================================
// SNAPSHOT FILE FORMATS
// ============================================================================

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::region::{Region, Segment};
use crate::swap::SwapFile;
use crate::tiles::TileManager;

/// Magic header for tiled store snapshots.
const STORE_MAGIC: &str = "TMS1";
/// Magic header for region snapshots.
const REGION_MAGIC: &str = "TMR1";

/// Maximum supported snapshot dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted snapshot files.
pub const MAX_SNAPSHOT_DIM: u32 = 32_768;

/// Serializable tiled store snapshot, sparse tiles only.
#[derive(Serialize, Deserialize)]
struct StoreFileV1 {
    magic: String,
    width: u32,
    height: u32,
    bpp: u32,
    offset_x: i32,
    offset_y: i32,
    tiles: Vec<TileRecord>,
}

/// One stored tile. Edge tiles carry fewer bytes than interior ones.
#[derive(Serialize, Deserialize)]
struct TileRecord {
    col: u32,
    row: u32,
    bytes: Vec<u8>,
}

/// Serializable region snapshot of per-scanline coverage runs.
#[derive(Serialize, Deserialize)]
struct RegionFileV1 {
    magic: String,
    width: u32,
    height: u32,
    rows: Vec<Vec<Segment>>,
}

/// Write a sparse snapshot of the store. Swapped-out tiles fault back in to
/// be read; never-written tiles are skipped entirely.
pub fn save_store(
    manager: &mut TileManager,
    swap: &mut SwapFile,
    path: &Path,
) -> Result<(), SnapshotError> {
    let mut tiles = Vec::new();
    for (col, row) in manager.tile_keys() {
        let bytes = manager.tile_bytes(col, row, swap)?.to_vec();
        tiles.push(TileRecord { col, row, bytes });
    }

    let snapshot = StoreFileV1 {
        magic: STORE_MAGIC.to_string(),
        width: manager.width(),
        height: manager.height(),
        bpp: manager.bpp(),
        offset_x: manager.offset().0,
        offset_y: manager.offset().1,
        tiles,
    };

    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &snapshot)?;
    Ok(())
}

/// Load a store snapshot, validating all geometry before building the grid.
pub fn load_store(path: &Path, swap: &mut SwapFile) -> Result<TileManager, SnapshotError> {
    let raw = std::fs::read(path)?;
    check_magic(&raw, STORE_MAGIC)?;

    let snapshot: StoreFileV1 = bincode::deserialize(&raw)?;

    if snapshot.width == 0 || snapshot.height == 0 {
        return Err(SnapshotError::InvalidFormat(
            "store dimensions cannot be zero".into(),
        ));
    }
    if snapshot.width > MAX_SNAPSHOT_DIM || snapshot.height > MAX_SNAPSHOT_DIM {
        return Err(SnapshotError::InvalidFormat(format!(
            "store size {}x{} exceeds maximum allowed {}x{}",
            snapshot.width, snapshot.height, MAX_SNAPSHOT_DIM, MAX_SNAPSHOT_DIM
        )));
    }
    if !(1..=4).contains(&snapshot.bpp) {
        return Err(SnapshotError::InvalidFormat(format!(
            "unsupported pixel depth of {} bytes",
            snapshot.bpp
        )));
    }

    let mut manager = TileManager::new(snapshot.width, snapshot.height, snapshot.bpp);
    manager.set_offset(snapshot.offset_x, snapshot.offset_y);
    let (cols, rows) = manager.grid_size();

    for record in snapshot.tiles {
        if record.col >= cols || record.row >= rows {
            return Err(SnapshotError::InvalidFormat(format!(
                "tile ({},{}) lies outside the {}x{} grid",
                record.col, record.row, cols, rows
            )));
        }
        let (tw, th) = manager.tile_dims(record.col, record.row);
        let expected = (tw * th * snapshot.bpp) as usize;
        if record.bytes.len() != expected {
            return Err(SnapshotError::InvalidFormat(format!(
                "tile ({},{}) has {} bytes, expected {}",
                record.col,
                record.row,
                record.bytes.len(),
                expected
            )));
        }
        manager.set_tile_bytes(record.col, record.row, record.bytes, swap);
    }

    Ok(manager)
}

/// Write a region snapshot holding every scanline's coverage runs.
pub fn save_region(region: &Region, path: &Path) -> Result<(), SnapshotError> {
    let rows = (0..region.height())
        .map(|y| region.row_segments(y).to_vec())
        .collect();

    let snapshot = RegionFileV1 {
        magic: REGION_MAGIC.to_string(),
        width: region.width(),
        height: region.height(),
        rows,
    };

    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &snapshot)?;
    Ok(())
}

/// Load a region snapshot, re-checking the scanline invariants so a
/// tampered file cannot smuggle in overlapping, empty or uncoalesced runs.
pub fn load_region(path: &Path) -> Result<Region, SnapshotError> {
    let raw = std::fs::read(path)?;
    check_magic(&raw, REGION_MAGIC)?;

    let snapshot: RegionFileV1 = bincode::deserialize(&raw)?;

    if snapshot.width > MAX_SNAPSHOT_DIM || snapshot.height > MAX_SNAPSHOT_DIM {
        return Err(SnapshotError::InvalidFormat(format!(
            "region size {}x{} exceeds maximum allowed {}x{}",
            snapshot.width, snapshot.height, MAX_SNAPSHOT_DIM, MAX_SNAPSHOT_DIM
        )));
    }
    if snapshot.rows.len() != snapshot.height as usize {
        return Err(SnapshotError::InvalidFormat(format!(
            "{} scanlines for height {}",
            snapshot.rows.len(),
            snapshot.height
        )));
    }

    for (y, row) in snapshot.rows.iter().enumerate() {
        let mut prev: Option<&Segment> = None;
        for seg in row {
            if seg.start >= seg.end || seg.end > snapshot.width {
                return Err(SnapshotError::InvalidFormat(format!(
                    "malformed segment [{}, {}) on scanline {}",
                    seg.start, seg.end, y
                )));
            }
            if seg.value == 0 {
                return Err(SnapshotError::InvalidFormat(format!(
                    "zero-coverage segment on scanline {y}"
                )));
            }
            if let Some(p) = prev {
                if seg.start < p.end {
                    return Err(SnapshotError::InvalidFormat(format!(
                        "overlapping segments on scanline {y}"
                    )));
                }
                if seg.start == p.end && seg.value == p.value {
                    return Err(SnapshotError::InvalidFormat(format!(
                        "uncoalesced segments on scanline {y}"
                    )));
                }
            }
            prev = Some(seg);
        }
    }

    Ok(Region::from_rows(snapshot.width, snapshot.height, snapshot.rows))
}

/// bincode encodes a String as an 8-byte length prefix plus UTF-8 data, so
/// for the 4-char magics here bytes 8..12 hold the tag. Peeking it avoids
/// feeding an arbitrary file to the full deserializer.
fn check_magic(raw: &[u8], expected: &str) -> Result<(), SnapshotError> {
    if raw.len() < 12 {
        return Err(SnapshotError::InvalidFormat("file too small".into()));
    }
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != expected {
        return Err(SnapshotError::InvalidFormat(format!(
            "unknown magic '{magic}'"
        )));
    }
    Ok(())
}
