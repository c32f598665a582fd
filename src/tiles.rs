// ============================================================================
// TILES - sparse tiled pixel storage with swap-backed eviction
// ============================================================================

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::StoreError;
use crate::swap::SwapFile;

pub const TILE_WIDTH: u32 = 64;
pub const TILE_HEIGHT: u32 = 64;

// ============================================================================
// TILE
// ============================================================================

#[derive(Debug)]
enum TileData {
    /// Never written; reads as all zeroes without allocating.
    Uninit,
    Resident(Vec<u8>),
    /// Pixels live in the swap file at `swap_offset`.
    Swapped,
}

/// One fixed-size block of pixels. Edge tiles are truncated to the store
/// bounds, so `width`/`height` are the effective dimensions.
#[derive(Debug)]
pub struct Tile {
    width: u32,
    height: u32,
    bpp: u32,
    dirty: bool,
    share: u32,
    stamp: u64,
    swap_offset: Option<u64>,
    data: TileData,
}

impl Tile {
    /// A detached tile with no pixel data yet; reads as zeroes once faulted.
    pub fn new(width: u32, height: u32, bpp: u32) -> Self {
        Self {
            width,
            height,
            bpp,
            dirty: false,
            share: 0,
            stamp: 0,
            swap_offset: None,
            data: TileData::Uninit,
        }
    }

    /// A detached tile wrapping existing pixels.
    pub fn with_bytes(width: u32, height: u32, bpp: u32, bytes: Vec<u8>) -> Self {
        assert_eq!(
            bytes.len(),
            width as usize * height as usize * bpp as usize,
            "tile byte length mismatch"
        );
        let mut tile = Self::new(width, height, bpp);
        tile.data = TileData::Resident(bytes);
        tile.dirty = true;
        tile
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.data, TileData::Resident(_))
    }

    /// True once the tile holds real content, resident or swapped.
    pub fn is_allocated(&self) -> bool {
        !matches!(self.data, TileData::Uninit)
    }

    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.bpp as usize
    }

    pub fn resident_bytes(&self) -> usize {
        match &self.data {
            TileData::Resident(v) => v.len(),
            _ => 0,
        }
    }

    /// Pixel bytes. The tile must be resident.
    pub fn data(&self) -> &[u8] {
        match &self.data {
            TileData::Resident(v) => v,
            _ => panic!("tile data accessed while not resident"),
        }
    }

    /// Mutable pixel bytes. The tile must be resident.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            TileData::Resident(v) => v,
            _ => panic!("tile data accessed while not resident"),
        }
    }

    #[inline]
    fn pixel_offset(&self, tx: u32, ty: u32) -> usize {
        ((ty * self.width + tx) * self.bpp) as usize
    }

    /// Materializes the tile: zero-fill for uninit, swap-in for swapped.
    fn fault_in(&mut self, swap: &mut SwapFile) -> Result<(), StoreError> {
        match &self.data {
            TileData::Resident(_) => Ok(()),
            TileData::Uninit => {
                let bytes = self.size_bytes();
                let mut buf = Vec::new();
                buf.try_reserve_exact(bytes)
                    .map_err(|_| StoreError::OutOfMemory { bytes })?;
                buf.resize(bytes, 0);
                swap.note_resident(bytes);
                self.data = TileData::Resident(buf);
                Ok(())
            }
            TileData::Swapped => {
                let offset = self.swap_offset.ok_or(StoreError::NoSwapSlot)?;
                let buf = swap.read_slot(offset, self.size_bytes())?;
                swap.note_resident(buf.len());
                self.data = TileData::Resident(buf);
                Ok(())
            }
        }
    }

    /// Pushes a resident tile out of memory. Dirty tiles are written to their
    /// swap slot first; a clean tile that never had content falls back to the
    /// implicit zero state. On write failure the tile stays resident and
    /// dirty, so nothing is lost.
    fn evict(&mut self, swap: &mut SwapFile) -> Result<(), StoreError> {
        debug_assert_eq!(self.share, 0, "evicting a shared tile");
        let TileData::Resident(buf) = &self.data else {
            return Ok(());
        };
        if self.dirty {
            let offset = match self.swap_offset {
                Some(off) => off,
                None => {
                    let off = swap.alloc_slot(buf.len());
                    self.swap_offset = Some(off);
                    off
                }
            };
            swap.write_slot(offset, buf)?;
            self.dirty = false;
        }
        swap.note_evicted(buf.len());
        self.data = match self.swap_offset {
            Some(_) => TileData::Swapped,
            None => TileData::Uninit,
        };
        Ok(())
    }

    /// Releases the tile's memory and swap slot; it reads as zeroes again.
    fn discard(&mut self, swap: &mut SwapFile) {
        if let TileData::Resident(buf) = &self.data {
            swap.note_evicted(buf.len());
        }
        if let Some(off) = self.swap_offset.take() {
            swap.release_slot(off, self.size_bytes());
        }
        self.data = TileData::Uninit;
        self.dirty = false;
    }
}

// ============================================================================
// TILE MANAGER
// ============================================================================

/// How a tile is being acquired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Fault the tile in for reading.
    Read,
    /// Fault the tile in and mark it dirty.
    Write,
}

/// Copyable handle to an acquired tile. Release exactly once per acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRef {
    index: usize,
    shadow: bool,
}

/// A sparse grid of tiles covering a `width` x `height` raster.
///
/// Tiles allocate lazily on first access, swap out through a shared
/// [`SwapFile`] when the resident budget is exceeded, and can be replaced
/// wholesale via [`TileManager::map_tile`] so undo never copies pixels.
#[derive(Debug)]
pub struct TileManager {
    width: u32,
    height: u32,
    bpp: u32,
    offset_x: i32,
    offset_y: i32,
    tiles_per_row: u32,
    tiles_per_col: u32,
    tiles: Vec<Tile>,
    /// Staging grid for writes that commit or discard atomically.
    shadow: Option<Vec<Tile>>,
}

impl TileManager {
    pub fn new(width: u32, height: u32, bpp: u32) -> Self {
        assert!(bpp >= 1 && bpp <= 4, "unsupported bytes-per-pixel: {bpp}");
        let tiles_per_row = (width + TILE_WIDTH - 1) / TILE_WIDTH;
        let tiles_per_col = (height + TILE_HEIGHT - 1) / TILE_HEIGHT;
        let tiles = Self::empty_grid(width, height, bpp, tiles_per_row, tiles_per_col);
        Self {
            width,
            height,
            bpp,
            offset_x: 0,
            offset_y: 0,
            tiles_per_row,
            tiles_per_col,
            tiles,
            shadow: None,
        }
    }

    fn empty_grid(width: u32, height: u32, bpp: u32, cols: u32, rows: u32) -> Vec<Tile> {
        let mut tiles = Vec::with_capacity((cols * rows) as usize);
        for ty in 0..rows {
            for tx in 0..cols {
                let tw = TILE_WIDTH.min(width - tx * TILE_WIDTH);
                let th = TILE_HEIGHT.min(height - ty * TILE_HEIGHT);
                tiles.push(Tile::new(tw, th, bpp));
            }
        }
        tiles
    }

    /// Imports raw RGBA bytes, tiling in parallel. Tiles whose pixels are all
    /// zero stay unallocated.
    pub fn from_raw_rgba(
        width: u32,
        height: u32,
        data: &[u8],
        swap: &mut SwapFile,
    ) -> Result<Self, StoreError> {
        assert_eq!(
            data.len(),
            width as usize * height as usize * 4,
            "raw buffer length mismatch"
        );
        let mut mgr = Self::new(width, height, 4);
        let cols = mgr.tiles_per_row;
        let total = mgr.tiles.len();

        let filled: Vec<(usize, Option<Vec<u8>>)> = (0..total)
            .into_par_iter()
            .map(|flat| -> Result<(usize, Option<Vec<u8>>), StoreError> {
                let tx = flat as u32 % cols;
                let ty = flat as u32 / cols;
                let base_x = (tx * TILE_WIDTH) as usize;
                let base_y = (ty * TILE_HEIGHT) as usize;
                let tw = (TILE_WIDTH.min(width - tx * TILE_WIDTH)) as usize;
                let th = (TILE_HEIGHT.min(height - ty * TILE_HEIGHT)) as usize;
                let bytes = tw * th * 4;
                let mut buf = Vec::new();
                buf.try_reserve_exact(bytes)
                    .map_err(|_| StoreError::OutOfMemory { bytes })?;
                buf.resize(bytes, 0);
                let mut has_content = false;
                for row in 0..th {
                    let src_start = ((base_y + row) * width as usize + base_x) * 4;
                    let n = tw * 4;
                    let src = &data[src_start..src_start + n];
                    buf[row * n..(row + 1) * n].copy_from_slice(src);
                    if !has_content && src.iter().any(|&b| b != 0) {
                        has_content = true;
                    }
                }
                Ok((flat, has_content.then_some(buf)))
            })
            .collect::<Result<_, _>>()?;

        for (flat, buf) in filled {
            if let Some(buf) = buf {
                swap.note_resident(buf.len());
                let tile = &mut mgr.tiles[flat];
                tile.data = TileData::Resident(buf);
                tile.dirty = true;
            }
        }
        Ok(mgr)
    }

    pub fn from_rgba_image(img: &RgbaImage, swap: &mut SwapFile) -> Result<Self, StoreError> {
        Self::from_raw_rgba(img.width(), img.height(), img.as_raw(), swap)
    }

    // ---- geometry ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    /// Placement of this store inside a larger coordinate space.
    pub fn offset(&self) -> (i32, i32) {
        (self.offset_x, self.offset_y)
    }

    pub fn set_offset(&mut self, x: i32, y: i32) {
        self.offset_x = x;
        self.offset_y = y;
    }

    /// Grid dimensions in tiles: (columns, rows).
    pub fn grid_size(&self) -> (u32, u32) {
        (self.tiles_per_row, self.tiles_per_col)
    }

    /// Effective pixel size of the tile at grid position (tx, ty).
    pub fn tile_dims(&self, tx: u32, ty: u32) -> (u32, u32) {
        assert!(tx < self.tiles_per_row && ty < self.tiles_per_col);
        (
            TILE_WIDTH.min(self.width - tx * TILE_WIDTH),
            TILE_HEIGHT.min(self.height - ty * TILE_HEIGHT),
        )
    }

    #[inline(always)]
    fn tile_index(&self, x: u32, y: u32) -> usize {
        ((y / TILE_HEIGHT) * self.tiles_per_row + (x / TILE_WIDTH)) as usize
    }

    #[inline(always)]
    fn grid_index(&self, tx: u32, ty: u32) -> usize {
        assert!(tx < self.tiles_per_row && ty < self.tiles_per_col);
        (ty * self.tiles_per_row + tx) as usize
    }

    fn tile(&self, r: TileRef) -> &Tile {
        if r.shadow {
            &self.shadow.as_ref().expect("shadow grid missing")[r.index]
        } else {
            &self.tiles[r.index]
        }
    }

    fn tile_mut(&mut self, r: TileRef) -> &mut Tile {
        if r.shadow {
            &mut self.shadow.as_mut().expect("shadow grid missing")[r.index]
        } else {
            &mut self.tiles[r.index]
        }
    }

    // ---- acquire / release -----------------------------------------------------

    /// Acquires the tile covering pixel (x, y), faulting it in.
    ///
    /// Panics if the coordinate is out of range.
    pub fn acquire(
        &mut self,
        x: u32,
        y: u32,
        mode: AccessMode,
        swap: &mut SwapFile,
    ) -> Result<TileRef, StoreError> {
        assert!(x < self.width && y < self.height, "tile coordinate out of range");
        let index = self.tile_index(x, y);
        let tile = &mut self.tiles[index];
        tile.fault_in(swap)?;
        tile.share += 1;
        tile.stamp = swap.touch();
        if mode == AccessMode::Write {
            tile.dirty = true;
        }
        Ok(TileRef { index, shadow: false })
    }

    /// Acquires against the shadow grid, creating it on demand. Shadow tiles
    /// start as zeroes regardless of the main grid's content.
    pub fn acquire_shadow(
        &mut self,
        x: u32,
        y: u32,
        mode: AccessMode,
        swap: &mut SwapFile,
    ) -> Result<TileRef, StoreError> {
        assert!(x < self.width && y < self.height, "tile coordinate out of range");
        if self.shadow.is_none() {
            self.shadow = Some(Self::empty_grid(
                self.width,
                self.height,
                self.bpp,
                self.tiles_per_row,
                self.tiles_per_col,
            ));
        }
        let index = self.tile_index(x, y);
        let tile = &mut self.shadow.as_mut().expect("just created")[index];
        tile.fault_in(swap)?;
        tile.share += 1;
        tile.stamp = swap.touch();
        if mode == AccessMode::Write {
            tile.dirty = true;
        }
        Ok(TileRef { index, shadow: true })
    }

    /// Drops one share of an acquired tile. When the swap ledger is over
    /// budget this walks the manager's own zero-share tiles oldest-first and
    /// evicts until back under (or out of candidates).
    pub fn release(&mut self, tile: TileRef, dirty: bool, swap: &mut SwapFile) {
        let t = self.tile_mut(tile);
        debug_assert!(t.share > 0, "release without matching acquire");
        t.share = t.share.saturating_sub(1);
        if dirty {
            t.dirty = true;
        }
        if swap.over_budget() {
            self.evict_lru(swap);
        }
    }

    fn evict_lru(&mut self, swap: &mut SwapFile) {
        let mut candidates: Vec<(u64, usize, bool)> = Vec::new();
        for (i, t) in self.tiles.iter().enumerate() {
            if t.share == 0 && t.is_resident() {
                candidates.push((t.stamp, i, false));
            }
        }
        if let Some(shadow) = &self.shadow {
            for (i, t) in shadow.iter().enumerate() {
                if t.share == 0 && t.is_resident() {
                    candidates.push((t.stamp, i, true));
                }
            }
        }
        candidates.sort_unstable_by_key(|&(stamp, _, _)| stamp);
        for (_, i, in_shadow) in candidates {
            if !swap.over_budget() {
                break;
            }
            let tile = if in_shadow {
                &mut self.shadow.as_mut().expect("candidate came from shadow")[i]
            } else {
                &mut self.tiles[i]
            };
            if let Err(e) = tile.evict(swap) {
                log::warn!("tile eviction failed: {e}; stopping eviction pass");
                break;
            }
        }
    }

    /// Pixel bytes of an acquired tile.
    pub fn data(&self, tile: TileRef) -> &[u8] {
        self.tile(tile).data()
    }

    /// Mutable pixel bytes of an acquired tile.
    pub fn data_mut(&mut self, tile: TileRef) -> &mut [u8] {
        self.tile_mut(tile).data_mut()
    }

    /// Effective dimensions of an acquired tile.
    pub fn tile_size(&self, tile: TileRef) -> (u32, u32) {
        let t = self.tile(tile);
        (t.width, t.height)
    }

    // ---- tile mapping ------------------------------------------------------------

    /// Atomically replaces the tile under pixel (x, y) with `tile`, returning
    /// the displaced tile. Undo swaps whole tiles this way instead of copying
    /// pixels back and forth.
    ///
    /// Panics if the slot is shared or the geometry does not match.
    pub fn map_tile(&mut self, x: u32, y: u32, mut tile: Tile, swap: &mut SwapFile) -> Tile {
        assert!(x < self.width && y < self.height, "tile coordinate out of range");
        let index = self.tile_index(x, y);
        let slot = &mut self.tiles[index];
        assert_eq!(slot.share, 0, "map_tile on a shared tile");
        assert!(
            tile.width == slot.width && tile.height == slot.height && tile.bpp == slot.bpp,
            "map_tile geometry mismatch"
        );
        if let TileData::Resident(b) = &tile.data {
            swap.note_resident(b.len());
        }
        if let TileData::Resident(b) = &slot.data {
            swap.note_evicted(b.len());
        }
        tile.stamp = swap.touch();
        tile.share = 0;
        std::mem::replace(slot, tile)
    }

    // ---- shadow commit ---------------------------------------------------------

    /// Swaps every written shadow tile into the main grid and returns the
    /// displaced originals as `(tile_col, tile_row, tile)`. Untouched slots
    /// keep their main tile. The shadow grid is gone afterwards.
    pub fn commit_shadow(&mut self, swap: &mut SwapFile) -> Vec<(u32, u32, Tile)> {
        let Some(shadow) = self.shadow.take() else {
            return Vec::new();
        };
        let cols = self.tiles_per_row;
        let mut displaced = Vec::new();
        for (idx, mut stile) in shadow.into_iter().enumerate() {
            if !stile.is_allocated() {
                continue;
            }
            debug_assert_eq!(stile.share, 0, "commit with live shadow tile refs");
            stile.dirty = true;
            let old = std::mem::replace(&mut self.tiles[idx], stile);
            debug_assert_eq!(old.share, 0, "commit displacing a shared tile");
            if let TileData::Resident(b) = &old.data {
                swap.note_evicted(b.len());
            }
            displaced.push((idx as u32 % cols, idx as u32 / cols, old));
        }
        displaced
    }

    /// Throws the shadow grid away without touching the main grid.
    pub fn discard_shadow(&mut self, swap: &mut SwapFile) {
        if let Some(mut shadow) = self.shadow.take() {
            for tile in &mut shadow {
                tile.discard(swap);
            }
        }
    }

    // ---- resize / teardown --------------------------------------------------------

    /// Reallocates the grid for new dimensions, moving tiles whose geometry
    /// is unchanged and clearing everything else. Any shadow grid is dropped.
    pub fn resize(&mut self, width: u32, height: u32, swap: &mut SwapFile) {
        if width == self.width && height == self.height {
            return;
        }
        debug_assert!(
            self.tiles.iter().all(|t| t.share == 0),
            "resize with outstanding tile refs"
        );
        self.discard_shadow(swap);
        let new_cols = (width + TILE_WIDTH - 1) / TILE_WIDTH;
        let new_rows = (height + TILE_HEIGHT - 1) / TILE_HEIGHT;
        let mut next = Self::empty_grid(width, height, self.bpp, new_cols, new_rows);
        for ty in 0..self.tiles_per_col.min(new_rows) {
            for tx in 0..self.tiles_per_row.min(new_cols) {
                let old_idx = (ty * self.tiles_per_row + tx) as usize;
                let new_idx = (ty * new_cols + tx) as usize;
                if self.tiles[old_idx].width == next[new_idx].width
                    && self.tiles[old_idx].height == next[new_idx].height
                {
                    std::mem::swap(&mut self.tiles[old_idx], &mut next[new_idx]);
                }
            }
        }
        for tile in &mut self.tiles {
            tile.discard(swap);
        }
        self.tiles = next;
        self.width = width;
        self.height = height;
        self.tiles_per_row = new_cols;
        self.tiles_per_col = new_rows;
    }

    /// Tears the manager down, returning its swap slots and ledger bytes.
    pub fn dispose(mut self, swap: &mut SwapFile) {
        self.discard_shadow(swap);
        for tile in &mut self.tiles {
            tile.discard(swap);
        }
    }

    // ---- pixel access ---------------------------------------------------------------

    /// Copies one pixel out; unallocated tiles read as zeroes.
    pub fn get_pixel(
        &mut self,
        x: u32,
        y: u32,
        out: &mut [u8],
        swap: &mut SwapFile,
    ) -> Result<(), StoreError> {
        assert!(x < self.width && y < self.height, "pixel out of range");
        assert_eq!(out.len(), self.bpp as usize);
        let idx = self.tile_index(x, y);
        if !self.tiles[idx].is_allocated() {
            out.fill(0);
            return Ok(());
        }
        self.tiles[idx].fault_in(swap)?;
        let tile = &self.tiles[idx];
        let off = tile.pixel_offset(x % TILE_WIDTH, y % TILE_HEIGHT);
        out.copy_from_slice(&tile.data()[off..off + self.bpp as usize]);
        Ok(())
    }

    /// Writes one pixel, faulting the tile in and marking it dirty.
    pub fn put_pixel(
        &mut self,
        x: u32,
        y: u32,
        px: &[u8],
        swap: &mut SwapFile,
    ) -> Result<(), StoreError> {
        assert!(x < self.width && y < self.height, "pixel out of range");
        assert_eq!(px.len(), self.bpp as usize);
        let idx = self.tile_index(x, y);
        self.tiles[idx].fault_in(swap)?;
        let tile = &mut self.tiles[idx];
        let off = tile.pixel_offset(x % TILE_WIDTH, y % TILE_HEIGHT);
        tile.data_mut()[off..off + px.len()].copy_from_slice(px);
        tile.dirty = true;
        tile.stamp = swap.touch();
        Ok(())
    }

    // ---- bulk transfer ----------------------------------------------------------------

    /// Copies the rect `(rx, ry, rw, rh)` into `out` as packed rows, clipped
    /// to the store bounds. Row-level memcpy per overlapping tile.
    pub fn extract_region(
        &mut self,
        rx: u32,
        ry: u32,
        rw: u32,
        rh: u32,
        out: &mut Vec<u8>,
        swap: &mut SwapFile,
    ) -> Result<(u32, u32), StoreError> {
        let rx2 = rx.saturating_add(rw).min(self.width);
        let ry2 = ry.saturating_add(rh).min(self.height);
        let rx = rx.min(self.width);
        let ry = ry.min(self.height);
        let w = rx2.saturating_sub(rx);
        let h = ry2.saturating_sub(ry);
        let bpp = self.bpp as usize;
        let total = w as usize * h as usize * bpp;
        out.clear();
        out.try_reserve_exact(total)
            .map_err(|_| StoreError::OutOfMemory { bytes: total })?;
        out.resize(total, 0);
        if w == 0 || h == 0 {
            return Ok((w, h));
        }

        let out_stride = w as usize * bpp;
        for ty in ry / TILE_HEIGHT..=(ry2 - 1) / TILE_HEIGHT {
            for tx in rx / TILE_WIDTH..=(rx2 - 1) / TILE_WIDTH {
                let idx = (ty * self.tiles_per_row + tx) as usize;
                if !self.tiles[idx].is_allocated() {
                    continue; // zeroes are already in place
                }
                self.tiles[idx].fault_in(swap)?;
                let tile = &self.tiles[idx];
                let base_x = tx * TILE_WIDTH;
                let base_y = ty * TILE_HEIGHT;
                let ox = rx.max(base_x);
                let oy = ry.max(base_y);
                let ox2 = rx2.min(base_x + tile.width);
                let oy2 = ry2.min(base_y + tile.height);
                let tile_stride = tile.width as usize * bpp;
                let data = tile.data();
                let n = (ox2 - ox) as usize * bpp;
                for row in oy..oy2 {
                    let src_start =
                        ((row - base_y) as usize) * tile_stride + ((ox - base_x) as usize) * bpp;
                    let dst_start =
                        ((row - ry) as usize) * out_stride + ((ox - rx) as usize) * bpp;
                    out[dst_start..dst_start + n].copy_from_slice(&data[src_start..src_start + n]);
                }
            }
        }
        Ok((w, h))
    }

    /// Writes packed rows of `src_w` x `src_h` pixels at (dst_x, dst_y),
    /// clipped to the store bounds. Touched tiles are marked dirty.
    pub fn blit_region(
        &mut self,
        dst_x: i32,
        dst_y: i32,
        src_w: u32,
        src_h: u32,
        data: &[u8],
        swap: &mut SwapFile,
    ) -> Result<(), StoreError> {
        let bpp = self.bpp as usize;
        assert_eq!(
            data.len(),
            src_w as usize * src_h as usize * bpp,
            "blit buffer length mismatch"
        );
        let ix0 = dst_x.max(0) as i64;
        let iy0 = dst_y.max(0) as i64;
        let ix1 = (dst_x as i64 + src_w as i64).min(self.width as i64);
        let iy1 = (dst_y as i64 + src_h as i64).min(self.height as i64);
        if ix1 <= ix0 || iy1 <= iy0 {
            return Ok(());
        }
        let (ix0, iy0, ix1, iy1) = (ix0 as u32, iy0 as u32, ix1 as u32, iy1 as u32);
        let src_stride = src_w as usize * bpp;

        for ty in iy0 / TILE_HEIGHT..=(iy1 - 1) / TILE_HEIGHT {
            for tx in ix0 / TILE_WIDTH..=(ix1 - 1) / TILE_WIDTH {
                let idx = (ty * self.tiles_per_row + tx) as usize;
                self.tiles[idx].fault_in(swap)?;
                let stamp = swap.touch();
                let tile = &mut self.tiles[idx];
                let base_x = tx * TILE_WIDTH;
                let base_y = ty * TILE_HEIGHT;
                let ox = ix0.max(base_x);
                let oy = iy0.max(base_y);
                let ox2 = ix1.min(base_x + tile.width);
                let oy2 = iy1.min(base_y + tile.height);
                let tile_stride = tile.width as usize * bpp;
                let n = (ox2 - ox) as usize * bpp;
                let dst = tile.data_mut();
                for row in oy..oy2 {
                    let src_start = ((row as i64 - dst_y as i64) as usize) * src_stride
                        + ((ox as i64 - dst_x as i64) as usize) * bpp;
                    let dst_start =
                        ((row - base_y) as usize) * tile_stride + ((ox - base_x) as usize) * bpp;
                    dst[dst_start..dst_start + n].copy_from_slice(&data[src_start..src_start + n]);
                }
                tile.dirty = true;
                tile.stamp = stamp;
            }
        }
        Ok(())
    }

    /// Fills the whole store with one pixel value. An all-zero pixel just
    /// clears back to the sparse state.
    pub fn fill(&mut self, pixel: &[u8], swap: &mut SwapFile) -> Result<(), StoreError> {
        assert_eq!(pixel.len(), self.bpp as usize, "fill pixel size mismatch");
        if pixel.iter().all(|&b| b == 0) {
            self.clear(swap);
            return Ok(());
        }
        for idx in 0..self.tiles.len() {
            self.tiles[idx].fault_in(swap)?;
            let tile = &mut self.tiles[idx];
            if pixel.len() == 1 {
                tile.data_mut().fill(pixel[0]);
            } else {
                for px in tile.data_mut().chunks_exact_mut(pixel.len()) {
                    px.copy_from_slice(pixel);
                }
            }
            tile.dirty = true;
        }
        Ok(())
    }

    /// Drops every tile back to the implicit zero state.
    pub fn clear(&mut self, swap: &mut SwapFile) {
        for tile in &mut self.tiles {
            tile.discard(swap);
        }
    }

    /// Clears every tile overlapping the rect. Tile-granular: pixels of
    /// overlapping tiles outside the rect are cleared too.
    pub fn clear_region(
        &mut self,
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        swap: &mut SwapFile,
    ) {
        let max_x = max_x.min(self.width);
        let max_y = max_y.min(self.height);
        if min_x >= max_x || min_y >= max_y {
            return;
        }
        for ty in min_y / TILE_HEIGHT..=(max_y - 1) / TILE_HEIGHT {
            for tx in min_x / TILE_WIDTH..=(max_x - 1) / TILE_WIDTH {
                let idx = (ty * self.tiles_per_row + tx) as usize;
                self.tiles[idx].discard(swap);
            }
        }
    }

    /// Flattens the whole store into an RGBA image, faulting tiles in as
    /// needed. Unallocated tiles come out as transparent black.
    pub fn to_rgba_image(&mut self, swap: &mut SwapFile) -> Result<RgbaImage, StoreError> {
        assert_eq!(self.bpp, 4, "to_rgba_image on a {}-bpp store", self.bpp);
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let out_raw = out.as_mut();
        for idx in 0..self.tiles.len() {
            if !self.tiles[idx].is_allocated() {
                continue;
            }
            self.tiles[idx].fault_in(swap)?;
            let tile = &self.tiles[idx];
            let base_x = ((idx as u32 % self.tiles_per_row) * TILE_WIDTH) as usize;
            let base_y = ((idx as u32 / self.tiles_per_row) * TILE_HEIGHT) as usize;
            let tile_stride = tile.width as usize * 4;
            let data = tile.data();
            for row in 0..tile.height as usize {
                let dst = (base_y + row) * out_stride + base_x * 4;
                out_raw[dst..dst + tile_stride]
                    .copy_from_slice(&data[row * tile_stride..(row + 1) * tile_stride]);
            }
        }
        Ok(out)
    }

    // ---- introspection -------------------------------------------------------------------

    /// Bytes currently held in memory by this manager's tiles.
    pub fn resident_bytes(&self) -> usize {
        let main: usize = self.tiles.iter().map(Tile::resident_bytes).sum();
        let shadow: usize = self
            .shadow
            .as_ref()
            .map_or(0, |s| s.iter().map(Tile::resident_bytes).sum());
        main + shadow
    }

    /// Total pixel bytes the store represents when fully materialized.
    pub fn total_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.bpp as usize
    }

    /// Grid positions of every tile holding data, row-major.
    pub fn tile_keys(&self) -> Vec<(u32, u32)> {
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_allocated())
            .map(|(i, _)| {
                (
                    i as u32 % self.tiles_per_row,
                    i as u32 / self.tiles_per_row,
                )
            })
            .collect()
    }

    /// Number of tiles holding data.
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_allocated()).count()
    }

    pub fn is_tile_allocated(&self, tx: u32, ty: u32) -> bool {
        self.tiles[self.grid_index(tx, ty)].is_allocated()
    }

    pub fn is_tile_resident(&self, tx: u32, ty: u32) -> bool {
        self.tiles[self.grid_index(tx, ty)].is_resident()
    }

    /// Pixel bytes of one tile by grid position, faulting it in if swapped.
    pub fn tile_bytes(
        &mut self,
        tx: u32,
        ty: u32,
        swap: &mut SwapFile,
    ) -> Result<&[u8], StoreError> {
        let idx = self.grid_index(tx, ty);
        self.tiles[idx].fault_in(swap)?;
        Ok(self.tiles[idx].data())
    }

    /// Replaces one tile's pixels wholesale, allocating it if needed.
    pub fn set_tile_bytes(&mut self, tx: u32, ty: u32, bytes: Vec<u8>, swap: &mut SwapFile) {
        let idx = self.grid_index(tx, ty);
        let tile = &mut self.tiles[idx];
        assert_eq!(bytes.len(), tile.size_bytes(), "tile byte length mismatch");
        tile.discard(swap);
        swap.note_resident(bytes.len());
        tile.data = TileData::Resident(bytes);
        tile.dirty = true;
        tile.stamp = swap.touch();
    }
}
