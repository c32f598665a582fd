// ============================================================================
// COMMAND TRAIT
// ============================================================================

use std::collections::VecDeque;

use crate::error::StoreError;
use crate::region::{Region, Segment};
use crate::swap::SwapFile;
use crate::tiles::{TILE_HEIGHT, TILE_WIDTH, Tile, TileManager};

/// Everything a command may touch when undoing or redoing.
pub struct EditTarget<'a> {
    pub tiles: &'a mut TileManager,
    pub selection: &'a mut Region,
    pub swap: &'a mut SwapFile,
}

/// Trait for undoable/redoable commands.
///
/// Commands take `&mut self` so patch-style implementations can exchange
/// their stored state with the target instead of copying it.
pub trait Command: Send + Sync {
    fn undo(&mut self, target: &mut EditTarget<'_>);
    fn redo(&mut self, target: &mut EditTarget<'_>);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// TILE PATCH - memory-efficient whole-tile undo for pixel edits
// ============================================================================

/// A set of whole tiles captured for undo/redo.
///
/// Applying the patch exchanges the stored tiles with the store's current
/// ones, so one patch flips state in both directions without ever holding
/// two copies of the pixels. Patches assume the store geometry is unchanged
/// since capture; clear the history when resizing.
pub struct TilePatch {
    description: String,
    /// Grid position and captured tile, one entry per touched tile.
    tiles: Vec<(u32, u32, Tile)>,
}

impl TilePatch {
    /// Clones every tile overlapping the pixel rect `(x, y, w, h)`, clamped
    /// to the store. Swapped-out tiles fault back in to be read.
    pub fn capture(
        description: impl Into<String>,
        manager: &mut TileManager,
        x: i32,
        y: i32,
        w: u32,
        h: u32,
        swap: &mut SwapFile,
    ) -> Result<Self, StoreError> {
        let x0 = (x.max(0) as u32).min(manager.width());
        let y0 = (y.max(0) as u32).min(manager.height());
        let x1 = (x as i64 + w as i64).clamp(0, manager.width() as i64) as u32;
        let y1 = (y as i64 + h as i64).clamp(0, manager.height() as i64) as u32;

        let mut tiles = Vec::new();
        if x0 < x1 && y0 < y1 {
            for ty in y0 / TILE_HEIGHT..(y1 + TILE_HEIGHT - 1) / TILE_HEIGHT {
                for tx in x0 / TILE_WIDTH..(x1 + TILE_WIDTH - 1) / TILE_WIDTH {
                    let (tw, th) = manager.tile_dims(tx, ty);
                    let tile = if manager.is_tile_allocated(tx, ty) {
                        let bytes = manager.tile_bytes(tx, ty, swap)?.to_vec();
                        Tile::with_bytes(tw, th, manager.bpp(), bytes)
                    } else {
                        // Remember emptiness so undo can restore it.
                        Tile::new(tw, th, manager.bpp())
                    };
                    tiles.push((tx, ty, tile));
                }
            }
        }

        Ok(Self {
            description: description.into(),
            tiles,
        })
    }

    /// Wraps tiles displaced by a shadow-grid commit. No pixel copies; the
    /// displaced originals become the undo state directly.
    pub fn from_tiles(description: impl Into<String>, tiles: Vec<(u32, u32, Tile)>) -> Self {
        Self {
            description: description.into(),
            tiles,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    fn swap_into(&mut self, target: &mut EditTarget<'_>) {
        for (tx, ty, tile) in &mut self.tiles {
            let placeholder = Tile::new(tile.width(), tile.height(), tile.bpp());
            let stored = std::mem::replace(tile, placeholder);
            let displaced =
                target
                    .tiles
                    .map_tile(*tx * TILE_WIDTH, *ty * TILE_HEIGHT, stored, target.swap);
            *tile = displaced;
        }
    }
}

impl Command for TilePatch {
    fn undo(&mut self, target: &mut EditTarget<'_>) {
        self.swap_into(target);
    }

    fn redo(&mut self, target: &mut EditTarget<'_>) {
        self.swap_into(target);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.tiles.iter().map(|(_, _, t)| t.resident_bytes()).sum()
    }
}

// ============================================================================
// REGION COMMAND - selection changes with full before/after copies
// ============================================================================

pub struct RegionCommand {
    description: String,
    before: Region,
    after: Region,
}

impl RegionCommand {
    pub fn new(description: impl Into<String>, before: Region, after: Region) -> Self {
        Self {
            description: description.into(),
            before,
            after,
        }
    }
}

impl Command for RegionCommand {
    fn undo(&mut self, target: &mut EditTarget<'_>) {
        *target.selection = self.before.clone();
    }

    fn redo(&mut self, target: &mut EditTarget<'_>) {
        *target.selection = self.after.clone();
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        region_bytes(&self.before) + region_bytes(&self.after)
    }
}

fn region_bytes(region: &Region) -> usize {
    region.num_segments() * std::mem::size_of::<Segment>()
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history manager with memory limits.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn set_memory_limit(&mut self, bytes: Option<usize>) {
        self.max_memory_bytes = bytes;
        self.prune();
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        // Clear redo stack when a new action is performed
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        // Add the new command
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);

        // Prune old commands if we exceed the limit
        self.prune();
    }

    pub fn undo(&mut self, target: &mut EditTarget<'_>) -> Option<String> {
        if let Some(mut command) = self.undo_stack.pop_back() {
            let description = command.description();
            command.undo(target);
            self.redo_stack.push_back(command);
            Some(description)
        } else {
            None
        }
    }

    pub fn redo(&mut self, target: &mut EditTarget<'_>) -> Option<String> {
        if let Some(mut command) = self.redo_stack.pop_back() {
            let description = command.description();
            command.redo(target);
            self.undo_stack.push_back(command);
            Some(description)
        } else {
            None
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    /// Get the current memory usage of the history (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Prune old commands to stay within limits
    fn prune(&mut self) {
        // Prune by count
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        // Prune by memory if limit is set
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    /// Rewind `index` steps (0 = stay at the most recent state).
    pub fn undo_to(&mut self, index: usize, target: &mut EditTarget<'_>) {
        for _ in 0..index {
            if self.can_undo() {
                self.undo(target);
            } else {
                break;
            }
        }
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}
