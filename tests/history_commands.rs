use std::mem::size_of;

use tempfile::tempdir;
use tilemask::{
    AccessMode, CombineMode, Command, EditTarget, HistoryManager, Region, RegionCommand, Segment,
    SwapFile, TileManager, TilePatch, combine_rect,
};

fn setup(width: u32, height: u32) -> (SwapFile, TileManager, Region, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let swap = SwapFile::new(dir.path(), 1 << 26).unwrap();
    let tiles = TileManager::new(width, height, 4);
    let selection = Region::new(width, height);
    (swap, tiles, selection, dir)
}

/// A region with `n` one-pixel segments, for sizing history entries.
fn segmented(n: u32) -> Region {
    let mut region = Region::new(2 * n, 1);
    for i in 0..n {
        region.add_segment((2 * i) as i32, 0, 1, 255);
    }
    region
}

#[test]
fn test_tile_patch_undo_redo() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(128, 64);
    let mut history = HistoryManager::new(10);

    tiles.put_pixel(10, 10, &[1; 4], &mut swap).unwrap();

    // Capture the pre-change tiles, then paint over them.
    let patch = TilePatch::capture("brush stroke", &mut tiles, 0, 0, 20, 20, &mut swap).unwrap();
    assert_eq!(patch.tile_count(), 1);
    tiles.put_pixel(10, 10, &[9; 4], &mut swap).unwrap();
    tiles.put_pixel(15, 15, &[8; 4], &mut swap).unwrap();
    history.push(Box::new(patch));

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    assert_eq!(history.undo(&mut target), Some("brush stroke".into()));

    let mut out = [0; 4];
    tiles.get_pixel(10, 10, &mut out, &mut swap).unwrap();
    assert_eq!(out, [1; 4]);
    tiles.get_pixel(15, 15, &mut out, &mut swap).unwrap();
    assert_eq!(out, [0; 4]);

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    assert_eq!(history.redo(&mut target), Some("brush stroke".into()));

    tiles.get_pixel(10, 10, &mut out, &mut swap).unwrap();
    assert_eq!(out, [9; 4]);
    tiles.get_pixel(15, 15, &mut out, &mut swap).unwrap();
    assert_eq!(out, [8; 4]);
}

#[test]
fn test_tile_patch_restores_emptiness() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(128, 64);
    let mut history = HistoryManager::new(10);

    // The captured tile holds no data yet; undo must bring that back.
    let patch = TilePatch::capture("first touch", &mut tiles, 0, 0, 10, 10, &mut swap).unwrap();
    assert_eq!(patch.memory_size(), 0);
    tiles.put_pixel(5, 5, &[3; 4], &mut swap).unwrap();
    history.push(Box::new(patch));

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.undo(&mut target);
    assert!(!tiles.is_tile_allocated(0, 0));
    let mut out = [0xFF; 4];
    tiles.get_pixel(5, 5, &mut out, &mut swap).unwrap();
    assert_eq!(out, [0; 4]);

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.redo(&mut target);
    tiles.get_pixel(5, 5, &mut out, &mut swap).unwrap();
    assert_eq!(out, [3; 4]);
}

#[test]
fn test_shadow_commit_feeds_the_patch() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(128, 64);
    let mut history = HistoryManager::new(10);

    tiles.put_pixel(10, 10, &[5; 4], &mut swap).unwrap();

    // Render into the shadow grid, commit, and keep the displaced originals.
    let shadow = tiles.acquire_shadow(10, 10, AccessMode::Write, &mut swap).unwrap();
    tiles.data_mut(shadow).fill(8);
    tiles.release(shadow, true, &mut swap);
    let displaced = tiles.commit_shadow(&mut swap);
    history.push(Box::new(TilePatch::from_tiles("airbrush", displaced)));

    let mut out = [0; 4];
    tiles.get_pixel(10, 10, &mut out, &mut swap).unwrap();
    assert_eq!(out, [8; 4]);

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.undo(&mut target);
    tiles.get_pixel(10, 10, &mut out, &mut swap).unwrap();
    assert_eq!(out, [5; 4]);
}

#[test]
fn test_region_command_swaps_selections() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(64, 64);
    let mut history = HistoryManager::new(10);

    let before = selection.clone();
    combine_rect(&mut selection, CombineMode::Add, 10, 10, 20, 20);
    let after = selection.clone();
    history.push(Box::new(RegionCommand::new("select rect", before, after)));

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    assert_eq!(history.undo(&mut target), Some("select rect".into()));
    assert!(selection.is_empty());

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.redo(&mut target);
    assert!(selection.point_inside(15, 15));
}

#[test]
fn test_push_clears_redo() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(64, 64);
    let mut history = HistoryManager::new(10);

    history.push(Box::new(RegionCommand::new(
        "a",
        Region::new(64, 64),
        segmented(4),
    )));
    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.undo(&mut target);
    assert_eq!(history.redo_count(), 1);
    assert!(history.can_redo());

    history.push(Box::new(RegionCommand::new(
        "b",
        Region::new(64, 64),
        segmented(4),
    )));
    assert_eq!(history.redo_count(), 0);
    assert!(!history.can_redo());
    assert_eq!(history.undo_description(), Some("b".into()));
}

#[test]
fn test_prune_by_count() {
    let mut history = HistoryManager::new(3);
    for name in ["c0", "c1", "c2", "c3", "c4"] {
        history.push(Box::new(RegionCommand::new(
            name,
            Region::new(8, 8),
            Region::new(8, 8),
        )));
    }
    assert_eq!(history.undo_count(), 3);
    assert_eq!(history.undo_history(), vec!["c4", "c3", "c2"]);
}

#[test]
fn test_prune_by_memory_keeps_at_least_one() {
    let mut history = HistoryManager::new(100);
    let per_command = 500 * size_of::<Segment>();
    history.set_memory_limit(Some(per_command + per_command / 2));

    for name in ["big0", "big1", "big2"] {
        history.push(Box::new(RegionCommand::new(
            name,
            Region::new(1000, 1),
            segmented(500),
        )));
    }

    // Each push evicts the previous oversized entry, never the newest.
    assert_eq!(history.undo_count(), 1);
    assert_eq!(history.undo_description(), Some("big2".into()));
    assert_eq!(history.memory_usage(), per_command);
}

#[test]
fn test_memory_accounting_follows_the_stacks() {
    let mut history = HistoryManager::new(10);
    let unit = 8 * size_of::<Segment>();

    history.push(Box::new(RegionCommand::new(
        "a",
        Region::new(16, 1),
        segmented(8),
    )));
    assert_eq!(history.memory_usage(), unit);

    history.push(Box::new(RegionCommand::new(
        "b",
        Region::new(16, 1),
        segmented(8),
    )));
    assert_eq!(history.memory_usage(), 2 * unit);

    // Undo moves the entry to the redo stack without freeing it; the next
    // push drops the redo stack and its bytes.
    let (mut swap, mut tiles, mut selection, _dir) = setup(16, 16);
    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.undo(&mut target);
    assert_eq!(history.memory_usage(), 2 * unit);

    history.push(Box::new(RegionCommand::new(
        "c",
        Region::new(16, 1),
        segmented(8),
    )));
    assert_eq!(history.memory_usage(), 2 * unit);

    history.clear();
    assert_eq!(history.memory_usage(), 0);
    assert!(!history.can_undo());
}

#[test]
fn test_undo_to_walks_back_multiple_steps() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(64, 64);
    let mut history = HistoryManager::new(10);

    for i in 0..3 {
        let before = selection.clone();
        combine_rect(&mut selection, CombineMode::Add, 10 * i, 0, 5, 5);
        let after = selection.clone();
        history.push(Box::new(RegionCommand::new(
            format!("step {i}"),
            before,
            after,
        )));
    }
    assert!(selection.point_inside(21, 2));

    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    history.undo_to(2, &mut target);
    assert_eq!(history.undo_count(), 1);
    assert_eq!(history.redo_count(), 2);
    assert!(selection.point_inside(2, 2));
    assert!(!selection.point_inside(11, 2));
}

#[test]
fn test_undo_on_empty_history() {
    let (mut swap, mut tiles, mut selection, _dir) = setup(16, 16);
    let mut history = HistoryManager::new(10);
    let mut target = EditTarget {
        tiles: &mut tiles,
        selection: &mut selection,
        swap: &mut swap,
    };
    assert_eq!(history.undo(&mut target), None);
    assert_eq!(history.redo(&mut target), None);
}
