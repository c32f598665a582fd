// ============================================================================
// REGION - per-scanline coverage intervals with set algebra
// ============================================================================

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Coverage threshold separating inside from outside: a pixel counts as
/// selected when its value is strictly greater than this.
pub const HALF_WAY: u8 = 127;

/// A run of identical coverage on one scanline, half-open `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
    pub value: u8,
}

/// How an incoming shape or region folds into the existing coverage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CombineMode {
    /// Drop the existing coverage and take the incoming one.
    #[default]
    Replace,
    /// Lay the incoming coverage on top.
    Add,
    /// Remove the incoming coverage.
    Subtract,
    /// Keep only the overlap, at the lower of the two values.
    Intersect,
}

/// Scanline coverage region.
///
/// Each row holds sorted, non-overlapping segments; touching runs of equal
/// value are always coalesced. An empty row is an empty vector and a
/// zero-value segment is never materialized.
#[derive(Clone, Debug)]
pub struct Region {
    width: u32,
    height: u32,
    rows: Vec<Vec<Segment>>,
    generation: u64,
    bounds_cache: Option<(u64, Option<(u32, u32, u32, u32)>)>,
}

impl Region {
    pub fn new(width: u32, height: u32) -> Self {
        assert!(
            width <= i32::MAX as u32 && height <= i32::MAX as u32,
            "region dimensions exceed supported range"
        );
        Self {
            width,
            height,
            rows: vec![Vec::new(); height as usize],
            generation: 0,
            bounds_cache: None,
        }
    }

    pub(crate) fn from_rows(width: u32, height: u32, rows: Vec<Vec<Segment>>) -> Self {
        debug_assert_eq!(rows.len(), height as usize);
        Self {
            width,
            height,
            rows,
            generation: 0,
            bounds_cache: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Monotonic mutation counter; bumps on every mutating call.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Segments of one scanline, sorted by start.
    pub fn row_segments(&self, y: u32) -> &[Segment] {
        &self.rows[y as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.is_empty())
    }

    /// Total segment count across all scanlines.
    pub fn num_segments(&self) -> usize {
        self.rows.iter().map(|row| row.len()).sum()
    }

    // ---- segment algebra -------------------------------------------------------

    /// Sets coverage `value` over `[x, x + width)` on scanline `y`.
    ///
    /// Coordinates clamp to the region extent; a request that clamps to
    /// nothing is a no-op. Overlapped spans of other values are carved away
    /// and touching runs of the same value coalesce into one.
    pub fn add_segment(&mut self, x: i32, y: i32, width: i32, value: u8) {
        self.generation += 1;
        if y < 0 || y >= self.height as i32 {
            return;
        }
        let x1 = (x as i64).clamp(0, self.width as i64) as u32;
        let x2 = (x as i64 + width.max(0) as i64).clamp(0, self.width as i64) as u32;
        if x2 <= x1 {
            return;
        }
        let row = &mut self.rows[y as usize];
        carve(row, x1, x2);
        if value == 0 {
            return;
        }
        // Everything before `pos` now lies strictly left of the span.
        let mut pos = row.partition_point(|seg| seg.end <= x1);
        let mut start = x1;
        let mut end = x2;
        if pos > 0 && row[pos - 1].end == start && row[pos - 1].value == value {
            start = row[pos - 1].start;
            row.remove(pos - 1);
            pos -= 1;
        }
        if pos < row.len() && row[pos].start == end && row[pos].value == value {
            end = row[pos].end;
            row.remove(pos);
        }
        row.insert(pos, Segment { start, end, value });
    }

    /// Subtracts coverage `value` from `[x, x + width)` on scanline `y`.
    ///
    /// Overlapped runs drop to `old - value`, saturating at zero; runs that
    /// reach zero are removed, truncated at the edges, or split in two when
    /// the subtracted span falls strictly inside. Subtracting full coverage
    /// is a pure geometric carve.
    pub fn subtract_segment(&mut self, x: i32, y: i32, width: i32, value: u8) {
        self.generation += 1;
        if value == 0 || y < 0 || y >= self.height as i32 {
            return;
        }
        let x1 = (x as i64).clamp(0, self.width as i64) as u32;
        let x2 = (x as i64 + width.max(0) as i64).clamp(0, self.width as i64) as u32;
        if x2 <= x1 {
            return;
        }
        let row = &mut self.rows[y as usize];
        let mut i = 0;
        while i < row.len() {
            let seg = row[i];
            if seg.end <= x1 {
                i += 1;
                continue;
            }
            if seg.start >= x2 {
                break;
            }
            let os = seg.start.max(x1);
            let oe = seg.end.min(x2);
            let reduced = seg.value.saturating_sub(value);
            row.remove(i);
            if seg.start < os {
                row.insert(
                    i,
                    Segment {
                        start: seg.start,
                        end: os,
                        value: seg.value,
                    },
                );
                i += 1;
            }
            if reduced > 0 {
                row.insert(
                    i,
                    Segment {
                        start: os,
                        end: oe,
                        value: reduced,
                    },
                );
                i += 1;
            }
            if oe < seg.end {
                row.insert(
                    i,
                    Segment {
                        start: oe,
                        end: seg.end,
                        value: seg.value,
                    },
                );
                i += 1;
            }
        }
        coalesce_row(row);
    }

    /// Empties every scanline.
    pub fn clear(&mut self) {
        self.generation += 1;
        for row in &mut self.rows {
            row.clear();
        }
    }

    // ---- queries ------------------------------------------------------------------

    /// True when coverage at (x, y) is above the half-way threshold.
    pub fn point_inside(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return false;
        }
        let x = x as u32;
        self.rows[y as usize]
            .iter()
            .take_while(|seg| seg.start <= x)
            .any(|seg| x < seg.end && seg.value > HALF_WAY)
    }

    /// Collects the unselected intervals of scanline `y` into `out`.
    ///
    /// Runs at or below the half-way threshold count as empty and melt into
    /// the surrounding gaps, so the output is coalesced by construction.
    /// Out-of-range scanlines are entirely empty. `out` is reused and grows
    /// as needed, never truncating a result.
    pub fn find_empty_segs(&self, y: i32, out: &mut Vec<(u32, u32)>) {
        out.clear();
        let mut x = 0;
        if y >= 0 && y < self.height as i32 {
            for seg in &self.rows[y as usize] {
                if seg.value > HALF_WAY {
                    if seg.start > x {
                        out.push((x, seg.start));
                    }
                    x = seg.end;
                }
            }
        }
        if x < self.width {
            out.push((x, self.width));
        }
    }

    /// Tight bounds `(x1, y1, x2, y2)` of all coverage, half-open, or `None`
    /// for an empty region. Cached until the next mutation.
    pub fn bounds(&mut self) -> Option<(u32, u32, u32, u32)> {
        if let Some((built, cached)) = self.bounds_cache
            && built == self.generation
        {
            return cached;
        }
        let computed = self.compute_bounds();
        self.bounds_cache = Some((self.generation, computed));
        computed
    }

    /// True when a cached bounds value is current for this generation.
    pub fn bounds_known(&self) -> bool {
        matches!(self.bounds_cache, Some((built, _)) if built == self.generation)
    }

    fn compute_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (y, row) in self.rows.iter().enumerate() {
            let (Some(first), Some(last)) = (row.first(), row.last()) else {
                continue;
            };
            bounds = Some(match bounds {
                None => (first.start, y as u32, last.end, y as u32 + 1),
                Some((x1, y1, x2, _)) => {
                    (x1.min(first.start), y1, x2.max(last.end), y as u32 + 1)
                }
            });
        }
        bounds
    }

    // ---- whole-region operations -----------------------------------------------------

    /// Flips coverage: gaps become full coverage and each value v becomes
    /// 255 - v, so partial coverage survives. Applying it twice restores the
    /// region exactly.
    pub fn invert(&mut self) {
        self.generation += 1;
        for row in &mut self.rows {
            let mut out = Vec::with_capacity(row.len() + 1);
            let mut x = 0;
            for seg in row.iter() {
                if seg.start > x {
                    out.push(Segment {
                        start: x,
                        end: seg.start,
                        value: 255,
                    });
                }
                let v = 255 - seg.value;
                if v > 0 {
                    out.push(Segment {
                        start: seg.start,
                        end: seg.end,
                        value: v,
                    });
                }
                x = seg.end;
            }
            if x < self.width {
                out.push(Segment {
                    start: x,
                    end: self.width,
                    value: 255,
                });
            }
            *row = out;
        }
    }

    /// Folds `other` into this region under `mode`.
    pub fn combine_region(&mut self, mode: CombineMode, other: &Region) {
        self.combine_offset_region(mode, other, 0, 0);
    }

    /// Folds `other`, shifted by `(dx, dy)`, into this region under `mode`.
    /// Coverage landing outside this region's extent is clipped away.
    pub fn combine_offset_region(&mut self, mode: CombineMode, other: &Region, dx: i32, dy: i32) {
        match mode {
            CombineMode::Replace => {
                self.clear();
                self.apply_segments(other, dx, dy, false);
            }
            CombineMode::Add => self.apply_segments(other, dx, dy, false),
            CombineMode::Subtract => self.apply_segments(other, dx, dy, true),
            CombineMode::Intersect => self.intersect_with(other, dx, dy),
        }
    }

    fn apply_segments(&mut self, other: &Region, dx: i32, dy: i32, subtract: bool) {
        for (y, row) in other.rows.iter().enumerate() {
            let ty = y as i64 + dy as i64;
            if ty < 0 || ty >= self.height as i64 {
                continue;
            }
            for seg in row {
                let sx = (seg.start as i64 + dx as i64)
                    .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
                let w = (seg.end - seg.start) as i32;
                if subtract {
                    self.subtract_segment(sx, ty as i32, w, seg.value);
                } else {
                    self.add_segment(sx, ty as i32, w, seg.value);
                }
            }
        }
    }

    fn intersect_with(&mut self, other: &Region, dx: i32, dy: i32) {
        self.generation += 1;
        let width = self.width as i64;
        for (y, row) in self.rows.iter_mut().enumerate() {
            let sy = y as i64 - dy as i64;
            let src = if sy >= 0 && sy < other.height as i64 {
                other.rows[sy as usize].as_slice()
            } else {
                &[]
            };
            if row.is_empty() || src.is_empty() {
                row.clear();
                continue;
            }
            let mut out: Vec<Segment> = Vec::new();
            let mut i = 0;
            let mut j = 0;
            while i < row.len() && j < src.len() {
                let a = row[i];
                let bs = (src[j].start as i64 + dx as i64).clamp(0, width) as u32;
                let be = (src[j].end as i64 + dx as i64).clamp(0, width) as u32;
                let s = a.start.max(bs);
                let e = a.end.min(be);
                if s < e {
                    push_run(&mut out, s, e, a.value.min(src[j].value));
                }
                if a.end <= be {
                    i += 1;
                } else {
                    j += 1;
                }
            }
            *row = out;
        }
    }

    /// Shifts all coverage by `(dx, dy)` in place, clipping at the edges.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.generation += 1;
        if dx == 0 && dy == 0 {
            return;
        }
        let width = self.width as i64;
        let height = self.height as i64;
        let mut next: Vec<Vec<Segment>> = vec![Vec::new(); self.rows.len()];
        for (y, row) in self.rows.iter().enumerate() {
            let ty = y as i64 + dy as i64;
            if ty < 0 || ty >= height || row.is_empty() {
                continue;
            }
            let mut out = Vec::with_capacity(row.len());
            for seg in row {
                let s = (seg.start as i64 + dx as i64).clamp(0, width) as u32;
                let e = (seg.end as i64 + dx as i64).clamp(0, width) as u32;
                if s < e {
                    out.push(Segment {
                        start: s,
                        end: e,
                        value: seg.value,
                    });
                }
            }
            next[ty as usize] = out;
        }
        self.rows = next;
    }

    // ---- mask conversion ----------------------------------------------------------------

    /// Flattens to an 8-bit coverage mask, one byte per pixel, in parallel.
    pub fn to_mask(&self) -> GrayImage {
        let mut mask = GrayImage::new(self.width, self.height);
        if self.width == 0 || self.height == 0 {
            return mask;
        }
        let width = self.width as usize;
        mask.as_mut()
            .par_chunks_mut(width)
            .zip(self.rows.par_iter())
            .for_each(|(dst, row)| {
                for seg in row {
                    dst[seg.start as usize..seg.end as usize].fill(seg.value);
                }
            });
        mask
    }

    /// Rebuilds a region from a coverage mask, run-length encoding each row.
    /// Values below `threshold` are dropped; a zero threshold behaves as 1 so
    /// zero-coverage runs are never materialized.
    pub fn from_mask(mask: &GrayImage, threshold: u8) -> Self {
        let (width, height) = mask.dimensions();
        let mut region = Self::new(width, height);
        if width == 0 || height == 0 {
            return region;
        }
        let threshold = threshold.max(1);
        region.rows = mask
            .as_raw()
            .par_chunks(width as usize)
            .map(|line| {
                let mut out: Vec<Segment> = Vec::new();
                let mut run_start = 0u32;
                let mut run_value = 0u8;
                for (x, &px) in line.iter().enumerate() {
                    let v = if px >= threshold { px } else { 0 };
                    if v != run_value {
                        if run_value != 0 {
                            out.push(Segment {
                                start: run_start,
                                end: x as u32,
                                value: run_value,
                            });
                        }
                        run_start = x as u32;
                        run_value = v;
                    }
                }
                if run_value != 0 {
                    out.push(Segment {
                        start: run_start,
                        end: width,
                        value: run_value,
                    });
                }
                out
            })
            .collect();
        region
    }
}

// ---- row helpers ---------------------------------------------------------------

/// Removes all coverage in `[x1, x2)`: contained segments go away, partial
/// overlaps are truncated and a strictly containing segment splits in two.
fn carve(row: &mut Vec<Segment>, x1: u32, x2: u32) {
    let mut i = 0;
    while i < row.len() {
        let seg = row[i];
        if seg.end <= x1 {
            i += 1;
            continue;
        }
        if seg.start >= x2 {
            break;
        }
        match (seg.start < x1, seg.end > x2) {
            (false, false) => {
                row.remove(i);
            }
            (true, false) => {
                row[i].end = x1;
                i += 1;
            }
            (false, true) => {
                row[i].start = x2;
                break;
            }
            (true, true) => {
                row[i].end = x1;
                row.insert(
                    i + 1,
                    Segment {
                        start: x2,
                        end: seg.end,
                        value: seg.value,
                    },
                );
                break;
            }
        }
    }
}

/// Merges touching neighbors of equal value.
fn coalesce_row(row: &mut Vec<Segment>) {
    let mut i = 0;
    while i + 1 < row.len() {
        if row[i].end == row[i + 1].start && row[i].value == row[i + 1].value {
            row[i].end = row[i + 1].end;
            row.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

/// Appends a run, extending the previous one when it touches with the same
/// value.
fn push_run(out: &mut Vec<Segment>, start: u32, end: u32, value: u8) {
    if let Some(last) = out.last_mut()
        && last.end == start
        && last.value == value
    {
        last.end = end;
        return;
    }
    out.push(Segment { start, end, value });
}
