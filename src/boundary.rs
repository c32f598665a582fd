// ============================================================================
// BOUNDARY - streaming outline extraction for marching-ants rendering
// ============================================================================

use crate::region::{HALF_WAY, Region};

/// One axis-aligned outline segment in corner coordinates. `(x1, y1)` and
/// `(x2, y2)` sit on pixel corners, so a lone pixel at (0, 0) traces to the
/// unit square (0,0)..(1,1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundarySeg {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Traces the outline of everything selected past the half-way threshold.
pub fn trace(region: &Region) -> Vec<BoundarySeg> {
    trace_with(region, 0, 0, |x, y| (x, y))
}

/// Like [`trace`], with an origin offset applied first and every endpoint
/// then mapped through `transform` (typically image-space to display-space).
///
/// The sweep walks scanlines top to bottom, emitting a horizontal edge
/// wherever a selected run faces an unselected span on the line above or
/// below. Each horizontal endpoint toggles a per-column open edge; closing
/// a column emits the vertical segment accumulated since it opened. Only
/// O(width) state is held at any time, segments stream out as they complete.
pub fn trace_with<F>(
    region: &Region,
    offset_x: i32,
    offset_y: i32,
    transform: F,
) -> Vec<BoundarySeg>
where
    F: Fn(i32, i32) -> (i32, i32),
{
    let mut tracer = Tracer {
        offset_x,
        offset_y,
        transform,
        open: vec![None; region.width() as usize + 1],
        segs: Vec::new(),
    };
    let mut runs: Vec<(u32, u32)> = Vec::new();
    let mut above: Vec<(u32, u32)> = Vec::new();
    let mut below: Vec<(u32, u32)> = Vec::new();

    for y in 0..region.height() as i32 {
        filled_runs(region, y as u32, &mut runs);
        if runs.is_empty() {
            continue;
        }
        region.find_empty_segs(y - 1, &mut above);
        region.find_empty_segs(y + 1, &mut below);

        for &(start, end) in &runs {
            for &(es, ee) in &above {
                let hs = start.max(es) as i32;
                let he = end.min(ee) as i32;
                if hs < he {
                    tracer.horizontal(hs, he, y);
                }
            }
            for &(es, ee) in &below {
                let hs = start.max(es) as i32;
                let he = end.min(ee) as i32;
                if hs < he {
                    tracer.horizontal(hs, he, y + 1);
                }
            }
        }
    }
    tracer.segs
}

/// Maximal selected runs of one scanline. Touching segments with different
/// coverage values form a single run as long as both clear the threshold.
fn filled_runs(region: &Region, y: u32, out: &mut Vec<(u32, u32)>) {
    out.clear();
    for seg in region.row_segments(y) {
        if seg.value <= HALF_WAY {
            continue;
        }
        if let Some(last) = out.last_mut()
            && last.1 == seg.start
        {
            last.1 = seg.end;
        } else {
            out.push((seg.start, seg.end));
        }
    }
}

struct Tracer<F> {
    offset_x: i32,
    offset_y: i32,
    transform: F,
    // open[x] holds the corner y where a vertical edge started at column x.
    open: Vec<Option<i32>>,
    segs: Vec<BoundarySeg>,
}

impl<F: Fn(i32, i32) -> (i32, i32)> Tracer<F> {
    fn horizontal(&mut self, x1: i32, x2: i32, y: i32) {
        self.toggle(x1, y);
        self.toggle(x2, y);
        self.push(x1, y, x2, y);
    }

    fn toggle(&mut self, x: i32, y: i32) {
        match self.open[x as usize].take() {
            Some(y0) => self.push(x, y0, x, y),
            None => self.open[x as usize] = Some(y),
        }
    }

    fn push(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        let (x1, y1) = (self.transform)(x1 + self.offset_x, y1 + self.offset_y);
        let (x2, y2) = (self.transform)(x2 + self.offset_x, y2 + self.offset_y);
        self.segs.push(BoundarySeg { x1, y1, x2, y2 });
    }
}
