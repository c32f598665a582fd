// ============================================================================
// BEZIER - cubic curve editing and scan conversion into regions
// ============================================================================

use crate::error::RegionError;
use crate::region::{CombineMode, Region};

/// Forward-difference steps per cubic segment.
pub const SUBDIVIDE: u32 = 1000;

/// Hit-test half-width for grabbing or closing on a curve point.
pub const CHECK_RADIUS: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointKind {
    Anchor,
    Control,
}

/// One curve point in image space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BezierPoint {
    pub x: f32,
    pub y: f32,
    pub kind: PointKind,
}

impl BezierPoint {
    pub fn anchor(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            kind: PointKind::Anchor,
        }
    }

    pub fn control(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            kind: PointKind::Control,
        }
    }

    fn near(&self, x: f32, y: f32) -> bool {
        (self.x - x).abs() <= CHECK_RADIUS && (self.y - y).abs() <= CHECK_RADIUS
    }
}

/// Receives the pixel-rounded polyline produced by curve subdivision.
/// Implementations draw it, measure it, or scan-convert it.
pub trait PointConsumer {
    fn point(&mut self, x: i32, y: i32);
}

/// A chain of cubic segments stored as repeating anchor/control/control
/// triples: `points[3k]` is anchor `k`, `points[3k + 1]` its outgoing
/// control and `points[3k + 2]` the incoming control of the next anchor.
/// A closed curve holds exactly `3 * anchors` points and wraps; an open
/// curve under construction ends after an outgoing control.
#[derive(Clone, Debug, Default)]
pub struct BezierCurve {
    points: Vec<BezierPoint>,
    closed: bool,
}

impl BezierCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<BezierPoint>, closed: bool) -> Self {
        Self { points, closed }
    }

    pub fn points(&self) -> &[BezierPoint] {
        &self.points
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of complete cubic segments the point list currently defines.
    fn segment_count(&self) -> usize {
        if self.closed {
            self.points.len() / 3
        } else {
            self.points.len().saturating_sub(2) / 3
        }
    }

    /// Subdivides every complete segment into a pixel polyline and feeds it
    /// to `consumer`, skipping consecutive points that round to the same
    /// pixel. Each segment steps its cubic with forward differences rather
    /// than re-evaluating the polynomial, so one segment costs four adds
    /// per axis per step.
    pub fn subdivide_into<C: PointConsumer>(&self, consumer: &mut C) {
        let mut last = None;
        for seg in 0..self.segment_count() {
            let p0 = self.points[3 * seg];
            let p1 = self.points[3 * seg + 1];
            let p2 = self.points[3 * seg + 2];
            let p3 = self.points[(3 * seg + 3) % self.points.len()];
            subdivide_segment(p0, p1, p2, p3, &mut last, consumer);
        }
    }

    /// Scan-converts a closed curve into a full-coverage region.
    ///
    /// The subdivided polyline is rasterized into per-scanline crossing
    /// lists kept sorted on insertion; pairing consecutive crossings then
    /// yields the interior spans. A scanline with an odd crossing count is
    /// degenerate geometry (typically a curve tangent to the line): the
    /// orphan crossing is logged and dropped rather than failing the whole
    /// conversion.
    pub fn convert(&self, width: u32, height: u32) -> Result<Region, RegionError> {
        if !self.closed {
            return Err(RegionError::OpenCurve);
        }
        if self.points.len() < 6 || !self.points.len().is_multiple_of(3) {
            return Err(RegionError::MalformedCurve {
                points: self.points.len(),
            });
        }

        let mut converter = Converter {
            width: width.min(i32::MAX as u32) as i32,
            height: height as i32,
            scanlines: vec![Vec::new(); height as usize],
            first: None,
            last: None,
        };
        self.subdivide_into(&mut converter);
        converter.close();

        let mut region = Region::new(width, height);
        for (y, crossings) in converter.scanlines.iter().enumerate() {
            if crossings.len() % 2 != 0 {
                log::warn!(
                    "scanline {y} has {} boundary crossings, dropping the unpaired one",
                    crossings.len()
                );
            }
            for pair in crossings.chunks_exact(2) {
                region.add_segment(pair[0], y as i32, pair[1] - pair[0], 255);
            }
        }
        Ok(region)
    }
}

/// Walks one cubic from `p0` to `p3` in `SUBDIVIDE` forward-difference
/// steps, emitting each pixel the rounded path visits once.
fn subdivide_segment<C: PointConsumer>(
    p0: BezierPoint,
    p1: BezierPoint,
    p2: BezierPoint,
    p3: BezierPoint,
    last: &mut Option<(i32, i32)>,
    consumer: &mut C,
) {
    let h = 1.0 / SUBDIVIDE as f64;
    let (mut x, mut dx, mut dx2, dx3) = forward_diffs(p0.x, p1.x, p2.x, p3.x, h);
    let (mut y, mut dy, mut dy2, dy3) = forward_diffs(p0.y, p1.y, p2.y, p3.y, h);

    emit(x, y, last, consumer);
    for _ in 0..SUBDIVIDE {
        x += dx;
        dx += dx2;
        dx2 += dx3;
        y += dy;
        dy += dy2;
        dy2 += dy3;
        emit(x, y, last, consumer);
    }
}

/// Initial forward-difference terms `(value, delta, delta2, delta3)` of the
/// cubic through `v0..v3` at step size `h`.
fn forward_diffs(v0: f32, v1: f32, v2: f32, v3: f32, h: f64) -> (f64, f64, f64, f64) {
    let (v0, v1, v2, v3) = (v0 as f64, v1 as f64, v2 as f64, v3 as f64);
    let a = -v0 + 3.0 * v1 - 3.0 * v2 + v3;
    let b = 3.0 * v0 - 6.0 * v1 + 3.0 * v2;
    let c = -3.0 * v0 + 3.0 * v1;
    let h2 = h * h;
    let h3 = h2 * h;
    (
        v0,
        a * h3 + b * h2 + c * h,
        6.0 * a * h3 + 2.0 * b * h2,
        6.0 * a * h3,
    )
}

fn emit<C: PointConsumer>(x: f64, y: f64, last: &mut Option<(i32, i32)>, consumer: &mut C) {
    let px = x.round() as i32;
    let py = y.round() as i32;
    if *last != Some((px, py)) {
        consumer.point(px, py);
        *last = Some((px, py));
    }
}

/// Accumulates scanline crossings from the subdivided polyline, connecting
/// consecutive points with line rasterization and bridging back to the
/// first point at the end.
struct Converter {
    width: i32,
    height: i32,
    scanlines: Vec<Vec<i32>>,
    first: Option<(i32, i32)>,
    last: Option<(i32, i32)>,
}

impl PointConsumer for Converter {
    fn point(&mut self, x: i32, y: i32) {
        if self.first.is_none() {
            self.first = Some((x, y));
        }
        if let Some((lx, ly)) = self.last {
            self.convert_line(lx, ly, x, y);
        }
        self.last = Some((x, y));
    }
}

impl Converter {
    fn close(&mut self) {
        if let (Some((lx, ly)), Some((fx, fy))) = (self.last, self.first)
            && (lx, ly) != (fx, fy)
        {
            self.convert_line(lx, ly, fx, fy);
        }
    }

    /// Registers one crossing per scanline the line passes through. The y
    /// range is half-open top-down, so a vertex shared by two chained lines
    /// is counted exactly once. Endpoints arrive pixel-rounded with a
    /// saturating cast, so the interpolation runs in f64 and every crossing
    /// is clamped into the canvas band; span pairing then never leaves
    /// `i32` range.
    fn convert_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        if y1 == y2 {
            return;
        }
        let (x1, y1, x2, y2) = if y1 < y2 {
            (x1, y1, x2, y2)
        } else {
            (x2, y2, x1, y1)
        };
        let slope = (x2 as f64 - x1 as f64) / (y2 as f64 - y1 as f64);
        for y in y1.max(0)..y2.min(self.height) {
            let x = (x1 as f64 + ((y as f64 - y1 as f64) * slope).round())
                .clamp(0.0, self.width as f64) as i32;
            let row = &mut self.scanlines[y as usize];
            let pos = row.partition_point(|&v| v <= x);
            row.insert(pos, x);
        }
    }
}

// ---- interactive tool ----------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolState {
    /// No curve yet; the next press places the first anchor.
    #[default]
    Start,
    /// Extending an open curve; pressing the first anchor closes it.
    Add,
    /// The curve is closed; presses grab points, commit, or start over.
    Edit,
}

/// What a press did, so the caller knows what to redraw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PressOutcome {
    Placed,
    Closed,
    Grabbed,
    Committed,
}

/// Click-driven curve editor over [`BezierCurve`].
///
/// Presses drive the `Start -> Add -> Edit` cycle; motion while a point is
/// held drags it. In `Edit`, pressing inside the converted region commits
/// it into the target selection and resets, pressing elsewhere abandons the
/// curve and starts a new one.
#[derive(Debug, Default)]
pub struct BezierTool {
    state: ToolState,
    curve: BezierCurve,
    dragging: Option<usize>,
    region: Option<Region>,
}

impl BezierTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ToolState {
        self.state
    }

    pub fn curve(&self) -> &BezierCurve {
        &self.curve
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }

    pub fn reset(&mut self) {
        self.state = ToolState::Start;
        self.curve = BezierCurve::new();
        self.dragging = None;
        self.region = None;
    }

    pub fn press(
        &mut self,
        x: f32,
        y: f32,
        target: &mut Region,
        mode: CombineMode,
    ) -> Result<PressOutcome, RegionError> {
        match self.state {
            ToolState::Start => Ok(self.start_curve(x, y)),
            ToolState::Add => {
                // Closing needs two anchors down, otherwise the press extends.
                if self.curve.points.len() >= 5 && self.curve.points[0].near(x, y) {
                    let first = self.curve.points[0];
                    self.curve.points.push(BezierPoint::control(first.x, first.y));
                    self.curve.closed = true;
                    self.state = ToolState::Edit;
                    self.dragging = Some(self.curve.points.len() - 1);
                    Ok(PressOutcome::Closed)
                } else {
                    self.curve.points.push(BezierPoint::control(x, y));
                    self.curve.points.push(BezierPoint::anchor(x, y));
                    self.curve.points.push(BezierPoint::control(x, y));
                    self.dragging = Some(self.curve.points.len() - 1);
                    Ok(PressOutcome::Placed)
                }
            }
            ToolState::Edit => {
                if let Some(idx) = self.curve.points.iter().position(|p| p.near(x, y)) {
                    self.dragging = Some(idx);
                    self.region = None;
                    return Ok(PressOutcome::Grabbed);
                }
                if self.region.is_none() {
                    self.region = Some(self.curve.convert(target.width(), target.height())?);
                }
                if let Some(region) = self
                    .region
                    .take_if(|r| r.point_inside(x as i32, y as i32))
                {
                    target.combine_region(mode, &region);
                    self.reset();
                    return Ok(PressOutcome::Committed);
                }
                self.reset();
                Ok(self.start_curve(x, y))
            }
        }
    }

    /// Drags the held point. Anchors carry their adjacent controls along.
    pub fn motion(&mut self, x: f32, y: f32) {
        let Some(idx) = self.dragging else {
            return;
        };
        self.region = None;
        let point = self.curve.points[idx];
        let (dx, dy) = (x - point.x, y - point.y);
        self.nudge(idx, dx, dy);
        if point.kind == PointKind::Anchor {
            let len = self.curve.points.len();
            if self.curve.closed {
                self.nudge((idx + 1) % len, dx, dy);
                self.nudge((idx + len - 1) % len, dx, dy);
            } else {
                if idx + 1 < len {
                    self.nudge(idx + 1, dx, dy);
                }
                if idx > 0 {
                    self.nudge(idx - 1, dx, dy);
                }
            }
        }
    }

    pub fn release(&mut self) {
        self.dragging = None;
    }

    fn start_curve(&mut self, x: f32, y: f32) -> PressOutcome {
        self.curve.points.push(BezierPoint::anchor(x, y));
        self.curve.points.push(BezierPoint::control(x, y));
        self.state = ToolState::Add;
        self.dragging = Some(1);
        PressOutcome::Placed
    }

    fn nudge(&mut self, idx: usize, dx: f32, dy: f32) {
        let p = &mut self.curve.points[idx];
        if p.kind == PointKind::Control || self.dragging == Some(idx) {
            p.x += dx;
            p.y += dy;
        }
    }
}
