use tilemask::{
    BezierCurve, BezierPoint, BezierTool, CombineMode, PointConsumer, PressOutcome, Region,
    RegionError, Segment, ToolState,
};

/// Anchor/control/control triples for an axis-aligned rectangle whose
/// control points sit on the anchors, so every edge subdivides to a line.
fn rect_curve(x: f32, y: f32, w: f32, h: f32) -> BezierCurve {
    let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)];
    let mut points = Vec::new();
    for i in 0..4 {
        let (cx, cy) = corners[i];
        let (nx, ny) = corners[(i + 1) % 4];
        points.push(BezierPoint::anchor(cx, cy));
        points.push(BezierPoint::control(cx, cy));
        points.push(BezierPoint::control(nx, ny));
    }
    BezierCurve::from_points(points, true)
}

struct Collect(Vec<(i32, i32)>);

impl PointConsumer for Collect {
    fn point(&mut self, x: i32, y: i32) {
        self.0.push((x, y));
    }
}

#[test]
fn test_subdivide_degenerate_segment_walks_the_line() {
    // Open curve with one complete segment from (0,0) to (10,0).
    let curve = BezierCurve::from_points(
        vec![
            BezierPoint::anchor(0.0, 0.0),
            BezierPoint::control(0.0, 0.0),
            BezierPoint::control(10.0, 0.0),
            BezierPoint::anchor(10.0, 0.0),
            BezierPoint::control(10.0, 0.0),
        ],
        false,
    );

    let mut out = Collect(Vec::new());
    curve.subdivide_into(&mut out);

    // Deduplicated pixel walk: every column once, no vertical drift.
    assert_eq!(out.0.first(), Some(&(0, 0)));
    assert_eq!(out.0.last(), Some(&(10, 0)));
    assert_eq!(out.0.len(), 11);
    assert!(out.0.iter().all(|&(_, y)| y == 0));
    assert!(out.0.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn test_convert_square() {
    let mut region = rect_curve(0.0, 0.0, 50.0, 50.0).convert(60, 60).unwrap();

    assert_eq!(region.bounds(), Some((0, 0, 50, 50)));
    assert_eq!(region.num_segments(), 50);
    for y in 0..50 {
        assert_eq!(
            region.row_segments(y),
            &[Segment {
                start: 0,
                end: 50,
                value: 255
            }]
        );
    }
    assert!(region.point_inside(25, 25));
    assert!(!region.point_inside(55, 25));
}

#[test]
fn test_convert_offset_rectangle() {
    let mut region = rect_curve(5.0, 3.0, 20.0, 10.0).convert(40, 20).unwrap();

    assert_eq!(region.bounds(), Some((5, 3, 25, 13)));
    assert_eq!(region.num_segments(), 10);
    assert!(region.point_inside(10, 5));
    assert!(!region.point_inside(10, 13));
    assert!(!region.point_inside(4, 5));
}

#[test]
fn test_convert_clips_to_target() {
    // The curve hangs off the right and bottom of a 30x30 target.
    let mut region = rect_curve(0.0, 0.0, 50.0, 50.0).convert(30, 30).unwrap();

    assert_eq!(region.bounds(), Some((0, 0, 30, 30)));
    for y in 0..30 {
        assert_eq!(region.row_segments(y).len(), 1);
        assert_eq!(region.row_segments(y)[0].end, 30);
    }
}

#[test]
fn test_convert_far_off_canvas_rectangle() {
    // Anchors beyond the pixel-coordinate range saturate when rounded; the
    // crossings they produce still pair up and fill the canvas band.
    let mut region = rect_curve(-3.0e9, -10.0, 6.0e9, 60.0).convert(40, 30).unwrap();

    assert_eq!(region.bounds(), Some((0, 0, 40, 30)));
    for y in 0..30 {
        assert_eq!(
            region.row_segments(y),
            &[Segment {
                start: 0,
                end: 40,
                value: 255
            }]
        );
    }
}

#[test]
fn test_convert_rejects_open_curve() {
    let points = rect_curve(0.0, 0.0, 10.0, 10.0).points().to_vec();
    let curve = BezierCurve::from_points(points, false);
    assert!(matches!(curve.convert(20, 20), Err(RegionError::OpenCurve)));
}

#[test]
fn test_convert_rejects_malformed_point_count() {
    let anchor = BezierPoint::anchor(0.0, 0.0);
    let control = BezierPoint::control(0.0, 0.0);

    // One anchor's worth of points is a degenerate loop, not a curve.
    let short = BezierCurve::from_points(vec![anchor, control, control], true);
    assert!(matches!(
        short.convert(20, 20),
        Err(RegionError::MalformedCurve { points: 3 })
    ));

    let ragged = BezierCurve::from_points(vec![anchor; 7], true);
    assert!(matches!(
        ragged.convert(20, 20),
        Err(RegionError::MalformedCurve { points: 7 })
    ));
}

#[test]
fn test_tool_place_close_commit() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(60, 60);

    assert_eq!(tool.state(), ToolState::Start);
    assert_eq!(
        tool.press(0.0, 0.0, &mut target, CombineMode::Replace).unwrap(),
        PressOutcome::Placed
    );
    assert_eq!(tool.state(), ToolState::Add);
    tool.release();

    for (x, y) in [(50.0, 0.0), (50.0, 50.0), (0.0, 50.0)] {
        assert_eq!(
            tool.press(x, y, &mut target, CombineMode::Replace).unwrap(),
            PressOutcome::Placed
        );
        tool.release();
    }

    // Pressing near the first anchor closes the loop.
    assert_eq!(
        tool.press(1.0, 1.0, &mut target, CombineMode::Replace).unwrap(),
        PressOutcome::Closed
    );
    tool.release();
    assert_eq!(tool.state(), ToolState::Edit);
    assert!(tool.curve().is_closed());
    assert_eq!(tool.curve().points().len(), 12);

    // Pressing inside the closed outline commits it to the target.
    assert_eq!(
        tool.press(25.0, 25.0, &mut target, CombineMode::Replace).unwrap(),
        PressOutcome::Committed
    );
    assert_eq!(tool.state(), ToolState::Start);
    assert!(tool.curve().points().is_empty());
    assert!(target.point_inside(25, 25));
    assert_eq!(target.bounds(), Some((0, 0, 50, 50)));
}

#[test]
fn test_tool_wont_close_a_single_anchor() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(60, 60);

    tool.press(10.0, 10.0, &mut target, CombineMode::Replace).unwrap();
    tool.release();

    // Clicking the lone anchor again extends instead of closing.
    assert_eq!(
        tool.press(10.0, 10.0, &mut target, CombineMode::Replace).unwrap(),
        PressOutcome::Placed
    );
    assert_eq!(tool.state(), ToolState::Add);
    assert!(!tool.curve().is_closed());
}

#[test]
fn test_tool_outside_press_starts_over() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(60, 60);

    for (x, y) in [(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (0.0, 20.0)] {
        tool.press(x, y, &mut target, CombineMode::Replace).unwrap();
        tool.release();
    }
    tool.press(0.0, 0.0, &mut target, CombineMode::Replace).unwrap();
    tool.release();
    assert_eq!(tool.state(), ToolState::Edit);

    // A press outside the outline abandons it and begins a new curve.
    assert_eq!(
        tool.press(50.0, 50.0, &mut target, CombineMode::Replace).unwrap(),
        PressOutcome::Placed
    );
    assert_eq!(tool.state(), ToolState::Add);
    assert_eq!(tool.curve().points().len(), 2);
    assert!(target.is_empty());
}

#[test]
fn test_tool_drag_anchor_carries_controls() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(120, 120);

    for (x, y) in [(0.0, 0.0), (50.0, 0.0), (50.0, 50.0), (0.0, 50.0)] {
        tool.press(x, y, &mut target, CombineMode::Replace).unwrap();
        tool.release();
    }
    tool.press(0.0, 0.0, &mut target, CombineMode::Replace).unwrap();
    tool.release();

    // Grab the first anchor and drag it; its two controls, one of them the
    // wrapped-around closing control, follow along.
    assert_eq!(
        tool.press(0.0, 0.0, &mut target, CombineMode::Replace).unwrap(),
        PressOutcome::Grabbed
    );
    assert!(tool.is_dragging());
    tool.motion(5.0, 10.0);
    tool.release();
    assert!(!tool.is_dragging());

    let points = tool.curve().points();
    assert_eq!((points[0].x, points[0].y), (5.0, 10.0));
    assert_eq!((points[1].x, points[1].y), (5.0, 10.0));
    assert_eq!((points[11].x, points[11].y), (5.0, 10.0));
    // The far corner and its controls stay put.
    assert_eq!((points[6].x, points[6].y), (50.0, 50.0));
    assert_eq!((points[2].x, points[2].y), (50.0, 0.0));
}

#[test]
fn test_tool_drag_control_moves_alone() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(120, 120);

    for (x, y) in [(0.0, 0.0), (50.0, 0.0), (50.0, 50.0), (0.0, 50.0)] {
        tool.press(x, y, &mut target, CombineMode::Replace).unwrap();
        tool.release();
    }
    tool.press(0.0, 0.0, &mut target, CombineMode::Replace).unwrap();
    tool.release();

    // The first point near (50, 0) is the incoming control of that anchor.
    tool.press(50.0, 0.0, &mut target, CombineMode::Replace).unwrap();
    tool.motion(60.0, -10.0);
    tool.release();

    let points = tool.curve().points();
    assert_eq!((points[2].x, points[2].y), (60.0, -10.0));
    // The anchor it belongs to does not move with it.
    assert_eq!((points[3].x, points[3].y), (50.0, 0.0));
}

#[test]
fn test_tool_motion_without_press_is_ignored() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(60, 60);
    tool.press(10.0, 10.0, &mut target, CombineMode::Replace).unwrap();
    tool.release();

    let before = tool.curve().points().to_vec();
    tool.motion(40.0, 40.0);
    assert_eq!(tool.curve().points(), before.as_slice());
}

#[test]
fn test_tool_commit_respects_combine_mode() {
    let mut tool = BezierTool::new();
    let mut target = Region::new(60, 60);
    target.add_segment(0, 0, 60, 255);

    for (x, y) in [(10.0, 10.0), (30.0, 10.0), (30.0, 30.0), (10.0, 30.0)] {
        tool.press(x, y, &mut target, CombineMode::Add).unwrap();
        tool.release();
    }
    tool.press(10.0, 10.0, &mut target, CombineMode::Add).unwrap();
    tool.release();
    assert_eq!(
        tool.press(20.0, 20.0, &mut target, CombineMode::Add).unwrap(),
        PressOutcome::Committed
    );

    // Added coverage joins the pre-existing row.
    assert!(target.point_inside(5, 0));
    assert!(target.point_inside(20, 20));
}
