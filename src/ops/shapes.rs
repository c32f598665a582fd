// ============================================================================
// SHAPES - rect and ellipse rasterizers feeding the region engine
// ============================================================================

use crate::region::{CombineMode, Region};

/// Folds an axis-aligned rectangle into `region` under `mode`.
pub fn combine_rect(region: &mut Region, mode: CombineMode, x: i32, y: i32, w: u32, h: u32) {
    match mode {
        CombineMode::Replace => {
            region.clear();
            rect_rows(region, x, y, w, h, false);
        }
        CombineMode::Add => rect_rows(region, x, y, w, h, false),
        CombineMode::Subtract => rect_rows(region, x, y, w, h, true),
        CombineMode::Intersect => {
            let mut shape = Region::new(region.width(), region.height());
            rect_rows(&mut shape, x, y, w, h, false);
            region.combine_region(CombineMode::Intersect, &shape);
        }
    }
}

fn rect_rows(region: &mut Region, x: i32, y: i32, w: u32, h: u32, subtract: bool) {
    let w = w.min(i32::MAX as u32) as i32;
    let y0 = (y as i64).max(0);
    let y1 = (y as i64 + h as i64).min(region.height() as i64);
    for yy in y0..y1 {
        emit(region, x, yy as i32, w, 255, subtract);
    }
}

/// Folds the ellipse inscribed in `(x, y, w, h)` into `region` under `mode`.
///
/// The plain path solves the implicit equation per scanline and emits one
/// full-coverage span. The antialiased path rates every pixel center and
/// run-length encodes the resulting coverage values.
pub fn combine_ellipse(
    region: &mut Region,
    mode: CombineMode,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    antialias: bool,
) {
    match mode {
        CombineMode::Replace => {
            region.clear();
            ellipse_rows(region, x, y, w, h, antialias, false);
        }
        CombineMode::Add => ellipse_rows(region, x, y, w, h, antialias, false),
        CombineMode::Subtract => ellipse_rows(region, x, y, w, h, antialias, true),
        CombineMode::Intersect => {
            let mut shape = Region::new(region.width(), region.height());
            ellipse_rows(&mut shape, x, y, w, h, antialias, false);
            region.combine_region(CombineMode::Intersect, &shape);
        }
    }
}

fn ellipse_rows(
    region: &mut Region,
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    antialias: bool,
    subtract: bool,
) {
    if w == 0 || h == 0 {
        return;
    }
    let a = w as f64 / 2.0;
    let b = h as f64 / 2.0;
    let cx = x as f64 + a;
    let cy = y as f64 + b;
    let y0 = (y as i64).max(0);
    let y1 = (y as i64 + h as i64).min(region.height() as i64);

    if !antialias {
        for yy in y0..y1 {
            let dy = (yy as f64 + 0.5) - cy;
            let t = 1.0 - (dy * dy) / (b * b);
            if t <= 0.0 {
                continue;
            }
            let half = a * t.sqrt();
            let x1 = (cx - half).round() as i64;
            let x2 = (cx + half).round() as i64;
            if x2 <= x1 {
                continue;
            }
            emit(region, x1 as i32, yy as i32, (x2 - x1) as i32, 255, subtract);
        }
        return;
    }

    let px0 = (x as i64).max(0);
    let px1 = (x as i64 + w as i64).min(region.width() as i64);
    for yy in y0..y1 {
        let py = yy as f64 + 0.5;
        let mut run_start = px0;
        let mut run_value = 0u8;
        for px in px0..px1 {
            let v = ellipse_coverage(px as f64 + 0.5, py, cx, cy, a, b);
            if v != run_value {
                if run_value != 0 {
                    emit(
                        region,
                        run_start as i32,
                        yy as i32,
                        (px - run_start) as i32,
                        run_value,
                        subtract,
                    );
                }
                run_start = px;
                run_value = v;
            }
        }
        if run_value != 0 {
            emit(
                region,
                run_start as i32,
                yy as i32,
                (px1 - run_start) as i32,
                run_value,
                subtract,
            );
        }
    }
}

#[inline]
fn emit(region: &mut Region, x: i32, y: i32, w: i32, value: u8, subtract: bool) {
    if subtract {
        region.subtract_segment(x, y, w, value);
    } else {
        region.add_segment(x, y, w, value);
    }
}

/// Coverage of one pixel center against the ellipse: radial distance in
/// normalized circle space, scaled back to pixel units by the gradient
/// length, then mapped through a linear half-pixel falloff to 0..=255.
#[inline]
fn ellipse_coverage(px: f64, py: f64, cx: f64, cy: f64, a: f64, b: f64) -> u8 {
    let nx = (px - cx) / a;
    let ny = (py - cy) / b;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return 255;
    }
    let scale = (a * a * ny * ny + b * b * nx * nx).sqrt() / (a * b * len);
    let d = (len - 1.0) / scale;
    let cov = (0.5 - d).clamp(0.0, 1.0);
    (cov * 255.0).round() as u8
}
