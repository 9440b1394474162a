//! Freehand stroke outlines.
//!
//! Input points are smoothed, offset by the brush radius on both sides and
//! closed with round caps. The resulting polygon is turned into a quadratic
//! [`BezPath`] through edge midpoints and serialized as compact SVG path data.

use crate::geo::Point;
use kurbo::{BezPath, PathEl, Vec2};
use std::f64::consts::PI;
use std::fmt::Write;

/// Brush parameters for [`stroke_outline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushOptions {
    /// Stroke diameter in container pixels.
    pub size: f64,
    /// 0 follows the pointer exactly, 1 never moves.
    pub streamline: f64,
    /// Segments per half-circle cap.
    pub cap_segments: usize,
}

impl Default for BrushOptions {
    fn default() -> Self {
        Self {
            size: 8.0,
            streamline: 0.5,
            cap_segments: 8,
        }
    }
}

impl BrushOptions {
    pub fn with_size(size: f64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

const MIN_STEP: f64 = 1e-6;

/// Outline polygon of a stroke drawn through `points`.
///
/// Returns an empty vec for no input. A single point (or a stroke that
/// never moved) yields a dot.
pub fn stroke_outline(points: &[Point], opts: &BrushOptions) -> Vec<Point> {
    let radius = (opts.size / 2.0).max(0.0);
    let segments = opts.cap_segments.max(2);
    let centre = streamline(points, opts.streamline);

    match centre.len() {
        0 => Vec::new(),
        1 => dot(centre[0], radius, segments * 2),
        _ => ribbon(&centre, radius, segments),
    }
}

/// Smooth the raw pointer path, dropping steps that do not move.
fn streamline(points: &[Point], streamline: f64) -> Vec<Point> {
    let t = 0.15 + (1.0 - streamline.clamp(0.0, 1.0)) * 0.85;
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if !(p.x.is_finite() && p.y.is_finite()) {
            continue;
        }
        match out.last().copied() {
            None => out.push(p),
            Some(prev) => {
                let next = prev.lerp(p, t);
                if (next - prev).hypot() > MIN_STEP {
                    out.push(next);
                }
            }
        }
    }
    // The smoothed path lags behind; finish on the real last point.
    if let (Some(&last_raw), Some(&last)) = (points.last(), out.last()) {
        let finite = last_raw.x.is_finite() && last_raw.y.is_finite();
        if finite && out.len() > 1 && (last_raw - last).hypot() > MIN_STEP {
            out.push(last_raw);
        }
    }
    out
}

fn unit_normal(d: Vec2) -> Vec2 {
    let len = d.hypot();
    if len <= MIN_STEP {
        Vec2::ZERO
    } else {
        Vec2::new(-d.y / len, d.x / len)
    }
}

fn dot(centre: Point, radius: f64, steps: usize) -> Vec<Point> {
    (0..steps)
        .map(|i| {
            let a = 2.0 * PI * i as f64 / steps as f64;
            centre + Vec2::new(a.cos(), a.sin()) * radius
        })
        .collect()
}

/// Interior points of the half circle around `centre` that starts at
/// `from` (a unit normal) and turns clockwise through the stroke direction.
fn cap(centre: Point, from: Vec2, radius: f64, segments: usize) -> impl Iterator<Item = Point> {
    let start = from.y.atan2(from.x);
    (1..segments).map(move |i| {
        let a = start - PI * i as f64 / segments as f64;
        centre + Vec2::new(a.cos(), a.sin()) * radius
    })
}

fn ribbon(centre: &[Point], radius: f64, segments: usize) -> Vec<Point> {
    let n = centre.len();
    let mut left = Vec::with_capacity(n);
    let mut right = Vec::with_capacity(n);

    for i in 0..n {
        let prev = centre[i.saturating_sub(1)];
        let next = centre[(i + 1).min(n - 1)];
        let normal = unit_normal(next - prev);
        left.push(centre[i] + normal * radius);
        right.push(centre[i] - normal * radius);
    }

    let end_normal = unit_normal(centre[n - 1] - centre[n - 2]);
    let start_normal = unit_normal(centre[1] - centre[0]);

    let mut outline = Vec::with_capacity(2 * n + 2 * segments);
    outline.extend_from_slice(&left);
    outline.extend(cap(centre[n - 1], end_normal, radius, segments));
    outline.extend(right.iter().rev().copied());
    outline.extend(cap(centre[0], -start_normal, radius, segments));
    outline
}

/// Closed quadratic path through the midpoints of the outline edges.
pub fn outline_path(outline: &[Point]) -> BezPath {
    let mut path = BezPath::new();
    let Some(&first) = outline.first() else {
        return path;
    };
    path.move_to(first);
    for (i, &p) in outline.iter().enumerate() {
        let next = outline[(i + 1) % outline.len()];
        path.quad_to(p, p.midpoint(next));
    }
    path.close_path();
    path
}

/// SVG `d` attribute for `path`, coordinates trimmed to two decimals.
pub fn svg_path_data(path: &BezPath) -> String {
    let mut d = String::new();
    let mut last_cmd = None;
    for el in path.elements() {
        let (cmd, pts): (char, &[Point]) = match el {
            PathEl::MoveTo(p) => ('M', std::slice::from_ref(p)),
            PathEl::LineTo(p) => ('L', std::slice::from_ref(p)),
            PathEl::QuadTo(a, b) => {
                push_cmd(&mut d, &mut last_cmd, 'Q');
                push_point(&mut d, *a);
                push_point(&mut d, *b);
                continue;
            }
            PathEl::CurveTo(a, b, c) => {
                push_cmd(&mut d, &mut last_cmd, 'C');
                push_point(&mut d, *a);
                push_point(&mut d, *b);
                push_point(&mut d, *c);
                continue;
            }
            PathEl::ClosePath => {
                push_cmd(&mut d, &mut last_cmd, 'Z');
                continue;
            }
        };
        push_cmd(&mut d, &mut last_cmd, cmd);
        for &p in pts {
            push_point(&mut d, p);
        }
    }
    d
}

/// Outline and serialize in one go.
pub fn stroke_svg_path(points: &[Point], opts: &BrushOptions) -> String {
    svg_path_data(&outline_path(&stroke_outline(points, opts)))
}

fn push_cmd(d: &mut String, last: &mut Option<char>, cmd: char) {
    // Repeated Q segments share one command letter.
    if *last == Some(cmd) && cmd != 'Z' && cmd != 'M' {
        return;
    }
    if !d.is_empty() {
        d.push(' ');
    }
    d.push(cmd);
    *last = Some(cmd);
}

fn push_point(d: &mut String, p: Point) {
    let _ = write!(d, " {} {}", fmt_num(p.x), fmt_num(p.y));
}

fn fmt_num(v: f64) -> String {
    let s = format!("{v:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}
