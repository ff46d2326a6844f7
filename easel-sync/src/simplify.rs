//! Douglas–Peucker path simplification.
//!
//! Reduces a freehand stroke to the subset of its points that deviate from
//! the straight chord by more than `tolerance`. The endpoints are always
//! kept and the output preserves input order.

use crate::protocol::Point;

/// Simplify `points` with the given tolerance (canvas units).
///
/// Sequences of two points or fewer come back unchanged. A negative or NaN
/// tolerance behaves like zero.
pub fn simplify(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let tolerance = if tolerance.is_nan() || tolerance < 0.0 { 0.0 } else { tolerance };

    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    // Explicit stack of (first, last) index ranges still to examine
    let mut ranges = vec![(0, last)];
    while let Some((first, last)) = ranges.pop() {
        if last <= first + 1 {
            continue;
        }

        let (farthest, distance) = (first + 1..last)
            .map(|i| (i, perpendicular_distance(&points[i], &points[first], &points[last])))
            .fold((first, f64::NEG_INFINITY), |best, candidate| {
                if candidate.1 > best.1 { candidate } else { best }
            });

        if distance > tolerance {
            keep[farthest] = true;
            ranges.push((first, farthest));
            ranges.push((farthest, last));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(point, kept)| kept.then_some(*point))
        .collect()
}

/// Distance from `p` to the infinite line through `a` and `b`, or to `a`
/// when the two coincide.
fn perpendicular_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let chord = (dx * dx + dy * dy).sqrt();
    if chord == 0.0 {
        return p.distance(a);
    }
    (dy * p.x - dx * p.y + b.x * a.y - b.y * a.x).abs() / chord
}
