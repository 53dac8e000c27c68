//! Geometric primitives shared by the detectors.
//!
//! Contour metrics (area, perimeter, convex hull, minimum-area rectangle)
//! and 2D line utilities (robust and least-squares fitting support) used by
//! the scratch, crack, foreign and dimension detectors.

use crate::domain::PixelRect;
use imageproc::point::Point;
use itertools::Itertools;

/// Signed shoelace area of a closed contour, returned as an absolute value.
///
/// Returns 0.0 for contours with fewer than 3 points.
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x as f64 * points[j].y as f64;
        area -= points[j].x as f64 * points[i].y as f64;
    }
    area.abs() / 2.0
}

/// Perimeter of a closed contour.
pub fn contour_perimeter(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    let mut perimeter = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        let dx = (points[j].x - points[i].x) as f64;
        let dy = (points[j].y - points[i].y) as f64;
        perimeter += (dx * dx + dy * dy).sqrt();
    }
    perimeter
}

/// Axis-aligned bounding rectangle of a point set.
///
/// Returns an empty rectangle for an empty point set.
pub fn bounding_rect(points: &[Point<i32>]) -> PixelRect {
    let Some((min_x, max_x)) = points.iter().map(|p| p.x).minmax().into_option() else {
        return PixelRect::default();
    };
    let (min_y, max_y) = points
        .iter()
        .map(|p| p.y)
        .minmax()
        .into_option()
        .expect("non-empty point set");
    PixelRect::from_corners(min_x, min_y, max_x, max_y)
}

/// Cross product orientation of the turn `p1 -> p2 -> p3`.
fn cross(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)) -> f64 {
    (p2.0 - p1.0) * (p3.1 - p1.1) - (p2.1 - p1.1) * (p3.0 - p1.0)
}

/// Convex hull of a point set (Graham scan), in counter-clockwise order.
pub fn convex_hull(points: &[Point<i32>]) -> Vec<(f64, f64)> {
    let mut pts: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (p.x as f64, p.y as f64))
        .collect();
    if pts.len() < 3 {
        return pts;
    }

    let mut start = 0;
    for i in 1..pts.len() {
        if pts[i].1 < pts[start].1 || (pts[i].1 == pts[start].1 && pts[i].0 < pts[start].0) {
            start = i;
        }
    }
    pts.swap(0, start);
    let anchor = pts[0];

    pts[1..].sort_by(|a, b| {
        let c = cross(anchor, *a, *b);
        if c == 0.0 {
            let da = (a.0 - anchor.0).powi(2) + (a.1 - anchor.1).powi(2);
            let db = (b.0 - anchor.0).powi(2) + (b.1 - anchor.1).powi(2);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        } else if c > 0.0 {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    });

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(pts.len());
    for point in pts {
        while hull.len() > 1 && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0.0 {
            hull.pop();
        }
        hull.push(point);
    }
    hull
}

/// Area of the convex hull of a point set.
pub fn convex_hull_area(points: &[Point<i32>]) -> f64 {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return 0.0;
    }
    let n = hull.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += hull[i].0 * hull[j].1 - hull[j].0 * hull[i].1;
    }
    area.abs() / 2.0
}

/// An oriented rectangle: the minimum-area rectangle of a contour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    /// Rectangle center.
    pub center: (f64, f64),
    /// Extent along the long axis.
    pub length: f64,
    /// Extent along the short axis.
    pub width: f64,
    /// Orientation of the long axis in degrees, in `(-180, 180]`.
    pub angle_deg: f64,
}

impl RotatedRect {
    /// Aspect ratio `length / width`, with the width floored at one pixel.
    pub fn aspect_ratio(&self) -> f64 {
        self.length / self.width.max(1.0)
    }
}

/// Minimum-area enclosing rectangle via rotating calipers over the convex hull.
///
/// Degenerate inputs (fewer than 3 hull points) fall back to a
/// principal-axis projection.
pub fn min_area_rect(points: &[Point<i32>]) -> RotatedRect {
    let hull = convex_hull(points);

    if hull.len() < 3 {
        // Degenerate (collinear or tiny) input: project onto the principal
        // axis instead of running calipers.
        let pts: Vec<[f64; 2]> = points.iter().map(|p| [p.x as f64, p.y as f64]).collect();
        if let Some(line) = fit_line_least_squares(&pts) {
            let mut min_t = f64::MAX;
            let mut max_t = f64::MIN;
            let mut max_perp = 0.0f64;
            for p in &pts {
                let vx = p[0] - line.point[0];
                let vy = p[1] - line.point[1];
                let t = vx * line.dir[0] + vy * line.dir[1];
                min_t = min_t.min(t);
                max_t = max_t.max(t);
                max_perp = max_perp.max((vx * line.dir[1] - vy * line.dir[0]).abs());
            }
            let mid = (min_t + max_t) / 2.0;
            return RotatedRect {
                center: (
                    line.point[0] + line.dir[0] * mid,
                    line.point[1] + line.dir[1] * mid,
                ),
                length: max_t - min_t,
                width: (2.0 * max_perp).max(1.0),
                angle_deg: line.dir[1].atan2(line.dir[0]).to_degrees(),
            };
        }
        let rect = bounding_rect(points);
        let (w, h) = (rect.width as f64, rect.height as f64);
        let (cx, cy) = rect.center();
        return RotatedRect {
            center: (cx, cy),
            length: w.max(h),
            width: w.min(h),
            angle_deg: if h > w { 90.0 } else { 0.0 },
        };
    }

    let n = hull.len();
    let mut best_area = f64::MAX;
    let mut best = RotatedRect {
        center: (0.0, 0.0),
        length: 0.0,
        width: 0.0,
        angle_deg: 0.0,
    };

    for i in 0..n {
        let j = (i + 1) % n;
        let edge = (hull[j].0 - hull[i].0, hull[j].1 - hull[i].1);
        let len = (edge.0 * edge.0 + edge.1 * edge.1).sqrt();
        if len < f64::EPSILON {
            continue;
        }
        let (nx, ny) = (edge.0 / len, edge.1 / len);
        let (px, py) = (-ny, nx);

        let mut min_n = f64::MAX;
        let mut max_n = f64::MIN;
        let mut min_p = f64::MAX;
        let mut max_p = f64::MIN;
        for &(x, y) in &hull {
            let proj_n = nx * (x - hull[i].0) + ny * (y - hull[i].1);
            let proj_p = px * (x - hull[i].0) + py * (y - hull[i].1);
            min_n = min_n.min(proj_n);
            max_n = max_n.max(proj_n);
            min_p = min_p.min(proj_p);
            max_p = max_p.max(proj_p);
        }

        let extent_n = max_n - min_n;
        let extent_p = max_p - min_p;
        let area = extent_n * extent_p;
        if area < best_area {
            best_area = area;
            let center_n = (min_n + max_n) / 2.0;
            let center_p = (min_p + max_p) / 2.0;
            let cx = hull[i].0 + center_n * nx + center_p * px;
            let cy = hull[i].1 + center_n * ny + center_p * py;

            // Report the orientation of the long side.
            let (length, width, axis) = if extent_n >= extent_p {
                (extent_n, extent_p, (nx, ny))
            } else {
                (extent_p, extent_n, (px, py))
            };
            best = RotatedRect {
                center: (cx, cy),
                length,
                width,
                angle_deg: axis.1.atan2(axis.0).to_degrees(),
            };
        }
    }
    best
}

/// An infinite 2D line in point-direction form with a unit direction vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line2D {
    /// A point on the line.
    pub point: [f64; 2],
    /// Unit direction vector.
    pub dir: [f64; 2],
}

impl Line2D {
    /// Builds a line through two points; `None` when the points coincide.
    pub fn through(a: [f64; 2], b: [f64; 2]) -> Option<Self> {
        let dx = b[0] - a[0];
        let dy = b[1] - a[1];
        let len = (dx * dx + dy * dy).sqrt();
        if len < 1e-9 {
            return None;
        }
        Some(Self {
            point: a,
            dir: [dx / len, dy / len],
        })
    }

    /// Perpendicular distance of a point to the line.
    pub fn distance_to(&self, p: [f64; 2]) -> f64 {
        let vx = p[0] - self.point[0];
        let vy = p[1] - self.point[1];
        (vx * self.dir[1] - vy * self.dir[0]).abs()
    }

    /// Smallest angle between the direction vectors of two lines, in degrees
    /// within `[0, 90]`.
    pub fn angle_to(&self, other: &Line2D) -> f64 {
        let dot = (self.dir[0] * other.dir[0] + self.dir[1] * other.dir[1]).abs();
        dot.clamp(0.0, 1.0).acos().to_degrees()
    }
}

/// Total-least-squares line fit through a point set (principal axis of the
/// covariance matrix). Returns `None` for fewer than 2 points or a
/// degenerate (zero-spread) set.
pub fn fit_line_least_squares(points: &[[f64; 2]]) -> Option<Line2D> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let inv_n = 1.0 / n as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() * inv_n;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() * inv_n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for p in points {
        let dx = p[0] - mean_x;
        let dy = p[1] - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx + syy < 1e-12 {
        return None;
    }

    // Dominant eigenvector of the 2x2 covariance matrix.
    let trace = sxx + syy;
    let det = sxx * syy - sxy * sxy;
    let lambda = trace / 2.0 + (trace * trace / 4.0 - det).max(0.0).sqrt();
    let (dx, dy) = if sxy.abs() > 1e-12 {
        (lambda - syy, sxy)
    } else if sxx >= syy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };
    let len = (dx * dx + dy * dy).sqrt();
    Some(Line2D {
        point: [mean_x, mean_y],
        dir: [dx / len, dy / len],
    })
}

/// Mean perpendicular distance between two roughly parallel lines, measured
/// by projecting each line's anchor point onto the other line.
pub fn parallel_line_distance(a: &Line2D, b: &Line2D) -> f64 {
    (a.distance_to(b.point) + b.distance_to(a.point)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: i32, y: i32) -> Point<i32> {
        Point::new(x, y)
    }

    #[test]
    fn square_area_and_perimeter() {
        let square = vec![pt(0, 0), pt(10, 0), pt(10, 10), pt(0, 10)];
        assert!((contour_area(&square) - 100.0).abs() < 1e-9);
        assert!((contour_perimeter(&square) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn min_area_rect_of_rotated_segment() {
        // Points along the diagonal y = x.
        let diag: Vec<Point<i32>> = (0..50).map(|i| pt(i, i)).collect();
        let rect = min_area_rect(&diag);
        assert!(rect.length > 60.0, "diagonal length ~69, got {}", rect.length);
        assert!(rect.width < 2.0);
        let angle = rect.angle_deg.abs() % 180.0;
        assert!((angle - 45.0).abs() < 5.0, "angle was {angle}");
    }

    #[test]
    fn least_squares_fit_recovers_horizontal_line() {
        let pts: Vec<[f64; 2]> = (0..20).map(|i| [i as f64, 5.0]).collect();
        let line = fit_line_least_squares(&pts).unwrap();
        assert!(line.dir[1].abs() < 1e-9);
        assert!(line.distance_to([10.0, 5.0]) < 1e-9);
        assert!((line.distance_to([10.0, 8.0]) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn angle_between_perpendicular_lines() {
        let h = Line2D::through([0.0, 0.0], [1.0, 0.0]).unwrap();
        let v = Line2D::through([0.0, 0.0], [0.0, 1.0]).unwrap();
        assert!((h.angle_to(&v) - 90.0).abs() < 1e-9);
        assert!(h.angle_to(&h) < 1e-9);
    }

    #[test]
    fn parallel_distance_between_offset_lines() {
        let a = Line2D::through([0.0, 0.0], [1.0, 0.0]).unwrap();
        let b = Line2D::through([0.0, 7.0], [1.0, 7.0]).unwrap();
        assert!((parallel_line_distance(&a, &b) - 7.0).abs() < 1e-9);
    }
}
