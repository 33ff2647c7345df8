//! Basic 2D and 3D geometry primitives for surface reconstruction.

use geo_types::{Coord, Polygon};

/// Representation of a 2D point.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Offsets the point by `t` times the direction `d`.
    pub fn offset(self, d: (f64, f64), t: f64) -> Self {
        Self::new(self.x + t * d.0, self.y + t * d.1)
    }
}

impl From<Coord<f64>> for Point {
    fn from(c: Coord<f64>) -> Self {
        Self::new(c.x, c.y)
    }
}

/// Representation of a 3D point.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Drops the elevation component.
    pub fn xy(self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Calculates the Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Calculates the squared distance between two points.
pub fn squared_distance(a: Point, b: Point) -> f64 {
    (b.x - a.x).powi(2) + (b.y - a.y).powi(2)
}

/// Calculates the Euclidean distance between two 3D points.
pub fn distance3(a: Point3, b: Point3) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2) + (b.z - a.z).powi(2)).sqrt()
}

/// Normalizes a direction vector. Returns `(0, 0)` for a null vector.
pub fn unit(v: (f64, f64)) -> (f64, f64) {
    let len = (v.0 * v.0 + v.1 * v.1).sqrt();
    if len.abs() < f64::EPSILON {
        (0.0, 0.0)
    } else {
        (v.0 / len, v.1 / len)
    }
}

/// Counter-clockwise perpendicular of a direction vector.
pub fn perpendicular(v: (f64, f64)) -> (f64, f64) {
    (-v.1, v.0)
}

/// Sign of the orientation of `c` relative to the directed line `a -> b`,
/// computed with an adaptive exact predicate. Positive means `c` lies to the
/// left of the line.
pub fn orient2d(a: Point, b: Point, c: Point) -> f64 {
    robust::orient2d(
        robust::Coord { x: a.x, y: a.y },
        robust::Coord { x: b.x, y: b.y },
        robust::Coord { x: c.x, y: c.y },
    )
}

/// Returns `true` when segments `(a1, a2)` and `(b1, b2)` intersect,
/// including touching configurations.
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = orient2d(b1, b2, a1);
    let d2 = orient2d(b1, b2, a2);
    let d3 = orient2d(a1, a2, b1);
    let d4 = orient2d(a1, a2, b2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(b1, b2, a1))
        || (d2 == 0.0 && on_segment(b1, b2, a2))
        || (d3 == 0.0 && on_segment(a1, a2, b1))
        || (d4 == 0.0 && on_segment(a1, a2, b2))
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Intersection point of segments `(a1, a2)` and `(b1, b2)`, if any.
pub fn segment_intersection(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    if !segments_intersect(a1, a2, b1, b2) {
        return None;
    }
    let denom = (a1.x - a2.x) * (b1.y - b2.y) - (a1.y - a2.y) * (b1.x - b2.x);
    if denom.abs() < f64::EPSILON {
        // Collinear overlap, report the nearer endpoint of the second segment.
        return Some(if squared_distance(a1, b1) < squared_distance(a1, b2) {
            b1
        } else {
            b2
        });
    }
    let t = ((a1.x - b1.x) * (b1.y - b2.y) - (a1.y - b1.y) * (b1.x - b2.x)) / denom;
    Some(Point::new(
        a1.x + t * (a2.x - a1.x),
        a1.y + t * (a2.y - a1.y),
    ))
}

/// Projects `p` onto the supporting line of `(a, b)` and returns the foot
/// together with the segment parameter `t` (`0` at `a`, `1` at `b`).
pub fn project_on_line(a: Point, b: Point, p: Point) -> (Point, f64) {
    let ab = (b.x - a.x, b.y - a.y);
    let len2 = ab.0 * ab.0 + ab.1 * ab.1;
    if len2 < f64::EPSILON {
        return (a, 0.0);
    }
    let t = ((p.x - a.x) * ab.0 + (p.y - a.y) * ab.1) / len2;
    (Point::new(a.x + t * ab.0, a.y + t * ab.1), t)
}

/// Barycentric coordinates of `p` in the triangle `(a, b, c)` projected on
/// the XY plane. Returns `None` for a degenerate triangle.
pub fn barycentric(p: Point, a: Point3, b: Point3, c: Point3) -> Option<(f64, f64, f64)> {
    let det = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
    if det.abs() < f64::EPSILON {
        return None;
    }
    let u = ((b.y - c.y) * (p.x - c.x) + (c.x - b.x) * (p.y - c.y)) / det;
    let v = ((c.y - a.y) * (p.x - c.x) + (a.x - c.x) * (p.y - c.y)) / det;
    let w = 1.0 - u - v;
    Some((u, v, w))
}

/// Orientation of point `p` relative to the plane of the oriented triangle
/// `(a, b, c)`. Positive when `p` lies on the side the normal points to.
pub fn orient3d(a: Point3, b: Point3, c: Point3, p: Point3) -> f64 {
    let u = (b.x - a.x, b.y - a.y, b.z - a.z);
    let v = (c.x - a.x, c.y - a.y, c.z - a.z);
    let w = (p.x - a.x, p.y - a.y, p.z - a.z);
    u.0 * (v.1 * w.2 - v.2 * w.1) - u.1 * (v.0 * w.2 - v.2 * w.0) + u.2 * (v.0 * w.1 - v.1 * w.0)
}

/// Counts how many boundary edges of `polygon` (outer ring and holes alike)
/// the open segment `(a, b)` crosses.
pub fn polygon_crossing_count(a: Point, b: Point, polygon: &Polygon<f64>) -> usize {
    let mut count = ring_crossing_count(a, b, polygon.exterior().0.as_slice());
    for hole in polygon.interiors() {
        count += ring_crossing_count(a, b, hole.0.as_slice());
    }
    count
}

fn ring_crossing_count(a: Point, b: Point, ring: &[Coord<f64>]) -> usize {
    let mut count = 0;
    for edge in ring.windows(2) {
        if segments_intersect(a, b, edge[0].into(), edge[1].into()) {
            count += 1;
        }
    }
    count
}

/// Shoots a segment of length `max_len` from `origin` along `dir` and returns
/// the nearest crossing with the polygon boundary, together with its distance
/// from the origin.
pub fn segment_polygon_exit(
    origin: Point,
    dir: (f64, f64),
    max_len: f64,
    polygon: &Polygon<f64>,
) -> Option<(Point, f64)> {
    let tip = origin.offset(dir, max_len);
    let mut best: Option<(Point, f64)> = None;
    let mut consider = |p: Point| {
        let d = distance(origin, p);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((p, d));
        }
    };
    for edge in polygon.exterior().0.windows(2) {
        if let Some(p) = segment_intersection(origin, tip, edge[0].into(), edge[1].into()) {
            consider(p);
        }
    }
    for hole in polygon.interiors() {
        for edge in hole.0.windows(2) {
            if let Some(p) = segment_intersection(origin, tip, edge[0].into(), edge[1].into()) {
                consider(p);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::LineString;

    #[test]
    fn distance_works() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(distance(a, b), 5.0);
        assert_eq!(squared_distance(a, b), 25.0);
    }

    #[test]
    fn unit_and_perpendicular() {
        let u = unit((3.0, 4.0));
        assert!((u.0 - 0.6).abs() < 1e-12);
        assert!((u.1 - 0.8).abs() < 1e-12);
        let n = perpendicular((1.0, 0.0));
        assert_eq!(n, (0.0, 1.0));
    }

    #[test]
    fn segments_crossing() {
        let a1 = Point::new(0.0, 0.0);
        let a2 = Point::new(2.0, 2.0);
        let b1 = Point::new(0.0, 2.0);
        let b2 = Point::new(2.0, 0.0);
        assert!(segments_intersect(a1, a2, b1, b2));
        let p = segment_intersection(a1, a2, b1, b2).unwrap();
        assert!((p.x - 1.0).abs() < 1e-12);
        assert!((p.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn segments_disjoint() {
        let a1 = Point::new(0.0, 0.0);
        let a2 = Point::new(1.0, 0.0);
        let b1 = Point::new(0.0, 1.0);
        let b2 = Point::new(1.0, 1.0);
        assert!(!segments_intersect(a1, a2, b1, b2));
    }

    #[test]
    fn segments_touching_endpoint() {
        let a1 = Point::new(0.0, 0.0);
        let a2 = Point::new(1.0, 1.0);
        let b1 = Point::new(1.0, 1.0);
        let b2 = Point::new(2.0, 0.0);
        assert!(segments_intersect(a1, a2, b1, b2));
    }

    #[test]
    fn projection_on_line() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        let (foot, t) = project_on_line(a, b, Point::new(3.0, 5.0));
        assert!((foot.x - 3.0).abs() < 1e-12);
        assert!((foot.y - 0.0).abs() < 1e-12);
        assert!((t - 0.3).abs() < 1e-12);
    }

    #[test]
    fn barycentric_inside() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 1.0);
        let c = Point3::new(0.0, 1.0, 2.0);
        let (u, v, w) = barycentric(Point::new(0.25, 0.25), a, b, c).unwrap();
        assert!(u >= 0.0 && v >= 0.0 && w >= 0.0);
        assert!((u + v + w - 1.0).abs() < 1e-12);
    }

    fn square(side: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (side, 0.0),
                (side, side),
                (0.0, side),
                (0.0, 0.0),
            ]),
            vec![],
        )
    }

    #[test]
    fn crossing_count_through_square() {
        let poly = square(10.0);
        // Fully crossing segment enters and leaves.
        let n = polygon_crossing_count(Point::new(-1.0, 5.0), Point::new(11.0, 5.0), &poly);
        assert_eq!(n, 2);
        // Segment from inside to outside leaves once.
        let n = polygon_crossing_count(Point::new(5.0, 5.0), Point::new(15.0, 5.0), &poly);
        assert_eq!(n, 1);
        // Fully interior segment does not cross.
        let n = polygon_crossing_count(Point::new(2.0, 2.0), Point::new(8.0, 8.0), &poly);
        assert_eq!(n, 0);
    }

    #[test]
    fn polygon_exit_distance() {
        let poly = square(10.0);
        let (p, d) = segment_polygon_exit(Point::new(5.0, 5.0), (1.0, 0.0), 100.0, &poly).unwrap();
        assert!((p.x - 10.0).abs() < 1e-9);
        assert!((d - 5.0).abs() < 1e-9);
    }
}
