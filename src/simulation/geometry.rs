//! Geometry helpers for the propagation model.
//!
//! Contains helper functions for:
//! - Distances and bearings between node positions
//! - Point-in-shape tests (rectangles, circles)
//! - Segment-shape intersection tests used to attenuate links crossing obstacles

use std::f64::consts::PI;

use super::types::{CirclePos, Obstacle, Point, RectPos};

/// Euclidean distance in meters.
pub fn distance(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Bearing from `from` toward `to` in radians, normalized to `[0, 2π)`.
/// Zero points along the +x axis, angles grow counter-clockwise.
pub fn bearing(from: &Point, to: &Point) -> f64 {
    normalize_angle((to.y - from.y).atan2(to.x - from.x))
}

/// Normalize an angle to `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(2.0 * PI);
    if a >= 2.0 * PI { 0.0 } else { a }
}

/// Absolute angular separation of two bearings, in `[0, π]`.
pub fn angle_between(a: f64, b: f64) -> f64 {
    let diff = normalize_angle(a - b);
    if diff > PI { 2.0 * PI - diff } else { diff }
}

/// Total attenuation (dB) of the obstacles crossed by the straight line
/// between two points. Each obstacle counts once, however many of its edges
/// the segment crosses.
pub fn obstacle_loss_db(point1: &Point, point2: &Point, obstacles: &[Obstacle]) -> f64 {
    obstacles
        .iter()
        .filter(|obs| segment_intersects_obstacle(point1, point2, obs))
        .map(Obstacle::attenuation_db)
        .sum()
}

fn segment_intersects_obstacle(p1: &Point, p2: &Point, obstacle: &Obstacle) -> bool {
    match obstacle {
        Obstacle::Rectangle { position, .. } => segment_intersects_rect(p1, p2, position),
        Obstacle::Circle { position, .. } => segment_intersects_circle(p1, p2, position),
    }
}

/// Normalize rectangle corners to (left,right,top,bottom) tuple.
fn rect_bounds(rect: &RectPos) -> (f64, f64, f64, f64) {
    let left = rect.top_left.x.min(rect.bottom_right.x);
    let right = rect.top_left.x.max(rect.bottom_right.x);
    let top = rect.top_left.y.min(rect.bottom_right.y);
    let bottom = rect.top_left.y.max(rect.bottom_right.y);
    (left, right, top, bottom)
}

/// Inclusive point-in-rectangle test.
pub fn point_in_rect(p: &Point, rect: &RectPos) -> bool {
    let (left, right, top, bottom) = rect_bounds(rect);
    p.x >= left && p.x <= right && p.y >= top && p.y <= bottom
}

/// Inclusive point-in-circle test.
pub fn point_in_circle(p: &Point, circle: &CirclePos) -> bool {
    let dx = p.x - circle.center.x;
    let dy = p.y - circle.center.y;
    dx * dx + dy * dy <= circle.radius * circle.radius
}

fn segment_intersects_rect(p1: &Point, p2: &Point, rect: &RectPos) -> bool {
    if point_in_rect(p1, rect) || point_in_rect(p2, rect) {
        return true;
    }

    let (left, right, top, bottom) = rect_bounds(rect);
    let corners = [
        Point { x: left, y: top },
        Point { x: right, y: top },
        Point { x: right, y: bottom },
        Point { x: left, y: bottom },
    ];
    (0..4).any(|i| segments_intersect(p1, p2, &corners[i], &corners[(i + 1) % 4]))
}

/// Distance from the circle center to the segment, via the clamped projection.
fn segment_intersects_circle(p1: &Point, p2: &Point, circle: &CirclePos) -> bool {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return point_in_circle(p1, circle);
    }
    let t = (((circle.center.x - p1.x) * dx + (circle.center.y - p1.y) * dy) / len2).clamp(0.0, 1.0);
    let closest = Point {
        x: p1.x + t * dx,
        y: p1.y + t * dy,
    };
    point_in_circle(&closest, circle)
}

/// Orientation of ordered triplet (a,b,c): 1 clockwise, -1 counter-clockwise, 0 collinear.
fn orientation(a: &Point, b: &Point, c: &Point) -> i32 {
    let val = (b.y - a.y) * (c.x - b.x) - (b.x - a.x) * (c.y - b.y);
    if val > 0.0 {
        1
    } else if val < 0.0 {
        -1
    } else {
        0
    }
}

/// True if point b lies within the bounding box of a–c (collinearity assumed).
fn on_segment(a: &Point, b: &Point, c: &Point) -> bool {
    b.x >= a.x.min(c.x) && b.x <= a.x.max(c.x) && b.y >= a.y.min(c.y) && b.y <= a.y.max(c.y)
}

/// Segment–segment intersection including endpoint touching and collinear overlap.
pub fn segments_intersect(p1: &Point, q1: &Point, p2: &Point, q2: &Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }
    (o1 == 0 && on_segment(p1, p2, q1)) || (o2 == 0 && on_segment(p1, q2, q1)) || (o3 == 0 && on_segment(p2, p1, q2)) || (o4 == 0 && on_segment(p2, q1, q2))
}
