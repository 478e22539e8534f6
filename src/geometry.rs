//! Small 2D helpers for movement rotation, door reach and LED ray casting.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn scale(self, fact: f64) -> Self {
        Self::new(self.x * fact, self.y * fact)
    }

    /// Rotate clockwise on screen (y grows downwards).
    pub fn rotate(self, rad: f64) -> Self {
        let (sin, cos) = rad.sin_cos();
        Self::new(cos * self.x - sin * self.y, sin * self.x + cos * self.y)
    }

    pub fn add(self, other: Vector) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(self, other: Vector) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }

    /// Round both components to whole grid steps.
    pub fn round(self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }
}

pub fn deg2rad(degrees: f64) -> f64 {
    degrees.to_radians()
}

/// Axis-aligned rectangle, normalized so `p0` is the min corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub p0: Vector,
    pub p1: Vector,
}

impl Rectangle {
    pub fn new(a: Vector, b: Vector) -> Self {
        Self {
            p0: Vector::new(a.x.min(b.x), a.y.min(b.y)),
            p1: Vector::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn from_bounds(bounds: Bounds) -> Self {
        Self::new(
            Vector::new(bounds.x, bounds.y),
            Vector::new(bounds.x + bounds.width, bounds.y + bounds.height),
        )
    }

    pub fn center(&self) -> Vector {
        self.p1.subtract(self.p0).scale(0.5).add(self.p0)
    }

    /// Grow every side by `margin`.
    pub fn grow(&self, margin: f64) -> Self {
        Self::new(
            Vector::new(self.p0.x - margin, self.p0.y - margin),
            Vector::new(self.p1.x + margin, self.p1.y + margin),
        )
    }

    /// Touching edges count as intersecting.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        !(other.p0.x > self.p1.x
            || other.p1.x < self.p0.x
            || other.p1.y < self.p0.y
            || other.p0.y > self.p1.y)
    }

    /// Factor by which `direction` has to be scaled from the centre to reach the
    /// border (one pixel inside). A zero vector yields 1.
    pub fn intersection_from_center(&self, direction: Vector) -> f64 {
        let center = self.center();
        if direction.y != 0.0 {
            let fact = ((self.p1.y - center.y - 1.0) / direction.y).abs();
            let x = direction.x * fact + center.x;
            if x >= self.p0.x && x <= self.p1.x {
                return fact;
            }
        }
        if direction.x != 0.0 {
            let fact = ((self.p1.x - center.x - 1.0) / direction.x).abs();
            let y = direction.y * fact + center.y;
            if y >= self.p0.y && y <= self.p1.y {
                return fact;
            }
        }
        tracing::error!(?direction, "intersection_from_center called with a zero vector");
        1.0
    }
}

/// Scene-space bounds as reported by the scene host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_by_quarter_turns() {
        let north = Vector::new(0.0, -1.0);
        assert_eq!(north.rotate(deg2rad(0.0)).round(), (0, -1));
        assert_eq!(north.rotate(deg2rad(90.0)).round(), (1, 0));
        assert_eq!(north.rotate(deg2rad(180.0)).round(), (0, 1));
        assert_eq!(north.rotate(deg2rad(270.0)).round(), (-1, 0));
    }

    #[test]
    fn test_diagonal_rotation_rounds_to_grid() {
        let up_right = Vector::new(1.0, -1.0);
        assert_eq!(up_right.rotate(deg2rad(90.0)).round(), (1, 1));
    }

    #[test]
    fn test_rectangle_normalizes_and_intersects() {
        let a = Rectangle::new(Vector::new(10.0, 10.0), Vector::new(0.0, 0.0));
        assert_eq!(a.p0, Vector::new(0.0, 0.0));
        let touching = Rectangle::new(Vector::new(10.0, 0.0), Vector::new(20.0, 5.0));
        let apart = Rectangle::new(Vector::new(11.0, 0.0), Vector::new(20.0, 5.0));
        assert!(a.intersects(&touching));
        assert!(!a.intersects(&apart));
        assert!(a.grow(1.0).intersects(&apart));
    }

    #[test]
    fn test_intersection_from_center() {
        let r = Rectangle::new(Vector::new(0.0, 0.0), Vector::new(100.0, 50.0));
        assert_eq!(r.center(), Vector::new(50.0, 25.0));
        // straight down hits the bottom edge one pixel inside
        assert_eq!(r.intersection_from_center(Vector::new(0.0, 1.0)), 24.0);
        // straight right hits the right edge
        assert_eq!(r.intersection_from_center(Vector::new(1.0, 0.0)), 49.0);
    }
}
