use egui::{Pos2, Vec2};

/// The extra vector operations the layout and routing code needs on top of `egui::Vec2`.
pub trait VectorExt {
    fn manhattan_length(&self) -> f32;
    fn opposite(&self) -> Self;
    /// Unit vector in the same direction, `ZERO` for a zero-length input.
    fn normalized_or_zero(&self) -> Self;
    fn distance(&self, other: Self) -> f32;
}

impl VectorExt for Vec2 {
    fn manhattan_length(&self) -> f32 {
        self.x.abs() + self.y.abs()
    }

    fn opposite(&self) -> Self {
        -*self
    }

    fn normalized_or_zero(&self) -> Self {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            *self / len
        } else {
            Vec2::ZERO
        }
    }

    fn distance(&self, other: Self) -> f32 {
        (*self - other).length()
    }
}

pub fn point_to_point_distance(a: Pos2, b: Pos2) -> f32 {
    ((a.x - b.x).powf(2.0) + (a.y - b.y).powf(2.0)).sqrt()
}

/// Distance from `p` to the segment `a`-`b`.
pub fn point_to_line_distance(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    fn dist2(a: Pos2, b: Pos2) -> f32 {
        (a.x - b.x).powf(2.0) + (a.y - b.y).powf(2.0)
    }
    let l2 = dist2(a, b);
    let distance_squared = if l2 == 0.0 {
        dist2(p, a)
    } else {
        let t = (((p.x - a.x) * (b.x - a.x) + (p.y - a.y) * (b.y - a.y)) / l2).clamp(0.0, 1.0);
        dist2(p, Pos2::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)))
    };
    distance_squared.sqrt()
}

/// Inclusive interval test, `a` and `b` may come in either order.
pub fn is_between(value: f32, a: f32, b: f32, offset: f32) -> bool {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    lo - offset <= value && value <= hi + offset
}

/// Box spanned by two arbitrary corners, grown by `offset` on every side.
pub fn point_is_in_box(p: Pos2, a: Pos2, b: Pos2, offset: f32) -> bool {
    is_between(p.x, a.x, b.x, offset) && is_between(p.y, a.y, b.y, offset)
}

/// Pulls `value` onto whichever target lies closer than `limit`.
pub fn snap(value: f32, a: f32, b: f32, limit: f32) -> f32 {
    let da = (value - a).abs();
    let db = (value - b).abs();
    match (da < limit, db < limit) {
        (true, true) => {
            if da <= db {
                a
            } else {
                b
            }
        }
        (true, false) => a,
        (false, true) => b,
        (false, false) => value,
    }
}

pub fn midpoint(a: Pos2, b: Pos2) -> Pos2 {
    Pos2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}
