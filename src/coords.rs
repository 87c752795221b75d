//! Base-to-screen coordinate translation and the eased drag path.
//!
//! Drag endpoints are authored against a 1920x1080 client area and scaled
//! into whatever viewport the operator supplies. Finding that viewport
//! (window calibration) is left to the caller.

use crate::config::schema::{Point, Viewport};

/// Width of the authoring resolution.
pub const BASE_WIDTH: u32 = 1920;

/// Height of the authoring resolution.
pub const BASE_HEIGHT: u32 = 1080;

/// Largest absolute screen coordinate or extent a layout may use.
pub const MAX_SCREEN_COORD: i32 = 32_767;

/// Minimum number of positions sampled along a drag.
pub const MIN_DRAG_STEPS: u32 = 20;

/// Target spacing between drag samples, in milliseconds.
const DRAG_STEP_MS: u32 = 15;

/// Maps base coordinates into a viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateMapper {
    viewport: Viewport,
}

impl CoordinateMapper {
    #[must_use]
    pub const fn new(viewport: Viewport) -> Self {
        Self { viewport }
    }

    /// Translates a base point, truncating toward zero and saturating at
    /// the `i32` range.
    #[must_use]
    pub fn translate(&self, point: Point) -> Point {
        let scale = |origin: i32, value: i32, extent: u32, base: u32| -> i32 {
            let offset = (f64::from(value) * f64::from(extent) / f64::from(base)).trunc();
            #[allow(clippy::cast_possible_truncation)]
            let screen = (f64::from(origin) + offset) as i32;
            screen
        };
        Point::new(
            scale(self.viewport.left, point.x, self.viewport.width, BASE_WIDTH),
            scale(self.viewport.top, point.y, self.viewport.height, BASE_HEIGHT),
        )
    }
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self::new(Viewport::default())
    }
}

/// Cubic ease-out: fast start, gentle arrival.
#[must_use]
pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Number of samples for a drag lasting `drag_ms`.
#[must_use]
pub fn drag_steps(drag_ms: u32) -> u32 {
    (drag_ms / DRAG_STEP_MS).max(MIN_DRAG_STEPS)
}

/// Pointer position at sample `step` of `steps` between `from` and `to`.
///
/// `step == 0` is exactly `from` and `step == steps` is exactly `to`.
#[must_use]
pub fn drag_position(from: Point, to: Point, step: u32, steps: u32) -> Point {
    if steps == 0 || step >= steps {
        return to;
    }
    let ease = ease_out_cubic(f64::from(step) / f64::from(steps));
    let lerp = |a: i32, b: i32| -> i32 {
        let value = (f64::from(b) - f64::from(a)).mul_add(ease, f64::from(a));
        #[allow(clippy::cast_possible_truncation)]
        let value = value as i32;
        value
    };
    Point::new(lerp(from.x, to.x), lerp(from.y, to.y))
}

/// The full sample sequence `0..=steps`.
pub fn drag_path(from: Point, to: Point, steps: u32) -> impl Iterator<Item = Point> {
    (0..=steps).map(move |i| drag_position(from, to, i, steps))
}
