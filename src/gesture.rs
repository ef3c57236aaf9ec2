//! Pan/pinch controller for the photo being edited.
//!
//! Per-frame updates are plain clamped arithmetic; nothing here suspends.
//! The controller is the only writer of the live [`Transform`]; other tasks
//! read the latest value through [`TransformController::subscribe`].

use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

use crate::config::GestureOptions;
use crate::processing::geometry::{CropView, Dimensions, FrameRect, Size, Transform, cover_base_size};

const MIN_ZOOM: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureState {
    Idle,
    Panning { start: Transform },
    Pinching { start: Transform },
}

#[derive(Debug, Clone, Copy)]
struct Settle {
    from: Transform,
    to: Transform,
    elapsed: Duration,
}

pub struct TransformController {
    image: Dimensions,
    container: Size,
    frame: FrameRect,
    options: GestureOptions,
    live: Transform,
    state: GestureState,
    settle: Option<Settle>,
    published: watch::Sender<Transform>,
}

impl TransformController {
    pub fn new(image: Dimensions, container: Size, frame: FrameRect, options: GestureOptions) -> Self {
        let (published, _) = watch::channel(Transform::default());
        Self {
            image,
            container,
            frame,
            options,
            live: Transform::default(),
            state: GestureState::Idle,
            settle: None,
            published,
        }
    }

    /// Latest-value cell for readers outside the gesture callback.
    pub fn subscribe(&self) -> watch::Receiver<Transform> {
        self.published.subscribe()
    }

    pub fn transform(&self) -> Transform {
        self.live
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_gesture_active(&self) -> bool {
        !matches!(self.state, GestureState::Idle)
    }

    pub fn is_settling(&self) -> bool {
        self.settle.is_some()
    }

    pub fn image(&self) -> Dimensions {
        self.image
    }

    /// Current view for the geometry solver.
    pub fn view(&self) -> CropView {
        CropView {
            container: self.container,
            frame: self.frame,
            transform: self.live,
        }
    }

    /// Viewport resize: adopt the new layout and re-clamp.
    pub fn set_layout(&mut self, container: Size, frame: FrameRect) {
        self.container = container;
        self.frame = frame;
        self.commit(self.clamp(self.live));
    }

    /// Switch to another photo, restoring its saved transform or centering it.
    pub fn load_photo(&mut self, image: Dimensions, saved: Option<Transform>) {
        self.image = image;
        self.state = GestureState::Idle;
        self.settle = None;
        let target = saved.filter(Transform::is_finite).unwrap_or_default();
        self.commit(self.clamp(target));
    }

    /// Apply an externally supplied transform unless the user is mid-gesture.
    pub fn sync_from_props(&mut self, transform: Transform) -> bool {
        if self.is_gesture_active() || !transform.is_finite() {
            return false;
        }
        self.settle = None;
        self.commit(self.clamp(transform));
        true
    }

    pub fn pan_begin(&mut self) -> bool {
        if matches!(self.state, GestureState::Pinching { .. }) {
            return false;
        }
        self.settle = None;
        self.state = GestureState::Panning { start: self.live };
        true
    }

    pub fn pan_update(&mut self, dx: f64, dy: f64) {
        let GestureState::Panning { start } = self.state else {
            return;
        };
        let damping = self.options.pan_damping;
        let candidate = Transform::new(
            start.scale,
            start.translate_x + dx * damping,
            start.translate_y + dy * damping,
        );
        self.commit(self.clamp(candidate));
    }

    /// Finish a pan; returns the committed resting transform.
    pub fn pan_end(&mut self) -> Option<Transform> {
        if !matches!(self.state, GestureState::Panning { .. }) {
            return None;
        }
        self.state = GestureState::Idle;
        Some(self.come_to_rest())
    }

    pub fn pinch_begin(&mut self) -> bool {
        if matches!(self.state, GestureState::Panning { .. }) {
            return false;
        }
        self.settle = None;
        self.state = GestureState::Pinching { start: self.live };
        true
    }

    /// `gesture_scale` is the recogniser's cumulative scale since pinch begin.
    pub fn pinch_update(&mut self, gesture_scale: f64) {
        let GestureState::Pinching { start } = self.state else {
            return;
        };
        if !gesture_scale.is_finite() {
            return;
        }
        let scale = start.scale * (1.0 + (gesture_scale - 1.0) * self.options.pinch_damping);
        // translation bounds shrink with the scale, so re-clamp in the same step
        let candidate = Transform::new(scale, self.live.translate_x, self.live.translate_y);
        self.commit(self.clamp(candidate));
    }

    pub fn pinch_end(&mut self) -> Option<Transform> {
        if !matches!(self.state, GestureState::Pinching { .. }) {
            return None;
        }
        self.state = GestureState::Idle;
        Some(self.come_to_rest())
    }

    /// Clamp scale into `[1, max_zoom]` and translation so the frame stays covered.
    pub fn clamp(&self, candidate: Transform) -> Transform {
        let scale = if candidate.scale.is_finite() {
            candidate.scale.clamp(MIN_ZOOM, self.options.max_zoom)
        } else {
            MIN_ZOOM
        };
        let (max_x, max_y) = self.translate_bounds(scale);
        let tx = finite_or_zero(candidate.translate_x).clamp(-max_x, max_x);
        let ty = finite_or_zero(candidate.translate_y).clamp(-max_y, max_y);
        Transform::new(scale, tx, ty)
    }

    /// Maximum |translate| per axis at `scale`.
    pub fn translate_bounds(&self, scale: f64) -> (f64, f64) {
        let (base_w, base_h) = cover_base_size(self.image, self.frame.width, self.frame.height);
        (
            ((scale * base_w - self.frame.width) / 2.0).max(0.0),
            ((scale * base_h - self.frame.height) / 2.0).max(0.0),
        )
    }

    /// Whether `transform` leaves no visible gap inside the frame.
    pub fn covers_frame(&self, transform: Transform) -> bool {
        const EPS: f64 = 1e-9;
        let (max_x, max_y) = self.translate_bounds(transform.scale);
        transform.scale >= MIN_ZOOM - EPS
            && transform.translate_x.abs() <= max_x + EPS
            && transform.translate_y.abs() <= max_y + EPS
    }

    /// Advance the settle animation; returns the live transform.
    pub fn tick(&mut self, elapsed: Duration) -> Transform {
        let Some(mut settle) = self.settle else {
            return self.live;
        };
        settle.elapsed += elapsed;
        let total = self.options.settle_duration.as_secs_f64();
        let t = if total <= 0.0 {
            1.0
        } else {
            (settle.elapsed.as_secs_f64() / total).min(1.0)
        };
        let value = Transform::new(
            lerp(settle.from.scale, settle.to.scale, t),
            lerp(settle.from.translate_x, settle.to.translate_x, t),
            lerp(settle.from.translate_y, settle.to.translate_y, t),
        );
        self.settle = (t < 1.0).then_some(settle);
        self.commit(if t >= 1.0 { settle.to } else { value });
        self.live
    }

    fn come_to_rest(&mut self) -> Transform {
        // fast flicks can land outside the bounds; the clamp runs once more here
        let resting = self.clamp(self.live);
        if resting != self.live {
            self.settle = Some(Settle {
                from: self.live,
                to: resting,
                elapsed: Duration::ZERO,
            });
        }
        let _ = self.published.send_replace(resting);
        trace!(?resting, "gesture committed");
        resting
    }

    fn commit(&mut self, transform: Transform) {
        self.live = transform;
        let _ = self.published.send_replace(transform);
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
