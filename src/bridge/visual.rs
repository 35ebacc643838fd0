//! On-screen presentation of the embedded surface.
//!
//! The surface is anchored to the top-right corner of the viewport: its
//! position is `{ top, right }`, the distances from the top and right viewport
//! edges. The embedded UI moves it with `drag` messages (deltas) and changes
//! its size with `resize` messages (named sizes). After every change the
//! rectangle is clamped so the whole surface stays inside the viewport with a
//! fixed margin.
//!
//! # Persistence
//!
//! The rectangle is written to durable storage under one key so the next
//! injection can restore the user's chosen position. Writes only happen once a
//! gesture has settled (a `drag` with phase `end`, or a `resize`), never
//! mid-gesture.
//!
//! # Examples
//!
//! ```
//! use wallet_relay::bridge::visual::{VisualState, Viewport};
//!
//! let viewport = Viewport::new(1000.0, 800.0);
//! let rect = VisualState::new(20.0, 100.0, 360.0, 600.0);
//!
//! // dragging 150px to the right would push the right edge 50px past the viewport
//! let moved = rect.dragged(150.0, 0.0, viewport, 16.0);
//! assert_eq!(moved.right, 16.0);
//! assert_eq!(moved.top, 20.0);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

/// Bounding rectangle of the embedded surface, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VisualState {
    /// Distance from the top edge of the viewport
    pub top: f64,
    /// Distance from the right edge of the viewport
    pub right: f64,
    /// Surface width
    pub width: f64,
    /// Surface height
    pub height: f64,
}

/// Size of the visible area the surface must stay inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Viewport width
    pub width: f64,
    /// Viewport height
    pub height: f64,
}

impl Viewport {
    /// Creates a viewport of the given size.
    pub fn new(width: f64, height: f64) -> Self {
        Viewport { width, height }
    }
}

/// The fixed set of sizes the embedded UI may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceSize {
    /// A collapsed bar
    Compact,
    /// The normal panel
    Regular,
    /// A taller, wider panel
    Expanded,
    /// A modal takeover, shown above a dimmed full-viewport overlay
    Modal,
}

impl SurfaceSize {
    /// Whether this size is shown above a dimming overlay.
    pub fn has_overlay(self) -> bool {
        matches!(self, SurfaceSize::Modal)
    }
}

/// Phase of a drag gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GesturePhase {
    /// The pointer is still moving
    Move,
    /// The pointer was released; the position is final
    End,
}

/// Width and height of one named size.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Dimensions {
    /// Width in CSS pixels
    pub width: f64,
    /// Height in CSS pixels
    pub height: f64,
}

/// Width/height pair for every [`SurfaceSize`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SizeTable {
    /// Dimensions of [`SurfaceSize::Compact`]
    pub compact: Dimensions,
    /// Dimensions of [`SurfaceSize::Regular`]
    pub regular: Dimensions,
    /// Dimensions of [`SurfaceSize::Expanded`]
    pub expanded: Dimensions,
    /// Dimensions of [`SurfaceSize::Modal`]
    pub modal: Dimensions,
}

impl Default for SizeTable {
    fn default() -> Self {
        SizeTable {
            compact: Dimensions { width: 360.0, height: 64.0 },
            regular: Dimensions { width: 360.0, height: 600.0 },
            expanded: Dimensions { width: 420.0, height: 720.0 },
            modal: Dimensions { width: 480.0, height: 720.0 },
        }
    }
}

impl SizeTable {
    /// Dimensions for `size`.
    pub fn get(&self, size: SurfaceSize) -> Dimensions {
        match size {
            SurfaceSize::Compact => self.compact,
            SurfaceSize::Regular => self.regular,
            SurfaceSize::Expanded => self.expanded,
            SurfaceSize::Modal => self.modal,
        }
    }

    /// Every size with its dimensions.
    pub fn iter(&self) -> impl Iterator<Item = (SurfaceSize, Dimensions)> + '_ {
        [
            SurfaceSize::Compact,
            SurfaceSize::Regular,
            SurfaceSize::Expanded,
            SurfaceSize::Modal,
        ]
        .into_iter()
        .map(|size| (size, self.get(size)))
    }
}

/// Clamps an offset so a span of `extent` stays within `available` with `margin`
/// on both sides. If it cannot fit, it is pinned to the leading margin.
fn clamp_axis(offset: f64, extent: f64, available: f64, margin: f64) -> f64 {
    let max = available - extent - margin;
    if max < margin {
        margin
    } else {
        offset.clamp(margin, max)
    }
}

impl VisualState {
    /// Creates a rectangle.
    pub fn new(top: f64, right: f64, width: f64, height: f64) -> Self {
        VisualState {
            top,
            right,
            width,
            height,
        }
    }

    /// This rectangle moved as little as possible to lie inside `viewport`.
    pub fn clamped(self, viewport: Viewport, margin: f64) -> Self {
        VisualState {
            top: clamp_axis(self.top, self.height, viewport.height, margin),
            right: clamp_axis(self.right, self.width, viewport.width, margin),
            ..self
        }
    }

    /// This rectangle moved by a pointer delta, then clamped.
    ///
    /// `dx` is positive to the right and `dy` positive downwards; because the
    /// surface is anchored on the right, moving right shrinks `right`.
    pub fn dragged(self, dx: f64, dy: f64, viewport: Viewport, margin: f64) -> Self {
        VisualState {
            top: self.top + dy,
            right: self.right - dx,
            ..self
        }
        .clamped(viewport, margin)
    }

    /// This rectangle with new dimensions, keeping its anchor, then clamped.
    pub fn resized(self, dimensions: Dimensions, viewport: Viewport, margin: f64) -> Self {
        VisualState {
            width: dimensions.width,
            height: dimensions.height,
            ..self
        }
        .clamped(viewport, margin)
    }
}

/// Error type for visual-state persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The stored value was not a valid rectangle.
    #[error("stored rectangle is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable string key/value storage, e.g. `localStorage`.
pub trait VisualStore: Debug {
    /// Reads the value under `key`.
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Writes `value` under `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Loads the rectangle persisted under `key`, if any.
pub fn load(store: &dyn VisualStore, key: &str) -> Result<Option<VisualState>, StoreError> {
    match store.read(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Persists `state` under `key`.
pub fn save(store: &dyn VisualStore, key: &str, state: &VisualState) -> Result<(), StoreError> {
    let raw = serde_json::to_string(state)?;
    store.write(key, &raw)
}

/// An in-memory [`VisualStore`]. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<HashMap<String, String>>>,
    writes: Rc<RefCell<usize>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many writes have happened.
    pub fn write_count(&self) -> usize {
        *self.writes.borrow()
    }
}

impl VisualStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        *self.writes.borrow_mut() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARGIN: f64 = 16.0;

    fn viewport() -> Viewport {
        Viewport::new(1000.0, 800.0)
    }

    #[test]
    fn drag_within_bounds_is_additive() {
        let rect = VisualState::new(100.0, 100.0, 360.0, 400.0);
        let moved = rect.dragged(-30.0, 25.0, viewport(), MARGIN);
        assert_eq!(moved, VisualState::new(125.0, 130.0, 360.0, 400.0));
    }

    #[test]
    fn drag_past_right_edge_clamps_to_margin() {
        let rect = VisualState::new(100.0, 100.0, 360.0, 400.0);
        let moved = rect.dragged(150.0, 0.0, viewport(), MARGIN);
        assert_eq!(moved.right, MARGIN);
    }

    #[test]
    fn drag_past_left_and_bottom_edges_clamps() {
        let rect = VisualState::new(100.0, 100.0, 360.0, 400.0);
        let moved = rect.dragged(-2000.0, 2000.0, viewport(), MARGIN);
        assert_eq!(moved.right, 1000.0 - 360.0 - MARGIN);
        assert_eq!(moved.top, 800.0 - 400.0 - MARGIN);
    }

    #[test]
    fn oversized_surface_pins_to_margin() {
        let rect = VisualState::new(300.0, 300.0, 360.0, 720.0);
        let clamped = rect.clamped(Viewport::new(320.0, 600.0), MARGIN);
        assert_eq!(clamped.top, MARGIN);
        assert_eq!(clamped.right, MARGIN);
    }

    #[test]
    fn resize_keeps_anchor_and_reclamps() {
        let rect = VisualState::new(300.0, 16.0, 360.0, 64.0);
        let sizes = SizeTable::default();
        let grown = rect.resized(sizes.get(SurfaceSize::Expanded), viewport(), MARGIN);
        assert_eq!(grown.width, 420.0);
        assert_eq!(grown.height, 720.0);
        assert_eq!(grown.right, 16.0);
        assert_eq!(grown.top, 800.0 - 720.0 - MARGIN);
    }

    #[test]
    fn only_modal_has_overlay() {
        let with_overlay: Vec<_> = SizeTable::default()
            .iter()
            .filter(|(size, _)| size.has_overlay())
            .map(|(size, _)| size)
            .collect();
        assert_eq!(with_overlay, vec![SurfaceSize::Modal]);
    }

    #[test]
    fn store_round_trip_and_corruption() {
        let store = MemoryStore::new();
        assert!(load(&store, "rect").unwrap().is_none());

        let rect = VisualState::new(1.0, 2.0, 3.0, 4.0);
        save(&store, "rect", &rect).unwrap();
        assert_eq!(load(&store, "rect").unwrap(), Some(rect));

        store.write("rect", "{not json").unwrap();
        assert!(matches!(load(&store, "rect"), Err(StoreError::Corrupt(_))));
    }
}
