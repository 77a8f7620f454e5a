//! Compositor layers
//!
//! [`AgentLayer`] is one layer of the remote tree. Layers are shared as
//! [`LayerRef`] handles so views can keep them across updates: when a new
//! payload mentions a known id the same object is reset in place.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smol::future::BoxedLocal;

use crate::LayerTreeError;
use crate::config::Config;
use crate::geometry::{Matrix4, Quad, Vector3, multiply_vector_by_matrix_and_normalize};
use crate::protocol::{LayerId, LayerPayload, Rect, ScrollRect, StickyPositionConstraint};
use crate::snapshot::{PaintProfilerSnapshot, SnapshotWithRect};
use crate::target::{NodeRef, Target};

/// Shared layer handle
pub type LayerRef = Rc<AgentLayer>;

/// Read and link operations every layer implementation provides
pub trait Layer {
    fn id(&self) -> LayerId;
    fn parent_id(&self) -> Option<LayerId>;
    fn parent(&self) -> Option<Rc<Self>>;
    fn is_root(&self) -> bool;
    fn children(&self) -> Vec<Rc<Self>>;

    /// Append `child` and make `self` its parent
    ///
    /// Fails if `child` is already linked under a different parent, or if
    /// `child` is `self` or one of its ancestors.
    fn add_child(self: &Rc<Self>, child: &Rc<Self>) -> Result<(), LayerTreeError>;

    fn node(&self) -> Option<NodeRef>;

    /// Closest DOM node on the ancestor chain, starting at `self`
    fn node_for_self_or_ancestor(&self) -> Option<NodeRef>;

    fn offset_x(&self) -> f64;
    fn offset_y(&self) -> f64;
    fn width(&self) -> f64;
    fn height(&self) -> f64;
    fn transform(&self) -> Option<[f64; 16]>;

    /// Viewport quad; `None` until the layer has been placed under a root
    fn quad(&self) -> Option<Quad>;

    fn anchor_point(&self) -> [f64; 3];
    fn invisible(&self) -> bool;
    fn paint_count(&self) -> u32;
    fn last_paint_rect(&self) -> Option<Rect>;
    fn scroll_rects(&self) -> Vec<ScrollRect>;
    fn sticky_position_constraints(&self) -> Vec<StickyPositionConstraint>;
    fn draws_content(&self) -> bool;
    fn gpu_memory_usage(&self) -> f64;

    /// Ask the target why this layer was composited
    fn request_compositing_reasons(&self) -> BoxedLocal<Vec<String>>;

    /// Snapshot requests covering the layer
    fn snapshots(&self) -> Vec<BoxedLocal<Option<SnapshotWithRect>>>;
}

/// Cached raster of a layer, owned by the viewer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Layer backed by the remote LayerTree agent
pub struct AgentLayer {
    target: Option<Target>,
    config: Config,
    state: RefCell<LayerState>,
}

#[derive(Default)]
struct LayerState {
    payload: LayerPayload,
    node: Option<NodeRef>,
    parent: Weak<AgentLayer>,
    children: Vec<LayerRef>,
    paint_count: u32,
    last_paint_rect: Option<Rect>,
    scroll_rects: Vec<ScrollRect>,
    image: Option<Rc<LayerImage>>,
    quad: Option<Quad>,
}

impl AgentLayer {
    pub fn new(target: Option<Target>, payload: LayerPayload, config: Config) -> Self {
        let layer = Self {
            target,
            config,
            state: RefCell::new(LayerState::default()),
        };
        layer.reset(payload);
        layer
    }

    /// Reinitialize from a fresh payload
    ///
    /// Drops the node, links, paint count, cached image and quad. The last
    /// paint rect survives so a viewer keeps its highlight across updates.
    pub fn reset(&self, payload: LayerPayload) {
        let mut state = self.state.borrow_mut();
        state.node = None;
        state.children.clear();
        state.parent = Weak::new();
        state.paint_count = 0;
        state.scroll_rects = payload.scroll_rects.clone().unwrap_or_default();
        state.payload = payload;
        state.image = None;
        state.quad = None;
    }

    /// Record a paint of `rect`
    pub fn record_paint(&self, rect: Rect) {
        let paint_count = self.paint_count().saturating_add(1);
        let mut state = self.state.borrow_mut();
        state.last_paint_rect = Some(rect);
        state.paint_count = paint_count;
        state.image = None;
    }

    pub(crate) fn set_node(&self, node: Option<NodeRef>) {
        self.state.borrow_mut().node = node;
    }

    pub(crate) fn set_last_paint_rect(&self, rect: Rect) {
        self.state.borrow_mut().last_paint_rect = Some(rect);
    }

    /// Cached raster, cleared on every paint
    pub fn image(&self) -> Option<Rc<LayerImage>> {
        self.state.borrow().image.clone()
    }

    pub fn set_image(&self, image: LayerImage) {
        self.state.borrow_mut().image = Some(Rc::new(image));
    }

    /// Payload the layer was last reset from
    pub fn payload(&self) -> LayerPayload {
        self.state.borrow().payload.clone()
    }

    /// Compute this layer's quad under `parent_transform`, then recurse into
    /// the children with the resulting matrix
    pub fn compute_quad(&self, parent_transform: &Matrix4) {
        let matrix = self.transform_to_viewport(parent_transform);
        let children = {
            let mut state = self.state.borrow_mut();
            let quad = Quad::from_rect(state.payload.width, state.payload.height, &matrix);
            state.quad = Some(quad);
            state.children.clone()
        };

        for child in &children {
            child.compute_quad(&matrix);
        }
    }

    /// Local-to-viewport matrix: offset, then the transform around the
    /// anchor point, then the parent transform
    fn transform_to_viewport(&self, parent_transform: &Matrix4) -> Matrix4 {
        let state = self.state.borrow();
        let payload = &state.payload;
        let mut matrix = Matrix4::translate(payload.offset_x, payload.offset_y, 0.0);

        if let Some(values) = transform_values(payload) {
            let transform = Matrix4::from_column_major(&values).rounded(self.config.transform_precision);
            let [ax, ay, az] = anchor_of(payload);
            let anchor_vector = Vector3::new(payload.width * ax, payload.height * ay, az);
            let anchor = multiply_vector_by_matrix_and_normalize(anchor_vector, &matrix);
            let anchor_matrix = Matrix4::translate(-anchor.x, -anchor.y, -anchor.z);
            let anchor_inverse = Matrix4::translate(anchor.x, anchor.y, anchor.z);
            matrix = anchor_inverse.multiply(&transform.multiply(&anchor_matrix.multiply(&matrix)));
        }

        parent_transform.multiply(&matrix)
    }
}

impl Layer for AgentLayer {
    fn id(&self) -> LayerId {
        self.state.borrow().payload.layer_id.clone()
    }

    fn parent_id(&self) -> Option<LayerId> {
        self.state.borrow().payload.parent_id().cloned()
    }

    fn parent(&self) -> Option<LayerRef> {
        self.state.borrow().parent.upgrade()
    }

    fn is_root(&self) -> bool {
        self.parent_id().is_none()
    }

    fn children(&self) -> Vec<LayerRef> {
        self.state.borrow().children.clone()
    }

    fn add_child(self: &Rc<Self>, child: &LayerRef) -> Result<(), LayerTreeError> {
        if let Some(existing) = child.parent() {
            if Rc::ptr_eq(&existing, self) {
                return Ok(());
            }
            return Err(LayerTreeError::ChildAlreadyParented {
                child: child.id(),
                parent: existing.id(),
            });
        }

        let mut ancestor = Some(self.clone());
        while let Some(layer) = ancestor {
            if Rc::ptr_eq(&layer, child) {
                return Err(LayerTreeError::Cycle {
                    child: child.id(),
                    parent: self.id(),
                });
            }
            ancestor = layer.parent();
        }

        self.state.borrow_mut().children.push(child.clone());
        child.state.borrow_mut().parent = Rc::downgrade(self);
        Ok(())
    }

    fn node(&self) -> Option<NodeRef> {
        self.state.borrow().node.clone()
    }

    fn node_for_self_or_ancestor(&self) -> Option<NodeRef> {
        if let Some(node) = self.node() {
            return Some(node);
        }
        let mut current = self.parent();
        while let Some(layer) = current {
            if let Some(node) = layer.node() {
                return Some(node);
            }
            current = layer.parent();
        }
        None
    }

    fn offset_x(&self) -> f64 {
        self.state.borrow().payload.offset_x
    }

    fn offset_y(&self) -> f64 {
        self.state.borrow().payload.offset_y
    }

    fn width(&self) -> f64 {
        self.state.borrow().payload.width
    }

    fn height(&self) -> f64 {
        self.state.borrow().payload.height
    }

    fn transform(&self) -> Option<[f64; 16]> {
        transform_values(&self.state.borrow().payload)
    }

    fn quad(&self) -> Option<Quad> {
        self.state.borrow().quad
    }

    fn anchor_point(&self) -> [f64; 3] {
        anchor_of(&self.state.borrow().payload)
    }

    fn invisible(&self) -> bool {
        self.state.borrow().payload.invisible
    }

    fn paint_count(&self) -> u32 {
        let state = self.state.borrow();
        if state.paint_count != 0 {
            state.paint_count
        } else {
            state.payload.paint_count
        }
    }

    fn last_paint_rect(&self) -> Option<Rect> {
        self.state.borrow().last_paint_rect
    }

    fn scroll_rects(&self) -> Vec<ScrollRect> {
        self.state.borrow().scroll_rects.clone()
    }

    fn sticky_position_constraints(&self) -> Vec<StickyPositionConstraint> {
        self.state.borrow().payload.sticky_position_constraints.clone()
    }

    fn draws_content(&self) -> bool {
        self.state.borrow().payload.draws_content
    }

    fn gpu_memory_usage(&self) -> f64 {
        if self.draws_content() {
            self.width() * self.height() * self.config.bytes_per_pixel
        } else {
            0.0
        }
    }

    fn request_compositing_reasons(&self) -> BoxedLocal<Vec<String>> {
        let Some(target) = self.target.clone() else {
            return Box::pin(async { Vec::new() });
        };
        let layer_id = self.id();
        Box::pin(async move {
            match target.layer_tree_agent().compositing_reasons(&layer_id).await {
                Ok(reasons) => reasons,
                Err(e) => {
                    tracing::warn!("LayerTree.compositingReasons({}) failed: {}", layer_id, e);
                    Vec::new()
                }
            }
        })
    }

    fn snapshots(&self) -> Vec<BoxedLocal<Option<SnapshotWithRect>>> {
        let rect = Rect::new(0.0, 0.0, self.width(), self.height());
        let Some(target) = self.target.clone() else {
            let unavailable: BoxedLocal<Option<SnapshotWithRect>> = Box::pin(async { None });
            return vec![unavailable];
        };
        let layer_id = self.id();
        let request: BoxedLocal<Option<SnapshotWithRect>> = Box::pin(async move {
            match target.layer_tree_agent().make_snapshot(&layer_id).await {
                Ok(snapshot_id) => Some(SnapshotWithRect {
                    rect,
                    snapshot: PaintProfilerSnapshot::new(target, snapshot_id),
                }),
                Err(e) => {
                    tracing::warn!("LayerTree.makeSnapshot({}) failed: {}", layer_id, e);
                    None
                }
            }
        });
        vec![request]
    }
}

impl fmt::Debug for AgentLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AgentLayer")
            .field("id", &state.payload.layer_id)
            .field("parent_id", &state.payload.parent_id())
            .field("children", &state.children.len())
            .field("paint_count", &state.paint_count)
            .field("quad", &state.quad)
            .finish()
    }
}

fn transform_values(payload: &LayerPayload) -> Option<[f64; 16]> {
    let values = payload.transform.as_deref()?;
    match <[f64; 16]>::try_from(values) {
        Ok(matrix) => Some(matrix),
        Err(_) => {
            tracing::warn!(
                "Ignoring transform of layer {} with {} elements",
                payload.layer_id,
                values.len()
            );
            None
        }
    }
}

fn anchor_of(payload: &LayerPayload) -> [f64; 3] {
    [
        payload.anchor_x.unwrap_or(0.0),
        payload.anchor_y.unwrap_or(0.0),
        payload.anchor_z.unwrap_or(0.0),
    ]
}
