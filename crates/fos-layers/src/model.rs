//! Layer Tree Model
//!
//! Per-target orchestrator. Turns LayerTree domain notifications into tree
//! updates and events, and holds paints for layers the tree has not seen yet
//! until the next update lands.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use smol::future::BoxedLocal;

use crate::ProtocolError;
use crate::config::Config;
use crate::layer::LayerRef;
use crate::protocol::{LayerId, LayerPaintedParams, LayerPayload, LayerTreeDidChangeParams, Rect};
use crate::target::Target;
use crate::tree::{AgentLayerTree, SetLayersOutcome};

/// Events observers can subscribe to
#[derive(Debug, Clone)]
pub enum LayerTreeEvent {
    /// The tree was rebuilt
    LayerTreeChanged,

    /// A known layer was painted
    LayerPainted(LayerRef),
}

/// Handle returned by [`LayerTreeModel::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&LayerTreeEvent)>;

/// Layer tree model of one target
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LayerTreeModel {
    inner: Rc<ModelInner>,
}

struct ModelInner {
    target: Target,
    config: Config,
    enabled: Cell<bool>,
    layer_tree: RefCell<Option<Rc<AgentLayerTree>>>,
    last_paint_rect_by_layer_id: RefCell<HashMap<LayerId, Rect>>,
    listeners: RefCell<Vec<(ListenerId, Listener)>>,
    next_listener_id: Cell<u64>,
}

impl LayerTreeModel {
    pub fn new(target: Target, config: Config) -> Self {
        Self {
            inner: Rc::new(ModelInner {
                target,
                config,
                enabled: Cell::new(false),
                layer_tree: RefCell::new(None),
                last_paint_rect_by_layer_id: RefCell::new(HashMap::new()),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: Cell::new(0),
            }),
        }
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    /// Current tree; `None` before the first enable and right after a
    /// navigation
    pub fn layer_tree(&self) -> Option<Rc<AgentLayerTree>> {
        self.inner.layer_tree.borrow().clone()
    }

    /// Start tracking the target's layers. No-op when already enabled.
    pub fn enable(&self) {
        if self.is_enabled() {
            return;
        }
        self.inner.enabled.set(true);
        self.force_enable();
    }

    /// Stop tracking. No-op when already disabled.
    pub fn disable(&self) {
        if !self.is_enabled() {
            return;
        }
        self.inner.enabled.set(false);
        self.inner.target.layer_tree_agent().disable();
        tracing::info!("Layer tree disabled for {}", self.inner.target.name());
    }

    fn force_enable(&self) {
        self.inner.last_paint_rect_by_layer_id.borrow_mut().clear();
        {
            let mut layer_tree = self.inner.layer_tree.borrow_mut();
            if layer_tree.is_none() {
                *layer_tree = Some(Rc::new(AgentLayerTree::new(
                    Some(self.inner.target.clone()),
                    self.inner.config,
                )));
            }
        }
        self.inner.target.layer_tree_agent().enable();
        tracing::info!("Layer tree enabled for {}", self.inner.target.name());
    }

    /// Subscribe to model events
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LayerTreeEvent) + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.get());
        self.inner.next_listener_id.set(id.0 + 1);
        self.inner.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Handle `LayerTree.layerTreeDidChange`
    ///
    /// Ignored when disabled at call time. The returned future completes once
    /// node resolution and the rebuild are done; buffered paints are applied
    /// and `LayerTreeChanged` fires only if the model is still enabled then.
    pub fn layer_tree_changed(&self, layers: Option<Vec<LayerPayload>>) -> BoxedLocal<()> {
        if !self.is_enabled() {
            return Box::pin(async {});
        }
        let Some(layer_tree) = self.layer_tree() else {
            return Box::pin(async {});
        };

        let update = layer_tree.set_layers(layers);
        let model = self.clone();
        Box::pin(async move {
            let outcome = update.await;
            let SetLayersOutcome::Applied { diagnostics, .. } = outcome else {
                return;
            };
            if !diagnostics.is_empty() {
                tracing::warn!("Layer tree update had {} malformed links", diagnostics.len());
            }
            if !model.is_enabled() {
                return;
            }
            model.apply_buffered_paints(&layer_tree);
            model.dispatch(&LayerTreeEvent::LayerTreeChanged);
        })
    }

    fn apply_buffered_paints(&self, layer_tree: &AgentLayerTree) {
        let buffered = std::mem::take(&mut *self.inner.last_paint_rect_by_layer_id.borrow_mut());
        for (layer_id, rect) in buffered {
            if let Some(layer) = layer_tree.layer_by_id(layer_id.as_str()) {
                layer.set_last_paint_rect(rect);
            }
        }
    }

    /// Handle `LayerTree.layerPainted`
    ///
    /// Paints for unknown layers are held until the next tree update; only the
    /// latest rect per layer is kept.
    pub fn layer_painted(&self, layer_id: LayerId, clip: Rect) {
        if !self.is_enabled() {
            return;
        }
        let layer = self.layer_tree().and_then(|tree| tree.layer_by_id(layer_id.as_str()));
        match layer {
            Some(layer) => {
                layer.record_paint(clip);
                self.dispatch(&LayerTreeEvent::LayerPainted(layer));
            }
            None => {
                tracing::trace!("Buffering paint for unknown layer {}", layer_id);
                self.inner.last_paint_rect_by_layer_id.borrow_mut().insert(layer_id, clip);
            }
        }
    }

    /// The primary frame navigated: drop the tree and start over
    pub fn main_frame_navigated(&self) {
        if let Some(layer_tree) = self.inner.layer_tree.borrow_mut().take() {
            layer_tree.detach();
        }
        if self.is_enabled() {
            self.force_enable();
        }
    }

    /// Paints waiting for their layer to appear
    pub fn pending_paint_count(&self) -> usize {
        self.inner.last_paint_rect_by_layer_id.borrow().len()
    }

    fn dispatch(&self, event: &LayerTreeEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for LayerTreeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerTreeModel")
            .field("target", &self.inner.target)
            .field("enabled", &self.inner.enabled.get())
            .field("pending_paints", &self.pending_paint_count())
            .finish()
    }
}

/// Routes LayerTree domain notifications to a model
#[derive(Debug, Clone)]
pub struct LayerTreeDispatcher {
    model: LayerTreeModel,
}

impl LayerTreeDispatcher {
    pub fn new(model: LayerTreeModel) -> Self {
        Self { model }
    }

    pub fn layer_tree_did_change(&self, params: LayerTreeDidChangeParams) -> BoxedLocal<()> {
        self.model.layer_tree_changed(params.layers)
    }

    pub fn layer_painted(&self, params: LayerPaintedParams) {
        self.model.layer_painted(params.layer_id, params.clip);
    }

    /// Decode and route a raw notification
    pub fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<BoxedLocal<()>, ProtocolError> {
        match method {
            "LayerTree.layerTreeDidChange" => {
                let params: LayerTreeDidChangeParams = serde_json::from_value(params)?;
                Ok(self.layer_tree_did_change(params))
            }
            "LayerTree.layerPainted" => {
                let params: LayerPaintedParams = serde_json::from_value(params)?;
                self.layer_painted(params);
                Ok(Box::pin(async {}))
            }
            _ => Err(ProtocolError::UnknownMethod(method.to_string())),
        }
    }
}
