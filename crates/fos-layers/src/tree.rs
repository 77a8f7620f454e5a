//! Layer Tree
//!
//! Container for all layers of one target. Updates arrive as complete layer
//! lists; [`AgentLayerTree::set_layers`] resolves the DOM nodes they mention
//! and then rebuilds the links in one synchronous pass.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::LayerTreeError;
use crate::config::Config;
use crate::geometry::Matrix4;
use crate::layer::{AgentLayer, Layer, LayerRef};
use crate::protocol::{BackendNodeId, LayerId, LayerPayload};
use crate::target::{NodeRef, Target};

/// Result of [`AgentLayerTree::set_layers`]
#[derive(Debug, Clone, PartialEq)]
pub enum SetLayersOutcome {
    /// The tree now reflects the payload
    Applied {
        layer_count: usize,
        /// Malformed links that were dropped
        diagnostics: Vec<LayerTreeError>,
    },
    /// The tree was detached while node ids were being resolved
    Discarded,
}

/// Layer tree of one target
pub struct AgentLayerTree {
    target: Option<Target>,
    config: Config,
    state: RefCell<TreeState>,
    detached: Cell<bool>,
    /// Last generation handed to a `set_layers` call
    generation: Cell<u64>,
    /// Generation of the update the tree currently reflects
    applied_generation: Cell<u64>,
}

#[derive(Default)]
struct TreeState {
    layers_by_id: HashMap<LayerId, LayerRef>,
    root: Option<LayerRef>,
    content_root: Option<LayerRef>,
    backend_node_id_to_node: HashMap<BackendNodeId, NodeRef>,
    viewport_size: Option<(f64, f64)>,
}

impl AgentLayerTree {
    pub fn new(target: Option<Target>, config: Config) -> Self {
        Self {
            target,
            config,
            state: RefCell::new(TreeState::default()),
            detached: Cell::new(false),
            generation: Cell::new(0),
            applied_generation: Cell::new(0),
        }
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn root(&self) -> Option<LayerRef> {
        self.state.borrow().root.clone()
    }

    pub(crate) fn set_root(&self, root: Option<LayerRef>) {
        self.state.borrow_mut().root = root;
    }

    /// First layer, in payload order, that draws content
    pub fn content_root(&self) -> Option<LayerRef> {
        self.state.borrow().content_root.clone()
    }

    pub(crate) fn set_content_root(&self, content_root: Option<LayerRef>) {
        self.state.borrow_mut().content_root = content_root;
    }

    pub fn layer_by_id(&self, id: &str) -> Option<LayerRef> {
        self.state.borrow().layers_by_id.get(id).cloned()
    }

    pub fn layer_count(&self) -> usize {
        self.state.borrow().layers_by_id.len()
    }

    /// Walk the tree in pre-order starting at `root` (the tree root when
    /// `None`). Stops as soon as `callback` returns `true`; the return value
    /// tells whether the walk was stopped.
    pub fn for_each_layer<F>(&self, mut callback: F, root: Option<LayerRef>) -> bool
    where
        F: FnMut(&LayerRef) -> bool,
    {
        let Some(root) = root.or_else(|| self.root()) else {
            return false;
        };
        let mut stack = vec![root];
        while let Some(layer) = stack.pop() {
            if callback(&layer) {
                return true;
            }
            stack.extend(layer.children().into_iter().rev());
        }
        false
    }

    /// Backend node ids resolved so far
    pub fn backend_node_id_to_node(&self) -> HashMap<BackendNodeId, NodeRef> {
        self.state.borrow().backend_node_id_to_node.clone()
    }

    /// Resolve `ids` through the target's DOM agent in a single request
    ///
    /// Failures are logged; unresolved ids simply stay without a node.
    pub async fn resolve_backend_node_ids(&self, ids: HashSet<BackendNodeId>) {
        if ids.is_empty() || !self.config.resolve_nodes {
            return;
        }
        let Some(dom_agent) = self.target.as_ref().and_then(|t| t.dom_agent()).cloned() else {
            return;
        };

        let mut ids: Vec<_> = ids.into_iter().collect();
        ids.sort();
        let requested = ids.len();
        match dom_agent.push_nodes_by_backend_ids(ids).await {
            Ok(nodes) => {
                tracing::debug!("Resolved {} of {} backend nodes", nodes.len(), requested);
                self.state.borrow_mut().backend_node_id_to_node.extend(nodes);
            }
            Err(e) => {
                tracing::warn!("DOM.pushNodesByBackendIdsToFrontend failed: {}", e);
            }
        }
    }

    pub fn set_viewport_size(&self, width: f64, height: f64) {
        self.state.borrow_mut().viewport_size = Some((width, height));
    }

    pub fn viewport_size(&self) -> Option<(f64, f64)> {
        self.state.borrow().viewport_size
    }

    /// Mark the tree as abandoned; pending updates will not be applied
    pub fn detach(&self) {
        self.detached.set(true);
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    /// Replace the tree with `payload`
    ///
    /// `None` means the page has no composited layers. Unknown backend node
    /// ids are resolved first, then the links are rebuilt. An update that
    /// finishes resolving after a newer one was applied is discarded.
    ///
    /// The update is ordered by this call, not by when the returned future is
    /// first polled.
    pub fn set_layers(
        self: &Rc<Self>,
        payload: Option<Vec<LayerPayload>>,
    ) -> impl Future<Output = SetLayersOutcome> + use<> {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let tree = self.clone();

        async move {
            if let Some(layers) = &payload {
                let ids_to_resolve = {
                    let state = tree.state.borrow();
                    layers
                        .iter()
                        .filter_map(LayerPayload::backend_node)
                        .filter(|id| !state.backend_node_id_to_node.contains_key(id))
                        .collect::<HashSet<_>>()
                };
                tree.resolve_backend_node_ids(ids_to_resolve).await;
            }

            if tree.is_detached() {
                tracing::debug!("Dropping layer update for detached tree");
                return SetLayersOutcome::Discarded;
            }
            if tree.applied_generation.get() > generation {
                tracing::debug!(
                    "Dropping stale layer update {} (tree is at {})",
                    generation,
                    tree.applied_generation.get()
                );
                return SetLayersOutcome::Discarded;
            }

            let diagnostics = tree.inner_set_layers(payload);
            tree.applied_generation.set(generation);
            SetLayersOutcome::Applied {
                layer_count: tree.layer_count(),
                diagnostics,
            }
        }
    }

    fn inner_set_layers(&self, payload: Option<Vec<LayerPayload>>) -> Vec<LayerTreeError> {
        let mut diagnostics = Vec::new();
        self.set_root(None);
        self.set_content_root(None);
        let mut state = self.state.borrow_mut();
        let old_layers_by_id = std::mem::take(&mut state.layers_by_id);

        let Some(layers) = payload else {
            return diagnostics;
        };

        let mut layers_by_id: HashMap<LayerId, LayerRef> = HashMap::with_capacity(layers.len());
        let mut root: Option<LayerRef> = None;
        let mut content_root: Option<LayerRef> = None;

        for payload in layers {
            let layer_id = payload.layer_id.clone();
            let parent_id = payload.parent_id().cloned();
            let backend_node_id = payload.backend_node();

            let layer = if let Some(layer) = layers_by_id.get(&layer_id) {
                // a placed duplicate may not be linked again
                let is_root = root.as_ref().is_some_and(|root| Rc::ptr_eq(root, layer));
                if is_root || layer.parent().is_some() {
                    let e = LayerTreeError::DuplicateLayer { layer: layer_id };
                    tracing::error!("Malformed layer tree: {}", e);
                    diagnostics.push(e);
                    continue;
                }
                tracing::warn!("Duplicate layer {} in payload", layer_id);
                layer.clone()
            } else if let Some(layer) = old_layers_by_id.get(&layer_id) {
                layer.reset(payload);
                layer.clone()
            } else {
                Rc::new(AgentLayer::new(self.target.clone(), payload, self.config))
            };

            if let Some(backend_node_id) = backend_node_id {
                layer.set_node(state.backend_node_id_to_node.get(&backend_node_id).cloned());
            }
            if content_root.is_none() && layer.draws_content() {
                content_root = Some(layer.clone());
            }

            let link = match parent_id {
                Some(parent_id) => match layers_by_id.get(&parent_id) {
                    Some(parent) => parent.add_child(&layer),
                    None => Err(LayerTreeError::MissingParent {
                        layer: layer_id.clone(),
                        parent: parent_id,
                    }),
                },
                None => match root.clone() {
                    Some(existing) if !Rc::ptr_eq(&existing, &layer) => Err(LayerTreeError::MultipleRoots {
                        existing: existing.id(),
                        layer: layer_id.clone(),
                    }),
                    Some(_) => Ok(()),
                    None => {
                        root = Some(layer.clone());
                        Ok(())
                    }
                },
            };
            if let Err(e) = link {
                tracing::error!("Malformed layer tree: {}", e);
                diagnostics.push(e);
            }

            layers_by_id.insert(layer_id, layer);
        }

        state.layers_by_id = layers_by_id;
        let layer_count = state.layers_by_id.len();
        drop(state);
        self.set_root(root.clone());
        self.set_content_root(content_root);

        if let Some(root) = root {
            root.compute_quad(&Matrix4::identity());
        }
        tracing::debug!("Layer tree rebuilt: {} layers, {} problems", layer_count, diagnostics.len());
        diagnostics
    }
}

impl fmt::Debug for AgentLayerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("AgentLayerTree")
            .field("layers", &state.layers_by_id.len())
            .field("root", &state.root.as_ref().map(|l| l.id()))
            .field("content_root", &state.content_root.as_ref().map(|l| l.id()))
            .field("detached", &self.detached.get())
            .finish()
    }
}
