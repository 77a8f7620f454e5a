//! Remote target
//!
//! The inspected target and the protocol agents the layer tree talks to.
//! Transports implement [`LayerTreeAgent`] and [`DomAgent`]; the model only
//! sees these traits.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use smol::future::BoxedLocal;

use crate::ProtocolError;
use crate::protocol::{BackendNodeId, LayerId, SnapshotId};

/// Frontend DOM node id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub i64);

/// DOM node handle resolved from a backend node id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomNode {
    pub node_id: NodeId,
    pub backend_node_id: BackendNodeId,
    pub node_name: String,
}

impl DomNode {
    pub fn new(node_id: i64, backend_node_id: BackendNodeId, node_name: &str) -> Self {
        Self {
            node_id: NodeId(node_id),
            backend_node_id,
            node_name: node_name.to_string(),
        }
    }
}

/// Shared DOM node handle; layers hold these without owning the DOM
pub type NodeRef = Rc<DomNode>;

/// Outbound requests of the LayerTree domain
pub trait LayerTreeAgent {
    /// Start reporting layer tree changes and paints
    fn enable(&self);

    /// Stop reporting
    fn disable(&self);

    /// Human-readable reasons the layer was composited
    fn compositing_reasons(&self, layer_id: &LayerId) -> BoxedLocal<Result<Vec<String>, ProtocolError>>;

    /// Record a paint snapshot of the layer
    fn make_snapshot(&self, layer_id: &LayerId) -> BoxedLocal<Result<SnapshotId, ProtocolError>>;

    /// Free a snapshot previously returned by `make_snapshot`
    fn release_snapshot(&self, snapshot_id: &SnapshotId);
}

/// Backend node id resolution service
pub trait DomAgent {
    /// Resolve a batch of backend node ids; ids the backend cannot map are
    /// left out of the result
    fn push_nodes_by_backend_ids(
        &self,
        ids: Vec<BackendNodeId>,
    ) -> BoxedLocal<Result<HashMap<BackendNodeId, NodeRef>, ProtocolError>>;
}

/// Inspected target
///
/// Cheap to clone; all clones share the same agents.
#[derive(Clone)]
pub struct Target {
    inner: Rc<TargetInner>,
}

struct TargetInner {
    name: String,
    layer_tree_agent: Rc<dyn LayerTreeAgent>,
    dom_agent: Option<Rc<dyn DomAgent>>,
}

impl Target {
    /// Create a target; `dom_agent` is `None` for targets without DOM
    /// (workers, service workers)
    pub fn new(
        name: &str,
        layer_tree_agent: Rc<dyn LayerTreeAgent>,
        dom_agent: Option<Rc<dyn DomAgent>>,
    ) -> Self {
        Self {
            inner: Rc::new(TargetInner {
                name: name.to_string(),
                layer_tree_agent,
                dom_agent,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn has_dom_capability(&self) -> bool {
        self.inner.dom_agent.is_some()
    }

    pub fn layer_tree_agent(&self) -> &Rc<dyn LayerTreeAgent> {
        &self.inner.layer_tree_agent
    }

    pub fn dom_agent(&self) -> Option<&Rc<dyn DomAgent>> {
        self.inner.dom_agent.as_ref()
    }

    /// Whether two handles refer to the same target
    pub fn same_target(&self, other: &Target) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.inner.name)
            .field("has_dom", &self.has_dom_capability())
            .finish()
    }
}
