//! fOS Layers
//!
//! Compositing layer tree model for the DevTools layers panel.
//!
//! Mirrors the layer tree of a remote page as reported by the LayerTree
//! protocol domain:
//! - Reconciles full layer lists against the previous tree, keeping live
//!   layer objects across updates
//! - Resolves backend node ids to DOM nodes in one batched round trip
//! - Computes per-layer screen-space quads from 3D transforms
//! - Buffers paint notifications that arrive before their layer exists
//!
//! # Example
//! ```rust,ignore
//! use fos_layers::{Config, Session, Target};
//!
//! let session = Session::new(Target::new("page", agent, Some(dom)), Config::default());
//! let model = session.layer_tree_model().unwrap();
//! model.add_listener(|event| println!("{:?}", event));
//! model.enable();
//! smol::block_on(session.dispatch("LayerTree.layerTreeDidChange", params)?);
//! ```

pub mod geometry;
pub mod protocol;
pub mod target;
pub mod snapshot;
pub mod layer;
pub mod tree;
pub mod model;
pub mod session;
mod config;

pub use config::Config;
pub use geometry::{Matrix4, Quad, Vector3, multiply_vector_by_matrix_and_normalize};
pub use protocol::{
    BackendNodeId, LayerId, LayerPayload, Rect, ScrollRect, ScrollRectType, SnapshotId,
    StickyPositionConstraint,
};
pub use target::{DomAgent, DomNode, LayerTreeAgent, NodeId, NodeRef, Target};
pub use snapshot::{PaintProfilerSnapshot, SnapshotWithRect};
pub use layer::{AgentLayer, Layer, LayerImage, LayerRef};
pub use tree::{AgentLayerTree, SetLayersOutcome};
pub use model::{LayerTreeDispatcher, LayerTreeEvent, LayerTreeModel, ListenerId};
pub use session::Session;

/// Malformed layer tree payload
///
/// Reported while rebuilding; the offending link is dropped and the rest of
/// the tree is still applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayerTreeError {
    #[error("Missing parent {parent} for layer {layer}")]
    MissingParent { layer: LayerId, parent: LayerId },
    
    #[error("Multiple root layers: {existing} and {layer}")]
    MultipleRoots { existing: LayerId, layer: LayerId },
    
    #[error("Layer {child} already has parent {parent}")]
    ChildAlreadyParented { child: LayerId, parent: LayerId },
    
    #[error("Linking layer {child} under {parent} would create a cycle")]
    Cycle { child: LayerId, parent: LayerId },
    
    #[error("Layer {layer} listed more than once")]
    DuplicateLayer { layer: LayerId },
}

/// Remote protocol error
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Target detached")]
    TargetDetached,
    
    #[error("Remote error: {0}")]
    Remote(String),
    
    #[error("Invalid params: {0}")]
    Json(#[from] serde_json::Error),
    
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}
