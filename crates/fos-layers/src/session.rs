//! DevTools session
//!
//! Per-target registry. The layer tree model is created on first use and
//! only for targets that expose a DOM.

use std::cell::OnceCell;

use smol::future::BoxedLocal;

use crate::ProtocolError;
use crate::config::Config;
use crate::model::{LayerTreeDispatcher, LayerTreeModel};
use crate::target::Target;

/// Models attached to one inspected target
#[derive(Debug)]
pub struct Session {
    target: Target,
    config: Config,
    layer_tree_model: OnceCell<LayerTreeModel>,
}

impl Session {
    pub fn new(target: Target, config: Config) -> Self {
        Self {
            target,
            config,
            layer_tree_model: OnceCell::new(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The target's layer tree model; `None` for targets without DOM
    pub fn layer_tree_model(&self) -> Option<LayerTreeModel> {
        if !self.target.has_dom_capability() {
            return None;
        }
        let model = self.layer_tree_model.get_or_init(|| {
            tracing::debug!("Creating layer tree model for {}", self.target.name());
            LayerTreeModel::new(self.target.clone(), self.config)
        });
        Some(model.clone())
    }

    /// Forward a primary frame navigation to the models that exist
    pub fn main_frame_navigated(&self) {
        if let Some(model) = self.layer_tree_model.get() {
            model.main_frame_navigated();
        }
    }

    /// Route a raw protocol notification
    ///
    /// Notifications for a model that was never created are dropped.
    pub fn dispatch(&self, method: &str, params: serde_json::Value) -> Result<BoxedLocal<()>, ProtocolError> {
        match self.layer_tree_model.get() {
            Some(model) => LayerTreeDispatcher::new(model.clone()).dispatch(method, params),
            None => {
                tracing::trace!("Dropping {} without a layer tree model", method);
                Ok(Box::pin(async {}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::protocol::{BackendNodeId, LayerId, SnapshotId};
    use crate::target::{DomAgent, LayerTreeAgent, NodeRef};

    struct NullAgent;

    impl LayerTreeAgent for NullAgent {
        fn enable(&self) {}
        fn disable(&self) {}

        fn compositing_reasons(&self, _: &LayerId) -> BoxedLocal<Result<Vec<String>, ProtocolError>> {
            Box::pin(async { Err(ProtocolError::TargetDetached) })
        }

        fn make_snapshot(&self, _: &LayerId) -> BoxedLocal<Result<SnapshotId, ProtocolError>> {
            Box::pin(async { Err(ProtocolError::TargetDetached) })
        }

        fn release_snapshot(&self, _: &SnapshotId) {}
    }

    struct NullDom;

    impl DomAgent for NullDom {
        fn push_nodes_by_backend_ids(
            &self,
            _: Vec<BackendNodeId>,
        ) -> BoxedLocal<Result<HashMap<BackendNodeId, NodeRef>, ProtocolError>> {
            Box::pin(async { Ok(HashMap::new()) })
        }
    }

    #[test]
    fn test_no_model_without_dom() {
        let session = Session::new(Target::new("worker", Rc::new(NullAgent), None), Config::default());
        assert!(session.layer_tree_model().is_none());
        // dropped, not an error
        assert!(session.dispatch("LayerTree.layerTreeDidChange", serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_model_is_shared() {
        let target = Target::new("page", Rc::new(NullAgent), Some(Rc::new(NullDom)));
        let session = Session::new(target, Config::default());
        let first = session.layer_tree_model().unwrap();
        first.enable();
        let second = session.layer_tree_model().unwrap();
        assert!(second.is_enabled());
        assert!(second.target().same_target(session.target()));
    }
}
