//! Integration tests for fos-layers
//!
//! Drives the model through fake protocol agents, including updates that
//! race with paints and navigations.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use fos_layers::*;
use smol::LocalExecutor;
use smol::channel::{self, Receiver, Sender};
use smol::future::BoxedLocal;

// ============================================================================
// FAKE AGENTS
// ============================================================================

#[derive(Default)]
struct FakeLayerTreeAgent {
    enabled: Cell<bool>,
    reasons: RefCell<HashMap<String, Vec<String>>>,
    next_snapshot: Cell<u32>,
    released: RefCell<Vec<SnapshotId>>,
}

impl LayerTreeAgent for FakeLayerTreeAgent {
    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn compositing_reasons(&self, layer_id: &LayerId) -> BoxedLocal<Result<Vec<String>, ProtocolError>> {
        let result = self
            .reasons
            .borrow()
            .get(layer_id.as_str())
            .cloned()
            .ok_or_else(|| ProtocolError::Remote(format!("No layer {}", layer_id)));
        Box::pin(async move { result })
    }

    fn make_snapshot(&self, layer_id: &LayerId) -> BoxedLocal<Result<SnapshotId, ProtocolError>> {
        let n = self.next_snapshot.get() + 1;
        self.next_snapshot.set(n);
        let id = SnapshotId(format!("{}-snap-{}", layer_id, n));
        Box::pin(async move { Ok(id) })
    }

    fn release_snapshot(&self, snapshot_id: &SnapshotId) {
        self.released.borrow_mut().push(snapshot_id.clone());
    }
}

/// DOM agent that knows every backend id and can hold its reply until the
/// test opens the gate
#[derive(Default)]
struct FakeDomAgent {
    gate: Option<Receiver<()>>,
    requests: RefCell<Vec<Vec<BackendNodeId>>>,
}

impl FakeDomAgent {
    fn gated() -> (Self, Sender<()>) {
        let (tx, rx) = channel::unbounded();
        let agent = Self {
            gate: Some(rx),
            requests: RefCell::new(Vec::new()),
        };
        (agent, tx)
    }
}

impl DomAgent for FakeDomAgent {
    fn push_nodes_by_backend_ids(
        &self,
        ids: Vec<BackendNodeId>,
    ) -> BoxedLocal<Result<HashMap<BackendNodeId, NodeRef>, ProtocolError>> {
        self.requests.borrow_mut().push(ids.clone());
        let gate = self.gate.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                let _ = gate.recv().await;
            }
            Ok(ids
                .into_iter()
                .map(|id| (id, Rc::new(DomNode::new(id.0 + 1000, id, "DIV"))))
                .collect())
        })
    }
}

struct Fixture {
    model: LayerTreeModel,
    agent: Rc<FakeLayerTreeAgent>,
    dom: Rc<FakeDomAgent>,
    events: Rc<RefCell<Vec<String>>>,
}

fn fixture_with(dom: FakeDomAgent) -> Fixture {
    let agent = Rc::new(FakeLayerTreeAgent::default());
    let dom = Rc::new(dom);
    let target = Target::new("page", agent.clone(), Some(dom.clone()));
    let model = LayerTreeModel::new(target, Config::default());

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    model.add_listener(move |event| {
        let name = match event {
            LayerTreeEvent::LayerTreeChanged => "changed".to_string(),
            LayerTreeEvent::LayerPainted(layer) => format!("painted {}", layer.id()),
        };
        sink.borrow_mut().push(name);
    });

    Fixture { model, agent, dom, events }
}

fn fixture() -> Fixture {
    fixture_with(FakeDomAgent::default())
}

fn page_layers() -> Vec<LayerPayload> {
    vec![
        LayerPayload::new("1").with_bounds(0.0, 0.0, 800.0, 600.0),
        LayerPayload::new("2").with_parent("1").with_bounds(10.0, 20.0, 100.0, 50.0).drawing_content(),
        LayerPayload::new("3").with_parent("1").with_backend_node(42),
        LayerPayload::new("4").with_parent("3").with_bounds(5.0, 5.0, 10.0, 10.0),
    ]
}

fn update(model: &LayerTreeModel, layers: Vec<LayerPayload>) {
    smol::block_on(model.layer_tree_changed(Some(layers)));
}

// ============================================================================
// TREE STRUCTURE TESTS
// ============================================================================

#[test]
fn test_single_root_and_consistent_parents() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());

    let tree = f.model.layer_tree().unwrap();
    let mut roots = 0;
    tree.for_each_layer(|layer| {
        if layer.parent().is_none() {
            roots += 1;
        }
        for child in layer.children() {
            assert!(Rc::ptr_eq(&child.parent().unwrap(), layer));
            assert_eq!(child.parent_id(), Some(layer.id()));
        }
        false
    }, None);
    assert_eq!(roots, 1);
    assert_eq!(*f.events.borrow(), vec!["changed"]);
}

#[test]
fn test_identity_preserved_across_updates() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let tree = f.model.layer_tree().unwrap();
    let held = tree.layer_by_id("4").unwrap();

    let mut layers = page_layers();
    layers[3] = LayerPayload::new("4").with_parent("2").with_bounds(1.0, 1.0, 2.0, 2.0);
    update(&f.model, layers);

    let same = tree.layer_by_id("4").unwrap();
    assert!(Rc::ptr_eq(&held, &same));
    assert_eq!(held.parent().unwrap().id().as_str(), "2");
    assert_eq!(held.quad().unwrap().point(0), (11.0, 21.0));
}

#[test]
fn test_absent_ids_unreachable() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    update(&f.model, page_layers()[..2].to_vec());

    let tree = f.model.layer_tree().unwrap();
    assert!(tree.layer_by_id("3").is_none());
    assert!(tree.layer_by_id("4").is_none());
    let found = tree.for_each_layer(|layer| layer.id().as_str() == "3", None);
    assert!(!found);
}

#[test]
fn test_axis_aligned_quads() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let tree = f.model.layer_tree().unwrap();

    let quad = tree.layer_by_id("2").unwrap().quad().unwrap();
    assert_eq!(quad.points, [10.0, 20.0, 110.0, 20.0, 110.0, 70.0, 10.0, 70.0]);

    let nested = tree.layer_by_id("4").unwrap().quad().unwrap();
    assert_eq!(nested.bounds(), (5.0, 5.0, 15.0, 15.0));
}

#[test]
fn test_translated_parent_moves_children() {
    let f = fixture();
    f.model.enable();
    let shift = Matrix4::translate(100.0, 0.0, 0.0).to_column_major();
    update(&f.model, vec![
        LayerPayload::new("1").with_bounds(0.0, 0.0, 800.0, 600.0).with_transform(shift),
        LayerPayload::new("2").with_parent("1").with_bounds(10.0, 10.0, 20.0, 20.0),
    ]);
    let quad = f.model.layer_tree().unwrap().layer_by_id("2").unwrap().quad().unwrap();
    assert_eq!(quad.bounds(), (110.0, 10.0, 130.0, 30.0));
}

#[test]
fn test_content_root_is_first_drawing_layer() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let tree = f.model.layer_tree().unwrap();
    assert_eq!(tree.content_root().unwrap().id().as_str(), "2");
    assert_eq!(tree.root().unwrap().id().as_str(), "1");
}

#[test]
fn test_malformed_payload_is_best_effort() {
    let f = fixture();
    f.model.enable();
    update(&f.model, vec![
        LayerPayload::new("1"),
        LayerPayload::new("2").with_parent("missing"),
        LayerPayload::new("3"),
        LayerPayload::new("4").with_parent("1"),
    ]);
    let tree = f.model.layer_tree().unwrap();
    assert_eq!(tree.root().unwrap().id().as_str(), "1");
    assert_eq!(tree.layer_count(), 4);
    assert_eq!(tree.root().unwrap().children().len(), 1);
    // still announced
    assert_eq!(*f.events.borrow(), vec!["changed"]);
}

// ============================================================================
// NODE RESOLUTION TESTS
// ============================================================================

#[test]
fn test_backend_nodes_resolved_once() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    update(&f.model, page_layers());

    assert_eq!(*f.dom.requests.borrow(), vec![vec![BackendNodeId(42)]]);
    let tree = f.model.layer_tree().unwrap();
    let node = tree.layer_by_id("3").unwrap().node().unwrap();
    assert_eq!(node.node_id, NodeId(1042));
    assert_eq!(node.node_name, "DIV");
    assert!(tree.backend_node_id_to_node().contains_key(&BackendNodeId(42)));
}

#[test]
fn test_node_for_self_or_ancestor() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let tree = f.model.layer_tree().unwrap();

    let inherited = tree.layer_by_id("4").unwrap().node_for_self_or_ancestor().unwrap();
    assert_eq!(inherited.backend_node_id, BackendNodeId(42));
    assert!(tree.layer_by_id("2").unwrap().node_for_self_or_ancestor().is_none());
}

#[test]
fn test_zero_backend_id_not_requested() {
    let f = fixture();
    f.model.enable();
    update(&f.model, vec![LayerPayload::new("1").with_backend_node(0)]);
    assert!(f.dom.requests.borrow().is_empty());
}

// ============================================================================
// PAINT TESTS
// ============================================================================

#[test]
fn test_paint_known_layer() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let rect = Rect::new(1.0, 2.0, 3.0, 4.0);
    f.model.layer_painted(LayerId::from("2"), rect);

    let layer = f.model.layer_tree().unwrap().layer_by_id("2").unwrap();
    assert_eq!(layer.paint_count(), 1);
    assert_eq!(layer.last_paint_rect(), Some(rect));
    assert_eq!(*f.events.borrow(), vec!["changed", "painted 2"]);
}

#[test]
fn test_paint_before_layer_exists() {
    let f = fixture();
    f.model.enable();
    let rect = Rect::new(0.0, 0.0, 64.0, 64.0);
    f.model.layer_painted(LayerId::from("5"), rect);
    assert!(f.events.borrow().is_empty());
    assert_eq!(f.model.pending_paint_count(), 1);

    update(&f.model, vec![LayerPayload::new("1"), LayerPayload::new("5").with_parent("1")]);
    let layer = f.model.layer_tree().unwrap().layer_by_id("5").unwrap();
    assert_eq!(layer.last_paint_rect(), Some(rect));
    assert_eq!(*f.events.borrow(), vec!["changed"]);
}

#[test]
fn test_paint_during_pending_resolution() {
    let (dom, gate) = FakeDomAgent::gated();
    let f = fixture_with(dom);
    f.model.enable();

    let ex = LocalExecutor::new();
    let task = ex.spawn(f.model.layer_tree_changed(Some(vec![
        LayerPayload::new("1"),
        LayerPayload::new("5").with_parent("1").with_backend_node(7),
    ])));
    while ex.try_tick() {}
    assert!(f.model.layer_tree().unwrap().layer_by_id("5").is_none());

    let rect = Rect::new(2.0, 2.0, 8.0, 8.0);
    f.model.layer_painted(LayerId::from("5"), rect);
    assert_eq!(f.model.pending_paint_count(), 1);

    gate.try_send(()).unwrap();
    smol::block_on(ex.run(task));

    let layer = f.model.layer_tree().unwrap().layer_by_id("5").unwrap();
    assert_eq!(layer.last_paint_rect(), Some(rect));
    assert_eq!(f.model.pending_paint_count(), 0);
    assert_eq!(*f.events.borrow(), vec!["changed"]);
}

#[test]
fn test_older_update_finishing_late_is_dropped() {
    let (dom, gate) = FakeDomAgent::gated();
    let f = fixture_with(dom);
    f.model.enable();

    let ex = LocalExecutor::new();
    let older = ex.spawn(f.model.layer_tree_changed(Some(vec![LayerPayload::new("old").with_backend_node(5)])));
    while ex.try_tick() {}

    // no node ids to resolve, so this one applies right away
    update(&f.model, vec![LayerPayload::new("new")]);
    gate.try_send(()).unwrap();
    smol::block_on(ex.run(older));

    let tree = f.model.layer_tree().unwrap();
    assert_eq!(tree.root().unwrap().id().as_str(), "new");
    assert!(tree.layer_by_id("old").is_none());
    assert_eq!(*f.events.borrow(), vec!["changed"]);
}

#[test]
fn test_malformed_cycle_does_not_hang() {
    let f = fixture();
    f.model.enable();
    update(&f.model, vec![
        LayerPayload::new("1"),
        LayerPayload::new("2").with_parent("1"),
        LayerPayload::new("1").with_parent("2"),
    ]);
    let tree = f.model.layer_tree().unwrap();
    let node = tree.layer_by_id("2").unwrap().node_for_self_or_ancestor();
    assert!(node.is_none());
    assert!(tree.root().unwrap().parent().is_none());
    assert_eq!(*f.events.borrow(), vec!["changed"]);
}

// ============================================================================
// ENABLE / DISABLE TESTS
// ============================================================================

#[test]
fn test_disabled_model_ignores_notifications() {
    let f = fixture();
    assert!(!f.model.is_enabled());
    update(&f.model, page_layers());
    f.model.layer_painted(LayerId::from("1"), Rect::default());
    assert!(f.model.layer_tree().is_none());
    assert!(f.events.borrow().is_empty());
    assert_eq!(f.model.pending_paint_count(), 0);

    f.model.enable();
    assert!(f.agent.enabled.get());
    update(&f.model, page_layers());
    assert_eq!(f.model.layer_tree().unwrap().layer_count(), 4);

    f.model.disable();
    assert!(!f.agent.enabled.get());
    update(&f.model, vec![LayerPayload::new("9")]);
    f.model.layer_painted(LayerId::from("2"), Rect::default());
    assert_eq!(f.model.layer_tree().unwrap().layer_count(), 4);
    assert_eq!(*f.events.borrow(), vec!["changed"]);

    f.model.enable();
    update(&f.model, vec![LayerPayload::new("9")]);
    assert!(f.model.layer_tree().unwrap().layer_by_id("9").is_some());
}

#[test]
fn test_disable_while_resolving() {
    let (dom, gate) = FakeDomAgent::gated();
    let f = fixture_with(dom);
    f.model.enable();
    f.model.layer_painted(LayerId::from("5"), Rect::new(0.0, 0.0, 1.0, 1.0));

    let ex = LocalExecutor::new();
    let task = ex.spawn(f.model.layer_tree_changed(Some(vec![LayerPayload::new("5").with_backend_node(3)])));
    while ex.try_tick() {}
    f.model.disable();
    gate.try_send(()).unwrap();
    smol::block_on(ex.run(task));

    // tree is updated but nothing is announced
    let layer = f.model.layer_tree().unwrap().layer_by_id("5").unwrap();
    assert!(layer.last_paint_rect().is_none());
    assert!(f.events.borrow().is_empty());
}

// ============================================================================
// NAVIGATION TESTS
// ============================================================================

#[test]
fn test_navigation_clears_layers() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let old_tree = f.model.layer_tree().unwrap();

    f.model.main_frame_navigated();
    let tree = f.model.layer_tree().unwrap();
    assert!(!Rc::ptr_eq(&old_tree, &tree));
    assert!(old_tree.is_detached());
    assert!(tree.layer_by_id("1").is_none());
    assert!(tree.root().is_none());
}

#[test]
fn test_navigation_while_disabled() {
    let f = fixture();
    f.model.enable();
    f.model.disable();
    f.model.main_frame_navigated();
    assert!(f.model.layer_tree().is_none());

    f.model.enable();
    assert!(f.model.layer_tree().is_some());
}

#[test]
fn test_navigation_discards_pending_update() {
    let (dom, gate) = FakeDomAgent::gated();
    let f = fixture_with(dom);
    f.model.enable();

    let ex = LocalExecutor::new();
    let task = ex.spawn(f.model.layer_tree_changed(Some(vec![LayerPayload::new("1").with_backend_node(5)])));
    while ex.try_tick() {}

    f.model.main_frame_navigated();
    gate.try_send(()).unwrap();
    smol::block_on(ex.run(task));

    assert!(f.model.layer_tree().unwrap().layer_by_id("1").is_none());
    assert!(f.events.borrow().is_empty());
}

// ============================================================================
// REMOTE REQUEST TESTS
// ============================================================================

#[test]
fn test_compositing_reasons() {
    let f = fixture();
    f.agent
        .reasons
        .borrow_mut()
        .insert("2".to_string(), vec!["Has a 3D transform".to_string()]);
    f.model.enable();
    update(&f.model, page_layers());
    let tree = f.model.layer_tree().unwrap();

    let reasons = smol::block_on(tree.layer_by_id("2").unwrap().request_compositing_reasons());
    assert_eq!(reasons, vec!["Has a 3D transform"]);

    // remote failure degrades to no reasons
    let reasons = smol::block_on(tree.layer_by_id("3").unwrap().request_compositing_reasons());
    assert!(reasons.is_empty());
}

#[test]
fn test_snapshot_covers_layer() {
    let f = fixture();
    f.model.enable();
    update(&f.model, page_layers());
    let layer = f.model.layer_tree().unwrap().layer_by_id("2").unwrap();

    let requests = layer.snapshots();
    assert_eq!(requests.len(), 1);
    let snapshot = smol::block_on(requests.into_iter().next().unwrap()).unwrap();
    assert_eq!(snapshot.rect, Rect::new(0.0, 0.0, 100.0, 50.0));
    assert_eq!(snapshot.snapshot.id(), &SnapshotId("2-snap-1".to_string()));

    snapshot.snapshot.release();
    assert_eq!(*f.agent.released.borrow(), vec![SnapshotId("2-snap-1".to_string())]);
}

// ============================================================================
// DISPATCH TESTS
// ============================================================================

#[test]
fn test_session_dispatch_json() {
    let agent = Rc::new(FakeLayerTreeAgent::default());
    let target = Target::new("page", agent, Some(Rc::new(FakeDomAgent::default())));
    let session = Session::new(target, Config::default());
    let model = session.layer_tree_model().unwrap();
    model.enable();

    let painted = serde_json::json!({
        "layerId": "2",
        "clip": {"x": 0, "y": 0, "width": 5, "height": 5}
    });
    smol::block_on(session.dispatch("LayerTree.layerPainted", painted).unwrap());
    assert_eq!(model.pending_paint_count(), 1);

    let changed = serde_json::json!({
        "layers": [
            {"layerId": "1", "offsetX": 0, "offsetY": 0, "width": 100, "height": 100},
            {"layerId": "2", "parentLayerId": "1", "offsetX": 0, "offsetY": 0,
             "width": 10, "height": 10, "drawsContent": true, "paintCount": 2}
        ]
    });
    smol::block_on(session.dispatch("LayerTree.layerTreeDidChange", changed).unwrap());

    let layer = model.layer_tree().unwrap().layer_by_id("2").unwrap();
    assert_eq!(layer.last_paint_rect(), Some(Rect::new(0.0, 0.0, 5.0, 5.0)));
    assert_eq!(layer.paint_count(), 2);
    assert_eq!(layer.gpu_memory_usage(), 400.0);
}

#[test]
fn test_session_navigation() {
    let target = Target::new(
        "page",
        Rc::new(FakeLayerTreeAgent::default()),
        Some(Rc::new(FakeDomAgent::default())),
    );
    let session = Session::new(target, Config::default());
    // no model yet, nothing to do
    session.main_frame_navigated();

    let model = session.layer_tree_model().unwrap();
    model.enable();
    update(&model, page_layers());
    session.main_frame_navigated();
    assert_eq!(model.layer_tree().unwrap().layer_count(), 0);
}

#[test]
fn test_worker_target_has_no_model() {
    let target = Target::new("worker", Rc::new(FakeLayerTreeAgent::default()), None);
    let session = Session::new(target, Config::default());
    assert!(session.layer_tree_model().is_none());
}
