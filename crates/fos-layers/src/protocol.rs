//! LayerTree protocol types
//!
//! Wire shapes of the remote LayerTree domain, decoded with serde using the
//! protocol's camelCase field names.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Opaque compositor layer identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for LayerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for LayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier the rendering engine uses for a DOM node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendNodeId(pub i64);

impl fmt::Display for BackendNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a remote paint snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

/// DOM rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Why a scroll rect blocks fast scrolling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrollRectType {
    RepaintsOnScroll,
    TouchEventHandler,
    WheelEventHandler,
}

/// Rectangle where scrolling is slow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollRect {
    pub rect: Rect,
    #[serde(rename = "type")]
    pub kind: ScrollRectType,
}

/// Sticky position constraints of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyPositionConstraint {
    pub sticky_box_rect: Rect,
    pub containing_block_rect: Rect,
    #[serde(default)]
    pub nearest_layer_shifting_sticky_box: Option<LayerId>,
    #[serde(default)]
    pub nearest_layer_shifting_containing_block: Option<LayerId>,
}

/// One compositor layer as reported by `LayerTree.layerTreeDidChange`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerPayload {
    pub layer_id: LayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_layer_id: Option<LayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<BackendNodeId>,
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_z: Option<f64>,
    #[serde(default)]
    pub paint_count: u32,
    #[serde(default)]
    pub draws_content: bool,
    #[serde(default)]
    pub invisible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_rects: Option<Vec<ScrollRect>>,
    #[serde(
        default,
        rename = "stickyPositionConstraint",
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sticky_position_constraints: Vec<StickyPositionConstraint>,
}

impl LayerPayload {
    /// Minimal payload; geometry and flags default to zero/false
    pub fn new(layer_id: impl Into<LayerId>) -> Self {
        Self {
            layer_id: layer_id.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: impl Into<LayerId>) -> Self {
        self.parent_layer_id = Some(parent.into());
        self
    }

    pub fn with_bounds(mut self, offset_x: f64, offset_y: f64, width: f64, height: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_transform(mut self, transform: [f64; 16]) -> Self {
        self.transform = Some(transform.to_vec());
        self
    }

    pub fn with_anchor(mut self, x: f64, y: f64, z: f64) -> Self {
        self.anchor_x = Some(x);
        self.anchor_y = Some(y);
        self.anchor_z = Some(z);
        self
    }

    pub fn with_backend_node(mut self, id: i64) -> Self {
        self.backend_node_id = Some(BackendNodeId(id));
        self
    }

    pub fn drawing_content(mut self) -> Self {
        self.draws_content = true;
        self
    }

    /// Parent id, treating an empty string as absent
    pub fn parent_id(&self) -> Option<&LayerId> {
        self.parent_layer_id.as_ref().filter(|id| !id.0.is_empty())
    }

    /// Backend node id, treating 0 as absent
    pub fn backend_node(&self) -> Option<BackendNodeId> {
        self.backend_node_id.filter(|id| id.0 != 0)
    }
}

/// Parameters of `LayerTree.layerTreeDidChange`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerTreeDidChangeParams {
    /// Absent when the page is not in composited mode
    #[serde(default)]
    pub layers: Option<Vec<LayerPayload>>,
}

/// Parameters of `LayerTree.layerPainted`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerPaintedParams {
    pub layer_id: LayerId,
    pub clip: Rect,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<StickyPositionConstraint>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(StickyPositionConstraint),
        Many(Vec<StickyPositionConstraint>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(constraint)) => vec![constraint],
        Some(OneOrMany::Many(constraints)) => constraints,
        None => Vec::new(),
    })
}
