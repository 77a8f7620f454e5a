//! Layer Tree Configuration

/// Layer tree model configuration options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Bytes per pixel assumed when estimating GPU memory of a layer
    pub bytes_per_pixel: f64,
    
    /// Decimal digits kept from incoming transform matrices
    pub transform_precision: u32,
    
    /// Resolve backend node ids to DOM nodes before rebuilding the tree
    pub resolve_nodes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bytes_per_pixel: 4.0, // RGBA8
            transform_precision: 9,
            resolve_nodes: true,
        }
    }
}

impl Config {
    /// Configuration that skips DOM node resolution
    pub fn without_node_resolution() -> Self {
        Self {
            resolve_nodes: false,
            ..Self::default()
        }
    }
}
