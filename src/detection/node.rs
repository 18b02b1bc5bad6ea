//! Three-sample node classification

use serde::{Deserialize, Serialize};

/// Shape of a sample relative to its immediate neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Normal,
    Peak,
    Valley,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Normal => "normal",
            NodeType::Peak => "peak",
            NodeType::Valley => "valley",
        }
    }

    pub fn is_turning_point(&self) -> bool {
        !matches!(self, NodeType::Normal)
    }
}

/// Classify an interior sample from its `(prev, current, next)` window.
///
/// A flat step followed by a drop counts as a peak; a rise followed by a
/// plateau does not.
pub fn classify_node(prev: f64, current: f64, next: f64) -> NodeType {
    if current == prev {
        if next >= current {
            NodeType::Normal
        } else {
            NodeType::Peak
        }
    } else if current < prev {
        if next <= current {
            NodeType::Normal
        } else {
            NodeType::Valley
        }
    } else if next >= current {
        NodeType::Normal
    } else {
        NodeType::Peak
    }
}

/// Classify a whole series; the first and last samples are always normal
pub fn classify_series(powers: &[f64]) -> Vec<NodeType> {
    let mut nodes = vec![NodeType::Normal; powers.len()];
    for (i, window) in powers.windows(3).enumerate() {
        nodes[i + 1] = classify_node(window[0], window[1], window[2]);
    }
    nodes
}
