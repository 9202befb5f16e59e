use serde::{Deserialize, Serialize};

use crate::common::error::{ErdError, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErdConfig {
    pub layout: LayoutConfig,
    pub anchors: AnchorConfig,
    pub routing: RoutingConfig,
    pub entities: EntityConfig,
    pub history: HistoryConfig,
}

impl ErdConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ErdError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
}

/// Spring embedder tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub iterations: usize,
    pub optimal_length: f32,
    pub attraction_scale: f32,
    pub straighten_scale: f32,
    pub repulsion_scale: f32,
    /// Pairs further apart than `optimal_length * repulsion_distance_scale` ignore each other.
    pub repulsion_distance_scale: f32,
    /// Damping applied to the accumulated force before moving an entity.
    pub apply_scale: f32,
    pub origin: [f32; 2],
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            optimal_length: 120.0,
            attraction_scale: 0.5,
            straighten_scale: 0.1,
            repulsion_scale: 20000.0,
            repulsion_distance_scale: 2.0,
            apply_scale: 0.5,
            origin: [10.0, 10.0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Distance of the edge sentinels from the entity corners.
    pub edge_padding: f32,
    pub min_clearance: f32,
    /// How far the first route point sits outside the anchor.
    pub leg_stub: f32,
    pub xor_offset: f32,
    pub self_relation_offset: f32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            edge_padding: 10.0,
            min_clearance: 20.0,
            leg_stub: 20.0,
            xor_offset: 10.0,
            self_relation_offset: 20.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub snap_limit: f32,
    pub hit_tolerance: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            snap_limit: 8.0,
            hit_tolerance: 4.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub isa_padding: f32,
    pub char_width: f32,
    pub line_height: f32,
    pub content_padding: f32,
    pub min_width: f32,
    pub min_height: f32,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            isa_padding: 10.0,
            char_width: 7.0,
            line_height: 18.0,
            content_padding: 10.0,
            min_width: 60.0,
            min_height: 40.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub limit: Option<usize>,
}
