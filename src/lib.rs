//! Geometry core of an entity-relationship diagram editor: anchor placement and orthogonal
//! routing of relation legs, a force-directed layout, and transactional undo/redo.
//!
//! Rendering and input handling live elsewhere; they drive an [`ErdDiagram`] through its
//! operations and read entities and relations back for drawing.

pub mod common {
    pub mod config;
    pub mod error;
    pub mod geometry;
    pub mod history;
    pub mod ordered_arena;
    pub mod uuid;
}

pub mod erd {
    pub mod erd_anchors;
    pub mod erd_controllers;
    pub mod erd_layout;
    pub mod erd_measure;
    pub mod erd_models;
    pub mod erd_serde;
}

pub use common::config::ErdConfig;
pub use common::error::{ErdError, Result};
pub use common::uuid::{ElementUuid, EntityUuid, RelationUuid};
pub use erd::erd_controllers::{ErdDiagram, ErdEdit, Interaction};
pub use erd::erd_layout::LayoutReport;
pub use erd::erd_measure::{GlyphMeasure, MeasureContent};
pub use erd::erd_models::{Attribute, Cardinality, Edge, Entity, LegEnd, LegFlags, LegRef, Relation, Transform};
pub use erd::erd_serde::DiagramData;
