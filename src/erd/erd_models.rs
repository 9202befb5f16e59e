use std::collections::BTreeSet;

use egui::{Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};

use crate::common::uuid::{EntityUuid, RelationUuid};

/// One of the four sides of an entity box.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

impl Edge {
    /// Enumeration order, also the tie-break order of anchor selection.
    pub const ALL: [Edge; 4] = [Edge::Top, Edge::Right, Edge::Bottom, Edge::Left];

    pub fn runs_along_x(&self) -> bool {
        matches!(self, Edge::Top | Edge::Bottom)
    }

    pub fn opposite(&self) -> Self {
        match self {
            Edge::Top => Edge::Bottom,
            Edge::Right => Edge::Left,
            Edge::Bottom => Edge::Top,
            Edge::Left => Edge::Right,
        }
    }

    pub fn normal(&self) -> Vec2 {
        match self {
            Edge::Top => Vec2::new(0.0, -1.0),
            Edge::Right => Vec2::new(1.0, 0.0),
            Edge::Bottom => Vec2::new(0.0, 1.0),
            Edge::Left => Vec2::new(-1.0, 0.0),
        }
    }

    /// Coordinate range along the edge.
    pub fn span(&self, rect: &Rect) -> (f32, f32) {
        if self.runs_along_x() {
            (rect.left(), rect.right())
        } else {
            (rect.top(), rect.bottom())
        }
    }

    /// The fixed coordinate of the edge line.
    pub fn line(&self, rect: &Rect) -> f32 {
        match self {
            Edge::Top => rect.top(),
            Edge::Right => rect.right(),
            Edge::Bottom => rect.bottom(),
            Edge::Left => rect.left(),
        }
    }

    pub fn point_at(&self, rect: &Rect, along: f32) -> Pos2 {
        if self.runs_along_x() {
            Pos2::new(along, self.line(rect))
        } else {
            Pos2::new(self.line(rect), along)
        }
    }

    pub fn along(&self, p: Pos2) -> f32 {
        if self.runs_along_x() { p.x } else { p.y }
    }
}

/// Position and size of an entity, relative to its parent if it has one.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Transform {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn position(&self) -> Pos2 {
        Pos2::new(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    pub fn rect_at(&self, origin: Pos2) -> Rect {
        Rect::from_min_size(origin + self.position().to_vec2(), self.size())
    }

    pub fn translated(&self, delta: Vec2) -> Self {
        Self {
            x: self.x + delta.x,
            y: self.y + delta.y,
            ..*self
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub nullable: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn label(&self) -> String {
        let mut s = self.name.clone();
        if self.primary {
            s.insert_str(0, "# ");
        }
        if self.unique {
            s.push_str(" (U)");
        }
        if self.nullable {
            s.push_str(" (N)");
        }
        s
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum LegEnd {
    Source,
    Target,
}

impl LegEnd {
    pub fn other(&self) -> Self {
        match self {
            LegEnd::Source => LegEnd::Target,
            LegEnd::Target => LegEnd::Source,
        }
    }
}

/// Back-reference from an entity to one leg of a relation.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct LegRef {
    pub relation: RelationUuid,
    pub end: LegEnd,
}

impl LegRef {
    pub fn new(relation: RelationUuid, end: LegEnd) -> Self {
        Self { relation, end }
    }
}

/// Legs on one entity whose participation is mutually exclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XorGroup {
    pub legs: BTreeSet<LegRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub(crate) uuid: EntityUuid,
    pub(crate) name: String,
    pub(crate) transform: Transform,
    pub(crate) parent: Option<EntityUuid>,
    pub(crate) children: Vec<EntityUuid>,
    pub(crate) relation_legs: BTreeSet<LegRef>,
    pub(crate) xor_groups: Vec<XorGroup>,
    pub(crate) attributes: Vec<Attribute>,
}

impl Entity {
    pub fn new(uuid: EntityUuid, name: impl Into<String>, transform: Transform) -> Self {
        Self {
            uuid,
            name: name.into(),
            transform,
            parent: None,
            children: Vec::new(),
            relation_legs: BTreeSet::new(),
            xor_groups: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn uuid(&self) -> EntityUuid {
        self.uuid
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn transform(&self) -> Transform {
        self.transform
    }
    pub fn parent(&self) -> Option<EntityUuid> {
        self.parent
    }
    pub fn children(&self) -> &[EntityUuid] {
        &self.children
    }
    pub fn relation_legs(&self) -> &BTreeSet<LegRef> {
        &self.relation_legs
    }
    pub fn xor_groups(&self) -> &[XorGroup] {
        &self.xor_groups
    }
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn xor_group_of(&self, leg: &LegRef) -> Option<usize> {
        self.xor_groups.iter().position(|g| g.legs.contains(leg))
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub point: Pos2,
    pub edge: Edge,
}

/// Notation flags of a leg, toggled as a unit in history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LegFlags {
    pub cardinality: Cardinality,
    pub identifying: bool,
    pub optional: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationLeg {
    pub(crate) entity: Option<EntityUuid>,
    pub(crate) anchor: Anchor,
    /// First point derives from the anchor, last is the relation's middle point.
    pub(crate) points: Vec<Pos2>,
    pub(crate) flags: LegFlags,
    pub(crate) anchor_offset: f32,
    pub(crate) points_manual: bool,
}

impl RelationLeg {
    pub fn new(entity: Option<EntityUuid>, flags: LegFlags) -> Self {
        Self {
            entity,
            anchor: Anchor { point: Pos2::ZERO, edge: Edge::Top },
            points: vec![Pos2::ZERO, Pos2::ZERO],
            flags,
            anchor_offset: 0.0,
            points_manual: false,
        }
    }

    pub fn entity(&self) -> Option<EntityUuid> {
        self.entity
    }
    pub fn anchor(&self) -> Anchor {
        self.anchor
    }
    pub fn points(&self) -> &[Pos2] {
        &self.points
    }
    pub fn flags(&self) -> LegFlags {
        self.flags
    }
    pub fn cardinality(&self) -> Cardinality {
        self.flags.cardinality
    }
    pub fn identifying(&self) -> bool {
        self.flags.identifying
    }
    pub fn optional(&self) -> bool {
        self.flags.optional
    }
    pub fn anchor_offset(&self) -> f32 {
        self.anchor_offset
    }
    pub fn points_manual(&self) -> bool {
        self.points_manual
    }

    /// The point the middle point is centred against.
    pub(crate) fn last_route_point(&self) -> Pos2 {
        if self.points_manual && self.points.len() > 2 {
            self.points[self.points.len() - 2]
        } else {
            self.points[0]
        }
    }

    pub(crate) fn translate(&mut self, delta: Vec2) {
        self.anchor.point += delta;
        for p in self.points.iter_mut() {
            *p += delta;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    pub(crate) uuid: RelationUuid,
    pub(crate) source: RelationLeg,
    pub(crate) target: RelationLeg,
    pub(crate) middle_point: Pos2,
    pub(crate) middle_manual: bool,
}

impl Relation {
    pub fn new(uuid: RelationUuid, source: RelationLeg, target: RelationLeg) -> Self {
        Self {
            uuid,
            source,
            target,
            middle_point: Pos2::ZERO,
            middle_manual: false,
        }
    }

    pub fn uuid(&self) -> RelationUuid {
        self.uuid
    }
    pub fn source(&self) -> &RelationLeg {
        &self.source
    }
    pub fn target(&self) -> &RelationLeg {
        &self.target
    }
    pub fn middle_point(&self) -> Pos2 {
        self.middle_point
    }
    pub fn middle_manual(&self) -> bool {
        self.middle_manual
    }

    pub fn leg(&self, end: LegEnd) -> &RelationLeg {
        match end {
            LegEnd::Source => &self.source,
            LegEnd::Target => &self.target,
        }
    }

    pub fn leg_mut(&mut self, end: LegEnd) -> &mut RelationLeg {
        match end {
            LegEnd::Source => &mut self.source,
            LegEnd::Target => &mut self.target,
        }
    }

    pub fn is_recursive(&self) -> bool {
        self.source.entity.is_some() && self.source.entity == self.target.entity
    }

    /// Manual if either leg carries user-placed waypoints.
    pub fn has_manual_points(&self) -> bool {
        self.source.points_manual || self.target.points_manual
    }

    pub fn ends_on(&self, entity: EntityUuid) -> impl Iterator<Item = LegEnd> + '_ {
        [LegEnd::Source, LegEnd::Target]
            .into_iter()
            .filter(move |e| self.leg(*e).entity == Some(entity))
    }

    pub(crate) fn translate(&mut self, delta: Vec2) {
        self.source.translate(delta);
        self.target.translate(delta);
        self.middle_point += delta;
    }
}
