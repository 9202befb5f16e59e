use std::collections::HashSet;
use std::sync::Arc;

use egui::{Pos2, Rect, Vec2};

use crate::common::config::ErdConfig;
use crate::common::geometry::{point_is_in_box, point_to_line_distance, snap};
use crate::common::history::{Edit, History, Playback};
use crate::common::ordered_arena::OrderedArena;
use crate::common::uuid::{ElementUuid, EntityUuid, RelationUuid};
use crate::erd::erd_anchors::{nearest_edge, reproject};
use crate::erd::erd_measure::{GlyphMeasure, MeasureContent};
use crate::erd::erd_models::{
    Anchor, Attribute, Cardinality, Entity, LegEnd, LegFlags, LegRef, Relation, RelationLeg, Transform, XorGroup,
};

/// Route state of one leg.
#[derive(Clone, Debug, PartialEq)]
pub struct LegRoute {
    pub anchor: Anchor,
    pub points: Vec<Pos2>,
    pub anchor_offset: f32,
    pub points_manual: bool,
}

impl LegRoute {
    fn of(leg: &RelationLeg) -> Self {
        Self {
            anchor: leg.anchor,
            points: leg.points.clone(),
            anchor_offset: leg.anchor_offset,
            points_manual: leg.points_manual,
        }
    }

    fn apply_to(&self, leg: &mut RelationLeg) {
        leg.anchor = self.anchor;
        leg.points = self.points.clone();
        leg.anchor_offset = self.anchor_offset;
        leg.points_manual = self.points_manual;
    }
}

/// Every piece of a relation that geometry changes can touch.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteSnapshot {
    pub relation: RelationUuid,
    pub source: LegRoute,
    pub target: LegRoute,
    pub middle_point: Pos2,
    pub middle_manual: bool,
}

impl RouteSnapshot {
    fn of(relation: &Relation) -> Self {
        Self {
            relation: relation.uuid,
            source: LegRoute::of(&relation.source),
            target: LegRoute::of(&relation.target),
            middle_point: relation.middle_point,
            middle_manual: relation.middle_manual,
        }
    }

    fn apply_to(&self, relation: &mut Relation) {
        self.source.apply_to(&mut relation.source);
        self.target.apply_to(&mut relation.target);
        relation.middle_point = self.middle_point;
        relation.middle_manual = self.middle_manual;
    }
}

/// An entity's transform together with the routes of every relation hanging off its subtree.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub transform: Transform,
    pub routes: Vec<RouteSnapshot>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    pub entity: Entity,
    /// Position in the diagram's entity order.
    pub slot: usize,
    /// Position among the parent's children.
    pub child_slot: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationRecord {
    pub relation: Relation,
    pub slot: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Parentage {
    pub parent: Option<EntityUuid>,
    pub child_slot: Option<usize>,
    pub frame: Frame,
}

#[derive(Clone, Debug, PartialEq)]
pub struct XorState {
    pub groups: Vec<XorGroup>,
    pub routes: Vec<RouteSnapshot>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAction {
    MovePoint,
    InsertPoint,
    RemovePoint,
    MoveMiddle,
    ResetMiddle,
    MoveAnchor,
    Straighten,
}

impl RouteAction {
    pub fn is_drag(&self) -> bool {
        matches!(self, RouteAction::MovePoint | RouteAction::MoveMiddle | RouteAction::MoveAnchor)
    }

    fn info_text(&self) -> &'static str {
        match self {
            RouteAction::MovePoint => "Move point",
            RouteAction::InsertPoint => "Insert point",
            RouteAction::RemovePoint => "Remove point",
            RouteAction::MoveMiddle => "Move middle point",
            RouteAction::ResetMiddle => "Reset middle point",
            RouteAction::MoveAnchor => "Move anchor",
            RouteAction::Straighten => "Straighten relation",
        }
    }
}

/// A recorded diagram change, carrying both its starting and final state.
#[derive(Clone, Debug, PartialEq)]
pub enum ErdEdit {
    MoveEntity {
        entity: EntityUuid,
        from: Frame,
        to: Frame,
    },
    ResizeEntity {
        entity: EntityUuid,
        from: Frame,
        to: Frame,
    },
    RenameEntity {
        entity: EntityUuid,
        from: String,
        to: String,
    },
    EntityPresence {
        entity: EntityUuid,
        from: Option<EntityRecord>,
        to: Option<EntityRecord>,
    },
    Reparent {
        entity: EntityUuid,
        from: Parentage,
        to: Parentage,
    },
    AttributePresence {
        entity: EntityUuid,
        index: usize,
        from: Option<Attribute>,
        to: Option<Attribute>,
    },
    MoveAttribute {
        entity: EntityUuid,
        from: usize,
        to: usize,
    },
    RelationPresence {
        relation: RelationUuid,
        from: Option<RelationRecord>,
        to: Option<RelationRecord>,
    },
    Leg {
        relation: RelationUuid,
        end: LegEnd,
        from: LegFlags,
        to: LegFlags,
    },
    Route {
        relation: RelationUuid,
        action: RouteAction,
        from: RouteSnapshot,
        to: RouteSnapshot,
    },
    XorGroups {
        entity: EntityUuid,
        from: XorState,
        to: XorState,
    },
}

impl ErdEdit {
    pub fn context(&self) -> ElementUuid {
        match self {
            ErdEdit::MoveEntity { entity, .. }
            | ErdEdit::ResizeEntity { entity, .. }
            | ErdEdit::RenameEntity { entity, .. }
            | ErdEdit::EntityPresence { entity, .. }
            | ErdEdit::Reparent { entity, .. }
            | ErdEdit::AttributePresence { entity, .. }
            | ErdEdit::MoveAttribute { entity, .. }
            | ErdEdit::XorGroups { entity, .. } => (*entity).into(),
            ErdEdit::RelationPresence { relation, .. }
            | ErdEdit::Leg { relation, .. }
            | ErdEdit::Route { relation, .. } => (*relation).into(),
        }
    }
}

impl Edit for ErdEdit {
    fn merge(&self, next: &Self) -> Option<Self> {
        if self.context() != next.context() {
            return None;
        }
        match (self, next) {
            (ErdEdit::MoveEntity { entity, from, .. }, ErdEdit::MoveEntity { to, .. }) => Some(ErdEdit::MoveEntity {
                entity: *entity,
                from: from.clone(),
                to: to.clone(),
            }),
            (ErdEdit::ResizeEntity { entity, from, .. }, ErdEdit::ResizeEntity { to, .. }) => {
                Some(ErdEdit::ResizeEntity {
                    entity: *entity,
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            (ErdEdit::RenameEntity { entity, from, .. }, ErdEdit::RenameEntity { to, .. }) => {
                Some(ErdEdit::RenameEntity {
                    entity: *entity,
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            (
                ErdEdit::AttributePresence {
                    entity,
                    index,
                    from: Some(from),
                    to: Some(_),
                },
                ErdEdit::AttributePresence {
                    index: next_index,
                    from: Some(_),
                    to: Some(to),
                    ..
                },
            ) if index == next_index => Some(ErdEdit::AttributePresence {
                entity: *entity,
                index: *index,
                from: Some(from.clone()),
                to: Some(to.clone()),
            }),
            (
                ErdEdit::Route {
                    relation,
                    action,
                    from,
                    ..
                },
                ErdEdit::Route {
                    action: next_action,
                    to,
                    ..
                },
            ) if action == next_action && action.is_drag() => Some(ErdEdit::Route {
                relation: *relation,
                action: *action,
                from: from.clone(),
                to: to.clone(),
            }),
            _ => None,
        }
    }

    fn inverse(&self) -> Self {
        match self.clone() {
            ErdEdit::MoveEntity { entity, from, to } => ErdEdit::MoveEntity { entity, from: to, to: from },
            ErdEdit::ResizeEntity { entity, from, to } => ErdEdit::ResizeEntity { entity, from: to, to: from },
            ErdEdit::RenameEntity { entity, from, to } => ErdEdit::RenameEntity { entity, from: to, to: from },
            ErdEdit::EntityPresence { entity, from, to } => ErdEdit::EntityPresence { entity, from: to, to: from },
            ErdEdit::Reparent { entity, from, to } => ErdEdit::Reparent { entity, from: to, to: from },
            ErdEdit::AttributePresence { entity, index, from, to } => ErdEdit::AttributePresence {
                entity,
                index,
                from: to,
                to: from,
            },
            ErdEdit::MoveAttribute { entity, from, to } => ErdEdit::MoveAttribute { entity, from: to, to: from },
            ErdEdit::RelationPresence { relation, from, to } => ErdEdit::RelationPresence {
                relation,
                from: to,
                to: from,
            },
            ErdEdit::Leg { relation, end, from, to } => ErdEdit::Leg {
                relation,
                end,
                from: to,
                to: from,
            },
            ErdEdit::Route { relation, action, from, to } => ErdEdit::Route {
                relation,
                action,
                from: to,
                to: from,
            },
            ErdEdit::XorGroups { entity, from, to } => ErdEdit::XorGroups { entity, from: to, to: from },
        }
    }

    fn info_text(&self) -> Arc<String> {
        let text = match self {
            ErdEdit::MoveEntity { .. } => "Move entity",
            ErdEdit::ResizeEntity { .. } => "Resize entity",
            ErdEdit::RenameEntity { .. } => "Rename entity",
            ErdEdit::EntityPresence { to: Some(_), .. } => "Add entity",
            ErdEdit::EntityPresence { .. } => "Delete entity",
            ErdEdit::Reparent { .. } => "Change parent",
            ErdEdit::AttributePresence { from: None, .. } => "Add attribute",
            ErdEdit::AttributePresence { to: None, .. } => "Remove attribute",
            ErdEdit::AttributePresence { .. } => "Edit attribute",
            ErdEdit::MoveAttribute { .. } => "Reorder attributes",
            ErdEdit::RelationPresence { to: Some(_), .. } => "Add relation",
            ErdEdit::RelationPresence { .. } => "Delete relation",
            ErdEdit::Leg { .. } => "Change relation leg",
            ErdEdit::Route { action, .. } => action.info_text(),
            ErdEdit::XorGroups { .. } => "Change XOR groups",
        };
        Arc::new(text.to_owned())
    }
}

/// A multi-step gesture in progress.
#[derive(Clone, Debug)]
pub enum Interaction {
    /// A relation following the pointer. It is not part of the diagram and no entity refers to it.
    CreatingRelation { relation: Relation },
    AssigningParent { child: EntityUuid },
}

/// The diagram model: entities, relations, their geometry, and the history of changes to them.
pub struct ErdDiagram {
    pub(crate) config: ErdConfig,
    pub(crate) measure: Box<dyn MeasureContent>,
    pub(crate) entities: OrderedArena<EntityUuid, Entity>,
    pub(crate) relations: OrderedArena<RelationUuid, Relation>,
    pub(crate) history: History<ErdEdit>,
    pub(crate) interaction: Option<Interaction>,
}

impl Default for ErdDiagram {
    fn default() -> Self {
        Self::new(ErdConfig::default())
    }
}

impl ErdDiagram {
    pub fn new(config: ErdConfig) -> Self {
        let measure = Box::new(GlyphMeasure::from_config(&config.entities));
        Self::with_measure(config, measure)
    }

    pub fn with_measure(config: ErdConfig, measure: Box<dyn MeasureContent>) -> Self {
        let history = History::new(config.history.limit);
        Self {
            config,
            measure,
            entities: OrderedArena::new(),
            relations: OrderedArena::new(),
            history,
            interaction: None,
        }
    }

    pub fn config(&self) -> &ErdConfig {
        &self.config
    }
    pub fn history(&self) -> &History<ErdEdit> {
        &self.history
    }
    pub fn interaction(&self) -> Option<&Interaction> {
        self.interaction.as_ref()
    }
    pub fn entity(&self, id: &EntityUuid) -> Option<&Entity> {
        self.entities.get(id)
    }
    pub fn relation(&self, id: &RelationUuid) -> Option<&Relation> {
        self.relations.get(id)
    }
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().map(|e| e.1)
    }
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().map(|r| r.1)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityUuid> {
        self.entities.iter().find(|e| e.1.name == name).map(|e| e.0)
    }

    pub fn snapshot(&self) -> (Vec<Entity>, Vec<Relation>) {
        (self.entities().cloned().collect(), self.relations().cloned().collect())
    }

    pub fn provisional_relation(&self) -> Option<&Relation> {
        match &self.interaction {
            Some(Interaction::CreatingRelation { relation }) => Some(relation),
            _ => None,
        }
    }

    // Hierarchy and geometry queries

    pub fn origin_of(&self, id: EntityUuid) -> Pos2 {
        let mut origin = Pos2::ZERO;
        let mut current = self.entities.get(&id).and_then(|e| e.parent);
        while let Some(p) = current {
            let Some(pe) = self.entities.get(&p) else {
                break;
            };
            origin += pe.transform.position().to_vec2();
            current = pe.parent;
        }
        origin
    }

    pub fn absolute_rect(&self, id: EntityUuid) -> Option<Rect> {
        let e = self.entities.get(&id)?;
        Some(e.transform.rect_at(self.origin_of(id)))
    }

    pub fn subtree(&self, id: EntityUuid) -> Vec<EntityUuid> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(e) = self.entities.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(e.children.iter().rev().copied());
        }
        out
    }

    pub fn is_in_subtree(&self, candidate: EntityUuid, root: EntityUuid) -> bool {
        let mut current = Some(candidate);
        while let Some(c) = current {
            if c == root {
                return true;
            }
            current = self.entities.get(&c).and_then(|e| e.parent);
        }
        false
    }

    pub fn root_of(&self, id: EntityUuid) -> EntityUuid {
        let mut current = id;
        while let Some(p) = self.entities.get(&current).and_then(|e| e.parent) {
            current = p;
        }
        current
    }

    pub fn depth_of(&self, id: EntityUuid) -> usize {
        let mut depth = 0;
        let mut current = self.entities.get(&id).and_then(|e| e.parent);
        while let Some(p) = current {
            depth += 1;
            current = self.entities.get(&p).and_then(|e| e.parent);
        }
        depth
    }

    /// Smallest size that still fits the content, the configured minimum, and the children.
    pub fn min_size(&self, id: EntityUuid) -> Vec2 {
        let Some(e) = self.entities.get(&id) else {
            return Vec2::ZERO;
        };
        let config = &self.config.entities;
        let mut min = self
            .measure
            .content_size(e)
            .max(Vec2::new(config.min_width, config.min_height));
        for c in e.children.iter().filter_map(|c| self.entities.get(c)) {
            let t = c.transform;
            min = min.max(Vec2::new(
                t.x + t.width + config.isa_padding,
                t.y + t.height + config.isa_padding,
            ));
        }
        min
    }

    /// Deepest entity under `pos`, later entities win among equals.
    pub fn entity_at(&self, pos: Pos2) -> Option<EntityUuid> {
        let tolerance = self.config.routing.hit_tolerance;
        let mut best: Option<(usize, EntityUuid)> = None;
        for id in self.entities.keys() {
            let Some(r) = self.absolute_rect(id) else {
                continue;
            };
            if point_is_in_box(pos, r.min, r.max, tolerance) {
                let depth = self.depth_of(id);
                if best.map_or(true, |b| depth >= b.0) {
                    best = Some((depth, id));
                }
            }
        }
        best.map(|b| b.1)
    }

    fn leg_entity(&self, leg: LegRef) -> Option<EntityUuid> {
        self.relations.get(&leg.relation)?.leg(leg.end).entity
    }

    // Snapshots

    fn relations_touching(&self, entities: &HashSet<EntityUuid>) -> Vec<RelationUuid> {
        self.relations
            .iter()
            .filter(|(_, r)| {
                [&r.source, &r.target]
                    .iter()
                    .any(|l| l.entity.is_some_and(|e| entities.contains(&e)))
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn capture_routes(&self, relations: &[RelationUuid]) -> Vec<RouteSnapshot> {
        relations
            .iter()
            .filter_map(|r| self.relations.get(r))
            .map(RouteSnapshot::of)
            .collect()
    }

    fn restore_routes(&mut self, routes: &[RouteSnapshot]) {
        for snapshot in routes {
            if let Some(r) = self.relations.get_mut(&snapshot.relation) {
                snapshot.apply_to(r);
            }
        }
    }

    pub(crate) fn route_of(&self, id: RelationUuid) -> Option<RouteSnapshot> {
        self.relations.get(&id).map(RouteSnapshot::of)
    }

    pub(crate) fn frame_of(&self, id: EntityUuid) -> Option<Frame> {
        let e = self.entities.get(&id)?;
        let moved: HashSet<EntityUuid> = self.subtree(id).into_iter().collect();
        Some(Frame {
            transform: e.transform,
            routes: self.capture_routes(&self.relations_touching(&moved)),
        })
    }

    fn apply_frame(&mut self, id: EntityUuid, frame: &Frame) {
        if let Some(e) = self.entities.get_mut(&id) {
            e.transform = frame.transform;
        }
        self.restore_routes(&frame.routes);
    }

    fn xor_state(&self, entity: EntityUuid) -> Option<XorState> {
        let e = self.entities.get(&entity)?;
        let mut relations: Vec<RelationUuid> = e.relation_legs.iter().map(|l| l.relation).collect();
        relations.dedup();
        Some(XorState {
            groups: e.xor_groups.clone(),
            routes: self.capture_routes(&relations),
        })
    }

    // Raw mutations, shared by operations and playback. None of these record.

    pub(crate) fn translate_raw(&mut self, id: EntityUuid, delta: Vec2) {
        let Some(e) = self.entities.get_mut(&id) else {
            return;
        };
        e.transform = e.transform.translated(delta);
        self.after_subtree_moved(id, delta);
    }

    /// Follows a canvas move of the subtree at `id` with every relation attached to it.
    fn after_subtree_moved(&mut self, id: EntityUuid, delta: Vec2) {
        let moved: HashSet<EntityUuid> = self.subtree(id).into_iter().collect();
        for rid in self.relations_touching(&moved) {
            let Some(r) = self.relations.get_mut(&rid) else {
                continue;
            };
            let inside = |leg: &RelationLeg| leg.entity.is_some_and(|e| moved.contains(&e));
            match (inside(&r.source), inside(&r.target)) {
                (true, true) => {
                    r.translate(delta);
                    continue;
                }
                (true, false) => r.source.anchor.point += delta,
                (false, true) => r.target.anchor.point += delta,
                (false, false) => continue,
            }
            self.reset_anchors(rid, false);
        }
    }

    pub(crate) fn resize_raw(&mut self, id: EntityUuid, transform: Transform) {
        let Some(e) = self.entities.get_mut(&id) else {
            return;
        };
        let shift = transform.position() - e.transform.position();
        e.transform = transform;
        let children = e.children.clone();
        let legs: Vec<LegRef> = e.relation_legs.iter().copied().collect();

        if shift != Vec2::ZERO {
            for c in children {
                self.after_subtree_moved(c, shift);
            }
        }

        let Some(rect) = self.absolute_rect(id) else {
            return;
        };
        let padding = self.config.anchors.edge_padding;
        let mut relations = Vec::new();
        for leg in legs {
            if let Some(r) = self.relations.get_mut(&leg.relation) {
                let l = r.leg_mut(leg.end);
                l.anchor.point = reproject(l.anchor.point, &rect, l.anchor.edge, padding);
                if relations.last() != Some(&leg.relation) {
                    relations.push(leg.relation);
                }
            }
        }
        for rid in relations {
            self.reset_anchors(rid, false);
        }
    }

    fn insert_entity_record(&mut self, record: &EntityRecord) {
        let e = record.entity.clone();
        if let Some(pe) = e.parent.and_then(|p| self.entities.get_mut(&p)) {
            let i = record.child_slot.unwrap_or(pe.children.len()).min(pe.children.len());
            pe.children.insert(i, e.uuid);
        }
        self.entities.insert_at(record.slot, e.uuid, e);
    }

    fn remove_entity_raw(&mut self, id: EntityUuid) -> Option<EntityRecord> {
        let parent = self.entities.get(&id)?.parent;
        let child_slot = parent.and_then(|p| {
            let pe = self.entities.get_mut(&p)?;
            let i = pe.children.iter().position(|c| *c == id)?;
            pe.children.remove(i);
            Some(i)
        });
        let (slot, entity) = self.entities.remove(&id)?;
        Some(EntityRecord { entity, slot, child_slot })
    }

    fn insert_relation_record(&mut self, record: &RelationRecord) {
        let r = record.relation.clone();
        for end in [LegEnd::Source, LegEnd::Target] {
            if let Some(e) = r.leg(end).entity.and_then(|e| self.entities.get_mut(&e)) {
                e.relation_legs.insert(LegRef::new(r.uuid, end));
            }
        }
        self.relations.insert_at(record.slot, r.uuid, r);
    }

    fn remove_relation_raw(&mut self, id: RelationUuid) -> Option<RelationRecord> {
        let (slot, relation) = self.relations.remove(&id)?;
        for end in [LegEnd::Source, LegEnd::Target] {
            if let Some(e) = relation.leg(end).entity.and_then(|e| self.entities.get_mut(&e)) {
                let leg = LegRef::new(id, end);
                e.relation_legs.remove(&leg);
                for g in e.xor_groups.iter_mut() {
                    g.legs.remove(&leg);
                }
                e.xor_groups.retain(|g| !g.legs.is_empty());
            }
        }
        Some(RelationRecord { relation, slot })
    }

    fn link_parent(&mut self, id: EntityUuid, parent: Option<EntityUuid>, child_slot: Option<usize>) {
        let Some(old) = self.entities.get(&id).map(|e| e.parent) else {
            return;
        };
        if let Some(pe) = old.and_then(|p| self.entities.get_mut(&p)) {
            pe.children.retain(|c| *c != id);
        }
        if let Some(pe) = parent.and_then(|p| self.entities.get_mut(&p)) {
            let i = child_slot.unwrap_or(pe.children.len()).min(pe.children.len());
            pe.children.insert(i, id);
        }
        if let Some(e) = self.entities.get_mut(&id) {
            e.parent = parent;
        }
    }

    pub(crate) fn refresh_xor_offsets(&mut self, entity: EntityUuid) {
        let Some(e) = self.entities.get(&entity) else {
            return;
        };
        let xor_offset = self.config.anchors.xor_offset;
        let updates: Vec<(LegRef, f32)> = e
            .relation_legs
            .iter()
            .map(|l| (*l, if e.xor_group_of(l).is_some() { xor_offset } else { 0.0 }))
            .collect();
        let mut relations = Vec::new();
        for (leg, offset) in updates {
            if let Some(r) = self.relations.get_mut(&leg.relation) {
                r.leg_mut(leg.end).anchor_offset = offset;
            }
            if relations.last() != Some(&leg.relation) {
                relations.push(leg.relation);
            }
        }
        for rid in relations {
            self.route_relation(rid);
        }
    }

    fn apply_and_record(&mut self, edit: ErdEdit, stackable: bool) {
        self.playback(&edit);
        self.history.record(edit, stackable);
    }

    // Entities

    pub fn add_entity(&mut self, name: impl Into<String>, transform: Transform) -> EntityUuid {
        let id = EntityUuid::now_v7();
        let mut entity = Entity::new(id, name, transform);
        let min = self
            .measure
            .content_size(&entity)
            .max(Vec2::new(self.config.entities.min_width, self.config.entities.min_height));
        entity.transform.width = entity.transform.width.max(min.x);
        entity.transform.height = entity.transform.height.max(min.y);
        tracing::debug!(%id, name = entity.name(), "add entity");

        let record = EntityRecord {
            entity,
            slot: self.entities.len(),
            child_slot: None,
        };
        self.apply_and_record(
            ErdEdit::EntityPresence {
                entity: id,
                from: None,
                to: Some(record),
            },
            false,
        );
        id
    }

    /// Removes the entity, its descendants, and every relation attached to any of them.
    pub fn delete_entity(&mut self, id: EntityUuid) -> bool {
        if !self.entities.contains(&id) {
            return false;
        }
        self.cancel_interaction();
        self.history.begin();
        self.delete_entity_inner(id);
        self.history.commit();
        true
    }

    fn delete_entity_inner(&mut self, id: EntityUuid) {
        let Some(e) = self.entities.get(&id) else {
            return;
        };
        let children = e.children.clone();
        let mut relations: Vec<RelationUuid> = e.relation_legs.iter().map(|l| l.relation).collect();
        relations.dedup();

        for c in children {
            self.delete_entity_inner(c);
        }
        for r in relations {
            self.delete_relation_inner(r);
        }
        if let Some(record) = self.remove_entity_raw(id) {
            tracing::debug!(%id, name = record.entity.name(), "delete entity");
            self.history.record(
                ErdEdit::EntityPresence {
                    entity: id,
                    from: Some(record),
                    to: None,
                },
                false,
            );
        }
    }

    pub fn rename_entity(&mut self, id: EntityUuid, name: impl Into<String>) -> bool {
        let name = name.into();
        let Some(e) = self.entities.get(&id) else {
            return false;
        };
        if e.name == name {
            return false;
        }
        let from = e.name.clone();
        self.history.begin();
        self.apply_and_record(ErdEdit::RenameEntity { entity: id, from, to: name }, true);
        self.ensure_min_size(id);
        self.history.commit();
        true
    }

    fn clamp_delta(&self, id: EntityUuid, delta: Vec2) -> Vec2 {
        let Some(e) = self.entities.get(&id) else {
            return Vec2::ZERO;
        };
        let Some(p) = e.parent.and_then(|p| self.entities.get(&p)) else {
            return delta;
        };
        let pad = self.config.entities.isa_padding;
        let t = e.transform;
        let axis = |pos: f32, size: f32, parent_size: f32, d: f32| {
            let (lo, hi) = (pad, parent_size - pad - size);
            if lo <= hi {
                (pos + d).clamp(lo, hi) - pos
            } else {
                0.0
            }
        };
        Vec2::new(
            axis(t.x, t.width, p.transform.width, delta.x),
            axis(t.y, t.height, p.transform.height, delta.y),
        )
    }

    /// Drags an entity by `delta`. Children stay inside their parent's padded interior.
    pub fn translate_entity(&mut self, id: EntityUuid, delta: Vec2) -> bool {
        let delta = self.clamp_delta(id, delta);
        if delta == Vec2::ZERO {
            return false;
        }
        let Some(from) = self.frame_of(id) else {
            return false;
        };
        self.translate_raw(id, delta);
        let Some(to) = self.frame_of(id) else {
            return false;
        };
        self.history.record(ErdEdit::MoveEntity { entity: id, from, to }, true);
        true
    }

    pub fn move_entity_to(&mut self, id: EntityUuid, position: Pos2) -> bool {
        let Some(e) = self.entities.get(&id) else {
            return false;
        };
        let delta = position - e.transform.position();
        self.translate_entity(id, delta)
    }

    fn clamp_transform(&self, id: EntityUuid, mut t: Transform) -> Option<Transform> {
        let e = self.entities.get(&id)?;
        let min = self.min_size(id);
        t.width = t.width.max(min.x);
        t.height = t.height.max(min.y);
        if let Some(p) = e.parent.and_then(|p| self.entities.get(&p)) {
            let pad = self.config.entities.isa_padding;
            t.x = t.x.max(pad);
            t.y = t.y.max(pad);
            t.width = t.width.min(p.transform.width - pad - t.x);
            t.height = t.height.min(p.transform.height - pad - t.y);
            if t.width < min.x || t.height < min.y {
                return None;
            }
        }
        Some(t)
    }

    /// Sets position and size together, as a resize handle does.
    ///
    /// The size never drops below [`Self::min_size`] and a child never leaves its parent.
    pub fn resize_entity(&mut self, id: EntityUuid, transform: Transform) -> bool {
        let Some(t) = self.clamp_transform(id, transform) else {
            tracing::debug!(%id, "resize rejected, entity would leave its parent");
            return false;
        };
        let Some(from) = self.frame_of(id) else {
            return false;
        };
        if from.transform == t {
            return false;
        }
        self.resize_raw(id, t);
        let Some(to) = self.frame_of(id) else {
            return false;
        };
        self.history.record(ErdEdit::ResizeEntity { entity: id, from, to }, true);
        true
    }

    pub fn fit_to_content(&mut self, id: EntityUuid) -> bool {
        let Some(e) = self.entities.get(&id) else {
            return false;
        };
        let min = self.min_size(id);
        let t = Transform {
            width: min.x,
            height: min.y,
            ..e.transform
        };
        self.history.seal();
        let changed = self.resize_entity(id, t);
        self.history.seal();
        changed
    }

    /// Grows an entity that no longer fits its content, then its ancestors as needed.
    fn ensure_min_size(&mut self, id: EntityUuid) {
        let Some(t) = self.entities.get(&id).map(|e| e.transform) else {
            return;
        };
        let min = self.min_size(id);
        if t.width >= min.x && t.height >= min.y {
            return;
        }
        let grown = Transform {
            width: t.width.max(min.x),
            height: t.height.max(min.y),
            ..t
        };
        let Some(from) = self.frame_of(id) else {
            return;
        };
        self.resize_raw(id, grown);
        if let Some(to) = self.frame_of(id) {
            self.history.record(ErdEdit::ResizeEntity { entity: id, from, to }, true);
        }
        if let Some(p) = self.entities.get(&id).and_then(|e| e.parent) {
            self.ensure_min_size(p);
        }
    }

    /// Nests `child` under `parent`, or makes it top-level with `None`.
    ///
    /// The child keeps its place on the canvas where the parent's padding allows, and the
    /// parent grows to hold it.
    pub fn set_parent(&mut self, child: EntityUuid, parent: Option<EntityUuid>) -> bool {
        let Some(c) = self.entities.get(&child) else {
            return false;
        };
        if c.parent == parent {
            return false;
        }
        if let Some(p) = parent {
            if !self.entities.contains(&p) || self.is_in_subtree(p, child) {
                tracing::debug!(%child, parent = %p, "parent assignment rejected");
                return false;
            }
        }

        let old_parent = c.parent;
        let child_slot = old_parent
            .and_then(|p| self.entities.get(&p))
            .and_then(|pe| pe.children.iter().position(|x| *x == child));
        let (Some(abs), Some(frame)) = (self.absolute_rect(child), self.frame_of(child)) else {
            return false;
        };
        let from = Parentage {
            parent: old_parent,
            child_slot,
            frame,
        };

        let pad = self.config.entities.isa_padding;
        let (origin, local) = match parent.and_then(|p| self.absolute_rect(p)) {
            Some(pr) => {
                let local = abs.min - pr.min;
                (pr.min, Pos2::new(local.x.max(pad), local.y.max(pad)))
            }
            None => (Pos2::ZERO, abs.min),
        };

        self.history.begin();
        self.link_parent(child, parent, None);
        if let Some(e) = self.entities.get_mut(&child) {
            e.transform.x = local.x;
            e.transform.y = local.y;
        }
        let shift = (origin + local.to_vec2()) - abs.min;
        self.after_subtree_moved(child, shift);

        let child_slot = parent
            .and_then(|p| self.entities.get(&p))
            .and_then(|pe| pe.children.iter().position(|x| *x == child));
        if let Some(frame) = self.frame_of(child) {
            let to = Parentage { parent, child_slot, frame };
            self.history.record(ErdEdit::Reparent { entity: child, from, to }, false);
        }
        if let Some(p) = parent {
            self.ensure_min_size(p);
        }
        self.history.commit();
        true
    }

    // Attributes

    pub fn add_attribute(&mut self, entity: EntityUuid, attribute: Attribute) -> bool {
        let Some(e) = self.entities.get(&entity) else {
            return false;
        };
        let index = e.attributes.len();
        self.history.begin();
        self.apply_and_record(
            ErdEdit::AttributePresence {
                entity,
                index,
                from: None,
                to: Some(attribute),
            },
            false,
        );
        self.ensure_min_size(entity);
        self.history.commit();
        true
    }

    pub fn remove_attribute(&mut self, entity: EntityUuid, index: usize) -> Option<Attribute> {
        let attribute = self.entities.get(&entity)?.attributes.get(index)?.clone();
        self.apply_and_record(
            ErdEdit::AttributePresence {
                entity,
                index,
                from: Some(attribute.clone()),
                to: None,
            },
            false,
        );
        Some(attribute)
    }

    pub fn update_attribute(&mut self, entity: EntityUuid, index: usize, attribute: Attribute) -> bool {
        let Some(old) = self
            .entities
            .get(&entity)
            .and_then(|e| e.attributes.get(index))
            .cloned()
        else {
            return false;
        };
        if old == attribute {
            return false;
        }
        self.history.begin();
        self.apply_and_record(
            ErdEdit::AttributePresence {
                entity,
                index,
                from: Some(old),
                to: Some(attribute),
            },
            true,
        );
        self.ensure_min_size(entity);
        self.history.commit();
        true
    }

    pub fn move_attribute(&mut self, entity: EntityUuid, from: usize, to: usize) -> bool {
        let Some(e) = self.entities.get(&entity) else {
            return false;
        };
        if from == to || from >= e.attributes.len() || to >= e.attributes.len() {
            return false;
        }
        self.apply_and_record(ErdEdit::MoveAttribute { entity, from, to }, false);
        true
    }

    // Relations

    pub fn add_relation(
        &mut self,
        source: EntityUuid,
        target: EntityUuid,
        source_flags: LegFlags,
        target_flags: LegFlags,
    ) -> Option<RelationUuid> {
        if !self.entities.contains(&source) || !self.entities.contains(&target) {
            tracing::debug!(%source, %target, "relation endpoints missing");
            return None;
        }
        let relation = Relation::new(
            RelationUuid::now_v7(),
            RelationLeg::new(Some(source), source_flags),
            RelationLeg::new(Some(target), target_flags),
        );
        Some(self.attach_relation(relation))
    }

    fn attach_relation(&mut self, relation: Relation) -> RelationUuid {
        let id = relation.uuid;
        let slot = self.relations.len();
        self.insert_relation_record(&RelationRecord { relation, slot });
        self.reset_anchors(id, true);
        if let Some(relation) = self.relations.get(&id).cloned() {
            tracing::debug!(%id, "add relation");
            self.history.record(
                ErdEdit::RelationPresence {
                    relation: id,
                    from: None,
                    to: Some(RelationRecord { relation, slot }),
                },
                false,
            );
        }
        id
    }

    pub fn delete_relation(&mut self, id: RelationUuid) -> bool {
        if !self.relations.contains(&id) {
            return false;
        }
        self.history.begin();
        self.delete_relation_inner(id);
        self.history.commit();
        true
    }

    fn delete_relation_inner(&mut self, id: RelationUuid) {
        for end in [LegEnd::Source, LegEnd::Target] {
            self.leave_xor_inner(LegRef::new(id, end));
        }
        if let Some(record) = self.remove_relation_raw(id) {
            tracing::debug!(%id, "delete relation");
            self.history.record(
                ErdEdit::RelationPresence {
                    relation: id,
                    from: Some(record),
                    to: None,
                },
                false,
            );
        }
    }

    pub fn set_leg_flags(&mut self, relation: RelationUuid, end: LegEnd, flags: LegFlags) -> bool {
        let Some(r) = self.relations.get(&relation) else {
            return false;
        };
        let from = r.leg(end).flags;
        if from == flags {
            return false;
        }
        self.apply_and_record(ErdEdit::Leg { relation, end, from, to: flags }, false);
        true
    }

    pub fn set_cardinality(&mut self, relation: RelationUuid, end: LegEnd, cardinality: Cardinality) -> bool {
        let Some(r) = self.relations.get(&relation) else {
            return false;
        };
        let flags = LegFlags {
            cardinality,
            ..r.leg(end).flags
        };
        self.set_leg_flags(relation, end, flags)
    }

    pub fn toggle_identifying(&mut self, relation: RelationUuid, end: LegEnd) -> bool {
        let Some(r) = self.relations.get(&relation) else {
            return false;
        };
        let old = r.leg(end).flags;
        self.set_leg_flags(relation, end, LegFlags { identifying: !old.identifying, ..old })
    }

    pub fn toggle_optional(&mut self, relation: RelationUuid, end: LegEnd) -> bool {
        let Some(r) = self.relations.get(&relation) else {
            return false;
        };
        let old = r.leg(end).flags;
        self.set_leg_flags(relation, end, LegFlags { optional: !old.optional, ..old })
    }

    // Routing

    fn edit_route(&mut self, id: RelationUuid, action: RouteAction, f: impl FnOnce(&mut Self) -> bool) -> bool {
        let Some(from) = self.route_of(id) else {
            return false;
        };
        if !f(self) {
            return false;
        }
        let Some(to) = self.route_of(id) else {
            return false;
        };
        if from == to {
            return false;
        }
        self.history.record(ErdEdit::Route { relation: id, action, from, to }, action.is_drag());
        true
    }

    /// Inserts a waypoint before `index`. The first and last points are not editable.
    pub fn insert_point(&mut self, id: RelationUuid, end: LegEnd, index: usize, pos: Pos2) -> bool {
        self.edit_route(id, RouteAction::InsertPoint, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            let leg = r.leg_mut(end);
            if index == 0 || index >= leg.points.len() {
                return false;
            }
            leg.points.insert(index, pos);
            leg.points_manual = true;
            d.route_relation(id);
            true
        })
    }

    /// Splits whichever segment of either leg passes within hit tolerance of `pos`.
    pub fn insert_point_near(&mut self, id: RelationUuid, pos: Pos2) -> bool {
        let Some(r) = self.relations.get(&id) else {
            return false;
        };
        let mut best: Option<(f32, LegEnd, usize)> = None;
        for end in [LegEnd::Source, LegEnd::Target] {
            for (i, w) in r.leg(end).points.windows(2).enumerate() {
                let d = point_to_line_distance(pos, w[0], w[1]);
                if best.map_or(true, |b| d < b.0) {
                    best = Some((d, end, i + 1));
                }
            }
        }
        match best {
            Some((d, end, index)) if d <= self.config.routing.hit_tolerance => self.insert_point(id, end, index, pos),
            _ => false,
        }
    }

    /// Drags a waypoint, snapping each axis onto the neighbouring points.
    pub fn move_point(&mut self, id: RelationUuid, end: LegEnd, index: usize, pos: Pos2) -> bool {
        let limit = self.config.routing.snap_limit;
        self.edit_route(id, RouteAction::MovePoint, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            let leg = r.leg_mut(end);
            if index == 0 || index + 1 >= leg.points.len() {
                return false;
            }
            let (prev, next) = (leg.points[index - 1], leg.points[index + 1]);
            leg.points[index] = Pos2::new(snap(pos.x, prev.x, next.x, limit), snap(pos.y, prev.y, next.y, limit));
            leg.points_manual = true;
            d.route_relation(id);
            true
        })
    }

    pub fn remove_point(&mut self, id: RelationUuid, end: LegEnd, index: usize) -> bool {
        self.edit_route(id, RouteAction::RemovePoint, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            let leg = r.leg_mut(end);
            if index == 0 || index + 1 >= leg.points.len() {
                return false;
            }
            leg.points.remove(index);
            if leg.points.len() <= 2 {
                leg.points_manual = false;
            }
            d.route_relation(id);
            true
        })
    }

    pub fn move_middle(&mut self, id: RelationUuid, pos: Pos2) -> bool {
        self.edit_route(id, RouteAction::MoveMiddle, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            r.middle_point = pos;
            r.middle_manual = true;
            d.route_relation(id);
            true
        })
    }

    pub fn reset_middle(&mut self, id: RelationUuid) -> bool {
        self.edit_route(id, RouteAction::ResetMiddle, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            if !r.middle_manual {
                return false;
            }
            r.middle_manual = false;
            d.route_relation(id);
            true
        })
    }

    pub fn move_anchor(&mut self, id: RelationUuid, end: LegEnd, pos: Pos2) -> bool {
        let Some(rect) = self
            .relations
            .get(&id)
            .and_then(|r| r.leg(end).entity)
            .and_then(|e| self.absolute_rect(e))
        else {
            return false;
        };
        let edge = nearest_edge(&rect, pos);
        let point = reproject(pos, &rect, edge, self.config.anchors.edge_padding);
        self.edit_route(id, RouteAction::MoveAnchor, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            r.leg_mut(end).anchor = Anchor { point, edge };
            d.route_relation(id);
            true
        })
    }

    /// Drops manual waypoints on both legs and picks fresh anchors.
    pub fn straighten(&mut self, id: RelationUuid) -> bool {
        self.edit_route(id, RouteAction::Straighten, |d| {
            let Some(r) = d.relations.get_mut(&id) else {
                return false;
            };
            r.source.points_manual = false;
            r.target.points_manual = false;
            d.reset_anchors(id, true);
            true
        })
    }

    // XOR groups

    /// Puts two legs on the same entity into one XOR group, merging existing groups.
    pub fn xor_legs(&mut self, a: LegRef, b: LegRef) -> bool {
        if a.relation == b.relation {
            return false;
        }
        let (Some(ea), Some(eb)) = (self.leg_entity(a), self.leg_entity(b)) else {
            return false;
        };
        if ea != eb {
            tracing::debug!(?a, ?b, "xor needs legs on one entity");
            return false;
        }
        let entity = ea;
        let Some(e) = self.entities.get(&entity) else {
            return false;
        };
        let (ga, gb) = (e.xor_group_of(&a), e.xor_group_of(&b));
        if ga.is_some() && ga == gb {
            return false;
        }
        let Some(from) = self.xor_state(entity) else {
            return false;
        };

        if let Some(e) = self.entities.get_mut(&entity) {
            match (ga, gb) {
                (None, None) => e.xor_groups.push(XorGroup {
                    legs: [a, b].into_iter().collect(),
                }),
                (Some(g), None) => {
                    e.xor_groups[g].legs.insert(b);
                }
                (None, Some(g)) => {
                    e.xor_groups[g].legs.insert(a);
                }
                (Some(g1), Some(g2)) => {
                    let (keep, drop) = (g1.min(g2), g1.max(g2));
                    let merged = e.xor_groups.remove(drop);
                    e.xor_groups[keep].legs.extend(merged.legs);
                }
            }
        }
        self.refresh_xor_offsets(entity);
        if let Some(to) = self.xor_state(entity) {
            self.history.record(ErdEdit::XorGroups { entity, from, to }, false);
        }
        true
    }

    /// Takes a leg out of its XOR group. A group left with one leg dissolves.
    pub fn leave_xor(&mut self, leg: LegRef) -> bool {
        self.leave_xor_inner(leg)
    }

    fn leave_xor_inner(&mut self, leg: LegRef) -> bool {
        let Some(entity) = self.leg_entity(leg) else {
            return false;
        };
        let Some(g) = self.entities.get(&entity).and_then(|e| e.xor_group_of(&leg)) else {
            return false;
        };
        let Some(from) = self.xor_state(entity) else {
            return false;
        };
        if let Some(e) = self.entities.get_mut(&entity) {
            e.xor_groups[g].legs.remove(&leg);
            if e.xor_groups[g].legs.len() < 2 {
                e.xor_groups.remove(g);
            }
        }
        self.refresh_xor_offsets(entity);
        if let Some(to) = self.xor_state(entity) {
            self.history.record(ErdEdit::XorGroups { entity, from, to }, false);
        }
        true
    }

    // Interactions

    pub fn begin_relation(&mut self, source: EntityUuid) -> bool {
        let Some(rect) = self.absolute_rect(source) else {
            return false;
        };
        self.cancel_interaction();
        let mut relation = Relation::new(
            RelationUuid::now_v7(),
            RelationLeg::new(Some(source), LegFlags::default()),
            RelationLeg::new(None, LegFlags::default()),
        );
        self.aim_provisional(&mut relation, rect.center());
        self.interaction = Some(Interaction::CreatingRelation { relation });
        true
    }

    pub fn update_provisional(&mut self, pos: Pos2) -> bool {
        match self.interaction.take() {
            Some(Interaction::CreatingRelation { mut relation }) => {
                self.aim_provisional(&mut relation, pos);
                self.interaction = Some(Interaction::CreatingRelation { relation });
                true
            }
            other => {
                self.interaction = other;
                false
            }
        }
    }

    pub fn complete_relation(&mut self, target: EntityUuid) -> Option<RelationUuid> {
        if !self.entities.contains(&target) {
            return None;
        }
        match self.interaction.take() {
            Some(Interaction::CreatingRelation { mut relation }) if relation.target.entity.is_none() => {
                relation.target.entity = Some(target);
                relation.target.anchor_offset = 0.0;
                Some(self.attach_relation(relation))
            }
            other => {
                self.interaction = other;
                None
            }
        }
    }

    pub fn begin_parent_assignment(&mut self, child: EntityUuid) -> bool {
        if !self.entities.contains(&child) {
            return false;
        }
        self.cancel_interaction();
        self.interaction = Some(Interaction::AssigningParent { child });
        true
    }

    pub fn complete_parent_assignment(&mut self, parent: EntityUuid) -> bool {
        match self.interaction.take() {
            Some(Interaction::AssigningParent { child }) => self.set_parent(child, Some(parent)),
            other => {
                self.interaction = other;
                false
            }
        }
    }

    /// Drops any gesture in progress. Nothing in the diagram refers to it.
    pub fn cancel_interaction(&mut self) -> bool {
        self.interaction.take().is_some()
    }

    // History

    pub fn begin(&mut self) {
        self.history.begin();
    }

    pub fn commit(&mut self) {
        self.history.commit();
    }

    /// Ends the current gesture so the next drag starts a new undo step.
    pub fn seal(&mut self) {
        self.history.seal();
    }

    pub fn undo(&mut self) -> bool {
        self.cancel_interaction();
        let Some(sequence) = self.history.take_undo() else {
            return false;
        };
        let _guard = self.history.replay_guard();
        for edit in &sequence {
            self.playback(edit);
        }
        true
    }

    pub fn redo(&mut self) -> bool {
        self.cancel_interaction();
        let Some(sequence) = self.history.take_redo() else {
            return false;
        };
        let _guard = self.history.replay_guard();
        for edit in &sequence {
            self.playback(edit);
        }
        true
    }
}

impl Playback<ErdEdit> for ErdDiagram {
    fn playback(&mut self, edit: &ErdEdit) {
        match edit {
            ErdEdit::MoveEntity { entity, to, .. } | ErdEdit::ResizeEntity { entity, to, .. } => {
                self.apply_frame(*entity, to);
            }
            ErdEdit::RenameEntity { entity, to, .. } => {
                if let Some(e) = self.entities.get_mut(entity) {
                    e.name = to.clone();
                }
            }
            ErdEdit::EntityPresence { entity, to, .. } => match to {
                Some(record) => self.insert_entity_record(record),
                None => {
                    self.remove_entity_raw(*entity);
                }
            },
            ErdEdit::Reparent { entity, to, .. } => {
                self.link_parent(*entity, to.parent, to.child_slot);
                self.apply_frame(*entity, &to.frame);
            }
            ErdEdit::AttributePresence { entity, index, from, to } => {
                let Some(e) = self.entities.get_mut(entity) else {
                    return;
                };
                match (from, to) {
                    (None, Some(a)) => e.attributes.insert((*index).min(e.attributes.len()), a.clone()),
                    (Some(_), None) if *index < e.attributes.len() => {
                        e.attributes.remove(*index);
                    }
                    (Some(_), Some(a)) if *index < e.attributes.len() => e.attributes[*index] = a.clone(),
                    _ => {}
                }
            }
            ErdEdit::MoveAttribute { entity, from, to } => {
                if let Some(e) = self.entities.get_mut(entity) {
                    if *from < e.attributes.len() && *to < e.attributes.len() {
                        let a = e.attributes.remove(*from);
                        e.attributes.insert(*to, a);
                    }
                }
            }
            ErdEdit::RelationPresence { relation, to, .. } => match to {
                Some(record) => self.insert_relation_record(record),
                None => {
                    self.remove_relation_raw(*relation);
                }
            },
            ErdEdit::Leg { relation, end, to, .. } => {
                if let Some(r) = self.relations.get_mut(relation) {
                    r.leg_mut(*end).flags = *to;
                }
            }
            ErdEdit::Route { to, .. } => self.restore_routes(std::slice::from_ref(to)),
            ErdEdit::XorGroups { entity, to, .. } => {
                if let Some(e) = self.entities.get_mut(entity) {
                    e.xor_groups = to.groups.clone();
                }
                self.restore_routes(&to.routes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erd::erd_models::Edge;
    use proptest::prelude::*;

    fn two_entities() -> (ErdDiagram, EntityUuid, EntityUuid) {
        let mut d = ErdDiagram::default();
        let a = d.add_entity("A", Transform::new(0.0, 0.0, 100.0, 60.0));
        let b = d.add_entity("B", Transform::new(300.0, 0.0, 100.0, 60.0));
        (d, a, b)
    }

    fn relate(d: &mut ErdDiagram, a: EntityUuid, b: EntityUuid) -> RelationUuid {
        d.add_relation(a, b, LegFlags::default(), LegFlags::default()).unwrap()
    }

    #[test]
    fn resize_undo_redo_is_exact() {
        let (mut d, a, b) = two_entities();
        relate(&mut d, a, b);
        let before = d.snapshot();

        assert!(d.resize_entity(a, Transform::new(0.0, 0.0, 150.0, 90.0)));
        let after = d.snapshot();
        assert_eq!(d.entity(&a).unwrap().transform(), Transform::new(0.0, 0.0, 150.0, 90.0));
        assert_ne!(before, after);

        assert!(d.undo());
        assert_eq!(d.entity(&a).unwrap().transform(), Transform::new(0.0, 0.0, 100.0, 60.0));
        assert_eq!(d.snapshot(), before);
        assert!(d.redo());
        assert_eq!(d.snapshot(), after);
    }

    #[test]
    fn resize_keeps_anchors_on_the_edge() {
        let (mut d, a, b) = two_entities();
        let r = relate(&mut d, a, b);
        assert!(d.resize_entity(a, Transform::new(0.0, 0.0, 150.0, 90.0)));
        let anchor = d.relation(&r).unwrap().source().anchor();
        assert_eq!(anchor.edge, Edge::Right);
        assert_eq!(anchor.point.x, 150.0);
    }

    #[test]
    fn resize_never_goes_below_minimum() {
        let (mut d, a, _) = two_entities();
        assert!(d.resize_entity(a, Transform::new(0.0, 0.0, 1.0, 1.0)));
        let t = d.entity(&a).unwrap().transform();
        assert_eq!((t.width, t.height), (60.0, 40.0));
    }

    #[test]
    fn drags_coalesce_until_sealed() {
        let (mut d, a, b) = two_entities();
        relate(&mut d, a, b);
        let depth = d.history().undo_log().len();
        let before = d.snapshot();
        for _ in 0..5 {
            assert!(d.translate_entity(a, Vec2::new(0.0, 10.0)));
        }
        assert_eq!(d.history().undo_log().len(), depth + 1);
        d.seal();
        assert!(d.translate_entity(a, Vec2::new(0.0, 10.0)));
        assert_eq!(d.history().undo_log().len(), depth + 2);

        assert!(d.undo());
        assert!(d.undo());
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn moving_an_entity_moves_its_legs() {
        let (mut d, a, b) = two_entities();
        let r = relate(&mut d, a, b);
        assert!(d.translate_entity(b, Vec2::new(100.0, 0.0)));
        let rel = d.relation(&r).unwrap();
        assert_eq!(rel.target().anchor().point, Pos2::new(400.0, 30.0));
        assert_eq!(rel.middle_point(), Pos2::new(250.0, 30.0));
    }

    #[test]
    fn delete_cascades_and_undoes_in_one_step() {
        let (mut d, a, b) = two_entities();
        let c = d.add_entity("C", Transform::new(0.0, 0.0, 60.0, 40.0));
        assert!(d.set_parent(c, Some(a)));
        relate(&mut d, a, b);
        relate(&mut d, c, b);
        let r3 = relate(&mut d, b, b);
        let before = d.snapshot();
        let depth = d.history().undo_log().len();

        assert!(d.delete_entity(a));
        assert_eq!(d.entities().count(), 1);
        assert_eq!(d.relations().count(), 1);
        assert!(d.relation(&r3).is_some());
        assert_eq!(d.entity(&b).unwrap().relation_legs().len(), 2);
        assert_eq!(d.history().undo_log().len(), depth + 1);

        assert!(d.undo());
        assert_eq!(d.snapshot(), before);
        assert!(d.redo());
        assert_eq!(d.entities().count(), 1);
    }

    #[test]
    fn provisional_relation_leaves_no_trace_when_cancelled() {
        let (mut d, a, _) = two_entities();
        let before = d.snapshot();
        let depth = d.history().undo_log().len();
        assert!(d.begin_relation(a));
        assert!(d.update_provisional(Pos2::new(200.0, 30.0)));
        let p = d.provisional_relation().unwrap();
        assert_eq!(p.source().anchor().edge, Edge::Right);
        assert_eq!(p.target().points()[0], Pos2::new(200.0, 30.0));
        assert!(d.cancel_interaction());
        assert!(d.provisional_relation().is_none());
        assert_eq!(d.snapshot(), before);
        assert_eq!(d.history().undo_log().len(), depth);
    }

    #[test]
    fn provisional_relation_completes_on_target() {
        let (mut d, a, b) = two_entities();
        assert!(d.begin_relation(a));
        assert!(d.update_provisional(Pos2::new(250.0, 30.0)));
        let r = d.complete_relation(b).unwrap();
        assert!(d.interaction().is_none());
        let rel = d.relation(&r).unwrap();
        assert_eq!(rel.target().entity(), Some(b));
        assert_eq!(rel.target().anchor_offset(), 0.0);
        assert_eq!(rel.target().anchor().point, Pos2::new(300.0, 30.0));
        assert!(d.entity(&b).unwrap().relation_legs().contains(&LegRef::new(r, LegEnd::Target)));
        assert!(d.complete_relation(b).is_none());
    }

    #[test]
    fn parent_assignment_rejects_cycles() {
        let (mut d, a, b) = two_entities();
        assert!(!d.set_parent(a, Some(a)));
        assert!(d.set_parent(b, Some(a)));
        assert!(!d.set_parent(a, Some(b)));
        assert!(d.begin_parent_assignment(a));
        assert!(!d.complete_parent_assignment(b));
        assert_eq!(d.entity(&a).unwrap().parent(), None);
    }

    #[test]
    fn nesting_grows_the_parent_and_keeps_the_child_inside() {
        let (mut d, a, b) = two_entities();
        let before = d.snapshot();
        assert!(d.set_parent(b, Some(a)));
        let child = d.entity(&b).unwrap().transform();
        assert_eq!((child.x, child.y), (300.0, 10.0));
        let parent = d.entity(&a).unwrap().transform();
        assert_eq!((parent.width, parent.height), (410.0, 80.0));
        assert_eq!(d.absolute_rect(b).unwrap().min, Pos2::new(300.0, 10.0));
        assert_eq!(d.entity_at(Pos2::new(320.0, 30.0)), Some(b));
        assert_eq!(d.entity_at(Pos2::new(50.0, 30.0)), Some(a));

        // children cannot be dragged out of the padded interior
        assert!(!d.translate_entity(b, Vec2::new(50.0, 0.0)));
        assert!(d.translate_entity(b, Vec2::new(-500.0, 0.0)));
        assert_eq!(d.entity(&b).unwrap().transform().x, 10.0);

        // the drag and the nesting undo separately
        assert!(d.undo());
        assert!(d.undo());
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn attributes_grow_the_entity() {
        let mut d = ErdDiagram::default();
        let e = d.add_entity("E", Transform::new(0.0, 0.0, 60.0, 40.0));
        for i in 0..4 {
            assert!(d.add_attribute(e, Attribute::new(format!("attribute_{i}"))));
        }
        let t = d.entity(&e).unwrap().transform();
        // 11 glyphs wide, 5 lines tall
        assert_eq!((t.width, t.height), (11.0 * 7.0 + 20.0, 5.0 * 18.0 + 20.0));

        assert!(d.move_attribute(e, 0, 3));
        assert_eq!(d.entity(&e).unwrap().attributes()[3].name, "attribute_0");
        assert!(d.undo());
        assert_eq!(d.entity(&e).unwrap().attributes()[0].name, "attribute_0");

        assert!(d.update_attribute(e, 0, Attribute::new("a")));
        assert!(d.update_attribute(e, 0, Attribute::new("ab")));
        assert!(d.undo());
        assert_eq!(d.entity(&e).unwrap().attributes()[0].name, "attribute_0");
        assert_eq!(d.remove_attribute(e, 0).unwrap().name, "attribute_0");
        assert_eq!(d.entity(&e).unwrap().attributes().len(), 3);
    }

    #[test]
    fn growing_rename_undoes_with_its_growth() {
        let mut d = ErdDiagram::default();
        let a = d.add_entity("A", Transform::new(0.0, 0.0, 60.0, 40.0));
        let depth = d.history().undo_log().len();

        assert!(d.rename_entity(a, "AVeryLongEntityNameIndeed"));
        assert_eq!(d.history().undo_log().len(), depth + 1);
        assert_eq!(d.entity(&a).unwrap().transform().width, 25.0 * 7.0 + 20.0);
        assert!(d.rename_entity(a, "AVeryLongEntityNameIndeedYes"));
        assert_eq!(d.history().undo_log().len(), depth + 1);

        assert!(d.undo());
        let e = d.entity(&a).unwrap();
        assert_eq!(e.name(), "A");
        assert!(e.transform().width >= d.min_size(a).x);
        assert_eq!(e.transform().width, 60.0);

        assert!(d.redo());
        let e = d.entity(&a).unwrap();
        assert_eq!(e.name(), "AVeryLongEntityNameIndeedYes");
        assert!(e.transform().width >= d.min_size(a).x);
    }

    #[test]
    fn growing_attribute_edit_undoes_with_its_growth() {
        let mut d = ErdDiagram::default();
        let e = d.add_entity("E", Transform::new(0.0, 0.0, 60.0, 40.0));
        assert!(d.add_attribute(e, Attribute::new("id")));
        let depth = d.history().undo_log().len();

        assert!(d.update_attribute(e, 0, Attribute::new("an_extremely_long_attribute_name")));
        assert_eq!(d.history().undo_log().len(), depth + 1);
        assert_eq!(d.entity(&e).unwrap().transform().width, 32.0 * 7.0 + 20.0);

        assert!(d.undo());
        let entity = d.entity(&e).unwrap();
        assert_eq!(entity.attributes()[0].name, "id");
        assert!(entity.transform().width >= d.min_size(e).x);
        assert_eq!(entity.transform().width, 60.0);
    }

    #[test]
    fn fit_to_content_is_a_step_of_its_own() {
        let mut d = ErdDiagram::default();
        let e = d.add_entity("E", Transform::new(0.0, 0.0, 60.0, 40.0));
        let depth = d.history().undo_log().len();

        assert!(d.resize_entity(e, Transform::new(0.0, 0.0, 200.0, 150.0)));
        assert!(d.fit_to_content(e));
        let t = d.entity(&e).unwrap().transform();
        assert_eq!(t.size(), d.min_size(e));
        assert_eq!((t.width, t.height), (60.0, 40.0));
        assert!(!d.fit_to_content(e));
        assert!(d.resize_entity(e, Transform::new(0.0, 0.0, 90.0, 90.0)));
        assert_eq!(d.history().undo_log().len(), depth + 3);

        assert!(d.undo());
        assert_eq!(d.entity(&e).unwrap().transform().size(), Vec2::new(60.0, 40.0));
        assert!(d.undo());
        assert_eq!(d.entity(&e).unwrap().transform().size(), Vec2::new(200.0, 150.0));
    }

    #[test]
    fn fit_to_content_wraps_the_children() {
        let (mut d, a, b) = two_entities();
        assert!(d.set_parent(b, Some(a)));
        assert!(d.resize_entity(a, Transform::new(0.0, 0.0, 600.0, 300.0)));
        assert!(d.fit_to_content(a));
        let t = d.entity(&a).unwrap().transform();
        // child at (300, 10) sized 100x60, plus the padding
        assert_eq!((t.width, t.height), (300.0 + 100.0 + 10.0, 10.0 + 60.0 + 10.0));
        assert_eq!(d.absolute_rect(b).unwrap().min, Pos2::new(300.0, 10.0));
    }

    #[test]
    fn xor_groups_form_merge_and_dissolve() {
        let mut d = ErdDiagram::default();
        let hub = d.add_entity("Hub", Transform::new(0.0, 0.0, 100.0, 300.0));
        let mut legs = Vec::new();
        for i in 0..3 {
            let other = d.add_entity(format!("O{i}"), Transform::new(300.0, i as f32 * 100.0, 60.0, 40.0));
            legs.push(LegRef::new(relate(&mut d, hub, other), LegEnd::Source));
        }
        let before = d.snapshot();

        assert!(d.xor_legs(legs[0], legs[1]));
        assert!(!d.xor_legs(legs[0], legs[1]));
        assert!(d.xor_legs(legs[2], legs[0]));
        let groups = d.entity(&hub).unwrap().xor_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].legs.len(), 3);

        assert!(d.leave_xor(legs[0]));
        assert!(d.leave_xor(legs[1]));
        assert!(d.entity(&hub).unwrap().xor_groups().is_empty());
        assert_eq!(d.relation(&legs[2].relation).unwrap().source().anchor_offset(), 0.0);

        for _ in 0..4 {
            assert!(d.undo());
        }
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn deleting_a_grouped_relation_dissolves_the_pair() {
        let mut d = ErdDiagram::default();
        let hub = d.add_entity("Hub", Transform::new(0.0, 0.0, 100.0, 300.0));
        let o1 = d.add_entity("O1", Transform::new(300.0, 0.0, 60.0, 40.0));
        let o2 = d.add_entity("O2", Transform::new(300.0, 200.0, 60.0, 40.0));
        let r1 = relate(&mut d, hub, o1);
        let r2 = relate(&mut d, hub, o2);
        assert!(d.xor_legs(LegRef::new(r1, LegEnd::Source), LegRef::new(r2, LegEnd::Source)));
        let before = d.snapshot();

        assert!(d.delete_relation(r1));
        assert!(d.entity(&hub).unwrap().xor_groups().is_empty());
        assert_eq!(d.relation(&r2).unwrap().source().anchor_offset(), 0.0);
        assert!(d.undo());
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn xor_needs_legs_on_one_entity() {
        let (mut d, a, b) = two_entities();
        let r1 = relate(&mut d, a, b);
        let r2 = relate(&mut d, a, b);
        assert!(!d.xor_legs(LegRef::new(r1, LegEnd::Source), LegRef::new(r2, LegEnd::Target)));
        assert!(!d.xor_legs(LegRef::new(r1, LegEnd::Source), LegRef::new(r1, LegEnd::Target)));
    }

    #[test]
    fn waypoints_snap_and_stay_put() {
        let (mut d, a, b) = two_entities();
        let r = relate(&mut d, a, b);
        // source leg runs (120,30) to (200,30)
        assert!(!d.insert_point_near(r, Pos2::new(160.0, 60.0)));
        assert!(d.insert_point_near(r, Pos2::new(160.0, 32.0)));
        let rel = d.relation(&r).unwrap();
        assert!(rel.source().points_manual());
        assert!(rel.has_manual_points());
        assert_eq!(rel.source().points().len(), 3);

        assert!(d.move_point(r, LegEnd::Source, 1, Pos2::new(163.0, 80.0)));
        assert!(d.move_point(r, LegEnd::Source, 1, Pos2::new(160.0, 35.0)));
        assert_eq!(d.relation(&r).unwrap().source().points()[1], Pos2::new(160.0, 30.0));
        assert_eq!(d.history().undo_log().len(), 5);

        assert!(d.move_point(r, LegEnd::Source, 1, Pos2::new(160.0, 80.0)));
        assert!(d.translate_entity(b, Vec2::new(0.0, 5.0)));
        let rel = d.relation(&r).unwrap();
        assert_eq!(rel.source().points()[1], Pos2::new(160.0, 80.0));

        assert!(d.remove_point(r, LegEnd::Source, 1));
        assert!(!d.relation(&r).unwrap().source().points_manual());
    }

    #[test]
    fn straighten_drops_manual_points() {
        let (mut d, a, b) = two_entities();
        let r = relate(&mut d, a, b);
        let original = d.route_of(r).unwrap();
        assert!(d.insert_point(r, LegEnd::Target, 1, Pos2::new(250.0, 100.0)));
        assert!(d.move_anchor(r, LegEnd::Source, Pos2::new(100.0, 12.0)));
        assert!(d.straighten(r));
        assert_eq!(d.route_of(r).unwrap(), original);
        assert!(!d.straighten(r));
    }

    #[test]
    fn manual_middle_point_is_kept_until_reset() {
        let (mut d, a, b) = two_entities();
        let r = relate(&mut d, a, b);
        assert!(d.move_middle(r, Pos2::new(200.0, 120.0)));
        assert!(d.translate_entity(b, Vec2::new(40.0, 0.0)));
        let rel = d.relation(&r).unwrap();
        assert_eq!(rel.middle_point(), Pos2::new(200.0, 120.0));
        assert_eq!(*rel.source().points().last().unwrap(), Pos2::new(200.0, 120.0));
        assert!(d.reset_middle(r));
        assert_eq!(d.relation(&r).unwrap().middle_point(), Pos2::new(220.0, 30.0));
    }

    #[test]
    fn leg_flags_toggle_and_undo() {
        let (mut d, a, b) = two_entities();
        let r = relate(&mut d, a, b);
        assert!(d.set_cardinality(r, LegEnd::Target, Cardinality::Many));
        assert!(d.toggle_identifying(r, LegEnd::Target));
        assert!(d.toggle_optional(r, LegEnd::Source));
        let rel = d.relation(&r).unwrap();
        assert_eq!(rel.target().cardinality(), Cardinality::Many);
        assert!(rel.target().identifying());
        assert!(rel.source().optional());
        assert!(d.undo());
        assert!(!d.relation(&r).unwrap().source().optional());
        assert_eq!(&*d.history().redo_log()[0].info_text(), "Change relation leg");
    }

    #[test]
    fn rename_coalesces() {
        let (mut d, a, _) = two_entities();
        assert!(d.rename_entity(a, "Cu"));
        assert!(d.rename_entity(a, "Customer"));
        assert!(!d.rename_entity(a, "Customer"));
        assert!(d.undo());
        assert_eq!(d.entity(&a).unwrap().name(), "A");
    }

    #[test]
    fn explicit_transaction_is_one_step() {
        let (mut d, a, b) = two_entities();
        let before = d.snapshot();
        d.begin();
        d.translate_entity(a, Vec2::new(0.0, 200.0));
        relate(&mut d, a, b);
        d.rename_entity(b, "Order");
        d.commit();
        assert!(d.undo());
        assert_eq!(d.snapshot(), before);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Move(usize, f32, f32),
        Resize(usize, f32, f32),
        Relate(usize, usize),
        Delete(usize),
        Nest(usize, usize),
        Straighten(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4, -80.0f32..80.0, -80.0f32..80.0).prop_map(|(i, x, y)| Op::Move(i, x, y)),
            (0usize..4, 60.0f32..200.0, 40.0f32..200.0).prop_map(|(i, w, h)| Op::Resize(i, w, h)),
            (0usize..4, 0usize..4).prop_map(|(a, b)| Op::Relate(a, b)),
            (0usize..4).prop_map(Op::Delete),
            (0usize..4, 0usize..4).prop_map(|(a, b)| Op::Nest(a, b)),
            (0usize..4).prop_map(Op::Straighten),
        ]
    }

    proptest! {
        #[test]
        fn undo_then_redo_restores_every_state(ops in proptest::collection::vec(op(), 1..12)) {
            let mut d = ErdDiagram::default();
            for i in 0..4 {
                d.add_entity(format!("E{i}"), Transform::new(i as f32 * 200.0, (i % 2) as f32 * 150.0, 80.0, 50.0));
            }
            d.history.clear();
            let mut states = vec![d.snapshot()];
            for op in ops {
                let ids: Vec<EntityUuid> = d.entities.keys().collect();
                let rels: Vec<RelationUuid> = d.relations.keys().collect();
                let pick = |i: usize| ids.get(i % ids.len().max(1)).copied();
                let changed = match op {
                    Op::Move(i, x, y) => pick(i).is_some_and(|e| d.translate_entity(e, Vec2::new(x, y))),
                    Op::Resize(i, w, h) => pick(i).is_some_and(|e| {
                        let t = d.entity(&e).unwrap().transform();
                        d.resize_entity(e, Transform { width: w, height: h, ..t })
                    }),
                    Op::Relate(a, b) => match (pick(a), pick(b)) {
                        (Some(a), Some(b)) => d.add_relation(a, b, LegFlags::default(), LegFlags::default()).is_some(),
                        _ => false,
                    },
                    Op::Delete(i) => pick(i).is_some_and(|e| d.delete_entity(e)),
                    Op::Nest(a, b) => match (pick(a), pick(b)) {
                        (Some(a), Some(b)) => d.set_parent(a, Some(b)),
                        _ => false,
                    },
                    Op::Straighten(i) => rels.get(i % rels.len().max(1)).is_some_and(|r| d.straighten(*r)),
                };
                d.seal();
                if changed {
                    states.push(d.snapshot());
                }
            }

            let steps = states.len() - 1;
            for i in (0..steps).rev() {
                prop_assert!(d.undo());
                prop_assert_eq!(&d.snapshot(), &states[i]);
            }
            prop_assert!(!d.undo());
            for state in states.iter().skip(1) {
                prop_assert!(d.redo());
                prop_assert_eq!(&d.snapshot(), state);
            }
        }
    }
}
