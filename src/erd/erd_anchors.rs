use egui::{Pos2, Rect};

use crate::common::config::AnchorConfig;
use crate::common::geometry::{midpoint, point_to_line_distance, point_to_point_distance};
use crate::common::uuid::{EntityUuid, RelationUuid};
use crate::erd::erd_controllers::ErdDiagram;
use crate::erd::erd_models::{Anchor, Edge, LegEnd, Relation};

/// A free spot on one edge of an entity and how much room it has.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgePosition {
    pub point: Pos2,
    pub edge: Edge,
    pub distance: f32,
}

/// Picks a coordinate in `[lo, hi]` for a new anchor.
///
/// The usable range is shrunk by `padding` on both ends, those two ends act as sentinels and
/// every occupied coordinate splits the range further. The new anchor goes to the middle of
/// the widest interval. If that still leaves less than `min_clearance` to a neighbour, the
/// anchor moves next to a corner instead: the interval at the far end wins unless the one at
/// the near end is strictly wider.
///
/// Returns the coordinate and its clearance.
pub fn place_on_edge(lo: f32, hi: f32, padding: f32, occupied: &[f32], min_clearance: f32) -> (f32, f32) {
    let start = lo + padding;
    let end = hi - padding;
    if end <= start {
        return ((lo + hi) / 2.0, 0.0);
    }

    let mut stops: Vec<f32> = occupied.iter().map(|p| p.clamp(start, end)).collect();
    stops.push(start);
    stops.push(end);
    stops.sort_by(|a, b| a.total_cmp(b));

    let mut best = (start, end);
    let mut best_gap = f32::NEG_INFINITY;
    for w in stops.windows(2) {
        let gap = w[1] - w[0];
        if gap > best_gap {
            best_gap = gap;
            best = (w[0], w[1]);
        }
    }

    let clearance = best_gap / 2.0;
    if clearance >= min_clearance || occupied.is_empty() {
        return ((best.0 + best.1) / 2.0, clearance);
    }

    let n = stops.len();
    let near = ((stops[0] + stops[1]) / 2.0, (stops[1] - stops[0]) / 2.0);
    let far = ((stops[n - 2] + stops[n - 1]) / 2.0, (stops[n - 1] - stops[n - 2]) / 2.0);
    if near.1 > far.1 {
        near
    } else {
        far
    }
}

pub(crate) fn reproject(point: Pos2, rect: &Rect, edge: Edge, padding: f32) -> Pos2 {
    let (lo, hi) = edge.span(rect);
    let (start, end) = (lo + padding, hi - padding);
    let along = if end > start {
        edge.along(point).clamp(start, end)
    } else {
        (lo + hi) / 2.0
    };
    edge.point_at(rect, along)
}

/// Edge of `rect` closest to `p`, earlier edges win ties.
pub(crate) fn nearest_edge(rect: &Rect, p: Pos2) -> Edge {
    let mut best = (f32::INFINITY, Edge::Top);
    for edge in Edge::ALL {
        let (lo, hi) = edge.span(rect);
        let d = point_to_line_distance(p, edge.point_at(rect, lo), edge.point_at(rect, hi));
        if d < best.0 {
            best = (d, edge);
        }
    }
    best.1
}

fn elbow(edge: Edge, from: Pos2, to: Pos2) -> Option<Pos2> {
    const DEGENERATE: f32 = 0.01;
    let corner = if edge.runs_along_x() {
        Pos2::new(from.x, to.y)
    } else {
        Pos2::new(to.x, from.y)
    };
    if point_to_point_distance(corner, from) < DEGENERATE || point_to_point_distance(corner, to) < DEGENERATE {
        None
    } else {
        Some(corner)
    }
}

/// Rebuilds the route points of both legs from their anchors.
///
/// Automatic legs leave their edge perpendicularly and turn at most once to reach the middle
/// point. Manual legs only get their first and last point refreshed.
pub(crate) fn route_legs(config: &AnchorConfig, relation: &mut Relation) {
    let stub = if relation.is_recursive() {
        config.self_relation_offset
    } else {
        config.leg_stub
    };

    for end in [LegEnd::Source, LegEnd::Target] {
        let leg = relation.leg_mut(end);
        let p0 = leg.anchor.point + leg.anchor.edge.normal() * (stub + leg.anchor_offset);
        if leg.points.len() < 2 {
            leg.points = vec![p0, p0];
        } else {
            leg.points[0] = p0;
        }
    }

    if !relation.middle_manual {
        relation.middle_point = if relation.is_recursive() {
            Pos2::new(relation.target.points[0].x, relation.source.points[0].y)
        } else {
            midpoint(relation.source.last_route_point(), relation.target.last_route_point())
        };
    }

    let middle = relation.middle_point;
    for end in [LegEnd::Source, LegEnd::Target] {
        let leg = relation.leg_mut(end);
        if leg.points_manual {
            if let Some(last) = leg.points.last_mut() {
                *last = middle;
            }
        } else {
            let p0 = leg.points[0];
            leg.points = match elbow(leg.anchor.edge, p0, middle) {
                Some(corner) => vec![p0, corner, middle],
                None => vec![p0, middle],
            };
        }
    }
}

impl ErdDiagram {
    /// Best free spot on `edge` of `entity`, ignoring the legs of `exclude`.
    pub fn edge_position(&self, entity: EntityUuid, edge: Edge, exclude: Option<RelationUuid>) -> Option<EdgePosition> {
        let e = self.entities.get(&entity)?;
        let rect = self.absolute_rect(entity)?;
        let (lo, hi) = edge.span(&rect);
        let occupied: Vec<f32> = e
            .relation_legs
            .iter()
            .filter(|l| Some(l.relation) != exclude)
            .filter_map(|l| self.relations.get(&l.relation).map(|r| r.leg(l.end).anchor))
            .filter(|a| a.edge == edge)
            .map(|a| edge.along(a.point))
            .collect();
        let config = &self.config.anchors;
        let (along, distance) = place_on_edge(lo, hi, config.edge_padding, &occupied, config.min_clearance);
        Some(EdgePosition {
            point: edge.point_at(&rect, along),
            edge,
            distance,
        })
    }

    fn propose(&self, entity: EntityUuid, edge: Edge, current: Anchor, relation: RelationUuid, recompute: bool, rect: &Rect) -> Pos2 {
        if !recompute && current.edge == edge {
            return reproject(current.point, rect, edge, self.config.anchors.edge_padding);
        }
        self.edge_position(entity, edge, Some(relation))
            .map(|p| p.point)
            .unwrap_or(current.point)
    }

    /// Chooses the edge pair and anchor points of both legs, then reroutes the relation.
    ///
    /// With `recompute` unset a leg whose current edge stays eligible keeps its anchor.
    pub fn reset_anchors(&mut self, id: RelationUuid, recompute: bool) {
        let Some(relation) = self.relations.get(&id) else {
            return;
        };
        let (Some(a), Some(b)) = (relation.source.entity, relation.target.entity) else {
            return;
        };
        let (current_source, current_target) = (relation.source.anchor, relation.target.anchor);

        let (source, target) = if a == b {
            let Some(rect) = self.absolute_rect(a) else {
                return;
            };
            (
                Anchor {
                    point: self.propose(a, Edge::Bottom, current_source, id, recompute, &rect),
                    edge: Edge::Bottom,
                },
                Anchor {
                    point: self.propose(a, Edge::Left, current_target, id, recompute, &rect),
                    edge: Edge::Left,
                },
            )
        } else {
            let (Some(ra), Some(rb)) = (self.absolute_rect(a), self.absolute_rect(b)) else {
                return;
            };
            let horizontal = ra.right() < rb.left() || rb.right() < ra.left();
            let vertical = ra.bottom() < rb.top() || rb.bottom() < ra.top();
            let allowed = |s: Edge, t: Edge| {
                if !horizontal && !vertical {
                    return true;
                }
                (horizontal
                    && ((ra.right() < rb.left() && s == Edge::Right && t == Edge::Left)
                        || (rb.right() < ra.left() && s == Edge::Left && t == Edge::Right)))
                    || (vertical
                        && ((ra.bottom() < rb.top() && s == Edge::Bottom && t == Edge::Top)
                            || (rb.bottom() < ra.top() && s == Edge::Top && t == Edge::Bottom)))
            };

            let mut source_proposals: [Option<Pos2>; 4] = [None; 4];
            let mut target_proposals: [Option<Pos2>; 4] = [None; 4];
            let mut best: Option<(f32, Anchor, Anchor)> = None;
            for (i, es) in Edge::ALL.into_iter().enumerate() {
                for (j, et) in Edge::ALL.into_iter().enumerate() {
                    if !allowed(es, et) {
                        continue;
                    }
                    let ps = *source_proposals[i]
                        .get_or_insert_with(|| self.propose(a, es, current_source, id, recompute, &ra));
                    let pt = *target_proposals[j]
                        .get_or_insert_with(|| self.propose(b, et, current_target, id, recompute, &rb));
                    let d = point_to_point_distance(ps, pt);
                    if best.map_or(true, |b| d < b.0) {
                        best = Some((d, Anchor { point: ps, edge: es }, Anchor { point: pt, edge: et }));
                    }
                }
            }
            let Some((_, s, t)) = best else {
                return;
            };
            (s, t)
        };

        if let Some(r) = self.relations.get_mut(&id) {
            r.source.anchor = source;
            r.target.anchor = target;
        }
        self.route_relation(id);
    }

    pub(crate) fn route_relation(&mut self, id: RelationUuid) {
        let config = &self.config.anchors;
        if let Some(r) = self.relations.get_mut(&id) {
            route_legs(config, r);
        }
    }

    pub(crate) fn aim_provisional(&self, relation: &mut Relation, pos: Pos2) {
        let Some(source) = relation.source.entity else {
            return;
        };
        let mut best: Option<(f32, EdgePosition)> = None;
        for edge in Edge::ALL {
            if let Some(ep) = self.edge_position(source, edge, Some(relation.uuid)) {
                let d = point_to_point_distance(ep.point, pos);
                if best.map_or(true, |b| d < b.0) {
                    best = Some((d, ep));
                }
            }
        }
        let Some((_, ep)) = best else {
            return;
        };
        relation.source.anchor = Anchor { point: ep.point, edge: ep.edge };
        relation.target.anchor = Anchor { point: pos, edge: ep.edge.opposite() };
        relation.target.anchor_offset = -self.config.anchors.leg_stub;
        route_legs(&self.config.anchors, relation);
    }
}
