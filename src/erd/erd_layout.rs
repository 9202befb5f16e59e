use std::collections::HashMap;

use egui::Vec2;

use crate::common::config::LayoutConfig;
use crate::common::geometry::VectorExt;
use crate::common::uuid::EntityUuid;
use crate::erd::erd_controllers::{ErdDiagram, ErdEdit};

/// Outcome of one run of the spring embedder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutReport {
    pub iterations: usize,
    /// Sum of force magnitudes over all top-level entities, per iteration.
    pub force_per_iteration: Vec<f32>,
    /// Total distance moved by top-level entities, including the final shift to the origin.
    pub displacement: f32,
}

impl ErdDiagram {
    /// Lays out the diagram with the configured settings. Undoes as one step.
    pub fn sort(&mut self) -> LayoutReport {
        let config = self.config.layout.clone();
        self.sort_with(&config)
    }

    /// Force-directed layout of the top-level entities.
    ///
    /// Relations pull their endpoints towards `optimal_length` and towards axis-aligned runs,
    /// nearby entities push each other apart. Nested entities ride along with their root.
    pub fn sort_with(&mut self, config: &LayoutConfig) -> LayoutReport {
        let roots: Vec<EntityUuid> = self
            .entities
            .iter()
            .filter(|(_, e)| e.parent.is_none())
            .map(|(id, _)| id)
            .collect();
        let mut report = LayoutReport::default();
        if roots.is_empty() {
            return report;
        }

        let before: Vec<_> = roots.iter().filter_map(|r| self.frame_of(*r)).collect();

        for _ in 0..config.iterations {
            let forces = self.layout_forces(&roots, config);
            report.force_per_iteration.push(roots.iter().map(|r| forces[r].length()).sum());
            report.iterations += 1;
            for root in &roots {
                let delta = forces[root] * config.apply_scale;
                if delta != Vec2::ZERO && delta.x.is_finite() && delta.y.is_finite() {
                    self.translate_raw(*root, delta);
                    report.displacement += delta.length();
                }
            }
        }

        let min = roots
            .iter()
            .filter_map(|r| self.absolute_rect(*r))
            .map(|r| r.min)
            .reduce(|a, b| a.min(b));
        if let Some(min) = min {
            let shift = Vec2::from(config.origin) - min.to_vec2();
            if shift != Vec2::ZERO {
                for root in &roots {
                    self.translate_raw(*root, shift);
                    report.displacement += shift.length();
                }
            }
        }

        self.history.begin();
        for (root, from) in roots.iter().zip(before) {
            let Some(to) = self.frame_of(*root) else {
                continue;
            };
            if to.transform != from.transform {
                self.history.record(ErdEdit::MoveEntity { entity: *root, from, to }, false);
            }
        }
        self.history.commit();

        tracing::debug!(
            iterations = report.iterations,
            displacement = report.displacement,
            final_force = report.force_per_iteration.last().copied().unwrap_or(0.0),
            "layout finished"
        );
        report
    }

    fn layout_forces(&self, roots: &[EntityUuid], config: &LayoutConfig) -> HashMap<EntityUuid, Vec2> {
        let mut forces: HashMap<EntityUuid, Vec2> = roots.iter().map(|r| (*r, Vec2::ZERO)).collect();
        let optimal = config.optimal_length;

        for (_, r) in self.relations.iter() {
            let (Some(a), Some(b)) = (r.source.entity, r.target.entity) else {
                continue;
            };
            let (ra, rb) = (self.root_of(a), self.root_of(b));
            if ra == rb {
                continue;
            }
            let v = r.target.anchor.point - r.source.anchor.point;
            let length = v.length();
            if length == 0.0 {
                continue;
            }

            let attraction = v * (0.5 * config.attraction_scale * (length - optimal) / length);
            *forces.entry(ra).or_default() += attraction;
            *forces.entry(rb).or_default() -= attraction;

            if r.has_manual_points() || optimal <= 0.0 {
                continue;
            }
            // the minor axis component, which a straight run would not have
            let misalignment = if v.x.abs() >= v.y.abs() {
                Vec2::new(0.0, v.y)
            } else {
                Vec2::new(v.x, 0.0)
            };
            let strength = config.straighten_scale * (optimal - misalignment.length()).max(0.0) / optimal;
            let straighten = misalignment * (0.5 * strength);
            *forces.entry(ra).or_default() += straighten;
            *forces.entry(rb).or_default() -= straighten;
        }

        let reach = optimal * config.repulsion_distance_scale;
        let centers: Vec<_> = roots
            .iter()
            .filter_map(|r| self.absolute_rect(*r).map(|rect| (*r, rect.center())))
            .collect();
        for (i, (a, ca)) in centers.iter().enumerate() {
            for (b, cb) in &centers[i + 1..] {
                let d = *cb - *ca;
                let distance = d.length();
                if distance == 0.0 || distance >= reach {
                    continue;
                }
                let push = d.normalized_or_zero() * (config.repulsion_scale / (distance * distance));
                *forces.entry(*a).or_default() -= push;
                *forces.entry(*b).or_default() += push;
            }
        }

        forces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erd::erd_models::{LegFlags, Transform};
    use egui::Pos2;
    use proptest::prelude::*;

    fn pair(gap: f32) -> (ErdDiagram, EntityUuid, EntityUuid) {
        let mut d = ErdDiagram::default();
        let a = d.add_entity("A", Transform::new(0.0, 0.0, 100.0, 60.0));
        let b = d.add_entity("B", Transform::new(100.0 + gap, 0.0, 100.0, 60.0));
        d.add_relation(a, b, LegFlags::default(), LegFlags::default());
        (d, a, b)
    }

    fn gap(d: &ErdDiagram, a: EntityUuid, b: EntityUuid) -> f32 {
        d.absolute_rect(b).unwrap().left() - d.absolute_rect(a).unwrap().right()
    }

    #[test]
    fn distant_pair_is_pulled_together() {
        let (mut d, a, b) = pair(300.0);
        let report = d.sort();
        assert_eq!(report.iterations, 100);
        assert_eq!(report.force_per_iteration.len(), 100);
        let tail = &report.force_per_iteration[50..];
        for w in tail.windows(2) {
            assert!(w[1] <= w[0] + 1e-3, "force grew from {} to {}", w[0], w[1]);
        }
        assert!(report.force_per_iteration[99] < report.force_per_iteration[0]);
        let g = gap(&d, a, b);
        assert!(g > 80.0 && g < 160.0, "gap {g}");
    }

    #[test]
    fn result_is_moved_to_the_origin() {
        let (mut d, a, b) = pair(300.0);
        d.translate_entity(a, Vec2::new(500.0, 400.0));
        d.translate_entity(b, Vec2::new(500.0, 400.0));
        d.sort();
        let ra = d.absolute_rect(a).unwrap();
        let rb = d.absolute_rect(b).unwrap();
        assert!((ra.min.x.min(rb.min.x) - 10.0).abs() < 1e-3);
        assert!((ra.min.y.min(rb.min.y) - 10.0).abs() < 1e-3);
    }

    #[test]
    fn second_run_moves_less() {
        let (mut d, _, _) = pair(400.0);
        let first = d.sort();
        let second = d.sort();
        assert!(second.displacement < first.displacement);
    }

    #[test]
    fn layout_is_one_undo_step() {
        let (mut d, _, _) = pair(300.0);
        let before = d.snapshot();
        let depth = d.history().undo_log().len();
        d.sort();
        assert_eq!(d.history().undo_log().len(), depth + 1);
        assert!(d.undo());
        assert_eq!(d.snapshot(), before);
    }

    #[test]
    fn crowded_entities_push_apart() {
        let mut d = ErdDiagram::default();
        let a = d.add_entity("A", Transform::new(0.0, 0.0, 60.0, 40.0));
        let b = d.add_entity("B", Transform::new(70.0, 0.0, 60.0, 40.0));
        let config = LayoutConfig { iterations: 20, ..Default::default() };
        d.sort_with(&config);
        let ca = d.absolute_rect(a).unwrap().center();
        let cb = d.absolute_rect(b).unwrap().center();
        assert!(cb.x - ca.x > 70.0);
        assert_eq!(ca.y, cb.y);
    }

    #[test]
    fn degenerate_input_does_not_move_anything() {
        let mut d = ErdDiagram::default();
        let report = d.sort();
        assert_eq!(report, LayoutReport::default());

        // coincident centres and a zero-length relation produce no force
        let a = d.add_entity("A", Transform::new(10.0, 10.0, 60.0, 40.0));
        let b = d.add_entity("B", Transform::new(10.0, 10.0, 60.0, 40.0));
        d.add_relation(a, b, LegFlags::default(), LegFlags::default());
        let report = d.sort();
        assert_eq!(report.displacement, 0.0);
        assert!(report.force_per_iteration.iter().all(|f| *f == 0.0));
        assert_eq!(d.absolute_rect(a).unwrap().min, Pos2::new(10.0, 10.0));
    }

    #[test]
    fn nested_entities_travel_with_their_root() {
        let (mut d, a, b) = pair(300.0);
        let c = d.add_entity("C", Transform::new(0.0, 0.0, 60.0, 40.0));
        assert!(d.set_parent(c, Some(b)));
        let local = d.entity(&c).unwrap().transform();
        let start = d.absolute_rect(b).unwrap().min;
        d.add_relation(a, c, LegFlags::default(), LegFlags::default());
        d.sort();
        assert_eq!(d.entity(&c).unwrap().transform(), local);
        assert_ne!(d.absolute_rect(b).unwrap().min, start);
    }

    proptest! {
        #[test]
        fn force_settles_for_a_related_pair(gap in 150.0f32..600.0) {
            let (mut d, _, _) = pair(gap);
            let report = d.sort();
            let tail = &report.force_per_iteration[50..];
            for w in tail.windows(2) {
                prop_assert!(w[1] <= w[0] + 1e-3);
            }
        }
    }
}
