use std::collections::{BTreeMap, HashMap};

use egui::Pos2;
use serde::{Deserialize, Serialize};

use crate::common::config::ErdConfig;
use crate::common::error::{ErdError, Result};
use crate::common::uuid::{EntityUuid, RelationUuid};
use crate::erd::erd_controllers::ErdDiagram;
use crate::erd::erd_models::{Attribute, Cardinality, Entity, LegEnd, LegFlags, LegRef, Relation, Transform, XorGroup};

/// Plain, name-keyed form of a diagram for storage and exchange.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagramData {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityData>,
    #[serde(default, rename = "relation")]
    pub relations: Vec<RelationData>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub name: String,
    /// Relative to the parent, if any.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, rename = "attribute", skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationData {
    /// Only present when the middle point was placed by hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle: Option<[f32; 2]>,
    pub source: LegData,
    pub target: LegData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegData {
    pub entity: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub identifying: bool,
    #[serde(default)]
    pub optional: bool,
    /// Index of the XOR group on `entity` this leg belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xor: Option<usize>,
}

impl ErdDiagram {
    pub fn to_data(&self) -> DiagramData {
        let name_of = |id: EntityUuid| self.entities.get(&id).map(|e| e.name.clone());
        let entities = self
            .entities()
            .map(|e| EntityData {
                name: e.name.clone(),
                x: e.transform.x,
                y: e.transform.y,
                width: e.transform.width,
                height: e.transform.height,
                parent: e.parent.and_then(name_of),
                attributes: e.attributes.clone(),
            })
            .collect();

        let leg_data = |relation: &Relation, end: LegEnd| {
            let leg = relation.leg(end);
            let entity = leg.entity.and_then(|id| self.entities.get(&id))?;
            Some(LegData {
                entity: entity.name.clone(),
                cardinality: leg.flags.cardinality,
                identifying: leg.flags.identifying,
                optional: leg.flags.optional,
                xor: entity.xor_group_of(&LegRef::new(relation.uuid, end)),
            })
        };
        let relations = self
            .relations()
            .filter_map(|r| {
                Some(RelationData {
                    source: leg_data(r, LegEnd::Source)?,
                    target: leg_data(r, LegEnd::Target)?,
                    middle: r.middle_manual.then(|| [r.middle_point.x, r.middle_point.y]),
                })
            })
            .collect();

        DiagramData { entities, relations }
    }

    /// Builds a diagram from plain data. Anchors and routes are computed fresh and the
    /// history starts empty.
    pub fn from_data(data: &DiagramData, config: ErdConfig) -> Result<Self> {
        let mut diagram = ErdDiagram::new(config);
        let mut ids: HashMap<&str, EntityUuid> = HashMap::new();
        let mut order: Vec<EntityUuid> = Vec::with_capacity(data.entities.len());

        for e in &data.entities {
            if ids.contains_key(e.name.as_str()) {
                return Err(ErdError::DuplicateEntity { name: e.name.clone() });
            }
            let id = EntityUuid::now_v7();
            let mut entity = Entity::new(id, e.name.clone(), Transform::new(e.x, e.y, e.width, e.height));
            entity.attributes = e.attributes.clone();
            diagram.entities.push(id, entity);
            ids.insert(e.name.as_str(), id);
            order.push(id);
        }

        let lookup = |name: &str, referrer: String| {
            ids.get(name).copied().ok_or_else(|| ErdError::UnknownEntity {
                name: name.to_owned(),
                referrer,
            })
        };

        let mut parents: HashMap<EntityUuid, EntityUuid> = HashMap::new();
        for (e, child) in data.entities.iter().zip(&order) {
            let Some(parent) = &e.parent else {
                continue;
            };
            let parent_id = lookup(parent, format!("the parent of `{}`", e.name))?;
            let mut current = Some(parent_id);
            while let Some(c) = current {
                if c == *child {
                    return Err(ErdError::CyclicParent {
                        name: e.name.clone(),
                        parent: parent.clone(),
                    });
                }
                current = parents.get(&c).copied();
            }
            parents.insert(*child, parent_id);
        }
        for child in &order {
            let Some(parent) = parents.get(child).copied() else {
                continue;
            };
            if let Some(pe) = diagram.entities.get_mut(&parent) {
                pe.children.push(*child);
            }
            if let Some(ce) = diagram.entities.get_mut(child) {
                ce.parent = Some(parent);
            }
        }

        let mut groups: BTreeMap<(EntityUuid, usize), Vec<LegRef>> = BTreeMap::new();
        let mut middles: Vec<(RelationUuid, Pos2)> = Vec::new();
        for (i, r) in data.relations.iter().enumerate() {
            let referrer = format!("relation #{i}");
            let source = lookup(&r.source.entity, referrer.clone())?;
            let target = lookup(&r.target.entity, referrer)?;
            let Some(id) = diagram.add_relation(source, target, r.source.flags(), r.target.flags()) else {
                continue;
            };
            for (end, leg, entity) in [(LegEnd::Source, &r.source, source), (LegEnd::Target, &r.target, target)] {
                if let Some(index) = leg.xor {
                    groups.entry((entity, index)).or_default().push(LegRef::new(id, end));
                }
            }
            if let Some([x, y]) = r.middle {
                middles.push((id, Pos2::new(x, y)));
            }
        }

        for ((entity, index), legs) in groups {
            let Some(e) = diagram.entities.get_mut(&entity) else {
                continue;
            };
            if legs.len() < 2 {
                return Err(ErdError::InvalidXorGroup {
                    entity: e.name.clone(),
                    index,
                    found: legs.len(),
                });
            }
            e.xor_groups.push(XorGroup {
                legs: legs.into_iter().collect(),
            });
        }
        let grouped: Vec<EntityUuid> = diagram
            .entities
            .iter()
            .filter(|(_, e)| !e.xor_groups.is_empty())
            .map(|(id, _)| id)
            .collect();
        for entity in grouped {
            diagram.refresh_xor_offsets(entity);
        }
        for (id, middle) in middles {
            diagram.move_middle(id, middle);
        }

        // stored sizes may predate the current content or measure
        let mut deepest_first: Vec<EntityUuid> = diagram.entities.keys().collect();
        deepest_first.sort_by_key(|id| std::cmp::Reverse(diagram.depth_of(*id)));
        for id in deepest_first {
            let min = diagram.min_size(id);
            let Some(t) = diagram.entities.get(&id).map(|e| e.transform) else {
                continue;
            };
            if t.width < min.x || t.height < min.y {
                diagram.resize_raw(id, Transform { width: t.width.max(min.x), height: t.height.max(min.y), ..t });
            }
        }

        diagram.history.clear();
        tracing::debug!(
            entities = diagram.entities.len(),
            relations = diagram.relations.len(),
            "diagram imported"
        );
        Ok(diagram)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(&self.to_data())?)
    }

    pub fn from_toml_str(s: &str, config: ErdConfig) -> Result<Self> {
        let data: DiagramData = toml::from_str(s)?;
        Self::from_data(&data, config)
    }

    pub fn load(path: impl AsRef<std::path::Path>, config: ErdConfig) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ErdError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s, config)
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?).map_err(|source| ErdError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl LegData {
    fn flags(&self) -> LegFlags {
        LegFlags {
            cardinality: self.cardinality,
            identifying: self.identifying,
            optional: self.optional,
        }
    }
}
