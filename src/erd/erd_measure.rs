use egui::Vec2;

use crate::common::config::EntityConfig;
use crate::erd::erd_models::Entity;

/// Answers how much room an entity's rendered content needs.
///
/// The renderer owns fonts and text layout; the geometry core only asks.
pub trait MeasureContent {
    fn content_size(&self, entity: &Entity) -> Vec2;
}

/// Monospace estimate: one title line plus one line per attribute.
#[derive(Clone, Debug)]
pub struct GlyphMeasure {
    pub char_width: f32,
    pub line_height: f32,
    pub padding: f32,
}

impl GlyphMeasure {
    pub fn from_config(config: &EntityConfig) -> Self {
        Self {
            char_width: config.char_width,
            line_height: config.line_height,
            padding: config.content_padding,
        }
    }
}

impl Default for GlyphMeasure {
    fn default() -> Self {
        Self::from_config(&EntityConfig::default())
    }
}

impl MeasureContent for GlyphMeasure {
    fn content_size(&self, entity: &Entity) -> Vec2 {
        let widest = entity
            .attributes()
            .iter()
            .map(|a| a.label().chars().count())
            .chain(std::iter::once(entity.name().chars().count()))
            .max()
            .unwrap_or(0);
        let lines = 1 + entity.attributes().len();
        Vec2::new(
            widest as f32 * self.char_width + 2.0 * self.padding,
            lines as f32 * self.line_height + 2.0 * self.padding,
        )
    }
}
