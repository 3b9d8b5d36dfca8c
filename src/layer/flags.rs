//! Entity flags and render-pass derivation.
//!
//! Every portion carries one packed word encoding which pass it renders
//! in. The word holds five 4-bit fields: color pass, silhouette pass,
//! edge pass, pick pass, and the clippable bit. It is stored as a `u32`
//! on the CPU and reinterpreted only at the upload boundary, so no NaN
//! bit patterns can arise.

use bitflags::bitflags;

bitflags! {
    /// Visual state bits shared by entities, meshes, and portions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct EntityFlags: u32 {
        const VISIBLE     = 1 << 0;
        const CULLED      = 1 << 1;
        const PICKABLE    = 1 << 2;
        const CLIPPABLE   = 1 << 3;
        const COLLIDABLE  = 1 << 4;
        const EDGES       = 1 << 5;
        const XRAYED      = 1 << 6;
        const HIGHLIGHTED = 1 << 7;
        const SELECTED    = 1 << 8;
    }
}

/// Render pass identifiers, the values stored in the packed nibbles.
pub mod pass {
    pub const NOT_RENDERED: u32 = 0;
    pub const COLOR_OPAQUE: u32 = 1;
    pub const COLOR_TRANSPARENT: u32 = 2;
    pub const SILHOUETTE_HIGHLIGHTED: u32 = 3;
    pub const SILHOUETTE_SELECTED: u32 = 4;
    pub const SILHOUETTE_XRAYED: u32 = 5;
    pub const EDGES_COLOR_OPAQUE: u32 = 6;
    pub const EDGES_COLOR_TRANSPARENT: u32 = 7;
    pub const EDGES_HIGHLIGHTED: u32 = 8;
    pub const EDGES_SELECTED: u32 = 9;
    pub const EDGES_XRAYED: u32 = 10;
    pub const PICK: u32 = 11;
}

/// Whether emphasized objects still draw in the color pass.
#[derive(Debug, Clone, Copy)]
pub struct EmphasisConfig {
    pub highlight_glow_through: bool,
    pub selected_glow_through: bool,
}

impl Default for EmphasisConfig {
    fn default() -> Self {
        Self {
            highlight_glow_through: true,
            selected_glow_through: true,
        }
    }
}

/// Derives the packed pass word for one portion.
///
/// Layout: `color | silhouette << 4 | edge << 8 | pick << 12 |
/// clippable << 16`.
#[must_use]
pub fn pack_flags(flags: EntityFlags, transparent: bool, emphasis: &EmphasisConfig) -> u32 {
    let visible = flags.contains(EntityFlags::VISIBLE) && !flags.contains(EntityFlags::CULLED);
    let xrayed = flags.contains(EntityFlags::XRAYED);
    let highlighted = flags.contains(EntityFlags::HIGHLIGHTED);
    let selected = flags.contains(EntityFlags::SELECTED);

    let color_pass = if !visible
        || xrayed
        || (highlighted && !emphasis.highlight_glow_through)
        || (selected && !emphasis.selected_glow_through)
    {
        pass::NOT_RENDERED
    } else if transparent {
        pass::COLOR_TRANSPARENT
    } else {
        pass::COLOR_OPAQUE
    };

    // Strongest emphasis wins: selected > highlighted > xrayed.
    let silhouette_pass = if !visible {
        pass::NOT_RENDERED
    } else if selected {
        pass::SILHOUETTE_SELECTED
    } else if highlighted {
        pass::SILHOUETTE_HIGHLIGHTED
    } else if xrayed {
        pass::SILHOUETTE_XRAYED
    } else {
        pass::NOT_RENDERED
    };

    let edge_pass = if !visible {
        pass::NOT_RENDERED
    } else if selected {
        pass::EDGES_SELECTED
    } else if highlighted {
        pass::EDGES_HIGHLIGHTED
    } else if xrayed {
        pass::EDGES_XRAYED
    } else if flags.contains(EntityFlags::EDGES) {
        if transparent {
            pass::EDGES_COLOR_TRANSPARENT
        } else {
            pass::EDGES_COLOR_OPAQUE
        }
    } else {
        pass::NOT_RENDERED
    };

    let pick_pass = if visible && flags.contains(EntityFlags::PICKABLE) {
        pass::PICK
    } else {
        pass::NOT_RENDERED
    };

    let clippable = u32::from(flags.contains(EntityFlags::CLIPPABLE));

    color_pass | silhouette_pass << 4 | edge_pass << 8 | pick_pass << 12 | clippable << 16
}
