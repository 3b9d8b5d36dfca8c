//! Composite layer keys.
//!
//! A fresh portion looks up its key; a hit reuses the open layer, a miss
//! (or a capacity rejection) creates a sibling. Origins are rounded to
//! integers in the key so near-equal doubles do not churn layers — but a
//! layer still adopts the *exact* origin of its first portion.

use glam::{DVec3, Mat4};
use xxhash_rust::xxh3::xxh3_64;

use crate::layer::PrimitiveGroup;

/// Composite key selecting the open layer for a new portion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LayerKey {
    VboBatched {
        origin: [i64; 3],
        primitive: PrimitiveGroup,
        /// Content hash of the shared decode matrix; 0 when the layer
        /// self-quantizes at finalize.
        decode_hash: u64,
        texture_set: Option<String>,
    },
    VboInstanced {
        origin: [i64; 3],
        texture_set: Option<String>,
        geometry_id: String,
    },
    Dtx {
        primitive: PrimitiveGroup,
        origin: [i64; 3],
    },
}

/// Rounds a double-precision origin for keying.
#[must_use]
pub fn round_origin(origin: DVec3) -> [i64; 3] {
    [
        origin.x.round() as i64,
        origin.y.round() as i64,
        origin.z.round() as i64,
    ]
}

/// Content hash of a decode matrix; absent matrices hash to 0.
#[must_use]
pub fn decode_matrix_hash(matrix: Option<&Mat4>) -> u64 {
    matrix.map_or(0, |m| xxh3_64(bytemuck::cast_slice(&m.to_cols_array())))
}

impl LayerKey {
    /// Stable sort key shared by every sibling layer under this key.
    #[must_use]
    pub fn sort_id(&self) -> String {
        match self {
            LayerKey::VboBatched {
                origin,
                primitive,
                decode_hash,
                texture_set,
            } => format!(
                "batched#{primitive}#{}.{}.{}#{decode_hash:016x}#{}",
                origin[0],
                origin[1],
                origin[2],
                texture_set.as_deref().unwrap_or("-"),
            ),
            LayerKey::VboInstanced {
                origin,
                texture_set,
                geometry_id,
            } => format!(
                "instanced#{}.{}.{}#{}#{geometry_id}",
                origin[0],
                origin[1],
                origin[2],
                texture_set.as_deref().unwrap_or("-"),
            ),
            LayerKey::Dtx { primitive, origin } => format!(
                "dtx#{primitive}#{}.{}.{}",
                origin[0], origin[1], origin[2],
            ),
        }
    }
}
