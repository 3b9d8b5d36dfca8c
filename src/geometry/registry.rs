//! Reusable geometry catalog.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::{Geometry, GeometryCfg};
use crate::errors::{Result, StrataError};

/// Maps geometry ids to shared, immutable geometries.
///
/// The catalog only lives through the authoring phase; the scene model
/// drops it at finalize, after which geometries survive only through the
/// `Arc`s held by instanced and data-texture layers.
#[derive(Debug, Default)]
pub struct GeometryRegistry {
    map: FxHashMap<String, Arc<Geometry>>,
}

impl GeometryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates, normalizes, and stores a geometry.
    pub fn create_geometry(&mut self, cfg: GeometryCfg) -> Result<Arc<Geometry>> {
        if cfg.id.is_empty() {
            return Err(StrataError::MissingParam("geometry id"));
        }
        if self.map.contains_key(&cfg.id) {
            return Err(StrataError::DuplicateId {
                kind: "geometry",
                id: cfg.id,
            });
        }
        let geometry = Arc::new(Geometry::from_cfg(cfg)?);
        log::debug!(
            "registered geometry {:?}: {} {} vertices",
            geometry.id,
            geometry.num_vertices(),
            geometry.primitive
        );
        self.map.insert(geometry.id.clone(), Arc::clone(&geometry));
        Ok(geometry)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Geometry>> {
        self.map.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Releases the catalog. Layer-held `Arc`s keep their geometries.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}
