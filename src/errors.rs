//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`StrataError`] covers all failure modes including:
//! - Authoring contract violations (duplicate ids, missing or incompatible
//!   parameters, unknown references)
//! - Lifecycle-phase violations (mutating a finalized catalog, updating a
//!   layer that is still building)
//! - GPU program compilation failures
//! - Asynchronous texture resolution failures
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, StrataError>`.
//!
//! Capacity overflow is deliberately *not* an error: a full layer reports
//! `false` from `can_create_portion` and the scene model provisions a
//! sibling layer under the same composite key.

use thiserror::Error;

/// The main error type for the Strata engine.
///
/// Each variant corresponds to one contract failure kind; the authoring
/// layer logs the message and surfaces the error to the caller without
/// recording the offending object.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // Authoring contract violations
    // ========================================================================
    /// An id was registered twice within the same catalog.
    #[error("Duplicate {kind} id: {id:?}")]
    DuplicateId {
        /// Catalog the id collided in ("geometry", "texture", ...)
        kind: &'static str,
        /// The colliding id
        id: String,
    },

    /// A configuration referenced an id that was never registered.
    #[error("Unknown {kind} id: {id:?}")]
    UnknownId {
        /// Catalog the lookup ran against
        kind: &'static str,
        /// The unresolved id
        id: String,
    },

    /// A required configuration parameter was absent.
    #[error("Missing required parameter: {0}")]
    MissingParam(&'static str),

    /// Two parameters that cannot be combined were both supplied.
    #[error("Incompatible parameters: {0}")]
    IncompatibleParams(&'static str),

    /// The primitive kind is not accepted by the target operation.
    #[error("Unsupported primitive: {0}")]
    UnsupportedPrimitive(String),

    /// Geometry with zero vertices.
    #[error("Geometry {id:?} has no vertices")]
    EmptyGeometry {
        /// The offending geometry id
        id: String,
    },

    /// A mesh was assigned to a second entity.
    #[error("Mesh {mesh:?} already belongs to entity {entity:?}")]
    MeshAlreadyOwned {
        /// The reused mesh id
        mesh: String,
        /// The entity that already owns it
        entity: String,
    },

    // ========================================================================
    // Lifecycle-phase violations
    // ========================================================================
    /// A post-finalize operation ran while still building.
    #[error("Not finalized: {0}")]
    NotFinalized(&'static str),

    /// A build-phase operation ran after finalize.
    #[error("Already finalized: {0}")]
    AlreadyFinalized(&'static str),

    /// Operation on a destroyed object.
    #[error("Destroyed: {0}")]
    Destroyed(&'static str),

    /// A portion id that the layer never issued.
    #[error("Invalid portion id {portion} (layer has {count} portions)")]
    InvalidPortion {
        /// The out-of-range portion id
        portion: u32,
        /// Number of portions the layer holds
        count: u32,
    },

    // ========================================================================
    // Shared resources
    // ========================================================================
    /// The scratch pool is already leased; batched builds may not overlap.
    #[error("Scratch memory is already in use")]
    ScratchBusy,

    // ========================================================================
    // GPU & texture resolution
    // ========================================================================
    /// GPU program compile/link failure. The affected renderer becomes a
    /// no-op; other passes keep running.
    #[error("Program compilation failed: {0}")]
    ProgramCompile(String),

    /// Asynchronous texture resolution failed. Logged; the texture slot
    /// stays empty and the original create call is unaffected.
    #[error("Texture {id:?} failed to load: {reason}")]
    TextureLoad {
        /// The texture id
        id: String,
        /// Transcoder / source failure description
        reason: String,
    },
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
