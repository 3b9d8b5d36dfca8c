//! Math helpers shared across the packing pipeline.
//!
//! Origins and world-space bounds are double precision ([`glam::DVec3`] /
//! [`glam::DMat4`]); everything local to a layer is single precision and
//! small enough for 32-bit GPU math.

pub mod aabb;

pub use aabb::Aabb;
