//! Parallel assembly of the Poisson stiffness matrix on tetrahedral meshes of the unit cube.
//!
//! The pieces, from the bottom up:
//!
//! - [`mesh`]: structured tetrahedral meshes and their partitioning into per-rank slabs,
//! - [`element`] and [`quadrature`]: the linear Lagrange tetrahedron and its quadrature rules,
//! - [`assembly::local`]: dense element stiffness matrices,
//! - [`comm`]: rank-to-rank communication (barrier, all-to-all exchange, reductions),
//! - [`assembly::global`]: scattering of element matrices into row-distributed sparse matrices.
use nalgebra::RealField;

pub mod assembly;
pub mod comm;
pub mod element;
pub mod error;
pub mod mesh;
pub mod quadrature;
pub mod timing;

#[cfg(feature = "proptest-support")]
pub mod proptest;

pub use error::Error;

pub extern crate cubefem_sparse as sparse;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// Real scalar types supported by `cubefem`.
///
/// Used as a trait alias for the traits frequently needed by generic routines.
pub trait Real: RealField + Copy {}

impl<T> Real for T where T: RealField + Copy {}
