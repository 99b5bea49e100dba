//! Assembly of the Poisson stiffness matrix.
//!
//! [`local`] computes dense element matrices cell by cell, and [`global`] scatters them into a
//! sparse matrix whose rows are distributed across ranks.
pub mod global;
pub mod local;
