//! Quadrature rules on the reference tetrahedron.
//!
//! Rules are given as pairs of weights and points with respect to the reference domain of
//! [`Tet4Element`](crate::element::Tet4Element), so the weights of each rule sum to its volume `4/3`.
use crate::nalgebra::{convert, Point3, RealField};

/// Weights and points of a quadrature rule in three dimensions.
pub type QuadraturePair3d<T> = (Vec<T>, Vec<Point3<T>>);

fn convert_quadrature_rule_from_f64<T>(weights: &[f64], points: &[[f64; 3]]) -> QuadraturePair3d<T>
where
    T: RealField,
{
    let weights = weights.iter().copied().map(convert).collect();
    let points = points
        .iter()
        .copied()
        .map(Point3::from)
        .map(convert)
        .collect();
    (weights, points)
}

/// The one-point rule at the centroid, exact for polynomials of degree 1.
///
/// This is the rule used for the Poisson stiffness matrix of linear elements, whose integrand is
/// constant on each cell.
pub fn tet_quadrature_strength_1<T: RealField>() -> QuadraturePair3d<T> {
    convert_quadrature_rule_from_f64(&[4.0 / 3.0], &[[-0.5, -0.5, -0.5]])
}

/// The symmetric four-point rule, exact for polynomials of degree 2.
pub fn tet_quadrature_strength_2<T: RealField>() -> QuadraturePair3d<T> {
    let a = 0.170_820_393_249_936_9;
    let b = -0.723_606_797_749_979;
    convert_quadrature_rule_from_f64(
        &[1.0 / 3.0; 4],
        &[[b, b, b], [a, b, b], [b, a, b], [b, b, a]],
    )
}
