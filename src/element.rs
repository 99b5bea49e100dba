//! The linear Lagrange tetrahedron.
//!
//! The reference domain is the tetrahedron with vertices
//! `(-1, -1, -1)`, `(1, -1, -1)`, `(-1, 1, -1)` and `(-1, -1, 1)`, which has volume `4/3`.
//! Since the basis functions are linear, their gradients are constant on the reference domain,
//! and the map from the reference domain to a physical cell is affine.
use crate::nalgebra::{distance, Matrix1x4, Matrix3, Matrix3x4, Point3, Scalar, Vector3};
use crate::{Error, Real};
use itertools::Itertools;
use numeric_literals::replace_float_literals;

/// A tetrahedral cell with linear (P1) Lagrange basis functions, one per vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tet4Element<T>
where
    T: Scalar,
{
    vertices: [Point3<T>; 4],
}

impl<T> Tet4Element<T>
where
    T: Scalar,
{
    pub fn from_vertices(vertices: [Point3<T>; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point3<T>; 4] {
        &self.vertices
    }
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
impl<T> Tet4Element<T>
where
    T: Real,
{
    pub fn reference() -> Self {
        Self {
            vertices: [
                Point3::new(-1.0, -1.0, -1.0),
                Point3::new(1.0, -1.0, -1.0),
                Point3::new(-1.0, 1.0, -1.0),
                Point3::new(-1.0, -1.0, 1.0),
            ],
        }
    }

    /// Volume of the reference tetrahedron.
    pub fn reference_volume() -> T {
        4.0 / 3.0
    }

    /// Evaluates the four basis functions at the given reference coordinates.
    #[rustfmt::skip]
    pub fn evaluate_basis(&self, xi: &Point3<T>) -> Matrix1x4<T> {
        Matrix1x4::from_row_slice(&[
            -0.5 * xi.x - 0.5 * xi.y - 0.5 * xi.z - 0.5,
            0.5 * xi.x + 0.5,
            0.5 * xi.y + 0.5,
            0.5 * xi.z + 0.5
        ])
    }

    /// Gradients of the basis functions with respect to reference coordinates.
    ///
    /// Column `i` holds the gradient of basis function `i`.
    #[rustfmt::skip]
    pub fn reference_gradients(&self) -> Matrix3x4<T> {
        Matrix3x4::from_columns(&[
            Vector3::new(-0.5, -0.5, -0.5),
            Vector3::new(0.5, 0.0, 0.0),
            Vector3::new(0.0, 0.5, 0.0),
            Vector3::new(0.0, 0.0, 0.5)
        ])
    }

    /// The Jacobian of the map from reference to physical coordinates.
    ///
    /// The map is affine, so the Jacobian is the same everywhere in the cell.
    #[allow(non_snake_case)]
    pub fn reference_jacobian(&self) -> Matrix3<T> {
        let X = Matrix3x4::from_fn(|i, j| self.vertices[j][i]);
        X * self.reference_gradients().transpose()
    }

    #[allow(non_snake_case)]
    pub fn map_reference_coords(&self, xi: &Point3<T>) -> Point3<T> {
        let X = Matrix3x4::from_fn(|i, j| self.vertices[j][i]);
        let N = self.evaluate_basis(xi);
        Point3::from(X * N.transpose())
    }

    /// Signed volume of the cell, positive if the cell is positively oriented.
    pub fn signed_volume(&self) -> T {
        self.reference_jacobian().determinant() * Self::reference_volume()
    }

    pub fn volume(&self) -> T {
        self.signed_volume().abs()
    }

    /// The weight of the one-point quadrature rule on the physical cell, i.e. its volume.
    pub fn quadrature_weight(&self) -> T {
        self.volume()
    }

    /// Length of the longest edge.
    pub fn max_edge_length(&self) -> T {
        self.vertices
            .iter()
            .tuple_combinations()
            .map(|(x, y)| distance(x, y))
            .fold(T::zero(), |a, b| a.max(b))
    }

    /// Diameter of the circumscribed sphere.
    ///
    /// Returns zero for degenerate cells.
    pub fn diameter(&self) -> T {
        let [p0, p1, p2, p3] = &self.vertices;
        let volume = self.volume();
        if volume == T::zero() {
            return T::zero();
        }

        // Products of the lengths of opposite edges
        let la = distance(p1, p2) * distance(p0, p3);
        let lb = distance(p0, p2) * distance(p1, p3);
        let lc = distance(p0, p1) * distance(p2, p3);
        let s = 0.5 * (la + lb + lc);
        let area = (s * (s - la) * (s - lb) * (s - lc)).max(T::zero()).sqrt();
        area / (3.0 * volume)
    }

    /// Whether the cell is too flat to have a well-defined inverse Jacobian.
    ///
    /// The determinant is compared with the cube of the longest edge, so that the check does not
    /// depend on the scale of the cell.
    pub fn is_degenerate(&self) -> bool {
        let h = self.max_edge_length();
        let det = self.reference_jacobian().determinant().abs();
        !(det > 1000.0 * T::default_epsilon() * h * h * h)
    }

    /// Gradients of the basis functions with respect to physical coordinates.
    ///
    /// Column `i` holds the (constant) gradient of basis function `i`. Returns `None` if the cell
    /// is degenerate.
    pub fn gradients(&self) -> Option<Matrix3x4<T>> {
        if self.is_degenerate() {
            return None;
        }
        let j_inv = self.reference_jacobian().try_inverse()?;
        Some(j_inv.transpose() * self.reference_gradients())
    }
}

/// Physical basis gradients of the given cell of a mesh.
///
/// Returns [`Error::DegenerateCell`] tagged with `cell` if the element is degenerate.
pub fn basis_gradients<T: Real>(cell: usize, element: &Tet4Element<T>) -> Result<Matrix3x4<T>, Error> {
    element
        .gradients()
        .ok_or(Error::DegenerateCell { cell })
}
