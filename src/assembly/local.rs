use crate::element::{basis_gradients, Tet4Element};
use crate::mesh::Mesh;
use crate::nalgebra::{Matrix4, Scalar};
use crate::quadrature::{tet_quadrature_strength_1, QuadraturePair3d};
use crate::{Error, Real};

/// Connectivity information needed to scatter element matrices into a global matrix.
pub trait ElementConnectivityAssembler {
    fn num_elements(&self) -> usize;

    fn num_nodes(&self) -> usize;

    /// Global node indices of the four nodes of the given element.
    fn element_nodes(&self, element_index: usize) -> [usize; 4];
}

/// Computes dense element matrices for four-node elements.
///
/// Implementations must be safe to call concurrently for different (or equal) element indices.
pub trait ElementMatrixAssembler<T: Scalar>: ElementConnectivityAssembler + Sync {
    fn assemble_element_matrix(&self, element_index: usize) -> Result<Matrix4<T>, Error>;
}

impl<T: Scalar> ElementConnectivityAssembler for Mesh<T> {
    fn num_elements(&self) -> usize {
        self.num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.num_dofs()
    }

    fn element_nodes(&self, element_index: usize) -> [usize; 4] {
        self.connectivity()[element_index].0
    }
}

/// Assembles the element stiffness matrix of the Laplace operator.
///
/// Entry `(i, j)` approximates `∫_K ∇φ_i · ∇φ_j dx` with the given quadrature rule on the
/// reference element. For linear elements the integrand is constant, so the one-point rule
/// [`tet_quadrature_strength_1`] is exact and gives `|K| ∇φ_i · ∇φ_j`.
///
/// The `cell` index is only used to tag errors.
///
/// # Panics
///
/// Panics if the quadrature weights and points do not have the same length.
pub fn assemble_element_stiffness<T: Real>(
    cell: usize,
    element: &Tet4Element<T>,
    quadrature: &QuadraturePair3d<T>,
) -> Result<Matrix4<T>, Error> {
    let (weights, points) = quadrature;
    assert_eq!(weights.len(), points.len(), "Quadrature weights and points must have equal length");

    // The map is affine, so the Jacobian and the physical gradients are the same at every
    // quadrature point
    let j_det = element.reference_jacobian().determinant();
    let phi_grad = basis_gradients(cell, element)?;
    let weight_sum = weights.iter().fold(T::zero(), |sum, &w| sum + w);
    let scale = weight_sum * j_det.abs();

    let mut output = phi_grad.tr_mul(&phi_grad);
    output *= scale;
    Ok(output)
}

/// Element assembler for the Poisson stiffness matrix on a tetrahedral mesh.
#[derive(Debug, Clone)]
pub struct PoissonElementAssembler<'a, T: Scalar> {
    mesh: &'a Mesh<T>,
    quadrature: QuadraturePair3d<T>,
}

impl<'a, T: Real> PoissonElementAssembler<'a, T> {
    /// An assembler that integrates with the one-point rule.
    pub fn new(mesh: &'a Mesh<T>) -> Self {
        Self::with_quadrature(mesh, tet_quadrature_strength_1())
    }

    pub fn with_quadrature(mesh: &'a Mesh<T>, quadrature: QuadraturePair3d<T>) -> Self {
        Self { mesh, quadrature }
    }

    pub fn mesh(&self) -> &'a Mesh<T> {
        self.mesh
    }

    pub fn quadrature(&self) -> &QuadraturePair3d<T> {
        &self.quadrature
    }

    /// Global degrees of freedom of the given cell, in local node order.
    pub fn cell_dofs(&self, cell_index: usize) -> [usize; 4] {
        self.mesh.element_nodes(cell_index)
    }

    /// Dense 4x4 stiffness matrix of the given cell.
    pub fn assemble_local(&self, cell_index: usize) -> Result<Matrix4<T>, Error> {
        let element = self.mesh.cell(cell_index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "cell index {cell_index} out of bounds for mesh with {} cells",
                self.mesh.num_cells()
            ))
        })?;
        assemble_element_stiffness(cell_index, &element, &self.quadrature)
    }
}

impl<'a, T: Real> ElementConnectivityAssembler for PoissonElementAssembler<'a, T> {
    fn num_elements(&self) -> usize {
        self.mesh.num_cells()
    }

    fn num_nodes(&self) -> usize {
        self.mesh.num_dofs()
    }

    fn element_nodes(&self, element_index: usize) -> [usize; 4] {
        self.cell_dofs(element_index)
    }
}

impl<'a, T: Real> ElementMatrixAssembler<T> for PoissonElementAssembler<'a, T> {
    fn assemble_element_matrix(&self, element_index: usize) -> Result<Matrix4<T>, Error> {
        self.assemble_local(element_index)
    }
}
