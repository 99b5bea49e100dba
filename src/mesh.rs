use crate::element::Tet4Element;
use crate::Error;
use nalgebra::{Point3, Scalar};

pub mod partition;
pub mod procedural;

pub use partition::Partition;

/// Connectivity of a linear tetrahedron, given by the global indices of its four vertices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tet4Connectivity(pub [usize; 4]);

impl Tet4Connectivity {
    pub fn vertex_indices(&self) -> &[usize; 4] {
        &self.0
    }
}

/// Index-based tetrahedral mesh.
///
/// Each vertex carries one degree of freedom, so the global index of a degree of freedom is the
/// index of its vertex. Meshes are immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh<T: Scalar> {
    vertices: Vec<Point3<T>>,
    connectivity: Vec<Tet4Connectivity>,
    // Number of grid cells along each axis for meshes generated on a structured grid
    grid_resolution: Option<[usize; 3]>,
}

impl<T: Scalar> Mesh<T> {
    /// Construct a mesh from vertices and connectivity.
    ///
    /// Returns an error if the connectivity references vertices that do not exist.
    pub fn from_vertices_and_connectivity(
        vertices: Vec<Point3<T>>,
        connectivity: Vec<Tet4Connectivity>,
    ) -> Result<Self, Error> {
        let num_vertices = vertices.len();
        let invalid_cell = connectivity
            .iter()
            .position(|conn| conn.0.iter().any(|&v| v >= num_vertices));
        if let Some(cell) = invalid_cell {
            return Err(Error::InvalidArgument(format!(
                "cell {cell} references a vertex out of bounds (mesh has {num_vertices} vertices)"
            )));
        }

        Ok(Self {
            vertices,
            connectivity,
            grid_resolution: None,
        })
    }

    /// Construct a mesh whose cells are laid out slab by slab on a structured grid.
    ///
    /// The caller guarantees that cells of slab `k` (along the z-axis) occupy the cell indices
    /// `6 nx ny k .. 6 nx ny (k + 1)` and that vertices are numbered lexicographically.
    pub(crate) fn from_grid(
        vertices: Vec<Point3<T>>,
        connectivity: Vec<Tet4Connectivity>,
        grid_resolution: [usize; 3],
    ) -> Self {
        let [nx, ny, nz] = grid_resolution;
        debug_assert_eq!(vertices.len(), (nx + 1) * (ny + 1) * (nz + 1));
        debug_assert_eq!(connectivity.len(), 6 * nx * ny * nz);
        Self {
            vertices,
            connectivity,
            grid_resolution: Some(grid_resolution),
        }
    }

    pub fn vertices(&self) -> &[Point3<T>] {
        &self.vertices
    }

    pub fn connectivity(&self) -> &[Tet4Connectivity] {
        &self.connectivity
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.connectivity.len()
    }

    /// Number of degrees of freedom, which equals the number of vertices.
    pub fn num_dofs(&self) -> usize {
        self.num_vertices()
    }

    /// The number of grid cells along each axis, if the mesh was generated on a structured grid.
    pub fn grid_resolution(&self) -> Option<[usize; 3]> {
        self.grid_resolution
    }

    /// Returns the geometric element associated with the given cell.
    pub fn cell(&self, index: usize) -> Option<Tet4Element<T>> {
        let conn = self.connectivity.get(index)?;
        let [a, b, c, d] = conn.0;
        Some(Tet4Element::from_vertices([
            self.vertices[a].clone(),
            self.vertices[b].clone(),
            self.vertices[c].clone(),
            self.vertices[d].clone(),
        ]))
    }
}
