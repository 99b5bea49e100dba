//! Procedural generation of structured tetrahedral meshes.
use crate::mesh::{Mesh, Tet4Connectivity};
use crate::{Error, Real};
use log::debug;
use nalgebra::{Point3, Vector3};

/// Local vertex indices (into the 8 corners of a grid cube) of the six tetrahedra that make up
/// the cube. Corner `c` is located at offset `(c & 1, (c >> 1) & 1, (c >> 2) & 1)`.
///
/// All tetrahedra share the diagonal from corner 0 to corner 7 and are positively oriented.
const CUBE_TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 7, 5],
    [0, 5, 7, 4],
    [0, 3, 2, 7],
    [0, 6, 4, 7],
    [0, 2, 6, 7],
];

/// Creates a tetrahedral mesh of the unit cube `[0, 1]^3` with `n` grid cells along each axis.
///
/// Each grid cube is split into 6 tetrahedra, so that the mesh has `(n + 1)^3` vertices and
/// `6 n^3` cells. The vertex at grid position `(i, j, k)` has index `k (n+1)^2 + j (n+1) + i`,
/// and cells are ordered slab by slab along the z-axis.
///
/// Returns [`Error::InvalidArgument`] if `n` is zero.
pub fn create_unit_cube_tet_mesh<T: Real>(n: usize) -> Result<Mesh<T>, Error> {
    create_rectangular_uniform_tet_mesh(&Vector3::repeat(T::one()), [n, n, n])
}

/// Creates a tetrahedral mesh of the box `[0, ex] x [0, ey] x [0, ez]`.
///
/// `cells_per_dim` holds the number of grid cells along each axis. Vertex numbering and cell
/// layout follow [`create_unit_cube_tet_mesh`].
pub fn create_rectangular_uniform_tet_mesh<T: Real>(
    extents: &Vector3<T>,
    cells_per_dim: [usize; 3],
) -> Result<Mesh<T>, Error> {
    let [nx, ny, nz] = cells_per_dim;
    if cells_per_dim.contains(&0) {
        return Err(Error::InvalidArgument(format!(
            "mesh resolution must be positive in every direction, got {nx} x {ny} x {nz}"
        )));
    }
    if extents.iter().any(|&e| !(e > T::zero())) {
        return Err(Error::InvalidArgument("box extents must be positive".to_string()));
    }

    let num_vertices = cells_per_dim
        .iter()
        .try_fold(1usize, |count, &n| n.checked_add(1).and_then(|m| count.checked_mul(m)));
    let num_cells = cells_per_dim
        .iter()
        .try_fold(6usize, |count, &n| count.checked_mul(n));
    let (num_vertices, num_cells) = match (num_vertices, num_cells) {
        (Some(v), Some(c)) => (v, c),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "mesh resolution {nx} x {ny} x {nz} is too large"
            )))
        }
    };

    let (num_vertices_x, num_vertices_y, num_vertices_z) = (nx + 1, ny + 1, nz + 1);
    let to_global_vertex_index =
        |i: usize, j: usize, k: usize| (num_vertices_x * num_vertices_y) * k + num_vertices_x * j + i;
    let coordinate = |index: usize, count: usize, extent: T| {
        let index = T::from_usize(index).expect("Must be able to fit usize in T");
        let count = T::from_usize(count).expect("Must be able to fit usize in T");
        extent * index / count
    };

    let mut vertices = allocate_mesh_buffer::<Point3<T>>(num_vertices, "vertices")?;
    for k in 0..num_vertices_z {
        for j in 0..num_vertices_y {
            for i in 0..num_vertices_x {
                vertices.push(Point3::new(
                    coordinate(i, nx, extents.x),
                    coordinate(j, ny, extents.y),
                    coordinate(k, nz, extents.z),
                ));
            }
        }
    }

    let mut connectivity = allocate_mesh_buffer::<Tet4Connectivity>(num_cells, "cells")?;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let corner = |c: usize| to_global_vertex_index(i + (c & 1), j + ((c >> 1) & 1), k + ((c >> 2) & 1));
                for tet in &CUBE_TETRAHEDRA {
                    connectivity.push(Tet4Connectivity(tet.map(&corner)));
                }
            }
        }
    }

    debug!(
        "Generated {nx} x {ny} x {nz} tetrahedral grid mesh with {} vertices and {} cells",
        vertices.len(),
        connectivity.len()
    );
    Ok(Mesh::from_grid(vertices, connectivity, cells_per_dim))
}

/// Reserves room for `count` items, failing instead of aborting when the buffer cannot be
/// allocated.
fn allocate_mesh_buffer<V>(count: usize, what: &str) -> Result<Vec<V>, Error> {
    let too_large = || Error::InvalidArgument(format!("cannot allocate mesh with {count} {what}"));
    let bytes = count
        .checked_mul(std::mem::size_of::<V>())
        .ok_or_else(too_large)?;
    if bytes > isize::MAX as usize {
        return Err(too_large());
    }
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(count).map_err(|_| too_large())?;
    Ok(buffer)
}

impl<T: Real> Mesh<T> {
    /// Creates a tetrahedral mesh of the unit cube, see [`create_unit_cube_tet_mesh`].
    pub fn unit_cube(n: usize) -> Result<Self, Error> {
        create_unit_cube_tet_mesh(n)
    }
}
