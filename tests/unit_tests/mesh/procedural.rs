use cubefem::mesh::procedural::{create_rectangular_uniform_tet_mesh, create_unit_cube_tet_mesh};
use cubefem::mesh::Mesh;
use cubefem::nalgebra::{Point3, Vector3};
use cubefem::proptest::rectangular_tet_mesh;
use cubefem::Error;
use matrixcompare::{assert_scalar_eq, prop_assert_scalar_eq};
use proptest::prelude::*;
use std::collections::HashSet;

#[test]
fn unit_cube_tet_mesh_single_cube() {
    let mesh = create_unit_cube_tet_mesh::<f64>(1).unwrap();
    assert_eq!(mesh.num_vertices(), 8);
    assert_eq!(mesh.num_cells(), 6);
    assert_eq!(mesh.grid_resolution(), Some([1, 1, 1]));

    // All six tetrahedra share the main diagonal of the cube
    for conn in mesh.connectivity() {
        assert!(conn.vertex_indices().contains(&0));
        assert!(conn.vertex_indices().contains(&7));
    }
    assert_eq!(mesh.vertices()[7], Point3::new(1.0, 1.0, 1.0));
}

#[test]
fn unit_cube_tet_mesh_zero_resolution_is_invalid() {
    let result = create_unit_cube_tet_mesh::<f64>(0);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert!(matches!(Mesh::<f64>::unit_cube(0), Err(Error::InvalidArgument(_))));
}

#[test]
fn unit_cube_tet_mesh_huge_resolution_is_invalid() {
    let result = create_unit_cube_tet_mesh::<f64>(usize::MAX);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn unit_cube_tet_mesh_unallocatable_resolution_is_invalid() {
    // The vertex and cell counts fit in usize, but their buffers exceed the address space
    let result = create_unit_cube_tet_mesh::<f64>(1_000_000);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    let result = create_rectangular_uniform_tet_mesh(&Vector3::new(1.0, 1.0, 1.0), [1 << 20, 1 << 20, 1 << 20]);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn rectangular_tet_mesh_invalid_extents() {
    let result = create_rectangular_uniform_tet_mesh(&Vector3::new(1.0, 0.0, 1.0), [1, 1, 1]);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    let result = create_rectangular_uniform_tet_mesh(&Vector3::new(1.0, 1.0, 1.0), [1, 0, 1]);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn unit_cube_tet_mesh_vertex_numbering() {
    let n = 3;
    let mesh = Mesh::<f64>::unit_cube(n).unwrap();
    let h = 1.0 / n as f64;
    for k in 0..=n {
        for j in 0..=n {
            for i in 0..=n {
                let index = k * (n + 1) * (n + 1) + j * (n + 1) + i;
                let expected = Point3::new(i as f64 * h, j as f64 * h, k as f64 * h);
                assert!((mesh.vertices()[index] - expected).norm() < 1e-14);
            }
        }
    }
}

#[test]
fn unit_cube_tet_mesh_cells_are_ordered_by_slab() {
    let n = 3;
    let mesh = create_unit_cube_tet_mesh::<f64>(n).unwrap();
    let cells_per_slab = 6 * n * n;
    let h = 1.0 / n as f64;
    for (cell_index, conn) in mesh.connectivity().iter().enumerate() {
        let slab = cell_index / cells_per_slab;
        for &v in conn.vertex_indices() {
            let z = mesh.vertices()[v].z;
            assert!(z >= slab as f64 * h - 1e-14 && z <= (slab + 1) as f64 * h + 1e-14);
        }
    }
}

proptest! {
    #[test]
    fn unit_cube_tet_mesh_counts_and_volumes(n in 1usize..=5) {
        let mesh = create_unit_cube_tet_mesh::<f64>(n).unwrap();
        prop_assert_eq!(mesh.num_vertices(), (n + 1).pow(3));
        prop_assert_eq!(mesh.num_cells(), 6 * n.pow(3));

        let expected_volume = 1.0 / (6 * n.pow(3)) as f64;
        let mut total_volume = 0.0;
        for i in 0 .. mesh.num_cells() {
            let cell = mesh.cell(i).unwrap();
            // Every cell must be positively oriented
            prop_assert!(cell.signed_volume() > 0.0);
            prop_assert_scalar_eq!(cell.signed_volume(), expected_volume, comp = abs, tol = 1e-14);
            total_volume += cell.volume();
        }
        prop_assert_scalar_eq!(total_volume, 1.0, comp = abs, tol = 1e-12);

        // Every vertex is referenced by at least one cell
        let referenced: HashSet<usize> = mesh
            .connectivity()
            .iter()
            .flat_map(|conn| conn.vertex_indices().iter().copied())
            .collect();
        prop_assert_eq!(referenced.len(), mesh.num_vertices());
    }

    #[test]
    fn rectangular_tet_mesh_fills_box(mesh in rectangular_tet_mesh(27)) {
        let max = mesh.vertices().iter().fold(Vector3::zeros(), |max: Vector3<f64>, v| max.sup(&v.coords));
        let box_volume = max.x * max.y * max.z;
        let total_volume: f64 = (0 .. mesh.num_cells())
            .map(|i| mesh.cell(i).unwrap().signed_volume())
            .sum();
        prop_assert_scalar_eq!(total_volume, box_volume, comp = abs, tol = box_volume * 1e-12);
    }
}

#[test]
fn unit_cube_tet_mesh_cell_diameter() {
    let mesh = create_unit_cube_tet_mesh::<f64>(1).unwrap();
    // Each tetrahedron of the cube has the cube diagonal as a diameter of its circumsphere
    for i in 0..mesh.num_cells() {
        assert_scalar_eq!(mesh.cell(i).unwrap().diameter(), 3.0f64.sqrt(), comp = abs, tol = 1e-12);
    }
}
