//! Strategies for property-based testing with `proptest`.
use crate::element::Tet4Element;
use crate::mesh::procedural::create_rectangular_uniform_tet_mesh;
use crate::mesh::Mesh;
use ::proptest::prelude::*;
use nalgebra::{Point3, Vector3};

pub fn point3() -> impl Strategy<Value = Point3<f64>> {
    // Pick a reasonably small range to pick coordinates from,
    // otherwise we can easily get floating point numbers that are
    // so ridiculously large as to break anything we might want to do with them
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range.clone()].prop_map(|[x, y, z]| Point3::new(x, y, z))
}

impl Arbitrary for Tet4Element<f64> {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    /// Positively oriented tetrahedra that are far from degenerate.
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        [point3(), point3(), point3(), point3()]
            .prop_map(|[a, b, c, d]| {
                let tet = Tet4Element::from_vertices([a, b, c, d]);
                if tet.signed_volume() < 0.0 {
                    Tet4Element::from_vertices([a, c, b, d])
                } else {
                    tet
                }
            })
            .prop_filter("tetrahedron must not be nearly flat", |tet| {
                let h = tet.max_edge_length();
                tet.volume() > 1e-3 * h * h * h
            })
            .boxed()
    }
}

/// Resolutions `[nx, ny, nz]` with at least one cell along each axis and at most `max_cells` grid
/// cubes in total.
pub fn grid_resolution(max_cells: usize) -> impl Strategy<Value = [usize; 3]> {
    let max_cells = max_cells.max(1);
    (1..=max_cells)
        .prop_flat_map(move |nx| (Just(nx), 1..=(max_cells / nx).max(1)))
        .prop_flat_map(move |(nx, ny)| (Just(nx), Just(ny), 1..=(max_cells / (nx * ny)).max(1)))
        .prop_map(|(nx, ny, nz)| [nx, ny, nz])
}

/// Structured tetrahedral meshes of boxes with random extents.
pub fn rectangular_tet_mesh(max_cells: usize) -> impl Strategy<Value = Mesh<f64>> {
    let extent = 0.1..10.0;
    (
        [extent.clone(), extent.clone(), extent.clone()],
        grid_resolution(max_cells),
    )
        .prop_map(|([ex, ey, ez], resolution)| {
            create_rectangular_uniform_tet_mesh(&Vector3::new(ex, ey, ez), resolution)
                .expect("Extents and resolution are positive")
        })
}
