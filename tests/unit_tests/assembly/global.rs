use cubefem::assembly::global::{assemble, assemble_distributed, assemble_on_rank, assemble_parallel, GlobalMatrix};
use cubefem::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler, PoissonElementAssembler};
use cubefem::comm::{run_ranks, SerialComm, ThreadComm};
use cubefem::mesh::procedural::create_unit_cube_tet_mesh;
use cubefem::mesh::{Mesh, Partition, Tet4Connectivity};
use cubefem::nalgebra::{DMatrix, DVector, Matrix4, Point3};
use cubefem::sparse::{SparseMatrix, SparseMatrixError};
use cubefem::Error;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq, prop_assert_matrix_eq};
use proptest::prelude::*;

/// Poisson assembler that fails on a single cell.
struct FailingAssembler<'a> {
    inner: PoissonElementAssembler<'a, f64>,
    failing_cell: usize,
}

impl<'a> ElementConnectivityAssembler for FailingAssembler<'a> {
    fn num_elements(&self) -> usize {
        self.inner.num_elements()
    }

    fn num_nodes(&self) -> usize {
        self.inner.num_nodes()
    }

    fn element_nodes(&self, element_index: usize) -> [usize; 4] {
        self.inner.element_nodes(element_index)
    }
}

impl<'a> ElementMatrixAssembler<f64> for FailingAssembler<'a> {
    fn assemble_element_matrix(&self, element_index: usize) -> Result<Matrix4<f64>, Error> {
        if element_index == self.failing_cell {
            Err(Error::DegenerateCell { cell: element_index })
        } else {
            self.inner.assemble_element_matrix(element_index)
        }
    }
}

#[test]
fn assemble_single_cube() {
    let mesh = create_unit_cube_tet_mesh::<f64>(1).unwrap();
    let a = assemble(&mesh).unwrap();
    assert_eq!(a.nrows(), 8);
    assert_eq!(a.ncols(), 8);
    // The diagonal vertices 0 and 7 are coupled to all other vertices. In addition, each of the
    // six tetrahedra contributes one edge between two of the remaining vertices.
    assert_eq!(a.nnz(), 8 + 2 * (7 + 6 + 6));

    let dense = DMatrix::from(&a);
    assert_matrix_eq!(dense, dense.transpose(), comp = abs, tol = 1e-14);
    for i in 0..8 {
        assert!(dense[(i, i)] > 0.0);
        assert_scalar_eq!(dense.row(i).sum(), 0.0, comp = abs, tol = 1e-10);
    }
}

#[test]
fn assemble_energy_of_linear_function_is_domain_volume() {
    // For u(x) = x + 2y - z, the energy u^T A u equals the integral of |grad u|^2 = 6 over the unit cube
    let mesh = create_unit_cube_tet_mesh::<f64>(3).unwrap();
    let a = DMatrix::from(&assemble(&mesh).unwrap());
    let u = DVector::from_iterator(mesh.num_vertices(), mesh.vertices().iter().map(|v| v.x + 2.0 * v.y - v.z));
    assert_scalar_eq!(u.dot(&(&a * &u)), 6.0, comp = abs, tol = 1e-10);
}

#[test]
fn assemble_parallel_single_cube_on_two_ranks() {
    let mesh = create_unit_cube_tet_mesh::<f64>(1).unwrap();
    let a = assemble_parallel(&mesh, 2).unwrap();
    assert_eq!(a.nrows(), 8);
    assert_eq!(a.ncols(), 8);
    // With a single slab, the first rank does not own any rows
    assert_eq!(a.row_blocks(), &[0..0, 0..8]);
    assert!(a.is_symmetric(1e-14));
    for sum in a.row_sums() {
        assert!(sum.abs() < 1e-10);
    }
}

#[test]
fn assemble_parallel_global_matrix_properties() {
    let mesh = create_unit_cube_tet_mesh::<f64>(4).unwrap();
    let a = assemble_parallel(&mesh, 3).unwrap();
    assert_eq!(a.nrows(), 125);
    assert!(a.is_symmetric(1e-14));
    for i in 0..a.nrows() {
        assert!(a.get(i, i) > 0.0);
    }
    for sum in a.row_sums() {
        assert!(sum.abs() < 1e-10);
    }
    // Vertices 0 and 124 are the opposite corners of the cube, which share no cell
    assert_eq!(a.get(0, 124), 0.0);
}

#[test]
fn assemble_parallel_is_deterministic() {
    let mesh = create_unit_cube_tet_mesh::<f64>(4).unwrap();
    let a = assemble_parallel(&mesh, 3).unwrap();
    let b = assemble_parallel(&mesh, 3).unwrap();
    assert_eq!(a, b);
}

/// Assembles on `num_ranks` thread ranks, each running its cell loop in a pool of `num_threads`.
fn assemble_with_rank_pools(mesh: &Mesh<f64>, num_ranks: usize, num_threads: usize) -> GlobalMatrix<f64> {
    let partition = mesh.partition(num_ranks).unwrap();
    let assembler = PoissonElementAssembler::new(mesh);
    let blocks = run_ranks(num_ranks, |comm: ThreadComm<f64>| {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        pool.install(|| assemble_on_rank(&comm, &assembler, &partition))
            .unwrap()
    });
    GlobalMatrix::from_blocks(blocks).unwrap()
}

#[test]
fn assembly_is_independent_of_thread_count() {
    let mesh = create_unit_cube_tet_mesh::<f64>(6).unwrap();
    let single_threaded = assemble_with_rank_pools(&mesh, 3, 1);
    let multi_threaded = assemble_with_rank_pools(&mesh, 3, 8);
    assert_eq!(single_threaded, multi_threaded);
    assert_eq!(single_threaded, assemble_parallel(&mesh, 3).unwrap());
}

#[test]
fn assemble_parallel_with_zero_ranks_fails() {
    let mesh = create_unit_cube_tet_mesh::<f64>(2).unwrap();
    assert!(matches!(assemble_parallel(&mesh, 0), Err(Error::InvalidArgument(_))));
}

#[test]
fn assemble_degenerate_mesh_fails() {
    let vertices = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        Point3::new(0.0, 0.0, 1.0),
        Point3::new(1.0, 1.0, 0.0),
    ];
    let connectivity = vec![Tet4Connectivity([0, 1, 2, 3]), Tet4Connectivity([0, 1, 2, 4])];
    let mesh = Mesh::from_vertices_and_connectivity(vertices, connectivity).unwrap();

    match assemble(&mesh) {
        Err(Error::Assembly { rank: 0, source }) => {
            assert!(matches!(*source, Error::DegenerateCell { cell: 1 }))
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn failing_rank_aborts_all_ranks() {
    let mesh = create_unit_cube_tet_mesh::<f64>(3).unwrap();
    let partition = mesh.partition(3).unwrap();
    // The second slab is assembled by rank 1
    let failing_cell = partition.cells(1).start + 5;
    let assembler = FailingAssembler {
        inner: PoissonElementAssembler::new(&mesh),
        failing_cell,
    };

    match assemble_distributed(&assembler, &partition) {
        Err(Error::Assembly { rank: 1, source }) => {
            assert!(matches!(*source, Error::DegenerateCell { cell } if cell == failing_cell))
        }
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn assemble_on_rank_rejects_mismatched_partition() {
    let mesh = create_unit_cube_tet_mesh::<f64>(2).unwrap();
    let assembler = PoissonElementAssembler::new(&mesh);
    let comm = SerialComm::new();

    let two_ranks = mesh.partition(2).unwrap();
    let result = assemble_on_rank(&comm, &assembler, &two_ranks);
    assert!(matches!(result, Err(Error::Assembly { rank: 0, .. })));

    let other_mesh = create_unit_cube_tet_mesh::<f64>(1).unwrap();
    let wrong_size = other_mesh.partition(1).unwrap();
    let result = assemble_on_rank(&comm, &assembler, &wrong_size);
    assert!(matches!(result, Err(Error::Assembly { rank: 0, .. })));
}

#[test]
fn assemble_on_rank_returns_finalized_block() {
    let mesh = create_unit_cube_tet_mesh::<f64>(2).unwrap();
    let assembler = PoissonElementAssembler::new(&mesh);
    let partition = Partition::from_offsets(vec![0, 48], vec![0, 27]).unwrap();
    let matrix = assemble_on_rank(&SerialComm::new(), &assembler, &partition).unwrap();
    assert!(matrix.is_finalized());
    assert_eq!(matrix.num_pending(), 0);
    assert_eq!(matrix.owned_rows(), 0..27);
    assert_eq!(matrix.block().unwrap(), &assemble(&mesh).unwrap());
}

#[test]
fn global_matrix_from_blocks_validation() {
    assert!(matches!(GlobalMatrix::<f64>::from_blocks(vec![]), Err(Error::InvalidArgument(_))));

    let mut first = SparseMatrix::<f64>::with_owned_rows(4, 4, 0..2);
    first.finalize().unwrap();
    let mut last = SparseMatrix::<f64>::with_owned_rows(4, 4, 3..4);
    last.finalize().unwrap();
    // Row 2 is not covered
    assert!(matches!(
        GlobalMatrix::from_blocks(vec![first.clone(), last]),
        Err(Error::InvalidArgument(_))
    ));

    let unfinalized = SparseMatrix::<f64>::with_owned_rows(4, 4, 2..4);
    assert!(matches!(
        GlobalMatrix::from_blocks(vec![first.clone(), unfinalized]),
        Err(Error::Matrix(SparseMatrixError::NotFinalized))
    ));

    let mut rest = SparseMatrix::<f64>::with_owned_rows(4, 4, 2..4);
    rest.add(3, 0, 2.0).unwrap();
    rest.add(3, 0, 1.5).unwrap();
    rest.finalize().unwrap();
    let matrix = GlobalMatrix::from_blocks(vec![first, rest]).unwrap();
    assert_eq!(matrix.nnz(), 1);
    assert_eq!(matrix.get(3, 0), 3.5);
    assert_eq!(matrix.get(0, 3), 0.0);
    assert!(!matrix.is_symmetric(1e-14));
    assert_eq!(matrix.row_sums(), vec![0.0, 0.0, 0.0, 3.5]);
    assert_eq!(matrix.into_csr().nrows(), 4);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn assemble_parallel_agrees_with_serial_assembly(n in 1usize..=4, num_ranks in 1usize..=5) {
        let mesh = create_unit_cube_tet_mesh::<f64>(n).unwrap();
        let serial = assemble(&mesh).unwrap();
        let parallel = assemble_parallel(&mesh, num_ranks).unwrap();
        prop_assert_eq!(parallel.nnz(), serial.nnz());
        prop_assert_matrix_eq!(DMatrix::from(parallel.csr()), DMatrix::from(&serial), comp = abs, tol = 1e-12);
    }
}
