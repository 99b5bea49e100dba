//! Scattering of element matrices into row-distributed sparse matrices.
//!
//! Assembly on a rank proceeds in two tiers. Within a rank, cells are processed in parallel by
//! `rayon`, with each job accumulating triplets into its own buffer. Across ranks, contributions
//! to rows owned by another rank are stashed and shipped to their owner in a single all-to-all
//! exchange, after which each rank finalizes the block of rows it owns.
use crate::assembly::local::{ElementMatrixAssembler, PoissonElementAssembler};
use crate::comm::{run_ranks, Communicator, SerialComm, ThreadComm};
use crate::mesh::{Mesh, Partition};
use crate::nalgebra::Scalar;
use crate::nalgebra_sparse::CsrMatrix;
use crate::sparse::{SparseMatrix, Triplet};
use crate::{Error, Real};
use log::{debug, info};
use num::Zero;
use rayon::prelude::*;
use std::ops::{AddAssign, Range};

/// Assembles the rows owned by this rank.
///
/// Every rank of the group must call this function with the same partition and assembler.
/// The returned matrix is finalized and owns the rows [`partition.owned_rows(rank)`](Partition::owned_rows).
/// The function returns only after all ranks have finalized their blocks.
///
/// If the local work of a rank fails, the rank returns [`Error::Assembly`] and all other ranks
/// return [`Error::PeerAborted`].
pub fn assemble_on_rank<T, C, A>(
    comm: &C,
    element_assembler: &A,
    partition: &Partition,
) -> Result<SparseMatrix<T>, Error>
where
    T: Scalar + Zero + AddAssign + Send,
    C: Communicator<T> + ?Sized,
    A: ElementMatrixAssembler<T> + ?Sized,
{
    let rank = comm.rank();
    let local_result = assemble_local_contributions(comm, element_assembler, partition).and_then(|mut matrix| {
        let outgoing = split_by_owner(matrix.take_off_process(), partition)?;
        Ok((matrix, outgoing))
    });
    let (local_result, outgoing) = match local_result {
        Ok((matrix, outgoing)) => (Ok(matrix), Some(outgoing)),
        Err(err) => (Err(err), None),
    };
    if outgoing.is_none() {
        debug!("Rank {rank}: local assembly failed, aborting exchange");
    }
    let exchanged = comm.exchange(outgoing);

    // A peer that has shut down will never reach the barrier
    if let Err(err @ Error::Communication { .. }) = exchanged {
        return Err(err);
    }

    let result = match (local_result, exchanged) {
        (Err(err), _) => Err(Error::Assembly {
            rank,
            source: Box::new(err),
        }),
        (Ok(_), Err(err)) => Err(err),
        (Ok(mut matrix), Ok(received)) => {
            debug!("Rank {rank}: received {} contributions from other ranks", received.len());
            let finalized = matrix
                .add_triplets(received)
                .and_then(|_| matrix.finalize());
            finalized.map(|_| matrix).map_err(Error::from)
        }
    };

    comm.barrier();
    result
}

/// Validates the inputs and computes this rank's contributions, stashing off-process rows.
fn assemble_local_contributions<T, C, A>(
    comm: &C,
    element_assembler: &A,
    partition: &Partition,
) -> Result<SparseMatrix<T>, Error>
where
    T: Scalar + Zero + AddAssign + Send,
    C: Communicator<T> + ?Sized,
    A: ElementMatrixAssembler<T> + ?Sized,
{
    let rank = comm.rank();
    if partition.num_ranks() != comm.size() {
        return Err(Error::InvalidArgument(format!(
            "partition has {} ranks, but communicator has {}",
            partition.num_ranks(),
            comm.size()
        )));
    }
    let num_nodes = element_assembler.num_nodes();
    if partition.num_rows() != num_nodes || partition.num_cells() != element_assembler.num_elements() {
        return Err(Error::InvalidArgument(format!(
            "partition of {} cells and {} rows does not match assembler with {} elements and {} nodes",
            partition.num_cells(),
            partition.num_rows(),
            element_assembler.num_elements(),
            num_nodes
        )));
    }

    let cells = partition.cells(rank);
    debug!("Rank {rank}: assembling {} cells", cells.len());

    // try_reduce combines adjacent buffers in order, so the triplets end up in cell order
    // regardless of how rayon splits the range
    let triplets = cells
        .into_par_iter()
        .try_fold(Vec::new, |mut triplets, cell| {
            let element_matrix = element_assembler.assemble_element_matrix(cell)?;
            let nodes = element_assembler.element_nodes(cell);
            for (i, &row) in nodes.iter().enumerate() {
                for (j, &col) in nodes.iter().enumerate() {
                    triplets.push(Triplet::new(row, col, element_matrix[(i, j)].clone()));
                }
            }
            Ok::<_, Error>(triplets)
        })
        .try_reduce(Vec::new, |mut a, b| {
            a.extend(b);
            Ok(a)
        })?;

    let mut matrix = SparseMatrix::with_owned_rows(num_nodes, num_nodes, partition.owned_rows(rank));
    matrix.add_triplets(triplets)?;
    debug!("Rank {rank}: stashed {} off-process contributions", matrix.num_pending());
    Ok(matrix)
}

/// Sorts off-process contributions into one outgoing buffer per owning rank.
fn split_by_owner<T>(triplets: Vec<Triplet<T>>, partition: &Partition) -> Result<Vec<Vec<Triplet<T>>>, Error> {
    let mut outgoing: Vec<Vec<Triplet<T>>> = (0..partition.num_ranks()).map(|_| Vec::new()).collect();
    for triplet in triplets {
        let owner = partition
            .owner_of_row(triplet.row)
            .ok_or_else(|| Error::InvalidArgument(format!("row {} has no owner", triplet.row)))?;
        outgoing[owner].push(triplet);
    }
    Ok(outgoing)
}

/// Assembles the Poisson stiffness matrix of the mesh on a single rank.
pub fn assemble<T: Real>(mesh: &Mesh<T>) -> Result<CsrMatrix<T>, Error> {
    let partition = mesh.partition(1)?;
    let assembler = PoissonElementAssembler::new(mesh);
    let matrix = assemble_on_rank(&SerialComm::new(), &assembler, &partition)?;
    Ok(matrix.into_block()?)
}

/// Assembles the Poisson stiffness matrix of the mesh on `num_ranks` thread ranks.
pub fn assemble_parallel<T: Real>(mesh: &Mesh<T>, num_ranks: usize) -> Result<GlobalMatrix<T>, Error> {
    let partition = mesh.partition(num_ranks)?;
    let assembler = PoissonElementAssembler::new(mesh);
    assemble_distributed(&assembler, &partition)
}

/// Runs [`assemble_on_rank`] on one thread rank per part of the partition and gathers the blocks.
///
/// If several ranks fail, the error of the lowest failing rank is returned.
pub fn assemble_distributed<T, A>(element_assembler: &A, partition: &Partition) -> Result<GlobalMatrix<T>, Error>
where
    T: Scalar + Zero + AddAssign + Send,
    A: ElementMatrixAssembler<T> + ?Sized,
{
    let num_ranks = partition.num_ranks();
    let results = run_ranks(num_ranks, |comm: ThreadComm<T>| {
        assemble_on_rank(&comm, element_assembler, partition)
    });

    let mut blocks = Vec::with_capacity(num_ranks);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(block) => blocks.push(block),
            Err(Error::PeerAborted { rank }) => {
                first_error.get_or_insert(Error::PeerAborted { rank });
            }
            Err(err) => {
                // Errors that name their cause take precedence over peer aborts
                if matches!(first_error, None | Some(Error::PeerAborted { .. })) {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    let matrix = GlobalMatrix::from_blocks(blocks)?;
    info!(
        "Assembled {} x {} matrix with {} non-zeros on {} ranks",
        matrix.nrows(),
        matrix.ncols(),
        matrix.nnz(),
        num_ranks
    );
    Ok(matrix)
}

/// The gathered result of a distributed assembly.
///
/// The matrix is the concatenation of the finalized row blocks of all ranks, in rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMatrix<T> {
    csr: CsrMatrix<T>,
    row_blocks: Vec<Range<usize>>,
}

impl<T> GlobalMatrix<T>
where
    T: Scalar + Zero + AddAssign,
{
    /// Concatenates finalized row blocks.
    ///
    /// The blocks must be finalized, have the same shape, and own consecutive row ranges that
    /// together cover all rows.
    pub fn from_blocks(blocks: Vec<SparseMatrix<T>>) -> Result<Self, Error> {
        let (nrows, ncols) = match blocks.first() {
            Some(block) => (block.nrows(), block.ncols()),
            None => return Err(Error::InvalidArgument("at least one row block is required".to_string())),
        };

        let mut row_blocks = Vec::with_capacity(blocks.len());
        let mut next_row = 0;
        for block in &blocks {
            let rows = block.owned_rows();
            if block.nrows() != nrows || block.ncols() != ncols || rows.start != next_row {
                return Err(Error::InvalidArgument(format!(
                    "row block {rows:?} of a {} x {} matrix does not continue \
                     a {nrows} x {ncols} matrix at row {next_row}",
                    block.nrows(),
                    block.ncols()
                )));
            }
            next_row = rows.end;
            row_blocks.push(rows);
        }
        if next_row != nrows {
            return Err(Error::InvalidArgument(format!(
                "row blocks cover {next_row} of {nrows} rows"
            )));
        }

        let nnz = blocks
            .iter()
            .map(|block| block.block().map_or(0, |csr| csr.nnz()))
            .sum();
        let mut offsets = Vec::with_capacity(nrows + 1);
        let mut col_indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        offsets.push(0);
        for block in blocks {
            let csr = block.into_block()?;
            let (block_offsets, block_cols, block_values) = csr.disassemble();
            let base = col_indices.len();
            offsets.extend(block_offsets.iter().skip(1).map(|offset| base + offset));
            col_indices.extend(block_cols);
            values.extend(block_values);
        }

        let csr = CsrMatrix::try_from_csr_data(nrows, ncols, offsets, col_indices, values)
            .expect("Concatenation of valid CSR blocks is a valid CSR matrix");
        Ok(Self { csr, row_blocks })
    }

    pub fn nrows(&self) -> usize {
        self.csr.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.csr.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.csr.nnz()
    }

    /// The entry at `(row, col)`, which is zero if the entry is not stored.
    ///
    /// # Panics
    ///
    /// Panics if the position is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> T {
        self.csr
            .get_entry(row, col)
            .map(|entry| entry.into_value())
            .unwrap_or_else(|| {
                panic!(
                    "Entry ({row}, {col}) out of bounds for {} x {} matrix",
                    self.nrows(),
                    self.ncols()
                )
            })
    }

    pub fn csr(&self) -> &CsrMatrix<T> {
        &self.csr
    }

    pub fn into_csr(self) -> CsrMatrix<T> {
        self.csr
    }

    /// The rows contributed by each rank, in rank order.
    pub fn row_blocks(&self) -> &[Range<usize>] {
        &self.row_blocks
    }
}

impl<T: Real> GlobalMatrix<T> {
    /// Whether `|a_ij - a_ji| <= tol` holds for all entries.
    pub fn is_symmetric(&self, tol: T) -> bool {
        self.nrows() == self.ncols()
            && self
                .csr
                .triplet_iter()
                .all(|(i, j, &a_ij)| (a_ij - self.get(j, i)).abs() <= tol)
    }

    /// The sum of the entries of each row.
    pub fn row_sums(&self) -> Vec<T> {
        self.csr
            .row_iter()
            .map(|row| row.values().iter().fold(T::zero(), |sum, &v| sum + v))
            .collect()
    }
}
