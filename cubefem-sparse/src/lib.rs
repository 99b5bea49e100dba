//! Sparse matrix accumulation for finite element assembly.
//!
//! A [`SparseMatrix`] collects `(row, col, value)` contributions in an insertion-friendly triplet
//! format and is then finalized into a compressed (CSR) block. Each matrix owns a contiguous range
//! of rows. Contributions to rows outside of that range are not stored in the matrix itself, but
//! are stashed so that they can be sent to the owner of the row.
use itertools::izip;
use nalgebra::Scalar;
use nalgebra_sparse::CsrMatrix;
use num::Zero;
use std::ops::{AddAssign, Range};

pub extern crate nalgebra_sparse;

/// A single `(row, col, value)` contribution to a sparse matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet<T> {
    pub row: usize,
    pub col: usize,
    pub value: T,
}

impl<T> Triplet<T> {
    pub fn new(row: usize, col: usize, value: T) -> Self {
        Self { row, col, value }
    }
}

/// Errors returned by [`SparseMatrix`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SparseMatrixError {
    /// The matrix was finalized, so it no longer accepts contributions.
    #[error("the matrix has already been finalized")]
    Finalized,
    /// The operation requires a finalized matrix.
    #[error("the matrix has not been finalized")]
    NotFinalized,
    #[error("entry ({row}, {col}) is out of bounds for a {nrows}x{ncols} matrix")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    /// Contributions to rows owned elsewhere were never taken out of the stash.
    #[error("{count} off-process contributions must be exchanged before finalizing")]
    PendingOffProcess { count: usize },
}

#[derive(Debug, Clone)]
enum Entries<T: Scalar> {
    Building {
        rows: Vec<usize>,
        cols: Vec<usize>,
        values: Vec<T>,
    },
    Finalized(CsrMatrix<T>),
}

/// A sparse matrix that is assembled by accumulation and then finalized.
///
/// Before [`finalize`](Self::finalize) is called, the matrix is a list of triplets in which
/// duplicate entries are allowed. Finalizing sums duplicates and compresses the owned rows into
/// a CSR block with `owned_rows().len()` rows and `ncols()` columns. The row indices of the block
/// are local, i.e. row `owned_rows().start` of the matrix is row `0` of the block.
#[derive(Debug, Clone)]
pub struct SparseMatrix<T: Scalar> {
    nrows: usize,
    ncols: usize,
    owned_rows: Range<usize>,
    entries: Entries<T>,
    off_process: Vec<Triplet<T>>,
}

impl<T> SparseMatrix<T>
where
    T: Scalar + Zero + AddAssign,
{
    /// Creates an empty matrix that owns all of its rows.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self::with_owned_rows(nrows, ncols, 0..nrows)
    }

    /// Creates an empty matrix that owns the given range of rows.
    ///
    /// # Panics
    ///
    /// Panics if the range of owned rows is not contained in `0 .. nrows`.
    pub fn with_owned_rows(nrows: usize, ncols: usize, owned_rows: Range<usize>) -> Self {
        assert!(
            owned_rows.start <= owned_rows.end && owned_rows.end <= nrows,
            "Owned rows {owned_rows:?} must be contained in 0 .. {nrows}"
        );
        Self {
            nrows,
            ncols,
            owned_rows,
            entries: Entries::Building {
                rows: Vec::new(),
                cols: Vec::new(),
                values: Vec::new(),
            },
            off_process: Vec::new(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn owned_rows(&self) -> Range<usize> {
        self.owned_rows.clone()
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.entries, Entries::Finalized(_))
    }

    /// Adds `value` to the entry at `(row, col)`.
    ///
    /// Entries that do not exist yet are created. If `row` is not owned by this matrix, the
    /// contribution is placed in the off-process stash, see [`take_off_process`](Self::take_off_process).
    pub fn add(&mut self, row: usize, col: usize, value: T) -> Result<(), SparseMatrixError> {
        if self.is_finalized() {
            return Err(SparseMatrixError::Finalized);
        }
        if row >= self.nrows || col >= self.ncols {
            return Err(SparseMatrixError::IndexOutOfBounds {
                row,
                col,
                nrows: self.nrows,
                ncols: self.ncols,
            });
        }

        match &mut self.entries {
            Entries::Finalized(_) => Err(SparseMatrixError::Finalized),
            Entries::Building { rows, cols, values } => {
                if self.owned_rows.contains(&row) {
                    rows.push(row);
                    cols.push(col);
                    values.push(value);
                } else {
                    self.off_process.push(Triplet::new(row, col, value));
                }
                Ok(())
            }
        }
    }

    pub fn add_triplets<I>(&mut self, triplets: I) -> Result<(), SparseMatrixError>
    where
        I: IntoIterator<Item = Triplet<T>>,
    {
        for Triplet { row, col, value } in triplets {
            self.add(row, col, value)?;
        }
        Ok(())
    }

    /// Number of stashed contributions to rows that this matrix does not own.
    pub fn num_pending(&self) -> usize {
        self.off_process.len()
    }

    /// Removes and returns all contributions to rows that this matrix does not own.
    pub fn take_off_process(&mut self) -> Vec<Triplet<T>> {
        std::mem::take(&mut self.off_process)
    }

    /// Compresses the owned rows into a CSR block, summing duplicate entries.
    ///
    /// After finalization, [`add`](Self::add) fails with [`SparseMatrixError::Finalized`].
    pub fn finalize(&mut self) -> Result<(), SparseMatrixError> {
        if !self.off_process.is_empty() {
            return Err(SparseMatrixError::PendingOffProcess {
                count: self.off_process.len(),
            });
        }

        let block = match &mut self.entries {
            Entries::Finalized(_) => return Err(SparseMatrixError::Finalized),
            Entries::Building { rows, cols, values } => {
                let num_local_rows = self.owned_rows.len();
                let row_start = self.owned_rows.start;
                for row in rows.iter_mut() {
                    *row -= row_start;
                }
                compress_triplets(
                    num_local_rows,
                    self.ncols,
                    &std::mem::take(rows),
                    &std::mem::take(cols),
                    &std::mem::take(values),
                )
            }
        };
        self.entries = Entries::Finalized(block);
        Ok(())
    }

    /// The compressed block of owned rows, if the matrix has been finalized.
    pub fn block(&self) -> Option<&CsrMatrix<T>> {
        match &self.entries {
            Entries::Finalized(block) => Some(block),
            Entries::Building { .. } => None,
        }
    }

    pub fn into_block(self) -> Result<CsrMatrix<T>, SparseMatrixError> {
        match self.entries {
            Entries::Finalized(block) => Ok(block),
            Entries::Building { .. } => Err(SparseMatrixError::NotFinalized),
        }
    }

    /// Returns the value at the given (global) position.
    ///
    /// Returns `None` if the matrix has not been finalized, if the row is not owned, or if the
    /// entry is out of bounds. Owned entries outside of the sparsity pattern are zero.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        let block = self.block()?;
        if !self.owned_rows.contains(&row) {
            return None;
        }
        block
            .get_entry(row - self.owned_rows.start, col)
            .map(|entry| entry.into_value())
    }
}

/// Splits `nrows` rows into `num_parts` contiguous ranges whose sizes differ by at most one.
///
/// # Panics
///
/// Panics if `num_parts` is zero.
pub fn partition_rows(nrows: usize, num_parts: usize) -> Vec<Range<usize>> {
    assert!(num_parts > 0, "Number of parts must be positive");
    let offset = |part: usize| part * nrows / num_parts;
    (0..num_parts).map(|part| offset(part)..offset(part + 1)).collect()
}

/// Compresses triplets with (local) row indices into a CSR matrix with sorted columns,
/// summing duplicate entries.
fn compress_triplets<T>(nrows: usize, ncols: usize, rows: &[usize], cols: &[usize], values: &[T]) -> CsrMatrix<T>
where
    T: Scalar + Zero + AddAssign,
{
    let (unsorted_offsets, unsorted_cols, unsorted_values) = triplets_to_unsorted_csr(nrows, rows, cols, values);

    let mut offsets = Vec::with_capacity(nrows + 1);
    let mut col_indices = Vec::with_capacity(unsorted_cols.len());
    let mut csr_values = Vec::with_capacity(unsorted_values.len());
    offsets.push(0);

    // Rows usually hold few entries, so the permutation buffer is reused across rows
    let mut permutation = Vec::new();
    for row in 0..nrows {
        let range = unsorted_offsets[row]..unsorted_offsets[row + 1];
        let row_cols = &unsorted_cols[range.clone()];
        let row_values = &unsorted_values[range];

        permutation.clear();
        permutation.extend(0..row_cols.len());
        // A stable sort keeps the summation order of duplicates equal to the insertion order
        permutation.sort_by_key(|&idx| row_cols[idx]);

        let mut current_col = None;
        for &idx in &permutation {
            let col = row_cols[idx];
            let value = row_values[idx].clone();
            if current_col == Some(col) {
                if let Some(last) = csr_values.last_mut() {
                    *last += value;
                }
            } else {
                col_indices.push(col);
                csr_values.push(value);
                current_col = Some(col);
            }
        }
        offsets.push(col_indices.len());
    }

    CsrMatrix::try_from_csr_data(nrows, ncols, offsets, col_indices, csr_values)
        .expect("CSR data is sorted and free of duplicates by construction")
}

/// Buckets triplets by row, retaining duplicates and the insertion order within each row.
fn triplets_to_unsorted_csr<T>(
    nrows: usize,
    rows: &[usize],
    cols: &[usize],
    values: &[T],
) -> (Vec<usize>, Vec<usize>, Vec<T>)
where
    T: Scalar + Zero,
{
    assert_eq!(rows.len(), cols.len());
    assert_eq!(cols.len(), values.len());

    let mut offsets = vec![0usize; nrows + 1];
    for &row in rows {
        offsets[row + 1] += 1;
    }
    for i in 0..nrows {
        offsets[i + 1] += offsets[i];
    }

    let mut csr_cols = vec![0usize; cols.len()];
    let mut csr_values = vec![T::zero(); values.len()];
    let mut next = offsets.clone();
    for (&row, &col, value) in izip!(rows, cols, values) {
        let pos = next[row];
        csr_cols[pos] = col;
        csr_values[pos] = value.clone();
        next[row] += 1;
    }

    (offsets, csr_cols, csr_values)
}
