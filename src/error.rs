use cubefem_sparse::SparseMatrixError;

/// Library-wide error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A user-supplied parameter, such as the mesh resolution or the number of ranks, is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The vertices of a cell are (nearly) coplanar, so its Jacobian is singular.
    #[error("cell {cell} is degenerate")]
    DegenerateCell { cell: usize },
    /// Local computations failed on the given rank.
    #[error("assembly failed on rank {rank}")]
    Assembly {
        rank: usize,
        #[source]
        source: Box<Error>,
    },
    /// Another rank failed, which aborts the collective operation on this rank.
    #[error("rank {rank} aborted the collective operation")]
    PeerAborted { rank: usize },
    #[error(transparent)]
    Matrix(#[from] SparseMatrixError),
    #[error("communication with rank {peer} failed: {reason}")]
    Communication { peer: usize, reason: String },
}
