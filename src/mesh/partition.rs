//! Distribution of cells and matrix rows across ranks.
use crate::mesh::Mesh;
use crate::sparse::partition_rows;
use crate::Error;
use log::warn;
use nalgebra::Scalar;
use std::iter;
use std::ops::Range;

/// Assignment of contiguous cell ranges and contiguous row ranges to ranks.
///
/// Rank `r` assembles the cells in [`cells(r)`](Self::cells) and is the sole owner of the
/// matrix rows in [`owned_rows(r)`](Self::owned_rows). Both kinds of ranges tile their index
/// space in rank order. Ranges may be empty when there are more ranks than units of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    cell_offsets: Vec<usize>,
    row_offsets: Vec<usize>,
}

impl Partition {
    /// Creates a partition from per-rank offsets.
    ///
    /// Both offset arrays must have length `num_ranks + 1`, start at zero and be non-decreasing.
    pub fn from_offsets(cell_offsets: Vec<usize>, row_offsets: Vec<usize>) -> Result<Self, Error> {
        let is_valid_offset_array =
            |offsets: &[usize]| offsets.first() == Some(&0) && offsets.windows(2).all(|w| w[0] <= w[1]);
        if cell_offsets.len() != row_offsets.len() || cell_offsets.len() < 2 {
            return Err(Error::InvalidArgument(
                "cell and row offsets must both have length num_ranks + 1 with at least one rank".to_string(),
            ));
        }
        if !is_valid_offset_array(&cell_offsets) || !is_valid_offset_array(&row_offsets) {
            return Err(Error::InvalidArgument(
                "partition offsets must start at zero and be non-decreasing".to_string(),
            ));
        }
        Ok(Self {
            cell_offsets,
            row_offsets,
        })
    }

    pub fn num_ranks(&self) -> usize {
        self.cell_offsets.len() - 1
    }

    pub fn num_cells(&self) -> usize {
        self.cell_offsets[self.num_ranks()]
    }

    pub fn num_rows(&self) -> usize {
        self.row_offsets[self.num_ranks()]
    }

    /// The cells assembled by the given rank.
    ///
    /// # Panics
    ///
    /// Panics if the rank is out of bounds.
    pub fn cells(&self, rank: usize) -> Range<usize> {
        self.cell_offsets[rank]..self.cell_offsets[rank + 1]
    }

    /// The matrix rows owned by the given rank.
    ///
    /// # Panics
    ///
    /// Panics if the rank is out of bounds.
    pub fn owned_rows(&self, rank: usize) -> Range<usize> {
        self.row_offsets[rank]..self.row_offsets[rank + 1]
    }

    /// Returns the rank that owns the given row, or `None` if the row is out of bounds.
    pub fn owner_of_row(&self, row: usize) -> Option<usize> {
        if row >= self.num_rows() {
            return None;
        }
        // Ranks with empty row ranges share their offset with the next rank, so the last offset
        // that does not exceed the row belongs to the (non-empty) owner
        let num_offsets_not_exceeding_row = self.row_offsets.partition_point(|&offset| offset <= row);
        Some(num_offsets_not_exceeding_row - 1)
    }

    /// Rows that are referenced by the cells of the given rank, but owned by another rank.
    ///
    /// The returned rows are sorted and unique.
    pub fn ghost_rows<T: Scalar>(&self, mesh: &Mesh<T>, rank: usize) -> Vec<usize> {
        let owned = self.owned_rows(rank);
        let mut ghosts: Vec<usize> = mesh.connectivity()[self.cells(rank)]
            .iter()
            .flat_map(|conn| conn.vertex_indices().iter().copied())
            .filter(|vertex| !owned.contains(vertex))
            .collect();
        ghosts.sort_unstable();
        ghosts.dedup();
        ghosts
    }
}

/// Offsets that split `num_items` into `num_parts` contiguous parts of near-equal size.
fn even_offsets(num_items: usize, num_parts: usize) -> Vec<usize> {
    let parts = partition_rows(num_items, num_parts);
    iter::once(0).chain(parts.iter().map(|part| part.end)).collect()
}

impl<T: Scalar> Mesh<T> {
    /// Partitions the mesh into `num_ranks` contiguous parts.
    ///
    /// Meshes generated on a structured grid are split into slabs along the z-axis: rank `r`
    /// assembles the cells of slabs `k_r .. k_{r+1}`, where `k_r = r nz / num_ranks`, and owns the
    /// rows of the vertex layers `k_r .. k_{r+1}`. The last rank additionally owns the top layer.
    /// Other meshes are split evenly by cell and vertex index.
    pub fn partition(&self, num_ranks: usize) -> Result<Partition, Error> {
        if num_ranks == 0 {
            return Err(Error::InvalidArgument("number of ranks must be positive".to_string()));
        }

        let (cell_offsets, mut row_offsets) = match self.grid_resolution() {
            Some([nx, ny, nz]) => {
                if num_ranks > nz {
                    warn!("{num_ranks} ranks for {nz} slabs: some ranks will not assemble any cells");
                }
                let cells_per_slab = 6 * nx * ny;
                let vertices_per_layer = (nx + 1) * (ny + 1);
                let slab_offsets = even_offsets(nz, num_ranks);
                (
                    slab_offsets.iter().map(|k| k * cells_per_slab).collect(),
                    slab_offsets.iter().map(|k| k * vertices_per_layer).collect::<Vec<_>>(),
                )
            }
            None => (
                even_offsets(self.num_cells(), num_ranks),
                even_offsets(self.num_vertices(), num_ranks),
            ),
        };

        if let Some(last) = row_offsets.last_mut() {
            *last = self.num_vertices();
        }
        Partition::from_offsets(cell_offsets, row_offsets)
    }
}
