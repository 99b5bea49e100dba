use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use cubefem::assembly::global::assemble_on_rank;
use cubefem::assembly::local::PoissonElementAssembler;
use cubefem::comm::{run_ranks, Communicator, ThreadComm};
use cubefem::mesh::procedural::create_unit_cube_tet_mesh;
use cubefem::timing::{format_significant, TimingSummary};
use cubefem::Error;
use log::{info, LevelFilter};
use std::process;
use std::time::Instant;

/// Assembles the Poisson stiffness matrix on a tetrahedral mesh of the unit cube and reports
/// the assembly time.
#[derive(Parser, Debug)]
#[command(about, version)]
struct Cli {
    /// Number of grid cells along each axis of the unit cube
    n: usize,

    /// Number of ranks that assemble in parallel
    #[arg(short, long, default_value_t = 1)]
    ranks: usize,

    /// Log per-rank timings and matrix statistics
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                println!("{}", Cli::command().render_usage());
                process::exit(1);
            }
        },
    };

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        })
        .format_timestamp(None)
        .init();

    match run(&cli) {
        Ok(seconds) => println!("TIME: {}", format_significant(seconds, 5)),
        Err(err) => {
            eprintln!("Error: {err:?}");
            process::exit(1);
        }
    }
}

/// Assembles the matrix on all ranks and returns the assembly time measured on rank 0.
fn run(cli: &Cli) -> eyre::Result<f64> {
    if cli.ranks == 0 {
        return Err(Error::InvalidArgument("number of ranks must be positive".to_string()).into());
    }

    let mesh = create_unit_cube_tet_mesh::<f64>(cli.n)?;
    let partition = mesh.partition(cli.ranks)?;
    let assembler = PoissonElementAssembler::new(&mesh);
    info!(
        "Assembling on {} ranks: {} cells, {} vertices",
        cli.ranks,
        mesh.num_cells(),
        mesh.num_vertices()
    );

    let results = run_ranks(cli.ranks, |comm: ThreadComm<f64>| -> Result<f64, Error> {
        comm.barrier();
        let start = Instant::now();
        // Assembly ends with a barrier, so the clock stops once every rank has its block
        let matrix = assemble_on_rank(&comm, &assembler, &partition)?;
        let seconds = start.elapsed().as_secs_f64();

        if cli.verbose {
            let nnz = matrix.block().map_or(0, |block| block.nnz());
            info!(
                "Rank {}: rows {:?}, {} non-zeros, {} ghost rows",
                comm.rank(),
                matrix.owned_rows(),
                nnz,
                partition.ghost_rows(&mesh, comm.rank()).len()
            );
            let summary = TimingSummary::reduce(&comm, seconds)?;
            if comm.rank() == 0 {
                info!("Assembly time over {} ranks: {}", comm.size(), summary);
            }
        }
        Ok(seconds)
    });

    let mut rank_zero_seconds = None;
    let mut first_error: Option<Error> = None;
    for result in results {
        match result {
            Ok(seconds) => {
                rank_zero_seconds.get_or_insert(seconds);
            }
            Err(err) => {
                if matches!(first_error, None | Some(Error::PeerAborted { .. })) {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err.into());
    }
    rank_zero_seconds.ok_or_else(|| eyre::eyre!("no rank reported a timing"))
}
