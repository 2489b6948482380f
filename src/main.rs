//! Activara CLI
//!
//! Solve an activation problem described by a TOML problem file, then
//! print the postprocessed concentration tables from the binary dump.
//!
//! ```bash
//! activara reactor_wall.toml -v 2 -t chains.jsonl
//! activara reactor_wall.toml -r        # reuse the existing dump
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use activara::data::DataLibrary;
use activara::results::BinaryDump;
use activara::solver::write_summary;
use activara::{ChainTrace, Config, Error, ProblemFile, Solver};

#[derive(Parser, Debug)]
#[command(name = "activara", disable_version_flag = true)]
#[command(about = "Nuclide activation chain engine")]
struct Args {
    /// Problem description file
    input: PathBuf,

    /// Verbosity: 0 = warnings, 1 = info, 2 = debug, 3+ = trace
    #[arg(short, long, default_value_t = 0)]
    verbose: u8,

    /// Reuse the existing binary dump and skip the solve phase
    #[arg(short = 'r', long)]
    reuse_dump: bool,

    /// Write a chain tree trace (JSON lines) to this path
    #[arg(short = 't', long, value_name = "PATH")]
    tree: Option<PathBuf>,

    /// Print version and exit
    #[arg(short = 'V', long)]
    version: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.version {
        println!("activara {}", activara::VERSION);
        return ExitCode::SUCCESS;
    }

    init_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("activara: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("ACTIVARA_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("activara={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<(), Error> {
    let config = Config::load()?;
    let problem = ProblemFile::read(&args.input)?;

    let library = DataLibrary::open(&problem.library.path)?;
    let setup = problem.preprocess(library.n_groups())?;
    let root_kzas: Vec<_> = setup.roots.iter().map(|r| r.kza).collect();
    let cooling = setup.schedule.cooling_times.clone();
    let dump_path = setup.dump_path.clone();

    let mut reader = if args.reuse_dump {
        tracing::info!(path = %dump_path.display(), "reusing binary dump");
        BinaryDump::open_existing(&dump_path)?.rewind_for_read()?
    } else {
        let mut trace = match &args.tree {
            Some(path) => Some(ChainTrace::create(path).map_err(|source| {
                Error::Dump(activara::error::DumpError::Io {
                    path: path.clone(),
                    source,
                })
            })?),
            None => None,
        };

        let mut solver = Solver::with_library(config, setup, library);
        let report = solver.solve(trace.as_mut())?;
        if let Some(trace) = trace {
            trace.finish();
        }
        report.dump.rewind_for_read()?
    };

    let mut stdout = std::io::stdout().lock();
    write_summary(&mut stdout, &mut reader, &root_kzas, &cooling)?;
    Ok(())
}
