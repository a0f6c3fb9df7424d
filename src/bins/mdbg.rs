use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use tracing::debug;

use minidbg::debugger::Debugger;
use minidbg::errors::Result;
use minidbg::ui::cli::CliUi;

/// Launch the mini debugger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to debug
    program: PathBuf,
}

fn main() {
    setup_logger();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // a missing program path is a usage error, not a crash
            eprintln!("{e}");
            exit(-1);
        }
    };

    if let Err(e) = run(&args) {
        eprintln!("{e}");
        exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let ui = CliUi::build()?;
    let mut dbg = Debugger::build(ui);
    dbg.launch(&args.program)?;
    dbg.run_debugger()?;
    if let Err(e) = dbg.cleanup() {
        debug!("while cleaning up the debuggee: {e}");
    }
    Ok(())
}

fn setup_logger() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
