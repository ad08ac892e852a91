use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use ioxide_reactor::Dispatcher;
use ioxide_scheme::{bind_dispatcher, Interpreter, Value};
use ioxide_server::{init_logging, DISPATCHER_GLOBAL};
use tracing::debug;

#[derive(Parser)]
#[command(version, about = "Standalone ioxide Scheme interpreter", long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Evaluate an expression before loading files
    #[arg(short, long = "eval", value_name = "CODE")]
    eval: Vec<String>,

    /// Exit after the files instead of reading standard input
    #[arg(short, long)]
    quit: bool,

    /// Scheme files to load in order
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging("ioxide", cli.debug, false)?;

    let dispatcher = Dispatcher::new();
    let interp = Interpreter::with_extensions();
    bind_dispatcher(&interp, DISPATCHER_GLOBAL, &dispatcher);

    for code in &cli.eval {
        interp.eval_str(code)?;
    }
    for file in &cli.files {
        debug!("Loading {}", file.display());
        interp.load_file(file)?;
    }
    if cli.quit {
        return Ok(());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match interp.eval_str(&line) {
            Ok(Value::Unspecified) => {}
            Ok(value) => writeln!(stdout, "{value}")?,
            Err(err) => eprintln!("error: {err}"),
        }
        stdout.flush()?;
    }
    Ok(())
}
