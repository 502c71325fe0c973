//! `rebrand` - transactional mass find-and-replace engine.
//!
//! See `README.md` for user documentation and `DESIGN.md` for architecture.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rebrand::cli::{Cli, Command};
use rebrand::exit_codes::exit;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Schema => {
            println!("{}", rebrand::model::generate_schema());
            Ok(exit::SUCCESS)
        }
        Command::Scan(args) => rebrand::engine::scan(args),
        Command::Execute(args) => rebrand::engine::execute(args),
        Command::Run(args) => rebrand::engine::run(args),
        Command::SelfTest(args) => rebrand::selftest::run(&args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(exit::FATAL);
        }
    }
}
