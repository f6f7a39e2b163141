use clap::Parser;
use tradeloom::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
