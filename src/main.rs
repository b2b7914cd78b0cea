
use clap::Parser;
use std::process;
use svn_fe::app::Cli;
use svn_fe::util::FATAL_EXIT_CODE;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().run() {
        Ok(_) => {
            process::exit(0);
        }
        Err(e) => {
            eprintln!("fatal: {:#}", e);
            process::exit(FATAL_EXIT_CODE);
        }
    }
}
