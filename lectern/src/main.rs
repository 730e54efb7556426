use clap::Parser;
use colored::Colorize;
use lectern::Args;
use std::process;

fn main() {
    let _ = dotenvy::dotenv();

    if let Err(e) = Args::parse().execute() {
        eprintln!("{}: {:#}", "error".bold().red(), e);
        process::exit(1);
    }
}
