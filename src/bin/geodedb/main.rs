use anyhow::Result;
use clap::Parser;

mod cli;
mod cmd_alloc;
mod cmd_check;
mod cmd_free;
mod cmd_init;
mod cmd_status;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Init { path, page_size } => cmd_init::exec(path, page_size),

        cli::Cmd::Status { path, json } => cmd_status::exec(path, json),

        cli::Cmd::Check { path, json } => cmd_check::exec(path, json),

        cli::Cmd::Alloc { path, size, count } => cmd_alloc::exec(path, size, count),

        cli::Cmd::Free { path, page } => cmd_free::exec(path, page),
    }
}
