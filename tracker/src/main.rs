use clap::Parser;
use std::process::ExitCode;
use tracker::Cli;

fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let mut cmd: Cli = Cli::parse();
    match cmd.run_program() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}
