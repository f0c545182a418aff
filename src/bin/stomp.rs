use clap::Parser;
use std::process::ExitCode;

mod cli;

use cli::args::Cli;
use cli::exit_codes;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::logging::init_logging(cli.log_level);

    match cli::plain::run(&cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err((message, code)) => {
            eprintln!("{}", message);
            ExitCode::from(code)
        }
    }
}
