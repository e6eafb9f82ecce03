use std::process::ExitCode;

use clap::Parser;

use switchbot::{Args, RunError, real_backend, run_with_log_level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let log_level = args.log_level();
    let output_format = args.output_format();
    let run_result = run_with_log_level(
        args.into_command(),
        &mut stdout,
        real_backend(),
        log_level,
        output_format,
    )
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(error.downcast_ref::<RunError>().map_or(1, RunError::exit_code))
        }
    }
}
