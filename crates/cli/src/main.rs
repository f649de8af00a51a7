use std::process::ExitCode;

fn main() -> ExitCode {
    beerbot_cli::run()
}
