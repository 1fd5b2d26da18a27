use std::process::ExitCode;

fn main() -> ExitCode {
    attest_cli::run()
}
