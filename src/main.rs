use std::process::ExitCode;

mod app;
mod logging;

use vault_mover::output as out;

fn main() -> ExitCode {
    let args = vault_mover::cli::parse();
    match app::run(args) {
        Ok(app::Exit::Ok) => ExitCode::SUCCESS,
        Ok(app::Exit::Partial) => ExitCode::from(2),
        Err(e) => {
            out::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
