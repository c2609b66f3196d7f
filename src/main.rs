#![deny(warnings)]

use std::process::ExitCode;

use log_forwarder::app::Application;

fn main() -> ExitCode {
    let exit_code = Application::run();
    ExitCode::from(u8::try_from(exit_code).unwrap_or(u8::MAX))
}
