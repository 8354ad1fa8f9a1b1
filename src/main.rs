use std::process::ExitCode;

fn main() -> ExitCode {
    availsync::init_logging("info");
    let root = std::env::args().nth(1);
    match availsync::bootstrap(root) {
        Ok(response) => match serde_json::to_string_pretty(&response) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to encode bootstrap response");
                ExitCode::FAILURE
            }
        },
        Err(message) => {
            tracing::error!(error = %message, "bootstrap failed");
            ExitCode::FAILURE
        }
    }
}
