use std::process::ExitCode;

use utoipa::OpenApi;

fn main() -> ExitCode {
    let out = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../specs/chat-api.json");

    let result = chat_api::routes::ApiDoc::openapi()
        .to_pretty_json()
        .map_err(|e| e.to_string())
        .and_then(|json| {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            std::fs::write(&out, json).map_err(|e| e.to_string())
        });

    match result {
        Ok(()) => {
            println!("Wrote {}", out.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to write {}: {e}", out.display());
            ExitCode::FAILURE
        }
    }
}
