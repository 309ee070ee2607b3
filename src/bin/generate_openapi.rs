//! Dumps the gateway's OpenAPI document.
//!
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output docs/openapi.json

use std::{fs, io::Write, path::PathBuf};

use anyhow::{Context, Result};
use hydroponic_gateway::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let doc = ApiDoc::openapi();
    let json = doc
        .to_pretty_json()
        .context("can not serialise OpenAPI document")?;

    let mut args = std::env::args().skip(1);
    let mut output: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--output" | "-o" => {
                let path = args.next().context("--output needs a path")?;
                output = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unexpected argument {other:?}"),
        }
    }

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("can not create {}", parent.display()))?;
            }
            fs::write(&path, &json).with_context(|| format!("can not write {}", path.display()))?;
            eprintln!(
                "OpenAPI document ({} paths) written to {}",
                doc.paths.paths.len(),
                path.display()
            );
        }
        None => std::io::stdout()
            .write_all(json.as_bytes())
            .context("can not write to stdout")?,
    }
    Ok(())
}
