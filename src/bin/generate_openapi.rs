//! Writes the OpenAPI document to `openapi.json`.

use loan_orchestrator::openapi::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let json = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write("openapi.json", &json)?;
    println!("Wrote openapi.json ({} bytes)", json.len());
    Ok(())
}
