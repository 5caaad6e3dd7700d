use std::env;
use std::fs;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out = PathBuf::from(env::var("OUT_DIR")?);
    let mut features: Vec<String> = env::vars()
        .filter_map(|(k, _)| k.strip_prefix("CARGO_FEATURE_").map(|n| n.to_ascii_lowercase().replace('_', "-")))
        .collect();
    features.sort();
    let list = features.iter().map(|s| format!("\"{s}\"")).collect::<Vec<_>>().join(", ");
    fs::write(
        out.join("compiled_features.rs"),
        format!("pub static COMPILED_FEATURES: &[&str] = &[{list}];\n"),
    )?;
    Ok(())
}
