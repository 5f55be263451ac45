//! Split a discovery file into chunks.

use std::path::Path;

use console::style;

use crate::services::artifacts;

pub async fn cmd_split(
    input: &Path,
    chunk_size: usize,
    output_dir: Option<&Path>,
) -> anyhow::Result<()> {
    if chunk_size == 0 {
        anyhow::bail!("--chunk-size must be at least 1");
    }
    let out_dir = output_dir
        .or_else(|| input.parent())
        .unwrap_or_else(|| Path::new("."));
    let paths = artifacts::split_file(input, chunk_size, out_dir).await?;

    println!("{} Wrote {} chunks", style("✓").green(), paths.len());
    for path in paths {
        println!("  {}", path.display());
    }
    Ok(())
}
