#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

const MAX_IMAGE_SIZE: u64 = 0x80_0000;

#[derive(Debug, Parser)]
#[command(name = "kasm", about = "Assembler for the Kestrel register machine")]
struct Args {
    /// Input assembly source.
    input: PathBuf,

    /// Output image path (defaults to the input with an `.img` extension).
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Output image size in bytes, decimal or 0x-hex (defaults to the
    /// program's length).
    #[arg(short = 's', value_parser = parse_size)]
    size: Option<u64>,
}

fn parse_size(s: &str) -> Result<u64, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())?;

    if !(1..=MAX_IMAGE_SIZE).contains(&value) {
        return Err(format!(
            "image size must be between 1 and {MAX_IMAGE_SIZE:#x} bytes"
        ));
    }
    Ok(value)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let image = match args.size {
        Some(size) => kestrel_asm::assemble_image(&source, size as usize),
        None => kestrel_asm::assemble(&source),
    }
    .map_err(|e| anyhow!("{e}"))?;

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("img"));
    fs::write(&output, &image)
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(())
}
