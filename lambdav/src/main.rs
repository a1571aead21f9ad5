use clap::Parser;
use lambdav_core::Compiler;
use log::{error, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "lambdav")]
#[command(about = "An s-expression fragment shader compiler targeting SPIR-V", long_about = None)]
struct Cli {
    /// Input source file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output SPIR-V file
    #[arg(short, long, value_name = "FILE", default_value = "test.spv")]
    output: PathBuf,

    /// Print verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(-1);
        }
    };

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(err) => {
            error!("Can't read input: {}", err);
            process::exit(-2);
        }
    };

    if cli.verbose {
        info!("Compiling {}...", cli.input.display());
    }

    let compiler = Compiler::new();
    let words = match compiler.compile(&source) {
        Ok(words) => words,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };

    if let Err(err) = write_module(&cli.output, &words) {
        error!("Can't write {}: {}", cli.output.display(), err);
        process::exit(-2);
    }

    if cli.verbose {
        info!(
            "Wrote {} words of SPIR-V to {}",
            words.len(),
            cli.output.display()
        );
    }
}

fn write_module(path: &Path, words: &[u32]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    for word in words {
        file.write_all(&word.to_le_bytes())?;
    }
    Ok(())
}
