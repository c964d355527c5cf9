use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use colored::*;
use log::LevelFilter;

use chkfs::fsck::{run_fsck, FsckFailure, FsckReport, ImageFile};

/// Verificador de consistencia (solo lectura) para imágenes de xv6
#[derive(Parser)]
#[command(name = "fsck.xv6", version)]
struct Cli {
    /// Imagen del sistema de archivos (por ejemplo fs.img)
    image: PathBuf,

    /// Más detalle en el log (-v etapas, -vv directorios, -vvv inodos)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// No imprimir el reporte si la imagen está bien
    #[arg(short, long)]
    quiet: bool,

    /// Salida sin colores
    #[arg(long)]
    no_color: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    // Errores de uso salen con 1, no con el 2 de clap.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    let image = match ImageFile::open(&cli.image) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("{}: {}", cli.image.display(), err);
            return ExitCode::FAILURE;
        }
    };

    match run_fsck(&image) {
        Ok(report) => {
            if !cli.quiet {
                print_report(&image, &report);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            print_failure(&failure);
            ExitCode::FAILURE
        }
    }
}

fn print_report(image: &ImageFile, report: &FsckReport) {
    let sb = &report.superblock;

    println!("\n{}", " XV6 FILESYSTEM CHECK ".on_blue().bold());
    println!("{}", "──────────────────────────────────────────".blue());
    println!("  imagen: {}", image.path().display());
    println!(
        "  {} bloques, {} inodos, log {}+{}, inodos en {}, bitmap en {}",
        sb.size, sb.ninodes, sb.logstart, sb.nlog, sb.inodestart, sb.bmapstart
    );

    println!("\n{}", "Etapas".bold().underline());
    for stage in &report.passed {
        println!("  {} {}", "✓".green(), stage);
    }

    println!("\n{} Sistema de archivos limpio.\n", "✓ OK".green().bold());
}

/// Una sola línea de diagnóstico por falla.
fn print_failure(failure: &FsckFailure) {
    println!(
        "{} [{}] {}",
        "✗ ERROR:".red().bold(),
        failure.stage.to_string().yellow(),
        failure.source.to_string().red()
    );
}
