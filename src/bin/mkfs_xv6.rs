use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use log::{info, LevelFilter};

use chkfs::mkfs::{Geometry, ImageBuilder, DEFAULT_NINODES, DEFAULT_NLOG, DEFAULT_SIZE};
use chkfs::ROOTINO;

/// Crea una imagen xv6 nueva y copia archivos del host al directorio raíz
#[derive(Parser)]
#[command(name = "mkfs.xv6", version)]
struct Cli {
    /// Imagen de salida (se sobrescribe)
    image: PathBuf,

    /// Archivos a copiar en "/" (un '_' inicial se quita del nombre, como en xv6)
    files: Vec<PathBuf>,

    /// Tamaño total en bloques de 1024 bytes
    #[arg(long, default_value_t = DEFAULT_SIZE)]
    size: u32,

    /// Cantidad de inodos
    #[arg(long, default_value_t = DEFAULT_NINODES)]
    ninodes: u32,

    /// Bloques de log
    #[arg(long, default_value_t = DEFAULT_NLOG)]
    nlog: u32,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if cli.verbose > 0 { LevelFilter::Debug } else { LevelFilter::Warn })
        .format_timestamp(None)
        .init();

    // 1. Layout y directorio raíz
    let geometry = Geometry {
        size: cli.size,
        ninodes: cli.ninodes,
        nlog: cli.nlog,
    };
    let mut builder = ImageBuilder::new(geometry).context("No se pudo calcular el layout")?;

    // 2. Copiar archivos del host a "/"
    for path in &cli.files {
        let data = fs::read(path).with_context(|| format!("No se pudo leer {:?}", path))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("Nombre de archivo inválido: {:?}", path))?;
        let name = name.strip_prefix('_').unwrap_or(name);

        let inum = builder
            .create_file(ROOTINO, name, &data)
            .with_context(|| format!("No se pudo agregar {:?} a la imagen", path))?;
        info!("{name}: inodo {inum}, {} bytes", data.len());
    }

    // 3. Escribir la imagen
    let sb = *builder.superblock();
    let used_blocks = builder.used_blocks();
    let used_inodes = builder.used_inodes();
    let image = builder.finish();
    fs::write(&cli.image, image.as_bytes())
        .with_context(|| format!("No se pudo escribir la imagen {:?}", cli.image))?;

    println!(
        "mkfs.xv6: imagen creada con {} bloques ({} de datos), {} inodos; en uso: {} bloques, {} inodos.",
        sb.size, sb.nblocks, sb.ninodes, used_blocks, used_inodes
    );

    Ok(())
}
