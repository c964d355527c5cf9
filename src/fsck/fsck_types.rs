/*Tipos del fsck:
FsckError (un tipo de inconsistencia por variante)
Stage (las etapas del pipeline, en orden)
FsckFailure / FsckReport (resultado de run_fsck) */

use std::fmt;
use std::io;

use thiserror::Error;

use crate::fs::{ParseError, Superblock};

#[derive(Debug, Error)]
pub enum FsckError {
    #[error("número mágico inválido en el superblock: {found:#x} (se esperaba {expected:#x})")]
    BadMagic { found: u32, expected: u32 },

    #[error("no se pudo leer el bloque {block}: {source}")]
    Io {
        block: u32,
        #[source]
        source: io::Error,
    },

    #[error("bloque {block} fuera de rango (la imagen tiene {size} bloques)")]
    OutOfRange { block: u32, size: u32 },

    #[error("dirección inválida en el inodo {inum}: bloque {block}")]
    BadAddress { inum: u32, block: u32 },

    #[error("el inodo {inum} usa el bloque {block} pero el bitmap lo marca libre")]
    UnmarkedAllocation { inum: u32, block: u32 },

    #[error("directorio {inum} mal formado: {reason}")]
    DirectoryFormat { inum: u32, reason: &'static str },

    #[error("el directorio {inum} no coincide con su padre: {reason}")]
    ParentMismatch { inum: u32, reason: String },

    #[error("el inodo {inum} está en uso pero ningún directorio lo nombra")]
    OrphanInode { inum: u32 },

    #[error("un directorio nombra al inodo {inum}, que está marcado libre")]
    DanglingDirectoryEntry { inum: u32 },

    #[error("el bitmap marca en uso el bloque {block}, pero nada lo referencia")]
    PhantomAllocation { block: u32 },

    #[error("el bloque {block} está referenciado {count} veces")]
    DuplicateBlockClaim { block: u32, count: u32 },

    #[error("regiones de metadatos solapadas en el bloque {block}")]
    OverlappingMetadata { block: u32 },

    #[error("sin memoria para {what} ({len} entradas)")]
    AllocationFailure { what: &'static str, len: usize },

    #[error("registro ilegible: {0}")]
    Parse(#[from] ParseError),
}

/// Etapas del fsck, en el orden en que se ejecutan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Superblock,
    InodeBlocks,
    DirectoryFormat,
    DirentAllocated,
    MultiplyReferenced,
    ReferencedBlocks,
    UsedInodesNamed,
    ParentDirectories,
}

impl Stage {
    /// Etapas que corren después de validar el superblock.
    pub const CHECKS: [Stage; 7] = [
        Stage::InodeBlocks,
        Stage::DirectoryFormat,
        Stage::DirentAllocated,
        Stage::MultiplyReferenced,
        Stage::ReferencedBlocks,
        Stage::UsedInodesNamed,
        Stage::ParentDirectories,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Superblock => "superblock",
            Stage::InodeBlocks => "check-all-inode-blocks",
            Stage::DirectoryFormat => "check-all-directory-formats",
            Stage::DirentAllocated => "check-dirent-refers-to-allocated-inode",
            Stage::MultiplyReferenced => "check-multiply-referenced-blocks",
            Stage::ReferencedBlocks => "check-referenced-blocks",
            Stage::UsedInodesNamed => "check-used-inode-found-in-directory",
            Stage::ParentDirectories => "check-parent-directory-mismatch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primer error encontrado, junto con la etapa que lo detectó.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct FsckFailure {
    pub stage: Stage,
    #[source]
    pub source: FsckError,
}

#[derive(Debug)]
pub struct FsckReport {
    pub superblock: Superblock,
    /// Etapas superadas, en orden.
    pub passed: Vec<Stage>,
}

impl FsckReport {
    pub fn new(superblock: Superblock) -> Self {
        Self {
            superblock,
            passed: Vec::new(),
        }
    }
}
