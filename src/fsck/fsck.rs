/*EL ARCHIVO PRINCIPAL DE FSCK. Primitivas (superblock, bitmap, inodos),
las verificaciones de bloques y de referencias cruzadas, y run_fsck, que
las corre en orden y se detiene en el primer error. */

use log::{debug, info, trace};

use super::{
    fsck_backend::FsckBackend,
    fsck_types::*,
    refmap::{build_block_reference_map, build_inode_reference_map},
};
use crate::dir::{check_dot_and_dotdot, check_parent_link, list_entries};
use crate::fs::{parse_indirect, Dinode, Superblock, BPB, DINODE_SIZE, FSMAGIC, IPB, NINDIRECT, ROOTINO, SUPERBLOCK};

// --------- Primitivas ---------

/// Lee el superblock y valida el número mágico.
pub fn read_superblock<B: FsckBackend>(backend: &B) -> Result<Superblock, FsckError> {
    let buf = backend.read_block(SUPERBLOCK)?;
    let sb = Superblock::parse(&buf)?;
    if !sb.has_valid_magic() {
        return Err(FsckError::BadMagic {
            found: sb.magic,
            expected: FSMAGIC,
        });
    }
    Ok(sb)
}

/// Estado del bloque en el bitmap. El bloque 0 nunca está asignado.
pub fn is_block_allocated<B: FsckBackend>(
    backend: &B,
    sb: &Superblock,
    blockno: u32,
) -> Result<bool, FsckError> {
    if blockno >= sb.size {
        return Err(FsckError::OutOfRange {
            block: blockno,
            size: sb.size,
        });
    }
    if blockno == 0 {
        return Ok(false);
    }

    let bitmap = backend.read_block(sb.bitmap_block(blockno))?;
    let bit = (blockno % BPB) as usize;
    Ok((bitmap[bit / 8] >> (bit % 8)) & 1 == 1)
}

pub fn read_inode<B: FsckBackend>(backend: &B, sb: &Superblock, inum: u32) -> Result<Dinode, FsckError> {
    let buf = backend.read_block(sb.inode_block(inum))?;
    let offset = (inum % IPB) as usize * DINODE_SIZE;
    Ok(Dinode::parse(&buf[offset..])?)
}

pub fn read_indirect<B: FsckBackend>(backend: &B, blockno: u32) -> Result<[u32; NINDIRECT], FsckError> {
    let buf = backend.read_block(blockno)?;
    Ok(parse_indirect(&buf)?)
}

// --------- Bloques de cada inodo ---------

fn check_address<B: FsckBackend>(
    backend: &B,
    sb: &Superblock,
    inum: u32,
    blockno: u32,
) -> Result<(), FsckError> {
    if !sb.is_valid_block(blockno) {
        return Err(FsckError::BadAddress { inum, block: blockno });
    }
    if !is_block_allocated(backend, sb, blockno)? {
        return Err(FsckError::UnmarkedAllocation { inum, block: blockno });
    }
    Ok(())
}

/// Toda dirección del inodo (directas, el bloque indirecto y lo que éste
/// lista) tiene que ser válida y estar marcada en el bitmap. El bloque
/// indirecto se valida antes de leer su contenido.
pub fn check_inode_blocks<B: FsckBackend>(
    backend: &B,
    sb: &Superblock,
    inum: u32,
    dip: &Dinode,
) -> Result<(), FsckError> {
    for &addr in dip.direct().iter().filter(|&&a| a != 0) {
        check_address(backend, sb, inum, addr)?;
    }

    if let Some(ind) = dip.indirect() {
        check_address(backend, sb, inum, ind)?;
        for &addr in read_indirect(backend, ind)?.iter().filter(|&&a| a != 0) {
            check_address(backend, sb, inum, addr)?;
        }
    }
    Ok(())
}

/// Recorre los inodos `1..=ninodes`. El último sólo se revisa si su registro
/// cae dentro de la tabla de inodos.
pub fn check_all_inodes<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    for inum in 1..=sb.ninodes {
        if inum == sb.ninodes && !sb.inode_in_table(inum) {
            debug!("inodo {inum} fuera de la tabla de inodos, se omite");
            continue;
        }
        let dip = read_inode(backend, sb, inum)?;
        if dip.is_free() {
            continue;
        }
        trace!("inodo {inum}: {:?}", dip.kind);
        check_inode_blocks(backend, sb, inum, &dip)?;
    }
    Ok(())
}

// --------- Formato de directorios ---------

pub fn check_all_directory_formats<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    for inum in 1..sb.ninodes {
        let dip = read_inode(backend, sb, inum)?;
        if !dip.is_dir() {
            continue;
        }
        let entries = list_entries(backend, &dip)?;
        debug!("directorio {inum}: {} entradas", entries.len());
        check_dot_and_dotdot(&entries, inum)?;
    }
    Ok(())
}

/// El ".." de cada directorio (menos la raíz) tiene que apuntar a un
/// directorio que a su vez lo liste.
pub fn check_parent_directory_mismatch<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    for inum in 1..sb.ninodes {
        let dip = read_inode(backend, sb, inum)?;
        if !dip.is_dir() || inum == ROOTINO {
            continue;
        }
        let entries = list_entries(backend, &dip)?;
        check_parent_link(backend, sb, inum, &entries)?;
    }
    Ok(())
}

// --------- Referencias cruzadas ---------

pub fn check_used_inode_found_in_directory<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    let referenced = build_inode_reference_map(backend, sb)?;

    for inum in 1..sb.ninodes {
        let dip = read_inode(backend, sb, inum)?;
        if !dip.is_free() && !referenced[inum as usize] {
            return Err(FsckError::OrphanInode { inum });
        }
    }
    Ok(())
}

pub fn check_dirent_refers_to_allocated_inode<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    let referenced = build_inode_reference_map(backend, sb)?;

    for inum in (1..sb.ninodes).filter(|&i| referenced[i as usize]) {
        if read_inode(backend, sb, inum)?.is_free() {
            return Err(FsckError::DanglingDirectoryEntry { inum });
        }
    }
    Ok(())
}

/// Todo bloque marcado en el bitmap (excepto el 0) tiene que estar referenciado.
pub fn check_referenced_blocks<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    let referenced = build_block_reference_map(backend, sb)?;

    for block in 1..sb.size {
        if is_block_allocated(backend, sb, block)? && referenced[block as usize] == 0 {
            return Err(FsckError::PhantomAllocation { block });
        }
    }
    Ok(())
}

/// En la zona de datos (después de la tabla de inodos) nadie reclama un
/// bloque más de una vez.
pub fn check_multiply_referenced_blocks<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<(), FsckError> {
    let referenced = build_block_reference_map(backend, sb)?;

    for block in sb.data_start()..sb.size {
        let count = referenced[block as usize];
        if count > 1 {
            return Err(FsckError::DuplicateBlockClaim { block, count });
        }
    }
    Ok(())
}

// --------- Orquestación ---------

fn run_stage<B: FsckBackend>(backend: &B, sb: &Superblock, stage: Stage) -> Result<(), FsckError> {
    match stage {
        Stage::Superblock => read_superblock(backend).map(|_| ()),
        Stage::InodeBlocks => check_all_inodes(backend, sb),
        Stage::DirectoryFormat => check_all_directory_formats(backend, sb),
        Stage::DirentAllocated => check_dirent_refers_to_allocated_inode(backend, sb),
        Stage::MultiplyReferenced => check_multiply_referenced_blocks(backend, sb),
        Stage::ReferencedBlocks => check_referenced_blocks(backend, sb),
        Stage::UsedInodesNamed => check_used_inode_found_in_directory(backend, sb),
        Stage::ParentDirectories => check_parent_directory_mismatch(backend, sb),
    }
}

pub fn run_fsck<B: FsckBackend>(backend: &B) -> Result<FsckReport, FsckFailure> {
    let sb = read_superblock(backend).map_err(|source| FsckFailure {
        stage: Stage::Superblock,
        source,
    })?;
    info!(
        "superblock: size={} nblocks={} ninodes={} nlog={} logstart={} inodestart={} bmapstart={}",
        sb.size, sb.nblocks, sb.ninodes, sb.nlog, sb.logstart, sb.inodestart, sb.bmapstart
    );

    let mut report = FsckReport::new(sb);
    report.passed.push(Stage::Superblock);

    for stage in Stage::CHECKS {
        info!("{stage}");
        run_stage(backend, &sb, stage).map_err(|source| FsckFailure { stage, source })?;
        report.passed.push(stage);
    }

    Ok(report)
}
