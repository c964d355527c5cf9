/*Mapas de referencias. Cada verificación que los necesita construye el
suyo desde cero; nada se guarda entre etapas.

inodos: referenced[i] == true si alguna entrada de directorio nombra a i
bloques: referenced[b] == cuántas veces se reclama el bloque b */

use log::debug;

use super::{
    fsck::{read_indirect, read_inode},
    fsck_backend::FsckBackend,
    fsck_types::FsckError,
};
use crate::dir::list_entries;
use crate::fs::{Superblock, SUPERBLOCK};

fn alloc_map<T: Clone>(len: usize, value: T, what: &'static str) -> Result<Vec<T>, FsckError> {
    let mut map = Vec::new();
    map.try_reserve_exact(len)
        .map_err(|_| FsckError::AllocationFailure { what, len })?;
    map.resize(len, value);
    Ok(map)
}

/// Recorre todos los directorios en uso y marca cada inodo nombrado en
/// rango. Marca también los que apuntan a inodos libres: eso lo detecta
/// check_dirent_refers_to_allocated_inode.
pub fn build_inode_reference_map<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<Vec<bool>, FsckError> {
    let mut referenced = alloc_map(sb.ninodes as usize, false, "el mapa de inodos")?;

    for dir_inum in 1..sb.ninodes {
        let dip = read_inode(backend, sb, dir_inum)?;
        if !dip.is_dir() {
            continue;
        }

        for entry in list_entries(backend, &dip)? {
            let target = u32::from(entry.inum);
            if target > 0 && target < sb.ninodes {
                referenced[target as usize] = true;
            }
        }
    }
    Ok(referenced)
}

/// Marca una región de metadatos, recortada al tamaño de la imagen. Dos
/// regiones que se pisan son un error de estructura.
fn seed_region(referenced: &mut [u32], start: u32, len: u32) -> Result<(), FsckError> {
    let end = (u64::from(start) + u64::from(len)).min(referenced.len() as u64);
    for block in u64::from(start)..end {
        let slot = &mut referenced[block as usize];
        if *slot != 0 {
            return Err(FsckError::OverlappingMetadata { block: block as u32 });
        }
        *slot = 1;
    }
    Ok(())
}

fn claim(referenced: &mut [u32], inum: u32, block: u32) -> Result<(), FsckError> {
    let slot = referenced
        .get_mut(block as usize)
        .ok_or(FsckError::BadAddress { inum, block })?;
    *slot = slot.saturating_add(1);
    Ok(())
}

/// Cuenta los reclamos sobre cada bloque: superblock, log, bitmap y tabla
/// de inodos (uno por bloque), más cada dirección de cada inodo en uso.
/// Aquí sólo importa el rango, no las regiones reservadas: una dirección
/// fuera de la imagen es BadAddress.
pub fn build_block_reference_map<B: FsckBackend>(backend: &B, sb: &Superblock) -> Result<Vec<u32>, FsckError> {
    let mut referenced = alloc_map(sb.size as usize, 0u32, "el mapa de bloques")?;

    seed_region(&mut referenced, SUPERBLOCK, 1)?;
    seed_region(&mut referenced, sb.logstart, sb.nlog)?;
    seed_region(&mut referenced, sb.bmapstart, sb.bitmap_blocks())?;
    seed_region(&mut referenced, sb.inodestart, sb.inode_blocks())?;

    for inum in 1..sb.ninodes {
        let dip = read_inode(backend, sb, inum)?;
        if dip.is_free() {
            continue;
        }

        for &addr in dip.direct().iter().filter(|&&a| a != 0) {
            claim(&mut referenced, inum, addr)?;
        }

        if let Some(ind) = dip.indirect() {
            claim(&mut referenced, inum, ind)?;
            for &addr in read_indirect(backend, ind)?.iter().filter(|&&a| a != 0) {
                claim(&mut referenced, inum, addr)?;
            }
        }
    }

    debug!(
        "mapa de bloques: {} bloques reclamados",
        referenced.iter().filter(|&&c| c > 0).count()
    );
    Ok(referenced)
}
