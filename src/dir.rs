// src/dir.rs
use log::trace;

use crate::fs::{Dinode, Dirent, Superblock, DIRENT_SIZE, DPB, MAX_DIRENT_COUNT};
use crate::fsck::fsck::{read_indirect, read_inode};
use crate::fsck::{FsckBackend, FsckError};

// --------- Lectura de entradas ---------

/// Agrega las entradas no vacías de un bloque de directorio, sin pasar de `max_entries`.
fn read_dirent_block<B: FsckBackend>(
    backend: &B,
    blockno: u32,
    entries: &mut Vec<Dirent>,
    max_entries: usize,
) -> Result<(), FsckError> {
    let block = backend.read_block(blockno)?;
    for slot in 0..DPB {
        if entries.len() >= max_entries {
            break;
        }
        let entry = Dirent::parse(&block[slot * DIRENT_SIZE..])?;
        if !entry.is_empty() {
            entries.push(entry);
        }
    }
    Ok(())
}

/// Todas las entradas válidas del directorio: primero los bloques directos,
/// luego los que lista el bloque indirecto, cada uno en orden de ranura.
/// Se detiene al llegar a `max_entries`.
pub fn read_all_dirents<B: FsckBackend>(
    backend: &B,
    dip: &Dinode,
    max_entries: usize,
) -> Result<Vec<Dirent>, FsckError> {
    let mut entries = Vec::new();

    for &addr in dip.direct() {
        if entries.len() >= max_entries {
            return Ok(entries);
        }
        if addr != 0 {
            read_dirent_block(backend, addr, &mut entries, max_entries)?;
        }
    }

    if let Some(ind) = dip.indirect() {
        if entries.len() < max_entries {
            for &addr in read_indirect(backend, ind)?.iter() {
                if entries.len() >= max_entries {
                    break;
                }
                if addr != 0 {
                    read_dirent_block(backend, addr, &mut entries, max_entries)?;
                }
            }
        }
    }

    Ok(entries)
}

/// `read_all_dirents` con el máximo que admite un directorio.
pub fn list_entries<B: FsckBackend>(backend: &B, dip: &Dinode) -> Result<Vec<Dirent>, FsckError> {
    read_all_dirents(backend, dip, MAX_DIRENT_COUNT)
}

// --------- "." y ".." ---------

/// Exige un solo "." que apunte al propio directorio y al menos un "..".
/// A dónde apunta ".." lo revisa check_parent_link.
pub fn check_dot_and_dotdot(entries: &[Dirent], self_inum: u32) -> Result<(), FsckError> {
    let format_err = |reason| FsckError::DirectoryFormat {
        inum: self_inum,
        reason,
    };
    let mut found_dot = false;
    let mut found_dotdot = false;

    for entry in entries {
        if entry.name_is(".") {
            if u32::from(entry.inum) != self_inum {
                return Err(format_err("\".\" no apunta al propio directorio"));
            }
            if found_dot {
                return Err(format_err("más de una entrada \".\""));
            }
            found_dot = true;
        } else if entry.name_is("..") {
            found_dotdot = true;
        }
    }

    match (found_dot, found_dotdot) {
        (true, true) => Ok(()),
        (false, _) => Err(format_err("falta la entrada \".\"")),
        (true, false) => Err(format_err("falta la entrada \"..\"")),
    }
}

pub fn dotdot_inum(entries: &[Dirent]) -> Option<u32> {
    entries
        .iter()
        .find(|e| e.name_is(".."))
        .map(|e| u32::from(e.inum))
}

/// El padre que declara ".." tiene que ser un inodo en rango, ser un
/// directorio y tener alguna entrada que apunte a `inum`. Cualquier falla,
/// incluso de lectura del padre, es ParentMismatch.
pub fn check_parent_link<B: FsckBackend>(
    backend: &B,
    sb: &Superblock,
    inum: u32,
    entries: &[Dirent],
) -> Result<(), FsckError> {
    let mismatch = |reason: String| FsckError::ParentMismatch { inum, reason };

    let parent = dotdot_inum(entries).ok_or_else(|| mismatch("no tiene entrada \"..\"".into()))?;
    if parent == 0 || parent >= sb.ninodes {
        return Err(mismatch(format!("\"..\" apunta al inodo {parent}, fuera de rango")));
    }

    let parent_dip = read_inode(backend, sb, parent)
        .map_err(|e| mismatch(format!("no se pudo leer el padre {parent}: {e}")))?;
    if !parent_dip.is_dir() {
        return Err(mismatch(format!("el padre {parent} no es un directorio")));
    }

    let parent_entries = list_entries(backend, &parent_dip)
        .map_err(|e| mismatch(format!("no se pudieron leer las entradas del padre {parent}: {e}")))?;
    if !parent_entries.iter().any(|e| u32::from(e.inum) == inum) {
        return Err(mismatch(format!("el padre {parent} no lo lista")));
    }

    trace!("directorio {inum}: padre {parent} ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ROOTINO;
    use crate::mkfs::{Geometry, ImageBuilder};

    fn entries(list: &[(u16, &str)]) -> Vec<Dirent> {
        list.iter().map(|&(i, n)| Dirent::new(i, n)).collect()
    }

    #[test]
    fn dot_and_dotdot_rules() {
        assert!(check_dot_and_dotdot(&entries(&[(4, "."), (1, ".."), (9, "x")]), 4).is_ok());
        // ".." puede apuntar a cualquier lado; aquí no se revisa.
        assert!(check_dot_and_dotdot(&entries(&[(4, ".."), (4, ".")]), 4).is_ok());

        for bad in [
            entries(&[(1, "..")]),
            entries(&[(4, ".")]),
            entries(&[(5, "."), (1, "..")]),
            entries(&[(4, "."), (4, "."), (1, "..")]),
            entries(&[(4, ".x"), (1, "..")]),
        ] {
            assert!(matches!(
                check_dot_and_dotdot(&bad, 4),
                Err(FsckError::DirectoryFormat { inum: 4, .. })
            ));
        }
    }

    #[test]
    fn entries_come_in_block_then_slot_order_without_empty_slots() {
        let mut b = ImageBuilder::new(Geometry::default()).unwrap();
        let d = b.mkdir(ROOTINO, "d").unwrap();
        // 70 entradas: llenan el primer bloque (64 ranuras) y pasan al segundo.
        for i in 0..68 {
            b.link(d, &format!("f{i}"), ROOTINO).unwrap();
        }
        let (block, slot) = b.find_dirent(d, "f3").unwrap().unwrap();
        b.put_dirent(block, slot, &Dirent::default()).unwrap();

        let dip = b.inode(d).unwrap();
        let img = b.finish();
        let list = list_entries(&img, &dip).unwrap();

        assert_eq!(list.len(), 69);
        assert!(list[0].name_is("."));
        assert!(list[1].name_is(".."));
        assert!(list[2].name_is("f0"));
        assert!(list[5].name_is("f4"));
        assert!(list[68].name_is("f67"));
        assert!(list.iter().all(|e| !e.is_empty()));
    }

    #[test]
    fn enumeration_stops_at_capacity() {
        let mut b = ImageBuilder::new(Geometry::default()).unwrap();
        let d = b.mkdir(ROOTINO, "d").unwrap();
        for i in 0..10 {
            b.link(d, &format!("f{i}"), ROOTINO).unwrap();
        }
        let dip = b.inode(d).unwrap();
        let img = b.finish();
        assert_eq!(read_all_dirents(&img, &dip, 5).unwrap().len(), 5);
        assert_eq!(read_all_dirents(&img, &dip, 0).unwrap().len(), 0);
    }

    #[test]
    fn dotdot_targets() {
        assert_eq!(dotdot_inum(&entries(&[(3, "."), (7, "..")])), Some(7));
        assert_eq!(dotdot_inum(&entries(&[(3, ".")])), None);
    }

    #[test]
    fn parent_link_failures() {
        let mut b = ImageBuilder::new(Geometry::default()).unwrap();
        let a = b.mkdir(ROOTINO, "a").unwrap();
        let file = b.create_file(ROOTINO, "f", b"datos").unwrap();
        let sb = *b.superblock();
        let img = b.finish();

        assert!(check_parent_link(&img, &sb, a, &entries(&[(a as u16, "."), (1, "..")])).is_ok());

        for dotdot in [0u16, 200, 201, file as u16, 150] {
            let list = entries(&[(a as u16, "."), (dotdot, "..")]);
            assert!(matches!(
                check_parent_link(&img, &sb, a, &list),
                Err(FsckError::ParentMismatch { inum, .. }) if inum == a
            ));
        }
        assert!(check_parent_link(&img, &sb, a, &entries(&[(a as u16, ".")])).is_err());
    }
}
