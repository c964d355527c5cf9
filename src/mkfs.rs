//! Construcción de imágenes xv6 en memoria.
//!
//! Layout, igual que el `mkfs` de xv6:
//!
//! ```text
//! [ boot | super | log ... | inodos ... | bitmap ... | datos ... ]
//!    0       1      2
//! ```
//!
//! `ImageBuilder` produce imágenes válidas (raíz en el inodo 1 con "." y
//! ".." hacia sí misma) y además expone accesos crudos a inodos, bitmap y
//! entradas para que las pruebas puedan corromper una imagen a propósito.

use log::debug;
use thiserror::Error;

use crate::fs::{
    parse_indirect, write_le_u32, Dinode, Dirent, InodeType, ParseError, Superblock, BPB, BSIZE,
    DINODE_SIZE, DIRENT_SIZE, DIRSIZ, DPB, FSMAGIC, IPB, MAXFILE, NDIRECT, NINDIRECT, ROOTINO,
    SUPERBLOCK,
};
use crate::fsck::MemImage;

pub const DEFAULT_SIZE: u32 = 2000;
pub const DEFAULT_NINODES: u32 = 200;
pub const DEFAULT_NLOG: u32 = 30;

#[derive(Debug, Error)]
pub enum MkfsError {
    #[error("geometría inválida: {0}")]
    Geometry(String),
    #[error("no quedan inodos libres ({0} en total)")]
    NoInodes(u32),
    #[error("no quedan bloques libres ({0} en total)")]
    NoSpace(u32),
    #[error("archivo demasiado grande: {0} bytes")]
    FileTooLarge(usize),
    #[error("nombre inválido {0:?}: vacío, con '/' o de más de 14 bytes")]
    BadName(String),
    #[error("el inodo {0} no es un directorio")]
    NotDirectory(u32),
    #[error("el inodo {0} no cabe en una entrada de directorio")]
    InodeOutOfRange(u32),
    #[error("el inodo {0} no tiene bloque indirecto")]
    NoIndirect(u32),
    #[error("el bloque {0} está fuera de la imagen")]
    BlockOutOfRange(u32),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Parámetros de la imagen; el resto del layout se deriva de aquí.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub size: u32,
    pub ninodes: u32,
    pub nlog: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            ninodes: DEFAULT_NINODES,
            nlog: DEFAULT_NLOG,
        }
    }
}

impl Geometry {
    /// Calcula el superblock. Falla si los metadatos no dejan bloques de datos.
    pub fn layout(&self) -> Result<Superblock, MkfsError> {
        if self.ninodes < 2 {
            return Err(MkfsError::Geometry(format!(
                "se necesitan al menos 2 inodos (hay {})",
                self.ninodes
            )));
        }
        if self.ninodes > u32::from(u16::MAX) + 1 {
            return Err(MkfsError::Geometry(format!(
                "{} inodos no caben en entradas de 16 bits",
                self.ninodes
            )));
        }

        let logstart = 2u64;
        let inodestart = logstart + u64::from(self.nlog);
        let bmapstart = inodestart + u64::from(self.ninodes.div_ceil(IPB));
        let nmeta = bmapstart + u64::from(self.size.div_ceil(BPB));

        if nmeta >= u64::from(self.size) {
            return Err(MkfsError::Geometry(format!(
                "no hay espacio para datos: size={}, metadatos={}",
                self.size, nmeta
            )));
        }

        Ok(Superblock {
            magic: FSMAGIC,
            size: self.size,
            nblocks: self.size - nmeta as u32,
            ninodes: self.ninodes,
            nlog: self.nlog,
            logstart: logstart as u32,
            inodestart: inodestart as u32,
            bmapstart: bmapstart as u32,
        })
    }
}

fn check_name(name: &str) -> Result<(), MkfsError> {
    if name.is_empty() || name.len() > DIRSIZ || name.contains('/') {
        return Err(MkfsError::BadName(name.to_string()));
    }
    Ok(())
}

pub struct ImageBuilder {
    sb: Superblock,
    image: MemImage,
    freeinode: u32,
    freeblock: u32,
}

impl ImageBuilder {
    /// Imagen vacía con sólo el directorio raíz.
    pub fn new(geometry: Geometry) -> Result<Self, MkfsError> {
        let sb = geometry.layout()?;
        let mut builder = Self {
            sb,
            image: MemImage::zeroed(sb.size),
            freeinode: 1,
            freeblock: sb.bmapstart + sb.bitmap_blocks(),
        };
        builder.write_superblock(&sb)?;

        // Marcar como usados todos los bloques de metadata: [0 .. freeblock)
        for block in 0..builder.freeblock {
            builder.set_allocated(block, true)?;
        }

        let root = builder.alloc_inode(InodeType::Dir)?;
        debug_assert_eq!(root, ROOTINO);
        builder.link(root, ".", root)?;
        builder.link(root, "..", root)?;

        debug!(
            "mkfs: size={} nmeta={} nlog={} ninodes={} nblocks={}",
            sb.size,
            builder.freeblock,
            sb.nlog,
            sb.ninodes,
            sb.nblocks
        );
        Ok(builder)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Bloques usados hasta ahora (metadata incluida).
    pub fn used_blocks(&self) -> u32 {
        self.freeblock
    }

    pub fn used_inodes(&self) -> u32 {
        self.freeinode - 1
    }

    pub fn finish(self) -> MemImage {
        self.image
    }

    // --------- Accesos crudos ---------

    fn block(&self, blockno: u32) -> Result<&[u8], MkfsError> {
        self.image
            .block(blockno)
            .ok_or(MkfsError::BlockOutOfRange(blockno))
    }

    fn block_mut(&mut self, blockno: u32) -> Result<&mut [u8], MkfsError> {
        self.image
            .block_mut(blockno)
            .ok_or(MkfsError::BlockOutOfRange(blockno))
    }

    /// Reescribe sólo el bloque 1; la geometría interna del builder no cambia.
    pub fn write_superblock(&mut self, sb: &Superblock) -> Result<(), MkfsError> {
        sb.encode(self.block_mut(SUPERBLOCK)?)?;
        Ok(())
    }

    pub fn inode(&self, inum: u32) -> Result<Dinode, MkfsError> {
        let block = self.block(self.sb.inode_block(inum))?;
        let offset = (inum % IPB) as usize * DINODE_SIZE;
        Ok(Dinode::parse(&block[offset..])?)
    }

    pub fn put_inode(&mut self, inum: u32, din: &Dinode) -> Result<(), MkfsError> {
        let blockno = self.sb.inode_block(inum);
        let offset = (inum % IPB) as usize * DINODE_SIZE;
        din.encode(&mut self.block_mut(blockno)?[offset..offset + DINODE_SIZE])?;
        Ok(())
    }

    pub fn set_allocated(&mut self, blockno: u32, allocated: bool) -> Result<(), MkfsError> {
        if blockno >= self.sb.size {
            return Err(MkfsError::BlockOutOfRange(blockno));
        }
        let bit = (blockno % BPB) as usize;
        let bitmap = self.block_mut(self.sb.bitmap_block(blockno))?;
        if allocated {
            bitmap[bit / 8] |= 1 << (bit % 8);
        } else {
            bitmap[bit / 8] &= !(1 << (bit % 8));
        }
        Ok(())
    }

    pub fn indirect_entries(&self, ind: u32) -> Result<[u32; NINDIRECT], MkfsError> {
        Ok(parse_indirect(self.block(ind)?)?)
    }

    /// Escribe la ranura `index` del bloque indirecto del inodo.
    pub fn put_indirect(&mut self, inum: u32, index: usize, addr: u32) -> Result<(), MkfsError> {
        let ind = self.inode(inum)?.indirect().ok_or(MkfsError::NoIndirect(inum))?;
        write_le_u32(self.block_mut(ind)?, index * 4, addr)?;
        Ok(())
    }

    /// Bloque y ranura de la primera entrada `name` del directorio.
    pub fn find_dirent(&self, dir: u32, name: &str) -> Result<Option<(u32, usize)>, MkfsError> {
        let din = self.inode(dir)?;
        let mut blocks: Vec<u32> = din.direct().to_vec();
        if let Some(ind) = din.indirect() {
            blocks.extend(self.indirect_entries(ind)?);
        }

        for blockno in blocks.into_iter().filter(|&b| b != 0) {
            let data = self.block(blockno)?;
            for slot in 0..DPB {
                let entry = Dirent::parse(&data[slot * DIRENT_SIZE..])?;
                if !entry.is_empty() && entry.name_is(name) {
                    return Ok(Some((blockno, slot)));
                }
            }
        }
        Ok(None)
    }

    pub fn put_dirent(&mut self, blockno: u32, slot: usize, entry: &Dirent) -> Result<(), MkfsError> {
        let offset = slot * DIRENT_SIZE;
        entry.encode(&mut self.block_mut(blockno)?[offset..offset + DIRENT_SIZE])?;
        Ok(())
    }

    // --------- Asignación ---------

    pub fn alloc_inode(&mut self, kind: InodeType) -> Result<u32, MkfsError> {
        let inum = self.freeinode;
        if inum >= self.sb.ninodes {
            return Err(MkfsError::NoInodes(self.sb.ninodes));
        }
        self.freeinode += 1;

        let din = Dinode {
            kind,
            nlink: 1,
            ..Dinode::default()
        };
        self.put_inode(inum, &din)?;
        Ok(inum)
    }

    pub fn alloc_block(&mut self) -> Result<u32, MkfsError> {
        let block = self.freeblock;
        if block >= self.sb.size {
            return Err(MkfsError::NoSpace(self.sb.size));
        }
        self.freeblock += 1;
        self.set_allocated(block, true)?;
        Ok(block)
    }

    /// Bloque de disco para el bloque lógico `fbn`, asignándolo si falta.
    fn block_for(&mut self, din: &mut Dinode, fbn: usize) -> Result<u32, MkfsError> {
        if fbn < NDIRECT {
            if din.addrs[fbn] == 0 {
                din.addrs[fbn] = self.alloc_block()?;
            }
            return Ok(din.addrs[fbn]);
        }

        if din.addrs[NDIRECT] == 0 {
            din.addrs[NDIRECT] = self.alloc_block()?;
        }
        let ind = din.addrs[NDIRECT];
        let index = fbn - NDIRECT;
        let addr = self.indirect_entries(ind)?[index];
        if addr != 0 {
            return Ok(addr);
        }
        let addr = self.alloc_block()?;
        write_le_u32(self.block_mut(ind)?, index * 4, addr)?;
        Ok(addr)
    }

    /// Agrega `data` al final del inodo, como `iappend` en el mkfs de xv6.
    fn append(&mut self, inum: u32, data: &[u8]) -> Result<(), MkfsError> {
        let mut din = self.inode(inum)?;
        let mut off = din.size as usize;
        if off + data.len() > MAXFILE * BSIZE {
            return Err(MkfsError::FileTooLarge(off + data.len()));
        }

        let mut rest = data;
        while !rest.is_empty() {
            let blockno = self.block_for(&mut din, off / BSIZE)?;
            let start = off % BSIZE;
            let n = rest.len().min(BSIZE - start);
            self.block_mut(blockno)?[start..start + n].copy_from_slice(&rest[..n]);
            off += n;
            rest = &rest[n..];
        }

        din.size = off as u32;
        self.put_inode(inum, &din)
    }

    // --------- Directorios y archivos ---------

    /// Agrega la entrada `name -> inum` al directorio `dir`. No valida que
    /// `inum` esté en uso: las pruebas lo usan para crear entradas colgantes.
    pub fn link(&mut self, dir: u32, name: &str, inum: u32) -> Result<(), MkfsError> {
        check_name(name)?;
        if !self.inode(dir)?.is_dir() {
            return Err(MkfsError::NotDirectory(dir));
        }
        let inum = u16::try_from(inum).map_err(|_| MkfsError::InodeOutOfRange(inum))?;

        let mut raw = [0u8; DIRENT_SIZE];
        Dirent::new(inum, name).encode(&mut raw)?;
        self.append(dir, &raw)
    }

    pub fn mkdir(&mut self, parent: u32, name: &str) -> Result<u32, MkfsError> {
        check_name(name)?;
        if !self.inode(parent)?.is_dir() {
            return Err(MkfsError::NotDirectory(parent));
        }
        let inum = self.alloc_inode(InodeType::Dir)?;
        self.link(inum, ".", inum)?;
        self.link(inum, "..", parent)?;
        self.link(parent, name, inum)?;
        Ok(inum)
    }

    pub fn create_file(&mut self, parent: u32, name: &str, data: &[u8]) -> Result<u32, MkfsError> {
        check_name(name)?;
        if !self.inode(parent)?.is_dir() {
            return Err(MkfsError::NotDirectory(parent));
        }
        let inum = self.alloc_inode(InodeType::File)?;
        self.append(inum, data)?;
        self.link(parent, name, inum)?;
        Ok(inum)
    }
}
