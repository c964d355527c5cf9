use thiserror::Error;

// -----------------------------------------------------------------------------
// Constantes del formato en disco (xv6)
// -----------------------------------------------------------------------------

pub const BSIZE: usize = 1024;
pub const FSMAGIC: u32 = 0x1020_3040;

/// Bloque donde vive el superblock. El bloque 0 es el de arranque.
pub const SUPERBLOCK: u32 = 1;
pub const ROOTINO: u32 = 1;

pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / 4;
pub const MAXFILE: usize = NDIRECT + NINDIRECT;
pub const DIRSIZ: usize = 14;

pub const SUPERBLOCK_SIZE: usize = 32;
pub const DINODE_SIZE: usize = 64;
pub const DIRENT_SIZE: usize = 16;

/// Inodos por bloque.
pub const IPB: u32 = (BSIZE / DINODE_SIZE) as u32;
/// Bits de bitmap por bloque.
pub const BPB: u32 = (BSIZE * 8) as u32;
/// Entradas de directorio por bloque.
pub const DPB: usize = BSIZE / DIRENT_SIZE;

/// Máximo de entradas que caben en un directorio (bloques directos + indirectos).
pub const MAX_DIRENT_COUNT: usize = DPB * MAXFILE;

pub type Block = [u8; BSIZE];

// -----------------------------------------------------------------------------
// Lectura/escritura little-endian con verificación de límites
// -----------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("datos insuficientes: se necesitan {needed} bytes en el offset {offset}, hay {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("campo inválido: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

fn range_of(len: usize, offset: usize, size: usize) -> Result<std::ops::Range<usize>, ParseError> {
    let Some(end) = offset.checked_add(size) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };
    if end > len {
        return Err(ParseError::InsufficientData {
            needed: size,
            offset,
            actual: len.saturating_sub(offset),
        });
    }
    Ok(offset..end)
}

pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let r = range_of(data.len(), offset, 2)?;
    let b = &data[r];
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub fn read_le_i16(data: &[u8], offset: usize) -> Result<i16, ParseError> {
    read_le_u16(data, offset).map(|v| v as i16)
}

pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let r = range_of(data.len(), offset, 4)?;
    let b = &data[r];
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    let r = range_of(data.len(), offset, 2)?;
    data[r].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    let r = range_of(data.len(), offset, 4)?;
    data[r].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Lee un bloque indirecto: `NINDIRECT` direcciones de 32 bits.
pub fn parse_indirect(data: &[u8]) -> Result<[u32; NINDIRECT], ParseError> {
    let mut addrs = [0u32; NINDIRECT];
    for (i, addr) in addrs.iter_mut().enumerate() {
        *addr = read_le_u32(data, i * 4)?;
    }
    Ok(addrs)
}

// -----------------------------------------------------------------------------
// Superblock
// -----------------------------------------------------------------------------

/// Geometría del sistema de archivos, tal como está en el bloque 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    /// Tamaño total de la imagen en bloques.
    pub size: u32,
    /// Bloques de datos.
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

impl Superblock {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            magic: read_le_u32(data, 0)?,
            size: read_le_u32(data, 4)?,
            nblocks: read_le_u32(data, 8)?,
            ninodes: read_le_u32(data, 12)?,
            nlog: read_le_u32(data, 16)?,
            logstart: read_le_u32(data, 20)?,
            inodestart: read_le_u32(data, 24)?,
            bmapstart: read_le_u32(data, 28)?,
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<(), ParseError> {
        let fields = [
            self.magic,
            self.size,
            self.nblocks,
            self.ninodes,
            self.nlog,
            self.logstart,
            self.inodestart,
            self.bmapstart,
        ];
        for (i, value) in fields.into_iter().enumerate() {
            write_le_u32(out, i * 4, value)?;
        }
        Ok(())
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == FSMAGIC
    }

    /// Bloque de la tabla de inodos que contiene al inodo `inum`.
    pub fn inode_block(&self, inum: u32) -> u32 {
        (inum / IPB).saturating_add(self.inodestart)
    }

    /// Bloque del bitmap que contiene el bit del bloque `blockno`.
    pub fn bitmap_block(&self, blockno: u32) -> u32 {
        (blockno / BPB).saturating_add(self.bmapstart)
    }

    /// Bloques que ocupa la tabla de inodos.
    pub fn inode_blocks(&self) -> u32 {
        self.ninodes.div_ceil(IPB)
    }

    /// Bloques que ocupa el bitmap.
    pub fn bitmap_blocks(&self) -> u32 {
        self.size.div_ceil(BPB)
    }

    /// Primer bloque después de la tabla de inodos.
    pub fn data_start(&self) -> u32 {
        self.inodestart.saturating_add(self.inode_blocks())
    }

    /// `true` si el registro del inodo `inum` cae dentro de la tabla de inodos.
    pub fn inode_in_table(&self, inum: u32) -> bool {
        inum / IPB < self.inode_blocks()
    }

    /// Una dirección que un inodo puede usar: ni el bloque 0, ni el superblock,
    /// ni nada antes del bitmap (log y tabla de inodos), y dentro de la imagen.
    pub fn is_valid_block(&self, blockno: u32) -> bool {
        blockno != 0 && blockno < self.size && blockno >= self.bmapstart && blockno != SUPERBLOCK
    }
}

// -----------------------------------------------------------------------------
// Inodos
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    Free,
    Dir,
    File,
    Device,
    Unknown(i16),
}

impl InodeType {
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => InodeType::Free,
            1 => InodeType::Dir,
            2 => InodeType::File,
            3 => InodeType::Device,
            other => InodeType::Unknown(other),
        }
    }

    pub fn raw(self) -> i16 {
        match self {
            InodeType::Free => 0,
            InodeType::Dir => 1,
            InodeType::File => 2,
            InodeType::Device => 3,
            InodeType::Unknown(other) => other,
        }
    }
}

/// Registro de inodo en disco (`dinode`, 64 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dinode {
    pub kind: InodeType,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
    /// `NDIRECT` direcciones directas y, al final, el bloque indirecto.
    pub addrs: [u32; NDIRECT + 1],
}

impl Default for Dinode {
    fn default() -> Self {
        Self {
            kind: InodeType::Free,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        }
    }
}

impl Dinode {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut addrs = [0u32; NDIRECT + 1];
        for (i, addr) in addrs.iter_mut().enumerate() {
            *addr = read_le_u32(data, 12 + i * 4)?;
        }
        Ok(Self {
            kind: InodeType::from_raw(read_le_i16(data, 0)?),
            major: read_le_i16(data, 2)?,
            minor: read_le_i16(data, 4)?,
            nlink: read_le_i16(data, 6)?,
            size: read_le_u32(data, 8)?,
            addrs,
        })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<(), ParseError> {
        write_le_u16(out, 0, self.kind.raw() as u16)?;
        write_le_u16(out, 2, self.major as u16)?;
        write_le_u16(out, 4, self.minor as u16)?;
        write_le_u16(out, 6, self.nlink as u16)?;
        write_le_u32(out, 8, self.size)?;
        for (i, addr) in self.addrs.iter().enumerate() {
            write_le_u32(out, 12 + i * 4, *addr)?;
        }
        Ok(())
    }

    pub fn is_free(&self) -> bool {
        self.kind == InodeType::Free
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeType::Dir
    }

    pub fn direct(&self) -> &[u32] {
        &self.addrs[..NDIRECT]
    }

    pub fn indirect(&self) -> Option<u32> {
        match self.addrs[NDIRECT] {
            0 => None,
            addr => Some(addr),
        }
    }
}

// -----------------------------------------------------------------------------
// Entradas de directorio
// -----------------------------------------------------------------------------

/// Entrada de directorio (16 bytes). El nombre se rellena con NUL y no
/// necesariamente termina en NUL si ocupa los `DIRSIZ` bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirent {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

impl Dirent {
    /// Nombres de más de `DIRSIZ` bytes se truncan.
    pub fn new(inum: u16, name: &str) -> Self {
        let bytes = name.as_bytes();
        let len = bytes.len().min(DIRSIZ);
        let mut field = [0u8; DIRSIZ];
        field[..len].copy_from_slice(&bytes[..len]);
        Self { inum, name: field }
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let inum = read_le_u16(data, 0)?;
        let r = range_of(data.len(), 2, DIRSIZ)?;
        let mut name = [0u8; DIRSIZ];
        name.copy_from_slice(&data[r]);
        Ok(Self { inum, name })
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<(), ParseError> {
        write_le_u16(out, 0, self.inum)?;
        let r = range_of(out.len(), 2, DIRSIZ)?;
        out[r].copy_from_slice(&self.name);
        Ok(())
    }

    /// Ranura vacía o borrada.
    pub fn is_empty(&self) -> bool {
        self.inum == 0
    }

    fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }

    /// Compara como `strncmp(name, other, DIRSIZ) == 0`.
    pub fn name_is(&self, other: &str) -> bool {
        let other = other.as_bytes();
        let other = &other[..other.len().min(DIRSIZ)];
        let other = match other.iter().position(|&c| c == 0) {
            Some(end) => &other[..end],
            None => other,
        };
        self.name_bytes() == other
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}
