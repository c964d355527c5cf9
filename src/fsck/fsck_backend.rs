/*Interfaz del fsck hacia la imagen. Todo lo que lee el fsck pasa por
read_block; así podemos correr las mismas verificaciones sobre un archivo
(ImageFile) o sobre una imagen en memoria (MemImage, para pruebas). */

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::fsck_types::FsckError;
use crate::fs::{Block, BSIZE};

pub trait FsckBackend {
    /// Lee exactamente un bloque. Una lectura corta es un error de I/O.
    fn read_block(&self, blockno: u32) -> Result<Block, FsckError>;
}

/// Imagen en disco abierta en modo solo lectura.
#[derive(Debug)]
pub struct ImageFile {
    file: File,
    path: PathBuf,
}

impl ImageFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FsckBackend for ImageFile {
    fn read_block(&self, blockno: u32) -> Result<Block, FsckError> {
        let io_err = |source| FsckError::Io {
            block: blockno,
            source,
        };
        let offset = u64::from(blockno) * BSIZE as u64;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;

        let mut buf = [0u8; BSIZE];
        file.read_exact(&mut buf).map_err(io_err)?;
        Ok(buf)
    }
}
