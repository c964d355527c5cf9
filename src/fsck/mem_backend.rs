/*Imagen completa en memoria. La usan ImageBuilder (mkfs) y las pruebas:
se construye una imagen válida, se corrompe a mano y se le pasa al fsck
sin tocar el disco. */

use std::io;

use super::{fsck_backend::FsckBackend, fsck_types::FsckError};
use crate::fs::{Block, BSIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemImage {
    bytes: Vec<u8>,
}

impl MemImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn zeroed(nblocks: u32) -> Self {
        Self::new(vec![0; nblocks as usize * BSIZE])
    }

    pub fn nblocks(&self) -> u32 {
        (self.bytes.len() / BSIZE) as u32
    }

    pub fn block(&self, blockno: u32) -> Option<&[u8]> {
        let start = (blockno as usize).checked_mul(BSIZE)?;
        self.bytes.get(start..start.checked_add(BSIZE)?)
    }

    pub fn block_mut(&mut self, blockno: u32) -> Option<&mut [u8]> {
        let start = (blockno as usize).checked_mul(BSIZE)?;
        self.bytes.get_mut(start..start.checked_add(BSIZE)?)
    }

    /// Deja la imagen en `nblocks` bloques, como si el archivo estuviera truncado.
    pub fn truncate(&mut self, nblocks: u32) {
        self.bytes.truncate(nblocks as usize * BSIZE);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl FsckBackend for MemImage {
    fn read_block(&self, blockno: u32) -> Result<Block, FsckError> {
        let data = self.block(blockno).ok_or_else(|| FsckError::Io {
            block: blockno,
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "lectura más allá del final de la imagen"),
        })?;
        let mut buf = [0u8; BSIZE];
        buf.copy_from_slice(data);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_whole_blocks() {
        let mut img = MemImage::zeroed(3);
        img.block_mut(2).unwrap()[0] = 0xAB;
        let blk = img.read_block(2).unwrap();
        assert_eq!(blk[0], 0xAB);
        assert_eq!(img.nblocks(), 3);
    }

    #[test]
    fn short_read_is_io_failure() {
        let mut img = MemImage::zeroed(4);
        img.truncate(2);
        match img.read_block(3) {
            Err(FsckError::Io { block: 3, .. }) => {}
            other => panic!("se esperaba Io, llegó {other:?}"),
        }
        // Un bloque parcial tampoco sirve.
        let partial = MemImage::new(vec![0; BSIZE + 10]);
        assert!(partial.read_block(1).is_err());
    }
}
