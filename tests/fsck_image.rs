use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use chkfs::fsck::{run_fsck, FsckError, ImageFile, MemImage, Stage};
use chkfs::mkfs::{Geometry, ImageBuilder};
use chkfs::{Superblock, BSIZE, ROOTINO};
use tempfile::{NamedTempFile, TempDir};

const FSCK: &str = env!("CARGO_BIN_EXE_fsck.xv6");
const MKFS: &str = env!("CARGO_BIN_EXE_mkfs.xv6");

/// raíz con un archivo y un subdirectorio
fn minimal_image() -> (Superblock, u32, MemImage) {
    let mut b = ImageBuilder::new(Geometry::default()).unwrap();
    let file = b.create_file(ROOTINO, "hola.txt", b"hola desde xv6\n").unwrap();
    b.mkdir(ROOTINO, "sub").unwrap();
    let data_block = b.inode(file).unwrap().addrs[0];
    let sb = *b.superblock();
    (sb, data_block, b.finish())
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(bytes).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn flip_bitmap_bit(bytes: &mut [u8], sb: &Superblock, block: u32) {
    let offset = sb.bitmap_block(block) as usize * BSIZE + (block as usize % (BSIZE * 8)) / 8;
    bytes[offset] ^= 1 << (block % 8);
}

fn fsck(path: &Path) -> Output {
    Command::new(FSCK)
        .arg("--no-color")
        .arg(path)
        .output()
        .expect("no se pudo ejecutar fsck.xv6")
}

#[test]
fn round_trip_through_a_file() {
    let (sb, data_block, img) = minimal_image();
    let good = write_temp(img.as_bytes());

    let image = ImageFile::open(good.path()).unwrap();
    let report = run_fsck(&image).unwrap();
    assert_eq!(report.superblock, sb);
    assert_eq!(report.passed.last(), Some(&Stage::ParentDirectories));

    let out = fsck(good.path());
    assert_eq!(out.status.code(), Some(0));

    // Limpiar el bit de un bloque en uso.
    let mut bytes = img.into_bytes();
    flip_bitmap_bit(&mut bytes, &sb, data_block);
    let bad = write_temp(&bytes);

    let failure = run_fsck(&ImageFile::open(bad.path()).unwrap()).unwrap_err();
    assert_eq!(failure.stage, Stage::InodeBlocks);
    assert!(matches!(failure.source, FsckError::UnmarkedAllocation { block, .. } if block == data_block));

    let out = fsck(bad.path());
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("ERROR"));
    assert!(stdout.contains("check-all-inode-blocks"));
    assert_eq!(stdout.lines().count(), 1);
}

#[test]
fn falsely_set_bit_is_phantom_allocation() {
    let (sb, _, img) = minimal_image();
    let mut bytes = img.into_bytes();
    let free_block = sb.size - 10;
    flip_bitmap_bit(&mut bytes, &sb, free_block);
    let bad = write_temp(&bytes);

    let failure = run_fsck(&ImageFile::open(bad.path()).unwrap()).unwrap_err();
    assert_eq!(failure.stage, Stage::ReferencedBlocks);
    assert!(matches!(failure.source, FsckError::PhantomAllocation { block } if block == free_block));
    assert_eq!(fsck(bad.path()).status.code(), Some(1));
}

#[test]
fn image_is_never_modified() {
    let (sb, data_block, img) = minimal_image();
    let mut bytes = img.into_bytes();
    flip_bitmap_bit(&mut bytes, &sb, data_block);
    let tmp = write_temp(&bytes);

    fsck(tmp.path());
    assert_eq!(fs::read(tmp.path()).unwrap(), bytes);
}

#[test]
fn bad_magic_and_short_images_fail() {
    let (_, _, img) = minimal_image();
    let mut bytes = img.into_bytes();
    bytes[BSIZE] ^= 0xff;
    let bad = write_temp(&bytes);
    let failure = run_fsck(&ImageFile::open(bad.path()).unwrap()).unwrap_err();
    assert!(matches!(failure.source, FsckError::BadMagic { .. }));
    assert_eq!(fsck(bad.path()).status.code(), Some(1));

    let short = write_temp(&[0u8; 100]);
    let failure = run_fsck(&ImageFile::open(short.path()).unwrap()).unwrap_err();
    assert!(matches!(failure.source, FsckError::Io { block: 1, .. }));
    assert_eq!(fsck(short.path()).status.code(), Some(1));
}

#[test]
fn usage_and_open_errors_exit_with_one() {
    let out = Command::new(FSCK).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));

    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no-existe.img");
    let out = fsck(&missing);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no-existe.img"));
}

#[test]
fn mkfs_output_passes_fsck() {
    let dir = TempDir::new().unwrap();
    let readme = dir.path().join("README");
    fs::write(&readme, vec![b'x'; 5000]).unwrap();
    let cat = dir.path().join("_cat");
    fs::write(&cat, vec![0x7f; 20 * BSIZE]).unwrap();
    let image = dir.path().join("fs.img");

    let out = Command::new(MKFS)
        .arg(&image)
        .arg(&readme)
        .arg(&cat)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(fs::metadata(&image).unwrap().len(), 2000 * BSIZE as u64);

    assert_eq!(fsck(&image).status.code(), Some(0));

    // El '_' inicial se quita, como en el mkfs de xv6.
    let img = ImageFile::open(&image).unwrap();
    let report = run_fsck(&img).unwrap();
    let root = chkfs::fsck::fsck::read_inode(&img, &report.superblock, ROOTINO).unwrap();
    let names: Vec<String> = chkfs::list_entries(&img, &root)
        .unwrap()
        .iter()
        .map(|e| e.name())
        .collect();
    assert_eq!(names, vec![".", "..", "README", "cat"]);
}
