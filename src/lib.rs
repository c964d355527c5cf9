mod fs;
mod dir;
pub mod fsck;
pub mod mkfs;

pub use crate::fs::{
    Superblock,
    Dinode,
    Dirent,
    InodeType,
    ParseError,
    Block,
    BSIZE,
    FSMAGIC,
    ROOTINO,
    NDIRECT,
    NINDIRECT,
    DIRSIZ,
};
pub use crate::dir::{check_dot_and_dotdot, check_parent_link, list_entries, read_all_dirents};
