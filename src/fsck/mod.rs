/*Verificador de consistencia de imágenes xv6. Solo lectura: nunca escribe
en la imagen. Cada verificación vuelve a leer lo que necesita desde el
backend y se detiene en el primer error. */
pub mod fsck;
pub mod fsck_backend;
pub mod fsck_types;
pub mod mem_backend;
pub mod refmap;

pub use fsck::run_fsck;
pub use fsck_backend::{FsckBackend, ImageFile};
pub use fsck_types::{FsckError, FsckFailure, FsckReport, Stage};
pub use mem_backend::MemImage;
