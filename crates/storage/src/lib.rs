mod dir;
pub mod error;
mod listing;
mod models;
mod name;
mod writer;

pub use crate::dir::{DirGuard, MediaDir};
pub use crate::listing::Extensions;
pub use crate::models::{MediaFile, StoredMedia};
pub use crate::name::validate as validate_name;
use std::sync::Arc;

pub type DirHandle = Arc<MediaDir>;
