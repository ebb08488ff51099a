//! Domain models for collections and their posts

mod collection;
mod post;

pub use collection::{CollectionState, Cursor, ListingMode, SyncPhase, validate_collection_name};
pub use post::{Post, PostId, PostRecord};
