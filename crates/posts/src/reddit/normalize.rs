//! Reddit listing normalization to domain models

use chrono::DateTime;
use log::warn;

use super::api::{ListingResponse, Thing};
use crate::models::{Cursor, Post, PostId};
use crate::sync::{Page, ResponseMeta};

/// A listing child that cannot become a [`Post`]
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("post is missing field '{0}'")]
    MissingField(&'static str),

    #[error("post has out-of-range created_utc {0}")]
    InvalidTimestamp(f64),
}

/// Convert one listing child into a [`Post`]
///
/// `id` and `created_utc` are required; every other field is kept verbatim
/// in the post's attribute map.
pub fn normalize_post(thing: Thing) -> Result<Post, NormalizeError> {
    let mut data = thing.data;

    let id = data
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(PostId::new)
        .ok_or(NormalizeError::MissingField("id"))?;

    let created = data
        .get("created_utc")
        .and_then(|v| v.as_f64())
        .ok_or(NormalizeError::MissingField("created_utc"))?;

    let created_at = DateTime::from_timestamp(created.trunc() as i64, 0)
        .ok_or(NormalizeError::InvalidTimestamp(created))?;

    data.remove("id");
    data.remove("created_utc");

    Ok(Post {
        id,
        created_at,
        attributes: data,
    })
}

/// Build a [`Page`] from a listing response
///
/// The continuation cursor follows the direction of the cursor that was
/// submitted: backward requests continue with `before`, everything else
/// with `after`. An empty or missing cursor means the listing is exhausted.
pub fn page_from_listing(
    listing: ListingResponse,
    meta: ResponseMeta,
    submitted: Option<&Cursor>,
) -> Page {
    let data = listing.data;

    let next_cursor = match submitted {
        Some(Cursor::Before(_)) => data.before.filter(|c| !c.is_empty()).map(Cursor::Before),
        _ => data.after.filter(|c| !c.is_empty()).map(Cursor::After),
    };

    let posts = data
        .children
        .into_iter()
        .filter_map(|thing| match normalize_post(thing) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!("Dropping listing child: {}", e);
                None
            }
        })
        .collect();

    Page {
        posts,
        next_cursor,
        meta,
    }
}
