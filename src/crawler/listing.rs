//! Decoding of the remote API's JSON shapes
//!
//! Listings wrap "things": `{ "kind": "t3", "data": { … } }`. Posts are `t3`,
//! comments `t1`, accounts `t2`, and `more` stands in for comment ids the
//! server did not inline.

use crate::crawler::fetcher::{ApiResponse, TransportError};
use crate::storage::{ItemKind, NewItem};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Body text the API substitutes for deleted or removed content
const TOMBSTONES: [&str; 2] = ["[deleted]", "[removed]"];

/// Author name of deleted accounts
pub const DELETED_AUTHOR: &str = "[deleted]";

/// One listing page
#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingData {
    /// Cursor for the next page
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing>,
}

/// A kind-tagged API object
#[derive(Debug, Clone, Deserialize)]
pub struct Thing {
    pub kind: String,
    pub data: Value,
}

/// Comment ids left for `/api/morechildren`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoreStub {
    pub parent_id: Option<String>,
    pub children: Vec<String>,
}

fn decode_error(response: &ApiResponse, message: impl ToString) -> TransportError {
    TransportError::Decode {
        url: response.url.clone(),
        message: message.to_string(),
    }
}

/// Decodes a listing response
pub fn parse_listing(response: &ApiResponse) -> Result<ListingData, TransportError> {
    Listing::deserialize(&response.body)
        .map(|listing| listing.data)
        .map_err(|e| decode_error(response, e))
}

/// Decodes `/comments/<id>.json`: the post and its top-level comments
pub fn parse_post_page(response: &ApiResponse) -> Result<(Thing, Vec<Thing>), TransportError> {
    let (post_listing, comments) = <(Listing, Listing)>::deserialize(&response.body)
        .map_err(|e| decode_error(response, e))?;

    let post = post_listing
        .data
        .children
        .into_iter()
        .find(|thing| thing.kind == "t3")
        .ok_or_else(|| decode_error(response, "post listing holds no post"))?;

    Ok((post, comments.data.children))
}

/// Decodes `/api/morechildren.json`
pub fn parse_more_children(response: &ApiResponse) -> Result<Vec<Thing>, TransportError> {
    #[derive(Deserialize)]
    struct Envelope {
        json: Inner,
    }
    #[derive(Deserialize)]
    struct Inner {
        #[serde(default)]
        errors: Vec<Value>,
        #[serde(default)]
        data: Option<Things>,
    }
    #[derive(Deserialize)]
    struct Things {
        #[serde(default)]
        things: Vec<Thing>,
    }

    let envelope = Envelope::deserialize(&response.body).map_err(|e| decode_error(response, e))?;
    if !envelope.json.errors.is_empty() {
        return Err(decode_error(
            response,
            format!("API errors: {:?}", envelope.json.errors),
        ));
    }

    Ok(envelope.json.data.map(|d| d.things).unwrap_or_default())
}

/// Decodes `/user/<name>/about.json`
pub fn parse_account(response: &ApiResponse) -> Result<Thing, TransportError> {
    let thing = Thing::deserialize(&response.body).map_err(|e| decode_error(response, e))?;
    if thing.kind != "t2" {
        return Err(decode_error(
            response,
            format!("expected an account, got '{}'", thing.kind),
        ));
    }
    Ok(thing)
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

impl Thing {
    pub fn item_kind(&self) -> Option<ItemKind> {
        match self.kind.as_str() {
            "t3" => Some(ItemKind::Post),
            "t1" => Some(ItemKind::Comment),
            "t2" => Some(ItemKind::Profile),
            _ => None,
        }
    }

    /// Fullname, e.g. `t3_abc123`
    pub fn fullname(&self) -> Option<String> {
        let from_id = || str_field(&self.data, "id").map(|id| format!("{}_{}", self.kind, id));

        // Accounts use `name` for the username
        if self.kind == "t2" {
            return from_id();
        }
        str_field(&self.data, "name")
            .map(str::to_string)
            .or_else(from_id)
    }

    pub fn author(&self) -> Option<&str> {
        str_field(&self.data, "author")
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.data.get("created_utc").and_then(Value::as_f64)?;
        Utc.timestamp_opt(secs.trunc() as i64, 0).single()
    }

    /// Returns true if the remote copy is a deleted or removed tombstone
    pub fn is_deleted(&self) -> bool {
        let tombstoned = |key: &str| str_field(&self.data, key).is_some_and(|v| TOMBSTONES.contains(&v));
        let removed = self
            .data
            .get("removed_by_category")
            .is_some_and(|v| !v.is_null());

        tombstoned("selftext") || tombstoned("body") || removed
    }

    /// Stable hash of the user-visible content
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for key in ["title", "selftext", "body", "url", "author", "edited"] {
            match self.data.get(key) {
                Some(Value::String(s)) => hasher.update(s.as_bytes()),
                Some(Value::Null) | None => {}
                Some(other) => hasher.update(other.to_string().as_bytes()),
            }
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }

    /// Hosted video stream for a post, if any
    pub fn media_url(&self) -> Option<&str> {
        ["secure_media", "media"].iter().find_map(|key| {
            let video = self.data.get(*key)?.get("reddit_video")?;
            str_field(video, "hls_url").or_else(|| str_field(video, "fallback_url"))
        })
    }

    /// Nested replies of a comment
    pub fn replies(&self) -> Vec<Thing> {
        // An empty string when there are none
        self.data
            .get("replies")
            .and_then(|v| Listing::deserialize(v).ok())
            .map(|listing| listing.data.children)
            .unwrap_or_default()
    }

    /// Ids behind a `more` stub
    ///
    /// "Continue this thread" stubs carry no ids and yield None.
    pub fn more_stub(&self) -> Option<MoreStub> {
        if self.kind != "more" {
            return None;
        }
        let children: Vec<String> = self
            .data
            .get("children")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        (!children.is_empty()).then(|| MoreStub {
            parent_id: str_field(&self.data, "parent_id").map(str::to_string),
            children,
        })
    }

    /// Builds the archive record for this thing under `target_scope`
    ///
    /// Returns None for things that are not archived (e.g. `more` stubs) or
    /// that lack an id or creation time.
    pub fn to_new_item(&self, target_scope: &str) -> Option<NewItem> {
        let kind = self.item_kind()?;
        let remote_id = self.fullname()?;
        let created_at = self.created_at()?;

        let parent_id = match kind {
            ItemKind::Comment => str_field(&self.data, "parent_id").map(str::to_string),
            _ => None,
        };
        let author = match kind {
            ItemKind::Profile => str_field(&self.data, "name").map(str::to_string),
            _ => self.author().map(str::to_string),
        };

        Some(NewItem {
            target_scope: target_scope.to_string(),
            remote_id,
            kind,
            parent_id,
            author,
            created_at,
            deleted_upstream: kind != ItemKind::Profile && self.is_deleted(),
            fingerprint: self.fingerprint(),
            payload: self.stripped_payload(),
        })
    }

    /// Payload without inline replies, which are archived as their own items
    fn stripped_payload(&self) -> Value {
        let mut payload = self.data.clone();
        if let Some(map) = payload.as_object_mut() {
            map.remove("replies");
        }
        payload
    }
}
