//! Index mapping and filter-field aliasing
//!
//! One index per tenant, strict dynamic mapping. Custom per-entity fields
//! live under `video.*` / `blog.*`; anything unknown is addressed through
//! the flattened `metadata` field.

use serde_json::{json, Value};

/// Full strict mapping for a tenant index, with nested per-chunk vectors.
pub fn full_mapping(dims: usize) -> Value {
    json!({
        "dynamic": "strict",
        "properties": {
            "source_app": { "type": "keyword" },
            "entity_id": { "type": "keyword" },
            "status": { "type": "keyword" },
            "language": { "type": "keyword" },
            "title": { "type": "text", "analyzer": "standard" },
            "content": { "type": "text", "analyzer": "standard" },
            "summary": { "type": "text", "analyzer": "standard" },
            "entities": { "type": "keyword" },
            "key_concepts": { "type": "keyword" },
            "metadata": { "type": "flattened" },
            "published_at": { "type": "date" },
            "video": {
                "properties": {
                    "duration": { "type": "float" },
                    "thumbnail_url": { "type": "keyword" }
                }
            },
            "blog": {
                "properties": {
                    "author": { "type": "keyword" },
                    "tags": { "type": "keyword" }
                }
            },
            "chunks": {
                "type": "nested",
                "properties": {
                    "text_chunk": { "type": "text" },
                    "vector": {
                        "type": "dense_vector",
                        "dims": dims,
                        "index": true,
                        "similarity": "cosine"
                    }
                }
            }
        }
    })
}

const VIDEO_FIELDS: &[&str] = &["duration", "thumbnail_url"];
const BLOG_FIELDS: &[&str] = &["author", "tags"];
const BASE_FIELDS: &[&str] = &[
    "source_app",
    "entity_id",
    "status",
    "language",
    "entities",
    "key_concepts",
    "published_at",
];

/// Map a caller-supplied filter name to its typed path in the mapping.
pub fn map_filter_field(field_name: &str) -> String {
    if VIDEO_FIELDS.contains(&field_name) {
        return format!("video.{}", field_name);
    }
    if BLOG_FIELDS.contains(&field_name) {
        return format!("blog.{}", field_name);
    }
    if BASE_FIELDS.contains(&field_name) {
        return field_name.to_string();
    }
    format!("metadata.{}", field_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_strict_with_nested_chunks() {
        let mapping = full_mapping(768);
        assert_eq!(mapping["dynamic"], "strict");
        assert_eq!(mapping["properties"]["chunks"]["type"], "nested");
        assert_eq!(
            mapping["properties"]["chunks"]["properties"]["vector"]["dims"],
            768
        );
        assert_eq!(
            mapping["properties"]["chunks"]["properties"]["vector"]["similarity"],
            "cosine"
        );
    }

    #[test]
    fn test_filter_field_aliasing() {
        assert_eq!(map_filter_field("duration"), "video.duration");
        assert_eq!(map_filter_field("author"), "blog.author");
        assert_eq!(map_filter_field("source_app"), "source_app");
        assert_eq!(map_filter_field("custom_tag"), "metadata.custom_tag");
    }
}
