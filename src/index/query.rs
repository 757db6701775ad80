//! Composite search query builder
//!
//! Fuses phrase, lexical, entity, language and nested chunk-kNN clauses into
//! one boolean `should`, filtered to ready documents. Sorting mode changes
//! the envelope: relevancy keeps `min_score`, recency sorts on
//! `published_at`, balanced wraps the query in an exponential time-decay
//! function score.

use super::schema::map_filter_field;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use utoipa::ToSchema;

/// Result ordering requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    Relevancy,
    Recency,
    Balanced,
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::Relevancy
    }
}

/// Everything the builder needs to compose one search body
pub struct QuerySpec<'a> {
    pub query_text: &'a str,
    pub vector: Option<&'a [f32]>,
    pub size: usize,
    pub filters: Option<&'a Map<String, Value>>,
    pub use_hybrid: bool,
    pub min_score: f64,
    pub vector_threshold: f64,
    pub return_chunks: bool,
    pub sort_mode: SortMode,
    pub entities: &'a [String],
    pub language: &'a str,
}

pub fn build_search_body(spec: &QuerySpec) -> Value {
    // Hard filters: only ready documents, plus caller filters mapped
    // through the field aliasing.
    let mut filter_clauses = vec![json!({ "term": { "status": "ready" } })];
    if let Some(filters) = spec.filters {
        for (field, value) in filters {
            filter_clauses.push(json!({
                "term": { map_filter_field(field): value }
            }));
        }
    }

    let mut should_clauses = vec![
        json!({
            "constant_score": {
                "filter": { "match_phrase": { "title": spec.query_text } },
                "boost": 50.0,
                "_name": "title_proximity_bonus"
            }
        }),
        json!({
            "multi_match": {
                "_name": "lexical_base",
                "query": spec.query_text,
                "fields": ["title^2", "summary^1.5", "content"],
                "type": "most_fields",
                "operator": "and",
                "boost": 2.0
            }
        }),
    ];

    if !spec.entities.is_empty() {
        should_clauses.push(json!({
            "terms": {
                "entities": spec.entities,
                "boost": 20.0,
                "_name": "entity_match"
            }
        }));
    }

    // Nested chunk scoring: phrase bonus always, kNN only in hybrid mode
    let mut chunk_should = vec![json!({
        "constant_score": {
            "filter": { "match_phrase": { "chunks.text_chunk": spec.query_text } },
            "boost": 15.0,
            "_name": "chunk_proximity_bonus"
        }
    })];

    if spec.use_hybrid {
        if let Some(vector) = spec.vector {
            chunk_should.push(json!({
                "knn": {
                    "_name": "chunk_semantic",
                    "field": "chunks.vector",
                    "query_vector": vector,
                    "k": spec.size,
                    "num_candidates": 100,
                    "similarity": spec.vector_threshold,
                    "boost": 25.0
                }
            }));
        }
    }

    let mut nested = json!({
        "nested": {
            "path": "chunks",
            "score_mode": "max",
            "query": {
                "bool": {
                    "should": chunk_should,
                    "minimum_should_match": 1
                }
            },
            "boost": 1.0
        }
    });
    if spec.return_chunks {
        nested["nested"]["inner_hits"] = json!({
            "name": "matched_chunks",
            "size": 1,
            "_source": ["chunks.text_chunk"]
        });
    }
    should_clauses.push(nested);

    should_clauses.push(json!({
        "term": {
            "language": { "value": spec.language, "boost": 10.0 }
        }
    }));

    let bool_query = json!({
        "bool": {
            "should": should_clauses,
            "minimum_should_match": 1,
            "filter": filter_clauses
        }
    });

    let query = match spec.sort_mode {
        SortMode::Balanced => json!({
            "function_score": {
                "query": bool_query,
                "functions": [
                    {
                        "exp": {
                            "published_at": {
                                "origin": "now",
                                "scale": "7d",
                                "decay": 0.5
                            }
                        },
                        "weight": 15
                    }
                ],
                "score_mode": "sum",
                "boost_mode": "sum"
            }
        }),
        _ => bool_query,
    };

    let mut body = json!({
        "size": spec.size,
        "query": query,
        "_source": {
            "includes": [
                "title", "summary", "content", "metadata", "entity_id",
                "source_app", "entities", "key_concepts", "language",
                "published_at", "chunks.text_chunk"
            ]
        }
    });

    match spec.sort_mode {
        SortMode::Relevancy => {
            body["min_score"] = json!(spec.min_score);
        }
        SortMode::Recency => {
            body["sort"] = json!([
                { "published_at": { "order": "desc", "missing": "_last" } }
            ]);
        }
        SortMode::Balanced => {}
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec<'a>(vector: Option<&'a [f32]>) -> QuerySpec<'a> {
        QuerySpec {
            query_text: "purring cats",
            vector,
            size: 10,
            filters: None,
            use_hybrid: true,
            min_score: 25.0,
            vector_threshold: 0.65,
            return_chunks: true,
            sort_mode: SortMode::Relevancy,
            entities: &[],
            language: "en",
        }
    }

    fn find_nested(body: &Value) -> &Value {
        body["query"]["bool"]["should"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c.get("nested").is_some())
            .unwrap()
    }

    #[test]
    fn test_relevancy_body_shape() {
        let vector = vec![0.1_f32; 4];
        let body = build_search_body(&spec(Some(&vector)));

        assert_eq!(body["size"], 10);
        assert_eq!(body["min_score"], 25.0);
        assert!(body.get("sort").is_none());

        let filters = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filters[0]["term"]["status"], "ready");

        let nested = find_nested(&body);
        assert_eq!(nested["nested"]["score_mode"], "max");
        let chunk_should = nested["nested"]["query"]["bool"]["should"]
            .as_array()
            .unwrap();
        let knn = chunk_should
            .iter()
            .find(|c| c.get("knn").is_some())
            .unwrap();
        assert_eq!(knn["knn"]["num_candidates"], 100);
        assert_eq!(knn["knn"]["boost"], 25.0);
        assert_eq!(knn["knn"]["similarity"], 0.65);
    }

    #[test]
    fn test_hybrid_off_omits_knn() {
        let mut s = spec(None);
        s.use_hybrid = false;
        let body = build_search_body(&s);
        let nested = find_nested(&body);
        let chunk_should = nested["nested"]["query"]["bool"]["should"]
            .as_array()
            .unwrap();
        assert!(chunk_should.iter().all(|c| c.get("knn").is_none()));
    }

    #[test]
    fn test_recency_ignores_min_score_and_sorts() {
        let mut s = spec(None);
        s.sort_mode = SortMode::Recency;
        let body = build_search_body(&s);
        assert!(body.get("min_score").is_none());
        assert_eq!(body["sort"][0]["published_at"]["order"], "desc");
        assert_eq!(body["sort"][0]["published_at"]["missing"], "_last");
    }

    #[test]
    fn test_balanced_wraps_in_function_score() {
        let mut s = spec(None);
        s.sort_mode = SortMode::Balanced;
        let body = build_search_body(&s);
        let fs = &body["query"]["function_score"];
        assert_eq!(fs["score_mode"], "sum");
        assert_eq!(fs["boost_mode"], "sum");
        assert_eq!(fs["functions"][0]["exp"]["published_at"]["scale"], "7d");
        assert_eq!(fs["functions"][0]["weight"], 15);
        assert!(body.get("min_score").is_none());
    }

    #[test]
    fn test_entities_and_filters_mapped() {
        let entities = vec!["Zeus".to_string()];
        let mut filters = Map::new();
        filters.insert("author".to_string(), json!("ada"));
        filters.insert("genre".to_string(), json!("essay"));

        let mut s = spec(None);
        s.entities = &entities;
        s.filters = Some(&filters);

        let body = build_search_body(&s);
        let should = body["query"]["bool"]["should"].as_array().unwrap();
        let entity_clause = should
            .iter()
            .find(|c| c.get("terms").is_some())
            .unwrap();
        assert_eq!(entity_clause["terms"]["boost"], 20.0);

        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert!(filter.iter().any(|f| f["term"].get("blog.author").is_some()));
        assert!(filter
            .iter()
            .any(|f| f["term"].get("metadata.genre").is_some()));
    }

    #[test]
    fn test_inner_hits_toggle() {
        let with = build_search_body(&spec(None));
        assert!(find_nested(&with)["nested"].get("inner_hits").is_some());

        let mut s = spec(None);
        s.return_chunks = false;
        let without = build_search_body(&s);
        assert!(find_nested(&without)["nested"].get("inner_hits").is_none());
    }
}
