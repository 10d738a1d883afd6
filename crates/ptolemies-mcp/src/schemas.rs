//! Input schemas for the built-in knowledge tools.
use serde_json::{json, Value};

pub fn semantic_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural language query to match against document chunks"
            },
            "limit": {
                "type": "integer",
                "default": 50,
                "minimum": 1,
                "maximum": 100,
                "description": "Maximum number of results to return"
            },
            "source_filter": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Restrict results to these source names"
            },
            "quality_threshold": {
                "type": "number",
                "default": 0.5,
                "minimum": 0.0,
                "maximum": 1.0,
                "description": "Minimum chunk quality score"
            }
        },
        "required": ["query"]
    })
}

pub fn graph_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Concept or document to look up in the relationship graph"
            },
            "search_type": {
                "type": "string",
                "enum": ["concept", "document", "relationship"],
                "default": "concept",
                "description": "Kind of graph traversal to run"
            },
            "max_depth": {
                "type": "integer",
                "default": 2,
                "minimum": 1,
                "maximum": 5,
                "description": "Maximum traversal depth"
            },
            "limit": {
                "type": "integer",
                "default": 50,
                "minimum": 1,
                "maximum": 100
            }
        },
        "required": ["query"]
    })
}

pub fn hybrid_search_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural language query"
            },
            "query_type": {
                "type": "string",
                "enum": [
                    "semantic_only",
                    "graph_only",
                    "hybrid_balanced",
                    "semantic_then_graph",
                    "graph_then_semantic",
                    "concept_expansion"
                ],
                "default": "hybrid_balanced",
                "description": "Search strategy to apply"
            },
            "limit": {
                "type": "integer",
                "default": 50,
                "minimum": 1,
                "maximum": 100
            },
            "source_filter": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["query"]
    })
}

pub fn index_document_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "url": {"type": "string", "description": "Source URL of the document"},
            "content": {"type": "string", "description": "Document text to index"},
            "title": {"type": "string"},
            "source_name": {"type": "string"},
            "topics": {
                "type": "array",
                "items": {"type": "string"}
            }
        }
    })
}

pub fn knowledge_stats_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "include_performance": {
                "type": "boolean",
                "default": true,
                "description": "Include the performance optimizer report"
            },
            "include_cache": {
                "type": "boolean",
                "default": true,
                "description": "Include cache layer statistics"
            }
        },
        "additionalProperties": false
    })
}

pub fn query_suggestions_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "partial_query": {
                "type": "string",
                "description": "Prefix or fragment to complete"
            },
            "limit": {
                "type": "integer",
                "default": 10,
                "minimum": 1,
                "maximum": 25
            }
        },
        "required": ["partial_query"]
    })
}
