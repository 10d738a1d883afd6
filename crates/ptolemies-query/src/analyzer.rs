use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ptolemies_core::{
    EntityKind, ExtractedEntity, ProcessedQuery, QueryComplexity, QueryContext, QueryIntent,
    QueryType,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Configuration for the query processing pipeline.
#[derive(Debug, Clone)]
pub struct QueryPipelineConfig {
    pub enable_intent_detection: bool,
    pub intent_confidence_threshold: f32,
    pub enable_query_expansion: bool,
    pub max_query_expansions: usize,
    pub synonym_expansion: bool,
    pub concept_expansion: bool,
    pub enable_spell_correction: bool,
    pub enable_entity_extraction: bool,
    pub enable_context_awareness: bool,
    pub context_window_size: usize,
    pub session_timeout_minutes: u64,
    pub enable_caching: bool,
    pub cache_ttl_seconds: u64,
    pub parallel_processing: bool,
    pub max_concurrent_operations: usize,
    pub result_limit: usize,
}

impl Default for QueryPipelineConfig {
    fn default() -> Self {
        Self {
            enable_intent_detection: true,
            intent_confidence_threshold: 0.7,
            enable_query_expansion: true,
            max_query_expansions: 3,
            synonym_expansion: true,
            concept_expansion: true,
            enable_spell_correction: true,
            enable_entity_extraction: true,
            enable_context_awareness: true,
            context_window_size: 5,
            session_timeout_minutes: 30,
            enable_caching: true,
            cache_ttl_seconds: 3600,
            parallel_processing: true,
            max_concurrent_operations: 5,
            result_limit: 10,
        }
    }
}

static INTENT_PATTERNS: Lazy<Vec<(QueryIntent, Vec<Regex>)>> = Lazy::new(|| {
    let table: &[(QueryIntent, &[&str])] = &[
        (
            QueryIntent::Search,
            &[
                r"(find|search|look for|locate|where)",
                r"(show me|get me|fetch)",
                r"(information about|details on)",
            ],
        ),
        (
            QueryIntent::Explain,
            &[
                r"(explain|what is|what are|describe)",
                r"(how does|how do|how to)",
                r"(tell me about|teach me)",
            ],
        ),
        (
            QueryIntent::Compare,
            &[
                r"(compare|difference|versus|vs)",
                r"(better than|worse than)",
                r"(pros and cons|advantages|disadvantages)",
            ],
        ),
        (
            QueryIntent::Analyze,
            &[
                r"(analyze|analysis|evaluate)",
                r"(performance|efficiency|quality)",
                r"(review|assess|examine)",
            ],
        ),
        (
            QueryIntent::Summarize,
            &[
                r"(summarize|summary|overview)",
                r"(key points|main ideas|highlights)",
                r"(brief|concise|short)",
            ],
        ),
        (
            QueryIntent::Tutorial,
            &[
                r"(tutorial|guide|walkthrough)",
                r"(step by step|how to|instructions)",
                r"(learn|teaching|lesson)",
            ],
        ),
        (
            QueryIntent::Troubleshoot,
            &[
                r"(error|problem|issue|bug)",
                r"(fix|solve|resolve|debug)",
                r"(not working|broken|failed)",
            ],
        ),
        (
            QueryIntent::Definition,
            &[
                r"(define|definition|meaning)",
                r"(what does.*mean)",
                r"(terminology|glossary)",
            ],
        ),
        (
            QueryIntent::Example,
            &[
                r"(example|sample|demo)",
                r"(show me code|code snippet)",
                r"(use case|scenario|instance)",
            ],
        ),
    ];
    table
        .iter()
        .map(|(intent, patterns)| {
            (
                *intent,
                patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("static intent pattern"))
                    .collect(),
            )
        })
        .collect()
});

static TECH_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("python", r"\bpython\b"),
        ("javascript", r"\bjavascript\b|\bjs\b"),
        ("fastapi", r"\bfastapi\b"),
        ("react", r"\breact\b"),
        ("nodejs", r"\bnode\.?js\b"),
        ("database", r"\b(database|db|sql|nosql)\b"),
        ("api", r"\bapi\b"),
        ("mcp", r"\bmcp\b"),
        ("redis", r"\bredis\b"),
        ("neo4j", r"\bneo4j\b"),
    ]
    .iter()
    .map(|(name, pattern)| (*name, Regex::new(pattern).expect("static tech pattern")))
    .collect()
});

static CONCEPT_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("authentication", r"\b(auth|authentication|login)\b"),
        ("caching", r"\b(cache|caching)\b"),
        ("search", r"\b(search|query|find)\b"),
        ("performance", r"\b(performance|speed|optimization)\b"),
        ("security", r"\b(security|secure|vulnerability)\b"),
    ]
    .iter()
    .map(|(name, pattern)| (*name, Regex::new(pattern).expect("static concept pattern")))
    .collect()
});

static NORMALIZE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static pattern"));
static NORMALIZE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s\-\.\,\?\!]").expect("static pattern"));

const SPELL_CORRECTIONS: &[(&str, &str)] = &[
    ("pyton", "python"),
    ("javascrip", "javascript"),
    ("databse", "database"),
    ("funtion", "function"),
    ("paramter", "parameter"),
    ("asyncronous", "asynchronous"),
    ("authetication", "authentication"),
    ("authorisation", "authorization"),
];

pub(crate) const CONCEPT_SYNONYMS: &[(&str, &[&str])] = &[
    ("authentication", &["auth", "login", "sign-in", "authorization"]),
    ("database", &["db", "datastore", "persistence", "storage"]),
    ("api", &["endpoint", "interface", "service", "rest"]),
    ("async", &["asynchronous", "concurrent", "parallel", "non-blocking"]),
    ("error", &["exception", "bug", "issue", "problem", "failure"]),
    ("performance", &["speed", "efficiency", "optimization", "fast"]),
    ("security", &["safety", "protection", "secure", "vulnerability"]),
];

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "and", "or", "but", "in", "with", "to", "for",
    "of", "as", "by", "that", "this", "it", "from", "be", "are", "been", "being", "have", "has",
    "had", "do", "does", "did", "will", "would", "should", "could", "may", "might", "must", "can",
    "cant", "what", "where", "when", "how", "why", "who", "whom", "whose",
];

/// Query analyzer: normalization, spell correction, intent detection, entity
/// and concept extraction, complexity assessment, strategy selection, and
/// expansion. Analyses are memoized per normalized query.
pub struct QueryProcessor {
    config: QueryPipelineConfig,
    memo: Mutex<HashMap<String, ProcessedQuery>>,
}

impl QueryProcessor {
    pub fn new(config: QueryPipelineConfig) -> Self {
        Self {
            config,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QueryPipelineConfig {
        &self.config
    }

    /// Run the full analysis pipeline over a raw query.
    pub fn process(&self, query: &str, context: Option<&QueryContext>) -> ProcessedQuery {
        let normalized = normalize_query(query);

        let (corrected, spell_corrected) = if self.config.enable_spell_correction {
            spell_correct(&normalized)
        } else {
            (normalized.clone(), false)
        };

        let mut processed = {
            let memo = self.memo.lock();
            memo.get(&corrected).cloned()
        }
        .unwrap_or_else(|| {
            let analyzed = self.analyze(query, &corrected);
            self.memo
                .lock()
                .insert(corrected.clone(), analyzed.clone());
            analyzed
        });

        processed.original_query = query.to_string();
        processed.spell_corrected = spell_corrected;

        if self.config.enable_query_expansion {
            processed.expanded_queries =
                self.expand_query(&corrected, processed.intent, &processed.concepts);
        }

        if self.config.enable_context_awareness {
            if let Some(ctx) = context {
                processed.search_strategy =
                    self.apply_context(processed.search_strategy, ctx, processed.intent);
            }
        }

        info!(
            intent = processed.intent.as_str(),
            complexity = processed.complexity.as_str(),
            strategy = processed.search_strategy.as_str(),
            entities = processed.entities.len(),
            concepts = processed.concepts.len(),
            "query processed"
        );

        processed
    }

    fn analyze(&self, original: &str, corrected: &str) -> ProcessedQuery {
        let (intent, confidence) = if self.config.enable_intent_detection {
            self.detect_intent(corrected)
        } else {
            (QueryIntent::Unknown, 0.0)
        };

        let entities = if self.config.enable_entity_extraction {
            extract_entities(corrected)
        } else {
            Vec::new()
        };

        let keywords = extract_keywords(corrected);
        let concepts = extract_concepts(corrected, &entities);
        let complexity = assess_complexity(corrected, &entities, &concepts);
        let search_strategy = determine_search_strategy(intent, complexity, &concepts);

        ProcessedQuery {
            original_query: original.to_string(),
            normalized_query: corrected.to_string(),
            intent,
            complexity,
            entities,
            keywords,
            concepts,
            search_strategy,
            confidence_score: confidence,
            spell_corrected: false,
            expanded_queries: Vec::new(),
        }
    }

    fn detect_intent(&self, query: &str) -> (QueryIntent, f32) {
        let mut scores: Vec<(QueryIntent, f32)> = Vec::new();
        for (intent, patterns) in INTENT_PATTERNS.iter() {
            let score = patterns.iter().filter(|p| p.is_match(query)).count() as f32;
            if score > 0.0 {
                scores.push((*intent, score));
            }
        }

        if scores.is_empty() {
            return (QueryIntent::Unknown, 0.0);
        }

        // Highest score wins; ties break on the intent name so overlapping
        // categories (explain vs. definition) resolve deterministically.
        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.as_str().cmp(b.0.as_str()))
        });
        let (best, score) = scores[0];
        let confidence = (score / 3.0).min(1.0);

        if confidence < self.config.intent_confidence_threshold {
            return (QueryIntent::Search, confidence);
        }
        (best, confidence)
    }

    fn expand_query(&self, query: &str, intent: QueryIntent, concepts: &[String]) -> Vec<String> {
        let mut expanded = Vec::new();

        if self.config.synonym_expansion {
            let mut synonym_words: Vec<&str> = Vec::new();
            for word in query.split_whitespace() {
                for (concept, synonyms) in CONCEPT_SYNONYMS {
                    if word == *concept || synonyms.contains(&word) {
                        synonym_words.extend(synonyms.iter());
                        break;
                    }
                }
            }
            if !synonym_words.is_empty() {
                let extras: Vec<&str> = synonym_words.into_iter().take(3).collect();
                expanded.push(format!("{} {}", query, extras.join(" ")));
            }
        }

        if self.config.concept_expansion {
            for concept in concepts.iter().take(2) {
                expanded.push(format!("{query} {concept} tutorial"));
                expanded.push(format!("{query} {concept} example"));
            }
        }

        match intent {
            QueryIntent::Troubleshoot => expanded.push(format!("{query} solution fix")),
            QueryIntent::Tutorial => expanded.push(format!("{query} step by step guide")),
            QueryIntent::Example => expanded.push(format!("{query} code sample demo")),
            _ => {}
        }

        expanded.truncate(self.config.max_query_expansions);
        expanded
    }

    fn apply_context(
        &self,
        strategy: QueryType,
        context: &QueryContext,
        intent: QueryIntent,
    ) -> QueryType {
        if !context.previous_queries.is_empty() {
            let last = context
                .previous_queries
                .last()
                .map(String::as_str)
                .unwrap_or("");
            if ["more", "details", "explain"]
                .iter()
                .any(|marker| last.contains(marker))
            {
                debug!("follow-up query detected, routing to graph-first search");
                return QueryType::GraphThenSemantic;
            }

            let window = self.config.context_window_size;
            let recent = context.previous_queries.len().min(window);
            if recent > 1 && intent == QueryIntent::Search {
                return QueryType::SemanticOnly;
            }
        }

        if context
            .preferences
            .get("prefer_examples")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return QueryType::SemanticThenGraph;
        }
        if context
            .preferences
            .get("prefer_concepts")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return QueryType::ConceptExpansion;
        }

        strategy
    }
}

pub(crate) fn normalize_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    let stripped = NORMALIZE_CHARS.replace_all(&lowered, "");
    NORMALIZE_WS.replace_all(stripped.trim(), " ").into_owned()
}

fn spell_correct(query: &str) -> (String, bool) {
    let mut corrected_words = Vec::new();
    let mut was_corrected = false;
    for word in query.split_whitespace() {
        match SPELL_CORRECTIONS.iter().find(|(wrong, _)| *wrong == word) {
            Some((_, fixed)) => {
                corrected_words.push(*fixed);
                was_corrected = true;
            }
            None => corrected_words.push(word),
        }
    }
    let corrected = corrected_words.join(" ");
    if was_corrected {
        info!(original = query, corrected = %corrected, "spell correction applied");
    }
    (corrected, was_corrected)
}

fn extract_entities(query: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();
    for (tech, pattern) in TECH_PATTERNS.iter() {
        if pattern.is_match(query) {
            entities.push(ExtractedEntity {
                kind: EntityKind::Technology,
                value: (*tech).to_string(),
                confidence: 0.9,
            });
        }
    }
    for (concept, pattern) in CONCEPT_PATTERNS.iter() {
        if pattern.is_match(query) {
            entities.push(ExtractedEntity {
                kind: EntityKind::Concept,
                value: (*concept).to_string(),
                confidence: 0.85,
            });
        }
    }
    entities
}

fn extract_keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn extract_concepts(query: &str, entities: &[ExtractedEntity]) -> Vec<String> {
    let mut concepts: Vec<String> = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Concept)
        .map(|e| e.value.clone())
        .collect();

    for (concept, synonyms) in CONCEPT_SYNONYMS {
        let mentioned =
            query.contains(concept) || synonyms.iter().any(|syn| query.contains(syn));
        if mentioned && !concepts.iter().any(|c| c == concept) {
            concepts.push((*concept).to_string());
        }
    }
    concepts
}

fn assess_complexity(
    query: &str,
    entities: &[ExtractedEntity],
    concepts: &[String],
) -> QueryComplexity {
    let compound_markers = ["and", "or", "but also", "as well as"];
    let words: Vec<&str> = query.split_whitespace().collect();
    if compound_markers
        .iter()
        .any(|marker| words.contains(marker) || query.contains(marker))
    {
        return QueryComplexity::Compound;
    }

    let word_count = words.len();
    let mut score = 0;
    if word_count > 10 {
        score += 2;
    } else if word_count > 5 {
        score += 1;
    }
    if entities.len() > 3 {
        score += 2;
    } else if entities.len() > 1 {
        score += 1;
    }
    if concepts.len() > 2 {
        score += 1;
    }

    match score {
        s if s >= 4 => QueryComplexity::Complex,
        s if s >= 2 => QueryComplexity::Moderate,
        _ => QueryComplexity::Simple,
    }
}

fn determine_search_strategy(
    intent: QueryIntent,
    complexity: QueryComplexity,
    concepts: &[String],
) -> QueryType {
    match intent {
        QueryIntent::Explain => return QueryType::ConceptExpansion,
        QueryIntent::Compare => return QueryType::GraphThenSemantic,
        QueryIntent::Analyze => return QueryType::HybridBalanced,
        QueryIntent::Troubleshoot => return QueryType::SemanticThenGraph,
        _ => {}
    }

    match complexity {
        QueryComplexity::Complex => return QueryType::HybridBalanced,
        QueryComplexity::Compound => return QueryType::ConceptExpansion,
        _ => {}
    }

    if concepts.len() > 2 {
        QueryType::GraphThenSemantic
    } else if !concepts.is_empty() {
        QueryType::SemanticThenGraph
    } else {
        QueryType::SemanticOnly
    }
}
