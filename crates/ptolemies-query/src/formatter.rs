use ptolemies_core::{EntityKind, HybridSearchResult, ProcessedQuery, QueryIntent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    Markdown,
    Text,
    Html,
    Structured,
    Compact,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    Concise,
    Detailed,
    Technical,
    Tutorial,
    Comparison,
    Troubleshooting,
    Summary,
}

#[derive(Debug, Clone)]
pub struct FormattingConfig {
    pub default_format: OutputFormat,
    pub max_results_per_section: usize,
    pub include_sources: bool,
    pub include_snippets: bool,
    pub snippet_length: usize,
    pub include_confidence_scores: bool,
    pub include_related_concepts: bool,
    pub enable_grouping: bool,
    pub group_by_topic: bool,
    pub group_by_source: bool,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            default_format: OutputFormat::Structured,
            max_results_per_section: 5,
            include_sources: true,
            include_snippets: true,
            snippet_length: 200,
            include_confidence_scores: true,
            include_related_concepts: true,
            enable_grouping: true,
            group_by_topic: true,
            group_by_source: false,
        }
    }
}

/// One result rendered inside a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedResult {
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub url: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

/// A typed section of the response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<FormattedResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

impl Section {
    fn message(title: &str, content: String) -> Self {
        Self {
            title: title.to_string(),
            kind: "message".into(),
            content: Some(content),
            results: Vec::new(),
            steps: Vec::new(),
            items: Vec::new(),
        }
    }

    fn text(title: &str, kind: &str, content: String) -> Self {
        Self {
            title: title.to_string(),
            kind: kind.to_string(),
            content: Some(content),
            results: Vec::new(),
            steps: Vec::new(),
            items: Vec::new(),
        }
    }

    fn results(title: &str, results: Vec<FormattedResult>) -> Self {
        Self {
            title: title.to_string(),
            kind: "results".into(),
            content: None,
            results,
            steps: Vec::new(),
            items: Vec::new(),
        }
    }
}

/// The fully rendered response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedResponse {
    pub formatted_content: String,
    pub format_type: OutputFormat,
    pub style: ResponseStyle,
    pub query: String,
    pub intent: QueryIntent,
    pub results_count: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub sections: Vec<Section>,
    pub summary: String,
    pub key_insights: Vec<String>,
    pub related_queries: Vec<String>,
    pub search_strategy: String,
    pub confidence_score: f32,
    pub sources: Vec<serde_json::Value>,
}

/// Intent-driven response formatter: builds typed sections per intent, then
/// renders them in the requested output format.
pub struct ResponseFormatter {
    config: FormattingConfig,
}

impl ResponseFormatter {
    pub fn new(config: FormattingConfig) -> Self {
        Self { config }
    }

    pub fn format(
        &self,
        query: &str,
        processed: &ProcessedQuery,
        results: &[HybridSearchResult],
        output_format: Option<OutputFormat>,
        style: Option<ResponseStyle>,
    ) -> FormattedResponse {
        let format_type = output_format.unwrap_or(self.config.default_format);
        let style = style.unwrap_or_else(|| default_style(processed.intent));

        let mut sections = self.build_sections(query, processed, results);
        if self.config.include_sources && !results.is_empty() {
            sections.push(Section::results(
                "Sources",
                self.format_results(results, self.config.max_results_per_section),
            ));
        }

        let formatted_content = self.render(&sections, format_type);
        debug!(
            intent = processed.intent.as_str(),
            format = ?format_type,
            sections = sections.len(),
            "response formatted"
        );

        FormattedResponse {
            formatted_content,
            format_type,
            style,
            query: query.to_string(),
            intent: processed.intent,
            results_count: results.len(),
            timestamp: chrono::Utc::now(),
            sections,
            summary: self.generate_summary(processed, results),
            key_insights: self.extract_key_insights(results),
            related_queries: self.generate_related_queries(processed),
            search_strategy: processed.search_strategy.to_string(),
            confidence_score: processed.confidence_score,
            sources: self.extract_source_info(results),
        }
    }

    fn build_sections(
        &self,
        query: &str,
        processed: &ProcessedQuery,
        results: &[HybridSearchResult],
    ) -> Vec<Section> {
        if results.is_empty() {
            return vec![Section::message(
                "No Results Found",
                format!(
                    "No results found for '{query}'. Try rephrasing your query or using different keywords."
                ),
            )];
        }

        match processed.intent {
            QueryIntent::Explain | QueryIntent::Definition => {
                self.explanation_sections(results)
            }
            QueryIntent::Compare => self.comparison_sections(processed, results),
            QueryIntent::Tutorial => self.tutorial_sections(query, results),
            QueryIntent::Troubleshoot => self.troubleshooting_sections(results),
            QueryIntent::Summarize => self.summary_sections(processed, results),
            QueryIntent::Example => self.example_sections(results),
            _ => self.search_sections(results),
        }
    }

    fn search_sections(&self, results: &[HybridSearchResult]) -> Vec<Section> {
        let grouped: BTreeMap<String, Vec<&HybridSearchResult>> = if self.config.enable_grouping
            && self.config.group_by_topic
        {
            group_by_topic(results)
        } else if self.config.enable_grouping && self.config.group_by_source {
            group_by_source(results)
        } else {
            BTreeMap::from([("Search Results".to_string(), results.iter().collect())])
        };

        grouped
            .into_iter()
            .map(|(group, members)| {
                let formatted: Vec<FormattedResult> = members
                    .into_iter()
                    .take(self.config.max_results_per_section)
                    .map(|r| self.format_result(r))
                    .collect();
                Section::results(&group, formatted)
            })
            .collect()
    }

    fn explanation_sections(&self, results: &[HybridSearchResult]) -> Vec<Section> {
        let mut sections = Vec::new();

        let overview = results
            .iter()
            .take(3)
            .map(|r| self.snippet(&r.content))
            .collect::<Vec<_>>()
            .join(" ");
        sections.push(Section::text("Overview", "explanation", overview));

        let concepts = key_concepts(results);
        if !concepts.is_empty() {
            sections.push(Section {
                title: "Key Concepts".into(),
                kind: "concepts".into(),
                content: None,
                results: Vec::new(),
                steps: Vec::new(),
                items: concepts,
            });
        }

        let detailed = results
            .iter()
            .take(5)
            .filter(|r| r.content.len() > 100)
            .map(|r| {
                let body: String = r.content.chars().take(300).collect();
                format!("{body}...")
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        if !detailed.is_empty() {
            sections.push(Section::text("Detailed Explanation", "detailed", detailed));
        }

        let examples: Vec<String> = results
            .iter()
            .filter(|r| {
                let content = r.content.to_lowercase();
                ["example", "for instance", "such as", "```"]
                    .iter()
                    .any(|marker| content.contains(marker))
            })
            .map(|r| self.snippet(&r.content))
            .collect();
        if !examples.is_empty() {
            sections.push(Section::text("Examples", "examples", examples.join("\n\n")));
        }

        sections
    }

    fn comparison_sections(
        &self,
        processed: &ProcessedQuery,
        results: &[HybridSearchResult],
    ) -> Vec<Section> {
        let entities: Vec<&str> = processed
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Technology)
            .map(|e| e.value.as_str())
            .collect();

        if entities.len() >= 2 {
            let mut lines = Vec::new();
            for entity in entities.iter().take(2) {
                let mentions: Vec<&HybridSearchResult> = results
                    .iter()
                    .filter(|r| r.content.to_lowercase().contains(entity))
                    .take(2)
                    .collect();
                lines.push(format!("{entity}:"));
                for result in mentions {
                    lines.push(format!("  - {}", self.snippet(&result.content)));
                }
            }
            vec![Section::text(
                &format!("Comparison: {} vs {}", entities[0], entities[1]),
                "comparison",
                lines.join("\n"),
            )]
        } else {
            let general = results
                .iter()
                .take(3)
                .map(|r| self.snippet(&r.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            vec![Section::text(
                "Comparison Analysis",
                "general_comparison",
                general,
            )]
        }
    }

    fn tutorial_sections(&self, query: &str, results: &[HybridSearchResult]) -> Vec<Section> {
        let mut sections = Vec::new();

        let intro = results
            .iter()
            .take(2)
            .map(|r| self.snippet(&r.content))
            .collect::<Vec<_>>()
            .join(" ");
        sections.push(Section::text(
            "Introduction",
            "intro",
            format!("Getting started with '{query}'. {intro}"),
        ));

        let steps: Vec<String> = results
            .iter()
            .filter(|r| {
                let content = r.content.to_lowercase();
                ["step", "guide", "tutorial"]
                    .iter()
                    .any(|marker| content.contains(marker))
            })
            .take(self.config.max_results_per_section)
            .map(|r| format!("{}: {}", r.title, self.snippet(&r.content)))
            .collect();
        if !steps.is_empty() {
            sections.push(Section {
                title: "Steps".into(),
                kind: "steps".into(),
                content: None,
                results: Vec::new(),
                steps,
                items: Vec::new(),
            });
        }

        sections
    }

    fn troubleshooting_sections(&self, results: &[HybridSearchResult]) -> Vec<Section> {
        let (solutions, context): (Vec<&HybridSearchResult>, Vec<&HybridSearchResult>) =
            results.iter().partition(|r| {
                let content = r.content.to_lowercase();
                ["fix", "solution", "resolve", "solved"]
                    .iter()
                    .any(|marker| content.contains(marker))
            });

        let mut sections = Vec::new();
        if !solutions.is_empty() {
            sections.push(Section::results(
                "Possible Solutions",
                solutions
                    .into_iter()
                    .take(self.config.max_results_per_section)
                    .map(|r| self.format_result(r))
                    .collect(),
            ));
        }
        if !context.is_empty() {
            sections.push(Section::results(
                "Additional Context",
                context
                    .into_iter()
                    .take(self.config.max_results_per_section)
                    .map(|r| self.format_result(r))
                    .collect(),
            ));
        }
        sections
    }

    fn summary_sections(
        &self,
        processed: &ProcessedQuery,
        results: &[HybridSearchResult],
    ) -> Vec<Section> {
        vec![
            Section::text(
                "Summary",
                "summary",
                self.generate_summary(processed, results),
            ),
            Section::results(
                "Top Results",
                results
                    .iter()
                    .take(3)
                    .map(|r| self.format_result(r))
                    .collect(),
            ),
        ]
    }

    fn example_sections(&self, results: &[HybridSearchResult]) -> Vec<Section> {
        let (examples, rest): (Vec<&HybridSearchResult>, Vec<&HybridSearchResult>) =
            results.iter().partition(|r| {
                let content = r.content.to_lowercase();
                ["```", "code", "example", "sample"]
                    .iter()
                    .any(|marker| content.contains(marker))
            });

        let mut sections = Vec::new();
        if !examples.is_empty() {
            sections.push(Section {
                title: "Code Examples".into(),
                kind: "code_examples".into(),
                content: Some(
                    examples
                        .iter()
                        .take(3)
                        .map(|r| r.content.clone())
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                ),
                results: Vec::new(),
                steps: Vec::new(),
                items: Vec::new(),
            });
        }
        if !rest.is_empty() {
            sections.push(Section::results(
                "Related Material",
                rest.into_iter()
                    .take(self.config.max_results_per_section)
                    .map(|r| self.format_result(r))
                    .collect(),
            ));
        }
        sections
    }

    fn format_result(&self, result: &HybridSearchResult) -> FormattedResult {
        FormattedResult {
            title: result.title.clone(),
            snippet: if self.config.include_snippets {
                self.snippet(&result.content)
            } else {
                String::new()
            },
            source: result.source_name.clone(),
            url: result.source_url.clone(),
            score: result.combined_score,
            topics: if self.config.include_related_concepts {
                result.topics.clone()
            } else {
                Vec::new()
            },
        }
    }

    fn format_results(
        &self,
        results: &[HybridSearchResult],
        limit: usize,
    ) -> Vec<FormattedResult> {
        results
            .iter()
            .take(limit)
            .map(|r| self.format_result(r))
            .collect()
    }

    fn render(&self, sections: &[Section], format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(sections).unwrap_or_else(|_| "[]".to_string())
            }
            OutputFormat::Markdown | OutputFormat::Detailed => render_markdown(sections),
            OutputFormat::Text => render_text(sections),
            OutputFormat::Html => render_html(sections),
            OutputFormat::Structured => render_structured(sections, usize::MAX),
            OutputFormat::Compact => render_structured(sections, 2),
        }
    }

    /// Truncate content to the snippet budget, preferring a sentence end past
    /// 70% of the budget, then a word boundary past 80%, then an ellipsis.
    fn snippet(&self, content: &str) -> String {
        let budget = self.config.snippet_length;
        if content.chars().count() <= budget {
            return content.to_string();
        }

        let head: String = content.chars().take(budget).collect();
        if let Some(last_period) = head.rfind('.') {
            if last_period as f64 > budget as f64 * 0.7 {
                return head[..=last_period].to_string();
            }
        }
        if let Some(last_space) = head.rfind(' ') {
            if last_space as f64 > budget as f64 * 0.8 {
                return format!("{}...", &head[..last_space]);
            }
        }
        format!("{head}...")
    }

    fn generate_summary(
        &self,
        processed: &ProcessedQuery,
        results: &[HybridSearchResult],
    ) -> String {
        if results.is_empty() {
            return "No relevant information found for this query.".to_string();
        }
        let avg_score: f32 =
            results.iter().map(|r| r.combined_score).sum::<f32>() / results.len() as f32;
        let mut parts = vec![format!(
            "Found {} relevant results with an average relevance score of {:.2}.",
            results.len(),
            avg_score
        )];
        match processed.intent {
            QueryIntent::Search => parts.push(
                "The results provide comprehensive information on the requested topic.".into(),
            ),
            QueryIntent::Explain => parts
                .push("The results offer detailed explanations and background information.".into()),
            QueryIntent::Compare => parts.push(
                "The results enable comparison between different options or approaches.".into(),
            ),
            _ => {}
        }
        parts.join(" ")
    }

    fn extract_key_insights(&self, results: &[HybridSearchResult]) -> Vec<String> {
        let mut insights = Vec::new();
        if results.is_empty() {
            return insights;
        }

        if let Some(top) = results.iter().max_by(|a, b| {
            a.combined_score
                .partial_cmp(&b.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            insights.push(format!(
                "Most relevant information found in: {}",
                top.source_name
            ));
        }

        let unique_sources: HashSet<&str> =
            results.iter().map(|r| r.source_name.as_str()).collect();
        insights.push(format!(
            "Information gathered from {} different sources",
            unique_sources.len()
        ));

        let mut topics: Vec<&str> = results
            .iter()
            .flat_map(|r| r.topics.iter().map(String::as_str))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        topics.sort_unstable();
        if !topics.is_empty() {
            insights.push(format!(
                "Covers topics: {}",
                topics.into_iter().take(3).collect::<Vec<_>>().join(", ")
            ));
        }

        insights.truncate(5);
        insights
    }

    fn generate_related_queries(&self, processed: &ProcessedQuery) -> Vec<String> {
        let mut related = Vec::new();
        let entities: Vec<&str> = processed.entities.iter().map(|e| e.value.as_str()).collect();

        match processed.intent {
            QueryIntent::Explain => {
                for entity in entities.iter().take(2) {
                    related.push(format!("How to use {entity}"));
                    related.push(format!("{entity} best practices"));
                }
            }
            QueryIntent::Compare if entities.len() >= 2 => {
                related.push(format!("{} advantages over {}", entities[0], entities[1]));
                related.push(format!(
                    "When to choose {} vs {}",
                    entities[0], entities[1]
                ));
            }
            QueryIntent::Tutorial => {
                for entity in entities.iter().take(2) {
                    related.push(format!("{entity} getting started guide"));
                    related.push(format!("Advanced {entity} techniques"));
                }
            }
            _ => {}
        }

        for concept in processed.concepts.iter().take(2) {
            related.push(format!("{concept} examples"));
            related.push(format!("{concept} troubleshooting"));
        }

        related.truncate(5);
        related
    }

    fn extract_source_info(&self, results: &[HybridSearchResult]) -> Vec<serde_json::Value> {
        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        for result in results {
            if seen.insert(result.source_name.clone()) {
                sources.push(serde_json::json!({
                    "name": result.source_name,
                    "url": result.source_url,
                    "relevance": result.combined_score,
                }));
            }
        }
        sources.truncate(10);
        sources
    }
}

fn default_style(intent: QueryIntent) -> ResponseStyle {
    match intent {
        QueryIntent::Search | QueryIntent::Definition => ResponseStyle::Concise,
        QueryIntent::Explain => ResponseStyle::Detailed,
        QueryIntent::Compare => ResponseStyle::Comparison,
        QueryIntent::Analyze | QueryIntent::Example => ResponseStyle::Technical,
        QueryIntent::Summarize => ResponseStyle::Summary,
        QueryIntent::Tutorial => ResponseStyle::Tutorial,
        QueryIntent::Troubleshoot => ResponseStyle::Troubleshooting,
        QueryIntent::Unknown => ResponseStyle::Detailed,
    }
}

fn group_by_topic(results: &[HybridSearchResult]) -> BTreeMap<String, Vec<&HybridSearchResult>> {
    let mut grouped: BTreeMap<String, Vec<&HybridSearchResult>> = BTreeMap::new();
    for result in results {
        let topic = result
            .topics
            .first()
            .cloned()
            .unwrap_or_else(|| "General".to_string());
        grouped.entry(topic).or_default().push(result);
    }
    grouped
}

fn group_by_source(results: &[HybridSearchResult]) -> BTreeMap<String, Vec<&HybridSearchResult>> {
    let mut grouped: BTreeMap<String, Vec<&HybridSearchResult>> = BTreeMap::new();
    for result in results {
        let source = if result.source_name.is_empty() {
            "Unknown Source".to_string()
        } else {
            result.source_name.clone()
        };
        grouped.entry(source).or_default().push(result);
    }
    grouped
}

fn key_concepts(results: &[HybridSearchResult]) -> Vec<String> {
    let mut concepts: Vec<String> = results
        .iter()
        .flat_map(|r| r.topics.iter().chain(r.related_concepts.iter()))
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    concepts.sort_unstable();
    concepts.truncate(10);
    concepts
}

fn render_markdown(sections: &[Section]) -> String {
    let mut parts = Vec::new();
    for section in sections {
        parts.push(format!("## {}\n", section.title));

        match section.kind.as_str() {
            "results" => {
                for result in &section.results {
                    parts.push(format!("### {}", result.title));
                    parts.push(result.snippet.clone());
                    parts.push(format!("**Source:** {}", result.source));
                    if !result.url.is_empty() {
                        parts.push(format!("**URL:** {}", result.url));
                    }
                    parts.push(String::new());
                }
            }
            "steps" => {
                for (i, step) in section.steps.iter().enumerate() {
                    parts.push(format!("{}. {}", i + 1, step));
                }
                parts.push(String::new());
            }
            "code_examples" => {
                if let Some(content) = &section.content {
                    parts.push(format!("```\n{content}\n```"));
                }
                parts.push(String::new());
            }
            "concepts" => {
                for item in &section.items {
                    parts.push(format!("- {item}"));
                }
                parts.push(String::new());
            }
            _ => {
                parts.push(format!("{}\n", section.content.clone().unwrap_or_default()));
            }
        }
    }
    parts.join("\n")
}

fn render_text(sections: &[Section]) -> String {
    let mut parts = Vec::new();
    for section in sections {
        parts.push(section.title.to_uppercase());
        parts.push("=".repeat(section.title.len()));
        if let Some(content) = &section.content {
            parts.push(content.clone());
        }
        for result in &section.results {
            parts.push(format!("{} ({})", result.title, result.source));
            parts.push(format!("  {}", result.snippet));
        }
        for (i, step) in section.steps.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, step));
        }
        parts.push(String::new());
    }
    parts.join("\n")
}

fn render_structured(sections: &[Section], per_section: usize) -> String {
    let mut parts = Vec::new();
    for (i, section) in sections.iter().enumerate() {
        parts.push(format!("{}. {}", i + 1, section.title));
        parts.push("-".repeat(section.title.len() + 4));
        if let Some(content) = &section.content {
            parts.push(content.clone());
        }
        for (j, result) in section.results.iter().take(per_section).enumerate() {
            parts.push(format!("  {}. {}", j + 1, result.title));
            parts.push(format!("     {}", result.snippet));
            parts.push(format!("     Source: {}", result.source));
        }
        for item in section.items.iter().take(per_section) {
            parts.push(format!("  - {item}"));
        }
        parts.push(String::new());
    }
    parts.join("\n")
}

fn render_html(sections: &[Section]) -> String {
    let mut parts = Vec::new();
    for section in sections {
        parts.push(format!("<h2>{}</h2>", section.title));
        if let Some(content) = &section.content {
            parts.push(format!("<p>{content}</p>"));
        }
        if !section.results.is_empty() {
            parts.push("<ul>".to_string());
            for result in &section.results {
                parts.push(format!(
                    "<li><a href=\"{}\">{}</a> — {}</li>",
                    result.url, result.title, result.snippet
                ));
            }
            parts.push("</ul>".to_string());
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptolemies_core::{QueryComplexity, QueryType};

    fn processed(intent: QueryIntent) -> ProcessedQuery {
        ProcessedQuery {
            original_query: "Explain FastAPI".into(),
            normalized_query: "explain fastapi".into(),
            intent,
            complexity: QueryComplexity::Simple,
            entities: Vec::new(),
            keywords: vec!["fastapi".into()],
            concepts: vec!["api".into()],
            search_strategy: QueryType::ConceptExpansion,
            confidence_score: 0.9,
            spell_corrected: false,
            expanded_queries: Vec::new(),
        }
    }

    fn result(title: &str, content: &str) -> HybridSearchResult {
        HybridSearchResult {
            id: title.to_lowercase().replace(' ', "_"),
            title: title.to_string(),
            content: content.to_string(),
            source_name: "FastAPI Docs".into(),
            source_url: "https://fastapi.tiangolo.com".into(),
            chunk_index: 0,
            total_chunks: 1,
            quality_score: 0.9,
            topics: vec!["fastapi".into(), "api".into()],
            semantic_score: 0.85,
            graph_score: 0.0,
            combined_score: 0.85,
            rank: 1,
            found_via: vec!["semantic_search".into()],
            related_concepts: vec![],
            relationship_paths: vec![],
        }
    }

    fn formatter() -> ResponseFormatter {
        ResponseFormatter::new(FormattingConfig::default())
    }

    #[test]
    fn explain_markdown_has_overview_title_and_source() {
        let hit = result(
            "FastAPI Authentication Guide",
            "FastAPI is a modern Python web framework. It supports OAuth2 and JWT flows. \
             Dependency injection makes security schemes reusable across endpoints.",
        );
        let response = formatter().format(
            "Explain FastAPI",
            &processed(QueryIntent::Explain),
            &[hit],
            Some(OutputFormat::Markdown),
            None,
        );

        assert!(response.formatted_content.contains("## Overview"));
        assert!(response
            .formatted_content
            .contains("FastAPI Authentication Guide"));
        assert!(response.formatted_content.contains("**Source:** FastAPI Docs"));
        assert!(!response.formatted_content.contains("<h2>"));
        assert!(!response.formatted_content.contains("<p>"));
        assert_eq!(response.style, ResponseStyle::Detailed);
    }

    #[test]
    fn empty_results_produce_a_message_section() {
        let response = formatter().format(
            "missing topic",
            &processed(QueryIntent::Search),
            &[],
            Some(OutputFormat::Text),
            None,
        );
        assert_eq!(response.results_count, 0);
        assert!(response.formatted_content.contains("NO RESULTS FOUND"));
    }

    #[test]
    fn snippet_prefers_sentence_boundary() {
        let formatter = ResponseFormatter::new(FormattingConfig {
            snippet_length: 100,
            ..Default::default()
        });
        let content = format!("{} End of sentence. Trailing text that overflows the budget", "x".repeat(60));
        let snippet = formatter.snippet(&content);
        assert!(snippet.ends_with('.'));
        assert!(snippet.len() <= 101);
    }

    #[test]
    fn snippet_falls_back_to_word_boundary_with_ellipsis() {
        let formatter = ResponseFormatter::new(FormattingConfig {
            snippet_length: 50,
            ..Default::default()
        });
        let content = "word ".repeat(40);
        let snippet = formatter.snippet(&content);
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() <= 53);
    }

    #[test]
    fn short_content_passes_through_untouched() {
        let snippet = formatter().snippet("short body");
        assert_eq!(snippet, "short body");
    }

    #[test]
    fn troubleshoot_sections_split_solutions_from_context() {
        let results = vec![
            result("Fix A", "the fix is to clear the cache"),
            result("Background", "architecture overview of the cache"),
        ];
        let response = formatter().format(
            "cache broken",
            &processed(QueryIntent::Troubleshoot),
            &results,
            Some(OutputFormat::Structured),
            None,
        );
        let titles: Vec<&str> = response.sections.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"Possible Solutions"));
        assert!(titles.contains(&"Additional Context"));
        assert_eq!(response.style, ResponseStyle::Troubleshooting);
    }

    #[test]
    fn tutorial_steps_render_numbered_in_markdown() {
        let results = vec![
            result("Install", "step one of the guide covers installation"),
            result("Configure", "step two of the guide covers configuration"),
        ];
        let response = formatter().format(
            "setup tutorial",
            &processed(QueryIntent::Tutorial),
            &results,
            Some(OutputFormat::Markdown),
            None,
        );
        assert!(response.formatted_content.contains("1. Install"));
        assert!(response.formatted_content.contains("2. Configure"));
    }

    #[test]
    fn summary_and_insights_are_populated() {
        let results = vec![
            result("Doc A", "first body"),
            result("Doc B", "second body"),
        ];
        let response = formatter().format(
            "find docs",
            &processed(QueryIntent::Search),
            &results,
            None,
            None,
        );
        assert!(response.summary.contains("Found 2 relevant results"));
        assert!(response
            .key_insights
            .iter()
            .any(|i| i.contains("FastAPI Docs")));
        assert_eq!(response.sources.len(), 1);
    }

    #[test]
    fn json_output_is_parseable() {
        let response = formatter().format(
            "find docs",
            &processed(QueryIntent::Search),
            &[result("Doc A", "body")],
            Some(OutputFormat::Json),
            None,
        );
        let parsed: serde_json::Value =
            serde_json::from_str(&response.formatted_content).unwrap();
        assert!(parsed.is_array());
    }

    #[test]
    fn related_queries_cover_concepts() {
        let response = formatter().format(
            "Explain FastAPI",
            &processed(QueryIntent::Explain),
            &[result("Doc A", "body")],
            None,
            None,
        );
        assert!(response
            .related_queries
            .iter()
            .any(|q| q.contains("api examples")));
        assert!(response.related_queries.len() <= 5);
    }

    #[test]
    fn compact_output_limits_results_per_section() {
        let results: Vec<_> = (0..6)
            .map(|i| result(&format!("Doc {i}"), "body content"))
            .collect();
        let response = formatter().format(
            "find docs",
            &processed(QueryIntent::Search),
            &results,
            Some(OutputFormat::Compact),
            None,
        );
        // Compact rendering shows at most two results per section.
        let rendered_docs = response
            .formatted_content
            .matches("Source:")
            .count();
        let sections_with_results = response
            .sections
            .iter()
            .filter(|s| !s.results.is_empty())
            .count();
        assert!(rendered_docs <= sections_with_results * 2);
    }
}
