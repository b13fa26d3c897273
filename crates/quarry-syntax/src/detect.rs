//! Multi-stage query format detection.
//!
//! 1. Quick anchors: high-signal prefixes that short-circuit.
//! 2. Structural regexes: per-format patterns with weights, max per format.
//! 3. Keyword frequency: weighted counts, normalized by the best format.
//! 4. Combination: `0.6 * pattern + 0.4 * keyword`, argmax wins.

use crate::format::QueryFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Format and confidence returned when nothing matches
pub const FALLBACK: Detection = Detection {
    format: QueryFormat::Sql,
    confidence: 0.5,
};

/// Default threshold for [`FormatDetector::is_confident`]
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

const PATTERN_WEIGHT: f64 = 0.6;
const KEYWORD_WEIGHT: f64 = 0.4;

/// Detected format with its confidence in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub format: QueryFormat,
    pub confidence: f64,
}

// ============================================================================
// Stage tables
// ============================================================================

struct QuickRule {
    regex: Regex,
    format: QueryFormat,
    confidence: f64,
}

fn quick(pattern: &str, format: QueryFormat, confidence: f64) -> QuickRule {
    QuickRule {
        regex: Regex::new(pattern).unwrap(),
        format,
        confidence,
    }
}

/// Checked in order; first hit wins
static QUICK_RULES: Lazy<Vec<QuickRule>> = Lazy::new(|| {
    vec![
        quick(r"(?i)^\s*PREFIX\s", QueryFormat::Sparql, 0.95),
        quick(r"(?i)\bCONSTRUCT\s*\{", QueryFormat::Sparql, 0.95),
        quick(r"(?is)^\s*SELECT\b.+\bFROM\b", QueryFormat::Sql, 0.95),
        quick(
            r"(?is)^\s*(INSERT\s+INTO|UPDATE\s+\S+\s+SET|DELETE\s+FROM|(CREATE|DROP|ALTER)\s+(TABLE|INDEX|VIEW))\b",
            QueryFormat::Sql,
            0.95,
        ),
        quick(r"(?is)\bMATCH\b.*\bRETURN\b", QueryFormat::Cypher, 0.95),
        quick(r"(?is)\bMATCH\s*\(.*-\[", QueryFormat::Cypher, 0.95),
        quick(r"^\s*(query|mutation|subscription)\b", QueryFormat::GraphQl, 0.95),
        quick(r"^\s*g\.[VE]\(", QueryFormat::Gremlin, 0.95),
        quick(r"^\s*db\.\w+\.\w+\(", QueryFormat::MongoDb, 0.95),
        quick(r"(?s)^\s*[\[{].*\$match\b", QueryFormat::MongoDb, 0.90),
        quick(r"^\s*\$[.\[]", QueryFormat::JsonPath, 0.90),
        quick(r"^\s*/[^/]", QueryFormat::XPath, 0.85),
    ]
});

static STRUCTURAL_PATTERNS: Lazy<Vec<(QueryFormat, Vec<(Regex, f64)>)>> = Lazy::new(|| {
    let table: Vec<(QueryFormat, Vec<(&str, f64)>)> = vec![
        (
            QueryFormat::Sql,
            vec![
                (r"\bSELECT\s+.+\s+FROM\s+", 0.95),
                (r"\bINSERT\s+INTO\s+", 0.95),
                (r"\bUPDATE\s+.+\s+SET\s+", 0.95),
                (r"\bDELETE\s+FROM\s+", 0.95),
                (r"\bCREATE\s+TABLE\s+", 0.95),
                (r"\bJOIN\s+", 0.85),
                (r"\bGROUP\s+BY\s+", 0.85),
                (r"\bORDER\s+BY\s+", 0.85),
            ],
        ),
        (
            QueryFormat::GraphQl,
            vec![
                (r"^\s*query\s+\w+\s*\{", 0.95),
                (r"^\s*mutation\s+\w+\s*\{", 0.95),
                (r"^\s*subscription\s+\w+\s*\{", 0.95),
                (r"\{\s*\w+\s*\([^)]*\)\s*\{", 0.90),
                (r"fragment\s+\w+\s+on\s+", 0.90),
            ],
        ),
        (
            QueryFormat::Cypher,
            vec![
                (r"\bMATCH\s+\([^)]*\)", 0.95),
                (r"\([^)]*\)-\[[^\]]*\]->\([^)]*\)", 0.95),
                (r"\bRETURN\s+", 0.85),
                (r"\bCREATE\s+\([^)]*\)", 0.90),
                (r"\bMERGE\s+\([^)]*\)", 0.90),
            ],
        ),
        (
            QueryFormat::Sparql,
            vec![
                (r"^\s*PREFIX\s+\w+:\s*<", 0.95),
                (r"\bCONSTRUCT\s+\{", 0.95),
                (r"\bDESCRIBE\s+", 0.90),
                (r"\bASK\s+\{", 0.95),
                (r"\?[a-zA-Z]\w*\s", 0.80),
            ],
        ),
        (
            QueryFormat::Gremlin,
            vec![
                (r"g\.V\(\)", 0.95),
                (r"g\.E\(\)", 0.95),
                (r"\.has\(", 0.85),
                (r"\.out\(\)", 0.85),
                (r"\.in\(\)", 0.85),
            ],
        ),
        (
            QueryFormat::JmesPath,
            vec![
                (r"\[\?\s*.+\s*\]", 0.90),
                (r"\|", 0.75),
                (r"sort_by\(", 0.90),
                (r"\[\*\]", 0.80),
            ],
        ),
        (
            QueryFormat::JsonPath,
            vec![
                (r"^\$\.", 0.95),
                (r"\$\[", 0.90),
                (r"\.\.\w+", 0.85),
                (r"\[@\.", 0.85),
            ],
        ),
        (
            QueryFormat::XPath,
            vec![
                (r"^/", 0.90),
                (r"//", 0.85),
                (r"@\w+", 0.80),
                (r"\[position\(\)", 0.90),
            ],
        ),
        (
            QueryFormat::MongoDb,
            vec![
                (r"\$match\s*:", 0.95),
                (r"\$group\s*:", 0.95),
                (r"\$project\s*:", 0.95),
                (r"\.find\(", 0.90),
                (r"\.aggregate\(\[", 0.90),
            ],
        ),
    ];
    table
        .into_iter()
        .map(|(format, patterns)| {
            let compiled = patterns
                .into_iter()
                .map(|(p, w)| (Regex::new(&format!("(?i){p}")).unwrap(), w))
                .collect();
            (format, compiled)
        })
        .collect()
});

/// Keyword weights keyed by lower-case token
static KEYWORDS: Lazy<Vec<(QueryFormat, HashMap<&'static str, f64>)>> = Lazy::new(|| {
    let table: Vec<(QueryFormat, &[(&str, f64)])> = vec![
        (
            QueryFormat::Sql,
            &[
                ("select", 10.0),
                ("from", 10.0),
                ("where", 8.0),
                ("insert", 10.0),
                ("update", 10.0),
                ("delete", 10.0),
                ("create", 9.0),
                ("alter", 9.0),
                ("drop", 9.0),
                ("join", 9.0),
                ("inner", 8.0),
                ("left", 7.0),
                ("right", 7.0),
                ("outer", 7.0),
                ("on", 6.0),
                ("as", 5.0),
                ("group", 8.0),
                ("by", 6.0),
                ("having", 9.0),
                ("order", 7.0),
                ("limit", 8.0),
                ("offset", 8.0),
                ("union", 9.0),
                ("distinct", 8.0),
                ("count", 7.0),
                ("sum", 7.0),
                ("avg", 7.0),
                ("min", 7.0),
                ("max", 7.0),
                ("into", 8.0),
                ("values", 7.0),
            ],
        ),
        (
            QueryFormat::GraphQl,
            &[
                ("query", 10.0),
                ("mutation", 10.0),
                ("subscription", 10.0),
                ("fragment", 9.0),
                ("on", 5.0),
                ("type", 6.0),
                ("interface", 7.0),
                ("union", 6.0),
                ("enum", 6.0),
                ("input", 6.0),
                ("schema", 8.0),
                ("extend", 7.0),
                ("implements", 8.0),
                ("directive", 8.0),
            ],
        ),
        (
            QueryFormat::Cypher,
            &[
                ("match", 10.0),
                ("return", 10.0),
                ("create", 9.0),
                ("merge", 9.0),
                ("delete", 8.0),
                ("detach", 9.0),
                ("set", 7.0),
                ("remove", 8.0),
                ("with", 7.0),
                ("unwind", 9.0),
                ("foreach", 9.0),
                ("call", 8.0),
                ("yield", 8.0),
                ("union", 7.0),
                ("where", 6.0),
                ("and", 5.0),
                ("or", 5.0),
                ("not", 5.0),
                ("in", 5.0),
                ("starts", 8.0),
                ("ends", 8.0),
                ("contains", 7.0),
                ("optional", 8.0),
            ],
        ),
        (
            QueryFormat::Sparql,
            &[
                ("prefix", 10.0),
                ("select", 9.0),
                ("construct", 10.0),
                ("describe", 10.0),
                ("ask", 10.0),
                ("where", 7.0),
                ("filter", 8.0),
                ("optional", 8.0),
                ("union", 7.0),
                ("graph", 9.0),
                ("service", 9.0),
                ("bind", 9.0),
                ("values", 7.0),
                ("limit", 7.0),
                ("offset", 7.0),
                ("order", 7.0),
            ],
        ),
        (
            QueryFormat::Gremlin,
            &[
                ("v", 9.0),
                ("e", 9.0),
                ("has", 8.0),
                ("haslabel", 9.0),
                ("hasid", 9.0),
                ("out", 7.0),
                ("in", 7.0),
                ("both", 8.0),
                ("oute", 8.0),
                ("ine", 8.0),
                ("bothe", 8.0),
                ("values", 7.0),
                ("properties", 7.0),
                ("path", 8.0),
                ("until", 8.0),
                ("repeat", 8.0),
                ("emit", 8.0),
                ("times", 8.0),
                ("aggregate", 7.0),
                ("group", 7.0),
                ("count", 6.0),
                ("sum", 6.0),
            ],
        ),
        (
            QueryFormat::JmesPath,
            &[
                ("length", 7.0),
                ("sort_by", 9.0),
                ("reverse", 7.0),
                ("contains", 6.0),
                ("starts_with", 8.0),
                ("ends_with", 8.0),
                ("join", 6.0),
                ("keys", 7.0),
                ("values", 6.0),
                ("type", 6.0),
                ("to_string", 8.0),
                ("to_number", 8.0),
                ("abs", 7.0),
                ("ceil", 7.0),
                ("floor", 7.0),
                ("max", 6.0),
                ("min", 6.0),
                ("sum", 6.0),
                ("avg", 7.0),
                ("flatten", 8.0),
                ("unique", 8.0),
            ],
        ),
        (
            QueryFormat::MongoDb,
            &[
                ("$match", 10.0),
                ("$group", 10.0),
                ("$project", 10.0),
                ("$sort", 9.0),
                ("$limit", 9.0),
                ("$skip", 9.0),
                ("$lookup", 10.0),
                ("$unwind", 10.0),
                ("$out", 9.0),
                ("$merge", 9.0),
                ("$replaceroot", 9.0),
                ("$addfields", 9.0),
                ("$count", 8.0),
                ("$sum", 7.0),
                ("$avg", 7.0),
                ("$min", 7.0),
                ("$max", 7.0),
                ("find", 9.0),
                ("aggregate", 9.0),
                ("insert", 8.0),
                ("update", 8.0),
            ],
        ),
    ];
    table
        .into_iter()
        .map(|(format, words)| (format, words.iter().copied().collect()))
        .collect()
});

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$?[A-Za-z_][A-Za-z0-9_]*").unwrap());

// ============================================================================
// Detector
// ============================================================================

/// Maps raw query text to a format and a confidence
#[derive(Debug, Clone, Copy)]
pub struct FormatDetector {
    threshold: f64,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl FormatDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, text: &str) -> Detection {
        if text.trim().is_empty() {
            return FALLBACK;
        }
        if let Some(hit) = quick_check(text) {
            debug!(format = %hit.format, confidence = hit.confidence, "quick check matched");
            return hit;
        }
        let detection = self
            .candidates(text)
            .into_iter()
            .next()
            .unwrap_or(FALLBACK);
        debug!(format = %detection.format, confidence = detection.confidence, "detected format");
        detection
    }

    /// All formats with a non-zero combined score, best first.
    ///
    /// The quick check does not participate, so scores are comparable.
    pub fn detect_with_candidates(&self, text: &str) -> Vec<Detection> {
        if text.trim().is_empty() {
            return vec![FALLBACK];
        }
        let mut candidates = self.candidates(text);
        if let Some(hit) = quick_check(text) {
            candidates.retain(|c| c.format != hit.format);
            candidates.insert(0, hit);
        }
        if candidates.is_empty() {
            candidates.push(FALLBACK);
        }
        candidates
    }

    pub fn is_confident(&self, text: &str) -> bool {
        self.detect(text).confidence >= self.threshold
    }

    fn candidates(&self, text: &str) -> Vec<Detection> {
        let patterns = pattern_scores(text);
        let keywords = keyword_scores(text);
        let mut out: Vec<Detection> = QueryFormat::ALL
            .iter()
            .map(|format| {
                let p = patterns.get(format).copied().unwrap_or(0.0);
                let k = keywords.get(format).copied().unwrap_or(0.0);
                Detection {
                    format: *format,
                    confidence: PATTERN_WEIGHT * p + KEYWORD_WEIGHT * k,
                }
            })
            .filter(|d| d.confidence > 0.0)
            .collect();
        // stable: ties keep QueryFormat::ALL order
        out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out
    }
}

/// Convenience wrapper over a default detector
pub fn detect_query_format(text: &str) -> Detection {
    FormatDetector::default().detect(text)
}

fn quick_check(text: &str) -> Option<Detection> {
    QUICK_RULES
        .iter()
        .find(|rule| rule.regex.is_match(text))
        .map(|rule| Detection {
            format: rule.format,
            confidence: rule.confidence,
        })
}

/// Max matching pattern weight per format
fn pattern_scores(text: &str) -> HashMap<QueryFormat, f64> {
    STRUCTURAL_PATTERNS
        .iter()
        .filter_map(|(format, patterns)| {
            patterns
                .iter()
                .filter(|(re, _)| re.is_match(text))
                .map(|(_, w)| *w)
                .reduce(f64::max)
                .map(|score| (*format, score))
        })
        .collect()
}

/// Keyword scores normalized by the maximum raw score across formats
fn keyword_scores(text: &str) -> HashMap<QueryFormat, f64> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in WORD_RE.find_iter(text) {
        *counts.entry(word.as_str().to_ascii_lowercase()).or_default() += 1;
    }
    let raw: Vec<(QueryFormat, f64)> = KEYWORDS
        .iter()
        .map(|(format, weights)| {
            let score = counts
                .iter()
                .filter_map(|(word, n)| weights.get(word.as_str()).map(|w| w * *n as f64))
                .sum();
            (*format, score)
        })
        .collect();
    let max = raw.iter().map(|(_, s)| *s).fold(0.0, f64::max);
    if max <= 0.0 {
        return HashMap::new();
    }
    raw.into_iter().map(|(f, s)| (f, s / max)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("SELECT name FROM users WHERE age > 25", QueryFormat::Sql; "sql select")]
    #[test_case("INSERT INTO users (name) VALUES ('x')", QueryFormat::Sql; "sql insert")]
    #[test_case("MATCH (u:User)-[:FOLLOWS]->(v:User) RETURN u.name", QueryFormat::Cypher; "cypher")]
    #[test_case("PREFIX foaf: <http://xmlns.com/foaf/0.1/> SELECT ?name WHERE { ?p foaf:name ?name }", QueryFormat::Sparql; "sparql")]
    #[test_case("query GetUsers { users { name } }", QueryFormat::GraphQl; "graphql")]
    #[test_case("g.V().has('name', 'marko').out()", QueryFormat::Gremlin; "gremlin")]
    #[test_case("db.users.find({age: {$gt: 25}})", QueryFormat::MongoDb; "mongo find")]
    #[test_case("[{\"$match\": {\"age\": 1}}]", QueryFormat::MongoDb; "mongo pipeline")]
    #[test_case("$.users[?(@.age > 25)].name", QueryFormat::JsonPath; "jsonpath")]
    #[test_case("/users/user[age>18]/name", QueryFormat::XPath; "xpath")]
    fn test_quick_check(text: &str, expected: QueryFormat) {
        let detection = detect_query_format(text);
        assert_eq!(detection.format, expected);
        assert!(detection.confidence >= 0.85);
    }

    #[test]
    fn test_cypher_scenario() {
        let d = detect_query_format("MATCH (u:User)-[:FOLLOWS]->(v:User) RETURN u.name");
        assert_eq!(d.format, QueryFormat::Cypher);
        assert!(d.confidence >= 0.95);
    }

    #[test_case(""; "empty")]
    #[test_case("   \n\t"; "whitespace")]
    #[test_case("hello there"; "no signal")]
    fn test_fallback(text: &str) {
        assert_eq!(detect_query_format(text), FALLBACK);
    }

    #[test]
    fn test_scored_stages() {
        let d = detect_query_format("//users/user[@id]");
        assert_eq!(d.format, QueryFormat::XPath);
        assert!(d.confidence > 0.5);

        let d = detect_query_format("people[?age > `20`] | sort_by(@, &age)");
        assert_eq!(d.format, QueryFormat::JmesPath);
    }

    #[test]
    fn test_keyword_scores_normalize_to_one() {
        let scores = keyword_scores("select from where");
        let best = scores.values().copied().fold(0.0, f64::max);
        assert!((best - 1.0).abs() < f64::EPSILON);
        assert_eq!(scores[&QueryFormat::Sql], 1.0);
    }

    #[test]
    fn test_candidates_sorted() {
        let detector = FormatDetector::default();
        let candidates = detector.detect_with_candidates("MATCH (n) RETURN n");
        assert_eq!(candidates[0].format, QueryFormat::Cypher);
        assert!(candidates
            .windows(2)
            .skip(1)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_is_confident() {
        let detector = FormatDetector::default();
        assert!(detector.is_confident("SELECT * FROM t"));
        assert!(!detector.is_confident("hello"));
    }
}
