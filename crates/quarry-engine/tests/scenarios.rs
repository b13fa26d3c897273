//! End-to-end runs through the converter: text in, results out.

use quarry_core::{
    CancellationToken, ConversionMode, ErrorKind, JsonNode, OptimizationLevel, QueryOptions, ResultShape,
};
use quarry_engine::Converter;
use quarry_syntax::{detect_query_format, QueryFormat};
use serde_json::{json, Value};
use test_case::test_case;

fn users() -> JsonNode {
    JsonNode::from_native(json!({"users": [
        {"name": "Alice", "age": 30, "city": "NYC"},
        {"name": "Bob", "age": 25, "city": "LDN"},
        {"name": "Charlie", "age": 35, "city": "TYO"}
    ]}))
}

fn run(text: &str, data: Value) -> quarry_core::ExecutionResult {
    let converter = Converter::default();
    let mut data = JsonNode::from_native(data);
    converter.execute(text, &mut data, &converter.options())
}

#[test]
fn test_filter_and_order() {
    let converter = Converter::default();
    let mut data = users();
    let result = converter.execute(
        "SELECT name FROM users WHERE age > 25 ORDER BY age ASC",
        &mut data,
        &converter.options(),
    );
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.shape, ResultShape::Rows);
    assert_eq!(result.data, json!([{"name": "Alice"}, {"name": "Charlie"}]));
    assert_eq!(result.affected_count, 2);
    assert_eq!(result.metadata["format"], json!("sql"));
}

#[test]
fn test_limit_offset_metadata() {
    let converter = Converter::default();
    let mut data = users();
    let result = converter.execute("SELECT * FROM users LIMIT 2 OFFSET 1", &mut data, &converter.options());
    let names: Vec<&str> = result
        .data
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Bob", "Charlie"]);
    assert_eq!(result.metadata["limit"], json!(2));
    assert_eq!(result.metadata["offset"], json!(1));
}

#[test]
fn test_convert_sql_to_xpath() {
    let converter = Converter::default();
    let xpath = converter
        .convert(
            "SELECT name FROM users WHERE age>18",
            Some(QueryFormat::Sql),
            QueryFormat::XPath,
            &converter.options(),
        )
        .unwrap();
    assert_eq!(xpath, "//users/user[age>18]/name");

    // both forms select the same rows
    let from_sql = run("SELECT name FROM users WHERE age>18", users().into_inner());
    let from_xpath = {
        let mut data = users();
        converter.execute(&xpath, &mut data, &converter.options().with_format("xpath"))
    };
    assert_eq!(from_sql.data, from_xpath.data);
}

#[test]
fn test_cypher_detection_confidence() {
    let detection = detect_query_format("MATCH (u:User)-[:FOLLOWS]->(v:User) RETURN u.name");
    assert_eq!(detection.format, QueryFormat::Cypher);
    assert!(detection.confidence >= 0.95, "confidence {}", detection.confidence);
}

#[test]
fn test_flexible_sum_skips_nulls_and_junk() {
    let converter = Converter::default();
    let mut data = JsonNode::from_native(json!({"orders": [
        {"price": 10}, {"price": "20"}, {"price": null}, {"price": "bad"}
    ]}));
    let options = converter.options().with_mode(ConversionMode::Flexible);
    let result = converter.execute("SELECT SUM(price) FROM orders", &mut data, &options);
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.data, json!({"sum": 30}));
}

#[test]
fn test_strict_sum_rejects_non_numbers() {
    let converter = Converter::default();
    let mut data = JsonNode::from_native(json!({"orders": [
        {"price": 10}, {"price": "20"}, {"price": null}, {"price": "bad"}
    ]}));
    let options = converter.options().with_mode(ConversionMode::Strict);
    let result = converter.execute("SELECT SUM(price) FROM orders", &mut data, &options);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Type));
}

#[test]
fn test_group_by_having() {
    let result = run(
        "SELECT dept, COUNT(*) FROM staff GROUP BY dept HAVING COUNT(*)>1",
        json!({"staff": [{"dept": "A"}, {"dept": "A"}, {"dept": "B"}]}),
    );
    assert_eq!(result.data, json!([{"dept": "A", "count": 2}]));
}

#[test]
fn test_repeated_execution_is_coherent() {
    let converter = Converter::default();
    let mut data = users();
    let text = "SELECT name, city FROM users WHERE age >= 30 ORDER BY name DESC";
    let first = converter.execute(text, &mut data, &converter.options());
    let second = converter.execute(text, &mut data, &converter.options());
    assert_eq!(first.data, second.data);
    assert_eq!(first.metadata["plan_fingerprint"], second.metadata["plan_fingerprint"]);
    assert_eq!(converter.cache_stats().map(|s| s.hits), Some(1));
}

#[test_case(OptimizationLevel::None ; "none")]
#[test_case(OptimizationLevel::Basic ; "basic")]
#[test_case(OptimizationLevel::Standard ; "standard")]
#[test_case(OptimizationLevel::Aggressive ; "aggressive")]
fn test_levels_agree_on_results(level: OptimizationLevel) {
    let converter = Converter::default();
    let mut data = JsonNode::from_native(json!({
        "users": [{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}],
        "orders": [{"user_id": 1, "total": 5}, {"user_id": 1, "total": 7}, {"user_id": 2, "total": 3}]
    }));
    converter.analyze(&data);
    let options = converter.options().with_optimization(level);
    let result = converter.execute(
        "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id WHERE o.total > 4 ORDER BY o.total",
        &mut data,
        &options,
    );
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.data, json!([{"name": "Alice", "total": 5}, {"name": "Alice", "total": 7}]));
}

#[test]
fn test_writes_then_reads() {
    let converter = Converter::default();
    let mut data = users();
    let options = converter.options();

    let inserted = converter.execute("INSERT INTO users (name, age, city) VALUES ('Dana', 41, 'SYD')", &mut data, &options);
    assert_eq!(inserted.affected_count, 1);
    let updated = converter.execute("UPDATE users SET age = age + 1 WHERE city = 'NYC'", &mut data, &options);
    assert_eq!(updated.affected_count, 1);
    let deleted = converter.execute("DELETE FROM users WHERE age < 30", &mut data, &options);
    assert_eq!(deleted.affected_count, 1);

    let result = converter.execute("SELECT name, age FROM users ORDER BY age", &mut data, &options);
    assert_eq!(
        result.data,
        json!([{"name": "Alice", "age": 31}, {"name": "Charlie", "age": 35}, {"name": "Dana", "age": 41}])
    );
}

#[test]
fn test_cypher_over_graph_data() {
    let result = run(
        "MATCH (u:Person)-[:FOLLOWS]->(v:Person) WHERE u.name = 'Alice' RETURN v.name",
        json!({
            "nodes": [
                {"id": 1, "label": "Person", "name": "Alice"},
                {"id": 2, "label": "Person", "name": "Bob"},
                {"id": 3, "label": "Person", "name": "Carol"}
            ],
            "edges": [
                {"id": 1, "from": 1, "to": 2, "label": "FOLLOWS"},
                {"id": 2, "from": 2, "to": 3, "label": "FOLLOWS"}
            ]
        }),
    );
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.metadata["format"], json!("cypher"));
    assert_eq!(result.data, json!([{"v.name": "Bob"}]));
}

#[test]
fn test_lenient_parse_keeps_going_with_warnings() {
    let converter = Converter::default();
    let mut data = users();

    let strict = converter.options().with_format("xpath").with_mode(ConversionMode::Strict);
    let rejected = converter.execute("/users/name[1]", &mut data, &strict);
    assert!(!rejected.success);

    let lenient = converter.options().with_format("xpath").with_mode(ConversionMode::Lenient);
    let result = converter.execute("/users/name[1]", &mut data, &lenient);
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.metadata["warnings"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_cancelled_before_start() {
    let converter = Converter::default();
    let mut data = users();
    let token = CancellationToken::new();
    token.cancel();
    let options = converter.options().with_cancellation(token);
    let result = converter.execute("SELECT name FROM users", &mut data, &options);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
}

#[test]
fn test_result_limit_caps_rows() {
    let converter = Converter::default();
    let mut data = users();
    let options = converter.options().with_limit(1);
    let result = converter.execute("SELECT name FROM users ORDER BY name", &mut data, &options);
    assert_eq!(result.data, json!([{"name": "Alice"}]));
}

#[test]
fn test_unparseable_text_fails_on_result() {
    let result = run("SELECT FROM WHERE", users().into_inner());
    assert!(!result.success);
    assert!(result.error_kind.is_some());
    assert!(result.error_message.is_some());
}
