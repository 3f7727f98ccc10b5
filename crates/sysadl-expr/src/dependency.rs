use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;

/// Comparison operators, longest first so `>=` is never read as `>`.
const COMPARISON_OPERATORS: [&str; 8] = ["===", "!==", "==", "!=", ">=", "<=", ">", "<"];

fn literal_regex() -> &'static Regex {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    LITERAL.get_or_init(|| {
        Regex::new(r#"^(?:'[^']*'|"[^"]*"|-?\d+(?:\.\d+)?|true|false|null|undefined)$"#)
            .expect("literal regex must compile")
    })
}

fn path_regex() -> &'static Regex {
    static PATH: OnceLock<Regex> = OnceLock::new();
    PATH.get_or_init(|| {
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(?:\.[A-Za-z_$][A-Za-z0-9_$]*)*")
            .expect("path regex must compile")
    })
}

fn valid_dependency_regex() -> &'static Regex {
    static VALID: OnceLock<Regex> = OnceLock::new();
    VALID.get_or_init(|| {
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(?:\.[A-Za-z_$][A-Za-z0-9_$]*)*$")
            .expect("dependency regex must compile")
    })
}

pub fn is_valid_dependency(path: &str) -> bool {
    valid_dependency_regex().is_match(path)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyTrackerStatistics {
    pub cached_expressions: usize,
    pub cache_hits: u64,
    pub parse_count: u64,
}

/// Extracts the state paths an expression reads. `&&` and `||` are split with
/// equal precedence, left to right; the result is a union so precedence never
/// changes the dependency set.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    cache: Mutex<HashMap<String, Vec<String>>>,
    stats: Mutex<DependencyTrackerStatistics>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract_dependencies(&self, expression: &str) -> Vec<String> {
        if let Some(cached) = self.cache.lock().get(expression) {
            self.stats.lock().cache_hits += 1;
            return cached.clone();
        }

        self.stats.lock().parse_count += 1;
        let dependencies = match self.extract_uncached(expression) {
            Ok(dependencies) => dependencies,
            Err(detail) => {
                tracing::warn!(expression, error = %detail, "dependency extraction failed");
                Vec::new()
            }
        };

        let mut cache = self.cache.lock();
        cache.insert(expression.to_string(), dependencies.clone());
        self.stats.lock().cached_expressions = cache.len();
        dependencies
    }

    pub fn statistics(&self) -> DependencyTrackerStatistics {
        *self.stats.lock()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        self.stats.lock().cached_expressions = 0;
    }

    fn extract_uncached(&self, expression: &str) -> Result<Vec<String>, String> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let parts = split_by_logical_operators(trimmed)?;
        if parts.len() > 1 {
            let mut dependencies = Vec::new();
            for part in parts {
                union_into(&mut dependencies, self.extract_dependencies(part));
            }
            return Ok(dependencies);
        }

        let unwrapped = strip_enclosing_parens(trimmed);
        if unwrapped != trimmed {
            return Ok(self.extract_dependencies(unwrapped));
        }

        if let Some(negated) = trimmed.strip_prefix('!') {
            if !negated.starts_with('=') {
                return Ok(self.extract_dependencies(negated));
            }
        }

        if let Some((left, right)) = split_on_comparison(trimmed) {
            let mut dependencies = Vec::new();
            union_into(&mut dependencies, extract_property_path(left));
            union_into(&mut dependencies, extract_property_path(right));
            return Ok(dependencies);
        }

        Ok(extract_property_path(trimmed).into_iter().collect())
    }
}

fn union_into(target: &mut Vec<String>, additions: impl IntoIterator<Item = String>) {
    for dependency in additions {
        if !target.contains(&dependency) {
            target.push(dependency);
        }
    }
}

/// Splits on `&&`/`||` at parenthesis depth zero, outside string literals.
fn split_by_logical_operators(expression: &str) -> Result<Vec<&str>, String> {
    let bytes = expression.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut index = 0usize;

    while index < bytes.len() {
        let byte = bytes[index];
        if let Some(open) = quote {
            if byte == b'\\' {
                index += 2;
                continue;
            }
            if byte == open {
                quote = None;
            }
            index += 1;
            continue;
        }

        match byte {
            b'\'' | b'"' => quote = Some(byte),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unbalanced ')' at offset {}", index));
                }
            }
            b'&' | b'|' if depth == 0 && bytes.get(index + 1) == Some(&byte) => {
                parts.push(expression[start..index].trim());
                index += 2;
                start = index;
                continue;
            }
            _ => {}
        }
        index += 1;
    }

    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }

    parts.push(expression[start..].trim());
    Ok(parts.into_iter().filter(|part| !part.is_empty()).collect())
}

/// Removes one pair of parentheses when it wraps the whole expression.
fn strip_enclosing_parens(expression: &str) -> &str {
    let trimmed = expression.trim();
    if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
        return trimmed;
    }
    let mut depth = 0i32;
    for (index, ch) in trimmed.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && index != trimmed.len() - 1 {
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    trimmed[1..trimmed.len() - 1].trim()
}

fn split_on_comparison(expression: &str) -> Option<(&str, &str)> {
    COMPARISON_OPERATORS.iter().find_map(|operator| {
        expression
            .find(operator)
            .map(|offset| (&expression[..offset], &expression[offset + operator.len()..]))
    })
}

fn extract_property_path(side: &str) -> Option<String> {
    let mut candidate = side.trim();
    loop {
        let stripped = strip_enclosing_parens(candidate);
        if stripped == candidate {
            break;
        }
        candidate = stripped;
    }
    if candidate.is_empty() || literal_regex().is_match(candidate) {
        return None;
    }

    let matched = path_regex().find(candidate)?;
    let path = matched.as_str();
    if candidate[matched.end()..].trim_start().starts_with('(') {
        return None;
    }
    if matches!(path, "true" | "false" | "null" | "undefined") {
        return None;
    }
    Some(path.to_string())
}

#[cfg(test)]
mod dependency_tests {
    use super::*;

    #[test]
    fn comparison_of_two_paths() {
        let tracker = DependencyTracker::new();
        assert_eq!(tracker.extract_dependencies("a.b == c.d"), vec!["a.b", "c.d"]);
    }

    #[test]
    fn literals_are_excluded_across_logical_operators() {
        let tracker = DependencyTracker::new();
        assert_eq!(
            tracker.extract_dependencies("x > 5 && y.z == true"),
            vec!["x", "y.z"]
        );
        assert_eq!(
            tracker.extract_dependencies("mode == 'auto' || mode == \"manual\""),
            vec!["mode"]
        );
    }

    #[test]
    fn dependencies_are_deduplicated_in_order() {
        let tracker = DependencyTracker::new();
        assert_eq!(
            tracker.extract_dependencies("b.x > 1 && a.y < 2 && b.x != 0"),
            vec!["b.x", "a.y"]
        );
    }

    #[test]
    fn negation_and_parentheses() {
        let tracker = DependencyTracker::new();
        assert_eq!(tracker.extract_dependencies("!door.open"), vec!["door.open"]);
        assert_eq!(
            tracker.extract_dependencies("(a.ready && (b.count >= 3)) || !c"),
            vec!["a.ready", "b.count", "c"]
        );
    }

    #[test]
    fn operators_inside_strings_do_not_split() {
        let tracker = DependencyTracker::new();
        assert_eq!(
            tracker.extract_dependencies("label == 'a && b'"),
            vec!["label"]
        );
    }

    #[test]
    fn function_calls_and_pure_literals_yield_nothing() {
        let tracker = DependencyTracker::new();
        assert!(tracker.extract_dependencies("now() > 5").is_empty());
        assert!(tracker.extract_dependencies("42").is_empty());
        assert!(tracker.extract_dependencies("'text'").is_empty());
        assert!(tracker.extract_dependencies("").is_empty());
    }

    #[test]
    fn bare_path_is_its_own_dependency() {
        let tracker = DependencyTracker::new();
        assert_eq!(tracker.extract_dependencies("door.open"), vec!["door.open"]);
        assert_eq!(tracker.extract_dependencies("  ready "), vec!["ready"]);
    }

    #[test]
    fn malformed_expressions_return_empty() {
        let tracker = DependencyTracker::new();
        assert!(tracker.extract_dependencies("(a && b").is_empty());
    }

    #[test]
    fn cache_prevents_reparsing() {
        let tracker = DependencyTracker::new();
        let first = tracker.extract_dependencies("sensor.temp >= 30");
        let parses = tracker.statistics().parse_count;
        let second = tracker.extract_dependencies("sensor.temp >= 30");
        assert_eq!(first, second);
        assert_eq!(tracker.statistics().parse_count, parses);
        assert_eq!(tracker.statistics().cache_hits, 1);

        tracker.clear_cache();
        tracker.extract_dependencies("sensor.temp >= 30");
        assert_eq!(tracker.statistics().parse_count, parses + 1);
    }

    #[test]
    fn validates_dependency_syntax() {
        assert!(is_valid_dependency("vehicle.location.x"));
        assert!(is_valid_dependency("_private"));
        assert!(!is_valid_dependency("vehicle..x"));
        assert!(!is_valid_dependency("1abc"));
        assert!(!is_valid_dependency("a.b("));
    }
}
