// ABOUTME: Secret providers and placeholder resolution for task payloads
// ABOUTME: Replaces {{ secrets.KEY }} markers in task configs with values from a provider

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Source of credentials injected into task payloads.
pub trait SecretsProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Provider that knows no secrets. Any placeholder fails to resolve.
#[derive(Debug, Default, Clone)]
pub struct NoSecrets;

impl SecretsProvider for NoSecrets {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Fixed key/value secrets, typically from the config file.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl SecretsProvider for StaticSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Reads `<prefix><KEY>` from the process environment.
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl SecretsProvider for EnvSecrets {
    fn get(&self, key: &str) -> Option<String> {
        let name = format!("{}{}", self.prefix, key.replace(['.', '-'], "_"));
        std::env::var(name).ok()
    }
}

/// Tries each provider in order.
pub struct ChainedSecrets {
    providers: Vec<Box<dyn SecretsProvider>>,
}

impl ChainedSecrets {
    pub fn new(providers: Vec<Box<dyn SecretsProvider>>) -> Self {
        Self { providers }
    }
}

impl SecretsProvider for ChainedSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.providers.iter().find_map(|p| p.get(key))
    }
}

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*secrets\.([A-Za-z0-9_.\-]+)\s*\}\}").expect("PLACEHOLDER is valid")
    })
}

/// Resolve every secret placeholder in `value`, recursing through mappings
/// and sequences. Returns the first key the provider could not resolve.
pub fn resolve_placeholders(
    value: &serde_yaml::Value,
    provider: &dyn SecretsProvider,
) -> Result<serde_yaml::Value, String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => resolve_str(s, provider).map(Value::String),
        Value::Sequence(items) => items
            .iter()
            .map(|item| resolve_placeholders(item, provider))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Value::Mapping(mapping) => {
            let mut resolved = serde_yaml::Mapping::with_capacity(mapping.len());
            for (key, item) in mapping {
                resolved.insert(key.clone(), resolve_placeholders(item, provider)?);
            }
            Ok(Value::Mapping(resolved))
        }
        Value::Tagged(tagged) => {
            let mut tagged = tagged.as_ref().clone();
            tagged.value = resolve_placeholders(&tagged.value, provider)?;
            Ok(Value::Tagged(Box::new(tagged)))
        }
        other => Ok(other.clone()),
    }
}

/// Values of every secret referenced by `value`, for scrubbing diagnostics.
pub fn referenced_values(value: &serde_yaml::Value, provider: &dyn SecretsProvider) -> Vec<String> {
    use serde_yaml::Value;

    let mut found = Vec::new();
    let mut pending = vec![value];
    while let Some(current) = pending.pop() {
        match current {
            Value::String(s) => {
                for caps in placeholder().captures_iter(s) {
                    if let Some(secret) = provider.get(&caps[1]) {
                        if !secret.is_empty() && !found.contains(&secret) {
                            found.push(secret);
                        }
                    }
                }
            }
            Value::Sequence(items) => pending.extend(items.iter()),
            Value::Mapping(mapping) => pending.extend(mapping.values()),
            Value::Tagged(tagged) => pending.push(&tagged.value),
            _ => {}
        }
    }
    // Longest first, so a secret containing another is masked whole.
    found.sort_by(|a, b| b.len().cmp(&a.len()));
    found
}

/// Mask each secret value occurring in `text`.
pub fn redact(text: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
}

pub const REDACTED: &str = "***";

fn resolve_str(input: &str, provider: &dyn SecretsProvider) -> Result<String, String> {
    let mut missing: Option<String> = None;
    let output = placeholder().replace_all(input, |caps: &Captures| {
        let key = &caps[1];
        match provider.get(key) {
            Some(secret) => secret,
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(key) => Err(key),
        None => Ok(output.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticSecrets {
        let mut values = HashMap::new();
        values.insert("API_TOKEN".to_string(), "s3cr3t".to_string());
        values.insert("db.password".to_string(), "hunter2".to_string());
        StaticSecrets::new(values)
    }

    #[test]
    fn test_resolves_nested_placeholders() {
        let config: serde_yaml::Value = serde_yaml::from_str(
            r#"
url: https://example.com
headers:
  Authorization: "Bearer {{ secrets.API_TOKEN }}"
args: ["--password={{secrets.db.password}}", 3]
"#,
        )
        .unwrap();

        let resolved = resolve_placeholders(&config, &provider()).unwrap();
        assert_eq!(
            resolved["headers"]["Authorization"].as_str(),
            Some("Bearer s3cr3t")
        );
        assert_eq!(resolved["args"][0].as_str(), Some("--password=hunter2"));
        assert_eq!(resolved["args"][1].as_i64(), Some(3));
        assert_eq!(resolved["url"].as_str(), Some("https://example.com"));
    }

    #[test]
    fn test_reports_unresolved_key() {
        let config = serde_yaml::Value::String("{{ secrets.MISSING }}".to_string());
        assert_eq!(
            resolve_placeholders(&config, &provider()),
            Err("MISSING".to_string())
        );
        assert_eq!(
            resolve_placeholders(&config, &NoSecrets),
            Err("MISSING".to_string())
        );
    }

    #[test]
    fn test_referenced_values_and_redaction() {
        let config: serde_yaml::Value = serde_yaml::from_str(
            r#"
url: "https://example.com/?token={{ secrets.API_TOKEN }}"
args: ["{{ secrets.db.password }}", "{{ secrets.UNKNOWN }}", "plain"]
"#,
        )
        .unwrap();

        let mut values = referenced_values(&config, &provider());
        values.sort();
        assert_eq!(values, vec!["hunter2", "s3cr3t"]);

        assert_eq!(
            redact("GET https://example.com/?token=s3cr3t failed", &values),
            "GET https://example.com/?token=*** failed"
        );
        assert_eq!(redact("nothing here", &values), "nothing here");
    }

    #[test]
    fn test_chained_and_env_providers() {
        std::env::set_var("CADENCE_TEST_SECRET_DEPLOY_KEY", "from-env");
        let chained = ChainedSecrets::new(vec![
            Box::new(provider()),
            Box::new(EnvSecrets::new("CADENCE_TEST_SECRET_")),
        ]);

        assert_eq!(chained.get("API_TOKEN").as_deref(), Some("s3cr3t"));
        assert_eq!(chained.get("deploy.key"), None);
        assert_eq!(chained.get("DEPLOY_KEY").as_deref(), Some("from-env"));
    }
}
