//! Keyword → target image policy.
//!
//! A policy is an ordered list of rules. A deployment is governed by the first
//! rule whose keyword is a case-insensitive substring of its name.
//!
//! YAML forms accepted by [`Policy::from_yaml`]:
//! - `rules: [{keyword: nginx, image: repo/nginx:2.0}, ...]`
//! - a bare sequence of the same rule objects
//! - an ordered mapping `nginx: repo/nginx:2.0` (declared order is kept)

use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

/// 1 MiB.
const DEFAULT_MAX_POLICY_BYTES: usize = 1 << 20;

fn max_policy_bytes() -> usize {
    policy_limit(std::env::var("REKON_MAX_POLICY_BYTES").ok().as_deref())
}

fn policy_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok()).unwrap_or(DEFAULT_MAX_POLICY_BYTES)
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("reading policy file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("policy too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("parsing policy YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported policy layout: {0}")]
    Layout(String),
    #[error("rule {index}: empty keyword")]
    EmptyKeyword { index: usize },
    #[error("rule {index} ({keyword}): empty image")]
    EmptyImage { index: usize, keyword: String },
    #[error("rule {index}: keyword '{keyword}' duplicates rule {first}")]
    DuplicateKeyword { index: usize, first: usize, keyword: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PolicyRule {
    pub keyword: String,
    pub image: String,
    #[serde(skip)]
    needle: String,
}

impl PolicyRule {
    pub fn new(keyword: impl Into<String>, image: impl Into<String>) -> Self {
        let keyword = keyword.into().trim().to_string();
        let image = image.into().trim().to_string();
        let needle = keyword.to_lowercase();
        Self { keyword, image, needle }
    }

    /// Case-insensitive substring match against a deployment name.
    pub fn matches(&self, deployment_name: &str) -> bool {
        deployment_name.to_lowercase().contains(&self.needle)
    }
}

#[derive(Deserialize)]
struct RawRule {
    keyword: String,
    image: String,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct Policy {
    rules: Vec<PolicyRule>,
}

impl Policy {
    /// Build a validated policy from rules in precedence order.
    pub fn new(rules: Vec<PolicyRule>) -> Result<Self, PolicyError> {
        let me = Self { rules };
        me.validate()?;
        Ok(me)
    }

    /// Convenience for `(keyword, image)` pairs.
    pub fn from_pairs<K, I>(pairs: impl IntoIterator<Item = (K, I)>) -> Result<Self, PolicyError>
    where
        K: Into<String>,
        I: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, i)| PolicyRule::new(k, i)).collect())
    }

    pub fn rules(&self) -> &[PolicyRule] { &self.rules }
    pub fn len(&self) -> usize { self.rules.len() }
    pub fn is_empty(&self) -> bool { self.rules.is_empty() }

    /// First rule matching `deployment_name`, in declared order.
    pub fn first_match(&self, deployment_name: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.matches(deployment_name))
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| PolicyError::Read { path: path.display().to_string(), source })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        Self::from_yaml_capped(yaml, max_policy_bytes())
    }

    fn from_yaml_capped(yaml: &str, max: usize) -> Result<Self, PolicyError> {
        if yaml.len() > max {
            return Err(PolicyError::TooLarge(max));
        }
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: Yaml = serde_yaml::from_str(yaml)?;
        let rules = match doc {
            Yaml::Null => Vec::new(),
            Yaml::Sequence(seq) => rules_from_seq(seq)?,
            Yaml::Mapping(map) => {
                let list_form = match map.get("rules") {
                    Some(Yaml::Sequence(seq)) if map.len() == 1 => Some(seq.clone()),
                    Some(Yaml::Null) if map.len() == 1 => Some(Vec::new()),
                    _ => None,
                };
                match list_form {
                    Some(seq) => rules_from_seq(seq)?,
                    None => rules_from_map(map)?,
                }
            }
            other => return Err(PolicyError::Layout(format!("expected mapping or sequence, got {}", yaml_kind(&other)))),
        };
        Self::new(rules)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        let mut seen: Vec<(usize, &str)> = Vec::with_capacity(self.rules.len());
        for (index, r) in self.rules.iter().enumerate() {
            if r.keyword.is_empty() {
                return Err(PolicyError::EmptyKeyword { index });
            }
            if r.image.is_empty() {
                return Err(PolicyError::EmptyImage { index, keyword: r.keyword.clone() });
            }
            if let Some((first, _)) = seen.iter().find(|(_, n)| *n == r.needle) {
                return Err(PolicyError::DuplicateKeyword { index, first: *first, keyword: r.keyword.clone() });
            }
            seen.push((index, r.needle.as_str()));
        }
        Ok(())
    }
}

fn rules_from_seq(seq: serde_yaml::Sequence) -> Result<Vec<PolicyRule>, PolicyError> {
    seq.into_iter()
        .map(|v| {
            let raw: RawRule = serde_yaml::from_value(v)?;
            Ok(PolicyRule::new(raw.keyword, raw.image))
        })
        .collect()
}

fn rules_from_map(map: serde_yaml::Mapping) -> Result<Vec<PolicyRule>, PolicyError> {
    let mut out = Vec::with_capacity(map.len());
    for (k, v) in map {
        let keyword = scalar_string(&k).ok_or_else(|| PolicyError::Layout(format!("keyword must be a scalar, got {}", yaml_kind(&k))))?;
        let image = match &v {
            Yaml::String(s) => s.clone(),
            other => return Err(PolicyError::Layout(format!("image for '{}' must be a string, got {}", keyword, yaml_kind(other)))),
        };
        out.push(PolicyRule::new(keyword, image));
    }
    Ok(out)
}

fn scalar_string(v: &Yaml) -> Option<String> {
    match v {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_kind(v: &Yaml) -> &'static str {
    match v {
        Yaml::Null => "null",
        Yaml::Bool(_) => "bool",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "sequence",
        Yaml::Mapping(_) => "mapping",
        Yaml::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(p: &Policy) -> Vec<&str> { p.rules().iter().map(|r| r.keyword.as_str()).collect() }

    #[test]
    fn mapping_form_keeps_declared_order() {
        let y = "nginx: ams.ocir.io/oabcs1/vivesisi/nginx:latest\nredis: redis:7.2.4\napi: ams.ocir.io/oabcs1/vivesisi/api:2.1\n";
        let p = Policy::from_yaml(y).unwrap();
        assert_eq!(keywords(&p), vec!["nginx", "redis", "api"]);
        assert_eq!(p.rules()[1].image, "redis:7.2.4");
    }

    #[test]
    fn rules_list_form_and_bare_sequence_agree() {
        let a = Policy::from_yaml("rules:\n  - keyword: web\n    image: repo/web:3\n  - keyword: db\n    image: repo/db:1\n").unwrap();
        let b = Policy::from_yaml("- keyword: web\n  image: repo/web:3\n- keyword: db\n  image: repo/db:1\n").unwrap();
        assert_eq!(a, b);
        assert_eq!(keywords(&a), vec!["web", "db"]);
    }

    #[test]
    fn empty_documents_yield_empty_policy() {
        assert!(Policy::from_yaml("").unwrap().is_empty());
        assert!(Policy::from_yaml("rules: []\n").unwrap().is_empty());
        assert!(Policy::from_yaml("rules:\n").unwrap().is_empty());
    }

    #[test]
    fn rejects_duplicates_and_empties() {
        let e = Policy::from_pairs([("nginx", "a:1"), ("NGINX", "b:2")]).unwrap_err();
        assert!(matches!(e, PolicyError::DuplicateKeyword { index: 1, first: 0, .. }), "e={e}");
        let e = Policy::from_pairs([("  ", "a:1")]).unwrap_err();
        assert!(matches!(e, PolicyError::EmptyKeyword { index: 0 }));
        let e = Policy::from_pairs([("x", "")]).unwrap_err();
        assert!(matches!(e, PolicyError::EmptyImage { index: 0, .. }));
    }

    #[test]
    fn rejects_scalar_document_and_non_string_image() {
        let e = Policy::from_yaml("just-a-string").unwrap_err().to_string();
        assert!(e.contains("expected mapping or sequence"), "e={e}");
        let e = Policy::from_yaml("nginx: [1, 2]\n").unwrap_err().to_string();
        assert!(e.contains("must be a string"), "e={e}");
    }

    fn padded_policy(len: usize) -> String {
        let mut y = String::from("nginx: repo/nginx:2.0\n#");
        y.push_str(&"x".repeat(len - y.len() - 1));
        y.push('\n');
        assert_eq!(y.len(), len);
        y
    }

    #[test]
    fn size_cap_is_one_mebibyte() {
        assert_eq!(DEFAULT_MAX_POLICY_BYTES, 1_048_576);
        let p = Policy::from_yaml_capped(&padded_policy(1_000_102), DEFAULT_MAX_POLICY_BYTES).unwrap();
        assert_eq!(keywords(&p), vec!["nginx"]);
        assert!(Policy::from_yaml_capped(&padded_policy(DEFAULT_MAX_POLICY_BYTES), DEFAULT_MAX_POLICY_BYTES).is_ok());
        let e = Policy::from_yaml_capped(&padded_policy(DEFAULT_MAX_POLICY_BYTES + 1), DEFAULT_MAX_POLICY_BYTES).unwrap_err();
        assert!(matches!(e, PolicyError::TooLarge(1_048_576)), "e={e}");
    }

    #[test]
    fn size_cap_override_parses_or_falls_back() {
        assert_eq!(policy_limit(None), DEFAULT_MAX_POLICY_BYTES);
        assert_eq!(policy_limit(Some(" 64 ")), 64);
        assert_eq!(policy_limit(Some("lots")), DEFAULT_MAX_POLICY_BYTES);
        let e = Policy::from_yaml_capped(&padded_policy(65), policy_limit(Some("64"))).unwrap_err();
        assert!(matches!(e, PolicyError::TooLarge(64)));
    }

    #[test]
    fn matching_is_case_insensitive_and_first_wins() {
        let p = Policy::from_pairs([("API", "repo/api:2"), ("web", "repo/web:1")]).unwrap();
        assert_eq!(p.first_match("public-Api-Web").map(|r| r.keyword.as_str()), Some("API"));
        assert_eq!(p.first_match("frontend-web").map(|r| r.keyword.as_str()), Some("web"));
        assert!(p.first_match("worker").is_none());
    }
}
