//! Pure predicate deciding whether a test config applies to this agent.
//!
//! Kept free of any I/O or shared state so it can be evaluated during
//! reconciliation without coordination, and unit-tested in isolation.

use crate::error::SelectorError;
use crate::model::SynTestConfig;

/// This agent's runtime identity, as resolved by bootstrap.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Kubernetes namespace this agent's pod runs in.
    pub namespace: String,
    /// Node name this agent's pod is scheduled on.
    pub node_name: String,
    /// Labels read from the pod-info label file.
    pub pod_labels: std::collections::HashMap<String, String>,
}

/// Returns whether `config` applies to `agent`.
///
/// 1. If `watch_own_namespace_only` and the config's namespace differs from
///    the agent's, it does not apply.
/// 2. If the config has a non-empty node selector that does not glob-match
///    the agent's node name, it does not apply.
/// 3. If the config has a non-empty pod-label selector, every key must be
///    present in the agent's pod labels with an equal value.
/// 4. Otherwise it applies.
///
/// Fails only if the node selector is a malformed glob (§7: "test is skipped
/// and logged; not fatal" — the caller decides what "skipped" means).
pub fn applies(
    config: &SynTestConfig,
    agent: &AgentIdentity,
    watch_own_namespace_only: bool,
) -> Result<bool, SelectorError> {
    if watch_own_namespace_only && config.namespace != agent.namespace {
        return Ok(false);
    }

    if !config.node_selector.is_empty() && !glob_match(&config.node_selector, &agent.node_name)? {
        return Ok(false);
    }

    if !config.pod_label_selector.is_empty() {
        for (k, v) in &config.pod_label_selector {
            match agent.pod_labels.get(k) {
                Some(actual) if actual == v => {}
                _ => return Ok(false),
            }
        }
    }

    Ok(true)
}

/// Shell-style glob match: `*`, `?`, and bracket character classes (`[abc]`,
/// negated with a leading `!` or `^`).
///
/// An empty pattern matches nothing by this function's contract; callers
/// treat an empty `node_selector` as "match everything" *before* calling
/// `glob_match`, per [`applies`]. Fails if `pattern` contains an unterminated
/// `[` character class.
pub fn glob_match(pattern: &str, text: &str) -> Result<bool, SelectorError> {
    let chars: Vec<char> = pattern.chars().collect();
    validate_glob(&chars, pattern)?;
    let text: Vec<char> = text.chars().collect();
    Ok(glob_match_rec(&chars, &text))
}

fn validate_glob(pattern: &[char], raw: &str) -> Result<(), SelectorError> {
    let mut i = 0;
    while i < pattern.len() {
        if pattern[i] == '[' && find_closing_bracket(&pattern[i..]).is_none() {
            return Err(SelectorError::InvalidGlob {
                pattern: raw.to_string(),
                reason: "unterminated '[' character class".to_string(),
            });
        }
        i += 1;
    }
    Ok(())
}

/// Given a slice starting at `[`, returns the index (within that slice) of
/// the matching `]`, or `None` if there isn't one. A `!`/`^` negation marker
/// and an immediately-following `]` are both treated as class members, not
/// terminators, matching shell-glob convention.
fn find_closing_bracket(pattern: &[char]) -> Option<usize> {
    let mut i = 1;
    if matches!(pattern.get(i), Some('!') | Some('^')) {
        i += 1;
    }
    if pattern.get(i) == Some(&']') {
        i += 1;
    }
    while i < pattern.len() {
        if pattern[i] == ']' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn glob_match_rec(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => {
            glob_match_rec(&pattern[1..], text)
                || (!text.is_empty() && glob_match_rec(pattern, &text[1..]))
        }
        Some('?') => !text.is_empty() && glob_match_rec(&pattern[1..], &text[1..]),
        Some('[') => {
            let close = find_closing_bracket(pattern).expect("pattern was validated by glob_match");
            if text.is_empty() {
                return false;
            }
            let body = &pattern[1..close];
            let (negate, members) = match body.first() {
                Some('!') | Some('^') => (true, &body[1..]),
                _ => (false, body),
            };
            let in_class = members.contains(&text[0]);
            (in_class != negate) && glob_match_rec(&pattern[close + 1..], &text[1..])
        }
        Some(c) => {
            !text.is_empty() && text[0] == *c && glob_match_rec(&pattern[1..], &text[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_config() -> SynTestConfig {
        SynTestConfig {
            name: "ping".into(),
            plugin_name: "ping-plugin".into(),
            namespace: "default".into(),
            node_selector: String::new(),
            pod_label_selector: HashMap::new(),
            plugin_restart_policy: "Always".into(),
            runtime: HashMap::new(),
        }
    }

    fn base_agent() -> AgentIdentity {
        AgentIdentity {
            namespace: "default".into(),
            node_name: "node-a7".into(),
            pod_labels: HashMap::new(),
        }
    }

    #[test]
    fn empty_node_selector_matches_any_node() {
        let cfg = base_config();
        assert!(applies(&cfg, &base_agent(), false).unwrap());
    }

    #[test]
    fn node_selector_glob_match() {
        let mut cfg = base_config();
        cfg.node_selector = "node-a*".into();
        assert!(applies(&cfg, &base_agent(), false).unwrap());

        cfg.node_selector = "node-b*".into();
        assert!(!applies(&cfg, &base_agent(), false).unwrap());
    }

    #[test]
    fn empty_pod_label_selector_matches() {
        let cfg = base_config();
        assert!(applies(&cfg, &base_agent(), false).unwrap());
    }

    #[test]
    fn pod_label_selector_requires_all_keys() {
        let mut cfg = base_config();
        cfg.pod_label_selector.insert("tier".into(), "edge".into());

        let mut agent = base_agent();
        assert!(!applies(&cfg, &agent, false).unwrap());

        agent.pod_labels.insert("tier".into(), "edge".into());
        assert!(applies(&cfg, &agent, false).unwrap());

        agent.pod_labels.insert("tier".into(), "core".into());
        assert!(!applies(&cfg, &agent, false).unwrap());
    }

    #[test]
    fn watch_own_namespace_only_rejects_foreign_namespace() {
        let mut cfg = base_config();
        cfg.namespace = "other-ns".into();
        assert!(!applies(&cfg, &base_agent(), true).unwrap());
        assert!(applies(&cfg, &base_agent(), false).unwrap());
    }

    #[test]
    fn malformed_node_selector_is_reported_not_panicked() {
        let mut cfg = base_config();
        cfg.node_selector = "node-[a7".into();
        assert!(matches!(
            applies(&cfg, &base_agent(), false),
            Err(SelectorError::InvalidGlob { .. })
        ));
    }

    #[test]
    fn glob_match_wildcards() {
        assert!(glob_match("*", "anything").unwrap());
        assert!(glob_match("node-?7", "node-a7").unwrap());
        assert!(!glob_match("node-?7", "node-77x").unwrap());
        assert!(glob_match("exact", "exact").unwrap());
        assert!(!glob_match("exact", "exacter").unwrap());
    }

    #[test]
    fn glob_match_bracket_class() {
        assert!(glob_match("node-[ab]7", "node-a7").unwrap());
        assert!(glob_match("node-[ab]7", "node-b7").unwrap());
        assert!(!glob_match("node-[ab]7", "node-c7").unwrap());
        assert!(glob_match("node-[!ab]7", "node-c7").unwrap());
        assert!(!glob_match("node-[!ab]7", "node-a7").unwrap());
    }

    #[test]
    fn glob_match_rejects_unterminated_bracket() {
        assert!(matches!(
            glob_match("node-[a7", "node-a7"),
            Err(SelectorError::InvalidGlob { .. })
        ));
    }
}
