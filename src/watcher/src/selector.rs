//! Container selection from configuration and labels.
//!
//! Labels are read from two namespaces: the canonical
//! `com.centurylinklabs.watchtower.*` grammar existing deployments already
//! carry, and the product's own `ing.wik.watchz.*`. When both are present
//! the canonical one wins.
//!
//! Recognized labels (under either namespace):
//! - `enable` - opt a container in (`label_enable` mode) or out
//! - `monitor-only` - detect drift but never mutate this container
//! - `no-pull` - recreate from the local image without pulling
//! - `scope` - partition containers between coexisting watcher instances
//! - `stop-signal` - signal the engine sends when stopping this container

use std::collections::HashMap;

use watchz_core::WatchConfig;
use watchz_engine::Container;

/// Canonical label namespace shared with existing watcher daemons.
pub const NAMESPACE_CANONICAL: &str = "com.centurylinklabs.watchtower";

/// Product label namespace.
pub const NAMESPACE_PRODUCT: &str = "ing.wik.watchz";

/// How a container participates in a scan tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// In scope at all; nothing below matters when false.
    pub watch: bool,
    /// Report drift but do not mutate.
    pub monitor_only: bool,
    /// Skip the pull state and recreate from the local image.
    pub no_pull: bool,
    /// Signal to pass to the engine's stop call.
    pub stop_signal: Option<String>,
}

/// Decide how `container` participates, first eliminating rule wins:
/// explicit name list, then the label-enable gate, then an explicit
/// `enable=false`, then scope mismatch.
pub fn select(config: &WatchConfig, container: &Container) -> Selection {
    let labels = &container.labels;

    if !config.name_in_scope(container.name()) {
        return Selection::default();
    }

    let enable = label_bool(labels, "enable");
    if config.label_enable && enable != Some(true) {
        return Selection::default();
    }
    if enable == Some(false) {
        return Selection::default();
    }

    if let Some(scope) = &config.scope {
        if label(labels, "scope") != Some(scope.as_str()) {
            return Selection::default();
        }
    }

    Selection {
        watch: true,
        monitor_only: config.monitor_only || label_bool(labels, "monitor-only") == Some(true),
        no_pull: config.no_pull || label_bool(labels, "no-pull") == Some(true),
        stop_signal: label(labels, "stop-signal").map(|s| s.to_string()),
    }
}

/// Look a label up under both namespaces; canonical wins.
fn label<'a>(labels: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    labels
        .get(&format!("{NAMESPACE_CANONICAL}.{name}"))
        .or_else(|| labels.get(&format!("{NAMESPACE_PRODUCT}.{name}")))
        .map(String::as_str)
}

fn label_bool(labels: &HashMap<String, String>, name: &str) -> Option<bool> {
    match label(labels, name)? {
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        other => {
            tracing::warn!(label = name, value = other, "ignoring non-boolean label value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, labels: &[(&str, &str)]) -> Container {
        serde_json::from_value(serde_json::json!({
            "Id": "aaa111",
            "Names": [format!("/{name}")],
            "Image": "nginx:1.21",
            "Labels": labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<String, String>>(),
        }))
        .unwrap()
    }

    #[test]
    fn test_default_watches_everything() {
        let config = WatchConfig::default();
        let sel = select(&config, &container("web", &[]));
        assert!(sel.watch);
        assert!(!sel.monitor_only);
        assert!(!sel.no_pull);
        assert_eq!(sel.stop_signal, None);
    }

    #[test]
    fn test_name_list_eliminates_unlisted() {
        let config = WatchConfig {
            container_names: vec!["web".to_string()],
            ..Default::default()
        };
        assert!(select(&config, &container("web", &[])).watch);
        assert!(!select(&config, &container("db", &[])).watch);
    }

    #[test]
    fn test_name_list_ignores_labels_of_unlisted() {
        let config = WatchConfig {
            container_names: vec!["web".to_string()],
            ..Default::default()
        };
        // Opted in by label, but not on the list
        let c = container("db", &[("com.centurylinklabs.watchtower.enable", "true")]);
        assert!(!select(&config, &c).watch);
    }

    #[test]
    fn test_label_enable_requires_opt_in() {
        let config = WatchConfig {
            label_enable: true,
            ..Default::default()
        };
        assert!(!select(&config, &container("web", &[])).watch);

        let opted = container("web", &[("com.centurylinklabs.watchtower.enable", "true")]);
        assert!(select(&config, &opted).watch);

        let product = container("web", &[("ing.wik.watchz.enable", "true")]);
        assert!(select(&config, &product).watch);
    }

    #[test]
    fn test_enable_false_opts_out() {
        let config = WatchConfig::default();
        let c = container("web", &[("ing.wik.watchz.enable", "false")]);
        assert!(!select(&config, &c).watch);
    }

    #[test]
    fn test_canonical_namespace_wins_on_conflict() {
        let config = WatchConfig::default();
        let c = container(
            "web",
            &[
                ("com.centurylinklabs.watchtower.enable", "false"),
                ("ing.wik.watchz.enable", "true"),
            ],
        );
        assert!(!select(&config, &c).watch);

        let config = WatchConfig {
            label_enable: true,
            ..Default::default()
        };
        let c = container(
            "web",
            &[
                ("com.centurylinklabs.watchtower.enable", "true"),
                ("ing.wik.watchz.enable", "false"),
            ],
        );
        assert!(select(&config, &c).watch);
    }

    #[test]
    fn test_scope_requires_matching_label() {
        let config = WatchConfig {
            scope: Some("prod".to_string()),
            ..Default::default()
        };
        // No scope label at all: not watched
        assert!(!select(&config, &container("web", &[])).watch);
        // Wrong scope: not watched
        let wrong = container("web", &[("ing.wik.watchz.scope", "staging")]);
        assert!(!select(&config, &wrong).watch);
        // Matching scope
        let right = container("web", &[("ing.wik.watchz.scope", "prod")]);
        assert!(select(&config, &right).watch);
    }

    #[test]
    fn test_global_monitor_only_overrides_label() {
        let config = WatchConfig {
            monitor_only: true,
            ..Default::default()
        };
        let c = container("web", &[("ing.wik.watchz.monitor-only", "false")]);
        let sel = select(&config, &c);
        assert!(sel.watch);
        assert!(sel.monitor_only);
    }

    #[test]
    fn test_label_monitor_only() {
        let config = WatchConfig::default();
        let c = container("web", &[("com.centurylinklabs.watchtower.monitor-only", "true")]);
        assert!(select(&config, &c).monitor_only);
    }

    #[test]
    fn test_no_pull_or_of_global_and_label() {
        let config = WatchConfig::default();
        let c = container("web", &[("ing.wik.watchz.no-pull", "true")]);
        assert!(select(&config, &c).no_pull);

        let global = WatchConfig {
            no_pull: true,
            ..Default::default()
        };
        assert!(select(&global, &container("web", &[])).no_pull);
    }

    #[test]
    fn test_stop_signal_passthrough() {
        let config = WatchConfig::default();
        let c = container("web", &[("com.centurylinklabs.watchtower.stop-signal", "SIGQUIT")]);
        assert_eq!(
            select(&config, &c).stop_signal,
            Some("SIGQUIT".to_string())
        );
    }

    #[test]
    fn test_garbage_boolean_label_ignored() {
        let config = WatchConfig::default();
        let c = container("web", &[("ing.wik.watchz.enable", "yes-please")]);
        // Not a valid boolean: treated as absent
        assert!(select(&config, &c).watch);
    }
}
