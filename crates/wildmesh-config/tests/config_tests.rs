#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use wildmesh_config::ConfigLoader;
    use wildmesh_config::schema::*;
    use wildmesh_core::{CapabilitySet, Role};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.heartbeat_interval_ms, 60_000);
        assert_eq!(config.coordinator_timeout_ms, 600_000);
        assert_eq!(config.task_timeout_ms, 300_000);
        assert_eq!(config.max_retries, 3);
        assert!(config.enable_autonomous_mode);
        assert!(config.enable_task_execution);
        assert_eq!(config.task_history_limit, 32);
    }

    #[test]
    fn test_derived_intervals() {
        let config = NodeConfig::default();
        assert_eq!(config.discovery_window(), 60_000);
        assert_eq!(config.rediscovery_interval(), 300_000);
        assert_eq!(config.peer_stale_after(), 300_000);

        let explicit = NodeConfig {
            discovery_window_ms: Some(5_000),
            ..NodeConfig::default()
        };
        assert_eq!(explicit.discovery_window(), 5_000);
    }

    #[test]
    fn test_mesh_config_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.max_hops, 8);
        assert_eq!(config.dedup_window, 256);
        assert_eq!(config.route_timeout_ms, 300_000);
        assert_eq!(config.max_frame_bytes, 1024);
    }

    #[test]
    fn test_identity_defaults_build() {
        let identity = IdentityConfig::default().to_identity().unwrap();
        assert_eq!(identity.node_id(), 1);
        assert_eq!(identity.role_preference(), Role::Node);
        assert!(identity.capabilities().contains(CapabilitySet::IMAGE | CapabilitySet::SENSORS));
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = WildmeshConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: WildmeshConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.node, config.node);
        assert_eq!(restored.mesh.max_hops, config.mesh.max_hops);
        assert_eq!(restored.simulation.topology, Topology::Line);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[identity]
node_id = 12
role = "coordinator"
capabilities = ["image", "ai"]

[node]
heartbeat_interval_ms = 30000
"#;
        let config: WildmeshConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.identity.node_id, 12);
        assert_eq!(config.identity.role, Role::Coordinator);
        assert_eq!(config.node.heartbeat_interval_ms, 30_000);
        // Defaults should fill in
        assert_eq!(config.node.coordinator_timeout_ms, 600_000);
        assert_eq!(config.mesh.dedup_window, 256);
        assert!(config.node.discovery_window_ms.is_none());
    }

    #[test]
    fn test_topology_parses_lowercase() {
        let config: WildmeshConfig = toml::from_str("[simulation]\ntopology = \"full\"\n").unwrap();
        assert_eq!(config.simulation.topology, Topology::Full);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_default_config_validates() {
        let warnings = WildmeshConfig::default().validate().unwrap();
        assert!(
            warnings
                .iter()
                .all(|w| w.severity != WarningSeverity::Error)
        );
    }

    #[test]
    fn test_broadcast_node_id_rejected() {
        let mut config = WildmeshConfig::default();
        config.identity.node_id = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("identity.node_id"));
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let mut config = WildmeshConfig::default();
        config.identity.capabilities.push("sonar".into());
        let err = config.validate().unwrap_err();
        assert!(err.contains("identity.capabilities"));
    }

    #[test]
    fn test_timeout_not_longer_than_heartbeat_rejected() {
        let mut config = WildmeshConfig::default();
        config.node.coordinator_timeout_ms = config.node.heartbeat_interval_ms;
        let err = config.validate().unwrap_err();
        assert!(err.contains("node.coordinator_timeout_ms"));
    }

    #[test]
    fn test_short_timeout_warns() {
        let mut config = WildmeshConfig::default();
        config.node.coordinator_timeout_ms = config.node.heartbeat_interval_ms * 2;
        let warnings = config.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "node.coordinator_timeout_ms"
                    && w.severity == WarningSeverity::Warning)
        );
    }

    #[test]
    fn test_zero_hops_rejected() {
        let mut config = WildmeshConfig::default();
        config.mesh.max_hops = 0;
        assert!(config.validate().unwrap_err().contains("mesh.max_hops"));
    }

    #[test]
    fn test_tiny_frame_rejected() {
        let mut config = WildmeshConfig::default();
        config.mesh.max_frame_bytes = 40;
        assert!(config.validate().unwrap_err().contains("mesh.max_frame_bytes"));
    }

    #[test]
    fn test_zero_discovery_window_rejected() {
        let mut config = WildmeshConfig::default();
        config.node.discovery_window_ms = Some(0);
        assert!(config.validate().unwrap_err().contains("node.discovery_window_ms"));
    }

    #[test]
    fn test_simulation_coordinator_out_of_range() {
        let mut config = WildmeshConfig::default();
        config.simulation.coordinator = 9;
        assert!(config.validate().unwrap_err().contains("simulation.coordinator"));
    }

    #[test]
    fn test_simulation_loss_must_be_probability() {
        let mut config = WildmeshConfig::default();
        config.simulation.loss = 1.5;
        assert!(config.validate().unwrap_err().contains("simulation.loss"));
    }

    #[test]
    fn test_unknown_log_format_warns() {
        let mut config = WildmeshConfig::default();
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "logging.format"));
    }

    #[test]
    fn test_disabled_execution_is_info() {
        let mut config = WildmeshConfig::default();
        config.node.enable_task_execution = false;
        let warnings = config.validate().unwrap();
        let w = warnings
            .iter()
            .find(|w| w.field == "node.enable_task_execution")
            .unwrap();
        assert_eq!(w.severity, WarningSeverity::Info);
    }

    #[test]
    fn test_warning_display_has_hint() {
        let mut config = WildmeshConfig::default();
        config.mesh.max_hops = 30;
        let warnings = config.validate().unwrap();
        let rendered = warnings
            .iter()
            .find(|w| w.field == "mesh.max_hops")
            .unwrap()
            .to_string();
        assert!(rendered.contains("mesh.max_hops"));
        assert!(rendered.contains("↳"));
    }

    // ── Patch tests ────────────────────────────────────────────

    #[test]
    fn test_patch_overrides_only_set_fields() {
        let base = NodeConfig::default();
        let patch = NodeConfigPatch {
            heartbeat_interval_ms: Some(10_000),
            enable_task_execution: Some(false),
            ..NodeConfigPatch::default()
        };
        let next = base.patched(&patch);
        assert_eq!(next.heartbeat_interval_ms, 10_000);
        assert!(!next.enable_task_execution);
        assert_eq!(next.coordinator_timeout_ms, base.coordinator_timeout_ms);
        assert_eq!(next.max_retries, base.max_retries);
    }

    #[test]
    fn test_patch_sets_standalone_interval() {
        let patch = NodeConfigPatch {
            standalone_task_interval_ms: Some(120_000),
            ..NodeConfigPatch::default()
        };
        let next = NodeConfig::default().patched(&patch);
        assert_eq!(next.standalone_task_interval_ms, 120_000);
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_huge_intervals_validate_without_overflow() {
        let config = NodeConfig {
            heartbeat_interval_ms: 1 << 63,
            coordinator_timeout_ms: (1 << 63) + 1,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_ok());
        let full = WildmeshConfig {
            node: config,
            ..WildmeshConfig::default()
        };
        let warnings = full.validate().unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| w.field == "node.coordinator_timeout_ms")
        );
    }

    #[test]
    fn test_patch_can_produce_invalid_config() {
        let patch = NodeConfigPatch {
            coordinator_timeout_ms: Some(1_000),
            ..NodeConfigPatch::default()
        };
        assert!(NodeConfig::default().patched(&patch).validate().is_err());
    }

    #[test]
    fn test_empty_patch() {
        assert!(NodeConfigPatch::default().is_empty());
        let json = serde_json::to_string(&NodeConfigPatch::default()).unwrap();
        assert_eq!(json, "{}");
    }

    // ── Override tests ─────────────────────────────────────────

    #[test]
    fn test_env_overrides_apply() {
        let config = ConfigLoader::apply_overrides(
            WildmeshConfig::default(),
            lookup(&[
                ("WILDMESH_NODE_ID", "42"),
                ("WILDMESH_ROLE", "coordinator"),
                ("WILDMESH_HEARTBEAT_INTERVAL_MS", "15000"),
                ("WILDMESH_AUTONOMOUS", "false"),
            ]),
        );
        assert_eq!(config.identity.node_id, 42);
        assert_eq!(config.identity.role, Role::Coordinator);
        assert_eq!(config.node.heartbeat_interval_ms, 15_000);
        assert!(!config.node.enable_autonomous_mode);
    }

    #[test]
    fn test_unparsable_override_ignored() {
        let config = ConfigLoader::apply_overrides(
            WildmeshConfig::default(),
            lookup(&[("WILDMESH_NODE_ID", "seven"), ("WILDMESH_ROLE", "boss")]),
        );
        assert_eq!(config.identity.node_id, 1);
        assert_eq!(config.identity.role, Role::Node);
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("wildmesh.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[identity]
node_id = 5
capabilities = ["sensors"]

[mesh]
max_hops = 4
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(&config_path)).unwrap();
        let config = loader.get();
        assert_eq!(config.mesh.max_hops, 4);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("wildmesh.toml");
        std::fs::write(&config_path, "[mesh]\ndedup_window = 0\n").unwrap();
        assert!(ConfigLoader::load(Some(&config_path)).is_err());
    }

    #[test]
    fn test_config_loader_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("wildmesh.toml");
        std::fs::write(&config_path, "[mesh\nmax_hops = ").unwrap();
        let err = ConfigLoader::load(Some(&config_path)).err().unwrap();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("wildmesh.toml");
        std::fs::write(&config_path, "[mesh]\nmax_hops = 3\n").unwrap();

        let loader = ConfigLoader::load(Some(&config_path)).unwrap();
        assert_eq!(loader.get().mesh.max_hops, 3);

        std::fs::write(&config_path, "[mesh]\nmax_hops = 6\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.shared().read().mesh.max_hops, 6);

        // An invalid edit keeps the previous config
        std::fs::write(&config_path, "[mesh]\nmax_hops = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().mesh.max_hops, 6);
    }

    #[test]
    fn test_default_toml_parses_back() {
        let rendered = ConfigLoader::default_toml().unwrap();
        let config: WildmeshConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(config.node, NodeConfig::default());
    }
}
