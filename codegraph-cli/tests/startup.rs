//! Exercises the binary's config-to-runtime startup path in-process (the
//! same two calls `main` makes), without spawning the actual process or
//! touching stdio.

#[tokio::test]
async fn builds_a_runtime_from_a_freshly_loaded_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = codegraph_config::EngineConfig::from_sources("codegraph-cli-test-nonexistent-app", Some(dir.path())).unwrap();
    config.database.path = dir.path().join("codegraph.db");

    let runtime = codegraph_transport::bootstrap::build_runtime(&config).await;
    assert!(runtime.is_ok());
}
