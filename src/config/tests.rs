use super::*;
use serial_test::serial;

fn clear_cortex_env() {
    for key in [
        "CORTEX_NOTEBOOK_ROOT",
        "CORTEX_NOTEBOOK_BIN",
        "CORTEX_DB_PATH",
        "CORTEX_API_HOST",
        "CORTEX_API_PORT",
        "CORTEX_ALLOWED_ORIGINS",
        "CORTEX_API_URL",
        "CORTEX_STATE_DIR",
        "CORTEX_AGENT_BIN",
        "CORTEX_AGENT_MODEL",
        "CORTEX_MAX_PARALLEL",
        "CORTEX_POLL_INTERVAL_SECS",
        "CORTEX_API_TIMEOUT_SECS",
        "CORTEX_LOG_FILE",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn defaults_derive_from_home() {
    clear_cortex_env();
    env::set_var("HOME", "/home/tester");

    let config = Config::load().unwrap();
    assert_eq!(
        config.notebook.root,
        PathBuf::from("/home/tester/.cortex/notebook")
    );
    assert_eq!(
        config.metadata.db_path,
        PathBuf::from("/home/tester/.cortex/notebook/.cortex-meta.db")
    );
    assert_eq!(config.api.port, 4200);
    assert_eq!(config.runner.agent_binary, "claude");
    assert_eq!(config.runner.api_base_url, "http://127.0.0.1:4200");
}

#[test]
#[serial]
fn explicit_values_win() {
    clear_cortex_env();
    env::set_var("HOME", "/home/tester");
    env::set_var("CORTEX_NOTEBOOK_ROOT", "/srv/notebook");
    env::set_var("CORTEX_API_PORT", "8123");
    env::set_var("CORTEX_MAX_PARALLEL", "7");
    env::set_var("CORTEX_API_URL", "http://cortex.internal:9000");

    let config = Config::load().unwrap();
    assert_eq!(config.notebook.root, PathBuf::from("/srv/notebook"));
    assert_eq!(config.api.port, 8123);
    assert_eq!(config.runner.max_parallel, 7);
    assert_eq!(config.runner.api_base_url, "http://cortex.internal:9000");

    clear_cortex_env();
}

#[test]
#[serial]
fn malformed_values_fail_loudly() {
    clear_cortex_env();
    env::set_var("HOME", "/home/tester");
    env::set_var("CORTEX_API_PORT", "not-a-port");

    let err = Config::load().unwrap_err();
    assert!(matches!(err, CortexError::ConfigurationError(_)));

    clear_cortex_env();
}

#[test]
#[serial]
fn zero_parallelism_rejected() {
    clear_cortex_env();
    env::set_var("HOME", "/home/tester");
    env::set_var("CORTEX_MAX_PARALLEL", "0");

    let err = Config::load().unwrap_err();
    assert!(matches!(err, CortexError::ConfigurationError(_)));

    clear_cortex_env();
}
