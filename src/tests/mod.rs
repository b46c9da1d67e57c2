//! Integration and unit tests for main.rs
use assert_cmd::Command;
use predicates::str::contains;
use std::path::PathBuf;

pub mod support;


use crate::security::EncryptedSecret;
use support::{PROD_TENANT, TEST_KEY, TEST_KEY_ID, registry_config, test_keyring};

/// The unit test harness lives in `target/<profile>/deps`, the binary one level up
fn storeproxy_bin() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.join(format!("storeproxy{}", std::env::consts::EXE_SUFFIX))
}

fn storeproxy() -> Command {
    let mut cmd = Command::new(storeproxy_bin());
    cmd.env_clear();
    cmd
}

fn key_ring_env() -> String {
    format!("{}:{}", TEST_KEY_ID, TEST_KEY)
}

fn write_registry_file() -> PathBuf {
    let config = registry_config(&test_keyring(), "https://upstream.test");
    let path = std::env::temp_dir().join(format!("storeproxy-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn generate_key_prints_base64_key() {
    let output = storeproxy().arg("generate-key").output().unwrap();
    assert!(output.status.success());

    let key = String::from_utf8(output.stdout).unwrap();
    // 32 bytes of base64 with padding
    assert_eq!(key.trim().len(), 44);
}

#[test]
fn env_example_lists_variables() {
    storeproxy()
        .arg("env-example")
        .assert()
        .success()
        .stdout(contains("STOREPROXY_PORT"))
        .stdout(contains("STOREPROXY_SECRET_KEYS"));
}

#[test]
fn check_env_rejects_invalid_port() {
    storeproxy()
        .arg("check-env")
        .env("STOREPROXY_PORT", "not-a-port")
        .assert()
        .failure()
        .stderr(contains("STOREPROXY_PORT"));
}

#[test]
fn encrypt_secret_with_known_key() {
    let output = storeproxy()
        .args(["encrypt-secret", "--key-id", TEST_KEY_ID, "--secret", "hunter2"])
        .env("STOREPROXY_SECRET_KEYS", key_ring_env())
        .output()
        .unwrap();
    assert!(output.status.success());

    let sealed = String::from_utf8(output.stdout).unwrap();
    let sealed = EncryptedSecret::from_base64(TEST_KEY_ID, sealed.trim()).unwrap();
    assert_eq!(test_keyring().decrypt(&sealed).unwrap(), "hunter2");
}

#[test]
fn encrypt_secret_reads_plaintext_from_stdin() {
    let output = storeproxy()
        .args(["encrypt-secret", "--key-id", TEST_KEY_ID])
        .env("STOREPROXY_SECRET_KEYS", key_ring_env())
        .write_stdin("from-stdin\n")
        .output()
        .unwrap();
    assert!(output.status.success());

    let sealed = String::from_utf8(output.stdout).unwrap();
    let sealed = EncryptedSecret::from_base64(TEST_KEY_ID, sealed.trim()).unwrap();
    assert_eq!(test_keyring().decrypt(&sealed).unwrap(), "from-stdin");
}

#[test]
fn encrypt_secret_rejects_empty_stdin() {
    storeproxy()
        .args(["encrypt-secret", "--key-id", TEST_KEY_ID])
        .env("STOREPROXY_SECRET_KEYS", key_ring_env())
        .write_stdin("")
        .assert()
        .failure()
        .stderr(contains("Failed to read secret from stdin"));
}

#[test]
fn encrypt_secret_with_unknown_key_fails() {
    storeproxy()
        .args(["encrypt-secret", "--key-id", "retired", "--secret", "hunter2"])
        .env("STOREPROXY_SECRET_KEYS", key_ring_env())
        .assert()
        .failure()
        .stderr(contains("Failed to encrypt secret"));
}

#[test]
fn list_endpoints_shows_tenants_without_secrets() {
    let path = write_registry_file();

    let output = storeproxy()
        .arg("list-endpoints")
        .env("STOREPROXY_SECRET_KEYS", key_ring_env())
        .env("STOREPROXY_ENDPOINTS_FILE", &path)
        .output()
        .unwrap();
    let _ = std::fs::remove_file(&path);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains(PROD_TENANT));
    assert!(stdout.contains("contoso"));
    assert!(stdout.contains("2 endpoint(s)"));
    assert!(!stdout.contains(support::TEST_CLIENT_SECRET));
}

#[test]
fn list_endpoints_fails_without_registry() {
    storeproxy()
        .arg("list-endpoints")
        .env("STOREPROXY_ENDPOINTS_FILE", "/nonexistent/storeproxy/endpoints.json")
        .assert()
        .failure()
        .stderr(contains("Failed to load registry"));
}

#[test]
fn list_endpoints_reports_empty_registry() {
    let mut config = registry_config(&test_keyring(), "https://upstream.test");
    config.endpoints.clear();
    for settings in config.environments.values_mut() {
        settings.default_tenant = None;
    }
    let path = std::env::temp_dir().join(format!("storeproxy-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

    let output = storeproxy()
        .arg("list-endpoints")
        .env("STOREPROXY_ENDPOINTS_FILE", &path)
        .output()
        .unwrap();
    let _ = std::fs::remove_file(&path);

    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout).unwrap().contains("No endpoints configured."));
}
