use super::*;

#[tokio::test]
async fn memory_store_round_trips_values() {
    let store = MemorySettings::new();
    assert_eq!(store.get("room_name").await.expect("get"), None);

    store.set("room_name", "listen-along").await.expect("set");
    store.set("room_name", "control room").await.expect("overwrite");

    assert_eq!(
        store.get("room_name").await.expect("get"),
        Some("control room".to_string())
    );
}

#[tokio::test]
async fn sqlite_store_round_trips_values() {
    let store = SqliteSettings::open("sqlite::memory:").await.expect("db");
    store.health_check().await.expect("health check");

    assert_eq!(store.get("whitelist").await.expect("get"), None);
    store.set("whitelist", r#"["k1"]"#).await.expect("set");
    store.set("whitelist", r#"["k1","k2"]"#).await.expect("overwrite");

    assert_eq!(
        store.get("whitelist").await.expect("get"),
        Some(r#"["k1","k2"]"#.to_string())
    );
}

#[tokio::test]
async fn sqlite_store_persists_across_reopen() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("settings.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let store = SqliteSettings::open(&database_url).await.expect("db");
        store.set("room_label", "Now hosting").await.expect("set");
    }

    assert!(db_path.exists(), "database file should exist");

    let store = SqliteSettings::open(&database_url).await.expect("reopen");
    assert_eq!(
        store.get("room_label").await.expect("get"),
        Some("Now hosting".to_string())
    );
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/settings.db"),
        "sqlite://./data/settings.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:./data/settings.db"),
        "sqlite://./data/settings.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
}
