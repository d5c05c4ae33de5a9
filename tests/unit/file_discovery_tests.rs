use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::fs;

use validate_server_xml::FileDiscovery;

use crate::common::test_helpers::*;

fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
        .collect()
}

/// A user directory with two servers, their fragments and an expanded application
async fn liberty_user_dir() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    create_server_tree(root, &[("web", MINIMAL_SERVER), ("batch", "<server/>")]).await;

    let web = root.join("usr/servers/web");
    fs::create_dir_all(web.join("configDropins/defaults")).await.unwrap();
    fs::write(web.join("configDropins/defaults/server.xml"), "<server/>")
        .await
        .unwrap();
    fs::write(web.join("db.xml"), "<server/>").await.unwrap();
    fs::create_dir_all(web.join("apps/expanded/shop.war/WEB-INF"))
        .await
        .unwrap();
    fs::write(web.join("apps/expanded/shop.war/WEB-INF/server.xml"), "<server/>")
        .await
        .unwrap();
    fs::create_dir_all(root.join("usr/shared/config")).await.unwrap();
    fs::write(root.join("usr/shared/config/common.xml"), "<server/>")
        .await
        .unwrap();

    temp_dir
}

#[tokio::test]
async fn test_only_top_level_configurations_are_discovered() {
    let temp_dir = liberty_user_dir().await;
    let discovery = FileDiscovery::new()
        .with_exclude_patterns(vec!["**/configDropins/**".to_string(), "**/apps/**".to_string()])
        .unwrap();

    let files = discovery.discover_files(temp_dir.path()).await.unwrap();
    assert_eq!(
        relative(temp_dir.path(), &files),
        vec!["usr/servers/batch/server.xml", "usr/servers/web/server.xml"]
    );
}

#[tokio::test]
async fn test_include_patterns_narrow_the_scan() {
    let temp_dir = liberty_user_dir().await;
    let discovery = FileDiscovery::new()
        .with_include_patterns(vec!["**/servers/web/*".to_string()])
        .unwrap();

    let files = discovery.discover_files(temp_dir.path()).await.unwrap();
    assert_eq!(relative(temp_dir.path(), &files), vec!["usr/servers/web/server.xml"]);
}

#[tokio::test]
async fn test_depth_limit_stops_before_nested_files() {
    let temp_dir = liberty_user_dir().await;
    let shallow = FileDiscovery::new().with_max_depth(Some(2));
    assert!(shallow.discover_files(temp_dir.path()).await.unwrap().is_empty());

    let servers = FileDiscovery::new().with_max_depth(Some(3));
    assert_eq!(servers.discover_files(temp_dir.path()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_custom_file_names_and_stats() {
    let temp_dir = liberty_user_dir().await;
    let discovery = FileDiscovery::new().with_file_names(vec!["common.xml".to_string(), "db.xml".to_string()]);

    let stats = discovery.get_discovery_stats(temp_dir.path()).await.unwrap();
    assert_eq!(stats.files_found, 2);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn test_explicit_fragment_is_returned_as_is() {
    let temp_dir = liberty_user_dir().await;
    let fragment = temp_dir.path().join("usr/servers/web/db.xml");

    let files = FileDiscovery::new().discover_files(&fragment).await.unwrap();
    assert_eq!(files, vec![fragment]);
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = FileDiscovery::new()
        .discover_files(&temp_dir.path().join("absent"))
        .await;
    assert!(result.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_servers_need_opt_in() {
    let temp_dir = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    create_server_tree(elsewhere.path(), &[("linked", "<server/>")]).await;
    std::os::unix::fs::symlink(elsewhere.path().join("usr"), temp_dir.path().join("usr")).unwrap();

    let default = FileDiscovery::new().discover_files(temp_dir.path()).await.unwrap();
    assert!(default.is_empty());

    let following = FileDiscovery::new()
        .with_follow_symlinks(true)
        .discover_files(temp_dir.path())
        .await
        .unwrap();
    assert_eq!(relative(temp_dir.path(), &following), vec!["usr/servers/linked/server.xml"]);
}
