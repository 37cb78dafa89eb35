use std::fs;
use std::net::SocketAddr;

use anyhow::Result;
use lenz_bridge::bootstrap::{Bootstrap, ImportMap, ENTRY_ID, IMPORT_MAP_ID};
use lenz_bridge::ipc::CustomSchemeResolver;
use lenz_bridge::peer::{start_peer, InvokeRouter, PeerConfig};
use reqwest::Client;
use tempfile::TempDir;

const PAGE: &str = "<!doctype html><html><head><title>app</title></head><body><p>hi</p></body></html>";

fn occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

#[tokio::test]
async fn html_assets_get_the_bootstrap_once() -> Result<()> {
    let root = TempDir::new()?;
    fs::write(root.path().join("index.html"), PAGE)?;
    fs::create_dir(root.path().join("nested"))?;
    fs::write(root.path().join("nested/index.html"), PAGE)?;
    fs::write(root.path().join("app.js"), "console.log('</script>')")?;

    let import_map: ImportMap = [("lenz/ipc", "lenz://resources/esm/ipc.mjs")].into_iter().collect();
    let handle = start_peer(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        PeerConfig {
            router: InvokeRouter::with_builtins(),
            bootstrap: Bootstrap::new(import_map, &CustomSchemeResolver),
            asset_root: Some(root.path().to_path_buf()),
        },
    )
    .await?;
    let client = Client::new();
    let base = format!("http://{}/assets", handle.addr);

    let page = client
        .get(format!("{base}/index.html"))
        .send()
        .await?
        .error_for_status()?;
    assert!(page.headers()["content-type"].to_str()?.starts_with("text/html"));
    let body = page.text().await?;
    assert_eq!(occurrences(&body, &format!("id=\"{IMPORT_MAP_ID}\"")), 1);
    assert_eq!(occurrences(&body, &format!("id=\"{ENTRY_ID}\"")), 1);
    assert!(body.contains("lenz://resources/esm/ipc.mjs"));
    assert!(body.contains("<p>hi</p>"));

    let nested = client.get(format!("{base}/nested")).send().await?.text().await?;
    assert_eq!(occurrences(&nested, &format!("id=\"{IMPORT_MAP_ID}\"")), 1);

    // Non-HTML assets are served untouched.
    let script = client.get(format!("{base}/app.js")).send().await?.text().await?;
    assert_eq!(script, "console.log('</script>')");

    let missing = client.get(format!("{base}/nope.html")).send().await?;
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    handle.shutdown().await;
    Ok(())
}

#[test]
fn already_bootstrapped_pages_are_left_alone() {
    let bootstrap = Bootstrap::new(ImportMap::new(), &CustomSchemeResolver);
    let once = bootstrap.inject_html(PAGE);
    let twice = bootstrap.inject_html(&once);
    assert_eq!(occurrences(&twice, &format!("id=\"{IMPORT_MAP_ID}\"")), 1);
    assert_eq!(occurrences(&twice, &format!("id=\"{ENTRY_ID}\"")), 1);
}
