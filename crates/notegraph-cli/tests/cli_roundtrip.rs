use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};

/// Run the `notegraph` binary against `store` with the deterministic fake embedder.
fn notegraph(store: &Path, args: &[&str]) -> Result<Output> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_notegraph"));
    for var in [
        "NOTEGRAPH_CONFIG",
        "NOTEGRAPH_STORE",
        "NOTEGRAPH_EMBEDDER",
        "NOTEGRAPH_OLLAMA_URL",
        "NOTEGRAPH_MODEL",
        "NOTEGRAPH_GRAPH_K",
    ] {
        cmd.env_remove(var);
    }
    let output = cmd
        .env("RUST_LOG", "off")
        .arg("--store")
        .arg(store)
        .args(["--embedder", "fake", "--dimension", "512"])
        .args(args)
        .output()
        .context("running notegraph binary")?;
    Ok(output)
}

fn json_ok(store: &Path, args: &[&str]) -> Result<Value> {
    let mut full = vec!["--json"];
    full.extend_from_slice(args);
    let out = notegraph(store, &full)?;
    assert!(
        out.status.success(),
        "notegraph {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    let value: Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(value["success"], true);
    Ok(value["data"].clone())
}

/// Integration test: add -> list -> search -> graph -> delete through the binary.
#[test]
fn cli_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("notes.json");

    let samples = [
        "I love hiking in the mountains",
        "Mountain trails are beautiful",
        "I need to buy groceries",
    ];
    for s in samples {
        json_ok(&store, &["add", s])?;
    }

    let listed = json_ok(&store, &["list"])?;
    let ids: Vec<u64> = listed
        .as_array()
        .context("list data is an array")?
        .iter()
        .filter_map(|n| n["id"].as_u64())
        .collect();
    assert_eq!(ids, vec![3, 2, 1]);

    let hits = json_ok(&store, &["search", "mountain", "trails", "--limit", "2"])?;
    let hits = hits.as_array().context("search data is an array")?;
    assert!(!hits.is_empty() && hits.len() <= 2);
    assert_eq!(hits[0]["id"], 2);
    assert_eq!(hits[0]["rank"], 1);

    let graph = json_ok(&store, &["graph"])?;
    assert_eq!(graph["nodes"].as_array().map(Vec::len), Some(3));
    let edges = graph["edges"].as_array().context("edges array")?;
    assert!(!edges.is_empty());
    assert!(edges
        .iter()
        .all(|e| e["source"].as_u64() < e["target"].as_u64() && e.get("value").is_some()));

    json_ok(&store, &["delete", "2"])?;
    let listed = json_ok(&store, &["list"])?;
    assert_eq!(listed.as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test]
fn json_errors_carry_kind() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("notes.json");

    let out = notegraph(&store, &["--json", "show", "42"])?;
    assert!(!out.status.success());
    let value: Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(value["success"], false);
    assert_eq!(value["kind"], "not_found");

    let out = notegraph(&store, &["--json", "add", "   "])?;
    assert!(!out.status.success());
    let value: Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(value["kind"], "validation");
    Ok(())
}

#[test]
fn import_reads_one_note_per_line() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("notes.json");
    let input = dir.path().join("notes.txt");
    std::fs::write(&input, "first idea\n\n  second idea  \nthird idea\n")?;

    let imported = json_ok(&store, &["import", input.to_str().context("utf-8 path")?])?;
    let contents: Vec<&str> = imported
        .as_array()
        .context("import data is an array")?
        .iter()
        .filter_map(|n| n["content"].as_str())
        .collect();
    assert_eq!(contents, vec!["first idea", "second idea", "third idea"]);

    let related = json_ok(&store, &["related", "1"])?;
    assert!(related
        .as_array()
        .context("related data is an array")?
        .iter()
        .all(|n| n["id"] != 1));
    Ok(())
}
