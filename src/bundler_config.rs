//! Local bundler config generation
//!
//! Reads the bundler's JSON config, turns off installer bundle generation,
//! points the main window at a versioned local boot URL and writes the
//! result next to the original. The original file is never modified.

use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

use crate::download::platform::Platform;
use crate::error::{PrepError, Result};

pub const DEFAULT_SCHEME: &str = "app";

/// Boot URL served by the local scheme handler
pub fn boot_url(scheme: &str, version: &str, platform: Platform) -> String {
    format!("{scheme}://localhost/{version}/{}/index.html", platform.as_str())
}

/// `tauri.conf.json` → `tauri.conf.local.json`
pub fn local_config_path(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    original.with_file_name(format!("{stem}.local.json"))
}

/// Version declared in the config (`version` or `package.version`)
pub fn declared_version(config: &Value) -> Option<&str> {
    config
        .get("version")
        .and_then(Value::as_str)
        .or_else(|| config.pointer("/package/version").and_then(Value::as_str))
}

fn object_at<'a>(parent: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>> {
    parent
        .entry(key)
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| PrepError::Config(format!("bundler config key {key:?} is not an object")))
}

/// Apply the local overrides to a parsed config
///
/// Handles both layouts: `tauri.bundle` / `tauri.windows` and top-level
/// `bundle` / `app.windows`.
pub fn rewrite(config: &mut Value, url: &str) -> Result<()> {
    let root = config
        .as_object_mut()
        .ok_or_else(|| PrepError::Config("bundler config is not a JSON object".into()))?;

    let legacy = root.contains_key("tauri");

    let bundle_parent = if legacy { object_at(root, "tauri")? } else { root };
    object_at(bundle_parent, "bundle")?.insert("active".into(), Value::Bool(false));

    let root = config
        .as_object_mut()
        .ok_or_else(|| PrepError::Config("bundler config is not a JSON object".into()))?;
    let window_parent = object_at(root, if legacy { "tauri" } else { "app" })?;
    let windows = window_parent
        .entry("windows")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| PrepError::Config("bundler config \"windows\" is not an array".into()))?;

    if windows.is_empty() {
        windows.push(json!({}));
    }
    windows[0]
        .as_object_mut()
        .ok_or_else(|| PrepError::Config("first window entry is not an object".into()))?
        .insert("url".into(), Value::String(url.to_string()));

    Ok(())
}

/// Write the local config for `platform` and return its path
pub fn write_local_config(
    original: &Path,
    platform: Platform,
    version: Option<&str>,
    scheme: &str,
) -> Result<PathBuf> {
    let text = std::fs::read_to_string(original)
        .map_err(|e| PrepError::io(format!("read {}", original.display()), e))?;
    let mut config: Value = serde_json::from_str(&text)
        .map_err(|e| PrepError::Config(format!("{}: {e}", original.display())))?;

    let version = match version {
        Some(v) => v.to_string(),
        None => declared_version(&config)
            .map(str::to_string)
            .ok_or_else(|| {
                PrepError::Config(format!(
                    "{} declares no version; pass one explicitly",
                    original.display()
                ))
            })?,
    };

    let url = boot_url(scheme, &version, platform);
    rewrite(&mut config, &url)?;

    let target = local_config_path(original);
    let mut rendered = serde_json::to_string_pretty(&config)
        .map_err(|e| PrepError::Config(e.to_string()))?;
    rendered.push('\n');
    std::fs::write(&target, rendered)
        .map_err(|e| PrepError::io(format!("write {}", target.display()), e))?;

    log::info!("Wrote {} (window url {})", target.display(), url);
    Ok(target)
}
