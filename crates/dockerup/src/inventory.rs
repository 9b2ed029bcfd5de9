//! Inventory Loader — merges a directory of one-spec-per-file documents and
//! an optional cloud user-data document into a single `ContainerSpec`
//! sequence and settings mapping (spec.md §4.B). Grounded on the original's
//! `dockerup/conf.py::files_config/aws_config` and
//! `dockerup/__init__.py::update_config`'s merge rule, and on
//! `conf/load.rs` for the tokio-process/timeout idiom.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::spec::{ContainerSpec, Inventory};

const AWS_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Scans `dir` for `*.json` files in lexicographic order. Each file holds
/// one `ContainerSpec`. A malformed file is skipped with a warning rather
/// than aborting the load (spec.md §7 configuration errors). A missing
/// directory yields an empty list, not an error — matching the "entirely
/// missing configuration yields an empty inventory" rule in spec.md §7,
/// since the confdir is merged the same way whether or not it exists.
pub fn load_confdir(dir: &Path) -> Vec<ContainerSpec> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "confdir not readable, treating as empty inventory");
            return Vec::new();
        }
    };
    entries.sort();

    let mut specs = Vec::new();
    for path in entries {
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<ContainerSpec>(&raw) {
                Ok(spec) => specs.push(spec),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping malformed spec file"),
            },
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable spec file"),
        }
    }
    specs
}

/// Document shape shared by confdir files and the cloud user-data blob:
/// an optional `containers` list plus arbitrary top-level settings.
#[derive(Debug, Default, serde::Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    containers: Vec<ContainerSpec>,
    #[serde(flatten)]
    settings: HashMap<String, serde_json::Value>,
}

/// Fetches cloud instance user-data via an external metadata command and
/// parses it as a `ConfigDocument`. Any failure — missing binary, timeout,
/// non-zero exit, malformed JSON — yields an empty document, mirroring the
/// original's bare `except Exception: return {}` in `aws_config`.
pub async fn load_aws_user_data() -> (Vec<ContainerSpec>, HashMap<String, serde_json::Value>) {
    let output = timeout(
        AWS_METADATA_TIMEOUT,
        Command::new("ec2metadata").arg("--user-data").output(),
    )
    .await;

    let stdout = match output {
        Ok(Ok(out)) if out.status.success() => out.stdout,
        Ok(Ok(out)) => {
            tracing::debug!(code = ?out.status.code(), "ec2metadata exited non-zero, skipping user-data");
            return (Vec::new(), HashMap::new());
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "ec2metadata could not be run, skipping user-data");
            return (Vec::new(), HashMap::new());
        }
        Err(_) => {
            tracing::warn!("ec2metadata timed out after {:?}, skipping user-data", AWS_METADATA_TIMEOUT);
            return (Vec::new(), HashMap::new());
        }
    };

    match serde_json::from_slice::<ConfigDocument>(&stdout) {
        Ok(doc) => (doc.containers, doc.settings),
        Err(e) => {
            tracing::debug!(error = %e, "ec2metadata user-data was not valid JSON, skipping");
            (Vec::new(), HashMap::new())
        }
    }
}

/// Merges the confdir load and, if `aws` is enabled, the user-data load,
/// into one `Inventory`. Scalar settings are last-writer-wins; the
/// `containers` list is concatenated directory-then-aws, per spec.md §4.B.
pub async fn load(
    confdir: &Path,
    aws: bool,
    base_settings: HashMap<String, serde_json::Value>,
) -> Inventory {
    let mut settings = base_settings;
    let mut containers = load_confdir(confdir);

    if aws {
        let (aws_containers, aws_settings) = load_aws_user_data().await;
        containers.extend(aws_containers);
        settings.extend(aws_settings);
    }

    Inventory {
        containers,
        settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_spec_file(dir: &Path, name: &str, json: &str) {
        std::fs::write(dir.join(name), json).unwrap();
    }

    #[test]
    fn load_confdir_reads_files_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        write_spec_file(dir.path(), "b.json", r#"{"image":"ex/b"}"#);
        write_spec_file(dir.path(), "a.json", r#"{"image":"ex/a"}"#);
        let specs = load_confdir(dir.path());
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].image, "ex/a");
        assert_eq!(specs[1].image, "ex/b");
    }

    #[test]
    fn load_confdir_skips_malformed_file_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        write_spec_file(dir.path(), "a.json", r#"{"image":"ex/a"}"#);
        write_spec_file(dir.path(), "bad.json", "not json");
        let specs = load_confdir(dir.path());
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].image, "ex/a");
    }

    #[test]
    fn load_confdir_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(load_confdir(&missing).is_empty());
    }

    #[tokio::test]
    async fn load_merges_confdir_and_respects_aws_flag_off() {
        let dir = tempfile::tempdir().unwrap();
        write_spec_file(dir.path(), "a.json", r#"{"image":"ex/a"}"#);
        let inventory = load(dir.path(), false, HashMap::new()).await;
        assert_eq!(inventory.containers.len(), 1);
    }
}
