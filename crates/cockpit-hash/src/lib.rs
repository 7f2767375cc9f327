//! Input fingerprinting.
//!
//! A task's input hash is a SHA-256 digest over its command, any extra
//! arguments forwarded from the invocation, its environment overlay, and the
//! metadata of its input file set. File contents are never read: the digest
//! covers each file's relative path, modification time, and size, which
//! trades strict correctness for speed on large trees.

use camino::Utf8Path;
use chrono::{DateTime, SecondsFormat, Utc};
use cockpit_globwalk::{WalkError, INPUT_EXCLUSIONS};
use cockpit_workspaces::TaskDefinition;
use sha2::{Digest, Sha256};

/// Length of the hex digest prefix used as the cache key.
const HASH_LEN: usize = 16;

/// Pattern used when a definition declares no inputs.
const DEFAULT_INPUTS: &str = "**/*";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error("failed to serialize hash input: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Compute the input hash for a task rooted at `workspace_path`.
///
/// `extra_args` must be empty unless the task is one the user named on the
/// command line; the caller enforces that rule.
pub fn input_hash(
    definition: &TaskDefinition,
    workspace_path: &Utf8Path,
    extra_args: &[String],
) -> Result<String, Error> {
    let mut hasher = Sha256::new();

    hasher.update(serde_json::to_string(&definition.command)?);

    if !extra_args.is_empty() {
        hasher.update(serde_json::to_string(extra_args)?);
    }

    if let Some(env) = definition.env.as_ref().filter(|env| !env.is_empty()) {
        // BTreeMap, so the serialization is sorted by key
        hasher.update(serde_json::to_string(env)?);
    }

    hash_file_set(&mut hasher, definition, workspace_path)?;

    let digest = hex::encode(hasher.finalize());
    Ok(digest[..HASH_LEN].to_string())
}

fn hash_file_set(
    hasher: &mut Sha256,
    definition: &TaskDefinition,
    workspace_path: &Utf8Path,
) -> Result<(), Error> {
    let default_inputs = vec![DEFAULT_INPUTS.to_string()];
    let patterns = definition.inputs.as_ref().unwrap_or(&default_inputs);

    // globwalk returns sorted relative paths
    for relative in cockpit_globwalk::globwalk(workspace_path, patterns, INPUT_EXCLUSIONS)? {
        let absolute = workspace_path.join(&relative);
        let metadata = match absolute.as_std_path().metadata() {
            Ok(metadata) => metadata,
            // A file can vanish between the walk and the stat; it then simply
            // leaves the digest
            Err(err) => {
                tracing::debug!("skipping {absolute} while hashing: {err}");
                continue;
            }
        };
        hasher.update(relative.as_str());
        if let Ok(modified) = metadata.modified() {
            let modified: DateTime<Utc> = modified.into();
            hasher.update(modified.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        hasher.update(metadata.len().to_string());
    }
    Ok(())
}
