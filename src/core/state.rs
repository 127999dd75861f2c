//! MW-023: Deployment record. Load, save (atomic), path derivation.
//!
//! A stack's record is pinned to the region it was first deployed to.

use super::error::{StackError, StackResult};
use super::types::{DeployContext, StateLock};
use std::path::{Path, PathBuf};

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load the lock file for a stack. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> StackResult<Option<StateLock>> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| StackError::State(format!("cannot read {}: {}", path.display(), e)))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| StackError::State(format!("invalid lock file {}: {}", path.display(), e)))?;
    Ok(Some(lock))
}

/// Load the record for the stack being deployed. A record written for
/// another region is a configuration error: the provider handles it holds
/// do not exist in `ctx.region`.
pub fn load_deployment(state_dir: &Path, ctx: &DeployContext) -> StackResult<Option<StateLock>> {
    let Some(lock) = load_lock(state_dir, &ctx.stack)? else {
        return Ok(None);
    };
    if lock.stack != ctx.stack {
        return Err(StackError::State(format!(
            "lock file for '{}' records stack '{}'",
            ctx.stack, lock.stack
        )));
    }
    if lock.region != ctx.region {
        return Err(StackError::config(format!(
            "stack '{}' is deployed to {}, not {}",
            ctx.stack, lock.region, ctx.region
        )));
    }
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> StackResult<()> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            StackError::State(format!("cannot create dir {}: {}", parent.display(), e))
        })?;
    }

    let yaml = serde_yaml_ng::to_string(lock)
        .map_err(|e| StackError::State(format!("serialize error: {}", e)))?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| StackError::State(format!("cannot write {}: {}", tmp_path.display(), e)))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        StackError::State(format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Create a new empty StateLock for a stack.
pub fn new_lock(stack: &str, region: &str) -> StateLock {
    use crate::tripwire::eventlog::now_iso8601;
    StateLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        region: region.to_string(),
        generated_at: now_iso8601(),
        generator: format!("mountwright {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        resources: indexmap::IndexMap::new(),
        outputs: indexmap::IndexMap::new(),
    }
}
