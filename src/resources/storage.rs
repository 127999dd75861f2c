//! MW-011: Shared filesystem and its access point.

use crate::core::error::{StackError, StackResult};
use crate::core::graph::NodeId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shared uid/gid for the populate build and the function mount.
pub const SHARED_ID: u32 = 1000;

/// Observed lifecycle state a filesystem must report before mounts resolve.
pub const AVAILABLE: &str = "available";

/// Rate used in provisioned mode when none is configured (1 GiB/s).
pub const DEFAULT_PROVISIONED_MIBPS: u32 = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputMode {
    /// Fixed rate, set by `provisioned_mibps` or defaulted.
    #[default]
    Provisioned,
    /// Scales with stored size; no rate.
    Bursting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemSpec {
    pub network: NodeId,
    pub security_group: NodeId,
    pub throughput_mode: ThroughputMode,
    pub provisioned_mibps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixUser {
    pub uid: u32,
    pub gid: u32,
}

/// Ownership and permissions applied when the access point path is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationAcl {
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub permissions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointSpec {
    pub file_system: NodeId,
    pub path: String,
    pub posix_user: PosixUser,
    pub creation_acl: CreationAcl,
}

pub fn define_file_system(
    network: NodeId,
    security_group: NodeId,
    throughput_mode: ThroughputMode,
    provisioned_mibps: Option<u32>,
) -> StackResult<FileSystemSpec> {
    match (throughput_mode, provisioned_mibps) {
        (ThroughputMode::Provisioned, None) | (ThroughputMode::Provisioned, Some(0)) => {
            return Err(StackError::config(
                "provisioned throughput mode needs a positive provisioned_mibps",
            ));
        }
        (ThroughputMode::Bursting, Some(_)) => {
            return Err(StackError::config(
                "provisioned_mibps is only valid with provisioned throughput mode",
            ));
        }
        _ => {}
    }
    Ok(FileSystemSpec {
        network,
        security_group,
        throughput_mode,
        provisioned_mibps,
    })
}

pub fn define_access_point(
    file_system: NodeId,
    path: &str,
    posix_user: PosixUser,
    acl: CreationAcl,
) -> StackResult<AccessPointSpec> {
    if !path.starts_with('/') {
        return Err(StackError::config(format!(
            "access point path '{}' must be absolute",
            path
        )));
    }
    if !is_octal_mode(&acl.permissions) {
        return Err(StackError::config(format!(
            "access point permissions '{}' must be 3 or 4 octal digits",
            acl.permissions
        )));
    }
    if posix_user.uid != acl.owner_uid || posix_user.gid != acl.owner_gid {
        tracing::warn!(
            path,
            uid = posix_user.uid,
            gid = posix_user.gid,
            owner_uid = acl.owner_uid,
            owner_gid = acl.owner_gid,
            "access point user differs from creation owner"
        );
    }
    Ok(AccessPointSpec {
        file_system,
        path: path.to_string(),
        posix_user,
        creation_acl: acl,
    })
}

/// Access point policy shared by writer and reader: one uid/gid, mode 777.
pub fn shared_ownership(uid: u32, gid: u32, permissions: &str) -> (PosixUser, CreationAcl) {
    (
        PosixUser { uid, gid },
        CreationAcl {
            owner_uid: uid,
            owner_gid: gid,
            permissions: permissions.to_string(),
        },
    )
}

pub fn is_octal_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c))
}
