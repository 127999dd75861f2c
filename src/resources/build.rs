//! MW-013: Build-and-populate job.
//!
//! The job is declared generically, then patched with a filesystem mount
//! and log settings. Patches are validated against the job as it stands
//! and are all applied before the job is submitted.

use super::network::SubnetSelection;
use crate::core::error::{StackError, StackResult};
use crate::core::graph::NodeId;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Package expression installed when no override is given.
pub const DEFAULT_PACKAGES: &str = "tensorflow";

/// Virtual environment directory under the access point root. The function
/// runtime activates this path, so it does not follow the package choice.
pub const VENV_DIR: &str = "tensorflow";

/// Buildspec schema version understood by the build service.
pub const BUILDSPEC_VERSION: &str = "0.1";

/// Local scratch location of the downloaded model archive.
const ARCHIVE_PATH: &str = "/tmp/1.tar.gz";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComputeSize {
    Small,
    Medium,
    #[default]
    Large,
    #[serde(rename = "2xlarge")]
    X2Large,
}

impl fmt::Display for ComputeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => write!(f, "BUILD_GENERAL1_SMALL"),
            Self::Medium => write!(f, "BUILD_GENERAL1_MEDIUM"),
            Self::Large => write!(f, "BUILD_GENERAL1_LARGE"),
            Self::X2Large => write!(f, "BUILD_GENERAL1_2XLARGE"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub enabled: bool,
}

/// Filesystem mount override for the job, as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemMount {
    pub mount_type: String,
    /// The raw filesystem, not its access point
    pub file_system: NodeId,
    pub mount_point: String,
    pub identifier: String,
    pub mount_options: String,
}

impl FileSystemMount {
    /// Resolve against the realized filesystem id and the deploy region.
    pub fn resolve(&self, filesystem_id: &str, region: &str) -> ResolvedMount {
        ResolvedMount {
            mount_type: self.mount_type.clone(),
            location: efs_location(filesystem_id, region),
            mount_point: self.mount_point.clone(),
            identifier: self.identifier.clone(),
            mount_options: self.mount_options.clone(),
        }
    }
}

/// Mount entry as handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMount {
    pub mount_type: String,
    pub location: String,
    pub mount_point: String,
    pub identifier: String,
    pub mount_options: String,
}

/// Network location of a filesystem: `<fsid>.efs.<region>.amazonaws.com:/`.
pub fn efs_location(filesystem_id: &str, region: &str) -> String {
    format!("{}.efs.{}.amazonaws.com:/", filesystem_id, region)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJobSpec {
    pub name: String,
    pub description: String,
    pub network: NodeId,
    pub subnets: SubnetSelection,
    /// Build-phase commands, run in order
    pub commands: Vec<String>,
    pub image: String,
    pub compute: ComputeSize,
    pub privileged: bool,
    pub security_groups: Vec<NodeId>,
    pub timeout_minutes: u32,
    pub buildspec_version: String,
    pub mounts: Vec<FileSystemMount>,
    pub logs: LogConfig,
}

impl BuildJobSpec {
    /// Buildspec document submitted with the job.
    pub fn buildspec(&self) -> serde_json::Value {
        serde_json::json!({
            "version": self.buildspec_version,
            "phases": {
                "build": {
                    "commands": self.commands,
                }
            }
        })
    }
}

/// Inputs to `define_build_job`.
#[derive(Debug, Clone)]
pub struct BuildJobProps {
    pub name: String,
    pub description: String,
    pub network: NodeId,
    pub subnets: SubnetSelection,
    pub commands: Vec<String>,
    pub image: String,
    pub compute: ComputeSize,
    pub privileged: bool,
    pub security_groups: Vec<NodeId>,
    pub timeout_minutes: u32,
}

/// Job spec under construction; mounts and logging are patched onto it.
#[derive(Debug, Clone)]
pub struct BuildJobBuilder {
    spec: BuildJobSpec,
}

pub fn define_build_job(props: BuildJobProps) -> StackResult<BuildJobBuilder> {
    if props.commands.is_empty() {
        return Err(StackError::config("build job needs at least one command"));
    }
    if props.timeout_minutes == 0 {
        return Err(StackError::config("build job timeout must be positive"));
    }
    Ok(BuildJobBuilder {
        spec: BuildJobSpec {
            name: props.name,
            description: props.description,
            network: props.network,
            subnets: props.subnets,
            commands: props.commands,
            image: props.image,
            compute: props.compute,
            privileged: props.privileged,
            security_groups: props.security_groups,
            timeout_minutes: props.timeout_minutes,
            buildspec_version: BUILDSPEC_VERSION.to_string(),
            mounts: Vec::new(),
            logs: LogConfig::default(),
        },
    })
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("static regex"))
}

pub fn is_valid_identifier(identifier: &str) -> bool {
    identifier_re().is_match(identifier)
}

impl BuildJobBuilder {
    pub fn spec(&self) -> &BuildJobSpec {
        &self.spec
    }

    /// Append one filesystem mount to the job.
    pub fn attach_filesystem_mount(
        mut self,
        file_system: NodeId,
        mount_point: &str,
        identifier: &str,
        mount_options: &str,
    ) -> StackResult<Self> {
        if self.spec.name.is_empty() {
            return Err(StackError::config(
                "cannot attach a filesystem mount before the job name is set",
            ));
        }
        if !mount_point.starts_with('/') {
            return Err(StackError::config(format!(
                "build mount point '{}' must be absolute",
                mount_point
            )));
        }
        if !is_valid_identifier(identifier) {
            return Err(StackError::config(format!(
                "build mount identifier '{}' must be alphanumeric",
                identifier
            )));
        }
        if self.spec.mounts.iter().any(|m| m.identifier == identifier) {
            return Err(StackError::config(format!(
                "build job '{}' already has a mount named '{}'",
                self.spec.name, identifier
            )));
        }
        let mount = FileSystemMount {
            mount_type: "EFS".to_string(),
            file_system,
            mount_point: mount_point.to_string(),
            identifier: identifier.to_string(),
            mount_options: mount_options.to_string(),
        };
        self.spec.mounts.push(mount);
        Ok(self)
    }

    pub fn enable_logging(mut self) -> Self {
        self.spec.logs.enabled = true;
        self
    }

    /// Final spec ready for submission.
    pub fn finish(self) -> StackResult<BuildJobSpec> {
        if self.spec.name.is_empty() {
            return Err(StackError::config("build job has no name"));
        }
        Ok(self.spec)
    }
}

/// Where the populate commands put things on the mounted filesystem.
#[derive(Debug, Clone)]
pub struct PopulateLayout {
    /// Mount identifier; the build exposes it as `$CODEBUILD_<IDENTIFIER>`
    pub identifier: String,
    /// Directory under the mount that the access point exposes
    pub root: String,
    pub model_url: String,
    /// Virtual environment directory name
    pub venv: String,
    pub uid: u32,
    pub gid: u32,
}

impl PopulateLayout {
    fn base(&self) -> String {
        format!(
            "$CODEBUILD_{}/{}",
            self.identifier.to_uppercase(),
            self.root.trim_matches('/')
        )
    }
}

/// `pip3 install` line run inside the activated environment.
pub fn install_command(layout: &PopulateLayout, install_packages: Option<&str>) -> String {
    format!(
        "source {}/{}/bin/activate && pip3 install {}",
        layout.base(),
        layout.venv,
        install_packages.unwrap_or(DEFAULT_PACKAGES)
    )
}

/// Build-phase commands. Order matters: every step reads what the
/// previous one left on the filesystem.
pub fn populate_commands(layout: &PopulateLayout, install_packages: Option<&str>) -> Vec<String> {
    let base = layout.base();
    vec![
        "echo \"Downloading and copying model...\"".to_string(),
        format!("mkdir -p {}/model", base),
        format!("curl {} --output {}", layout.model_url, ARCHIVE_PATH),
        format!("tar zxf {} -C {}/model", ARCHIVE_PATH, base),
        "echo \"Installing virtual environment...\"".to_string(),
        format!("mkdir -p {}", base),
        format!("python3 -m venv {}/{}", base, layout.venv),
        "echo \"Installing packages...\"".to_string(),
        install_command(layout, install_packages),
        "echo \"Changing folder permissions...\"".to_string(),
        format!("chown -R {}:{} {}/", layout.uid, layout.gid, base),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PopulateLayout {
        PopulateLayout {
            identifier: "efs1".to_string(),
            root: "/lambda".to_string(),
            model_url: "https://example.com/model.tar.gz".to_string(),
            venv: VENV_DIR.to_string(),
            uid: 1000,
            gid: 1000,
        }
    }

    fn props() -> BuildJobProps {
        BuildJobProps {
            name: "ml-populate".to_string(),
            description: "Installs Python libraries to EFS.".to_string(),
            network: NodeId(0),
            subnets: SubnetSelection::private(),
            commands: populate_commands(&layout(), None),
            image: "lambci/lambda:build-python3.8".to_string(),
            compute: ComputeSize::Large,
            privileged: true,
            security_groups: vec![NodeId(1)],
            timeout_minutes: 30,
        }
    }

    fn steps(commands: &[String]) -> Vec<&String> {
        commands.iter().filter(|c| !c.starts_with("echo ")).collect()
    }

    #[test]
    fn test_mw013_efs_location() {
        assert_eq!(
            efs_location("fs-0123", "us-east-1"),
            "fs-0123.efs.us-east-1.amazonaws.com:/"
        );
    }

    #[test]
    fn test_mw013_default_install_command() {
        let cmd = install_command(&layout(), None);
        assert!(cmd.ends_with("pip3 install tensorflow"));
        assert!(cmd.starts_with("source $CODEBUILD_EFS1/lambda/tensorflow/bin/activate && "));
    }

    #[test]
    fn test_mw013_install_override_is_verbatim() {
        let cmd = install_command(&layout(), Some("torch==2.1.0 'numpy<2'"));
        assert!(cmd.ends_with("pip3 install torch==2.1.0 'numpy<2'"));
    }

    #[test]
    fn test_mw013_populate_step_order() {
        let commands = populate_commands(&layout(), None);
        let s = steps(&commands);
        assert_eq!(s.len(), 7);
        assert_eq!(s[0], "mkdir -p $CODEBUILD_EFS1/lambda/model");
        assert_eq!(
            s[1],
            "curl https://example.com/model.tar.gz --output /tmp/1.tar.gz"
        );
        assert_eq!(s[2], "tar zxf /tmp/1.tar.gz -C $CODEBUILD_EFS1/lambda/model");
        assert_eq!(s[3], "mkdir -p $CODEBUILD_EFS1/lambda");
        assert_eq!(s[4], "python3 -m venv $CODEBUILD_EFS1/lambda/tensorflow");
        assert!(s[5].ends_with("pip3 install tensorflow"));
        assert_eq!(s[6], "chown -R 1000:1000 $CODEBUILD_EFS1/lambda/");
    }

    #[test]
    fn test_mw013_define_has_no_mounts() {
        let b = define_build_job(props()).unwrap();
        assert!(b.spec().mounts.is_empty());
        assert!(!b.spec().logs.enabled);
    }

    #[test]
    fn test_mw013_mount_and_logging_land_on_spec() {
        let spec = define_build_job(props())
            .unwrap()
            .attach_filesystem_mount(NodeId(4), "/mnt/python", "efs1", "nfsvers=4.1")
            .unwrap()
            .enable_logging()
            .finish()
            .unwrap();
        assert_eq!(spec.mounts.len(), 1);
        let m = &spec.mounts[0];
        assert_eq!(m.mount_type, "EFS");
        assert_eq!(m.file_system, NodeId(4));
        assert_eq!(m.mount_point, "/mnt/python");
        assert_eq!(m.identifier, "efs1");
        assert!(spec.logs.enabled);

        let resolved = m.resolve("fs-0123", "us-east-1");
        assert_eq!(resolved.location, "fs-0123.efs.us-east-1.amazonaws.com:/");
    }

    #[test]
    fn test_mw013_mount_needs_name() {
        let mut p = props();
        p.name = String::new();
        let err = define_build_job(p)
            .unwrap()
            .attach_filesystem_mount(NodeId(4), "/mnt/python", "efs1", "")
            .unwrap_err();
        assert!(err.to_string().contains("before the job name is set"));
    }

    #[test]
    fn test_mw013_mount_validation() {
        let b = define_build_job(props()).unwrap();
        assert!(b
            .clone()
            .attach_filesystem_mount(NodeId(4), "mnt/python", "efs1", "")
            .is_err());
        assert!(b
            .clone()
            .attach_filesystem_mount(NodeId(4), "/mnt/python", "efs-1", "")
            .is_err());
        let dup = b
            .attach_filesystem_mount(NodeId(4), "/mnt/python", "efs1", "")
            .unwrap()
            .attach_filesystem_mount(NodeId(4), "/mnt/other", "efs1", "");
        assert!(dup.is_err());
    }

    #[test]
    fn test_mw013_buildspec() {
        let spec = define_build_job(props()).unwrap().finish().unwrap();
        let doc = spec.buildspec();
        assert_eq!(doc["version"], "0.1");
        let cmds = doc["phases"]["build"]["commands"].as_array().unwrap();
        assert_eq!(cmds.len(), spec.commands.len());
    }

    #[test]
    fn test_mw013_compute_size_display() {
        assert_eq!(ComputeSize::Large.to_string(), "BUILD_GENERAL1_LARGE");
        assert_eq!(ComputeSize::default(), ComputeSize::Large);
    }
}
