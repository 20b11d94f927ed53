use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graphics::error::{Error, Result};

pub const DEFAULT_COMMAND_LIST_COUNT: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    #[default]
    Direct,
    Compute,
    Copy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    #[default]
    Normal,
    High,
    GlobalRealtime,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct QueueFlags: u32 {
        const DISABLE_GPU_TIMEOUT = 0x1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandQueueDesc {
    pub kind: QueueKind,
    pub priority: QueuePriority,
    pub flags: QueueFlags,
}

impl CommandQueueDesc {
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn compute() -> Self {
        Self {
            kind: QueueKind::Compute,
            ..Default::default()
        }
    }

    pub fn copy() -> Self {
        Self {
            kind: QueueKind::Copy,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_flags(mut self, flags: QueueFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Parameters for [`Device::create_command_queue`](crate::graphics::device::Device::create_command_queue).
///
/// ```toml
/// command_list_count = 3
///
/// [desc]
/// kind = "compute"
/// priority = "high"
/// flags = "DISABLE_GPU_TIMEOUT"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandQueueCreateInfo {
    pub desc: CommandQueueDesc,
    /// Size of the command list pool, and so the number of lists that can be
    /// in flight before `begin_command_list` blocks.
    pub command_list_count: usize,
}

impl Default for CommandQueueCreateInfo {
    fn default() -> Self {
        Self {
            desc: CommandQueueDesc::default(),
            command_list_count: DEFAULT_COMMAND_LIST_COUNT,
        }
    }
}

impl CommandQueueCreateInfo {
    pub fn new(desc: CommandQueueDesc) -> Self {
        Self {
            desc,
            ..Default::default()
        }
    }

    pub fn with_command_list_count(mut self, count: usize) -> Self {
        self.command_list_count = count;
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let info: Self = toml::from_str(source)?;
        info.validate()?;
        Ok(info)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_list_count == 0 {
            return Err(Error::InvalidConfig(
                "command_list_count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_size() {
        let info = CommandQueueCreateInfo::default();

        assert_eq!(info.command_list_count, 64);
        assert_eq!(info.desc.kind, QueueKind::Direct);
        assert!(info.validate().is_ok());
    }

    #[test]
    fn zero_lists_is_rejected() {
        let info = CommandQueueCreateInfo::default().with_command_list_count(0);

        assert!(matches!(info.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn parses_toml() {
        let info = CommandQueueCreateInfo::from_toml_str(
            r#"
            command_list_count = 3

            [desc]
            kind = "compute"
            priority = "high"
            flags = "DISABLE_GPU_TIMEOUT"
            "#,
        )
        .unwrap();

        assert_eq!(info.command_list_count, 3);
        assert_eq!(
            info.desc,
            CommandQueueDesc::compute()
                .with_priority(QueuePriority::High)
                .with_flags(QueueFlags::DISABLE_GPU_TIMEOUT)
        );
    }

    #[test]
    fn missing_fields_use_defaults() {
        let info = CommandQueueCreateInfo::from_toml_str("").unwrap();

        assert_eq!(info, CommandQueueCreateInfo::default());
    }

    #[test]
    fn toml_with_zero_lists_fails() {
        let err = CommandQueueCreateInfo::from_toml_str("command_list_count = 0").unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_fails() {
        let err = CommandQueueCreateInfo::from_toml_str("command_list_count = \"many\"").unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }
}
