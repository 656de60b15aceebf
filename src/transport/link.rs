//! Network interface links
//!
//! Interface state is read from sysfs. Association is delegated to an
//! external command (for example `nmcli` or `wpa_cli`).

use super::NetworkLink;
use crate::config::{WiredSection, WirelessSection};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SYSFS_NET: &str = "/sys/class/net";

/// Network link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Interface {interface} has no link")]
    Down { interface: String },
    #[error("Association of {interface} failed: {reason}")]
    AssociationFailed { interface: String, reason: String },
}

/// Link backed by a kernel network interface
#[derive(Debug, Clone)]
pub struct InterfaceLink {
    name: String,
    interface: Option<String>,
    associate_command: Vec<String>,
    substitutions: Vec<(&'static str, String)>,
    sysfs_root: PathBuf,
}

impl InterfaceLink {
    /// Link whose interface is brought up by the operating system alone
    pub fn new(name: &str, interface: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            interface,
            associate_command: Vec::new(),
            substitutions: Vec::new(),
            sysfs_root: PathBuf::from(SYSFS_NET),
        }
    }

    pub fn wired(section: &WiredSection) -> Self {
        Self::new("wired", section.interface.clone())
    }

    pub fn wireless(section: &WirelessSection) -> Self {
        let mut link = Self::new("wireless", section.interface.clone());
        link.associate_command = section.associate_command.clone();
        if let Some(interface) = &section.interface {
            link.substitutions.push(("{interface}", interface.clone()));
        }
        if let Some(ssid) = &section.ssid {
            link.substitutions.push(("{ssid}", ssid.clone()));
        }
        if let Some(passphrase) = section.passphrase() {
            link.substitutions.push(("{passphrase}", passphrase));
        }
        link
    }

    /// Read interface state below `root` instead of `/sys/class/net`
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    fn interface_label(&self) -> String {
        self.interface
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }

    /// Command line with placeholders filled in
    fn expand_command(&self) -> Vec<String> {
        self.associate_command
            .iter()
            .map(|arg| {
                self.substitutions
                    .iter()
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

#[async_trait]
impl NetworkLink for InterfaceLink {
    async fn associate(&self) -> Result<(), LinkError> {
        if self.is_up() {
            return Ok(());
        }

        let interface = self.interface_label();
        let command = self.expand_command();
        if let Some((program, args)) = command.split_first() {
            debug!("Running association command for {}: {}", interface, program);
            let output = Command::new(program)
                .args(args)
                .output()
                .await
                .map_err(|e| LinkError::AssociationFailed {
                    interface: interface.clone(),
                    reason: e.to_string(),
                })?;
            if !output.status.success() {
                let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!("Association command for {} failed: {}", interface, reason);
                return Err(LinkError::AssociationFailed {
                    interface,
                    reason: format!("{} ({})", reason, output.status),
                });
            }
        }

        if self.is_up() {
            info!("Interface {} is up", interface);
            Ok(())
        } else {
            Err(LinkError::Down { interface })
        }
    }

    fn is_up(&self) -> bool {
        let Some(interface) = &self.interface else {
            return true;
        };
        let path = self.sysfs_root.join(interface).join("operstate");
        match std::fs::read_to_string(&path) {
            Ok(state) => state.trim() == "up",
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sysfs_with(interface: &str, state: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(interface)).unwrap();
        std::fs::write(dir.path().join(interface).join("operstate"), format!("{state}\n")).unwrap();
        dir
    }

    #[test]
    fn test_link_without_interface_is_up() {
        let link = InterfaceLink::new("wired", None);
        assert!(link.is_up());
    }

    #[test]
    fn test_operstate_is_read() {
        let sysfs = sysfs_with("wlan0", "up");
        let link = InterfaceLink::new("wireless", Some("wlan0".to_string()))
            .with_sysfs_root(sysfs.path());
        assert!(link.is_up());

        std::fs::write(sysfs.path().join("wlan0").join("operstate"), "down\n").unwrap();
        assert!(!link.is_up());
    }

    #[test]
    fn test_missing_interface_is_down() {
        let sysfs = TempDir::new().unwrap();
        let link =
            InterfaceLink::new("wired", Some("eth9".to_string())).with_sysfs_root(sysfs.path());
        assert!(!link.is_up());
    }

    #[test]
    fn test_command_substitution() {
        let section = WirelessSection {
            interface: Some("wlan0".to_string()),
            ssid: Some("field-ap".to_string()),
            associate_command: vec![
                "nmcli".to_string(),
                "device".to_string(),
                "wifi".to_string(),
                "connect".to_string(),
                "{ssid}".to_string(),
                "ifname".to_string(),
                "{interface}".to_string(),
            ],
            ..Default::default()
        };
        let link = InterfaceLink::wireless(&section);
        assert_eq!(
            link.expand_command(),
            vec!["nmcli", "device", "wifi", "connect", "field-ap", "ifname", "wlan0"]
        );
    }

    #[tokio::test]
    async fn test_associate_down_without_command() {
        let sysfs = sysfs_with("wlan0", "down");
        let link = InterfaceLink::new("wireless", Some("wlan0".to_string()))
            .with_sysfs_root(sysfs.path());

        let result = link.associate().await;
        assert!(matches!(result, Err(LinkError::Down { interface }) if interface == "wlan0"));
    }

    #[tokio::test]
    async fn test_associate_command_failure() {
        let sysfs = sysfs_with("wlan0", "down");
        let section = WirelessSection {
            interface: Some("wlan0".to_string()),
            ssid: Some("field-ap".to_string()),
            associate_command: vec!["false".to_string()],
            ..Default::default()
        };
        let link = InterfaceLink::wireless(&section).with_sysfs_root(sysfs.path());

        let result = link.associate().await;
        assert!(matches!(result, Err(LinkError::AssociationFailed { .. })));
    }

    #[tokio::test]
    async fn test_associate_already_up() {
        let sysfs = sysfs_with("wlan0", "up");
        let link = InterfaceLink::new("wireless", Some("wlan0".to_string()))
            .with_sysfs_root(sysfs.path());
        assert!(link.associate().await.is_ok());
    }
}
