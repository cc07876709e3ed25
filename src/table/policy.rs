//! Listener policy checks (port/encryption pairing).
//!
//! # Design Decisions
//! - The rule is data (`[listener_policy]` in the settings file), not a constant
//! - Ports not named by the policy are unconstrained
//! - Shared by the parser (discard) and host registration (reject)

pub use crate::config::schema::ListenerPolicy;

use crate::table::host::{Interface, VirtualHost};

impl ListenerPolicy {
    /// Check one interface against the policy.
    pub fn check_interface(&self, interface: &Interface) -> Result<(), String> {
        if !self.enforce {
            return Ok(());
        }
        if interface.encrypted && self.plain_ports.contains(&interface.port) {
            return Err(format!("port {} must not be encrypted", interface.port));
        }
        if !interface.encrypted && self.encrypted_ports.contains(&interface.port) {
            return Err(format!("port {} must be encrypted", interface.port));
        }
        Ok(())
    }

    /// Check every interface of a host, reporting the first violation.
    pub fn check_host(&self, host: &VirtualHost) -> Result<(), String> {
        host.interfaces
            .iter()
            .try_for_each(|interface| self.check_interface(interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ListenerPolicy::default();
        assert!(policy.check_interface(&Interface::plain(80)).is_ok());
        assert!(policy.check_interface(&Interface::encrypted(443)).is_ok());
        assert!(policy.check_interface(&Interface::encrypted(80)).is_err());
        assert!(policy.check_interface(&Interface::plain(443)).is_err());
        // Unlisted ports may be either
        assert!(policy.check_interface(&Interface::plain(8443)).is_ok());
        assert!(policy.check_interface(&Interface::encrypted(8080)).is_ok());
    }

    #[test]
    fn test_disabled_policy() {
        let policy = ListenerPolicy {
            enforce: false,
            ..ListenerPolicy::default()
        };
        assert!(policy.check_interface(&Interface::plain(443)).is_ok());
    }

    #[test]
    fn test_check_host_reports_violation() {
        let host = VirtualHost::new("a", vec![Interface::plain(80), Interface::encrypted(80)]);
        let err = ListenerPolicy::default().check_host(&host).unwrap_err();
        assert!(err.contains("80"));
    }
}
