// file: src/render.rs
// version: 1.1.0
// guid: 9d1e2f3a-4b5c-4d6e-8f70-a1b2c3d4e5f6

//! Rendering of the system configuration fragments the stages install
//!
//! Every fragment is generated whole from typed settings and written to a
//! drop-in directory, never patched into the distribution's own files.

use crate::config::BootstrapConfig;
use std::path::PathBuf;

const GENERATED_HEADER: &str = "# Managed by vps-bootstrap; regenerated on every run";

/// SSH daemon drop-in
pub const SSHD_DROPIN: &str = "/etc/ssh/sshd_config.d/60-vps-bootstrap.conf";

/// Fail2ban jail override
pub const FAIL2BAN_JAIL: &str = "/etc/fail2ban/jail.d/vps-bootstrap.local";

/// Sudoers fragment for a given account
pub fn sudoers_path(user: &str) -> PathBuf {
    // sudo ignores include files containing '.'
    PathBuf::from(format!("/etc/sudoers.d/90-vps-bootstrap-{}", user.replace('.', "_")))
}

/// Where a sudoers fragment is checked before it is moved into place;
/// the dot keeps sudo from reading it
pub fn sudoers_staging_path(user: &str) -> PathBuf {
    PathBuf::from(format!(
        "/etc/sudoers.d/.90-vps-bootstrap-{}.pending",
        user.replace('.', "_")
    ))
}

/// Hardened SSH daemon settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshdHardening {
    pub port: u16,
    pub allow_users: Vec<String>,
    pub permit_root_login: bool,
    pub password_authentication: bool,
    pub max_auth_tries: u32,
}

impl SshdHardening {
    pub fn for_admin(user: &str, port: u16) -> Self {
        Self {
            port,
            allow_users: vec![user.to_string()],
            permit_root_login: false,
            password_authentication: false,
            max_auth_tries: 3,
        }
    }

    pub fn render(&self) -> String {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        let mut out = String::new();
        out.push_str(GENERATED_HEADER);
        out.push('\n');
        out.push_str(&format!("Port {}\n", self.port));
        out.push_str(&format!("PermitRootLogin {}\n", yes_no(self.permit_root_login)));
        out.push_str(&format!(
            "PasswordAuthentication {}\n",
            yes_no(self.password_authentication)
        ));
        out.push_str("KbdInteractiveAuthentication no\n");
        out.push_str("PubkeyAuthentication yes\n");
        out.push_str(&format!("MaxAuthTries {}\n", self.max_auth_tries));
        out.push_str("X11Forwarding no\n");
        if !self.allow_users.is_empty() {
            out.push_str(&format!("AllowUsers {}\n", self.allow_users.join(" ")));
        }
        out
    }
}

/// Fail2ban jail for the SSH daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fail2banJail {
    pub ssh_port: u16,
    pub bantime_secs: u64,
    pub findtime_secs: u64,
    pub maxretry: u32,
}

impl Fail2banJail {
    pub fn from_config(config: &BootstrapConfig, ssh_port: u16) -> Self {
        Self {
            ssh_port,
            bantime_secs: config.security.fail2ban_bantime_secs,
            findtime_secs: config.security.fail2ban_findtime_secs,
            maxretry: config.security.fail2ban_maxretry,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{header}\n[DEFAULT]\nbantime = {bantime}\nfindtime = {findtime}\nmaxretry = {maxretry}\n\n[sshd]\nenabled = true\nport = {port}\nbackend = systemd\n",
            header = GENERATED_HEADER,
            bantime = self.bantime_secs,
            findtime = self.findtime_secs,
            maxretry = self.maxretry,
            port = self.ssh_port,
        )
    }
}

/// Sudo rule granting the admin account full privileges
pub fn sudoers_fragment(user: &str, passwordless: bool) -> String {
    let tag = if passwordless { "NOPASSWD: " } else { "" };
    format!("{}\n{} ALL=(ALL:ALL) {}ALL\n", GENERATED_HEADER, user, tag)
}
