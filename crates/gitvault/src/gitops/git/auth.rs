//! Git authentication handling.
//!
//! The repository token is handed to git through a short-lived `GIT_ASKPASS`
//! script, so it never shows up in remote URLs, `.git/config` or process
//! arguments.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::gitops::error::{GitOpsError, Result};

/// Escapes a token for safe use in single-quoted shell strings.
pub fn shell_escape_token(token: &str) -> String {
    token.replace('\'', "'\\''")
}

/// Strips any `user:password@` part from a URL before it is logged or reported.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let host_start = rest.find('/').unwrap_or(rest.len());
    match rest[..host_start].rfind('@') {
        Some(at) => format!("{}://***@{}", &url[..scheme_end], &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Deletes the askpass script when dropped.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Authentication environment for git commands.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command to keep the askpass script alive.
    pub _cleanup: AskpassCleanup,
}

/// Builds the auth environment for a network git command.
///
/// Without a token git runs non-interactively and fails fast on auth prompts.
pub fn build_auth_env(token: Option<&SecretString>) -> Result<AuthEnv> {
    let mut env_vars = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    let Some(token) = token.filter(|t| !t.expose_secret().is_empty()) else {
        return Ok(AuthEnv {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        });
    };

    let askpass_path = std::env::temp_dir().join(format!(
        ".gitvault-askpass-{}.sh",
        uuid::Uuid::new_v4()
    ));
    // Git asks for username and password; a PAT is accepted for both.
    let script = format!(
        "#!/bin/sh\necho '{}'\n",
        shell_escape_token(token.expose_secret())
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&askpass_path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        std::fs::write(&askpass_path, &script)?;
    }

    let cleanup = AskpassCleanup::new(askpass_path.clone());

    let askpass = askpass_path
        .to_str()
        .ok_or_else(|| {
            GitOpsError::GitAuthFailed(
                "Temp directory path contains non-UTF8 characters".to_string(),
            )
        })?
        .to_string();
    env_vars.push(("GIT_ASKPASS".to_string(), askpass));

    Ok(AuthEnv {
        env_vars,
        _cleanup: cleanup,
    })
}
