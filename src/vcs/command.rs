//! Shell-command execution of the three module proxy operations.
//!
//! Every operation shells out to an operator-supplied command line via
//! `sh -c`, describing the request entirely through environment variables
//! (`MODULE`, `ACTION`, `VERSION`, ...) and capturing stdout as the
//! response.  The variables are injected on top of the inherited process
//! environment so that credential handling stays transparent to this
//! adapter.

use std::io::Cursor;
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::encode::encode_bangs;
use super::{Vcs, VcsError, Version, ZipStream};

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// [`Vcs`] implementation that delegates retrieval to an external command.
///
/// Stateless apart from the strings fixed at construction; each operation
/// builds its own environment and subprocess, so one instance may serve
/// concurrent callers.
pub struct CommandVcs {
    shell: String,
    command: String,
    module: String,
    module_encoded: String,
}

impl CommandVcs {
    /// Create an adapter for `module` that runs `command` through `shell`.
    ///
    /// The encoded form of the module path is derived here once and reused
    /// for the adapter's lifetime.  No I/O happens until an operation runs.
    pub fn new(
        shell: impl Into<String>,
        command: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        let module = module.into();
        let module_encoded = encode_bangs(&module);
        Self {
            shell: shell.into(),
            command: command.into(),
            module,
            module_encoded,
        }
    }

    /// The six request variables for one invocation.  `rel` is the path
    /// element under `@v/` (`list`, `<version>.info` or `<version>.zip`).
    fn request_env(&self, action: &str, version: &str, rel: &str) -> Vec<(String, String)> {
        vec![
            ("MODULE".to_string(), self.module.clone()),
            ("MODULE_ENCODED".to_string(), self.module_encoded.clone()),
            ("ACTION".to_string(), action.to_string()),
            ("VERSION".to_string(), version.to_string()),
            ("FILEPATH".to_string(), format!("{}/@v/{rel}", self.module)),
            (
                "FILEPATH_ENCODED".to_string(),
                format!("{}/@v/{rel}", self.module_encoded),
            ),
        ]
    }

    /// Run the configured command line with `extra_env` layered on top of
    /// the inherited environment, blocking the task until it exits.
    ///
    /// stdout is captured and returned.  stderr stays connected to this
    /// process's stderr so the command's diagnostics reach the operator
    /// directly rather than travelling in the error value.
    async fn exec(&self, extra_env: &[(String, String)]) -> Result<Vec<u8>, VcsError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.command);

        for (k, v) in extra_env {
            cmd.env(k, v);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        // Dropping the in-flight future (caller cancellation) must not leave
        // the subprocess running.
        cmd.kill_on_drop(true);

        debug!(shell = %self.shell, command = %self.command, "spawning vcs command");

        let output = cmd.output().await.map_err(|source| VcsError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(VcsError::Exit {
                command: self.command.clone(),
                status: output.status,
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Vcs for CommandVcs {
    #[instrument(skip(self), fields(module = %self.module))]
    async fn list(&self) -> Result<Vec<Version>> {
        let env = self.request_env("list", "latest", "list");
        let out = self.exec(&env).await?;

        // One version per line, order preserved.  A trailing newline from
        // the command yields a trailing empty version; the raw output is
        // passed through untrimmed.
        let versions: Vec<Version> = String::from_utf8_lossy(&out)
            .split('\n')
            .map(Version::from)
            .collect();

        debug!(count = versions.len(), "vcs list complete");
        Ok(versions)
    }

    #[instrument(skip(self), fields(module = %self.module, version = %version))]
    async fn timestamp(&self, version: &Version) -> Result<DateTime<Utc>> {
        let env = self.request_env("timestamp", version.as_str(), &format!("{version}.info"));
        let out = self.exec(&env).await?;
        let time = decode_timestamp(&out)?;

        debug!(time = %time, "vcs timestamp complete");
        Ok(time)
    }

    #[instrument(skip(self), fields(module = %self.module, version = %version))]
    async fn zip(&self, version: &Version) -> Result<ZipStream> {
        let env = self.request_env("zip", version.as_str(), &format!("{version}.zip"));
        let out = self.exec(&env).await?;

        debug!(bytes = out.len(), "vcs zip complete");
        Ok(Box::new(Cursor::new(Bytes::from(out))))
    }
}

// ---------------------------------------------------------------------------
// Timestamp decoding
// ---------------------------------------------------------------------------

/// Record shape of a proxy `.info` response.
#[derive(Debug, Deserialize)]
struct InfoRecord {
    /// Present in well-formed responses but not checked against the
    /// requested version.
    #[serde(rename = "Version")]
    _version: String,
    #[serde(rename = "Time")]
    time: DateTime<Utc>,
}

/// Interpret the raw bytes of a `timestamp` response.
///
/// Three formats are accepted, tried in order: a JSON record carrying
/// `Version` and `Time` fields, a bare RFC 3339 timestamp, and a decimal
/// Unix second count.  The bytes are not trimmed first, so a trailing
/// newline fails the latter two forms.
fn decode_timestamp(raw: &[u8]) -> Result<DateTime<Utc>, VcsError> {
    if let Ok(info) = serde_json::from_slice::<InfoRecord>(raw) {
        return Ok(info.time);
    }

    let text = String::from_utf8_lossy(raw);
    if let Ok(t) = DateTime::parse_from_rfc3339(&text) {
        return Ok(t.with_timezone(&Utc));
    }

    if let Ok(sec) = text.parse::<i64>() {
        if let Some(t) = Utc.timestamp_opt(sec, 0).single() {
            return Ok(t);
        }
    }

    Err(VcsError::UnknownTimeFormat)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn adapter(command: &str) -> CommandVcs {
        CommandVcs::new("sh", command, "github.com/example/project")
    }

    // ---- list ----

    #[tokio::test]
    async fn list_preserves_lines_and_trailing_empty() {
        let vcs = adapter("printf 'v1.0.0\\nv1.1.0\\n'");
        let versions = vcs.list().await.unwrap();
        assert_eq!(
            versions,
            vec![
                Version::from("v1.0.0"),
                Version::from("v1.1.0"),
                Version::from(""),
            ]
        );
    }

    #[tokio::test]
    async fn list_without_trailing_newline_has_no_empty_tail() {
        let vcs = adapter("printf 'v0.0.1'");
        let versions = vcs.list().await.unwrap();
        assert_eq!(versions, vec![Version::from("v0.0.1")]);
    }

    #[tokio::test]
    async fn request_env_reaches_the_command() {
        let vcs = CommandVcs::new(
            "sh",
            r#"printf '%s|%s|%s|%s|%s|%s' "$MODULE" "$MODULE_ENCODED" "$ACTION" "$VERSION" "$FILEPATH" "$FILEPATH_ENCODED""#,
            "github.com/Example/Project",
        );
        let versions = vcs.list().await.unwrap();
        assert_eq!(
            versions[0].as_str(),
            "github.com/Example/Project\
             |github.com/!example/!project\
             |list|latest\
             |github.com/Example/Project/@v/list\
             |github.com/!example/!project/@v/list"
        );
    }

    // ---- timestamp ----

    #[tokio::test]
    async fn timestamp_accepts_info_record() {
        let vcs = adapter(r#"printf '{"Version":"v1.0.0","Time":"2021-01-01T00:00:00Z"}'"#);
        let time = vcs.timestamp(&Version::from("v1.0.0")).await.unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn timestamp_accepts_bare_rfc3339() {
        let vcs = adapter("printf '2021-01-01T05:30:00+05:30'");
        let time = vcs.timestamp(&Version::from("v1.0.0")).await.unwrap();
        // Offset input normalises to the same instant in UTC.
        assert_eq!(time, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn timestamp_accepts_unix_seconds() {
        let vcs = adapter("printf '1609459200'");
        let time = vcs.timestamp(&Version::from("v1.0.0")).await.unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn timestamp_rejects_unknown_format() {
        let vcs = adapter("printf 'not-a-time'");
        let err = vcs.timestamp(&Version::from("v1.0.0")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VcsError>(),
            Some(VcsError::UnknownTimeFormat)
        ));
    }

    #[tokio::test]
    async fn timestamp_does_not_trim_trailing_newline() {
        // `echo` appends a newline, which fails both the RFC 3339 and the
        // Unix-seconds parse.
        let vcs = adapter("echo 1609459200");
        let err = vcs.timestamp(&Version::from("v1.0.0")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VcsError>(),
            Some(VcsError::UnknownTimeFormat)
        ));
    }

    #[test]
    fn info_record_requires_both_fields() {
        let err = decode_timestamp(br#"{"Time":"2021-01-01T00:00:00Z"}"#).unwrap_err();
        assert!(matches!(err, VcsError::UnknownTimeFormat));
    }

    #[test]
    fn info_record_version_mismatch_is_ignored() {
        let time =
            decode_timestamp(br#"{"Version":"v9.9.9","Time":"2021-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
    }

    // ---- zip ----

    #[tokio::test]
    async fn zip_returns_stdout_bytes_untransformed() {
        let vcs = adapter(r"printf 'PK\003\004archive-bytes'");
        let mut stream = vcs.zip(&Version::from("v1.0.0")).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"PK\x03\x04archive-bytes");
    }

    // ---- failures ----

    #[tokio::test]
    async fn non_zero_exit_fails_every_operation() {
        let vcs = adapter("exit 1");

        let err = vcs.list().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VcsError>(),
            Some(VcsError::Exit { .. })
        ));

        let err = vcs.timestamp(&Version::from("v1.0.0")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VcsError>(),
            Some(VcsError::Exit { .. })
        ));

        // `zip`'s Ok type is a boxed trait object that is not `Debug`, so
        // `unwrap_err()` cannot be used here; extract the error by hand.
        let err = match vcs.zip(&Version::from("v1.0.0")).await {
            Ok(_) => panic!("expected zip to fail"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<VcsError>(),
            Some(VcsError::Exit { .. })
        ));
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_error() {
        let vcs = CommandVcs::new("/nonexistent/shell", "true", "github.com/example/project");
        let err = vcs.list().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VcsError>(),
            Some(VcsError::Spawn { .. })
        ));
    }
}
