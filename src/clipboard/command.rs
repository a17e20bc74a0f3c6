//! Helper-process plumbing shared by the xclip and wl-clipboard backends.

use std::io::Write;
use std::process::{Command, Stdio};

use super::ClipboardError;

/// Run `tool args…` and return stdout, or `None` if it exited non-zero.
///
/// Non-zero exit on a read means "nothing of that type is offered"
/// for both xclip and wl-paste, so it is not an error.
pub(super) fn read(tool: &'static str, args: &[&str]) -> Result<Option<Vec<u8>>, ClipboardError> {
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|source| ClipboardError::Spawn { tool, source })?;

    if output.status.success() {
        Ok(Some(output.stdout))
    } else {
        tracing::trace!(tool, ?args, status = %output.status, "read returned nothing");
        Ok(None)
    }
}

/// Run `tool args…`, pipe `content` to stdin, and wait for exit.
///
/// Both helpers fork a background owner of the selection once stdin
/// closes, so `wait` returns as soon as the content is handed over.
pub(super) fn feed(tool: &'static str, args: &[&str], content: &[u8]) -> Result<(), ClipboardError> {
    let mut child = Command::new(tool)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ClipboardError::Spawn { tool, source })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content)
            .map_err(|source| ClipboardError::Io { tool, source })?;
        // Dropping stdin closes the pipe.
    }

    let status = child
        .wait()
        .map_err(|source| ClipboardError::Io { tool, source })?;

    if status.success() {
        Ok(())
    } else {
        Err(ClipboardError::Exit {
            tool,
            status: status.to_string(),
        })
    }
}

/// Run `tool args…` with no input, treating non-zero exit as failure.
pub(super) fn run(tool: &'static str, args: &[&str]) -> Result<(), ClipboardError> {
    let status = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| ClipboardError::Spawn { tool, source })?;

    if status.success() {
        Ok(())
    } else {
        Err(ClipboardError::Exit {
            tool,
            status: status.to_string(),
        })
    }
}

/// Decode helper output as text; empty output counts as absent.
pub(super) fn into_text(bytes: Option<Vec<u8>>) -> Option<String> {
    bytes
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_is_no_text() {
        assert_eq!(into_text(Some(Vec::new())), None);
        assert_eq!(into_text(None), None);
        assert_eq!(into_text(Some(b"hi".to_vec())).as_deref(), Some("hi"));
    }

    #[test]
    fn missing_tool_is_spawn_error() {
        let err = read("scrivd-definitely-not-installed", &[]).unwrap_err();
        assert!(matches!(err, ClipboardError::Spawn { .. }));
    }

    #[test]
    fn nonzero_exit_reads_as_none() {
        assert_eq!(read("false", &[]).unwrap(), None);
    }

    #[test]
    fn feed_reports_exit_status() {
        assert!(feed("cat", &[], b"data").is_ok());
        assert!(matches!(
            feed("false", &[], b""),
            Err(ClipboardError::Exit { .. }) | Err(ClipboardError::Io { .. })
        ));
    }
}
