//! Shell interpolation helpers for guest-side filesystem commands.
//!
//! Several filesystem operations are implemented as shelled-out commands in
//! the guest (`rm -rf`, `mkdir -p`, `mv`, ...). Any path that reaches a
//! command line goes through [`clean_path`] and [`single_quote`] first:
//! paths are normalized, forced absolute, wrapped in single quotes, and
//! embedded quotes are escaped as `'\''`.

use crate::{HyperfleetError, HyperfleetResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalizes a guest path: collapses `.`/empty segments, resolves `..`
/// lexically, and forces a leading `/`.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Wraps a value in single quotes, escaping embedded single quotes as
/// `'\''` so the guest shell treats the whole value as one literal word.
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Splits a command string into arguments, honoring single/double quotes and
/// backslash escapes.
///
/// `bash -c "echo 'hello world'"` -> `["bash", "-c", "echo 'hello world'"]`
pub fn parse_command(command: &str) -> HyperfleetResult<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        if ch == '\\' {
            escaped = true;
            continue;
        }

        if let Some(q) = quote {
            if ch == q {
                quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }

        match ch {
            '"' | '\'' => quote = Some(ch),
            ' ' | '\t' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }

    if quote.is_some() {
        return Err(HyperfleetError::InvalidInput(
            "syntax error: unclosed quote".to_string(),
        ));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_path_forces_absolute() {
        assert_eq!(clean_path("root/app"), "/root/app");
        assert_eq!(clean_path("/root/app"), "/root/app");
        assert_eq!(clean_path("/root//app/."), "/root/app");
        assert_eq!(clean_path("/root/../etc"), "/etc");
        assert_eq!(clean_path("../../etc"), "/etc");
        assert_eq!(clean_path(""), "/");
    }

    #[test]
    fn test_single_quote_escapes_quotes() {
        assert_eq!(single_quote("/tmp/plain"), "'/tmp/plain'");
        assert_eq!(single_quote("/tmp/o'brien"), "'/tmp/o'\\''brien'");
        // A value consisting solely of a quote still round-trips.
        assert_eq!(single_quote("'"), "''\\'''");
        // Shell metacharacters are inert inside single quotes.
        assert_eq!(single_quote("/tmp/$(reboot)"), "'/tmp/$(reboot)'");
    }

    #[test]
    fn test_parse_command_basic() {
        let args = parse_command("ls -la /tmp").unwrap();
        assert_eq!(args, vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn test_parse_command_quotes() {
        let args = parse_command(r#"bash -c "echo 'hello world'""#).unwrap();
        assert_eq!(args, vec!["bash", "-c", "echo 'hello world'"]);
    }

    #[test]
    fn test_parse_command_escapes() {
        let args = parse_command(r"echo hello\ world").unwrap();
        assert_eq!(args, vec!["echo", "hello world"]);
    }

    #[test]
    fn test_parse_command_unclosed_quote() {
        assert!(parse_command("echo 'oops").is_err());
    }

    #[test]
    fn test_parse_command_collapses_whitespace() {
        let args = parse_command("  du\t-sh   /root ").unwrap();
        assert_eq!(args, vec!["du", "-sh", "/root"]);
    }
}
