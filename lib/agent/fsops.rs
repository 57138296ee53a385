//! Guest filesystem operations.
//!
//! A handful of operations map to native agent endpoints (`/ls`, `/files`,
//! `/upload`, `/watch`); the rest are shelled-out commands executed through
//! the agent's `/exec` endpoint. Every path that reaches a command line is
//! cleaned, forced absolute, and single-quoted with `'\''` escaping.

use std::path::Path;

use axum::body::Body;
use hyper::{body::Incoming, Method, Response};
use serde_json::json;

use crate::{
    utils::{clean_path, single_quote},
    HyperfleetError, HyperfleetResult,
};

use super::AgentClient;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Cap on head/tail line counts.
const MAX_HEAD_TAIL_LINES: u32 = 10_000;

/// Cap on `find` results for file search.
const SEARCH_RESULT_LIMIT: u32 = 100;

//--------------------------------------------------------------------------------------------------
// Functions: Agent-native endpoints
//--------------------------------------------------------------------------------------------------

/// Lists a directory via the agent's native `/ls` endpoint.
pub async fn list_files(
    client: &AgentClient,
    sandbox_id: &str,
    path: &str,
) -> HyperfleetResult<Response<Incoming>> {
    let target = format!("/ls?path={}", urlencode(path));
    client.request(Method::GET, sandbox_id, &target).await
}

/// Streams a file out of the sandbox via `/files/<path>`.
pub async fn download_file(
    client: &AgentClient,
    sandbox_id: &str,
    path: &str,
) -> HyperfleetResult<Response<Incoming>> {
    let target = format!("/files{}", clean_path(path));
    client.request(Method::GET, sandbox_id, &target).await
}

/// Streams a file into the sandbox via `/upload/<path>`.
pub async fn upload_file(
    client: &AgentClient,
    sandbox_id: &str,
    path: &str,
    body: Body,
    content_type: Option<&str>,
) -> HyperfleetResult<Response<Incoming>> {
    let target = format!("/upload{}", clean_path(path));
    let content_type = content_type.unwrap_or("application/octet-stream");
    client
        .request_raw(Method::PUT, sandbox_id, &target, body, Some(content_type))
        .await
}

/// Starts a filesystem watch session via `/watch`.
pub async fn start_watch(
    client: &AgentClient,
    sandbox_id: &str,
    path: &str,
    recursive: bool,
    ignore_hidden: bool,
) -> HyperfleetResult<Response<Incoming>> {
    let payload = json!({
        "action": "start",
        "path": path,
        "recursive": recursive,
        "ignoreHidden": ignore_hidden,
    });
    client
        .request_json(Method::POST, sandbox_id, "/watch", &payload)
        .await
}

/// Runs a shell command string through the agent's `/exec` endpoint.
pub async fn exec_shell(
    client: &AgentClient,
    sandbox_id: &str,
    cmd: &str,
) -> HyperfleetResult<Response<Incoming>> {
    let payload = json!({ "cmd": cmd });
    client
        .request_json(Method::POST, sandbox_id, "/exec", &payload)
        .await
}

//--------------------------------------------------------------------------------------------------
// Functions: Command builders
//--------------------------------------------------------------------------------------------------

/// `rm -rf` a path.
pub fn remove_cmd(path: &str) -> String {
    format!("rm -rf {}", single_quote(&clean_path(path)))
}

/// `mkdir -p` a directory.
pub fn mkdir_cmd(path: &str) -> String {
    format!("mkdir -p {}", single_quote(&clean_path(path)))
}

/// Create a blank file, making parent directories as needed.
pub fn create_file_cmd(path: &str) -> String {
    let clean = clean_path(path);
    format!(
        "mkdir -p {} && touch {}",
        single_quote(&parent_dir(&clean)),
        single_quote(&clean)
    )
}

/// Move/rename, making the destination's parent as needed.
pub fn move_cmd(source: &str, dest: &str) -> String {
    let src = clean_path(source);
    let dst = clean_path(dest);
    format!(
        "mkdir -p {} && mv -f {} {}",
        single_quote(&parent_dir(&dst)),
        single_quote(&src),
        single_quote(&dst)
    )
}

/// Recursive copy, making the destination's parent as needed.
pub fn copy_cmd(source: &str, dest: &str) -> String {
    let src = clean_path(source);
    let dst = clean_path(dest);
    format!(
        "mkdir -p {} && cp -r {} {}",
        single_quote(&parent_dir(&dst)),
        single_quote(&src),
        single_quote(&dst)
    )
}

/// `stat` with a JSON output template.
pub fn stat_cmd(path: &str) -> String {
    format!(
        "stat -c '{{\"path\":\"%n\",\"size\":%s,\"mode\":\"%f\",\"mtime\":%Y,\"type\":\"%F\"}}' {}",
        single_quote(&clean_path(path))
    )
}

/// First or last `lines` lines of a file.
pub fn head_tail_cmd(path: &str, lines: u32, head: bool) -> String {
    let lines = lines.clamp(1, MAX_HEAD_TAIL_LINES);
    let op = if head { "head" } else { "tail" };
    format!("{} -n {} {}", op, lines, single_quote(&clean_path(path)))
}

/// `chmod` with a caller-supplied mode string.
pub fn chmod_cmd(path: &str, mode: &str) -> String {
    format!(
        "chmod {} {}",
        single_quote(mode),
        single_quote(&clean_path(path))
    )
}

/// `du -sh` of a directory.
pub fn du_cmd(path: &str) -> String {
    format!("du -sh {}", single_quote(&clean_path(path)))
}

/// Bounded filename search under a directory.
pub fn search_cmd(dir: &str, pattern: &str) -> String {
    format!(
        "find {} -name '*{}*' -type f 2>/dev/null | head -{}",
        single_quote(&clean_path(dir)),
        pattern.replace('\'', "'\\''"),
        SEARCH_RESULT_LIMIT
    )
}

/// Archive a file or directory as tar, tar.gz or zip.
pub fn compress_cmd(source: &str, format: &str) -> HyperfleetResult<String> {
    let clean = clean_path(source);
    let dir = parent_dir(&clean);
    let base = base_name(&clean);

    let cmd = match format {
        "tar" => format!(
            "tar -cf {} -C {} {}",
            single_quote(&format!("{}.tar", clean)),
            single_quote(&dir),
            single_quote(&base)
        ),
        "tar.gz" => format!(
            "tar -czf {} -C {} {}",
            single_quote(&format!("{}.tar.gz", clean)),
            single_quote(&dir),
            single_quote(&base)
        ),
        "zip" => format!(
            "zip -r {} {}",
            single_quote(&format!("{}.zip", clean)),
            single_quote(&clean)
        ),
        other => {
            return Err(HyperfleetError::InvalidInput(format!(
                "unsupported format: {}",
                other
            )))
        }
    };
    Ok(cmd)
}

/// Extract an archive into a destination directory, inferred from the
/// archive suffix.
pub fn extract_cmd(archive: &str, dest: &str) -> HyperfleetResult<String> {
    let archive = clean_path(archive);
    let dest = clean_path(dest);
    let dest_q = single_quote(&dest);
    let archive_q = single_quote(&archive);

    let cmd = if archive.ends_with(".tar.gz") || archive.ends_with(".tgz") {
        format!("mkdir -p {} && tar -xzf {} -C {}", dest_q, archive_q, dest_q)
    } else if archive.ends_with(".tar") {
        format!("mkdir -p {} && tar -xf {} -C {}", dest_q, archive_q, dest_q)
    } else if archive.ends_with(".zip") {
        format!("mkdir -p {} && unzip -q {} -d {}", dest_q, archive_q, dest_q)
    } else {
        return Err(HyperfleetError::InvalidInput(
            "unsupported archive format".to_string(),
        ));
    };
    Ok(cmd)
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn parent_dir(clean: &str) -> String {
    Path::new(clean)
        .parent()
        .map(|p| p.display().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string())
}

fn base_name(clean: &str) -> String {
    Path::new(clean)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_cmd_quotes_hostile_paths() {
        assert_eq!(remove_cmd("/tmp/a"), "rm -rf '/tmp/a'");
        // Embedded quote cannot break out of the quoting.
        assert_eq!(
            remove_cmd("/tmp/a'; reboot; '",),
            "rm -rf '/tmp/a'\\''; reboot; '\\'''"
        );
        // Relative paths are rooted before interpolation.
        assert_eq!(remove_cmd("tmp/a"), "rm -rf '/tmp/a'");
    }

    #[test]
    fn test_move_cmd_creates_destination_parent() {
        assert_eq!(
            move_cmd("/a/src.txt", "/b/c/dst.txt"),
            "mkdir -p '/b/c' && mv -f '/a/src.txt' '/b/c/dst.txt'"
        );
    }

    #[test]
    fn test_create_file_cmd_touches_after_mkdir() {
        assert_eq!(
            create_file_cmd("/data/logs/app.log"),
            "mkdir -p '/data/logs' && touch '/data/logs/app.log'"
        );
    }

    #[test]
    fn test_head_tail_cmd_clamps_lines() {
        assert_eq!(head_tail_cmd("/var/log/syslog", 10, true), "head -n 10 '/var/log/syslog'");
        assert_eq!(
            head_tail_cmd("/var/log/syslog", 1_000_000, false),
            "tail -n 10000 '/var/log/syslog'"
        );
    }

    #[test]
    fn test_search_cmd_escapes_pattern() {
        let cmd = search_cmd("/root", "a'b");
        assert!(cmd.contains("find '/root' -name '*a'\\''b*'"));
        assert!(cmd.ends_with("| head -100"));
    }

    #[test]
    fn test_compress_cmd_formats() {
        assert_eq!(
            compress_cmd("/data/app", "tar.gz").unwrap(),
            "tar -czf '/data/app.tar.gz' -C '/data' 'app'"
        );
        assert!(compress_cmd("/data/app", "rar").is_err());
    }

    #[test]
    fn test_extract_cmd_by_suffix() {
        assert_eq!(
            extract_cmd("/data/app.tar.gz", "/data/out").unwrap(),
            "mkdir -p '/data/out' && tar -xzf '/data/app.tar.gz' -C '/data/out'"
        );
        assert_eq!(
            extract_cmd("/data/app.zip", "/data/out").unwrap(),
            "mkdir -p '/data/out' && unzip -q '/data/app.zip' -d '/data/out'"
        );
        assert!(extract_cmd("/data/app.7z", "/data/out").is_err());
    }

    #[test]
    fn test_urlencode_keeps_path_separators() {
        assert_eq!(urlencode("/root/my dir"), "/root/my%20dir");
        assert_eq!(urlencode("/root/ok-._~"), "/root/ok-._~");
    }
}
