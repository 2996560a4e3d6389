// src/backend.rs - runs scripts on the external geometry server
use crate::config::BackendConfig;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStderr, Command};
use tokio::time::{interval_at, Instant};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Geometry server is not a file: {0}")]
    NotAFile(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Geometry server made no progress for {0} seconds")]
    Timeout(u64),
    #[error("Geometry server exited with {0:?}")]
    Exit(Option<i32>),
    #[error("Invalid server response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Geometry server reported an error: {0}")]
    Server(Value),
}

pub type ProgressFn = Box<dyn FnMut(f64) + Send>;

/// Invokes `<server> -s <script> -p`, with JSON in on stdin and JSON out on
/// stdout. Progress arrives on stderr as `progress <fraction>` lines.
#[derive(Debug, Clone)]
pub struct GeometryBackend {
    server: PathBuf,
    scripts_dir: PathBuf,
    timeout_secs: u64,
}

impl GeometryBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            server: config.server_path.clone(),
            scripts_dir: config.scripts_dir.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn server(&self) -> &Path {
        &self.server
    }

    /// Checks the configured server path points at a file.
    pub fn verify(&self) -> Result<(), BackendError> {
        match std::fs::metadata(&self.server) {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(BackendError::NotAFile(self.server.clone())),
            Err(e) => {
                tracing::error!("Geometry server path {} is not usable: {}", self.server.display(), e);
                Err(BackendError::NotAFile(self.server.clone()))
            }
        }
    }

    pub async fn hello(&self) -> Result<Value, BackendError> {
        self.invoke("hello.lua", None, None).await
    }

    pub async fn invoke(
        &self,
        script: &str,
        input: Option<&Value>,
        mut progress: Option<ProgressFn>,
    ) -> Result<Value, BackendError> {
        let script = self.scripts_dir.join(script);
        let mut child = Command::new(&self.server)
            .arg("-s")
            .arg(&script)
            .arg("-p")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!("Started {} for {}", self.server.display(), script.display());

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = input {
                let body = serde_json::to_string(input)?;
                tracing::debug!("Geometry server input: {}", body);
                stdin.write_all(body.as_bytes()).await?;
            }
        }

        let stdout = child.stdout.take();
        let collector = tokio::spawn(async move {
            let mut out = String::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_string(&mut out).await?;
            }
            Ok::<_, std::io::Error>(out)
        });
        let mut stderr = child.stderr.take().map(|e| BufReader::new(e).lines());

        let second = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + second, second);
        let mut idle = 0;
        let status = loop {
            tokio::select! {
                line = next_line(&mut stderr) => match line {
                    Some(line) => {
                        if report(&line, &mut progress) {
                            idle = 0;
                        }
                    }
                    None => stderr = None,
                },
                _ = ticker.tick() => {
                    idle += 1;
                    if idle >= self.timeout_secs {
                        tracing::debug!("Killing geometry server after {} idle seconds", idle);
                        child.kill().await?;
                        collector.abort();
                        return Err(BackendError::Timeout(self.timeout_secs));
                    }
                }
                status = child.wait() => break status?,
            }
        };

        // Lines written just before exit may still be buffered.
        if let Some(mut lines) = stderr.take() {
            while let Ok(Some(line)) = lines.next_line().await {
                report(&line, &mut progress);
            }
        }

        let out = collector.await.map_err(std::io::Error::other)??;
        tracing::debug!("Geometry server exited with {}: {}", status, out);
        if !status.success() {
            return Err(BackendError::Exit(status.code()));
        }
        parse_response(&out)
    }
}

fn report(line: &str, progress: &mut Option<ProgressFn>) -> bool {
    tracing::debug!("Update from geometry server: {}", line);
    match parse_progress(line) {
        Some(value) => {
            if let Some(progress) = progress.as_mut() {
                progress(value);
            }
            true
        }
        None => false,
    }
}

async fn next_line(lines: &mut Option<Lines<BufReader<ChildStderr>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// `progress 0.25` -> 0.25
pub fn parse_progress(line: &str) -> Option<f64> {
    let mut words = line.split(' ');
    if words.next()? != "progress" {
        return None;
    }
    words.next()?.trim().parse().ok()
}

/// Decodes the server's stdout. A two element array is `[result, error]`.
pub fn parse_response(out: &str) -> Result<Value, BackendError> {
    let out = if out.trim().is_empty() { "null" } else { out };
    let response: Value = serde_json::from_str(out).map_err(|e| {
        tracing::error!("Invalid server response: {}", out);
        e
    })?;
    match response {
        Value::Array(mut pair) if pair.len() == 2 => {
            let error = pair.pop().unwrap_or(Value::Null);
            match pair.pop() {
                Some(Value::Null | Value::Bool(false)) | None => Err(BackendError::Server(error)),
                Some(result) => Ok(result),
            }
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_lines() {
        assert_eq!(parse_progress("progress 0.5"), Some(0.5));
        assert_eq!(parse_progress("progress 1\r"), Some(1.0));
        assert_eq!(parse_progress("loading mesh"), None);
        assert_eq!(parse_progress("progress"), None);
    }

    #[test]
    fn result_error_pairs() {
        assert_eq!(parse_response(r#"[{"ok": 1}, null]"#).unwrap(), json!({"ok": 1}));
        match parse_response(r#"[null, "mesh is not manifold"]"#) {
            Err(BackendError::Server(error)) => assert_eq!(error, json!("mesh is not manifold")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_response(r#"[1, 2, 3]"#).unwrap(), json!([1, 2, 3]));
        assert_eq!(parse_response("").unwrap(), Value::Null);
        assert!(matches!(parse_response("{oops"), Err(BackendError::InvalidResponse(_))));
    }
}
