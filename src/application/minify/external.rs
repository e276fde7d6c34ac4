use std::{
    fs::File,
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    string::FromUtf8Error,
    time::Instant,
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{config::ExternalCommand, domain::options::MinifyOptions};

/// Argument placeholder replaced with the path of a file holding the input.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Error)]
pub enum ExternalMinifierError {
    #[error("failed to stage minifier input: {0}")]
    Io(io::Error),
    #[error("minifier command unavailable: {0}")]
    NotFound(io::Error),
    #[error("minifier command failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("minifier produced non UTF-8 output: {0}")]
    Output(#[from] FromUtf8Error),
}

/// Runs a command-line minifier over one text.
///
/// The input is written to a temporary file. When an argument contains `{input}`
/// the file path is substituted there; otherwise the file is piped to stdin. The
/// minified text is read from stdout. A non-zero exit is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMinifier {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExternalMinifier {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_settings(command: &ExternalCommand) -> Self {
        Self::new(command.program.clone(), command.args.clone())
    }

    pub fn identity(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Extra arguments may be passed per call as a string array under `args`.
    pub fn minify(
        &self,
        input: &str,
        options: &MinifyOptions,
    ) -> Result<String, ExternalMinifierError> {
        let started_at = Instant::now();

        let mut input_file = NamedTempFile::new().map_err(ExternalMinifierError::Io)?;
        input_file
            .write_all(input.as_bytes())
            .map_err(ExternalMinifierError::Io)?;
        input_file.flush().map_err(ExternalMinifierError::Io)?;

        let input_path = input_file.path().display().to_string();
        let mut uses_path = false;
        let mut command = Command::new(&self.program);
        for arg in self.args.iter().chain(extra_args(options).iter()) {
            if arg.contains(INPUT_PLACEHOLDER) {
                uses_path = true;
                command.arg(arg.replace(INPUT_PLACEHOLDER, &input_path));
            } else {
                command.arg(arg);
            }
        }
        let stdin = if uses_path {
            Stdio::null()
        } else {
            Stdio::from(File::open(input_file.path()).map_err(ExternalMinifierError::Io)?)
        };

        let output = command
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target = "tessera::minify::external",
                    op = "external::minify",
                    result = "error",
                    program = %self.program.display(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn minifier command"
                );
                if err.kind() == ErrorKind::NotFound {
                    ExternalMinifierError::NotFound(err)
                } else {
                    ExternalMinifierError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "tessera::minify::external",
                op = "external::minify",
                result = "error",
                program = %self.program.display(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "minifier_cli",
                stderr = %stderr,
                "Minifier command failed"
            );
            return Err(ExternalMinifierError::Cli { exit_code, stderr });
        }

        let minified = String::from_utf8(output.stdout)?;
        debug!(
            target = "tessera::minify::external",
            op = "external::minify",
            result = "ok",
            program = %self.program.display(),
            input_bytes = input.len(),
            output_bytes = minified.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Minifier command finished"
        );
        Ok(minified)
    }
}

fn extra_args(options: &MinifyOptions) -> Vec<String> {
    options
        .get("args")
        .and_then(|value| value.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    #[test]
    fn pipes_input_through_stdin() {
        let dir = TempDir::new().expect("temp dir");
        let program = script(dir.path(), "squash", "#!/bin/sh\ntr -d ' \\n'\n");

        let minifier = ExternalMinifier::new(program, Vec::new());
        let out = minifier
            .minify("a { color : red ; }\n", &MinifyOptions::new())
            .expect("minified");
        assert_eq!(out, "a{color:red;}");
    }

    #[test]
    fn substitutes_input_path_and_extra_args() {
        let dir = TempDir::new().expect("temp dir");
        let program = script(
            dir.path(),
            "echo-args",
            "#!/bin/sh\nfile=\"$1\"\nshift\nprintf '%s|' \"$@\"\ncat \"$file\"\n",
        );

        let minifier = ExternalMinifier::new(program, vec![INPUT_PLACEHOLDER.to_string()]);
        let options = MinifyOptions::new().with("args", serde_json::json!(["--level", "2"]));
        let out = minifier.minify("body", &options).expect("minified");
        assert_eq!(out, "--level|2|body");
    }

    #[test]
    fn surfaces_cli_errors() {
        let dir = TempDir::new().expect("temp dir");
        let program = script(dir.path(), "broken", "#!/bin/sh\necho boom >&2\nexit 3\n");

        let err = ExternalMinifier::new(program, Vec::new())
            .minify("x", &MinifyOptions::new())
            .expect_err("expected failure");
        match err {
            ExternalMinifierError::Cli { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("boom"), "stderr did not propagate: {stderr}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = ExternalMinifier::new("/nonexistent/tessera-minifier", Vec::new())
            .minify("x", &MinifyOptions::new())
            .expect_err("expected failure");
        assert!(matches!(err, ExternalMinifierError::NotFound(_)));
    }
}
