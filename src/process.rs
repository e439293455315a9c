//! External converters as explicit argument vectors.
//!
//! Every converter (bitmap extractor, raster normaliser, wavelet compressor,
//! XSLT processor) is described by an [`Invocation`]: a program, a list of
//! arguments, and extra environment variables. No shell is involved, so
//! titles and paths are passed through verbatim and cannot inject commands.
//!
//! Execution goes through the [`ProcessRunner`] trait. The production
//! [`TokioProcessRunner`] spawns the child and awaits it to completion;
//! tests substitute a runner that records invocations and fakes outputs.

use crate::error::ItemError;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, error, warn};

/// One external program call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Short program name for log lines and errors.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// The argument following `flag`, if any.
    pub fn value_after(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// Human-readable rendering for debug logs. Not meant to be re-parsed.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// `-xsl:` + path, `-o:` + path, and friends.
pub fn prefixed(prefix: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(prefix);
    arg.push(path.as_os_str());
    arg
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an [`Invocation`] to completion.
///
/// Implementations must be `Send + Sync` so a single runner can be shared by
/// every stage behind an `Arc`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput>;
}

/// Spawns real child processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        let output = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run `invocation`, log its streams, and map a non-zero exit to an error.
///
/// Standard output goes to the debug log. Standard error is logged as a
/// warning when the program succeeded and as an error when it did not.
pub async fn run_logged(
    runner: &dyn ProcessRunner,
    invocation: &Invocation,
) -> Result<(), ItemError> {
    let program = invocation.program_name();
    debug!(command = %invocation.display(), "Running {program}");

    let output = runner
        .run(invocation)
        .await
        .map_err(|source| ItemError::ProcessSpawn {
            program: program.clone(),
            source,
        })?;
    debug!(exit = ?output.code, "{program} finished");

    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
        debug!("{program}: {line}");
    }
    let success = output.success();
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        if success {
            warn!("{program}: {line}");
        } else {
            error!("{program}: {line}");
        }
    }

    if success {
        Ok(())
    } else {
        Err(ItemError::ProcessFailed {
            program,
            code: output.code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRunner(std::io::Result<ProcessOutput>);

    #[async_trait]
    impl ProcessRunner for FixedRunner {
        async fn run(&self, _invocation: &Invocation) -> std::io::Result<ProcessOutput> {
            match &self.0 {
                Ok(out) => Ok(out.clone()),
                Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    #[test]
    fn invocation_builds_argument_vector() {
        let inv = Invocation::new("/usr/bin/pdfimages")
            .arg("in.pdf")
            .args(["-o", "out dir/x"])
            .env("LD_LIBRARY_PATH", "/opt/lib");
        assert_eq!(inv.program_name(), "pdfimages");
        assert_eq!(inv.args.len(), 3);
        assert_eq!(inv.value_after("-o"), Some(OsStr::new("out dir/x")));
        assert_eq!(inv.value_after("-missing"), None);
        assert_eq!(inv.env[0].0, OsString::from("LD_LIBRARY_PATH"));
    }

    #[test]
    fn prefixed_joins_without_separator() {
        assert_eq!(
            prefixed("-xsl:", Path::new("/lib/folder2mets.xsl")),
            OsString::from("-xsl:/lib/folder2mets.xsl")
        );
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_item_error() {
        let runner = FixedRunner(Ok(ProcessOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "Syntax Error: broken xref".into(),
        }));
        let err = run_logged(&runner, &Invocation::new("pdfimages"))
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::ProcessFailed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let runner = FixedRunner(Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        )));
        let err = run_logged(&runner, &Invocation::new("kdu_compress"))
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::ProcessSpawn { .. }));
    }

    #[tokio::test]
    async fn zero_exit_succeeds() {
        let runner = FixedRunner(Ok(ProcessOutput {
            code: Some(0),
            stdout: "ok".into(),
            stderr: String::new(),
        }));
        assert!(run_logged(&runner, &Invocation::new("convert")).await.is_ok());
    }
}
