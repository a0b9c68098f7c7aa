use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use harness::error::HarnessError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the runner binary.
///
/// Wraps [`HarnessError`] for scenario declaration errors and provides variants for
/// process-level failures.
#[derive(Debug)]
pub enum RunnerError {
    /// Scenario declaration or harness error raised outside a scenario run.
    Harness(HarnessError),
    /// Configuration or tracing setup error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// Report serialization error.
    Report(serde_json::Error, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
    /// The scenario ran to a verdict other than pass.
    ScenarioFailed { name: String, verdict: &'static str },
}

impl RunnerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            RunnerError::Harness(_) => "harness error",
            RunnerError::Config(_, _) => "configuration error",
            RunnerError::Report(_, _) => "report error",
            RunnerError::Io(_, _) => "i/o error",
            RunnerError::ScenarioFailed { .. } => "scenario verdict",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            RunnerError::Harness(err) => err.backtrace(),
            RunnerError::Config(_, cb) => Some(&cb.0),
            RunnerError::Report(_, cb) => Some(&cb.0),
            RunnerError::Io(_, cb) => Some(&cb.0),
            RunnerError::ScenarioFailed { .. } => None,
        }
    }

    /// Creates a configuration error from any boxed source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        RunnerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Exit status reported to the shell: `2` for a failed verdict, `1` for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunnerError::ScenarioFailed { verdict, .. } if *verdict == "fail" => 2,
            _ => 1,
        }
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("runner failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {}\n", self));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Harness(err) => write!(f, "{err}"),
            RunnerError::Config(source, _) => write!(f, "configuration error: {source}"),
            RunnerError::Report(source, _) => write!(f, "report error: {source}"),
            RunnerError::Io(source, _) => write!(f, "i/o error: {source}"),
            RunnerError::ScenarioFailed { name, verdict } => {
                write!(f, "scenario `{name}` finished with verdict `{verdict}`")
            }
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunnerError::Harness(err) => err.source(),
            RunnerError::Config(source, _) => Some(source.as_ref()),
            RunnerError::Report(source, _) => Some(source),
            RunnerError::Io(source, _) => Some(source),
            RunnerError::ScenarioFailed { .. } => None,
        }
    }
}

impl From<HarnessError> for RunnerError {
    fn from(err: HarnessError) -> Self {
        RunnerError::Harness(err)
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::Report(err, CapturedBacktrace::capture())
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(err, CapturedBacktrace::capture())
    }
}

#[cfg(test)]
mod tests {
    use harness::error::ErrorKind;
    use harness::harness_error;

    use super::*;

    #[test]
    fn failed_verdicts_exit_with_two() {
        let err = RunnerError::ScenarioFailed {
            name: "basic".into(),
            verdict: "fail",
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.category(), "scenario verdict");

        let err = RunnerError::ScenarioFailed {
            name: "basic".into(),
            verdict: "aborted",
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn report_lists_category_and_error() {
        let err = RunnerError::from(harness_error!(
            ErrorKind::InvalidScenario,
            "Worker ids must be dense from 1",
            "insert"
        ));
        let report = err.render_report();

        assert!(report.starts_with("runner failed\n"));
        assert!(report.contains("category: harness error\n"));
        assert!(report.contains("Worker ids must be dense from 1"));
    }
}
