//! Resolution of a user-supplied command string into an executable invocation
//!
//! The user edits a single free-form string such as
//! `-server=1.2.3.4:100 -vkey=abc -type=tcp`. Only flag tokens survive; the
//! executable itself always comes from the install location, never from the
//! string.

use crate::command::Command;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of the flag controlling the client's debug mode
pub const DEBUG_FLAG_PREFIX: &str = "-debug=";
/// Appended when the command string does not set the debug flag
pub const DEFAULT_DEBUG_FLAG: &str = "-debug=false";
/// Prefix of the flag selecting the client's log destination
pub const LOG_FLAG_PREFIX: &str = "-log=";
/// Appended when the command string does not set the log flag, so output reaches the pipe
pub const DEFAULT_LOG_FLAG: &str = "-log=stdout";

/// Where the supervised binary is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryLocation {
    /// Directory holding native binaries shipped with the host
    pub library_dir: PathBuf,
    /// File name of the binary inside `library_dir`
    pub binary_name: String,
}

impl BinaryLocation {
    /// Create a new binary location
    pub fn new(library_dir: impl Into<PathBuf>, binary_name: impl Into<String>) -> Self {
        Self {
            library_dir: library_dir.into(),
            binary_name: binary_name.into(),
        }
    }

    /// Full path of the executable
    pub fn executable_path(&self) -> PathBuf {
        self.library_dir.join(&self.binary_name)
    }
}

/// A fully resolved invocation: executable, ordered arguments, working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable path
    pub program: PathBuf,
    /// Arguments, without the program itself
    pub args: Vec<String>,
    /// Working directory the process is started in
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Resolve a command string against the install location
    pub fn resolve(location: &BinaryLocation, command: &str, working_dir: Option<&Path>) -> Self {
        Self {
            program: location.executable_path(),
            args: parse_arguments(command),
            working_dir: working_dir.map(Path::to_path_buf),
        }
    }

    /// `[program] + args`
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Build the command used to spawn this invocation
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Extract the process arguments from a command string
///
/// Whitespace-separated tokens beginning with `-` are kept in order, every
/// other token is discarded. `-debug=false` and `-log=stdout` are appended
/// unless a token with the same prefix is already present.
pub fn parse_arguments(command: &str) -> Vec<String> {
    let mut args: Vec<String> = command
        .split_whitespace()
        .filter(|token| token.starts_with('-'))
        .map(str::to_string)
        .collect();

    if !args.iter().any(|arg| arg.starts_with(DEBUG_FLAG_PREFIX)) {
        args.push(DEFAULT_DEBUG_FLAG.to_string());
    }
    if !args.iter().any(|arg| arg.starts_with(LOG_FLAG_PREFIX)) {
        args.push(DEFAULT_LOG_FLAG.to_string());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_flag_tokens_are_discarded() {
        let args = parse_arguments("junk -server=1.2.3.4:100 more -vkey=abc");
        assert_eq!(
            args,
            vec!["-server=1.2.3.4:100", "-vkey=abc", "-debug=false", "-log=stdout"]
        );
    }

    #[test]
    fn test_explicit_debug_and_log_flags_are_kept() {
        let args = parse_arguments("-log=/tmp/npc.log -server=a:1 -debug=true");
        assert_eq!(args, vec!["-log=/tmp/npc.log", "-server=a:1", "-debug=true"]);
    }

    #[test]
    fn test_whitespace_runs_and_empty_input() {
        assert_eq!(
            parse_arguments("  \t-vkey=k\n\n  -type=tcp  "),
            vec!["-vkey=k", "-type=tcp", "-debug=false", "-log=stdout"]
        );
        assert_eq!(parse_arguments(""), vec!["-debug=false", "-log=stdout"]);
    }

    #[test]
    fn test_flag_prefix_must_match_exactly() {
        // `-debugger` and `-logging` do not count as the debug/log flags
        let args = parse_arguments("-debugger -logging=1");
        assert_eq!(
            args,
            vec!["-debugger", "-logging=1", "-debug=false", "-log=stdout"]
        );
    }

    #[test]
    fn test_resolve_builds_argv() {
        let location = BinaryLocation::new("/data/app/lib/arm64", "libnpc.so");
        let spec = LaunchSpec::resolve(&location, "npc -server=x:1", Some(Path::new("/data/files")));

        assert_eq!(spec.program, PathBuf::from("/data/app/lib/arm64/libnpc.so"));
        assert_eq!(
            spec.argv(),
            vec![
                "/data/app/lib/arm64/libnpc.so",
                "-server=x:1",
                "-debug=false",
                "-log=stdout"
            ]
        );

        let cmd = spec.to_command();
        assert_eq!(cmd.get_program(), spec.program.as_path());
        assert_eq!(cmd.get_args().len(), 3);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/data/files")));
    }
}
