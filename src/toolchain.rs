use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const DEFAULT_FORMATTER: &str = "clang-format-12 -i";
pub const DEFAULT_SCHEMA_COMPILER: &str = "flatc";

#[derive(Debug)]
pub enum ToolchainError {
    InvalidArgument(String),
    Spawn {
        program: String,
        args: Vec<String>,
        source: std::io::Error,
    },
    CommandFailed {
        program: String,
        args: Vec<String>,
        status: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for ToolchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolchainError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            ToolchainError::Spawn {
                program,
                args,
                source,
            } => write!(
                f,
                "could not run {} {}: {} (is it installed?)",
                program,
                args.join(" "),
                source
            ),
            ToolchainError::CommandFailed {
                program,
                args,
                status,
                stderr,
            } => write!(
                f,
                "command failed: {} {} (status: {:?}){}{}",
                program,
                args.join(" "),
                status,
                if stderr.is_empty() { "" } else { "\nstderr:\n" },
                stderr
            ),
        }
    }
}

impl std::error::Error for ToolchainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ToolchainError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Program plus leading arguments, e.g. `clang-format-12 -i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn parse(command_line: &str) -> Result<Self, ToolchainError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            ToolchainError::InvalidArgument("empty command line".to_string())
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn full_args(&self, extra: &[String]) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend_from_slice(extra);
        args
    }

    pub fn run(&self, extra: &[String]) -> Result<(), ToolchainError> {
        run_checked(&self.program, &self.full_args(extra))
    }

    pub fn capture(&self, extra: &[String]) -> Result<std::process::Output, ToolchainError> {
        run_capture(&self.program, &self.full_args(extra))
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn run_checked(program: &str, args: &[String]) -> Result<(), ToolchainError> {
    debug!("Running {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| ToolchainError::Spawn {
            program: program.to_string(),
            args: args.to_vec(),
            source,
        })?;
    if status.success() {
        return Ok(());
    }
    Err(ToolchainError::CommandFailed {
        program: program.to_string(),
        args: args.to_vec(),
        status: status.code(),
        stderr: String::new(),
    })
}

fn run_capture(program: &str, args: &[String]) -> Result<std::process::Output, ToolchainError> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ToolchainError::Spawn {
            program: program.to_string(),
            args: args.to_vec(),
            source,
        })?;
    if output.status.success() {
        return Ok(output);
    }
    Err(ToolchainError::CommandFailed {
        program: program.to_string(),
        args: args.to_vec(),
        status: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Formats generated sources in place. A failure aborts the generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFormatter {
    command: ExternalCommand,
}

impl SourceFormatter {
    pub fn new(command_line: &str) -> Result<Self, ToolchainError> {
        Ok(Self {
            command: ExternalCommand::parse(command_line)?,
        })
    }

    pub fn command(&self) -> &ExternalCommand {
        &self.command
    }

    pub fn format_in_place(&self, file: &Path) -> Result<(), ToolchainError> {
        self.command
            .run(&[file.to_string_lossy().into_owned()])
    }
}

impl Default for SourceFormatter {
    fn default() -> Self {
        Self {
            command: ExternalCommand {
                program: "clang-format-12".to_string(),
                args: vec!["-i".to_string()],
            },
        }
    }
}

/// Compiles a JSON model description into a binary flatbuffer with `flatc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCompiler {
    command: ExternalCommand,
}

impl SchemaCompiler {
    pub fn new(command_line: &str) -> Result<Self, ToolchainError> {
        Ok(Self {
            command: ExternalCommand::parse(command_line)?,
        })
    }

    /// Runs `flatc -o <out_dir> -c -b <schema> <json>` and returns the path of the
    /// binary file. `extension` is the `file_extension` the schema declares.
    pub fn compile(
        &self,
        json_input: &Path,
        schema: Option<&Path>,
        out_dir: &Path,
        extension: &str,
    ) -> Result<PathBuf, ToolchainError> {
        let Some(schema) = schema else {
            return Err(ToolchainError::InvalidArgument(
                "A schema file is required.".to_string(),
            ));
        };
        if !schema.exists() {
            return Err(ToolchainError::InvalidArgument(format!(
                "schema file {} does not exist",
                schema.display()
            )));
        }

        self.command.run(&[
            "-o".to_string(),
            out_dir.to_string_lossy().into_owned(),
            "-c".to_string(),
            "-b".to_string(),
            schema.to_string_lossy().into_owned(),
            json_input.to_string_lossy().into_owned(),
        ])?;

        let stem = json_input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(out_dir.join(format!("{}.{}", stem, extension)))
    }
}

impl Default for SchemaCompiler {
    fn default() -> Self {
        Self {
            command: ExternalCommand {
                program: DEFAULT_SCHEMA_COMPILER.to_string(),
                args: Vec::new(),
            },
        }
    }
}
