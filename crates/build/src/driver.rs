use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use wfctl_core::framing::{self, FramingError};
use wfctl_core::model::WorkflowLanguage;

use crate::language::detect_language;
use crate::runner::{self, Invocation};

/// Name of the intermediate file the Go and TypeScript toolchains write.
pub const BUILD_TMP_FILE: &str = ".wfctl_build_tmp.wasm";
/// Where `make build` is expected to leave its output, relative to the makefile.
pub const PREBUILT_OUTPUT: &str = "wasm/workflow.wasm";

const GO_ENV: &[(&str, &str)] = &[("GOOS", "wasip1"), ("GOARCH", "wasm"), ("CGO_ENABLED", "0")];

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{tool} is required for {purpose} but was not found in PATH{hint}")]
    ToolchainMissing {
        tool: &'static str,
        purpose: &'static str,
        hint: &'static str,
    },

    #[error("failed to compile workflow: {reason}\nbuild output:\n{output}")]
    CompileFailed { reason: String, output: String },

    #[error("workflow file not found: {0}")]
    WorkflowFileNotFound(PathBuf),

    #[error("unsupported workflow language for {0}; expected a .go, .ts or .wasm main file")]
    UnsupportedLanguage(PathBuf),

    #[error("no Makefile found in {0} or any parent directory")]
    MakefileNotFound(PathBuf),

    #[error("failed to read build output {path}: {source}")]
    ReadOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build produced an empty binary at {0}")]
    EmptyOutput(PathBuf),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

impl BuildError {
    fn missing(language: WorkflowLanguage) -> Self {
        match language {
            WorkflowLanguage::GolangWasm => Self::ToolchainMissing {
                tool: "go toolchain",
                purpose: "Go workflows",
                hint: "; install from https://go.dev/dl",
            },
            WorkflowLanguage::TypescriptWasm => Self::ToolchainMissing {
                tool: "bun",
                purpose: "TypeScript workflows",
                hint: "; install from https://bun.com/docs/installation",
            },
            WorkflowLanguage::PrebuiltWasm => Self::ToolchainMissing {
                tool: "make",
                purpose: "WASM workflows",
                hint: "",
            },
        }
    }
}

/// Removes the intermediate build file when dropped.
struct TempOutput(PathBuf);

impl Drop for TempOutput {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.0.display(), error = %e, "failed to remove build intermediate");
            }
        }
    }
}

/// Compiles workflows with whatever toolchains are found on a search path.
#[derive(Debug, Clone)]
pub struct BuildDriver {
    search_path: OsString,
}

impl Default for BuildDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildDriver {
    /// Driver that searches the process `PATH`.
    pub fn new() -> Self {
        Self {
            search_path: std::env::var_os("PATH").unwrap_or_default(),
        }
    }

    /// Driver that searches `search_path` instead of `PATH`.
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: search_path.into(),
        }
    }

    fn locate(&self, language: WorkflowLanguage) -> Result<PathBuf, BuildError> {
        let tool = match language {
            WorkflowLanguage::GolangWasm => "go",
            WorkflowLanguage::TypescriptWasm => "bun",
            WorkflowLanguage::PrebuiltWasm => "make",
        };
        runner::find_in_path(tool, &self.search_path).ok_or_else(|| BuildError::missing(language))
    }

    /// Compiles the workflow whose entry point is `main_file` inside `root_dir`
    /// into raw WASM.
    pub async fn compile(
        &self,
        root_dir: &Path,
        main_file: &Path,
        language: WorkflowLanguage,
    ) -> Result<Vec<u8>, BuildError> {
        let main_abs = root_dir.join(main_file);
        // A prebuilt main file only exists after `make build` has run.
        if language != WorkflowLanguage::PrebuiltWasm && !main_abs.is_file() {
            return Err(BuildError::WorkflowFileNotFound(main_abs));
        }
        let program = self.locate(language)?;

        info!(language = %language, main = %main_abs.display(), "compiling workflow");

        match language {
            WorkflowLanguage::GolangWasm => {
                let tmp = TempOutput(root_dir.join(BUILD_TMP_FILE));
                let args = [
                    OsString::from("build"),
                    OsString::from("-o"),
                    tmp.0.clone().into_os_string(),
                    OsString::from("-trimpath"),
                    OsString::from("-ldflags=-buildid= -w -s"),
                    OsString::from("."),
                ];
                run_toolchain(&program, &args, root_dir, GO_ENV).await?;
                read_output(&tmp.0)
            }
            WorkflowLanguage::TypescriptWasm => {
                let tmp = TempOutput(root_dir.join(BUILD_TMP_FILE));
                let args = [
                    OsString::from("cre-compile"),
                    main_file.as_os_str().to_os_string(),
                    tmp.0.clone().into_os_string(),
                ];
                run_toolchain(&program, &args, root_dir, &[]).await?;
                read_output(&tmp.0)
            }
            WorkflowLanguage::PrebuiltWasm => {
                let make_root = find_makefile_root(root_dir)?;
                run_toolchain(&program, &[OsString::from("build")], &make_root, &[]).await?;
                read_output(&make_root.join(PREBUILT_OUTPUT))
            }
        }
    }

    /// Detects the language of `workflow_path`, compiles it, and writes the framed
    /// binary next to `output_path`. Returns the path written.
    pub async fn build_framed(
        &self,
        workflow_path: &Path,
        output_path: &Path,
    ) -> Result<PathBuf, BuildError> {
        let language = detect_language(workflow_path)
            .ok_or_else(|| BuildError::UnsupportedLanguage(workflow_path.to_path_buf()))?;
        let (root_dir, main_file) = split_workflow_path(workflow_path)?;
        let wasm = self.compile(&root_dir, &main_file, language).await?;
        if !framing::is_wasm(&wasm) {
            tracing::warn!(path = %workflow_path.display(), "build output does not start with the WASM magic");
        }
        let framed = framing::frame(&wasm)?;
        let written = framing::write_framed(output_path, &framed)?;
        info!(
            path = %written.display(),
            wasm_bytes = wasm.len(),
            framed_bytes = framed.len(),
            "workflow compiled"
        );
        Ok(written)
    }
}

async fn run_toolchain(
    program: &Path,
    args: &[OsString],
    cwd: &Path,
    env: &[(&'static str, &'static str)],
) -> Result<(), BuildError> {
    debug!(program = %program.display(), ?args, cwd = %cwd.display(), "running toolchain");
    let out = runner::run_capture(&Invocation {
        program,
        args,
        cwd,
        env,
    })
    .await
    .map_err(|source| BuildError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    if !out.status.success() {
        return Err(BuildError::CompileFailed {
            reason: format!("{} exited with {}", display_name(program), out.status),
            output: out.combined,
        });
    }
    Ok(())
}

fn split_workflow_path(workflow_path: &Path) -> Result<(PathBuf, PathBuf), BuildError> {
    let not_found = || BuildError::WorkflowFileNotFound(workflow_path.to_path_buf());
    let abs = std::path::absolute(workflow_path).map_err(|_| not_found())?;
    let main = abs.file_name().ok_or_else(not_found)?;
    let root = abs.parent().ok_or_else(not_found)?;
    Ok((root.to_path_buf(), PathBuf::from(main)))
}

fn display_name(program: &Path) -> String {
    program
        .file_name()
        .unwrap_or(OsStr::new("toolchain"))
        .to_string_lossy()
        .into_owned()
}

fn read_output(path: &Path) -> Result<Vec<u8>, BuildError> {
    let wasm = std::fs::read(path).map_err(|source| BuildError::ReadOutput {
        path: path.to_path_buf(),
        source,
    })?;
    if wasm.is_empty() {
        return Err(BuildError::EmptyOutput(path.to_path_buf()));
    }
    Ok(wasm)
}

/// Walks up from `start` to the nearest directory holding a `Makefile`.
pub fn find_makefile_root(start: &Path) -> Result<PathBuf, BuildError> {
    let start = if start.as_os_str().is_empty() {
        Path::new(".")
    } else {
        start
    };
    let abs = std::path::absolute(start).map_err(|source| BuildError::ReadOutput {
        path: start.to_path_buf(),
        source,
    })?;
    abs.ancestors()
        .find(|dir| dir.join("Makefile").is_file())
        .map(Path::to_path_buf)
        .ok_or(BuildError::MakefileNotFound(abs))
}
