//! Project metadata: which project file to build and where its test
//! assembly lands

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::host::error::ProjectError;

/// Project file extensions the build tool understands
const PROJECT_EXTENSIONS: [&str; 3] = ["csproj", "fsproj", "vbproj"];

/// Build configuration the build tool uses when none is given
pub const DEFAULT_CONFIGURATION: &str = "Debug";

/// Metadata read from a project file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project_file: PathBuf,
    pub project_directory: PathBuf,
    /// `<AssemblyName>`, or the project file stem
    pub assembly_name: String,
    /// `<TargetFramework>`, or the first of `<TargetFrameworks>`
    pub target_framework: Option<String>,
}

impl ProjectInfo {
    /// Locate the single project file directly inside `directory`
    pub fn discover(directory: &Path) -> Result<Self, ProjectError> {
        let mut project_files: Vec<PathBuf> = WalkDir::new(directory)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| PROJECT_EXTENSIONS.contains(&ext))
            })
            .collect();
        project_files.sort();

        match project_files.len() {
            0 => Err(ProjectError::NoProjectFile {
                directory: directory.to_path_buf(),
            }),
            1 => Self::load(project_files.remove(0)),
            _ => Err(ProjectError::MultipleProjectFiles {
                directory: directory.to_path_buf(),
                files: project_files,
            }),
        }
    }

    /// Read metadata from a project file
    pub fn load(project_file: PathBuf) -> Result<Self, ProjectError> {
        let contents =
            std::fs::read_to_string(&project_file).map_err(|source| ProjectError::Read {
                path: project_file.clone(),
                source,
            })?;

        let stem = project_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let assembly_name = property(&contents, "AssemblyName").unwrap_or(stem);
        let target_framework = property(&contents, "TargetFramework").or_else(|| {
            property(&contents, "TargetFrameworks")
                .and_then(|all| all.split(';').map(str::trim).find(|f| !f.is_empty()).map(str::to_string))
        });

        let project_directory = project_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        debug!(
            "Project {} builds {} for {:?}",
            project_file.display(),
            assembly_name,
            target_framework
        );

        Ok(Self {
            project_file,
            project_directory,
            assembly_name,
            target_framework,
        })
    }

    /// Where a default build puts the test assembly
    ///
    /// Without a known target framework the output directory is searched
    /// for an existing assembly.
    pub fn target_path(&self) -> PathBuf {
        let output_directory = self
            .project_directory
            .join("bin")
            .join(DEFAULT_CONFIGURATION);
        let file_name = format!("{}.dll", self.assembly_name);

        if let Some(framework) = &self.target_framework {
            return output_directory.join(framework).join(file_name);
        }

        WalkDir::new(&output_directory)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
            .map(|e| e.into_path())
            .unwrap_or_else(|| output_directory.join(file_name))
    }
}

/// Text of the first `<name>...</name>` element
fn property(contents: &str, name: &str) -> Option<String> {
    let pattern = format!(r"<{name}>\s*([^<]*?)\s*</{name}>");
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(contents)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|value| !value.is_empty())
}
