//! Project-type detection used by `DecompositionStrategy::Auto` and by the
//! Parallel decomposer's builder-bookend rule (spec §4.3), grounded on the
//! teacher's `cold_start.rs` project fingerprinting.

use std::path::Path;

/// Coarse classification of a project directory, used only to pick a
/// default decomposition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// No recognizable manifest at all: treat conservatively as
    /// hierarchical so a single implementer lays groundwork first.
    Greenfield,
    /// A manifest exists but looks small (few source files): flat,
    /// parallelizable work is more likely to pay off.
    Small,
    /// A manifest exists and the tree has substantial source present:
    /// prefer a hierarchical plan so work doesn't collide.
    Established,
}

/// The ecosystem a project tree looks like, used only to seed the Parallel
/// decomposer's prompt (spec §4.3); never drives branching logic beyond the
/// greenfield/build-system check below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Node,
    Python,
    Rust,
    Go,
    Java,
    Dotnet,
    Android,
    Ios,
    Flutter,
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Java => "java",
            Self::Dotnet => "dotnet",
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Flutter => "flutter",
            Self::Unknown => "unknown",
        }
    }
}

const MANIFEST_CANDIDATES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
];

const SMALL_PROJECT_FILE_THRESHOLD: usize = 20;
/// A tree with fewer than this many meaningful files is "greenfield"
/// (spec §4.3's literal wording).
const GREENFIELD_FILE_THRESHOLD: usize = 3;

/// Classifies a project directory by the presence of a recognized
/// manifest and a rough count of source-ish files.
pub fn detect(project_path: &Path) -> ProjectKind {
    let has_manifest = MANIFEST_CANDIDATES
        .iter()
        .any(|name| project_path.join(name).is_file());

    if !has_manifest {
        return ProjectKind::Greenfield;
    }

    let file_count = count_files(project_path);
    if file_count <= SMALL_PROJECT_FILE_THRESHOLD {
        ProjectKind::Small
    } else {
        ProjectKind::Established
    }
}

/// Identifies the project's ecosystem from manifest file signatures, falling
/// back to a keyword scan of the task description when the tree has none.
pub fn detect_project_type(project_path: &Path, task_description: &str) -> ProjectType {
    if project_path.join("AndroidManifest.xml").is_file() {
        return ProjectType::Android;
    }
    if has_glob_match(project_path, "xcodeproj") || project_path.join("Podfile").is_file() {
        return ProjectType::Ios;
    }
    if project_path.join("pubspec.yaml").is_file() {
        return ProjectType::Flutter;
    }
    if project_path.join("Cargo.toml").is_file() {
        return ProjectType::Rust;
    }
    if project_path.join("go.mod").is_file() {
        return ProjectType::Go;
    }
    if project_path.join("package.json").is_file() {
        return ProjectType::Node;
    }
    if project_path.join("pyproject.toml").is_file()
        || project_path.join("requirements.txt").is_file()
        || project_path.join("setup.py").is_file()
    {
        return ProjectType::Python;
    }
    if project_path.join("pom.xml").is_file() || project_path.join("build.gradle").is_file() {
        return ProjectType::Java;
    }
    if has_glob_match(project_path, "csproj") {
        return ProjectType::Dotnet;
    }

    from_task_description(task_description)
}

fn has_glob_match(project_path: &Path, extension: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(project_path) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == extension)
    })
}

fn from_task_description(task_description: &str) -> ProjectType {
    let lower = task_description.to_lowercase();
    let keyword_pairs: &[(&str, ProjectType)] = &[
        ("flutter", ProjectType::Flutter),
        ("android", ProjectType::Android),
        ("ios", ProjectType::Ios),
        ("swift", ProjectType::Ios),
        ("python", ProjectType::Python),
        ("django", ProjectType::Python),
        ("node", ProjectType::Node),
        ("typescript", ProjectType::Node),
        ("javascript", ProjectType::Node),
        ("rust", ProjectType::Rust),
        ("cargo", ProjectType::Rust),
        ("golang", ProjectType::Go),
        (" go ", ProjectType::Go),
        ("java", ProjectType::Java),
        (".net", ProjectType::Dotnet),
        ("dotnet", ProjectType::Dotnet),
        ("c#", ProjectType::Dotnet),
    ];
    keyword_pairs
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, kind)| *kind)
        .unwrap_or(ProjectType::Unknown)
}

/// Fewer than `GREENFIELD_FILE_THRESHOLD` meaningful files in the tree
/// (spec §4.3).
pub fn is_greenfield(project_path: &Path) -> bool {
    count_files(project_path) < GREENFIELD_FILE_THRESHOLD
}

/// No recognized build-system manifest anywhere in the tree.
pub fn lacks_build_system(project_path: &Path) -> bool {
    !MANIFEST_CANDIDATES
        .iter()
        .any(|name| project_path.join(name).is_file())
}

fn count_files(path: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    let mut count = 0;
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.') || n == "target" || n == "node_modules")
            .unwrap_or(false)
        {
            continue;
        }
        if entry_path.is_dir() {
            count += count_files(&entry_path);
        } else {
            count += 1;
        }
    }
    count
}
