use std::path::Path;

/// The base template, which imports every module
pub const BASE_TEMPLATE: &str = "configuration.nix";
/// The hardware configuration module, generated on the target rather than templated
pub const HARDWARE_CONFIGURATION: &str = "hardware-configuration.nix";
/// The import line which always closes the module list
pub const HARDWARE_IMPORT: &str = "    ./hardware-configuration.nix";
/// Files in the template directory which are never imported as modules
pub const DEFAULT_EXCLUDED: &[&str] = &[
    BASE_TEMPLATE,
    HARDWARE_CONFIGURATION,
    "flake.nix",
    "home.nix",
];

const MODULE_PATTERN: &str = "*.nix";
const IMPORT_INDENT: &str = "    ";

/// The modules imported by the base configuration, in import order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleList {
    files: Vec<String>,
}

impl ModuleList {
    /// Build a list from module file names, sorted, never including the hardware module twice
    pub fn from_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut files: Vec<String> = files
            .into_iter()
            .map(Into::into)
            .filter(|file| file != HARDWARE_CONFIGURATION)
            .collect();
        files.sort();
        files.dedup();
        Self { files }
    }

    /// The discovered module files, without the hardware module
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The import lines, ending with [`HARDWARE_IMPORT`]
    pub fn imports(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|file| format!("{IMPORT_INDENT}./{file}"))
            .chain(std::iter::once(HARDWARE_IMPORT.to_string()))
            .collect()
    }

    /// The block substituted for the module imports token
    pub fn render(&self) -> String {
        self.imports().join("\n")
    }
}

/// Find the modules in `template_dir`
///
/// Only files directly inside the directory matching `*.nix` are considered, skipping
/// [`DEFAULT_EXCLUDED`] and `extra_excluded`. An unreadable directory yields only the hardware
/// module.
#[tracing::instrument(level = "debug", skip(extra_excluded), fields(template_dir = %template_dir.display()))]
pub async fn discover_modules(template_dir: &Path, extra_excluded: &[String]) -> ModuleList {
    match scan(template_dir, extra_excluded).await {
        Ok(files) => {
            let list = ModuleList::from_files(files);
            tracing::debug!(modules = ?list.files(), "Discovered modules");
            list
        },
        Err(err) => {
            tracing::warn!(
                template_dir = %template_dir.display(),
                error = %err,
                "Could not read the template directory, only the hardware configuration will be imported"
            );
            ModuleList::default()
        },
    }
}

async fn scan(template_dir: &Path, extra_excluded: &[String]) -> std::io::Result<Vec<String>> {
    let files = nix_files(template_dir)
        .await?
        .into_iter()
        .filter(|name| !DEFAULT_EXCLUDED.contains(&name.as_str()) && !extra_excluded.contains(name))
        .collect();
    Ok(files)
}

/// Every template in `template_dir` which is composed into the configuration root, sorted
///
/// This is every `*.nix` file but the hardware configuration, which is generated on the target.
pub async fn template_files(template_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut files: Vec<String> = nix_files(template_dir)
        .await?
        .into_iter()
        .filter(|name| name != HARDWARE_CONFIGURATION)
        .collect();
    files.sort();
    Ok(files)
}

async fn nix_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let pattern = glob::Pattern::new(MODULE_PATTERN)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(ToString::to_string) else {
            continue;
        };
        if !pattern.matches(&name) {
            continue;
        }
        // Follows symlinks, a link to a module is a module
        match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_file() => files.push(name),
            _ => continue,
        }
    }
    Ok(files)
}
