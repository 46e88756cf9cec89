use std::path::{Path, PathBuf};

use tracing::{span, Span};

use super::CONFIG_FILE_MODE;
use crate::{
    action::{Action, ActionDescription, ActionError, ActionErrorKind, ActionTag, StatefulAction},
    os::Host,
    template::{
        compose, discover_modules, template_files, ModuleList, TemplateContext, BASE_TEMPLATE,
    },
    util::{remove_file, write_atomic},
};

/**
Compose every template into the configuration root

The module list is discovered when this runs, not when it is planned, so a replayed plan
picks up the template directory as it is now.
 */
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
#[serde(tag = "action_name", rename = "compose_configuration")]
pub struct ComposeConfiguration {
    template_dir: PathBuf,
    config_root: PathBuf,
    context: TemplateContext,
    excluded_modules: Vec<String>,
    #[serde(default)]
    written: Vec<PathBuf>,
}

impl ComposeConfiguration {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan(
        template_dir: impl AsRef<Path>,
        config_root: impl AsRef<Path>,
        context: TemplateContext,
        excluded_modules: Vec<String>,
    ) -> StatefulAction<Self> {
        Self {
            template_dir: template_dir.as_ref().to_path_buf(),
            config_root: config_root.as_ref().to_path_buf(),
            context,
            excluded_modules,
            written: vec![],
        }
        .into()
    }

    /// Files written by the last execution
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

/// Compose `name` from `template_dir` into `config_root`, returning where it was written
async fn place_template(
    template_dir: &Path,
    config_root: &Path,
    name: &str,
    context: &TemplateContext,
    modules: &ModuleList,
) -> Result<PathBuf, ActionErrorKind> {
    let source = template_dir.join(name);
    let template = tokio::fs::read_to_string(&source)
        .await
        .map_err(|e| ActionErrorKind::Read(source.clone(), e))?;

    let destination = config_root.join(name);
    write_atomic(
        &destination,
        &compose(&template, context, modules),
        CONFIG_FILE_MODE,
    )
    .await?;
    tracing::trace!(destination = %destination.display(), "Composed template");
    Ok(destination)
}

#[async_trait::async_trait]
impl Action for ComposeConfiguration {
    fn action_tag() -> ActionTag {
        ActionTag("compose_configuration")
    }
    fn tracing_synopsis(&self) -> String {
        format!(
            "Compose the templates in `{}` into `{}`",
            self.template_dir.display(),
            self.config_root.display()
        )
    }

    fn tracing_span(&self) -> Span {
        span!(
            tracing::Level::DEBUG,
            "compose_configuration",
            template_dir = %self.template_dir.display(),
            config_root = %self.config_root.display(),
        )
    }

    fn execute_description(&self) -> Vec<ActionDescription> {
        let mut explanation = vec![
            "Substitutes the user, git identity, host name and disk into each template".to_string(),
            format!(
                "Imports every other `*.nix` file from `{BASE_TEMPLATE}`, then `./hardware-configuration.nix`"
            ),
        ];
        if !self.excluded_modules.is_empty() {
            explanation.push(format!(
                "Does not import {}",
                self.excluded_modules
                    .iter()
                    .map(|module| format!("`{module}`"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        vec![ActionDescription::new(self.tracing_synopsis(), explanation)]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(template_dir = %self.template_dir.display(), config_root = %self.config_root.display()))]
    async fn execute(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        let Self {
            template_dir,
            config_root,
            context,
            excluded_modules,
            written,
        } = self;

        let base = template_dir.join(BASE_TEMPLATE);
        if !base.is_file() {
            return Err(Self::error(ActionErrorKind::MissingTemplate(base)));
        }

        tokio::fs::create_dir_all(&config_root)
            .await
            .map_err(|e| ActionErrorKind::CreateDirectory(config_root.clone(), e))
            .map_err(Self::error)?;

        let modules = discover_modules(template_dir, excluded_modules).await;
        let templates = template_files(template_dir)
            .await
            .map_err(|e| Self::error(ActionErrorKind::ReadDir(template_dir.clone(), e)))?;

        for name in templates {
            match place_template(template_dir, config_root, &name, context, &modules).await {
                Ok(destination) => {
                    if !written.contains(&destination) {
                        written.push(destination);
                    }
                },
                Err(err) => {
                    // A half composed configuration root is never left behind
                    for path in written.drain(..) {
                        if let Err(e) = remove_file(&path).await {
                            tracing::warn!(path = %path.display(), error = %e, "Could not remove composed template");
                        }
                    }
                    return Err(Self::error(err));
                },
            }
        }

        Ok(())
    }

    fn revert_description(&self) -> Vec<ActionDescription> {
        vec![ActionDescription::new(
            format!(
                "Remove the composed configuration from `{}`",
                self.config_root.display()
            ),
            vec![],
        )]
    }

    #[tracing::instrument(level = "debug", skip_all, fields(config_root = %self.config_root.display()))]
    async fn revert(&mut self, _host: &dyn Host) -> Result<(), ActionError> {
        for path in self.written.drain(..) {
            remove_file(&path)
                .await
                .map_err(|e| Self::error(ActionErrorKind::Remove(path.clone(), e)))?;
        }
        Ok(())
    }
}
