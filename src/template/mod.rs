/*! Composing the system configuration from templates

Templates are plain text with `__NAME__` placeholders. Composing one is two passes over a
single tokenisation of the template:

1. every scalar [`Placeholder`] is replaced by its value from the [`TemplateContext`],
2. the [`MODULE_IMPORTS_TOKEN`] is replaced by the rendered [`ModuleList`].

Values are inserted verbatim and the output is never scanned again, so a value may contain
any character, including `/`, `\`, `&`, `$` or even another placeholder, and still appear
literally. Sequences which look like placeholders but are not known ones are left alone.
*/

mod discovery;

pub use discovery::{
    discover_modules, template_files, ModuleList, BASE_TEMPLATE, DEFAULT_EXCLUDED,
    HARDWARE_CONFIGURATION, HARDWARE_IMPORT,
};

use std::fmt;

use indexmap::IndexMap;

/// The token replaced by the module import block
pub const MODULE_IMPORTS_TOKEN: &str = "__MODULE_IMPORTS__";

/// A scalar placeholder
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::EnumIter,
    strum::Display,
    strum::IntoStaticStr,
)]
pub enum Placeholder {
    #[strum(serialize = "__USERNAME__")]
    Username,
    #[strum(serialize = "__PASSWORD_HASH__")]
    PasswordHash,
    #[strum(serialize = "__GIT_USERNAME__")]
    GitUsername,
    #[strum(serialize = "__GIT_EMAIL__")]
    GitEmail,
    #[strum(serialize = "__HOSTNAME__")]
    Hostname,
    #[strum(serialize = "__DISK__")]
    Disk,
}

impl Placeholder {
    pub fn token(&self) -> &'static str {
        (*self).into()
    }

    fn is_sensitive(&self) -> bool {
        matches!(self, Placeholder::PasswordHash)
    }
}

/// The values substituted for each [`Placeholder`]
#[derive(Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TemplateContext {
    values: IndexMap<Placeholder, String>,
}

impl TemplateContext {
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        git_username: impl Into<String>,
        git_email: impl Into<String>,
        hostname: impl Into<String>,
        disk: impl Into<String>,
    ) -> Self {
        let values = IndexMap::from([
            (Placeholder::Username, username.into()),
            (Placeholder::PasswordHash, password_hash.into()),
            (Placeholder::GitUsername, git_username.into()),
            (Placeholder::GitEmail, git_email.into()),
            (Placeholder::Hostname, hostname.into()),
            (Placeholder::Disk, disk.into()),
        ]);
        Self { values }
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        self.values.get(&placeholder).map(String::as_str)
    }
}

impl fmt::Debug for TemplateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (placeholder, value) in &self.values {
            match placeholder.is_sensitive() {
                true => map.entry(placeholder, &"<redacted>"),
                false => map.entry(placeholder, value),
            };
        }
        map.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Scalar(Placeholder),
    Block,
}

/// Split `template` into text and the placeholders it contains, scanning left to right
fn tokenize(template: &str) -> Vec<Segment<'_>> {
    use strum::IntoEnumIterator;

    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(offset) = template[cursor..].find("__") {
        let at = cursor + offset;
        let rest = &template[at..];

        let matched = if rest.starts_with(MODULE_IMPORTS_TOKEN) {
            Some((Segment::Block, MODULE_IMPORTS_TOKEN.len()))
        } else {
            Placeholder::iter()
                .find(|placeholder| rest.starts_with(placeholder.token()))
                .map(|placeholder| (Segment::Scalar(placeholder), placeholder.token().len()))
        };

        match matched {
            Some((segment, len)) => {
                if text_start < at {
                    segments.push(Segment::Text(&template[text_start..at]));
                }
                segments.push(segment);
                cursor = at + len;
                text_start = cursor;
            },
            // Only skip one `_`, so `___USERNAME__` still finds its token
            None => cursor = at + 1,
        }
    }
    if text_start < template.len() {
        segments.push(Segment::Text(&template[text_start..]));
    }
    segments
}

/// Compose `template` with `context` and `modules`
pub fn compose(template: &str, context: &TemplateContext, modules: &ModuleList) -> String {
    let segments = tokenize(template);

    // Scalars, a placeholder without a value stays as it was
    let substituted = segments.into_iter().map(|segment| match segment {
        Segment::Scalar(placeholder) => match context.get(placeholder) {
            Some(value) => Segment::Text(value),
            None => Segment::Text(placeholder.token()),
        },
        other => other,
    });

    let block = modules.render();
    let mut composed = String::with_capacity(template.len() + block.len());
    for segment in substituted {
        match segment {
            Segment::Text(text) => composed.push_str(text),
            Segment::Block => composed.push_str(&block),
            Segment::Scalar(placeholder) => composed.push_str(placeholder.token()),
        }
    }
    composed
}

/// Whether `text` still contains a known placeholder token
pub fn has_placeholders(text: &str) -> bool {
    tokenize(text)
        .iter()
        .any(|segment| !matches!(segment, Segment::Text(_)))
}
