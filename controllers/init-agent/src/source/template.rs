//! InitTemplate-backed source
//!
//! Templates are compiled when the source is built, so syntax errors show
//! up at resolve time; undefined variables fail at render time.
//!
//! Templates written with Go-style root references (`{{ .ClusterName }}`)
//! are accepted: a leading `.` on an identifier inside a tag is dropped
//! before compilation.

use crds::InitTemplate;
use minijinja::{Environment, UndefinedBehavior};

use super::filters;
use super::{ManifestSource, RenderContext, SourceError};

const TEMPLATE_NAME: &str = "init-template";

/// Renders manifests from a template string.
#[derive(Debug)]
pub struct TemplateSource {
    env: Environment<'static>,
}

impl TemplateSource {
    /// Compiles `template`.
    pub fn new(template: &str) -> Result<Self, SourceError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        filters::register(&mut env);

        env.add_template_owned(TEMPLATE_NAME, normalize_root_references(template))?;

        Ok(Self { env })
    }

    /// Compiles the template held by an InitTemplate.
    pub fn from_init_template(init_template: &InitTemplate) -> Result<Self, SourceError> {
        Self::new(&init_template.spec.template)
    }
}

impl ManifestSource for TemplateSource {
    fn render(&self, ctx: &RenderContext) -> Result<String, SourceError> {
        let template = self.env.get_template(TEMPLATE_NAME)?;
        Ok(template.render(ctx)?)
    }
}

/// Drops the leading `.` of root references inside `{{ }}` and `{% %}` tags.
fn normalize_root_references(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    loop {
        let next = [("{{", "}}"), ("{%", "%}")]
            .into_iter()
            .filter_map(|(open, close)| remaining.find(open).map(|idx| (idx, open, close)))
            .min_by_key(|(idx, _, _)| *idx);

        let Some((start, open, close)) = next else {
            break;
        };

        result.push_str(&remaining[..start + open.len()]);
        remaining = &remaining[start + open.len()..];

        match remaining.find(close) {
            Some(end) => {
                result.push_str(&normalize_expression(&remaining[..end]));
                result.push_str(close);
                remaining = &remaining[end + close.len()..];
            }
            None => break,
        }
    }

    result.push_str(remaining);
    result
}

fn normalize_expression(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        match (ch, quote) {
            ('"' | '\'', None) => quote = Some(ch),
            // An escaped character never ends the string
            ('\\', Some(_)) => {
                result.push(ch);
                result.extend(chars.next());
                continue;
            }
            (c, Some(q)) if c == q => quote = None,
            ('.', None) => {
                let after_value = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | ')' | ']'));
                let before_ident = chars.peek().is_some_and(|c| c.is_alphabetic() || *c == '_');
                if !after_value && before_ident {
                    continue;
                }
            }
            _ => {}
        }
        result.push(ch);
    }

    result
}
