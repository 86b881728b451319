//! Template engine based on MiniJinja

use minijinja::{Environment, Value};
use std::path::Path;
use std::sync::Arc;

use pko_core::RenderContext;

use crate::error::{Result, TemplateError};
use crate::files_object::FilesObject;
use crate::filters;
use crate::loader::RawFiles;

/// Suffix marking a file as a template
pub const TEMPLATE_SUFFIX: &str = ".j2";

/// True for files rendered by the engine.
pub fn is_template_file(path: &str) -> bool {
    path.ends_with(TEMPLATE_SUFFIX)
}

/// True for `_`-prefixed files, which only provide macros and includes.
pub fn is_helper_file(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('_'))
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self, files: Arc<RawFiles>) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }
        // Rendered YAML must keep its final newline so documents concatenate.
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);

        env.add_global("files", Value::from_object(FilesObject::new(files)));

        env
    }

    fn context(ctx: &RenderContext) -> Value {
        minijinja::context! {
            package => &ctx.package,
            config => &ctx.config,
            images => &ctx.images,
            environment => &ctx.environment,
        }
    }

    /// Render a single template string
    pub fn render_string(&self, template: &str, ctx: &RenderContext, name: &str) -> Result<String> {
        let mut env = self.create_environment(Arc::new(RawFiles::new()));
        env.add_template_owned(name.to_string(), template.to_string())
            .map_err(|e| TemplateError::from_minijinja(e, name, template))?;
        let tmpl = env
            .get_template(name)
            .map_err(|e| TemplateError::from_minijinja(e, name, template))?;
        Ok(tmpl
            .render(Self::context(ctx))
            .map_err(|e| TemplateError::from_minijinja(e, name, template))?)
    }

    /// Render every template file of a package.
    ///
    /// Returns the package files with each `<path>.j2` replaced by its
    /// rendered output at `<path>`. Helper templates are loaded so other
    /// templates can include or import them, and are dropped from the output.
    pub fn render_files(&self, files: &RawFiles, ctx: &RenderContext) -> Result<RawFiles> {
        let shared = Arc::new(files.clone());
        let mut env = self.create_environment(Arc::clone(&shared));

        let mut templates = Vec::new();
        for (path, content) in files.iter().filter(|(path, _)| is_template_file(path)) {
            let source = String::from_utf8_lossy(content).into_owned();
            env.add_template_owned(path.clone(), source.clone())
                .map_err(|e| TemplateError::from_minijinja(e, path, &source))?;
            templates.push((path.clone(), source));
        }

        let mut output: RawFiles = files
            .iter()
            .filter(|(path, _)| !is_template_file(path))
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect();

        let context = Self::context(ctx);
        for (path, source) in &templates {
            if is_helper_file(path) {
                continue;
            }
            let tmpl = env
                .get_template(path)
                .map_err(|e| TemplateError::from_minijinja(e, path, source))?;
            let rendered = tmpl
                .render(&context)
                .map_err(|e| TemplateError::from_minijinja(e, path, source))?;

            let target = path.trim_end_matches(TEMPLATE_SUFFIX).to_string();
            tracing::trace!(template = %path, output = %target, "rendered template");
            output.insert(target, rendered.into_bytes());
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, TemplateErrorKind};
    use crate::loader::tests::files;
    use pko_core::{ContextObjectMeta, Environment, PackageContext};
    use serde_json::json;

    fn context() -> RenderContext {
        RenderContext {
            package: PackageContext {
                metadata: ContextObjectMeta {
                    name: "web".to_string(),
                    namespace: "apps".to_string(),
                    ..Default::default()
                },
                image: "quay.io/org/web-package:v1".to_string(),
            },
            config: json!({"replicas": 3, "labels": {"team": "a"}}),
            images: [("nginx".to_string(), "index.docker.io/library/nginx@sha256:abc".to_string())]
                .into(),
            environment: Environment::kubernetes("v1.31.0"),
        }
    }

    #[test]
    fn test_render_simple() {
        let engine = Engine::default();
        let out = engine
            .render_string("replicas: {{ config.replicas }}", &context(), "t.yaml")
            .unwrap();
        assert_eq!(out, "replicas: 3");
    }

    #[test]
    fn test_render_context_fields() {
        let engine = Engine::default();
        let out = engine
            .render_string(
                "{{ package.metadata.namespace }}/{{ package.metadata.name }} {{ images.nginx }} {{ environment.kubernetes.version }}\nlabels:{{ config.labels | toyaml | nindent(2) }}",
                &context(),
                "t.yaml",
            )
            .unwrap();
        insta::assert_snapshot!(out, @r"
        apps/web index.docker.io/library/nginx@sha256:abc v1.31.0
        labels:
          team: a
        ");
    }

    #[test]
    fn test_strict_undefined() {
        let err = Engine::default()
            .render_string("{{ config.missing.deep }}", &context(), "t.yaml")
            .unwrap_err();
        let EngineError::Template(err) = err else {
            panic!("expected template error");
        };
        assert_eq!(err.kind, TemplateErrorKind::UndefinedVariable);
        assert!(err.message.starts_with("t.yaml:1:"));
    }

    #[test]
    fn test_lenient_mode() {
        let engine = Engine::builder().strict(false).build();
        let out = engine
            .render_string("[{{ config.missing }}]", &context(), "t.yaml")
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_render_files() {
        let raw = files(&[
            ("_helpers.yaml.j2", "{% macro name(base) %}{{ base }}-cm{% endmacro %}"),
            (
                "deploy/cm.yaml.j2",
                "{% import '_helpers.yaml.j2' as h %}name: {{ h.name(package.metadata.name) }}\ndata: {{ files.get('static.txt') | tojson }}\n",
            ),
            ("static.txt", "hello"),
            ("plain.yaml", "kind: Namespace"),
        ]);
        let out = Engine::default().render_files(&raw, &context()).unwrap();
        assert_eq!(
            out.keys().collect::<Vec<_>>(),
            vec!["deploy/cm.yaml", "plain.yaml", "static.txt"]
        );
        assert_eq!(
            String::from_utf8(out["deploy/cm.yaml"].clone()).unwrap(),
            "name: web-cm\ndata: \"hello\"\n"
        );
    }

    #[test]
    fn test_render_files_syntax_error() {
        let raw = files(&[("bad.yaml.j2", "{% if %}")]);
        let err = Engine::default().render_files(&raw, &context()).unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_helper_detection() {
        assert!(is_helper_file("a/_helpers.tpl.j2"));
        assert!(!is_helper_file("a_b/deploy.yaml.j2"));
        assert!(is_template_file("x.yaml.j2"));
        assert!(!is_template_file("x.yaml"));
    }
}
