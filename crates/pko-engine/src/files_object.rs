//! Read access to the package's own files from templates
//!
//! ```jinja2
//! data:
//!   nginx.conf: {{ files.get("config/nginx.conf") | tojson }}
//! {% if files.exists("config/extra.conf") %}
//!   extra.conf: {{ files.get("config/extra.conf") | tojson }}
//! {% endif %}
//! ```

use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};

use crate::loader::RawFiles;

/// Exposes the files of a package as the `files` template global
#[derive(Debug)]
pub struct FilesObject {
    files: Arc<RawFiles>,
}

impl FilesObject {
    pub fn new(files: Arc<RawFiles>) -> Self {
        Self { files }
    }

    fn read(&self, path: &str) -> Result<String, Error> {
        let bytes = self.files.get(path).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("file {path:?} not found in package"),
            )
        })?;
        String::from_utf8(bytes.clone()).map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("file {path:?} is not valid UTF-8: {e}"),
            )
        })
    }
}

impl Object for FilesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &minijinja::State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match method {
            "get" => {
                let path = path_arg(args, "get")?;
                Ok(Value::from(self.read(&path)?))
            }
            "exists" => {
                let path = path_arg(args, "exists")?;
                Ok(Value::from(self.files.contains_key(&path)))
            }
            "lines" => {
                let path = path_arg(args, "lines")?;
                let content = self.read(&path)?;
                Ok(Value::from(
                    content.lines().map(str::to_string).collect::<Vec<_>>(),
                ))
            }
            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!("files object has no method '{method}'. Available methods: get, exists, lines"),
            )),
        }
    }
}

fn path_arg(args: &[Value], method_name: &str) -> Result<String, Error> {
    args.first()
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("files.{method_name}() requires a path string argument"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::Environment;

    fn env() -> Environment<'static> {
        let mut files = RawFiles::new();
        files.insert("config/app.conf".to_string(), b"listen 80;\nworkers 2;".to_vec());
        files.insert("bin/blob".to_string(), vec![0xff, 0xfe]);

        let mut env = Environment::new();
        env.add_global("files", Value::from_object(FilesObject::new(Arc::new(files))));
        env
    }

    #[test]
    fn test_get() {
        let result = env()
            .render_str(r#"{{ files.get("config/app.conf") }}"#, ())
            .unwrap();
        assert_eq!(result, "listen 80;\nworkers 2;");
    }

    #[test]
    fn test_exists() {
        let env = env();
        let template = r#"{% if files.exists(path) %}present{% else %}absent{% endif %}"#;
        assert_eq!(
            env.render_str(template, minijinja::context! { path => "config/app.conf" })
                .unwrap(),
            "present"
        );
        assert_eq!(
            env.render_str(template, minijinja::context! { path => "missing" })
                .unwrap(),
            "absent"
        );
    }

    #[test]
    fn test_lines() {
        let result = env()
            .render_str(
                r#"{% for l in files.lines("config/app.conf") %}[{{ l }}]{% endfor %}"#,
                (),
            )
            .unwrap();
        assert_eq!(result, "[listen 80;][workers 2;]");
    }

    #[test]
    fn test_errors() {
        let env = env();
        assert!(env.render_str(r#"{{ files.get("missing") }}"#, ()).is_err());
        assert!(env.render_str(r#"{{ files.get("bin/blob") }}"#, ()).is_err());
        assert!(env.render_str(r#"{{ files.unknown() }}"#, ()).is_err());
    }
}
