use std::{
    fmt, io,
    path::PathBuf,
    sync::Arc,
};

use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use serde::Serialize;
use tera::{Context, Tera, Value};

use crate::{
    core::{FrameworkError, FrameworkResult},
    resource::writer::{content_type, ResponseWriter},
};

use super::{
    cache::TemplateCache,
    definition::{TemplateDefinition, TemplateOverride, TEMPLATE_EXTENSION},
    helpers::{self, RenderFrame, MAX_INCLUDE_DEPTH},
    source::{FileSystemSource, TemplateSource},
};

/// Variable holding the primary template's output while the master renders
pub const CONTENT_VARIABLE: &str = "content";

/// Output escaping applied to interpolated values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Escape {
    /// HTML-escape every interpolated value
    Html,
    /// Emit values verbatim
    None,
}

impl From<bool> for Escape {
    fn from(escape: bool) -> Self {
        if escape {
            Escape::Html
        } else {
            Escape::None
        }
    }
}

pub(crate) struct EngineShared {
    definition: TemplateDefinition,
    source: Arc<dyn TemplateSource>,
    cache: TemplateCache,
}

/// Thread-safe renderer for one [`TemplateDefinition`].
///
/// A name ending in `.html` renders standalone; any other name is wrapped in the
/// configured master layout, which receives the inner output as `content`
/// (write `{{ content | safe }}` in the layout).
#[derive(Clone)]
pub struct TemplateEngine {
    shared: Arc<EngineShared>,
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("definition", &self.shared.definition)
            .finish()
    }
}

impl TemplateEngine {
    /// Engine reading templates from the filesystem
    pub fn new(definition: TemplateDefinition) -> Self {
        Self::with_source(definition, Arc::new(FileSystemSource))
    }

    pub fn with_source(definition: TemplateDefinition, source: Arc<dyn TemplateSource>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                definition,
                source,
                cache: TemplateCache::default(),
            }),
        }
    }

    pub fn definition(&self) -> &TemplateDefinition {
        &self.shared.definition
    }

    /// New engine for the merged definition. It shares our template source
    /// but starts with an empty cache; `self` is left untouched.
    pub fn derive(&self, patch: &TemplateOverride) -> Self {
        Self::with_source(
            self.shared.definition.merge(patch),
            Arc::clone(&self.shared.source),
        )
    }

    /// Render `name` into the response sink.
    ///
    /// The body is rendered fully before anything is written, so a failed
    /// render leaves the sink untouched.
    pub fn render<T>(
        &self,
        writer: &ResponseWriter,
        status: StatusCode,
        name: &str,
        data: &T,
        escape: Escape,
    ) -> FrameworkResult<()>
    where
        T: Serialize + ?Sized,
    {
        let body = self.render_string(name, data, escape)?;
        if !writer.has_header(CONTENT_TYPE) {
            writer.set_header(CONTENT_TYPE, HeaderValue::from_static(content_type::TEXT_HTML));
        }
        writer.write_header(status);
        writer.write(body.as_bytes())?;
        Ok(())
    }

    /// Render `name` into an arbitrary byte sink
    pub fn render_to<W, T>(&self, mut out: W, name: &str, data: &T, escape: Escape) -> FrameworkResult<()>
    where
        W: io::Write,
        T: Serialize + ?Sized,
    {
        let body = self.render_string(name, data, escape)?;
        out.write_all(body.as_bytes())?;
        Ok(())
    }

    pub fn render_string<T>(&self, name: &str, data: &T, escape: Escape) -> FrameworkResult<String>
    where
        T: Serialize + ?Sized,
    {
        let context = build_context(data)?;
        self.shared.render_named(name, &context, escape)
    }

    /// Number of compiled sets cached for `escape`
    pub fn cached(&self, escape: Escape) -> usize {
        self.shared.cache.len(escape)
    }

    pub fn is_cached(&self, escape: Escape, name: &str) -> bool {
        self.shared.cache.contains(escape, name)
    }
}

impl EngineShared {
    pub(crate) fn render_standalone(
        self: &Arc<Self>,
        name: &str,
        context: &Context,
        mode: Escape,
    ) -> FrameworkResult<String> {
        if name.ends_with(TEMPLATE_EXTENSION) {
            self.render_named(name, context, mode)
        } else {
            self.render_named(&format!("{name}{TEMPLATE_EXTENSION}"), context, mode)
        }
    }

    fn render_named(self: &Arc<Self>, name: &str, context: &Context, mode: Escape) -> FrameworkResult<String> {
        let (file, master) = match name.strip_suffix(TEMPLATE_EXTENSION) {
            Some(file) => (file, None),
            None => (name, self.definition.master.as_deref().filter(|m| !m.is_empty())),
        };

        let compiled = self.compiled(name, file, master, mode)?;

        let _frame = RenderFrame::enter(context).ok_or_else(|| FrameworkError::TemplateExecute {
            name: name.to_string(),
            message: format!("include nesting exceeds {MAX_INCLUDE_DEPTH} levels"),
        })?;

        let body = compiled
            .render(file, context)
            .map_err(|e| execute_error(file, &e))?;
        let Some(master) = master else {
            return Ok(body);
        };

        let mut layout = context.clone();
        layout.insert(CONTENT_VARIABLE, &body);
        compiled
            .render(master, &layout)
            .map_err(|e| execute_error(master, &e))
    }

    fn compiled(
        self: &Arc<Self>,
        key: &str,
        file: &str,
        master: Option<&str>,
        mode: Escape,
    ) -> FrameworkResult<Arc<Tera>> {
        if !self.definition.disable_cache {
            if let Some(hit) = self.cache.get(mode, key) {
                return Ok(hit);
            }
        }

        let compiled = Arc::new(self.compile(file, master, mode)?);
        self.cache.install(mode, key, Arc::clone(&compiled));
        Ok(compiled)
    }

    fn compile(self: &Arc<Self>, file: &str, master: Option<&str>, mode: Escape) -> FrameworkResult<Tera> {
        let definition = &self.definition;
        let names: Vec<&str> = master
            .into_iter()
            .chain(std::iter::once(file))
            .chain(definition.partials.iter().map(String::as_str))
            .collect();

        let mut sources = Vec::with_capacity(names.len());
        for name in &names {
            let path = definition.path_for(name);
            let raw = self
                .source
                .read(&path)
                .map_err(|source| FrameworkError::TemplateRead {
                    name: name.to_string(),
                    path: path.clone(),
                    source,
                })?;
            let text = definition
                .delimiters
                .translate(&raw)
                .map_err(|message| compile_error(name, path.clone(), message))?
                .into_owned();
            sources.push((name.to_string(), text));
        }

        let mut tera = Tera::default();
        match mode {
            Escape::Html => tera.autoescape_on(vec![""]),
            Escape::None => tera.autoescape_on(vec![]),
        }
        helpers::register(
            &mut tera,
            Arc::downgrade(self),
            mode,
            &definition.functions,
        );
        tera.add_raw_templates(sources)
            .map_err(|e| compile_error(file, definition.path_for(file), error_chain(&e)))?;

        log::debug!(
            "Compiled template set for '{file}' ({} files, {:?} escaping)",
            names.len(),
            mode
        );
        Ok(tera)
    }
}

fn build_context<T: Serialize + ?Sized>(data: &T) -> FrameworkResult<Context> {
    match serde_json::to_value(data)? {
        Value::Null => Ok(Context::new()),
        value @ Value::Object(_) => Context::from_value(value)
            .map_err(|e| FrameworkError::serialization_error("template data", e)),
        // Scalars and arrays are exposed as `data`
        other => {
            let mut context = Context::new();
            context.insert("data", &other);
            Ok(context)
        }
    }
}

fn compile_error(name: &str, path: PathBuf, message: String) -> FrameworkError {
    FrameworkError::TemplateCompile {
        name: name.to_string(),
        path,
        message,
    }
}

fn execute_error(name: &str, err: &tera::Error) -> FrameworkError {
    FrameworkError::TemplateExecute {
        name: name.to_string(),
        message: error_chain(err),
    }
}

/// Tera keeps the useful detail in the source chain
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
