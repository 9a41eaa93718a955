//! Per-request execution context
//!
//! Everything a handler can reach for one request: the buffered request, the
//! response sink, the request deadline and the resources the route asked for.

pub mod html;
pub mod json;
pub mod request;
pub mod writer;

use std::{fmt, sync::Arc};

use crate::{
    core::RequestContext, database::DatabaseHandle, session::SessionHandle,
    template::TemplateEngine,
};

pub use html::HtmlResponse;
pub use json::JsonResponse;
pub use request::Request;
pub use writer::ResponseWriter;

pub struct ExecutionContext {
    request: Arc<Request>,
    writer: ResponseWriter,
    context: RequestContext,
    database: Option<Arc<DatabaseHandle>>,
    session: Option<SessionHandle>,
    template: Option<Arc<TemplateEngine>>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("database", &self.database.is_some())
            .field("session", &self.session.is_some())
            .field("template", &self.template.is_some())
            .finish()
    }
}

impl ExecutionContext {
    pub fn builder(
        request: Arc<Request>,
        writer: ResponseWriter,
        context: RequestContext,
    ) -> ExecutionContextBuilder {
        ExecutionContextBuilder::new(request, writer, context)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// Deadline-bound context of this execution; done once the request timed out
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Present when the route enables the database
    pub fn database(&self) -> Option<&DatabaseHandle> {
        self.database.as_deref()
    }

    /// Present when the route enables sessions
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn template(&self) -> Option<&TemplateEngine> {
        self.template.as_deref()
    }

    pub fn html(&self) -> HtmlResponse<'_> {
        HtmlResponse::new(&self.writer, self.template())
    }

    pub fn json(&self) -> JsonResponse<'_> {
        JsonResponse::new(&self.writer)
    }
}

pub struct ExecutionContextBuilder {
    request: Arc<Request>,
    writer: ResponseWriter,
    context: RequestContext,
    database: Option<Arc<DatabaseHandle>>,
    session: Option<SessionHandle>,
    template: Option<Arc<TemplateEngine>>,
}

impl ExecutionContextBuilder {
    pub fn new(request: Arc<Request>, writer: ResponseWriter, context: RequestContext) -> Self {
        Self {
            request,
            writer,
            context,
            database: None,
            session: None,
            template: None,
        }
    }

    pub fn database(mut self, database: Arc<DatabaseHandle>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    pub fn template(mut self, template: Option<Arc<TemplateEngine>>) -> Self {
        self.template = template;
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            request: self.request,
            writer: self.writer,
            context: self.context,
            database: self.database,
            session: self.session,
            template: self.template,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_builder_defaults_to_no_resources() {
        let request = Request::from_http(http::Request::new(Bytes::new()));
        let ctx = ExecutionContext::builder(
            Arc::new(request),
            ResponseWriter::new(),
            RequestContext::new(),
        )
        .session(SessionHandle::detached())
        .build();

        assert!(ctx.database().is_none());
        assert!(ctx.template().is_none());
        assert!(ctx.session().is_some());
        assert!(ctx.html().success("index", &()).is_err());
    }
}
