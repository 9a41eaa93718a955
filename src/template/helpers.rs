//! Functions injected into every compiled template set.
//!
//! Tera functions only see their own arguments, so the data of the render in
//! progress is kept on a per-thread frame stack. Rendering is synchronous, which
//! means the frame pushed by a render is always the top of the stack while any
//! function it calls is running.

use std::{cell::RefCell, collections::HashMap, sync::Weak};

use tera::{Context, Tera, Value};

use super::{
    definition::HelperTable,
    engine::{EngineShared, Escape},
};

/// Name of the built-in helper rendering another template in place
pub const INCLUDE_FUNCTION: &str = "include";

/// Nested renders allowed before `include` gives up
pub const MAX_INCLUDE_DEPTH: usize = 32;

thread_local! {
    static FRAMES: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

/// Marks a render in progress on this thread; popped on drop
pub(crate) struct RenderFrame(());

impl RenderFrame {
    /// Push `context`, or `None` once the nesting limit is reached
    pub(crate) fn enter(context: &Context) -> Option<Self> {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            if frames.len() >= MAX_INCLUDE_DEPTH {
                return None;
            }
            frames.push(context.clone());
            Some(RenderFrame(()))
        })
    }
}

impl Drop for RenderFrame {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

fn current_context() -> Context {
    FRAMES.with(|frames| frames.borrow().last().cloned().unwrap_or_default())
}

/// `{{ include(name="partials/nav") }}`: renders a template standalone with the
/// caller's data and escape mode. The output is inserted without re-escaping.
struct IncludeFunction {
    engine: Weak<EngineShared>,
    mode: Escape,
}

impl tera::Function for IncludeFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("include requires a string `name` argument"))?;
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| tera::Error::msg("template engine no longer available"))?;

        engine
            .render_standalone(name, &current_context(), self.mode)
            .map(Value::String)
            .map_err(|e| tera::Error::msg(e.to_string()))
    }

    fn is_safe(&self) -> bool {
        true
    }
}

/// Register `include` followed by the user helpers, so a user helper named
/// `include` replaces the built-in one.
pub(crate) fn register(
    tera: &mut Tera,
    engine: Weak<EngineShared>,
    mode: Escape,
    helpers: &HelperTable,
) {
    tera.register_function(INCLUDE_FUNCTION, IncludeFunction { engine, mode });
    for (name, helper) in helpers.iter() {
        let helper = helper.clone();
        tera.register_function(name, move |args: &HashMap<String, Value>| helper(args));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_unwind() {
        let mut ctx = Context::new();
        ctx.insert("user", "ada");
        {
            let _outer = RenderFrame::enter(&ctx).unwrap();
            assert_eq!(current_context().get("user"), Some(&Value::from("ada")));
            {
                let _inner = RenderFrame::enter(&Context::new()).unwrap();
                assert!(current_context().get("user").is_none());
            }
            assert!(current_context().get("user").is_some());
        }
        assert!(current_context().get("user").is_none());
    }

    #[test]
    fn test_depth_limit() {
        let ctx = Context::new();
        let frames: Vec<_> = (0..MAX_INCLUDE_DEPTH)
            .map(|_| RenderFrame::enter(&ctx).unwrap())
            .collect();
        assert!(RenderFrame::enter(&ctx).is_none());
        drop(frames);
        assert!(RenderFrame::enter(&ctx).is_some());
    }
}
