//! Prompt System - built-in templates and Handlebars rendering

mod render;

pub use render::PromptRenderer;

/// System prompt for the fix advisor
pub const FIX_SYSTEM_PROMPT: &str = include_str!("templates/fix_system.hbs");

/// Per-failure request template for the fix advisor
pub const FIX_REQUEST_TEMPLATE: &str = include_str!("templates/fix_request.hbs");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_register() {
        let mut renderer = PromptRenderer::new();
        renderer.register_template("system", FIX_SYSTEM_PROMPT).unwrap();
        renderer.register_template("request", FIX_REQUEST_TEMPLATE).unwrap();
    }
}
