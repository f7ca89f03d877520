//! Render configured command templates and the batch script with TinyTemplate
//!
//! Templates use TinyTemplate syntax (`{job_id}`, `{{ if x }}...{{ endif }}`). Output is not
//! HTML-escaped; values that end up in a shell are quoted by the caller.

use serde::Serialize;
use thiserror::Error;
use tinytemplate::TinyTemplate;

#[derive(Debug, Error)]
#[error("can't render {name} template: {message}")]
pub struct TemplateError {
    pub name: String,
    pub message: String,
}

pub fn render<C: Serialize>(name: &str, text: &str, context: &C) -> Result<String, TemplateError> {
    let fail = |err: tinytemplate::error::Error| TemplateError { name: name.to_string(), message: err.to_string() };

    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, text).map_err(fail)?;
    tt.render(name, context).map_err(fail)
}
