//! Mode-specific instruction payload for the worker.
//!
//! Each mode reads `PROMPT_<mode>.md` from the prompt directory and renders it
//! as a minijinja template. The loop does not interpret the result; it is
//! written verbatim to the worker's stdin every iteration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior, context};
use tracing::debug;

use crate::core::session::Mode;

/// Values available to instruction templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptVars {
    pub mode: Mode,
    pub branch: String,
    /// Scope of a `plan-work` session.
    pub work_description: Option<String>,
    /// Extra flags passed to `audit`.
    pub audit_flags: Vec<String>,
    pub max_iterations: u32,
}

/// Load and render the instruction template for `vars.mode`.
///
/// Fails when the template is missing or does not render; callers treat this
/// as a startup configuration error.
pub fn load_instructions(prompt_dir: &Path, vars: &PromptVars) -> Result<String> {
    let path = prompt_dir.join(vars.mode.prompt_file_name());
    if !path.is_file() {
        return Err(anyhow!(
            "missing instruction template {} for mode '{}'",
            path.display(),
            vars.mode
        ));
    }
    let template = fs::read_to_string(&path)
        .with_context(|| format!("read instruction template {}", path.display()))?;
    let rendered = render_instructions(&template, vars)
        .with_context(|| format!("render instruction template {}", path.display()))?;
    if rendered.trim().is_empty() {
        return Err(anyhow!(
            "instruction template {} rendered to an empty payload",
            path.display()
        ));
    }
    debug!(path = %path.display(), bytes = rendered.len(), "loaded instructions");
    Ok(rendered)
}

fn render_instructions(template: &str, vars: &PromptVars) -> Result<String> {
    let mut env = Environment::new();
    // A typo in a variable name should fail at startup, not silently render empty.
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template("instructions", template)
        .context("parse template")?;
    let tmpl = env.get_template("instructions")?;
    let rendered = tmpl.render(context! {
        mode => vars.mode.as_str(),
        branch => &vars.branch,
        work_description => vars.work_description.as_deref().unwrap_or(""),
        audit_flags => &vars.audit_flags,
        max_iterations => vars.max_iterations,
    })?;
    Ok(rendered)
}
