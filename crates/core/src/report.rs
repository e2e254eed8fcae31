use std::path::Path;

use anyhow::{Context, Result};

use crate::schemas::UIState;

/// Markdown summary of a run: one section per state with its screenshots.
pub fn write_markdown_report(root: &Path, states: &[UIState]) -> Result<()> {
    let mut out = String::from("# Workflow Report\n\n");
    out.push_str(&format!("Captured states: {}\n\n", states.len()));
    for (idx, state) in states.iter().enumerate() {
        out.push_str(&format!("## Step {idx}: {}\n\n", state.description));
        if let Some(action) = &state.action {
            out.push_str(&format!("- Action: `{action}`\n"));
        }
        out.push_str(&format!("- URL: {}\n", state.url));
        out.push_str(&format!(
            "- Significance: {}\n",
            state.significance().as_str()
        ));
        for (viewport, filename) in &state.screenshots {
            out.push_str(&format!("- ![{viewport}]({filename})\n"));
        }
        out.push('\n');
    }
    std::fs::write(root.join("report.md"), out).context("Failed to write report.md")
}

/// Self-contained HTML report with inline styling and the trace link.
pub fn write_html_report(root: &Path, states: &[UIState], trace_zip: &str) -> Result<()> {
    let mut body = String::new();
    for (idx, state) in states.iter().enumerate() {
        let action = state
            .action
            .as_deref()
            .map(escape_html)
            .unwrap_or_default();
        body.push_str(&format!(
            "<section class=\"state {significance}\">\
             <h2>Step {idx}: {description}</h2>\
             <p class=\"meta\"><code>{action}</code> &mdash; <a href=\"{url}\">{url}</a></p>",
            significance = state.significance().as_str(),
            description = escape_html(&state.description),
            url = escape_html(&state.url),
        ));
        for (viewport, filename) in &state.screenshots {
            body.push_str(&format!(
                "<figure><img src=\"{filename}\" alt=\"{viewport}\" loading=\"lazy\">\
                 <figcaption>{viewport}</figcaption></figure>",
            ));
        }
        body.push_str("</section>");
    }

    let html = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <title>Workflow Report</title><style>\
         body {{ font-family: system-ui, sans-serif; margin: 2rem; }}\
         section {{ border-left: 4px solid #ccc; padding: 0 1rem; margin: 1rem 0; }}\
         section.critical {{ border-color: #d33; }}\
         section.supporting {{ border-color: #36c; }}\
         img {{ max-width: 480px; border: 1px solid #ddd; }}\
         figure {{ display: inline-block; margin: 0.5rem; }}\
         .meta {{ color: #555; }}\
         </style></head><body>\
         <h1>Workflow Report</h1>\
         <p>{count} states captured &middot; <a href=\"{trace}\">browser trace</a></p>\
         {body}</body></html>",
        count = states.len(),
        trace = escape_html(trace_zip),
    );
    std::fs::write(root.join("report.html"), html).context("Failed to write report.html")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn state() -> UIState {
        let mut screenshots = BTreeMap::new();
        screenshots.insert("desktop".to_string(), "00_desktop.png".to_string());
        UIState {
            id: "state_test".into(),
            url: "https://example.com".into(),
            description: "Home page".into(),
            has_modal: false,
            action: Some("navigate(https://example.com)".into()),
            screenshots,
            metadata: Default::default(),
            state_signature: "0".repeat(64),
        }
    }

    #[test]
    fn reports_are_written_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let states = vec![state()];
        write_markdown_report(dir.path(), &states).unwrap();
        write_html_report(dir.path(), &states, "trace.zip").unwrap();

        let md = std::fs::read_to_string(dir.path().join("report.md")).unwrap();
        assert!(md.contains("Home page"));
        assert!(md.contains("00_desktop.png"));

        let html = std::fs::read_to_string(dir.path().join("report.html")).unwrap();
        assert!(html.contains("trace.zip"));
        assert!(html.contains("Home page"));
    }

    #[test]
    fn html_escapes_markup_in_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = state();
        s.description = "<script>alert(1)</script>".into();
        write_html_report(dir.path(), &[s], "trace.zip").unwrap();
        let html = std::fs::read_to_string(dir.path().join("report.html")).unwrap();
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
