//! Rendering assembled chunks to text with source attributions.

use crate::types::{AssemblyFormat, ContextChunk};

fn location(chunk: &ContextChunk) -> Option<String> {
    let path = chunk.metadata.file_path.as_deref()?;
    match (chunk.metadata.start_line, chunk.metadata.end_line) {
        (Some(start), Some(end)) => Some(format!("{path}:{start}-{end}")),
        _ => Some(path.to_string()),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders chunks in order, attributing each to its source.
pub fn render(chunks: &[ContextChunk], format: AssemblyFormat, include_scores: bool) -> String {
    match format {
        AssemblyFormat::Plain => render_plain(chunks, include_scores),
        AssemblyFormat::Markdown => render_markdown(chunks, include_scores),
        AssemblyFormat::Xml => render_xml(chunks, include_scores),
    }
}

fn render_plain(chunks: &[ContextChunk], include_scores: bool) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            out.push_str("\n---\n");
        }
        out.push_str(&format!("[{}", chunk.source));
        if let Some(loc) = location(chunk) {
            out.push_str(&format!(" {loc}"));
        }
        if include_scores {
            out.push_str(&format!(" score={:.3}", chunk.relevance));
        }
        out.push_str("]\n");
        out.push_str(&chunk.content);
    }
    out
}

fn render_markdown(chunks: &[ContextChunk], include_scores: bool) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let mut heading = format!("### {}", chunk.source);
        if let Some(loc) = location(chunk) {
            heading.push_str(&format!(" — `{loc}`"));
        }
        if include_scores {
            heading.push_str(&format!(" ({:.3})", chunk.relevance));
        }
        out.push_str(&heading);
        out.push('\n');
        let fence_lang = chunk.metadata.language.as_deref().unwrap_or("");
        out.push_str(&format!("```{fence_lang}\n{}\n```\n\n", chunk.content));
    }
    out.trim_end().to_string()
}

fn render_xml(chunks: &[ContextChunk], include_scores: bool) -> String {
    let mut out = String::from("<context>\n");
    for chunk in chunks {
        out.push_str(&format!("  <chunk source=\"{}\"", chunk.source));
        if let Some(loc) = location(chunk) {
            out.push_str(&format!(" location=\"{}\"", xml_escape(&loc)));
        }
        if include_scores {
            out.push_str(&format!(" score=\"{:.3}\"", chunk.relevance));
        }
        out.push_str(&format!(">\n{}\n  </chunk>\n", xml_escape(&chunk.content)));
    }
    out.push_str("</context>");
    out
}
