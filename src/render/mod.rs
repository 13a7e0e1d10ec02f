//! Markup for a growing response buffer.
//!
//! Rendering is recomputed from the whole buffer on every update. The buffer
//! is first split into typed segments on fence boundaries (see [`fence`]),
//! then each segment is turned into HTML (see [`html`]). A fence that has
//! opened but not closed renders as an in-progress code block, so a partial
//! stream never shows raw fence markers.

pub mod fence;
pub mod html;

pub use fence::{first_code_block, lex, Segment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFragment {
    pub markup: String,
    /// The buffer ends inside a code fence.
    pub has_open_block: bool,
}

pub fn render(buffer: &str) -> RenderedFragment {
    let segments = lex(buffer);
    let mut markup = String::with_capacity(buffer.len() + 64);
    for segment in &segments {
        html::segment(segment, &mut markup);
    }

    RenderedFragment {
        has_open_block: matches!(segments.last(), Some(Segment::OpenCodeBlock { .. })),
        markup,
    }
}

/// Standalone page around a fragment, for file-backed overlays.
pub fn page(fragment: &RenderedFragment) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Sparkles</title></head>\n<body><div class=\"msg-body\" style=\"white-space: pre-wrap\">{}</div></body></html>\n",
        fragment.markup
    )
}
