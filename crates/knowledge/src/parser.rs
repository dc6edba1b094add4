//! Text extraction helpers for loaded sources.

/// Strip HTML to readable text.
///
/// Script and style bodies are dropped, tags removed and whitespace
/// collapsed to single spaces.
pub fn clean_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    let lower = html.to_lowercase();

    for (i, ch) in html.char_indices() {
        if ch == '<' {
            in_tag = true;

            // Lowercasing can change byte lengths for a few scripts
            let rest = lower.get(i..).unwrap_or("");
            if rest.starts_with("<script") {
                in_script = true;
            } else if rest.starts_with("</script") {
                in_script = false;
            } else if rest.starts_with("<style") {
                in_style = true;
            } else if rest.starts_with("</style") {
                in_style = false;
            }
        } else if ch == '>' {
            in_tag = false;
            result.push(' ');
        } else if !in_tag && !in_script && !in_style {
            result.push(ch);
        }
    }

    decode_entities(&result)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Check if text is likely UTF-8 text (not binary).
pub fn is_likely_text(data: &str) -> bool {
    // Simple heuristic: check for null bytes
    !data.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_html() {
        let input = "<html><body><p>Hello <b>world</b></p></body></html>";
        assert_eq!(clean_html(input), "Hello world");
    }

    #[test]
    fn test_clean_html_drops_script_and_style() {
        let input = "<head><style>p { color: red; }</style><script>var x = 1;</script></head>\
                     <body><h1>Modular&nbsp;RAG</h1><p>Index &amp; retrieve</p></body>";
        assert_eq!(clean_html(input), "Modular RAG Index & retrieve");
    }

    #[test]
    fn test_clean_html_non_ascii() {
        assert_eq!(clean_html("<p>检索增强生成</p>"), "检索增强生成");
    }

    #[test]
    fn test_is_likely_text() {
        assert!(is_likely_text("plain text"));
        assert!(!is_likely_text("bin\0ary"));
    }
}
