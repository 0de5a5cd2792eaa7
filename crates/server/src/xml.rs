#![forbid(unsafe_code)]

use std::borrow::Cow;

/// Attribute/text escaping for response assembly.
pub(crate) fn esc(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}

/// Wraps filter output in CDATA, splitting any embedded `]]>` so the result
/// stays well-formed.
pub(crate) fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

/// Concatenated text of an element, CDATA included.
pub(crate) fn node_text(node: roxmltree::Node<'_, '_>) -> String {
    let mut out = String::new();
    for child in node.children() {
        if child.is_text() {
            if let Some(text) = child.text() {
                out.push_str(text);
            }
        }
    }
    out
}

/// First child element with the given tag name.
pub(crate) fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.has_tag_name(name))
}

pub(crate) fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name).map(node_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdata_survives_embedded_terminator() {
        assert_eq!(cdata("a]]>b"), "<![CDATA[a]]]]><![CDATA[>b]]>");
        assert_eq!(cdata("plain"), "<![CDATA[plain]]>");
    }

    #[test]
    fn node_text_includes_cdata_sections() {
        let doc = roxmltree::Document::parse("<a>x<![CDATA[<raw>]]>y</a>").unwrap();
        assert_eq!(node_text(doc.root_element()), "x<raw>y");
    }

    #[test]
    fn child_lookup_ignores_text_nodes() {
        let doc = roxmltree::Document::parse("<a> <b>1</b><c/></a>").unwrap();
        assert_eq!(child_text(doc.root_element(), "b").as_deref(), Some("1"));
        assert!(child(doc.root_element(), "d").is_none());
    }
}
