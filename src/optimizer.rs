//! Token reduction for TEI-encoded letters.
//!
//! TEI input is flattened into a one-line header (`TITEL: … | ABSENDER: … | …`) followed by the
//! plain letter body. Anything that is not well-formed TEI passes through untouched.

use roxmltree::{Document, Node, ParsingOptions};

/// Editorial apparatus dropped from the body text.
const SKIPPED_ELEMENTS: [&str; 9] = [
    "note", "rdg", "fw", "figDesc", "del", "orig", "sic", "abbr", "teiHeader",
];

/// Elements whose boundaries become line breaks.
const BLOCK_ELEMENTS: [&str; 10] = [
    "p", "div", "opener", "closer", "salute", "signed", "dateline", "lb", "head", "postscript",
];

/// Compact representation of a source document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizedDocument {
    /// `titleStmt/title`.
    pub title: Option<String>,
    /// Person of the `sent` correspondence action.
    pub sender: Option<String>,
    /// Person of the `received` correspondence action.
    pub recipient: Option<String>,
    /// Place of the `sent` correspondence action.
    pub place: Option<String>,
    /// Date of the `sent` correspondence action.
    pub date: Option<String>,
    /// Plain body text, or the full input for pass-through documents.
    pub body: String,
}

impl OptimizedDocument {
    fn passthrough(text: &str) -> Self {
        Self {
            body: text.to_string(),
            ..Self::default()
        }
    }

    fn has_header(&self) -> bool {
        self.title.is_some()
            || self.sender.is_some()
            || self.recipient.is_some()
            || self.place.is_some()
            || self.date.is_some()
    }

    /// Text sent to the model.
    pub fn render(&self) -> String {
        if !self.has_header() {
            return self.body.clone();
        }
        let fields = [
            ("TITEL", &self.title),
            ("ABSENDER", &self.sender),
            ("EMPFÄNGER", &self.recipient),
            ("ORT", &self.place),
            ("DATUM", &self.date),
        ];
        let header = fields
            .iter()
            .filter_map(|(label, value)| value.as_ref().map(|value| format!("{label}: {value}")))
            .collect::<Vec<_>>()
            .join(" | ");
        if self.body.is_empty() {
            header
        } else {
            format!("{header}\n\n{}", self.body)
        }
    }
}

/// Reduce `text` when it is TEI, otherwise return it unchanged.
///
/// `raw_xml` disables the reduction entirely.
pub fn optimize(text: &str, raw_xml: bool) -> OptimizedDocument {
    if raw_xml || !looks_like_xml(text) {
        return OptimizedDocument::passthrough(text);
    }

    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = match Document::parse_with_options(text, options) {
        Ok(document) => document,
        Err(error) => {
            tracing::debug!(error = %error, "XML parse failed, passing text through");
            return OptimizedDocument::passthrough(text);
        }
    };

    match extract_tei(&document) {
        Some(optimized) => {
            tracing::debug!(
                raw_chars = text.chars().count(),
                optimized_chars = optimized.render().chars().count(),
                "Optimized TEI document"
            );
            optimized
        }
        None => OptimizedDocument::passthrough(text),
    }
}

fn looks_like_xml(text: &str) -> bool {
    text.trim_start().starts_with('<')
}

fn extract_tei(document: &Document<'_>) -> Option<OptimizedDocument> {
    let root = document.root_element();
    if root.tag_name().name() != "TEI" {
        return None;
    }
    let header = child(root, "teiHeader")?;
    let text = child(root, "text")?;

    let title = find(header, "titleStmt")
        .and_then(|stmt| child(stmt, "title"))
        .and_then(text_of);

    let sent = correspondence(header, "sent");
    let received = correspondence(header, "received");

    let sender = sent.and_then(|action| find(action, "persName")).and_then(text_of);
    let place = sent.and_then(|action| find(action, "placeName")).and_then(text_of);
    let date = sent.and_then(|action| find(action, "date")).and_then(|date| {
        text_of(date).or_else(|| date.attribute("when").map(str::to_string))
    });
    let recipient = received
        .and_then(|action| find(action, "persName"))
        .and_then(text_of);

    let body_node = find(text, "body").unwrap_or(text);
    let mut body = String::new();
    collect_body(body_node, &mut body);

    Some(OptimizedDocument {
        title,
        sender,
        recipient,
        place,
        date,
        body: tidy(&body),
    })
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == name)
}

fn find<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|descendant| descendant.is_element() && descendant.tag_name().name() == name)
}

fn correspondence<'a, 'input>(header: Node<'a, 'input>, kind: &str) -> Option<Node<'a, 'input>> {
    header.descendants().find(|node| {
        node.is_element()
            && node.tag_name().name() == "correspAction"
            && node.attribute("type") == Some(kind)
    })
}

fn text_of(node: Node<'_, '_>) -> Option<String> {
    let joined = node
        .descendants()
        .filter(|descendant| descendant.is_text())
        .filter_map(|descendant| descendant.text())
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = collapse_whitespace(&joined);
    (!collapsed.is_empty()).then_some(collapsed)
}

fn collect_body(node: Node<'_, '_>, out: &mut String) {
    for child in node.children() {
        if child.is_text() {
            if let Some(text) = child.text() {
                out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
            }
            continue;
        }
        if !child.is_element() {
            continue;
        }
        let name = child.tag_name().name();
        if SKIPPED_ELEMENTS.contains(&name) {
            continue;
        }
        let block = BLOCK_ELEMENTS.contains(&name);
        if block {
            out.push('\n');
        }
        collect_body(child, out);
        if block {
            out.push('\n');
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse runs of whitespace inside lines and drop empty lines.
fn tidy(text: &str) -> String {
    text.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
