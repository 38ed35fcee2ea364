//! Hand-written Markdown and HTML link parser.
//!
//! The parser runs in two phases. The block phase splits the input into
//! paragraphs, skipping indented and fenced code as opaque regions and
//! registering reference definitions (`[id]: dest "title"`). The inline phase
//! then walks each paragraph byte by byte, dispatching on the current byte to
//! recognize code spans, links, images, autolinks, raw HTML tags and escapes.
//!
//! The parser is total: malformed input yields fewer nodes, never an error.
//! It never mutates or copies the input; every emitted span borrows from it.

mod block;
pub(crate) mod html;
mod inline;
mod nodes;

use std::collections::HashMap;

pub use nodes::{LinkNode, Node};

/// Maximum inline recursion depth, bounding pathological nesting.
const MAX_NESTING: usize = 16;

/// A parsed reference definition. `span` covers `[id]: dest` in the source
/// and becomes the `content` of every link that resolves to this id.
#[derive(Clone, Copy)]
struct Reference<'a> {
    dest: &'a [u8],
    title: &'a [u8],
    span: &'a [u8],
}

pub struct Parser<'a> {
    refs: HashMap<String, Reference<'a>>,
    nesting: usize,
    inside_link: bool,
    blocks: Vec<&'a [u8]>,
    nodes: Vec<Node<'a>>,
}

impl<'a> Default for Parser<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Parser<'a> {
    pub fn new() -> Self {
        Self {
            refs: HashMap::new(),
            nesting: 0,
            inside_link: false,
            blocks: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Parses the input into blocks, then each block into inline nodes.
    pub fn parse(&mut self, input: &'a [u8]) {
        self.block(input);
        let blocks = std::mem::take(&mut self.blocks);
        for block in blocks {
            self.inline(block);
        }
    }

    pub fn nodes(&self) -> &[Node<'a>] {
        &self.nodes
    }

    /// Returns all links and images in occurrence order. Raw HTML spans are
    /// scanned for `<a href>` and `<img src>` elements.
    pub fn links_and_images(&self) -> (Vec<LinkNode<'a>>, Vec<LinkNode<'a>>) {
        let mut links = Vec::new();
        let mut images = Vec::new();
        for node in &self.nodes {
            match node {
                Node::Link(link) => links.push(link.clone()),
                Node::Image(image) => images.push(image.clone()),
                Node::HtmlSpan(frag) => html::collect_tags(frag, &mut links, &mut images),
                Node::Text(_) | Node::Code(_) | Node::CodeBlock(_) => {}
            }
        }
        (links, images)
    }

    // refs are case insensitive
    fn get_ref(&self, id: &[u8]) -> Option<Reference<'a>> {
        let key = String::from_utf8_lossy(id).to_lowercase();
        self.refs.get(&key).copied()
    }
}

pub(crate) fn is_space(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == b'\n' || c == b'\r' || c == 0x0c || c == 0x0b
}

pub(crate) fn is_letter(c: u8) -> bool {
    c.is_ascii_alphabetic()
}

pub(crate) fn is_alnum(c: u8) -> bool {
    c.is_ascii_digit() || is_letter(c)
}

/// Advances `i` as long as `data[i] == c`.
pub(crate) fn skip_char(data: &[u8], mut i: usize, c: u8) -> usize {
    while i < data.len() && data[i] == c {
        i += 1;
    }
    i
}

/// Advances `i` as long as `data[i] != c`.
pub(crate) fn skip_until_char(data: &[u8], mut i: usize, c: u8) -> usize {
    while i < data.len() && data[i] != c {
        i += 1;
    }
    i
}

pub(crate) fn skip_space(data: &[u8], mut i: usize) -> usize {
    while i < data.len() && is_space(data[i]) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct LinkFlat {
        dest: String,
        title: String,
        md: String,
    }

    fn flat(l: &LinkNode) -> LinkFlat {
        LinkFlat {
            dest: String::from_utf8_lossy(&l.destination).into_owned(),
            title: String::from_utf8_lossy(l.title).into_owned(),
            md: String::from_utf8_lossy(l.content).into_owned(),
        }
    }

    fn parse_links(md: &str) -> (Vec<LinkFlat>, Vec<LinkFlat>) {
        let mut p = Parser::new();
        p.parse(md.as_bytes());
        let (links, images) = p.links_and_images();
        (
            links.iter().map(flat).collect(),
            images.iter().map(flat).collect(),
        )
    }

    #[test]
    fn normal_links() {
        let cases = [
            (
                "[text](<./some file.md> \"title\")",
                LinkFlat {
                    dest: "./some file.md".into(),
                    title: "title".into(),
                    md: "[text](<./some file.md> \"title\")".into(),
                },
            ),
            (
                "[text](./with (parenthesis).md \"title\")",
                LinkFlat {
                    dest: "./with (parenthesis).md".into(),
                    title: "title".into(),
                    md: "[text](./with (parenthesis).md \"title\")".into(),
                },
            ),
            (
                "[[1]](./foo.md '(bar)')",
                LinkFlat {
                    dest: "./foo.md".into(),
                    title: "(bar)".into(),
                    md: "[[1]](./foo.md '(bar)')".into(),
                },
            ),
        ];
        for (md, want) in cases {
            let (links, _) = parse_links(md);
            assert_eq!(links.len(), 1, "exactly one link in {md:?}");
            assert_eq!(links[0], want);
        }
    }

    #[test]
    fn normal_images() {
        let (_, images) = parse_links("![alt text](<./some file.png> \"title\")");
        assert_eq!(images.len(), 1);
        assert_eq!(
            images[0],
            LinkFlat {
                dest: "./some file.png".into(),
                title: "title".into(),
                md: "[alt text](<./some file.png> \"title\")".into(),
            }
        );
    }

    #[test]
    fn reference_links_point_to_their_definition() {
        let md = "[text][ref]\n\n[ref]: ref_file.md \"title\"";
        let (links, _) = parse_links(md);
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0],
            LinkFlat {
                dest: "ref_file.md".into(),
                title: "title".into(),
                md: "[ref]: ref_file.md".into(),
            }
        );
    }

    #[test]
    fn reference_images_point_to_their_definition() {
        let md = "![alt text][ref_img]\n\n[ref_img]: ref_image.png \"my image\"";
        let (_, images) = parse_links(md);
        assert_eq!(images.len(), 1);
        assert_eq!(
            images[0],
            LinkFlat {
                dest: "ref_image.png".into(),
                title: "my image".into(),
                md: "[ref_img]: ref_image.png".into(),
            }
        );
    }

    #[test]
    fn reference_ids_are_case_insensitive() {
        let md = "[text][REF]\n\n[ref]: target.md";
        let (links, _) = parse_links(md);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].dest, "target.md");
    }

    #[test]
    fn shortcut_reference_link() {
        let md = "[target]\n\n[target]: note.md";
        let (links, _) = parse_links(md);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].dest, "note.md");
        assert_eq!(links[0].md, "[target]: note.md");
    }

    #[test]
    fn unresolved_reference_produces_nothing() {
        let (links, images) = parse_links("[text][nothing] and ![img][missing]");
        assert!(links.is_empty());
        assert!(images.is_empty());
    }

    #[test]
    fn html_link_inside_markdown() {
        let a = r#"<a href="./note2.md">"#;
        let md = format!("<p class=\"c\">{a}link</a></p>");
        let (links, _) = parse_links(&md);
        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0],
            LinkFlat {
                dest: "./note2.md".into(),
                title: "".into(),
                md: a.into(),
            }
        );
    }

    #[test]
    fn html_image_inside_markdown() {
        let img = r#"<img width="400px" src="./assets/image.png" title="title" />"#;
        let md = format!("<p class=\"c\">{img}</p>");
        let (_, images) = parse_links(&md);
        assert_eq!(images.len(), 1);
        assert_eq!(
            images[0],
            LinkFlat {
                dest: "./assets/image.png".into(),
                title: "".into(),
                md: img.into(),
            }
        );
    }

    #[test]
    fn code_regions_are_opaque() {
        let md = "`[inline](code.md)`\n\n```\n[fenced](code.md)\n```\n\n    [indented](code.md)\n";
        let (links, _) = parse_links(md);
        assert!(links.is_empty(), "links inside code must not be parsed: {links:?}");
    }

    #[test]
    fn unclosed_fence_falls_back_to_paragraph() {
        let md = "```\n[x](y.md)\n";
        let (links, _) = parse_links(md);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn escaped_bracket_does_not_open_a_link() {
        let (links, _) = parse_links("\\[not](a.md) but [yes](b.md)");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].dest, "b.md");
    }

    #[test]
    fn nested_image_inside_link() {
        let md = "[![video](./assets/img6.png)](https://youtube.com)";
        let (links, images) = parse_links(md);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].dest, "./assets/img6.png");
        assert_eq!(images[0].md, "[video](./assets/img6.png)");
        assert_eq!(links.len(), 1, "outer link is still emitted");
        assert_eq!(links[0].dest, "https://youtube.com");
    }

    #[test]
    fn autolinks_keep_their_scheme() {
        let (links, _) = parse_links("<https://example.com/x> and <user@example.com>");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].dest, "https://example.com/x");
        assert_eq!(links[1].dest, "mailto:user@example.com");
    }

    #[test]
    fn every_span_is_a_slice_of_the_input() {
        let md = "![a](one.png)\ntext [b](two.md \"t\")\n<img src=three.png />\n\n[r]: four.md";
        let mut p = Parser::new();
        p.parse(md.as_bytes());
        let (links, images) = p.links_and_images();
        for l in links.iter().chain(images.iter()) {
            let s = String::from_utf8_lossy(l.content);
            assert!(md.contains(s.as_ref()), "{s:?} must occur verbatim in the input");
        }
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let mut md = String::new();
        for _ in 0..64 {
            md.push_str("[a");
        }
        for _ in 0..64 {
            md.push_str("](x.md)");
        }
        let mut p = Parser::new();
        p.parse(md.as_bytes());
        // no panic, no unbounded recursion
    }
}
