//! Minimal HTML tag scanner.
//!
//! Extracts `<a href>` and `<img src>` from HTML fragments embedded in
//! Markdown and from whole `.html`/`.htm` files. The emitted `content` span
//! is the element's opening tag exactly as it appears in the source, which is
//! what the link rewriter substitutes.
//!
//! Attribute values follow the lax rules real notes use: whitespace around
//! `=` is allowed, double-quoted values may contain single quotes and vice
//! versa, and bare values run until whitespace or `>`.

use std::borrow::Cow;

use super::{is_alnum, is_space, LinkNode};

struct Tag<'a> {
    span: &'a [u8],
    name: &'a [u8],
    attrs: Vec<(&'a [u8], &'a [u8])>,
    end: usize,
}

impl<'a> Tag<'a> {
    fn attr(&self, name: &str) -> Option<&'a [u8]> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| *v)
    }
}

/// Scans a whole document or fragment for link-bearing elements.
pub fn scan_document<'a>(input: &'a [u8]) -> (Vec<LinkNode<'a>>, Vec<LinkNode<'a>>) {
    let mut links = Vec::new();
    let mut images = Vec::new();
    collect_tags(input, &mut links, &mut images);
    (links, images)
}

pub(crate) fn collect_tags<'a>(
    input: &'a [u8],
    links: &mut Vec<LinkNode<'a>>,
    images: &mut Vec<LinkNode<'a>>,
) {
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'<' {
            i += 1;
            continue;
        }
        if input[i..].starts_with(b"<!--") {
            i = skip_comment(input, i);
            continue;
        }
        let Some(tag) = scan_tag(input, i) else {
            i += 1;
            continue;
        };
        if tag.name.eq_ignore_ascii_case(b"img") {
            if let Some(src) = tag.attr("src") {
                if !src.is_empty() {
                    images.push(link_node(tag.span, src));
                }
            }
        } else if tag.name.eq_ignore_ascii_case(b"a") {
            if let Some(href) = tag.attr("href") {
                if !href.is_empty() {
                    links.push(link_node(tag.span, href));
                }
            }
        }
        i = tag.end;
    }
}

fn link_node<'a>(span: &'a [u8], dest: &'a [u8]) -> LinkNode<'a> {
    LinkNode {
        content: span,
        destination: Cow::Borrowed(dest),
        raw_destination: dest,
        title: &[],
    }
}

fn skip_comment(input: &[u8], start: usize) -> usize {
    let mut i = start + 4;
    while i + 2 < input.len() {
        if &input[i..i + 3] == b"-->" {
            return i + 3;
        }
        i += 1;
    }
    input.len()
}

fn scan_tag(input: &[u8], start: usize) -> Option<Tag<'_>> {
    let mut i = start + 1;
    if i < input.len() && input[i] == b'/' {
        i += 1;
    }

    let name_start = i;
    while i < input.len() && is_alnum(input[i]) {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = &input[name_start..i];

    let mut attrs = Vec::new();
    loop {
        while i < input.len() && is_space(input[i]) {
            i += 1;
        }
        if i >= input.len() {
            return None;
        }
        match input[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        // attribute name
        let attr_start = i;
        while i < input.len()
            && !is_space(input[i])
            && input[i] != b'='
            && input[i] != b'>'
            && input[i] != b'/'
        {
            i += 1;
        }
        if i == attr_start {
            i += 1;
            continue;
        }
        let attr_name = &input[attr_start..i];

        while i < input.len() && is_space(input[i]) {
            i += 1;
        }
        let mut value: &[u8] = &[];
        if i < input.len() && input[i] == b'=' {
            i += 1;
            while i < input.len() && is_space(input[i]) {
                i += 1;
            }
            if i < input.len() && (input[i] == b'"' || input[i] == b'\'') {
                let quote = input[i];
                i += 1;
                let value_start = i;
                while i < input.len() && input[i] != quote {
                    i += 1;
                }
                if i >= input.len() {
                    return None;
                }
                value = &input[value_start..i];
                i += 1;
            } else {
                let value_start = i;
                while i < input.len() && !is_space(input[i]) && input[i] != b'>' {
                    i += 1;
                }
                value = &input[value_start..i];
            }
        }
        attrs.push((attr_name, value));
    }

    Some(Tag {
        span: &input[start..i],
        name,
        attrs,
        end: i,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images_of(html: &str) -> Vec<(String, String)> {
        let (_, images) = scan_document(html.as_bytes());
        images
            .iter()
            .map(|n| {
                (
                    String::from_utf8_lossy(&n.destination).into_owned(),
                    String::from_utf8_lossy(n.content).into_owned(),
                )
            })
            .collect()
    }

    #[test]
    fn quoted_and_bare_attribute_values() {
        let cases = [
            (
                r#"<img src="assets/img7.webp" alt="alt text" style="zoom:50%;" />"#,
                "assets/img7.webp",
            ),
            (r#"<img src = "../assets/img8.png" alt="alt text" />"#, "../assets/img8.png"),
            (r#"<img src=img9.png alt="alt text" />"#, "img9.png"),
            (r#"<img src=images/"quotes".png  />"#, r#"images/"quotes".png"#),
            (r#"<img src='images/"quotes2".png' alt="alt text" />"#, r#"images/"quotes2".png"#),
        ];
        for (html, want) in cases {
            let images = images_of(html);
            assert_eq!(images.len(), 1, "one image in {html:?}");
            assert_eq!(images[0].0, want);
            assert_eq!(images[0].1, html, "span must be the whole element");
        }
    }

    #[test]
    fn anchor_href_extraction() {
        let html = r#"<html><body><p><a id="x" href='./note.md'>note</a></p></body></html>"#;
        let (links, _) = scan_document(html.as_bytes());
        assert_eq!(links.len(), 1);
        assert_eq!(&*links[0].destination, b"./note.md");
        assert_eq!(links[0].content, br#"<a id="x" href='./note.md'>"#);
    }

    #[test]
    fn multiline_tag() {
        let html = "<img\n  src=\"pic.png\"\n  alt=\"a\"\n/>";
        let images = images_of(html);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0, "pic.png");
    }

    #[test]
    fn elements_inside_comments_are_ignored() {
        let images = images_of("<!-- <img src=hidden.png> --><img src=shown.png>");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0, "shown.png");
    }

    #[test]
    fn img_without_src_is_skipped() {
        assert!(images_of("<img alt=\"no source\">").is_empty());
    }
}
