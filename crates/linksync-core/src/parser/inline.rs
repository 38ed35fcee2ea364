//! Inline phase: walks paragraph bytes and dispatches on the current byte.

use std::borrow::Cow;

use super::{is_alnum, is_space, skip_char, skip_space, skip_until_char, LinkNode, Node, Parser, MAX_NESTING};

/// Characters that may be backslash-escaped.
const ESCAPE_CHARS: &[u8] = br"\`*_{}[]()#+-.!:|&<>~^";

impl<'a> Parser<'a> {
    /// Parses text within a block. Handlers may recurse; depth is bounded.
    pub(crate) fn inline(&mut self, data: &'a [u8]) {
        if self.nesting >= MAX_NESTING || data.is_empty() {
            return;
        }
        self.nesting += 1;

        let mut end = 0;
        while end < data.len() {
            let (consumed, node) = match data[end] {
                b' ' => maybe_line_break(data, end),
                b'`' => code_span(data, end),
                b'[' => self.link(data, end),
                b'<' => self.left_angle(data, end),
                b'\\' => escape(data, end),
                b'!' => self.maybe_image(data, end),
                _ => (0, None),
            };
            if consumed == 0 {
                end += 1;
                continue;
            }
            if let Some(node) = node {
                self.nodes.push(node);
            }
            end += consumed;
        }

        self.nesting -= 1;
    }

    // '!' starts an image only when followed by '['
    fn maybe_image(&mut self, data: &'a [u8], offset: usize) -> (usize, Option<Node<'a>>) {
        if offset + 1 < data.len() && data[offset + 1] == b'[' {
            return self.link(data, offset);
        }
        (0, None)
    }

    /// '[': parse a link or an image.
    fn link(&mut self, data: &'a [u8], offset: usize) -> (usize, Option<Node<'a>>) {
        // no links inside the text of another link
        if self.inside_link
            && ((offset > 0 && data[offset - 1] == b'[')
                || (offset + 1 < data.len() && data[offset + 1] == b'^'))
        {
            return (0, None);
        }

        let mut offset = offset;
        let is_image = data[offset] == b'!';
        if is_image {
            offset += 1;
        }
        let data = &data[offset..];

        // look for the matching closing bracket, tolerating nesting,
        // newlines and escaped brackets
        let mut i = 1usize;
        let mut text_has_nl = false;
        let mut level = 1i32;
        while level > 0 && i < data.len() {
            if data[i] == b'\n' {
                text_has_nl = true;
            } else if data[i - 1] == b'\\' {
                // escaped char
            } else if data[i] == b'[' {
                level += 1;
            } else if data[i] == b']' {
                level -= 1;
                if level <= 0 {
                    i -= 1;
                }
            }
            i += 1;
        }
        if i >= data.len() {
            return (0, None);
        }

        let txt_e = i;
        i += 1;
        i = skip_space(data, i);

        let mut link_slice: &'a [u8] = &[];
        let mut title: &'a [u8] = &[];
        let mut definition_span: Option<&'a [u8]> = None;

        if i < data.len() && data[i] == b'(' {
            // inline form: (dest "title")
            i += 1;
            i = skip_space(data, i);
            let link_b = i;
            let mut brace = 0i32;

            // look for the end of the destination: ' " )
            loop {
                if i >= data.len() {
                    break;
                }
                match data[i] {
                    b'\\' => i += 2,
                    b'(' => {
                        brace += 1;
                        i += 1;
                    }
                    b')' => {
                        if brace <= 0 {
                            break;
                        }
                        brace -= 1;
                        i += 1;
                    }
                    b'\'' | b'"' => break,
                    _ => i += 1,
                }
            }
            if i >= data.len() {
                return (0, None);
            }
            let mut link_e = i;

            // optional quoted title
            let mut title_b = 0usize;
            let mut title_e = 0usize;
            if data[i] == b'\'' || data[i] == b'"' {
                let quote = data[i];
                i += 1;
                title_b = i;
                let mut title_end_found = false;
                while i < data.len() {
                    if data[i] == b'\\' {
                        i += 1;
                    } else if data[i] == quote {
                        title_end_found = true;
                    } else if title_end_found && data[i] == b')' {
                        break;
                    }
                    i += 1;
                }
                if i >= data.len() {
                    return (0, None);
                }

                title_e = i - 1;
                while title_e > title_b && is_space(data[title_e]) {
                    title_e -= 1;
                }
                // closing quote must be present
                if data[title_e] != b'\'' && data[title_e] != b'"' {
                    title_b = 0;
                    title_e = 0;
                    link_e = i;
                }
            }

            // trim trailing whitespace of the destination
            while link_e > link_b && is_space(data[link_e - 1]) {
                link_e -= 1;
            }
            // remove optional angle brackets
            let mut lb = link_b;
            let mut le = link_e;
            if le > lb && data[lb] == b'<' {
                lb += 1;
            }
            if le > lb && data[le - 1] == b'>' {
                le -= 1;
            }
            if le > lb {
                link_slice = &data[lb..le];
            }
            if title_e > title_b {
                title = &data[title_b..title_e];
            }
            i += 1;
        } else if i + 1 < data.len() && data[i] == b'[' && data[i + 1] != b'^' {
            // reference form: [id]
            i += 1;
            let link_b = i;
            i = skip_until_char(data, i, b']');
            if i >= data.len() {
                return (0, None);
            }
            let link_e = i;

            let id: Cow<'a, [u8]> = if link_b == link_e {
                // collapsed form [text][]
                collapse_id(&data[1..txt_e], text_has_nl)
            } else {
                Cow::Borrowed(&data[link_b..link_e])
            };
            let Some(reference) = self.get_ref(&id) else {
                return (0, None);
            };
            link_slice = reference.dest;
            title = reference.title;
            definition_span = Some(reference.span);
            i += 1;
        } else {
            // shortcut reference: [text]
            let id = collapse_id(&data[1..txt_e], text_has_nl);
            let Some(reference) = self.get_ref(&id) else {
                return (0, None);
            };
            link_slice = reference.dest;
            title = reference.title;
            definition_span = Some(reference.span);
            i = txt_e + 1;
        }

        let destination = unescape_text(link_slice);
        let content = definition_span.unwrap_or(&data[..i.min(data.len())]);
        let node = LinkNode {
            content,
            destination,
            raw_destination: link_slice,
            title,
        };

        if is_image {
            self.nodes.push(Node::Text(&data[1..txt_e]));
            (i + 1, Some(Node::Image(node)))
        } else {
            // link text cannot contain other links; recurse with them off
            let inside = self.inside_link;
            self.inside_link = true;
            self.inline(&data[1..txt_e]);
            self.inside_link = inside;
            (i, Some(Node::Link(node)))
        }
    }

    /// '<': autolink, raw HTML tag or comment.
    fn left_angle(&mut self, data: &'a [u8], offset: usize) -> (usize, Option<Node<'a>>) {
        let data = &data[offset..];

        let (autolink, mut end) = tag_length(data);
        let comment = inline_html_comment(data);
        if comment > 0 {
            end = comment;
        }
        if end <= 2 {
            return (end, None);
        }
        if autolink == Autolink::Not || comment > 0 {
            return (end, Some(Node::HtmlSpan(&data[..end])));
        }

        let inner = &data[1..end - 1];
        let unescaped = unescape_text(inner);
        if unescaped.is_empty() {
            return (end, None);
        }
        let destination: Cow<'a, [u8]> = if autolink == Autolink::Email
            && !unescaped.starts_with(b"mailto:")
        {
            let mut prefixed = b"mailto:".to_vec();
            prefixed.extend_from_slice(&unescaped);
            Cow::Owned(prefixed)
        } else {
            unescaped
        };
        self.nodes.push(Node::Text(inner));
        (
            end,
            Some(Node::Link(LinkNode {
                content: &data[..end],
                destination,
                raw_destination: inner,
                title: &[],
            })),
        )
    }
}

// newline preceded by two spaces would become a hard break; no node either way
fn maybe_line_break<'a>(data: &'a [u8], offset: usize) -> (usize, Option<Node<'a>>) {
    let orig = offset;
    let offset = skip_char(data, offset, b' ');
    if offset < data.len() && data[offset] == b'\n' {
        if offset - orig >= 2 {
            return (offset - orig + 1, None);
        }
        return (offset - orig, None);
    }
    (0, None)
}

/// '`': code span, or a code block when the delimiter is a triple backtick
/// spanning lines. Either way the region is opaque.
fn code_span<'a>(data: &'a [u8], offset: usize) -> (usize, Option<Node<'a>>) {
    let data = &data[offset..];

    // count the backticks in the delimiter
    let nb = skip_char(data, 0, b'`');

    // find the matching delimiter
    let mut matched = 0;
    let mut end = nb;
    let mut lf_before_delimiter = false;
    while end < data.len() && matched < nb {
        if data[end] == b'\n' {
            lf_before_delimiter = true;
        }
        if data[end] == b'`' {
            matched += 1;
        } else {
            matched = 0;
        }
        end += 1;
    }
    if matched < nb && end >= data.len() {
        return (0, None);
    }

    let mut chars_after_delimiter = false;
    for &b in &data[end..] {
        if b == b'\n' {
            break;
        }
        if !is_space(b) {
            chars_after_delimiter = true;
            break;
        }
    }

    // trim outside whitespace
    let mut f_begin = nb;
    while f_begin < end && data[f_begin] == b' ' {
        f_begin += 1;
    }
    let mut f_end = end - nb;
    while f_end > f_begin && data[f_end - 1] == b' ' {
        f_end -= 1;
    }
    if f_begin == f_end {
        return (end, None);
    }

    if nb == 3 && lf_before_delimiter && !chars_after_delimiter {
        return (end, Some(Node::CodeBlock(&data[f_begin..f_end])));
    }
    (end, Some(Node::Code(&data[f_begin..f_end])))
}

// '\\' backslash escape
fn escape<'a>(data: &'a [u8], offset: usize) -> (usize, Option<Node<'a>>) {
    let data = &data[offset..];
    if data.len() <= 1 {
        return (2, None);
    }
    if !ESCAPE_CHARS.contains(&data[1]) {
        return (0, None);
    }
    (2, Some(Node::Text(&data[1..2])))
}

/// Resolves backslash escapes. Borrows when there is nothing to do.
pub(crate) fn unescape_text(src: &[u8]) -> Cow<'_, [u8]> {
    if !src.contains(&b'\\') {
        return Cow::Borrowed(src);
    }
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let org = i;
        while i < src.len() && src[i] != b'\\' {
            i += 1;
        }
        if i > org {
            out.extend_from_slice(&src[org..i]);
        }
        if i + 1 >= src.len() {
            break;
        }
        out.push(src[i + 1]);
        i += 2;
    }
    Cow::Owned(out)
}

// joins the lines of a multi-line link text into a reference id
fn collapse_id(text: &[u8], has_newlines: bool) -> Cow<'_, [u8]> {
    if !has_newlines {
        return Cow::Borrowed(text);
    }
    let mut out = Vec::with_capacity(text.len());
    for (j, &b) in text.iter().enumerate() {
        if b != b'\n' {
            out.push(b);
        } else if j > 0 && text[j - 1] != b' ' {
            out.push(b' ');
        }
    }
    Cow::Owned(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Autolink {
    Not,
    Normal,
    Email,
}

/// Returns the kind and length of the tag starting at `data`, or length 0.
fn tag_length(data: &[u8]) -> (Autolink, usize) {
    // a valid tag can't be shorter than 3 chars
    if data.len() < 3 || data[0] != b'<' {
        return (Autolink::Not, 0);
    }
    let mut i = if data[1] == b'/' { 2 } else { 1 };
    if !is_alnum(data[i]) {
        return (Autolink::Not, 0);
    }

    // try to find the beginning of an URI scheme
    let mut autolink = Autolink::Not;
    while i < data.len()
        && (is_alnum(data[i]) || data[i] == b'.' || data[i] == b'+' || data[i] == b'-')
    {
        i += 1;
    }

    if i > 1 && i < data.len() && data[i] == b'@' {
        if let Some(j) = mailto_autolink_len(&data[i..]) {
            return (Autolink::Email, i + j);
        }
    }

    if i > 2 && i < data.len() && data[i] == b':' {
        autolink = Autolink::Normal;
        i += 1;
    }

    if i >= data.len() {
        autolink = Autolink::Not;
    } else if autolink != Autolink::Not {
        // complete autolink test: no whitespace or quotes
        let j = i;
        while i < data.len() {
            if data[i] == b'\\' {
                i += 2;
            } else if data[i] == b'>' || data[i] == b'\'' || data[i] == b'"' || is_space(data[i]) {
                break;
            } else {
                i += 1;
            }
        }
        if i >= data.len() {
            return (autolink, 0);
        }
        if i > j && data[i] == b'>' {
            return (autolink, i + 1);
        }
        // a forbidden char has been found
        autolink = Autolink::Not;
    }

    let close = skip_until_char(data, i, b'>');
    if close >= data.len() {
        return (autolink, 0);
    }
    (autolink, close + 1)
}

// address is assumed to be [-@._a-zA-Z0-9]+ with exactly one '@'
fn mailto_autolink_len(data: &[u8]) -> Option<usize> {
    let mut at_signs = 0;
    for (i, &c) in data.iter().enumerate() {
        if is_alnum(c) {
            continue;
        }
        match c {
            b'@' => at_signs += 1,
            b'-' | b'.' | b'_' => {}
            b'>' => {
                if at_signs == 1 {
                    return Some(i + 1);
                }
                return None;
            }
            _ => return None,
        }
    }
    None
}

/// Length of an HTML comment starting at `data`, or 0.
fn inline_html_comment(data: &[u8]) -> usize {
    if data.len() < 5 {
        return 0;
    }
    if &data[..4] != b"<!--" {
        return 0;
    }
    let mut i = 5;
    while i < data.len() && !(data[i - 2] == b'-' && data[i - 1] == b'-' && data[i] == b'>') {
        i += 1;
    }
    if i >= data.len() {
        return 0;
    }
    i + 1
}
