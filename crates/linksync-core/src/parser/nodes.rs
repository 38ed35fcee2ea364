use std::borrow::Cow;

/// One parsed inline element. Consumers match exhaustively; only `Link` and
/// `Image` carry destinations, everything else is opaque source text.
#[derive(Debug, Clone)]
pub enum Node<'a> {
    Text(&'a [u8]),
    Code(&'a [u8]),
    CodeBlock(&'a [u8]),
    HtmlSpan(&'a [u8]),
    Link(LinkNode<'a>),
    Image(LinkNode<'a>),
}

/// A link or image occurrence.
///
/// `content` is the exact byte span of the source that constitutes the link.
/// For reference-style links it is the span of the matching definition, so a
/// rewrite of the definition updates every use. `raw_destination` is the
/// destination exactly as written; `destination` has backslash escapes
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNode<'a> {
    pub content: &'a [u8],
    pub destination: Cow<'a, [u8]>,
    pub raw_destination: &'a [u8],
    pub title: &'a [u8],
}
