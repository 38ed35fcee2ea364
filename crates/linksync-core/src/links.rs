//! Link extraction and rewriting over parsed notes.
//!
//! Destinations are classified by the source file's extension (`.md` gets the
//! Markdown parser, `.html`/`.htm` the tag scanner), filtered for URLs and
//! resolved into root-relative keys.

use std::path::Path;

use crate::parser::{self, html, LinkNode};
use crate::paths;

/// One link occurrence found in a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Exact substring of the source that constitutes the link, used as the
    /// replacement target when rewriting.
    pub full_link: String,
    /// The destination exactly as written, possibly percent-encoded.
    pub path: String,
    /// The destination resolved relative to the root, decoded and
    /// slash-normalized. Linked assets are looked up under this key.
    pub root_path: String,
}

/// Instruction for the rewriter: this link must now point to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedLink {
    pub to: String,
    pub link: LinkInfo,
}

/// Parser capability injected into the synchronizer.
pub trait LinkExtractor: Send + Sync {
    /// Extracts links and images from a file's content. `file_path` must be
    /// root-relative.
    fn extract(&self, file_path: &str, content: &str) -> (Vec<LinkInfo>, Vec<LinkInfo>);
}

/// Default extractor backed by the hand-written parsers.
pub struct MarkupExtractor;

impl LinkExtractor for MarkupExtractor {
    fn extract(&self, file_path: &str, content: &str) -> (Vec<LinkInfo>, Vec<LinkInfo>) {
        let bytes = content.as_bytes();
        let (links, images) = match extension(file_path).as_deref() {
            Some("md") => {
                let mut parser = parser::Parser::new();
                parser.parse(bytes);
                parser.links_and_images()
            }
            Some("html" | "htm") => html::scan_document(bytes),
            _ => return (Vec::new(), Vec::new()),
        };
        (
            process_links(file_path, &links),
            process_links(file_path, &images),
        )
    }
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

pub fn is_parsable(path: &str) -> bool {
    matches!(extension(path).as_deref(), Some("md" | "html" | "htm"))
}

pub fn is_image(path: &str) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("png" | "jpg" | "jpeg" | "webp" | "svg" | "tiff" | "tff" | "gif")
    )
}

// a destination with a ':' before the first '/' is an URL, not a file
fn is_url(dest: &str) -> bool {
    match dest.find(':') {
        None => false,
        Some(colon) => match dest.find('/') {
            None => true,
            Some(slash) => colon < slash,
        },
    }
}

fn process_links(file_path: &str, nodes: &[LinkNode]) -> Vec<LinkInfo> {
    let dir = paths::parent(file_path);
    let mut result = Vec::new();
    for node in nodes {
        let raw = String::from_utf8_lossy(node.raw_destination).into_owned();
        let decoded = paths::percent_decode(&String::from_utf8_lossy(&node.destination));
        if decoded.is_empty() || is_url(&decoded) {
            continue;
        }
        let root_path = if paths::is_absolute(&decoded) {
            decoded
        } else {
            paths::join(dir, &decoded)
        };
        result.push(LinkInfo {
            full_link: String::from_utf8_lossy(node.content).into_owned(),
            path: raw,
            root_path,
        });
    }
    result
}

/// Rewrites the given links inside a note's content.
///
/// For links written relative, the new destination is expressed relative to
/// the note's directory; absolute destinations are used verbatim. Spaces are
/// percent-encoded. The substring substitution happens inside `full_link`
/// first, then the whole `full_link` span is replaced in the content, so
/// every textual occurrence is rewritten.
pub fn replace_links(file_path: &str, content: &str, moves: &[MovedLink]) -> String {
    let dir = paths::parent(file_path);
    let mut result = content.to_string();

    for moved in moves {
        let mut target = if paths::is_absolute(&moved.link.path) {
            String::new()
        } else {
            paths::relative_to(dir, &moved.to)
        };
        if target.is_empty() || target == "." {
            target = moved.to.clone();
        }
        let target = paths::encode_spaces(&target);

        // replace the path in the link, then the link in the file
        let new_link = moved.link.full_link.replacen(&moved.link.path, &target, 1);
        result = result.replace(&moved.link.full_link, &new_link);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(file_path: &str, content: &str) -> (Vec<LinkInfo>, Vec<LinkInfo>) {
        MarkupExtractor.extract(file_path, content)
    }

    #[test]
    fn markdown_image_destinations() {
        // (markdown, written path, root-relative key)
        let cases = [
            (
                "![alt text](./assets/subfolder/image.png)",
                "./assets/subfolder/image.png",
                "notes/assets/subfolder/image.png",
            ),
            ("![alt text](no-alt-text.png)", "no-alt-text.png", "notes/no-alt-text.png"),
            (
                "![alt text](assets/img2.jpeg \"image title\")",
                "assets/img2.jpeg",
                "notes/assets/img2.jpeg",
            ),
            ("![alt text](../assets/img4.svg \"title\")", "../assets/img4.svg", "assets/img4.svg"),
            (
                "![alt text](../../outside_dir/img5.svg)",
                "../../outside_dir/img5.svg",
                "../outside_dir/img5.svg",
            ),
            (
                "![alt text](./non_latin/изображение.svg)",
                "./non_latin/изображение.svg",
                "notes/non_latin/изображение.svg",
            ),
            ("![alt [text]](./(assets)/img.png)", "./(assets)/img.png", "notes/(assets)/img.png"),
            (
                "![alt text](./%D0%B8/%D1%81%D1%85%D0%B5%D0%BC%D0%B0.svg)",
                "./%D0%B8/%D1%81%D1%85%D0%B5%D0%BC%D0%B0.svg",
                "notes/и/схема.svg",
            ),
        ];
        for (md, path, root_path) in cases {
            let (_, images) = extract("notes/note.md", md);
            assert_eq!(images.len(), 1, "one image in {md:?}");
            assert_eq!(images[0].path, path, "in {md:?}");
            assert_eq!(images[0].root_path, root_path, "in {md:?}");
        }
    }

    #[test]
    fn absolute_destination_stays_absolute() {
        let (_, images) = extract(
            "notes/note.md",
            "![alt text](/home/user/notes/assets 2/name with spaces.jpg)",
        );
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].root_path, "/home/user/notes/assets 2/name with spaces.jpg");
    }

    #[test]
    fn reference_definition_is_the_replacement_span() {
        let md = "![alt text][imgid1]\n[imgid1]: assets/ref_image.png \"title\"";
        let (_, images) = extract("note.md", md);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].full_link, "[imgid1]: assets/ref_image.png");
        assert_eq!(images[0].root_path, "assets/ref_image.png");
    }

    #[test]
    fn urls_are_filtered() {
        let md = "[x](https://example.com/p.png)\n![y](http://img.host/a.png)\n<https://auto.link>\n[m](mailto:user@example.com)";
        let (links, images) = extract("note.md", md);
        assert!(links.is_empty(), "urls must never be links: {links:?}");
        assert!(images.is_empty());
    }

    #[test]
    fn colon_after_slash_is_not_an_url() {
        let (links, _) = extract("note.md", "[odd](./dir/a:b.md)");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].root_path, "dir/a:b.md");
    }

    #[test]
    fn html_files_use_the_tag_scanner() {
        let html = r#"<html><body><img src="img/pic.png"><a href="other.html">x</a></body></html>"#;
        let (links, images) = extract("pages/index.html", html);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].root_path, "pages/img/pic.png");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].root_path, "pages/other.html");
    }

    #[test]
    fn unknown_extensions_yield_nothing() {
        let (links, images) = extract("data.txt", "![a](b.png)");
        assert!(links.is_empty() && images.is_empty());
    }

    #[test]
    fn replace_rewrites_relative_destination() {
        let link = LinkInfo {
            full_link: "[a](./assets/image01.png)".into(),
            path: "./assets/image01.png".into(),
            root_path: "notes/folder/assets/image01.png".into(),
        };
        let content = "![a](./assets/image01.png)";
        let moves = vec![MovedLink {
            to: "notes/folder/assets/image01.png".into(),
            link,
        }];
        let updated = replace_links("notes/renamed.md", content, &moves);
        assert_eq!(updated, "![a](folder/assets/image01.png)");
    }

    #[test]
    fn replace_rewrites_every_occurrence() {
        let link = LinkInfo {
            full_link: "[](img1.png)".into(),
            path: "img1.png".into(),
            root_path: "notes/rnd/img1.png".into(),
        };
        let content = "![](img1.png)\n!Some Text\n![](img1.png)";
        let moves = vec![MovedLink {
            to: "notes/rnd/img1.png".into(),
            link,
        }];
        let updated = replace_links("notes/note1.md", content, &moves);
        assert_eq!(updated, "![](rnd/img1.png)\n!Some Text\n![](rnd/img1.png)");
    }

    #[test]
    fn replace_keeps_absolute_destination_verbatim() {
        let link = LinkInfo {
            full_link: "[a](/abs/img.png)".into(),
            path: "/abs/img.png".into(),
            root_path: "/abs/img.png".into(),
        };
        let moves = vec![MovedLink {
            to: "/abs/moved/img.png".into(),
            link,
        }];
        let updated = replace_links("notes/n.md", "![a](/abs/img.png)", &moves);
        assert_eq!(updated, "![a](/abs/moved/img.png)");
    }

    #[test]
    fn replace_encodes_spaces_in_the_new_target() {
        let link = LinkInfo {
            full_link: "[a](old.png)".into(),
            path: "old.png".into(),
            root_path: "old.png".into(),
        };
        let moves = vec![MovedLink {
            to: "assets two/new image.png".into(),
            link,
        }];
        let updated = replace_links("n.md", "![a](old.png)", &moves);
        assert_eq!(updated, "![a](assets%20two/new%20image.png)");
    }

    #[test]
    fn full_link_occurs_verbatim_in_the_source() {
        let content = "![a](./x.png) and [b](y.md)";
        let (links, images) = extract("n.md", content);
        assert_eq!(links.len(), 1);
        assert_eq!(images.len(), 1);
        for info in links.iter().chain(images.iter()) {
            assert!(content.contains(&info.full_link), "{:?}", info.full_link);
            assert_eq!(content.replace(&info.full_link, &info.full_link), content);
        }
    }
}
