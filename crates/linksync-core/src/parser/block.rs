//! Block phase: splits input into paragraphs, skips code regions, registers
//! reference definitions.

use super::{skip_char, skip_until_char, Parser, Reference};

impl<'a> Parser<'a> {
    pub(crate) fn block(&mut self, mut data: &'a [u8]) {
        while !data.is_empty() {
            // blank lines. returns the number of bytes to skip
            let empty = is_empty(data);
            if empty > 0 {
                data = &data[empty..];
                continue;
            }

            // indented code block, opaque
            if code_prefix(data) > 0 {
                data = &data[indented_code(data)..];
                continue;
            }

            // fenced code block, opaque
            let fence = fenced_code_block(data);
            if fence > 0 {
                data = &data[fence..];
                continue;
            }

            // anything else is a paragraph
            let consumed = self.paragraph(data);
            data = &data[consumed..];
        }
    }

    fn paragraph(&mut self, data: &'a [u8]) -> usize {
        let mut i = 0;
        while i < data.len() {
            let current = &data[i..];

            // a reference definition ends the preceding paragraph
            let ref_end = self.is_reference(current);
            if ref_end > 0 {
                self.render_paragraph(&data[..i]);
                return i + ref_end;
            }

            let empty = is_empty(current);
            if empty > 0 {
                self.render_paragraph(&data[..i]);
                return i + empty;
            }

            if fenced_code_block(current) > 0 {
                self.render_paragraph(&data[..i]);
                return i;
            }

            match current.iter().position(|&b| b == b'\n') {
                Some(nl) => i += nl + 1,
                None => i = data.len(),
            }
        }
        self.render_paragraph(&data[..i]);
        i
    }

    fn render_paragraph(&mut self, data: &'a [u8]) {
        if data.is_empty() {
            return;
        }
        let beg = skip_char(data, 0, b' ');
        let mut end = data.len();
        if data[end - 1] == b'\n' {
            end -= 1;
        }
        while end > beg && data[end - 1] == b' ' {
            end -= 1;
        }
        if end > beg {
            self.blocks.push(&data[beg..end]);
        }
    }

    /// Checks whether `data` starts with a reference definition
    /// (`[id]: dest "title"`). On success the definition is registered and the
    /// number of consumed bytes returned; otherwise 0.
    fn is_reference(&mut self, data: &'a [u8]) -> usize {
        if data.len() < 4 {
            return 0;
        }

        // up to 3 optional leading spaces
        let mut i = 0;
        while i < 3 && data[i] == b' ' {
            i += 1;
        }

        // id part: anything but a newline between brackets
        if data[i] != b'[' {
            return 0;
        }
        let span_start = i;
        i += 1;
        let id_start = i;
        while i < data.len() && data[i] != b'\n' && data[i] != b'\r' && data[i] != b']' {
            i += 1;
        }
        if i >= data.len() || data[i] != b']' {
            return 0;
        }
        let id_end = i;
        if id_start == id_end {
            return 0;
        }

        // spacer: colon (space | tab)* newline? (space | tab)*
        i += 1;
        if i >= data.len() || data[i] != b':' {
            return 0;
        }
        i += 1;
        while i < data.len() && (data[i] == b' ' || data[i] == b'\t') {
            i += 1;
        }
        if i < data.len() && (data[i] == b'\n' || data[i] == b'\r') {
            i += 1;
            if i < data.len() && data[i] == b'\n' && data[i - 1] == b'\r' {
                i += 1;
            }
        }
        while i < data.len() && (data[i] == b' ' || data[i] == b'\t') {
            i += 1;
        }
        if i >= data.len() {
            return 0;
        }

        let Some(scan) = scan_link_ref(data, i) else {
            return 0;
        };

        let reference = Reference {
            dest: &data[scan.link_start..scan.link_end],
            title: &data[scan.title_start..scan.title_end],
            span: &data[span_start..scan.span_end],
        };
        let id = String::from_utf8_lossy(&data[id_start..id_end]).to_lowercase();
        self.refs.insert(id, reference);

        scan.line_end
    }
}

struct RefScan {
    link_start: usize,
    link_end: usize,
    /// End of the destination token as written, kept in the recorded span.
    span_end: usize,
    title_start: usize,
    title_end: usize,
    line_end: usize,
}

fn scan_link_ref(data: &[u8], mut i: usize) -> Option<RefScan> {
    // link: whitespace-free sequence, optionally between angle brackets
    let angled = data[i] == b'<';
    if angled {
        i += 1;
    }
    let link_start = i;
    while i < data.len()
        && data[i] != b' '
        && data[i] != b'\t'
        && data[i] != b'\n'
        && data[i] != b'\r'
    {
        i += 1;
    }
    let mut link_end = i;
    let span_end = i;
    if angled && link_end > link_start && data[link_end - 1] == b'>' {
        link_end -= 1;
    }

    // optional spacer before a title or the end of line
    while i < data.len() && (data[i] == b' ' || data[i] == b'\t') {
        i += 1;
    }
    if i < data.len()
        && data[i] != b'\n'
        && data[i] != b'\r'
        && data[i] != b'\''
        && data[i] != b'"'
        && data[i] != b'('
    {
        return None;
    }

    let mut line_end = 0;
    if i >= data.len() || data[i] == b'\r' || data[i] == b'\n' {
        line_end = i;
    }
    if i + 1 < data.len() && data[i] == b'\r' && data[i + 1] == b'\n' {
        line_end += 1;
    }

    // the title may sit on the next line
    if line_end > 0 {
        i = line_end + 1;
        while i < data.len() && (data[i] == b' ' || data[i] == b'\t') {
            i += 1;
        }
    }

    // optional title: a quoted sequence alone on its line
    let mut title_start = 0;
    let mut title_end = 0;
    if i + 1 < data.len() && (data[i] == b'\'' || data[i] == b'"' || data[i] == b'(') {
        i += 1;
        title_start = i;
        while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
            i += 1;
        }
        if i + 1 < data.len() && data[i] == b'\n' && data[i + 1] == b'\r' {
            title_end = i + 1;
        } else {
            title_end = i;
        }

        // step back over trailing spaces to the closing delimiter
        let mut j = i.saturating_sub(1);
        while j > title_start && (data[j] == b' ' || data[j] == b'\t') {
            j -= 1;
        }
        if j > title_start && (data[j] == b'\'' || data[j] == b'"' || data[j] == b')') {
            line_end = title_end;
            title_end = j;
        } else {
            title_start = 0;
            title_end = 0;
        }
    }

    if line_end == 0 {
        return None;
    }

    Some(RefScan {
        link_start,
        link_end,
        span_end,
        title_start,
        title_end,
        line_end,
    })
}

/// Returns the number of bytes to skip if `data` starts with a blank line.
pub(crate) fn is_empty(data: &[u8]) -> usize {
    if data.is_empty() {
        return 0;
    }
    let mut i = 0;
    while i < data.len() && data[i] != b'\n' {
        if data[i] != b' ' && data[i] != b'\t' && data[i] != b'\r' {
            return 0;
        }
        i += 1;
    }
    if i < data.len() {
        i += 1;
    }
    i
}

/// Prefix length of an indented code line: one tab or four spaces.
fn code_prefix(data: &[u8]) -> usize {
    if !data.is_empty() && data[0] == b'\t' {
        return 1;
    }
    if data.len() >= 4 && data[0] == b' ' && data[1] == b' ' && data[2] == b' ' && data[3] == b' ' {
        return 4;
    }
    0
}

fn indented_code(data: &[u8]) -> usize {
    let mut i = 0;
    while i < data.len() {
        let beg = i;
        i = skip_until_char(data, i, b'\n');
        if i < data.len() {
            i += 1;
        }
        let line = &data[beg..i];
        let blank = is_empty(line) > 0;
        if code_prefix(line) == 0 && !blank {
            // non-empty, non-prefixed line ends the code block
            i = beg;
            break;
        }
    }
    i
}

/// Recognizes a fence line of three or more `` ` `` or `~`. Returns the
/// consumed length and the marker, or `None`.
fn is_fence_line(data: &[u8], old_marker: Option<(u8, usize)>) -> Option<(usize, (u8, usize))> {
    let n = data.len();
    let mut i = 0;
    while i < n && i < 3 && data[i] == b' ' {
        i += 1;
    }
    if i >= n || (data[i] != b'~' && data[i] != b'`') {
        return None;
    }
    let c = data[i];
    let mut size = 0;
    while i < n && data[i] == c {
        size += 1;
        i += 1;
    }
    if size < 3 {
        return None;
    }
    let marker = (c, size);

    if let Some(old) = old_marker {
        // the end marker must match the beginning marker
        if old != marker {
            return None;
        }
        while i < n && data[i] == b' ' {
            i += 1;
        }
        if i < n && data[i] != b'\n' && data[i] != b'\r' {
            return None;
        }
    } else {
        // opening fence: the rest of the line is the info string
        while i < n && data[i] != b'\n' {
            i += 1;
        }
    }
    if i < n {
        i += 1;
    }
    Some((i, marker))
}

/// Returns the length of a fenced code block at the start of `data`, or 0.
/// An unclosed fence is not a code block.
pub(crate) fn fenced_code_block(data: &[u8]) -> usize {
    let Some((mut beg, marker)) = is_fence_line(data, None) else {
        return 0;
    };
    if beg >= data.len() {
        return 0;
    }
    loop {
        if let Some((end, _)) = is_fence_line(&data[beg..], Some(marker)) {
            return beg + end;
        }
        let mut end = skip_until_char(data, beg, b'\n');
        end += 1;
        if end >= data.len() {
            return 0;
        }
        beg = end;
    }
}
