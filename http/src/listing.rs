//! Directory-listing body formats (`spec.md` §6 "Directory listing
//! formats"). Used by the file server (§4.7) whenever a directory is
//! requested with no usable `default_index`.

use fileport_tvfs::local::modified_to_epoch_ms;
use fileport_tvfs::FsEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    Html,
    PlainText,
    Ndjson,
}

impl ListingFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ListingFormat::Html => "text/html; charset=utf-8",
            ListingFormat::PlainText => "text/plain; charset=utf-8",
            ListingFormat::Ndjson => "application/ndjson",
        }
    }
}

fn stats(e: &FsEntry) -> String {
    format!("{:>12} {}", e.size, e.entry_type.as_letter())
}

fn percent_encode_name(name: &str) -> String {
    percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC).to_string()
}

fn html_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn json_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// `spec.md` §6 `text/html` prologue, one `<a>` line per entry, epilogue.
/// `name` (the directory's display name) is substituted twice.
pub fn render_html(name: &str, entries: &[FsEntry]) -> String {
    let encoded_name = html_encode(name);
    let mut out = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"/><title>Listing of {encoded_name}</title></head><body><h1>Listing of {encoded_name}</h1><pre>"
    );
    for e in entries {
        let href = percent_encode_name(&e.name);
        let suffix = if e.is_directory() { "/" } else { "" };
        out.push_str(&format!(
            "{} <a href=\"{href}{suffix}\">{}{suffix}</a>\n",
            stats(e),
            html_encode(&e.name)
        ));
    }
    out.push_str("</pre></body></html>");
    out
}

/// `spec.md` §6 `text/plain`: one `<stats> <name>` line per entry.
pub fn render_plain(entries: &[FsEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&stats(e));
        out.push(' ');
        out.push_str(&e.name);
        out.push('\n');
    }
    out
}

/// `spec.md` §6 `application/ndjson`: one JSON object per line.
pub fn render_ndjson(entries: &[FsEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let mtime = e.modified.map(modified_to_epoch_ms).unwrap_or(0);
        out.push_str(&format!(
            "{{\"name\":\"{}\",\"mtime\":{mtime},\"type\":\"{}\",\"size\":{}}}\n",
            json_escape(&e.name),
            e.entry_type.as_letter(),
            e.size
        ));
    }
    out
}

pub fn render(format: ListingFormat, name: &str, entries: &[FsEntry]) -> String {
    match format {
        ListingFormat::Html => render_html(name, entries),
        ListingFormat::PlainText => render_plain(entries),
        ListingFormat::Ndjson => render_ndjson(entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileport_tvfs::EntryType;

    fn entry(name: &str, ty: EntryType) -> FsEntry {
        FsEntry {
            name: name.to_string(),
            entry_type: ty,
            size: 42,
            modified: None,
        }
    }

    #[test]
    fn ndjson_escapes_control_characters() {
        let e = entry("weird\nname", EntryType::File);
        let rendered = render_ndjson(&[e]);
        assert!(rendered.contains("weird\\nname"));
        assert_eq!(rendered.matches('\n').count(), 1);
    }

    #[test]
    fn html_appends_trailing_slash_for_directories() {
        let e = entry("sub dir", EntryType::Directory);
        let rendered = render_html("root", &[e]);
        assert!(rendered.contains("sub%20dir/\">sub dir/</a>"));
    }

    #[test]
    fn plain_lists_size_and_name() {
        let e = entry("file.txt", EntryType::File);
        let rendered = render_plain(&[e]);
        assert!(rendered.contains("file.txt"));
        assert!(rendered.contains("42"));
    }
}
