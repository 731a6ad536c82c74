//! HTML directory listings for the static fallback.
//!
//! `ServeDir` only serves files and `index.html`; a directory without an
//! index gets a generated listing instead of a 404.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Map a URL path ending in `/` to a directory under `root`.
///
/// Returns `None` for paths that are not directory URLs or that try to
/// leave `root`.
pub fn listing_dir(root: &Path, url_path: &str) -> Option<PathBuf> {
    if !url_path.ends_with('/') {
        return None;
    }

    let mut dir = root.to_path_buf();
    for segment in url_path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." || segment.contains('\\') {
            return None;
        }
        dir.push(segment);
    }
    Some(dir)
}

/// Render the entries of `dir` as an HTML list. Subdirectories get a
/// trailing `/`; entries are sorted case-insensitively.
pub fn render_directory_listing(url_path: &str, dir: &Path) -> io::Result<String> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            name
        })
        .collect();
    names.sort_by_key(|name| name.to_lowercase());

    let title = escape_html(&format!("Directory listing for {url_path}"));
    let mut html = format!(
        "<!DOCTYPE HTML>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n\
         <body>\n<h1>{title}</h1>\n<hr>\n<ul>\n"
    );
    for name in &names {
        let name = escape_html(name);
        let _ = writeln!(html, "<li><a href=\"{name}\">{name}</a></li>");
    }
    html.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    Ok(html)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_listing_dir_maps_directory_urls() {
        let root = Path::new("/srv/www");
        assert_eq!(listing_dir(root, "/"), Some(PathBuf::from("/srv/www")));
        assert_eq!(
            listing_dir(root, "/assets/img/"),
            Some(PathBuf::from("/srv/www/assets/img"))
        );
    }

    #[test]
    fn test_listing_dir_rejects_files_and_traversal() {
        let root = Path::new("/srv/www");
        assert_eq!(listing_dir(root, "/index.html"), None);
        assert_eq!(listing_dir(root, "/../etc/"), None);
        assert_eq!(listing_dir(root, "/a/./b/"), None);
    }

    #[test]
    fn test_render_directory_listing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("A <1>.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let html = render_directory_listing("/", dir.path()).unwrap();

        assert!(html.contains("<title>Directory listing for /</title>"));
        let a = html.find("<li><a href=\"A &lt;1&gt;.txt\">A &lt;1&gt;.txt</a></li>").unwrap();
        let b = html.find("<li><a href=\"b.txt\">b.txt</a></li>").unwrap();
        let nested = html.find("<li><a href=\"nested/\">nested/</a></li>").unwrap();
        assert!(a < b && b < nested);
    }

    #[test]
    fn test_render_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(render_directory_listing("/gone/", &dir.path().join("gone")).is_err());
    }
}
