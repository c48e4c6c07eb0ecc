use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::Url;

use crate::urls;

/// File extension that downloaded pages get.
pub const PAGE_EXTENSION: &str = ".html";
/// File name of the index file for every directory.
pub const PAGE_DIR_INDEX: &str = "index.html";

/// Longest file name component written to disk, in octets.
const MAX_FILE_NAME_OCTETS: usize = 200;

/// File name (path shaped) that a page URL path is stored under. Paths
/// without an extension get `.html` appended, directory paths get the
/// directory index file.
pub fn page_file_name(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return format!("/{PAGE_DIR_INDEX}");
    }
    if path.ends_with('/') {
        return format!("{path}{PAGE_DIR_INDEX}");
    }
    match path.rsplit('/').next() {
        Some(last) if !last.contains('.') => format!("{path}{PAGE_EXTENSION}"),
        _ => path.to_string(),
    }
}

/// On-disk location for a URL under the output root. External hosts are
/// nested below the base host with a `_` prefix.
pub fn target_path(output_dir: &Path, base_host: &str, url: &Url, is_page: bool) -> PathBuf {
    let payload = if is_page {
        page_file_name(url.path())
    } else {
        url.path().to_string()
    };

    let mut path = output_dir.join(base_host);
    let host = urls::url_host(url);
    if host != base_host {
        path.push(format!("_{host}"));
    }

    let segments: Vec<&str> = payload
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    let Some((file_name, directories)) = segments.split_last() else {
        path.push(PAGE_DIR_INDEX);
        return path;
    };
    for segment in directories {
        path.push(decode_segment(segment));
    }
    path.push(shorten_file_name(&decode_segment(file_name)));
    path
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// Trim an over-long file name to a portable length, keeping the extension
/// and appending an FNV-1a hash of the original name so distinct names stay
/// distinct.
fn shorten_file_name(name: &str) -> String {
    if name.len() <= MAX_FILE_NAME_OCTETS {
        return name.to_string();
    }
    let (stem, extension) = match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    };
    let suffix = format!("{:08x}", fnv1a(name.as_bytes()) as u32);

    let mut keep = MAX_FILE_NAME_OCTETS
        .saturating_sub(suffix.len() + extension.len())
        .min(stem.len());
    while keep > 0 && !stem.is_char_boundary(keep) {
        keep -= 1;
    }
    format!("{}{}{}", &stem[..keep], suffix, extension)
}

fn fnv1a(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Write the bytes, creating parent directories as needed. A partially
/// written file is removed before the error surfaces.
pub fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    if let Err(err) = file.write_all(data) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn page_file_names() {
        let fixtures = [
            ("", "/index.html"),
            ("/", "/index.html"),
            ("/docs/", "/docs/index.html"),
            ("/test", "/test.html"),
            ("/test.aspx", "/test.aspx"),
            ("/a/b/page.html", "/a/b/page.html"),
        ];
        for (input, expected) in fixtures {
            assert_eq!(page_file_name(input), expected, "{input}");
        }
    }

    #[test]
    fn plans_page_paths_under_the_base_host() {
        let out = Path::new("out");
        let fixtures = [
            ("https://example.org/", "out/example.org/index.html"),
            ("https://example.org/#anchor", "out/example.org/index.html"),
            ("https://example.org/test", "out/example.org/test.html"),
            ("https://example.org/test.aspx", "out/example.org/test.aspx"),
            ("https://example.org/sub/", "out/example.org/sub/index.html"),
        ];
        for (input, expected) in fixtures {
            let url = Url::parse(input).unwrap();
            let path = target_path(out, "example.org", &url, true);
            assert_eq!(path, PathBuf::from(expected), "{input}");
        }
    }

    #[test]
    fn plans_external_hosts_below_the_base_host() {
        let out = Path::new("out");
        let url = Url::parse("https://cdn.example.com/a.png").unwrap();
        let path = target_path(out, "example.org", &url, false);
        assert_eq!(path, PathBuf::from("out/example.org/_cdn.example.com/a.png"));
    }

    #[test]
    fn decodes_percent_encoded_segments() {
        let out = Path::new("out");
        let url = Url::parse("https://example.org/a%20dir/file%20name.png").unwrap();
        let path = target_path(out, "example.org", &url, false);
        assert_eq!(path, PathBuf::from("out/example.org/a dir/file name.png"));
    }

    #[test]
    fn shortens_over_long_file_names() {
        let name = "a".repeat(250) + ".html";
        let short = shorten_file_name(&name);
        assert_eq!(short.len(), MAX_FILE_NAME_OCTETS);
        assert!(short.ends_with(".html"));
        assert!(short.starts_with("aaaa"));
        // deterministic: the same name always maps to the same file
        assert_eq!(short, shorten_file_name(&name));
        // distinct names stay distinct through the hash suffix
        let other = "b".repeat(1) + &"a".repeat(249) + ".html";
        assert_ne!(short, shorten_file_name(&other));
    }

    #[test]
    fn short_names_are_untouched() {
        assert_eq!(shorten_file_name("picture.png"), "picture.png");
    }

    #[test]
    fn writes_create_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.html");
        write_file(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        // overwrites truncate
        write_file(&path, b"x").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }
}
