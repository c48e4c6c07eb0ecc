use std::collections::BTreeMap;

use cssparser::{Parser, ParserInput, Token};
use tracing::debug;
use url::Url;

use crate::urls;

/// A `url(...)` token found in a stylesheet.
struct UrlToken {
    /// The raw token text, e.g. `url('/doc/a.png')`.
    raw: String,
    /// The unquoted reference.
    target: String,
}

/// All non-`data:` `url(...)` references of a stylesheet, resolved against
/// the resource that contains it.
pub fn extract_urls(base: &Url, data: &str) -> Vec<Url> {
    scan(data)
        .into_iter()
        .filter_map(|token| base.join(&token.target).ok())
        .collect()
}

/// Rewrite `url(...)` references to local-relative form by replacing the
/// original token text. `base` is the resource holding the CSS; discovered
/// references are resolved against it and appended to `discovered`.
/// Returns `None` when nothing changed.
pub fn rewrite(
    base: &Url,
    main_host: &str,
    data: &str,
    discovered: &mut Vec<Url>,
) -> Option<String> {
    let mut css_dir = base.clone();
    css_dir.set_path(&dir_path(base.path()));

    let mut replacements: BTreeMap<String, String> = BTreeMap::new();
    for token in scan(data) {
        let Ok(resolved) = base.join(&token.target) else {
            continue;
        };
        discovered.push(resolved);

        let Some(local) = urls::resolve_reference(&css_dir, &token.target, main_host, false, "")
        else {
            continue;
        };
        let fixed = format!("url({local})");
        if fixed != token.raw {
            replacements.insert(token.raw, fixed);
        }
    }
    if replacements.is_empty() {
        return None;
    }

    let mut out = data.to_string();
    for (original, fixed) in &replacements {
        debug!(%original, %fixed, "relinked CSS reference");
        out = out.replace(original, fixed);
    }
    Some(out)
}

/// Directory of a path, with a trailing slash.
fn dir_path(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..=pos].to_string(),
        None => "/".to_string(),
    }
}

fn scan(data: &str) -> Vec<UrlToken> {
    let mut input = ParserInput::new(data);
    let mut parser = Parser::new(&mut input);
    let mut tokens = Vec::new();
    scan_block(&mut parser, &mut tokens);
    tokens
}

fn scan_block<'i>(parser: &mut Parser<'i, '_>, out: &mut Vec<UrlToken>) {
    loop {
        let start = parser.position();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::UnquotedUrl(target) => {
                push_url(parser.slice_from(start), target.as_ref(), out);
            }
            Token::Function(name) if name.eq_ignore_ascii_case("url") => {
                let mut target = None;
                let _ = parser.parse_nested_block(
                    |block| -> Result<(), cssparser::ParseError<'i, ()>> {
                        while let Ok(inner) = block.next_including_whitespace() {
                            if let Token::QuotedString(value) = inner {
                                target = Some(value.as_ref().to_string());
                            }
                        }
                        Ok(())
                    },
                );
                if let Some(target) = target {
                    push_url(parser.slice_from(start), &target, out);
                }
            }
            Token::Function(_)
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock
            | Token::CurlyBracketBlock => {
                let _ = parser.parse_nested_block(
                    |block| -> Result<(), cssparser::ParseError<'i, ()>> {
                        scan_block(block, out);
                        Ok(())
                    },
                );
            }
            _ => {}
        }
    }
}

fn push_url(raw: &str, target: &str, out: &mut Vec<UrlToken>) {
    if target
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
    {
        return; // embedded data stays embedded
    }
    out.push(UrlToken {
        raw: raw.to_string(),
        target: target.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rewrite_at(base: &str, css: &str) -> (Option<String>, Vec<String>) {
        let base = Url::parse(base).unwrap();
        let mut discovered = Vec::new();
        let out = rewrite(&base, "localhost", css, &mut discovered);
        let discovered = discovered.into_iter().map(|u| u.to_string()).collect();
        (out, discovered)
    }

    #[test]
    fn finds_urls_in_every_quoting_style() {
        let fixtures = [
            (
                "url('http://localhost/uri/between/single/quote')",
                "http://localhost/uri/between/single/quote",
            ),
            (
                r#"url("http://localhost/uri/between/double/quote")"#,
                "http://localhost/uri/between/double/quote",
            ),
            ("url(http://localhost/uri)", "http://localhost/uri"),
        ];
        for (css, expected) in fixtures {
            let (_, discovered) = rewrite_at("http://localhost", css);
            assert_eq!(discovered, vec![expected.to_string()], "{css}");
        }
    }

    #[test]
    fn ignores_embedded_data_urls() {
        let (out, discovered) =
            rewrite_at("http://localhost", "url(data:image/gif;base64,R0lGODl)");
        assert_eq!(out, None);
        assert!(discovered.is_empty());
    }

    #[test]
    fn rewrites_block_references_relative_to_the_stylesheet() {
        let css = "div#gopher {\n\tbackground: url(/doc/gopher/frontpage.png) no-repeat;\n\theight: 155px;\n}";
        let (out, discovered) = rewrite_at("http://localhost/style.css", css);
        assert_eq!(
            discovered,
            vec!["http://localhost/doc/gopher/frontpage.png".to_string()]
        );
        let out = out.expect("css changed");
        assert!(out.contains("url(doc/gopher/frontpage.png)"));
        assert!(out.contains("height: 155px;"));
    }

    #[test]
    fn quoted_references_lose_their_quotes_when_relinked() {
        let css = "h1 { background-image: url('http://localhost/background.jpg'); }";
        let (out, _) = rewrite_at("http://localhost/", css);
        assert_eq!(
            out.as_deref(),
            Some("h1 { background-image: url(background.jpg); }")
        );
    }

    #[test]
    fn local_relative_references_stay_byte_identical() {
        let css = "div { background: url(doc/frontpage.png) no-repeat; }";
        let (out, discovered) = rewrite_at("https://localhost/style.css", css);
        assert_eq!(out, None);
        assert_eq!(
            discovered,
            vec!["https://localhost/doc/frontpage.png".to_string()]
        );
    }

    #[test]
    fn stylesheet_in_a_subdirectory_resolves_against_its_own_directory() {
        let css = "a { background: url(icons/x.png); }";
        let (out, discovered) = rewrite_at("http://localhost/css/site.css", css);
        assert_eq!(out, None);
        assert_eq!(
            discovered,
            vec!["http://localhost/css/icons/x.png".to_string()]
        );
    }

    #[test]
    fn imports_via_url_are_found() {
        let css = "@import url(\"base.css\");";
        let (out, discovered) = rewrite_at("http://localhost/css/site.css", css);
        assert_eq!(discovered, vec!["http://localhost/css/base.css".to_string()]);
        assert_eq!(out.as_deref(), Some("@import url(base.css);"));
    }
}
