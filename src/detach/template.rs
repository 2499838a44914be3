//! `{token}` substitution for the URL and placeholder templates.
//!
//! Only whitelisted tokens are replaced. Anything else in braces, including
//! unmatched braces, is copied through literally. Substituted values are not
//! scanned again.

/// Replace `{name}` occurrences whose name appears in `values`.
pub fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(token, _)| *token == name)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Build the download URL for a digest. Tokens: `{host}`, `{port}`, `{hash}`.
pub fn render_url(template: &str, host: &str, port: u16, hash: &str) -> String {
    let port = port.to_string();
    substitute(template, &[("host", host), ("port", &port), ("hash", hash)])
}

/// Build the placeholder text. Token: `{url}`.
pub fn render_message(template: &str, url: &str) -> String {
    substitute(template, &[("url", url)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_url() {
        assert_eq!(
            render_url("http://{host}:{port}/{hash}", "example.com", 8080, "abc123"),
            "http://example.com:8080/abc123"
        );
    }

    #[test]
    fn test_render_message() {
        assert_eq!(
            render_message("See: {url}\n", "http://example.com:8080/abc123"),
            "See: http://example.com:8080/abc123\n"
        );
    }

    #[test]
    fn test_unknown_tokens_pass_through() {
        assert_eq!(
            render_url("{scheme}://{host}/{hash}?v={version}", "h", 1, "ff"),
            "{scheme}://h/ff?v={version}"
        );
        // {url} is not a URL-template token
        assert_eq!(render_url("{url}", "h", 1, "ff"), "{url}");
    }

    #[test]
    fn test_unbalanced_braces() {
        assert_eq!(render_message("a { b {url", "u"), "a { b {url");
        assert_eq!(render_message("}{url}{", "u"), "}u{");
        assert_eq!(render_message("{{url}}", "u"), "{u}");
    }

    #[test]
    fn test_repeated_tokens() {
        assert_eq!(render_message("{url} and {url}", "x"), "x and x");
    }

    #[test]
    fn test_single_pass() {
        // A value containing a token is not expanded again.
        assert_eq!(substitute("{a}", &[("a", "{b}"), ("b", "no")]), "{b}");
    }

    #[test]
    fn test_no_tokens() {
        assert_eq!(render_message("plain text", "u"), "plain text");
        assert_eq!(render_message("", "u"), "");
    }
}
