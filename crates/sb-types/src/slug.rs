/// Slugify a name for use as a proxy id or namespace prefix.
///
/// Produces a consistent kebab-case identifier from a human-readable name.
///
/// Examples:
/// - "My Proxy" → "my-proxy"
/// - "filesystem" → "filesystem"
/// - "GitHub  Tools" → "github-tools"
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_separator = true; // avoid leading dash
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_separator = false;
        } else if !last_was_separator {
            slug.push('-');
            last_was_separator = true;
        }
    }
    // trim trailing dash
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Proxy"), "my-proxy");
        assert_eq!(slugify("filesystem"), "filesystem");
        assert_eq!(slugify("GitHub  Tools"), "github-tools");
        assert_eq!(slugify("  leading-trailing  "), "leading-trailing");
        assert_eq!(slugify("CamelCase"), "camelcase");
        // Idempotent: slugifying an already-slugified name produces the same result
        assert_eq!(slugify("my-proxy"), "my-proxy");
    }
}
