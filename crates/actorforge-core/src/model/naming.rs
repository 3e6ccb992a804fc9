//! Mapping from model path names to generated identifiers.

/// Replace every character that cannot appear in a generated identifier.
/// A leading digit is prefixed so the result is always a valid name.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Class name for a component: the package followed by the sanitized path
/// name with the leading separator dropped, e.g. `pkg.top_a_b` for `.top.a.b`.
pub fn class_name(package: &str, full_name: &str) -> String {
    let path = sanitize(full_name.trim_start_matches('.'));
    if package.is_empty() {
        path
    } else {
        format!("{}.{}", package, path)
    }
}

/// Unqualified part of a class name.
pub fn simple_name(class: &str) -> &str {
    class.rsplit('.').next().unwrap_or(class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a.b-c d"), "a_b_c_d");
        assert_eq!(sanitize("2nd"), "_2nd");
        assert_eq!(sanitize("ok_name"), "ok_name");
    }

    #[test]
    fn test_class_name() {
        assert_eq!(class_name("gen", ".top.ramp"), "gen.top_ramp");
        assert_eq!(class_name("", ".top"), "top");
        assert_eq!(simple_name("gen.top_ramp"), "top_ramp");
    }
}
