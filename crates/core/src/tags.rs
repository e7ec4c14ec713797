//! Semicolon-delimited tag string helpers.

use std::collections::BTreeSet;

use crate::resource::Resource;

/// Tag separator used by the inventory.
pub const TAG_DELIMITER: char = ';';

/// Split a tag string into tags, trimming whitespace and dropping empty segments.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(TAG_DELIMITER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Join tags into a tag string, trimming each and skipping empty ones.
pub fn format_tags<I, S>(tags: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(TAG_DELIMITER);
        }
        out.push_str(tag);
    }
    out
}

/// Sorted, de-duplicated union of all tags across the given resources.
pub fn extract_tags<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Vec<String> {
    resources
        .into_iter()
        .flat_map(|r| r.tag_list())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn parse_basic_and_spaced() {
        assert_eq!(parse_tags("web;database;production"), vec!["web", "database", "production"]);
        assert_eq!(parse_tags(" web ; database ; production "), vec!["web", "database", "production"]);
    }

    #[test]
    fn parse_drops_empty_segments() {
        assert!(parse_tags("").is_empty());
        assert!(parse_tags(";;;").is_empty());
        assert_eq!(parse_tags("web;;database;"), vec!["web", "database"]);
        assert_eq!(parse_tags("web;  ;database;   "), vec!["web", "database"]);
    }

    #[test]
    fn format_trims_and_skips_blank() {
        assert_eq!(format_tags(["web", "database", "production"]), "web;database;production");
        assert_eq!(format_tags([" web ", "", "  ", "db"]), "web;db");
        assert_eq!(format_tags(Vec::<String>::new()), "");
    }

    #[test]
    fn parse_format_is_a_fixed_point() {
        for raw in ["a;b;c", " a ;; b ;", ";;;", "", "x", "  spaced tag ; other"] {
            let once = format_tags(parse_tags(raw));
            let twice = format_tags(parse_tags(&once));
            assert_eq!(once, twice, "input {raw:?}");
        }
    }

    #[test]
    fn extract_unions_and_sorts() {
        let resources = vec![
            Resource::new(100, "pve1", ResourceKind::Qemu).with_tags("web;prod"),
            Resource::new(101, "pve1", ResourceKind::Lxc).with_tags("db; prod"),
            Resource::new(102, "pve2", ResourceKind::Qemu),
        ];
        assert_eq!(extract_tags(&resources), vec!["db", "prod", "web"]);
    }
}
