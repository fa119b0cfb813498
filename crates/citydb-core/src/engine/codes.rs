//! Delimiter-joined code lists.

use citydb_proto::Code;

/// Separator of repeated values stored in one column.
pub const CODE_DELIMITER: &str = "--/\\--";

/// Split a joined code list and pair each code with its code space.
///
/// Code spaces are matched by position; missing or empty ones are dropped.
pub fn split_codes(values: &str, codespaces: Option<&str>) -> Vec<Code> {
    let mut codespaces = codespaces
        .map(|c| c.split(CODE_DELIMITER).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter();

    values
        .split(CODE_DELIMITER)
        .map(|value| (value, codespaces.next()))
        .filter(|(value, _)| !value.is_empty())
        .map(|(value, codespace)| {
            let code = Code::new(value);
            match codespace.filter(|c| !c.is_empty()) {
                Some(codespace) => code.with_codespace(codespace),
                None => code,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_codes() {
        let codes = split_codes("1000--/\\--2000", Some("urn:a--/\\--urn:b"));
        assert_eq!(
            codes,
            vec![
                Code::new("1000").with_codespace("urn:a"),
                Code::new("2000").with_codespace("urn:b")
            ]
        );
    }

    #[test]
    fn test_split_codes_without_codespaces() {
        let codes = split_codes("residential", None);
        assert_eq!(codes, vec![Code::new("residential")]);
    }

    #[test]
    fn test_codespaces_match_by_position() {
        let codes = split_codes("a--/\\----/\\--c", Some("--/\\--x--/\\--y"));
        assert_eq!(codes, vec![Code::new("a"), Code::new("c").with_codespace("y")]);
    }
}
