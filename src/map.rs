use thiserror::Error;
use tracing::warn;

/// Separator for single-line maps (env secrets can't hold newlines).
const INLINE_SEPARATOR: &str = ";;;";

/// One `account | webhook | extra` line of the account map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountEntry {
    /// Instagram handle, without `@`.
    pub account: String,
    /// Webhook the notification is POSTed to.
    pub webhook: String,
    /// Extra worker arguments. Empty if not given.
    pub extra: String,
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("no valid entries in account map")]
    Empty,
}

fn pieces(text: &str) -> Vec<&str> {
    let raw: Vec<&str> = if text.contains(INLINE_SEPARATOR) {
        text.split(INLINE_SEPARATOR).collect()
    } else {
        text.lines().collect()
    };

    raw.into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty() && !p.starts_with('#'))
        .collect()
}

/// Parses the account map. Malformed lines are skipped, never fatal.
///
/// A repeated account replaces the earlier entry and takes the later position.
pub fn parse(text: &str) -> Vec<AccountEntry> {
    let mut entries: Vec<AccountEntry> = vec![];

    for line in pieces(text) {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();

        if fields.len() < 2 || fields[0].is_empty() || fields[1].is_empty() {
            warn!(line, "skipping malformed account map line");
            continue;
        }

        let entry = AccountEntry {
            account: fields[0].to_string(),
            webhook: fields[1].to_string(),
            extra: fields.get(2).map(|s| s.to_string()).unwrap_or_default(),
        };

        if let Some(pos) = entries.iter().position(|e| e.account == entry.account) {
            warn!(account = %entry.account, "duplicate account in map, later entry wins");
            entries.remove(pos);
        }

        entries.push(entry);
    }

    entries
}

/// Like [`parse`], but an empty result is an error.
pub fn parse_required(text: &str) -> Result<Vec<AccountEntry>, MapError> {
    let entries = parse(text);
    if entries.is_empty() {
        return Err(MapError::Empty);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(account: &str, webhook: &str, extra: &str) -> AccountEntry {
        AccountEntry {
            account: account.into(),
            webhook: webhook.into(),
            extra: extra.into(),
        }
    }

    #[test]
    fn test_newline_separated() {
        let entries = parse("a|w1\nb|w2|extra");
        assert_eq!(entries, vec![entry("a", "w1", ""), entry("b", "w2", "extra")]);
    }

    #[test]
    fn test_inline_separator_wins_over_newlines() {
        let entries = parse(" a | w1 ;;; b|w2| --delay 0 ;;;");
        assert_eq!(
            entries,
            vec![entry("a", "w1", ""), entry("b", "w2", "--delay 0")]
        );
    }

    #[test]
    fn test_single_field_is_skipped() {
        assert!(parse("onlyname").is_empty());
    }

    #[test]
    fn test_comments_and_blanks() {
        let text = "# header\n\n   # indented comment\nfoo|https://hook\n   \n";
        assert_eq!(parse(text), vec![entry("foo", "https://hook", "")]);
    }

    #[test]
    fn test_empty_fields_are_malformed() {
        assert!(parse("|https://hook\nfoo|").is_empty());
    }

    #[test]
    fn test_duplicate_account_last_wins() {
        let entries = parse("a|w1\nb|w2\na|w3|x");
        assert_eq!(entries, vec![entry("b", "w2", ""), entry("a", "w3", "x")]);
    }

    #[test]
    fn test_parse_required() {
        assert!(matches!(parse_required("# nothing\nbad"), Err(MapError::Empty)));
        assert_eq!(parse_required("bad\nok|w").unwrap().len(), 1);
    }
}
