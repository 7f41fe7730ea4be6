//! Minimal IRC line parsing: prefix, command, params, trailing.

/// One parsed IRC protocol line.
#[derive(Debug, PartialEq, Eq)]
pub struct IrcLine<'a> {
    /// The `:prefix` before the command, without the colon.
    pub prefix: Option<&'a str>,
    /// Command or numeric, e.g. `PRIVMSG` or `001`.
    pub command: &'a str,
    /// Middle parameters.
    pub params: Vec<&'a str>,
    /// The `:trailing` parameter, without the colon.
    pub trailing: Option<&'a str>,
}

impl<'a> IrcLine<'a> {
    /// Nick portion of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&'a str> {
        let prefix = self.prefix?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }
}

/// Parse one line, already stripped of CRLF. Returns `None` for lines that
/// do not carry a command.
pub fn parse(line: &str) -> Option<IrcLine<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }

    let (prefix, rest) = match line.strip_prefix(':') {
        Some(with_prefix) => {
            let (prefix, rest) = with_prefix.split_once(' ')?;
            (Some(prefix), rest)
        }
        None => (None, line),
    };

    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing)),
        None => (rest, None),
    };

    let mut words = middle.split_ascii_whitespace();
    let command = words.next()?;
    let params: Vec<&str> = words.collect();

    Some(IrcLine {
        prefix,
        command,
        params,
        trailing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privmsg_with_prefix() {
        let line = parse(":alice!a@host.example PRIVMSG #ops :hello there").unwrap();
        assert_eq!(line.prefix, Some("alice!a@host.example"));
        assert_eq!(line.nick(), Some("alice"));
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.params, vec!["#ops"]);
        assert_eq!(line.trailing, Some("hello there"));
    }

    #[test]
    fn test_ping_without_prefix() {
        let line = parse("PING :irc.example.net").unwrap();
        assert_eq!(line.prefix, None);
        assert_eq!(line.command, "PING");
        assert_eq!(line.trailing, Some("irc.example.net"));
    }

    #[test]
    fn test_numeric_welcome() {
        let line = parse(":irc.example.net 001 fr0g :Welcome").unwrap();
        assert_eq!(line.command, "001");
        assert_eq!(line.params, vec!["fr0g"]);
    }

    #[test]
    fn test_trailing_colon_inside_text() {
        let line = parse(":bob!b@h PRIVMSG #ops :note: see this").unwrap();
        assert_eq!(line.trailing, Some("note: see this"));
    }

    #[test]
    fn test_empty_line() {
        assert!(parse("").is_none());
        assert!(parse("\r\n").is_none());
    }
}
