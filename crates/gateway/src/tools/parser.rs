//! Slash-command parsing
//!
//! Token 0 is the command; `--flag=value` and `--flag value` pairs become
//! named arguments; contiguous positional tokens fold into an `input`
//! argument, or `query` when `input` is already set.

use serde_json::{Map, Value};

/// A parsed slash command with raw string arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub command: String,
    pub arguments: Map<String, Value>,
}

/// Parse a slash-prefixed command line; returns None for non-commands
pub fn parse_command(line: &str) -> Option<ParsedCommand> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }

    let mut tokens = line.split_whitespace();
    let command = tokens.next()?.to_string();

    let mut arguments = Map::new();
    let mut run: Vec<String> = Vec::new();
    let mut tokens = tokens.peekable();

    while let Some(token) = tokens.next() {
        if let Some(flag) = token.strip_prefix("--") {
            // A flag ends the current run of positional tokens
            fold_run(&mut run, &mut arguments);
            if flag.is_empty() {
                continue;
            }
            if let Some((name, value)) = flag.split_once('=') {
                arguments.insert(name.to_string(), Value::String(value.to_string()));
            } else {
                // `--flag value` form; a flag with no value becomes "true"
                let value = match tokens.peek() {
                    Some(next) if !next.starts_with("--") => {
                        tokens.next().unwrap_or_default().to_string()
                    }
                    _ => "true".to_string(),
                };
                arguments.insert(flag.to_string(), Value::String(value));
            }
        } else {
            run.push(token.to_string());
        }
    }

    fold_run(&mut run, &mut arguments);

    Some(ParsedCommand { command, arguments })
}

/// Fold one contiguous run of positional tokens into `input`, or `query`
/// when `input` is already set; later runs extend `query`
fn fold_run(run: &mut Vec<String>, arguments: &mut Map<String, Value>) {
    if run.is_empty() {
        return;
    }
    let folded = run.join(" ");
    run.clear();

    if !arguments.contains_key("input") {
        arguments.insert("input".to_string(), Value::String(folded));
    } else if !arguments.contains_key("query") {
        arguments.insert("query".to_string(), Value::String(folded));
    } else if let Some(Value::String(existing)) = arguments.get_mut("query") {
        existing.push(' ');
        existing.push_str(&folded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_command_returns_none() {
        assert!(parse_command("just a message").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn test_command_token_and_flags() {
        let parsed = parse_command("/search --mode=semantic --limit 5").unwrap();
        assert_eq!(parsed.command, "/search");
        assert_eq!(parsed.arguments["mode"], "semantic");
        assert_eq!(parsed.arguments["limit"], "5");
    }

    #[test]
    fn test_positional_tokens_fold_into_input() {
        let parsed = parse_command("/search flow state triggers").unwrap();
        assert_eq!(parsed.arguments["input"], "flow state triggers");
    }

    #[test]
    fn test_positionals_become_query_when_input_set() {
        let parsed = parse_command("/clos --input=routine morning energy").unwrap();
        assert_eq!(parsed.arguments["input"], "routine");
        assert_eq!(parsed.arguments["query"], "morning energy");
    }

    #[test]
    fn test_flag_separated_runs_fold_separately() {
        // Each contiguous run takes the next free slot
        let parsed = parse_command("/clos hello --depth=2 world").unwrap();
        assert_eq!(parsed.arguments["input"], "hello");
        assert_eq!(parsed.arguments["query"], "world");
        assert_eq!(parsed.arguments["depth"], "2");

        // A third run extends query rather than vanishing
        let parsed = parse_command("/clos one --a=1 two --b=2 three").unwrap();
        assert_eq!(parsed.arguments["input"], "one");
        assert_eq!(parsed.arguments["query"], "two three");
    }

    #[test]
    fn test_mixed_flags_and_positionals() {
        let parsed = parse_command("/search --mode=semantic hello world --limit=2").unwrap();
        assert_eq!(parsed.arguments["mode"], "semantic");
        assert_eq!(parsed.arguments["limit"], "2");
        assert_eq!(parsed.arguments["input"], "hello world");
    }

    #[test]
    fn test_bare_flag_defaults_to_true() {
        let parsed = parse_command("/search --rerank deep work").unwrap();
        // `--rerank deep` pairs the flag with the following token
        assert_eq!(parsed.arguments["rerank"], "deep");
        assert_eq!(parsed.arguments["input"], "work");

        let parsed = parse_command("/search deep work --rerank").unwrap();
        assert_eq!(parsed.arguments["rerank"], "true");
        assert_eq!(parsed.arguments["input"], "deep work");
    }
}
