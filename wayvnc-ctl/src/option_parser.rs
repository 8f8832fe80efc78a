//! Command-line option parsing (spec §4.8 "Option parser"), grounded on
//! `original_source/include/option-parser.h` + `src/option-parser.c`: a
//! declarative table of short/long/positional options parsed against
//! `argv`, plus `--help`-style table formatting via [`crate::table_printer`].

use std::fmt;

use thiserror::Error;

use crate::table_printer::TablePrinter;

/// Mirrors `struct wv_option`. `schema` being `Some` means the option takes
/// a value (its placeholder text, e.g. `"<name>"`, shown in `--help`);
/// `None` means it's a bare flag.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub short_opt: Option<char>,
    pub long_opt: Option<&'static str>,
    pub schema: Option<&'static str>,
    pub help: &'static str,
    pub default: Option<&'static str>,
    pub positional: bool,
    pub is_subcommand: bool,
}

impl OptionSpec {
    fn takes_value(&self) -> bool {
        self.schema.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unrecognized option: --{0}")]
    UnknownLong(String),
    #[error("unrecognized option: -{0}")]
    UnknownShort(char),
    #[error("option --{0} requires a value")]
    MissingLongValue(String),
    #[error("option -{0} requires a value")]
    MissingShortValue(char),
    #[error("too many positional arguments")]
    TooManyArguments,
    #[error("unexpected positional argument: {0}")]
    UnexpectedPositional(String),
}

#[derive(Debug, Clone)]
struct ParsedValue {
    option_index: usize,
    value: String,
}

/// Matches `struct option_parser`: a fixed table of [`OptionSpec`]s plus the
/// values accumulated by [`Self::parse`].
pub struct OptionParser {
    name: &'static str,
    options: &'static [OptionSpec],
    values: Vec<ParsedValue>,
    position: usize,
    /// Argv left over once a subcommand option absorbed the rest
    /// (`parse_positional_arg`'s `is_subcommand` early return).
    pub remaining: Vec<String>,
}

impl OptionParser {
    pub fn new(name: &'static str, options: &'static [OptionSpec]) -> Self {
        OptionParser { name, options, values: Vec::new(), position: 0, remaining: Vec::new() }
    }

    fn find_long(&self, name: &str) -> Option<usize> {
        self.options.iter().position(|o| o.long_opt == Some(name))
    }

    fn find_short(&self, name: char) -> Option<usize> {
        self.options.iter().position(|o| o.short_opt == Some(name))
    }

    fn find_positional(&self, position: usize) -> Option<usize> {
        self.options.iter().enumerate().filter(|(_, o)| o.positional).nth(position).map(|(i, _)| i)
    }

    fn append_value(&mut self, option_index: usize, value: String) {
        self.values.push(ParsedValue { option_index, value });
    }

    /// `--name` or `--name=value`; consumes the next argv entry as the value
    /// if the option takes one and no `=` was given.
    fn parse_long_arg(&mut self, arg: &str, rest: &mut std::iter::Peekable<std::slice::Iter<String>>) -> Result<(), ParseError> {
        let body = &arg[2..];
        let (name, inline_value) = match body.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (body, None),
        };

        let index = self.find_long(name).ok_or_else(|| ParseError::UnknownLong(name.to_string()))?;
        let option = self.options[index];

        if !option.takes_value() {
            self.append_value(index, String::new());
            return Ok(());
        }

        let value = match inline_value {
            Some(v) => v,
            None => rest.next().cloned().ok_or_else(|| ParseError::MissingLongValue(name.to_string()))?,
        };
        self.append_value(index, value);
        Ok(())
    }

    /// `-ab` (clustered flags), `-vfoo`/`-v=foo` (attached value), or `-v
    /// foo` (next argv consumed).
    fn parse_short_args(&mut self, arg: &str, rest: &mut std::iter::Peekable<std::slice::Iter<String>>) -> Result<(), ParseError> {
        let chars: Vec<char> = arg[1..].chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let index = self.find_short(c).ok_or(ParseError::UnknownShort(c))?;
            let option = self.options[index];

            if !option.takes_value() {
                self.append_value(index, String::new());
                i += 1;
                continue;
            }

            let attached: String = chars[i + 1..].iter().collect();
            let attached = attached.strip_prefix('=').map(str::to_string).unwrap_or(attached);
            if !attached.is_empty() {
                self.append_value(index, attached);
            } else {
                let value = rest.next().cloned().ok_or(ParseError::MissingShortValue(c))?;
                self.append_value(index, value);
            }
            break;
        }
        Ok(())
    }

    /// Matches `parse_positional_arg`: assigns `arg` to the next untaken
    /// positional slot by declaration order, advancing `self.position`.
    fn parse_positional_arg(&mut self, arg: &str) -> Result<bool, ParseError> {
        let index = self.find_positional(self.position).ok_or(ParseError::TooManyArguments)?;
        let option = self.options[index];
        self.append_value(index, arg.to_string());
        self.position += 1;
        Ok(option.is_subcommand)
    }

    /// Parses `args` (argv without the program name). `--` alone stops
    /// option processing, matching GNU convention; everything after it (and
    /// everything after an `is_subcommand` positional absorbs it) ends up in
    /// [`Self::remaining`].
    pub fn parse(&mut self, args: &[String]) -> Result<(), ParseError> {
        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                self.remaining = iter.cloned().collect();
                return Ok(());
            }
            if arg.starts_with("--") && arg.len() > 2 {
                self.parse_long_arg(arg, &mut iter)?;
            } else if arg.starts_with('-') && arg.len() > 1 {
                self.parse_short_args(arg, &mut iter)?;
            } else {
                let stop = self.parse_positional_arg(arg)?;
                if stop {
                    self.remaining = iter.cloned().collect();
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Looks up a parsed value by short or long name, falling back to the
    /// option's declared default (`option_parser_get_value`).
    pub fn get_value(&self, name: &str) -> Option<&str> {
        let index = if name.len() == 1 {
            self.find_short(name.chars().next().unwrap())
        } else {
            self.find_long(name)
        }?;

        if let Some(parsed) = self.values.iter().find(|v| v.option_index == index) {
            return Some(parsed.value.as_str());
        }
        self.options[index].default
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get_value(name).is_some()
    }

    /// Looks up the value assigned to the `position`'th declared positional
    /// option (0-based), such as a subcommand name that has no short/long
    /// identifier of its own and so can't be reached through
    /// [`Self::get_value`].
    pub fn get_positional(&self, position: usize) -> Option<&str> {
        let index = self.find_positional(position)?;
        self.values.iter().find(|v| v.option_index == index).map(|v| v.value.as_str())
    }

    fn left_column_width(&self) -> usize {
        self.options
            .iter()
            .filter(|o| !o.positional)
            .map(|o| {
                let mut width = 0;
                if let Some(s) = o.short_opt {
                    width += format!("-{s}, ").len();
                }
                if let Some(l) = o.long_opt {
                    width += format!("--{l}").len();
                }
                if let Some(schema) = o.schema {
                    width += 1 + schema.len();
                }
                width
            })
            .max()
            .unwrap_or(0)
    }

    pub fn print_options(&self) -> String {
        let printer = TablePrinter::default();
        let left_width = self.left_column_width();
        let mut out = String::new();
        for option in self.options.iter().filter(|o| !o.positional) {
            let mut left = String::new();
            if let Some(s) = option.short_opt {
                left.push('-');
                left.push(s);
                left.push_str(", ");
            }
            if let Some(l) = option.long_opt {
                left.push_str("--");
                left.push_str(l);
            }
            if let Some(schema) = option.schema {
                left.push(' ');
                left.push_str(schema);
            }
            out.push_str(&printer.print_line(&left, option.help, left_width));
            out.push('\n');
        }
        out
    }

    pub fn print_arguments(&self) -> String {
        let printer = TablePrinter::default();
        let left_width = self.left_column_width();
        let mut out = String::new();
        for option in self.options.iter().filter(|o| o.positional) {
            let left = option.schema.unwrap_or(option.long_opt.unwrap_or(""));
            out.push_str(&printer.print_line(left, option.help, left_width));
            out.push('\n');
        }
        out
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for OptionParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionParser").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static OPTS: &[OptionSpec] = &[
        OptionSpec {
            short_opt: Some('v'),
            long_opt: Some("verbose"),
            schema: None,
            help: "Enable verbose logging",
            default: None,
            positional: false,
            is_subcommand: false,
        },
        OptionSpec {
            short_opt: Some('S'),
            long_opt: Some("socket"),
            schema: Some("<path>"),
            help: "Control socket path",
            default: Some("/tmp/wayvncctl"),
            positional: false,
            is_subcommand: false,
        },
        OptionSpec {
            short_opt: None,
            long_opt: None,
            schema: Some("<name>"),
            help: "Command name",
            default: None,
            positional: true,
            is_subcommand: true,
        },
    ];

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn long_flag_without_value() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["--verbose"])).unwrap();
        assert!(parser.is_set("verbose"));
    }

    #[test]
    fn long_option_with_inline_equals_value() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["--socket=/run/x"])).unwrap();
        assert_eq!(parser.get_value("socket"), Some("/run/x"));
    }

    #[test]
    fn short_option_consumes_next_argv_as_value() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["-S", "/run/y"])).unwrap();
        assert_eq!(parser.get_value("S"), Some("/run/y"));
    }

    #[test]
    fn short_option_with_attached_value() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["-S/run/z"])).unwrap();
        assert_eq!(parser.get_value("socket"), Some("/run/z"));
    }

    #[test]
    fn missing_option_falls_back_to_default() {
        let parser = OptionParser::new("wayvncctl", OPTS);
        assert_eq!(parser.get_value("socket"), Some("/tmp/wayvncctl"));
    }

    #[test]
    fn subcommand_positional_absorbs_the_remaining_argv() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["client-disconnect", "--id", "3"])).unwrap();
        assert_eq!(parser.remaining, vec!["--id".to_string(), "3".to_string()]);
    }

    #[test]
    fn get_positional_recovers_the_subcommand_name_itself() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["client-disconnect", "--id", "3"])).unwrap();
        assert_eq!(parser.get_positional(0), Some("client-disconnect"));
    }

    #[test]
    fn unknown_long_option_is_an_error() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        assert!(matches!(parser.parse(&args(&["--bogus"])), Err(ParseError::UnknownLong(_))));
    }

    #[test]
    fn double_dash_stops_option_processing() {
        let mut parser = OptionParser::new("wayvncctl", OPTS);
        parser.parse(&args(&["--", "-v", "positional"])).unwrap();
        assert!(!parser.is_set("verbose"));
        assert_eq!(parser.remaining, vec!["-v".to_string(), "positional".to_string()]);
    }
}
