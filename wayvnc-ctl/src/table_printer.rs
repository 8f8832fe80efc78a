//! Two-column help-text formatting (spec §4.8 "Help text"), grounded on
//! `original_source/src/table-printer.c`: a left column of fixed width
//! followed by word-wrapped text in the remaining width, used by the option
//! parser to print `--help` output.

/// Matches `table_printer_set_defaults`.
#[derive(Debug, Clone, Copy)]
pub struct TablePrinter {
    pub max_width: usize,
    pub left_indent: usize,
    pub column_offset: usize,
}

impl Default for TablePrinter {
    fn default() -> Self {
        TablePrinter { max_width: 80, left_indent: 4, column_offset: 8 }
    }
}

impl TablePrinter {
    /// Word-wraps `text` to fit in `width` columns, breaking at the last
    /// space before the limit (`table_printer_reflow_text`). Never splits a
    /// word, even one longer than `width`.
    pub fn reflow_text(text: &str, width: usize) -> Vec<String> {
        if width == 0 {
            return vec![text.to_string()];
        }

        let mut lines = Vec::new();
        for paragraph in text.split('\n') {
            if paragraph.is_empty() {
                lines.push(String::new());
                continue;
            }
            let mut current = String::new();
            for word in paragraph.split(' ') {
                if current.is_empty() {
                    current.push_str(word);
                } else if current.len() + 1 + word.len() <= width {
                    current.push(' ');
                    current.push_str(word);
                } else {
                    lines.push(std::mem::take(&mut current));
                    current.push_str(word);
                }
            }
            lines.push(current);
        }
        lines
    }

    /// One paragraph, first line prefixed by `left_indent` spaces, the rest
    /// by `left_indent + column_offset` spaces to line up under the right
    /// column of a preceding [`Self::print_line`] call
    /// (`table_printer_indent_and_reflow_text`).
    pub fn indent_and_reflow(&self, text: &str, width: usize) -> String {
        let lines = Self::reflow_text(text, width);
        let mut out = String::new();
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let indent = if i == 0 { self.left_indent } else { self.left_indent + self.column_offset };
            out.push_str(&" ".repeat(indent));
            out.push_str(line);
        }
        out
    }

    /// Prints `left_text` left-padded to `left_width + column_offset`
    /// columns followed by `right_text` reflowed into whatever's left of
    /// `max_width` (`table_printer_print_line`).
    pub fn print_line(&self, left_text: &str, right_text: &str, left_width: usize) -> String {
        let column = left_width + self.column_offset;
        let right_width = self.max_width.saturating_sub(self.left_indent + column).max(1);
        let lines = Self::reflow_text(right_text, right_width);

        let mut out = String::new();
        out.push_str(&" ".repeat(self.left_indent));
        out.push_str(left_text);
        let pad = column.saturating_sub(left_text.len());

        for (i, line) in lines.iter().enumerate() {
            if i == 0 {
                out.push_str(&" ".repeat(pad.max(1)));
            } else {
                out.push('\n');
                out.push_str(&" ".repeat(self.left_indent + column));
            }
            out.push_str(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflow_breaks_at_the_last_space_before_the_limit() {
        let lines = TablePrinter::reflow_text("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn reflow_never_splits_a_word_longer_than_width() {
        let lines = TablePrinter::reflow_text("supercalifragilistic", 5);
        assert_eq!(lines, vec!["supercalifragilistic"]);
    }

    #[test]
    fn print_line_aligns_wrapped_continuation_under_the_right_column() {
        let printer = TablePrinter::default();
        let out = printer.print_line("--foo", "a fairly long description that wraps onto a second line", 10);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("    --foo"));
        assert_eq!(lines[1].len() - lines[1].trim_start().len(), 4 + 10 + 8);
    }
}
