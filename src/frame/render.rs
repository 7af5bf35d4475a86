use serde::{Deserialize, Serialize};

use super::{CellValue, Frame};

/// Number and null formatting for rendered tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Styler {
    pub float_precision: usize,
    pub thousands_separator: String,
    pub decimal_separator: String,
    pub na_rep: String,
}

impl Default for Styler {
    fn default() -> Self {
        Self {
            float_precision: 2,
            thousands_separator: String::new(),
            decimal_separator: ".".to_string(),
            na_rep: String::new(),
        }
    }
}

impl Styler {
    pub fn format(&self, value: &CellValue) -> String {
        match value {
            CellValue::Null => self.na_rep.clone(),
            CellValue::Float32(_) | CellValue::Float64(_) => {
                let f = value.as_f64().unwrap_or_default();
                if !f.is_finite() {
                    return f.to_string();
                }
                let text = format!("{:.*}", self.float_precision, f);
                self.localize(&text)
            }
            CellValue::Int16(_) | CellValue::Int32(_) | CellValue::Int64(_) => {
                self.localize(&value.display())
            }
            other => other.display(),
        }
    }

    /// Apply separators to a plain `-1234.56` style number.
    fn localize(&self, text: &str) -> String {
        let (sign, digits) = match text.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", text),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (digits, None),
        };
        let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
        for (i, ch) in int_part.chars().enumerate() {
            if i > 0 && (int_part.len() - i) % 3 == 0 {
                grouped.push_str(&self.thousands_separator);
            }
            grouped.push(ch);
        }
        match frac_part {
            Some(frac) => format!("{}{}{}{}", sign, grouped, self.decimal_separator, frac),
            None => format!("{}{}", sign, grouped),
        }
    }
}

/// Template-facing view of a frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub n_rows: usize,
    pub n_cols: usize,
    pub markdown: String,
    pub html: String,
}

impl Frame {
    /// Render as a pipe table. Numeric columns are right-aligned.
    pub fn to_markdown(&self, styler: &Styler) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(|v| escape_pipes(&styler.format(v))).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|r| unicode_width::UnicodeWidthStr::width(r[i].as_str()))
                    .chain(std::iter::once(unicode_width::UnicodeWidthStr::width(
                        c.name.as_str(),
                    )))
                    .max()
                    .unwrap_or(0)
                    .max(3)
            })
            .collect();
        let numeric: Vec<bool> = (0..self.width())
            .map(|i| {
                let mut values = self.rows.iter().map(|r| &r[i]).filter(|v| !v.is_null());
                let first = values.next();
                first.is_some_and(|v| v.is_numeric()) && values.all(|v| v.is_numeric())
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| pad(&escape_pipes(&c.name), *w, false))
            .collect();
        out.push_str(&format!("| {} |\n", header.join(" | ")));
        let rule: Vec<String> = widths
            .iter()
            .zip(&numeric)
            .map(|(w, right)| {
                if *right {
                    format!("{}:", "-".repeat(w - 1))
                } else {
                    "-".repeat(*w)
                }
            })
            .collect();
        out.push_str(&format!("| {} |\n", rule.join(" | ")));
        for row in &cells {
            let padded: Vec<String> = row
                .iter()
                .zip(&widths)
                .zip(&numeric)
                .map(|((cell, w), right)| pad(cell, *w, *right))
                .collect();
            out.push_str(&format!("| {} |\n", padded.join(" | ")));
        }
        out
    }

    pub fn to_html_table(&self, styler: &Styler) -> String {
        let mut out = String::from("<table>\n<thead>\n<tr>");
        for col in &self.columns {
            out.push_str(&format!("<th>{}</th>", escape_html(&col.name)));
        }
        out.push_str("</tr>\n</thead>\n<tbody>\n");
        for row in &self.rows {
            out.push_str("<tr>");
            for value in row {
                out.push_str(&format!("<td>{}</td>", escape_html(&styler.format(value))));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>\n");
        out
    }

    pub fn view(&self, styler: &Styler) -> FrameView {
        FrameView {
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| r.iter().map(|v| styler.format(v)).collect())
                .collect(),
            n_rows: self.height(),
            n_cols: self.width(),
            markdown: self.to_markdown(styler),
            html: self.to_html_table(styler),
        }
    }
}

fn pad(text: &str, width: usize, right: bool) -> String {
    let fill = width.saturating_sub(unicode_width::UnicodeWidthStr::width(text));
    if right {
        format!("{}{}", " ".repeat(fill), text)
    } else {
        format!("{}{}", text, " ".repeat(fill))
    }
}

fn escape_pipes(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dutch() -> Styler {
        Styler {
            float_precision: 1,
            thousands_separator: ".".into(),
            decimal_separator: ",".into(),
            na_rep: "-".into(),
        }
    }

    #[test]
    fn test_default_format() {
        let styler = Styler::default();
        assert_eq!(styler.format(&CellValue::Float64(3.14159)), "3.14");
        assert_eq!(styler.format(&CellValue::Int64(1234567)), "1234567");
        assert_eq!(styler.format(&CellValue::Null), "");
    }

    #[test]
    fn test_localized_format() {
        let styler = dutch();
        assert_eq!(styler.format(&CellValue::Float64(-1234567.26)), "-1.234.567,3");
        assert_eq!(styler.format(&CellValue::Int32(999)), "999");
        assert_eq!(styler.format(&CellValue::Int32(1000)), "1.000");
        assert_eq!(styler.format(&CellValue::Null), "-");
        assert_eq!(styler.format(&CellValue::Text("a|b".into())), "a|b");
    }

    #[test]
    fn test_markdown_table() {
        let frame = Frame::new(
            vec!["name".into(), "n".into()],
            vec![
                vec![CellValue::Text("a|b".into()), CellValue::Int32(5)],
                vec![CellValue::Text("c".into()), CellValue::Int32(10)],
            ],
        );
        let md = frame.to_markdown(&Styler::default());
        let lines: Vec<&str> = md.lines().collect();
        assert_eq!(lines[0], "| name | n   |");
        assert_eq!(lines[1], "| ---- | --: |");
        assert_eq!(lines[2], "| a\\|b |   5 |");
        assert_eq!(lines[3], "| c    |  10 |");
    }

    #[test]
    fn test_html_table_escapes() {
        let frame = Frame::new(
            vec!["x".into()],
            vec![vec![CellValue::Text("<b>".into())]],
        );
        let html = frame.to_html_table(&Styler::default());
        assert!(html.contains("<td>&lt;b&gt;</td>"));
        assert!(html.contains("<th>x</th>"));
    }

    #[test]
    fn test_view() {
        let frame = Frame::new(
            vec!["x".into()],
            vec![vec![CellValue::Float64(0.5)], vec![CellValue::Null]],
        );
        let view = frame.view(&Styler::default());
        assert_eq!(view.n_rows, 2);
        assert_eq!(view.rows[0][0], "0.50");
        assert_eq!(view.rows[1][0], "");
        assert!(view.markdown.starts_with("| x"));
    }
}
