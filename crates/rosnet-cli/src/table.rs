//! Box-drawn tables for graph listings.

use colored::Colorize;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row. Missing cells render empty, extra cells are dropped.
    pub fn add_row(&mut self, cells: Vec<String>) {
        let row = (0..self.headers.len())
            .map(|i| cells.get(i).cloned().unwrap_or_default())
            .collect();
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        widths
    }

    fn border(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    fn line(cells: &[String], widths: &[usize], bold: bool) -> String {
        let cells: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| {
                let padded = format!("{cell:<width$}");
                if bold {
                    format!(" {} ", padded.bold())
                } else {
                    format!(" {padded} ")
                }
            })
            .collect();
        format!("\u{2502}{}\u{2502}", cells.join("\u{2502}"))
    }

    pub fn render(&self) -> String {
        let widths = self.column_widths();
        let mut lines = vec![
            Self::border(&widths, '\u{250c}', '\u{252c}', '\u{2510}'),
            Self::line(&self.headers, &widths, true),
            Self::border(&widths, '\u{251c}', '\u{253c}', '\u{2524}'),
        ];
        for row in &self.rows {
            lines.push(Self::line(row, &widths, false));
        }
        lines.push(Self::border(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_aligns_columns() {
        colored::control::set_override(false);
        let mut table = Table::new(&["TOPIC", "TYPE"]);
        table.add_row(vec!["/chatter".into(), "std_msgs/String".into()]);
        table.add_row(vec!["/a".into()]);
        let rendered = table.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[1], "\u{2502} TOPIC    \u{2502} TYPE            \u{2502}");
        assert_eq!(lines[3], "\u{2502} /chatter \u{2502} std_msgs/String \u{2502}");
        assert_eq!(lines[4], "\u{2502} /a       \u{2502}                 \u{2502}");
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }

    #[test]
    fn test_empty() {
        let table = Table::new(&["NODE"]);
        assert!(table.is_empty());
    }
}
