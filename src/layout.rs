//! Line reconstruction from positioned runs
//!
//! Runs whose baselines lie within a tolerance of an existing line join it;
//! lines read top to bottom and runs within a line left to right.

use crate::extractor::TextRun;
use std::cmp::Ordering;

/// Default baseline tolerance in PDF units
pub const DEFAULT_ROW_TOLERANCE: f32 = 2.0;

/// A visual row of runs
#[derive(Debug, Clone)]
pub struct TextLine {
    /// Baseline of the first run that opened the line
    pub y: f32,
    pub page: u32,
    /// Runs ordered by x
    pub runs: Vec<TextRun>,
}

impl TextLine {
    /// Run texts joined by single spaces with whitespace collapsed
    pub fn text(&self) -> String {
        collapse_whitespace(
            &self
                .runs
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}

/// Group runs into lines
///
/// A run joins the first line (in creation order) whose baseline is within
/// `tolerance` of its own; otherwise it opens a new line. Runs with empty
/// text are skipped. Both sorts are stable, so ties keep input order.
pub fn group_lines(runs: &[TextRun], tolerance: f32) -> Vec<TextLine> {
    let mut lines: Vec<TextLine> = Vec::new();

    for run in runs {
        if run.text.is_empty() {
            continue;
        }
        match lines
            .iter_mut()
            .find(|line| (line.y - run.y).abs() <= tolerance)
        {
            Some(line) => line.runs.push(run.clone()),
            None => lines.push(TextLine {
                y: run.y,
                page: run.page,
                runs: vec![run.clone()],
            }),
        }
    }

    for line in &mut lines {
        line.runs
            .sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    }
    lines.sort_by(|a, b| b.y.partial_cmp(&a.y).unwrap_or(Ordering::Equal));

    lines
}

/// Reconstruct one page's text with the default tolerance
pub fn reconstruct(runs: &[TextRun]) -> String {
    reconstruct_with_tolerance(runs, DEFAULT_ROW_TOLERANCE)
}

/// Reconstruct one page's text, one output line per visual row
pub fn reconstruct_with_tolerance(runs: &[TextRun], tolerance: f32) -> String {
    group_lines(runs, tolerance)
        .iter()
        .map(TextLine::text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reconstruct a whole document, pages separated by a blank line
pub fn reconstruct_pages(pages: &[Vec<TextRun>]) -> String {
    reconstruct_pages_with_tolerance(pages, DEFAULT_ROW_TOLERANCE)
}

pub fn reconstruct_pages_with_tolerance(pages: &[Vec<TextRun>], tolerance: f32) -> String {
    pages
        .iter()
        .map(|runs| reconstruct_with_tolerance(runs, tolerance))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, x: f32, y: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            x,
            y,
            width: text.len() as f32 * 5.0,
            height: 10.0,
            font: "F1".to_string(),
            font_size: 10.0,
            page: 1,
        }
    }

    #[test]
    fn test_label_and_value_share_a_row() {
        let runs = vec![run("Country:", 50.0, 700.0), run("Vietnam", 120.0, 700.5)];
        assert_eq!(reconstruct(&runs), "Country: Vietnam");
    }

    #[test]
    fn test_rows_read_top_to_bottom() {
        let runs = vec![
            run("Name: A", 50.0, 700.0),
            run("Country:", 50.0, 680.0),
            run("Vietnam", 120.0, 680.0),
        ];
        assert_eq!(reconstruct(&runs), "Name: A\nCountry: Vietnam");
    }

    #[test]
    fn test_runs_sorted_by_x_within_row() {
        let runs = vec![run("world", 100.0, 500.0), run("hello", 10.0, 501.0)];
        assert_eq!(reconstruct(&runs), "hello world");
    }

    #[test]
    fn test_tolerance_boundary() {
        let runs = vec![run("a", 0.0, 100.0), run("b", 10.0, 102.0), run("c", 0.0, 104.5)];
        let lines = group_lines(&runs, 2.0);
        assert_eq!(lines.len(), 2);
        // The line keeps the baseline of the run that opened it
        assert_eq!(lines[1].y, 100.0);
        assert_eq!(lines[1].runs.len(), 2);
    }

    #[test]
    fn test_first_matching_line_wins() {
        // 101.5 is within tolerance of both 100 and 103; the earlier line takes it
        let runs = vec![run("a", 0.0, 100.0), run("b", 0.0, 103.0), run("c", 5.0, 101.5)];
        let lines = group_lines(&runs, 2.0);
        let bottom = lines.iter().find(|l| l.y == 100.0).unwrap();
        assert_eq!(bottom.text(), "a c");
    }

    #[test]
    fn test_equal_x_keeps_input_order() {
        let runs = vec![run("first", 10.0, 50.0), run("second", 10.0, 50.0)];
        assert_eq!(reconstruct(&runs), "first second");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let runs = vec![run("  Languages:  ", 0.0, 10.0), run(" English ", 80.0, 10.0)];
        assert_eq!(reconstruct(&runs), "Languages: English");
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(reconstruct(&[]), "");
        assert_eq!(reconstruct(&[run("", 0.0, 0.0)]), "");
    }

    #[test]
    fn test_pages_joined_by_blank_line() {
        let pages = vec![
            vec![run("one", 0.0, 10.0)],
            vec![],
            vec![run("three", 0.0, 10.0)],
        ];
        assert_eq!(reconstruct_pages(&pages), "one\n\n\n\nthree");
    }
}
